use ndarray::Array2;

use crate::boundary::wrap_2d;
use crate::config::{Config, given};
use crate::error::ModelError;
use crate::io::{self, Stagger};

/// Static geometry of the run: shape, spacing, masks, Coriolis, bathymetry.
///
/// All 2D members are `(nx+2) × (ny+2)` halo'd arrays. Cell centers (H
/// points) sit at `((i-0.5)·dx, (j-0.5)·dy)` for interior indices; U points
/// sit on west faces and V points on south faces.
pub struct Grid {
    pub nx: usize,
    pub ny: usize,
    pub layers: usize,
    /// Zonal grid spacing [m]
    pub dx: f64,
    /// Meridional grid spacing [m]
    pub dy: f64,
    /// 1 = wet, 0 = dry, fixed for the run
    pub wetmask: Array2<f64>,
    /// Face masks: 0 where the face separates a wet cell from a dry one
    pub hfac_w: Array2<f64>,
    pub hfac_e: Array2<f64>,
    pub hfac_n: Array2<f64>,
    pub hfac_s: Array2<f64>,
    /// Coriolis parameter at U points [1/s]
    pub fu: Array2<f64>,
    /// Coriolis parameter at V points [1/s]
    pub fv: Array2<f64>,
    /// Water column depth at rest [m], H points
    pub depth: Array2<f64>,
}

impl Grid {
    pub fn new(config: &Config) -> Result<Grid, ModelError> {
        let nx = config.grid.nx;
        let ny = config.grid.ny;
        let layers = config.grid.layers;
        let shape = (nx + 2, ny + 2);

        let mut wetmask = match given(&config.grid.wet_mask_file) {
            Some(path) => io::read_2d(path, nx, ny, Stagger::H)?,
            None => {
                let mut all_wet = Array2::<f64>::zeros(shape);
                all_wet.fill(1.0);
                all_wet
            }
        };
        wrap_2d(&mut wetmask);

        let mut fu = match given(&config.grid.f_u_file) {
            Some(path) => io::read_2d(path, nx, ny, Stagger::U)?,
            None => beta_plane(nx, ny, config.grid.f0, config.grid.beta, config.grid.dy, Stagger::U),
        };
        wrap_2d(&mut fu);
        let mut fv = match given(&config.grid.f_v_file) {
            Some(path) => io::read_2d(path, nx, ny, Stagger::V)?,
            None => beta_plane(nx, ny, config.grid.f0, config.grid.beta, config.grid.dy, Stagger::V),
        };
        wrap_2d(&mut fv);

        let mut depth = match given(&config.model.depth_file) {
            Some(path) => io::read_2d(path, nx, ny, Stagger::H)?,
            None => {
                let mut flat = Array2::<f64>::zeros(shape);
                flat.fill(config.model.h0);
                flat
            }
        };
        wrap_2d(&mut depth);

        // the water column must be positive wherever there is water,
        // whichever physics variant is running
        for i in 1..=nx {
            for j in 1..=ny {
                if wetmask[[i, j]] != 0.0 && !(depth[[i, j]] > 0.0) {
                    return Err(ModelError::Config(format!(
                        "depth must be positive in wet cells, got {} at ({}, {})",
                        depth[[i, j]],
                        i,
                        j
                    )));
                }
            }
        }

        let (hfac_w, hfac_e, hfac_n, hfac_s) = face_masks(&wetmask, nx, ny);

        Ok(Grid {
            nx,
            ny,
            layers,
            dx: config.grid.dx,
            dy: config.grid.dy,
            wetmask,
            hfac_w,
            hfac_e,
            hfac_n,
            hfac_s,
            fu,
            fv,
            depth,
        })
    }
}

/// f0 + beta·y evaluated at U or V points.
fn beta_plane(nx: usize, ny: usize, f0: f64, beta: f64, dy: f64, stagger: Stagger) -> Array2<f64> {
    let mut f = Array2::<f64>::zeros((nx + 2, ny + 2));
    for i in 0..nx + 2 {
        for j in 0..ny + 2 {
            // U points share the cell-center latitude; V points sit on south faces
            let y = match stagger {
                Stagger::V => (j as f64 - 1.0) * dy,
                _ => (j as f64 - 0.5) * dy,
            };
            f[[i, j]] = f0 + beta * y;
        }
    }
    f
}

/// A face is closed (0) exactly when the two cells it separates disagree on
/// wetness. Outer rows come from the periodic partners.
fn face_masks(
    wetmask: &Array2<f64>,
    nx: usize,
    ny: usize,
) -> (Array2<f64>, Array2<f64>, Array2<f64>, Array2<f64>) {
    let shape = (nx + 2, ny + 2);
    let mut hfac_w = Array2::<f64>::zeros(shape);
    let mut hfac_e = Array2::<f64>::zeros(shape);
    let mut hfac_n = Array2::<f64>::zeros(shape);
    let mut hfac_s = Array2::<f64>::zeros(shape);
    for i in 1..=nx {
        for j in 1..=ny {
            let here = wetmask[[i, j]];
            hfac_w[[i, j]] = if wetmask[[i - 1, j]] != here { 0.0 } else { 1.0 };
            hfac_e[[i, j]] = if wetmask[[i + 1, j]] != here { 0.0 } else { 1.0 };
            hfac_s[[i, j]] = if wetmask[[i, j - 1]] != here { 0.0 } else { 1.0 };
            hfac_n[[i, j]] = if wetmask[[i, j + 1]] != here { 0.0 } else { 1.0 };
        }
    }
    wrap_2d(&mut hfac_w);
    wrap_2d(&mut hfac_e);
    wrap_2d(&mut hfac_n);
    wrap_2d(&mut hfac_s);
    (hfac_w, hfac_e, hfac_n, hfac_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn island_mask(nx: usize, ny: usize, wet: &[(usize, usize)]) -> Array2<f64> {
        let mut mask = Array2::<f64>::zeros((nx + 2, ny + 2));
        for &(i, j) in wet {
            mask[[i, j]] = 1.0;
        }
        wrap_2d(&mut mask);
        mask
    }

    #[test]
    fn face_masks_close_wet_dry_transitions() {
        let nx = 5;
        let ny = 5;
        // two wet cells side by side in an otherwise dry domain
        let mask = island_mask(nx, ny, &[(2, 3), (3, 3)]);
        let (hfac_w, hfac_e, hfac_n, hfac_s) = face_masks(&mask, nx, ny);

        // the shared face stays open
        assert_eq!(hfac_e[[2, 3]], 1.0);
        assert_eq!(hfac_w[[3, 3]], 1.0);
        // faces against dry neighbors are closed, seen from both sides
        assert_eq!(hfac_w[[2, 3]], 0.0);
        assert_eq!(hfac_e[[1, 3]], 0.0);
        assert_eq!(hfac_n[[2, 3]], 0.0);
        assert_eq!(hfac_s[[2, 3]], 0.0);
        // dry-dry faces are open; velocities there die on the wet mask instead
        assert_eq!(hfac_e[[4, 1]], 1.0);
    }

    #[test]
    fn zero_depth_in_wet_cells_is_rejected() {
        // the default flat bottom is 0 m; without a real depth the run must
        // abort in either physics variant
        let mut config = Config::default();
        config.grid.nx = 4;
        config.grid.ny = 4;
        config.model.red_grav = true;
        assert!(matches!(Grid::new(&config), Err(ModelError::Config(_))));
    }

    #[test]
    fn beta_plane_varies_only_with_y() {
        let f = beta_plane(4, 4, 1e-4, 1e-11, 1e4, Stagger::U);
        assert_eq!(f[[1, 2]], f[[4, 2]]);
        let expected = 1e-4 + 1e-11 * 1.5e4;
        assert!((f[[2, 2]] - expected).abs() < 1e-18);
        let fv = beta_plane(4, 4, 0.0, 1e-11, 1e4, Stagger::V);
        assert!((fv[[2, 1]] - 0.0).abs() < 1e-18);
    }
}
