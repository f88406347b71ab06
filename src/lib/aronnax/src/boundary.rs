//! Halo refresh and velocity masking.
//!
//! Every gridded field carries a one-cell halo. `wrap_2d`/`wrap_3d` are the
//! single "refresh borders" operation: the interior columns `nx` and `1` are
//! copied into the halo columns `0` and `nx+1` (likewise in y), which also
//! serves as the neighbor exchange between tiles sharing the array.

use ndarray::{Array2, Array3};

use crate::grid::Grid;

/// Periodic wrap of a 2D halo'd field.
pub fn wrap_2d(field: &mut Array2<f64>) {
    let (nxp2, nyp2) = field.dim();
    let nx = nxp2 - 2;
    let ny = nyp2 - 2;
    for j in 0..nyp2 {
        field[[0, j]] = field[[nx, j]];
        field[[nx + 1, j]] = field[[1, j]];
    }
    for i in 0..nxp2 {
        field[[i, 0]] = field[[i, ny]];
        field[[i, ny + 1]] = field[[i, 1]];
    }
}

/// Periodic wrap of a 3D halo'd field, layer by layer.
pub fn wrap_3d(field: &mut Array3<f64>) {
    let (layers, nxp2, nyp2) = field.dim();
    let nx = nxp2 - 2;
    let ny = nyp2 - 2;
    for k in 0..layers {
        for j in 0..nyp2 {
            field[[k, 0, j]] = field[[k, nx, j]];
            field[[k, nx + 1, j]] = field[[k, 1, j]];
        }
        for i in 0..nxp2 {
            field[[k, i, 0]] = field[[k, i, ny]];
            field[[k, i, ny + 1]] = field[[k, i, 1]];
        }
    }
}

/// Zero zonal velocity across land faces and inside dry cells.
pub fn apply_boundary_u(u: &mut Array3<f64>, grid: &Grid) {
    let (layers, _, _) = u.dim();
    for k in 0..layers {
        for i in 1..=grid.nx {
            for j in 1..=grid.ny {
                u[[k, i, j]] *= grid.hfac_w[[i, j]] * grid.wetmask[[i, j]];
            }
        }
    }
    wrap_3d(u);
}

/// Zero meridional velocity across land faces and inside dry cells.
pub fn apply_boundary_v(v: &mut Array3<f64>, grid: &Grid) {
    let (layers, _, _) = v.dim();
    for k in 0..layers {
        for i in 1..=grid.nx {
            for j in 1..=grid.ny {
                v[[k, i, j]] *= grid.hfac_s[[i, j]] * grid.wetmask[[i, j]];
            }
        }
    }
    wrap_3d(v);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn wrap_copies_periodic_partners() {
        let nx = 4;
        let ny = 3;
        let mut field = Array2::<f64>::zeros((nx + 2, ny + 2));
        for i in 1..=nx {
            for j in 1..=ny {
                field[[i, j]] = (10 * i + j) as f64;
            }
        }
        wrap_2d(&mut field);
        for j in 1..=ny {
            assert_eq!(field[[0, j]], field[[nx, j]]);
            assert_eq!(field[[nx + 1, j]], field[[1, j]]);
        }
        for i in 1..=nx {
            assert_eq!(field[[i, 0]], field[[i, ny]]);
            assert_eq!(field[[i, ny + 1]], field[[i, 1]]);
        }
        // corners follow from the second pass over x rows
        assert_eq!(field[[0, 0]], field[[nx, ny]]);
    }
}
