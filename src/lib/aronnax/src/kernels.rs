//! Stencil kernels.
//!
//! Each kernel writes one tendency or diagnostic field from read-only inputs
//! over the interior `1..=nx × 1..=ny`, then wraps the halo. Sweeps run on
//! the worker pool, one column of layers at a time; nothing here carries
//! state between calls.

use ndarray::{Array3, Axis, Zip, s};

use crate::boundary::wrap_3d;
use crate::config::{Config, per_layer};
use crate::decomp::Decomp;
use crate::error::ModelError;
use crate::grid::Grid;
use crate::state::Forcing;

/// Scalar physics parameters the kernels need every step, resolved once from
/// the configuration.
pub struct KernelParams {
    /// Horizontal momentum viscosity [m²/s]
    pub au: f64,
    /// Vertical momentum coupling [1/s]
    pub ar: f64,
    /// Vertical thickness diffusivity [m²/s]
    pub kv: f64,
    /// Tangential boundary condition: 0 = free slip, 1 = no slip
    pub slip: f64,
    /// Linear bottom drag [1/s]
    pub bot_drag: f64,
    /// Reference density [kg/m³]
    pub rho0: f64,
    /// Quadratic drag coefficient for relative wind
    pub cd: f64,
    pub relative_wind: bool,
    /// Horizontal thickness diffusivity per layer [m²/s]
    pub kh: Vec<f64>,
    /// Reduced gravity at the top of each layer [m/s²]
    pub g: Vec<f64>,
}

impl KernelParams {
    pub fn new(config: &Config) -> Result<KernelParams, ModelError> {
        let layers = config.grid.layers;
        Ok(KernelParams {
            au: config.numerics.au,
            ar: config.numerics.ar,
            kv: config.numerics.kv,
            slip: config.numerics.slip,
            bot_drag: config.numerics.bot_drag,
            rho0: config.physics.rho0,
            cd: config.external_forcing.cd,
            relative_wind: config.external_forcing.relative_wind,
            kh: per_layer("kh", &config.numerics.kh, layers, 0.0)?,
            g: per_layer("g_vec", &config.physics.g_vec, layers, 9.8)?,
        })
    }
}

/// Relative vorticity at Z points: ζ = ∂v/∂x − ∂u/∂y.
pub fn evaluate_zeta(
    zeta: &mut Array3<f64>,
    u: &Array3<f64>,
    v: &Array3<f64>,
    grid: &Grid,
    decomp: &Decomp,
) {
    let (nx, ny) = (grid.nx, grid.ny);
    let (dx, dy) = (grid.dx, grid.dy);
    decomp.install(|| {
        let mut interior = zeta.slice_mut(s![.., 1..=nx, 1..=ny]);
        Zip::indexed(interior.lanes_mut(Axis(0)))
            .par_for_each(|(ii, jj), mut col| {
                let i = ii + 1;
                let j = jj + 1;
                for k in 0..col.len() {
                    col[k] = (v[[k, i, j]] - v[[k, i - 1, j]]) / dx
                        - (u[[k, i, j]] - u[[k, i, j - 1]]) / dy;
                }
            });
    });
    wrap_3d(zeta);
}

/// Thickness tendency at H points: horizontal diffusion (reflecting at dry
/// neighbors), vertical thickness diffusion, advective flux divergence, and
/// sponge relaxation. In n-layer mode the deepest layer's horizontal
/// diffusion is replaced by minus the sum of the other layers', so diffusion
/// never changes the column thickness.
pub fn evaluate_dhdt(
    dhdt: &mut Array3<f64>,
    h: &Array3<f64>,
    u: &Array3<f64>,
    v: &Array3<f64>,
    grid: &Grid,
    forcing: &Forcing,
    params: &KernelParams,
    n_layer: bool,
    decomp: &Decomp,
) {
    let (layers, nx, ny) = (grid.layers, grid.nx, grid.ny);
    let (dx, dy) = (grid.dx, grid.dy);
    let dx2 = dx * dx;
    let dy2 = dy * dy;
    let wet = &grid.wetmask;
    decomp.install(|| {
        let mut interior = dhdt.slice_mut(s![.., 1..=nx, 1..=ny]);
        Zip::indexed(interior.lanes_mut(Axis(0)))
            .par_for_each(|(ii, jj), mut col| {
                let i = ii + 1;
                let j = jj + 1;
                let diffusion = |k: usize| -> f64 {
                    let center = h[[k, i, j]];
                    let west = if wet[[i - 1, j]] != 0.0 { h[[k, i - 1, j]] } else { center };
                    let east = if wet[[i + 1, j]] != 0.0 { h[[k, i + 1, j]] } else { center };
                    let south = if wet[[i, j - 1]] != 0.0 { h[[k, i, j - 1]] } else { center };
                    let north = if wet[[i, j + 1]] != 0.0 { h[[k, i, j + 1]] } else { center };
                    params.kh[k]
                        * ((west - 2.0 * center + east) / dx2
                            + (south - 2.0 * center + north) / dy2)
                };
                for k in 0..layers {
                    // the deepest layer closes the column: its diffusion is
                    // whatever cancels the layers above
                    let lateral = if n_layer && k == layers - 1 {
                        -(0..layers - 1).map(&diffusion).sum::<f64>()
                    } else {
                        diffusion(k)
                    };

                    // interface exchanges kv·(1/h_k − 1/h_k+1): thin layers
                    // entrain from their thicker neighbors, column sum is zero
                    let mut vertical = 0.0;
                    if params.kv != 0.0 && layers > 1 {
                        if k + 1 < layers {
                            vertical +=
                                params.kv * (1.0 / h[[k, i, j]] - 1.0 / h[[k + 1, i, j]]);
                        }
                        if k > 0 {
                            vertical -=
                                params.kv * (1.0 / h[[k - 1, i, j]] - 1.0 / h[[k, i, j]]);
                        }
                    }

                    let flux_e = u[[k, i + 1, j]] * 0.5 * (h[[k, i + 1, j]] + h[[k, i, j]]);
                    let flux_w = u[[k, i, j]] * 0.5 * (h[[k, i, j]] + h[[k, i - 1, j]]);
                    let flux_n = v[[k, i, j + 1]] * 0.5 * (h[[k, i, j + 1]] + h[[k, i, j]]);
                    let flux_s = v[[k, i, j]] * 0.5 * (h[[k, i, j]] + h[[k, i, j - 1]]);
                    let advection = -(flux_e - flux_w) / dx - (flux_n - flux_s) / dy;

                    let sponge = forcing.sponge_h_time_scale[[k, i, j]]
                        * (forcing.sponge_h[[k, i, j]] - h[[k, i, j]]);

                    col[k] = (lateral + vertical + advection + sponge) * wet[[i, j]];
                }
            });
    });
    wrap_3d(dhdt);
}

/// Zonal momentum tendency at U points.
pub fn evaluate_dudt(
    dudt: &mut Array3<f64>,
    h: &Array3<f64>,
    u: &Array3<f64>,
    v: &Array3<f64>,
    zeta: &Array3<f64>,
    bernoulli: &Array3<f64>,
    grid: &Grid,
    forcing: &Forcing,
    params: &KernelParams,
    wind_mag: f64,
    n_layer: bool,
    decomp: &Decomp,
) {
    let (layers, nx, ny) = (grid.layers, grid.nx, grid.ny);
    let (dx, dy) = (grid.dx, grid.dy);
    let dx2 = dx * dx;
    let dy2 = dy * dy;
    decomp.install(|| {
        let mut interior = dudt.slice_mut(s![.., 1..=nx, 1..=ny]);
        Zip::indexed(interior.lanes_mut(Axis(0)))
            .par_for_each(|(ii, jj), mut col| {
                let i = ii + 1;
                let j = jj + 1;
                for k in 0..layers {
                    let uc = u[[k, i, j]];
                    let lap_x = (u[[k, i + 1, j]] - 2.0 * uc + u[[k, i - 1, j]]) / dx2;
                    // a closed face swaps the missing neighbor for the slip image
                    let north = if grid.hfac_n[[i, j]] != 0.0 {
                        u[[k, i, j + 1]]
                    } else {
                        (1.0 - 2.0 * params.slip) * uc
                    };
                    let south = if grid.hfac_s[[i, j]] != 0.0 {
                        u[[k, i, j - 1]]
                    } else {
                        (1.0 - 2.0 * params.slip) * uc
                    };
                    let lap_y = (north - 2.0 * uc + south) / dy2;
                    let mut tendency = params.au * (lap_x + lap_y);

                    tendency += 0.25
                        * (grid.fu[[i, j]] + 0.5 * (zeta[[k, i, j]] + zeta[[k, i, j + 1]]))
                        * (v[[k, i - 1, j]]
                            + v[[k, i, j]]
                            + v[[k, i - 1, j + 1]]
                            + v[[k, i, j + 1]]);

                    tendency -= (bernoulli[[k, i, j]] - bernoulli[[k, i - 1, j]]) / dx;

                    tendency += forcing.sponge_u_time_scale[[k, i, j]]
                        * (forcing.sponge_u[[k, i, j]] - uc);

                    if k == 0 {
                        let h_pair = h[[0, i, j]] + h[[0, i - 1, j]];
                        let wx = forcing.wind_x[[i, j]] * wind_mag;
                        if params.relative_wind {
                            let rel_x = wx - uc;
                            let rel_y = 0.25
                                * ((forcing.wind_y[[i - 1, j]] * wind_mag - v[[0, i - 1, j]])
                                    + (forcing.wind_y[[i, j]] * wind_mag - v[[0, i, j]])
                                    + (forcing.wind_y[[i - 1, j + 1]] * wind_mag
                                        - v[[0, i - 1, j + 1]])
                                    + (forcing.wind_y[[i, j + 1]] * wind_mag
                                        - v[[0, i, j + 1]]));
                            let rel_speed = (rel_x * rel_x + rel_y * rel_y).sqrt();
                            tendency += 2.0 * params.cd * rel_x * rel_speed / h_pair;
                        } else {
                            tendency += 2.0 * wx / (params.rho0 * h_pair);
                        }
                    }

                    if layers > 1 {
                        if k == 0 {
                            tendency -= params.ar * (uc - u[[1, i, j]]);
                        } else if k == layers - 1 {
                            tendency -= params.ar * (uc - u[[k - 1, i, j]]);
                        } else {
                            tendency -=
                                params.ar * (2.0 * uc - u[[k - 1, i, j]] - u[[k + 1, i, j]]);
                        }
                    }

                    if n_layer && k == layers - 1 {
                        tendency -= params.bot_drag * uc;
                    }

                    col[k] = tendency;
                }
            });
    });
    wrap_3d(dudt);
}

/// Meridional momentum tendency at V points; the mirror of `evaluate_dudt`
/// across the axes.
pub fn evaluate_dvdt(
    dvdt: &mut Array3<f64>,
    h: &Array3<f64>,
    u: &Array3<f64>,
    v: &Array3<f64>,
    zeta: &Array3<f64>,
    bernoulli: &Array3<f64>,
    grid: &Grid,
    forcing: &Forcing,
    params: &KernelParams,
    wind_mag: f64,
    n_layer: bool,
    decomp: &Decomp,
) {
    let (layers, nx, ny) = (grid.layers, grid.nx, grid.ny);
    let (dx, dy) = (grid.dx, grid.dy);
    let dx2 = dx * dx;
    let dy2 = dy * dy;
    decomp.install(|| {
        let mut interior = dvdt.slice_mut(s![.., 1..=nx, 1..=ny]);
        Zip::indexed(interior.lanes_mut(Axis(0)))
            .par_for_each(|(ii, jj), mut col| {
                let i = ii + 1;
                let j = jj + 1;
                for k in 0..layers {
                    let vc = v[[k, i, j]];
                    let east = if grid.hfac_e[[i, j]] != 0.0 {
                        v[[k, i + 1, j]]
                    } else {
                        (1.0 - 2.0 * params.slip) * vc
                    };
                    let west = if grid.hfac_w[[i, j]] != 0.0 {
                        v[[k, i - 1, j]]
                    } else {
                        (1.0 - 2.0 * params.slip) * vc
                    };
                    let lap_x = (east - 2.0 * vc + west) / dx2;
                    let lap_y = (v[[k, i, j + 1]] - 2.0 * vc + v[[k, i, j - 1]]) / dy2;
                    let mut tendency = params.au * (lap_x + lap_y);

                    tendency -= 0.25
                        * (grid.fv[[i, j]] + 0.5 * (zeta[[k, i, j]] + zeta[[k, i + 1, j]]))
                        * (u[[k, i, j - 1]]
                            + u[[k, i, j]]
                            + u[[k, i + 1, j - 1]]
                            + u[[k, i + 1, j]]);

                    tendency -= (bernoulli[[k, i, j]] - bernoulli[[k, i, j - 1]]) / dy;

                    tendency += forcing.sponge_v_time_scale[[k, i, j]]
                        * (forcing.sponge_v[[k, i, j]] - vc);

                    if k == 0 {
                        let h_pair = h[[0, i, j]] + h[[0, i, j - 1]];
                        let wy = forcing.wind_y[[i, j]] * wind_mag;
                        if params.relative_wind {
                            let rel_y = wy - vc;
                            let rel_x = 0.25
                                * ((forcing.wind_x[[i, j - 1]] * wind_mag - u[[0, i, j - 1]])
                                    + (forcing.wind_x[[i, j]] * wind_mag - u[[0, i, j]])
                                    + (forcing.wind_x[[i + 1, j - 1]] * wind_mag
                                        - u[[0, i + 1, j - 1]])
                                    + (forcing.wind_x[[i + 1, j]] * wind_mag
                                        - u[[0, i + 1, j]]));
                            let rel_speed = (rel_x * rel_x + rel_y * rel_y).sqrt();
                            tendency += 2.0 * params.cd * rel_y * rel_speed / h_pair;
                        } else {
                            tendency += 2.0 * wy / (params.rho0 * h_pair);
                        }
                    }

                    if layers > 1 {
                        if k == 0 {
                            tendency -= params.ar * (vc - v[[1, i, j]]);
                        } else if k == layers - 1 {
                            tendency -= params.ar * (vc - v[[k - 1, i, j]]);
                        } else {
                            tendency -=
                                params.ar * (2.0 * vc - v[[k - 1, i, j]] - v[[k + 1, i, j]]);
                        }
                    }

                    if n_layer && k == layers - 1 {
                        tendency -= params.bot_drag * vc;
                    }

                    col[k] = tendency;
                }
            });
    });
    wrap_3d(dvdt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::wrap_3d;
    use crate::config::Config;
    use crate::state::Forcing;
    use ndarray::{Array2, Array3};

    fn setup(nx: usize, ny: usize, layers: usize) -> (Grid, Decomp, Forcing, KernelParams) {
        let mut config = Config::default();
        config.grid.nx = nx;
        config.grid.ny = ny;
        config.grid.layers = layers;
        config.grid.dx = 1e4;
        config.grid.dy = 1e4;
        config.model.h0 = 1000.0;
        config.numerics.dt = 100.0;
        config.numerics.n_time_steps = 1;
        let grid = Grid::new(&config).unwrap();
        let decomp = Decomp::new(&config).unwrap();
        let shape = (layers, nx + 2, ny + 2);
        let forcing = Forcing {
            wind_x: Array2::zeros((nx + 2, ny + 2)),
            wind_y: Array2::zeros((nx + 2, ny + 2)),
            wind_mag: vec![1.0],
            sponge_h_time_scale: Array3::zeros(shape),
            sponge_u_time_scale: Array3::zeros(shape),
            sponge_v_time_scale: Array3::zeros(shape),
            sponge_h: Array3::zeros(shape),
            sponge_u: Array3::zeros(shape),
            sponge_v: Array3::zeros(shape),
        };
        let params = KernelParams::new(&config).unwrap();
        (grid, decomp, forcing, params)
    }

    #[test]
    fn vorticity_of_a_sheared_flow() {
        let (grid, decomp, _, _) = setup(5, 5, 1);
        let shape = (1, 7, 7);
        // u grows linearly with latitude: zeta = -du/dy
        let mut u = Array3::zeros(shape);
        for i in 0..7 {
            for j in 1..=5 {
                u[[0, i, j]] = 0.1 * j as f64;
            }
        }
        wrap_3d(&mut u);
        let v = Array3::zeros(shape);
        let mut zeta = Array3::zeros(shape);
        evaluate_zeta(&mut zeta, &u, &v, &grid, &decomp);
        // away from the wrap seam the shear is uniform
        for i in 1..=5 {
            for j in 2..=5 {
                assert!((zeta[[0, i, j]] - (-0.1 / 1e4)).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn uniform_state_has_no_thickness_tendency() {
        let (grid, decomp, forcing, mut params) = setup(6, 6, 1);
        params.kh = vec![100.0];
        let shape = (1, 8, 8);
        let h = Array3::from_elem(shape, 400.0);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let mut dhdt = Array3::from_elem(shape, 1.0);
        evaluate_dhdt(&mut dhdt, &h, &u, &v, &grid, &forcing, &params, false, &decomp);
        for value in dhdt.iter() {
            assert_eq!(*value, 0.0);
        }
    }

    #[test]
    fn pressure_gradient_accelerates_downslope() {
        let (grid, decomp, forcing, params) = setup(6, 6, 1);
        let shape = (1, 8, 8);
        let h = Array3::from_elem(shape, 400.0);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let zeta = Array3::zeros(shape);
        // bernoulli increasing eastward by 2 m²/s² per cell
        let mut bernoulli = Array3::zeros(shape);
        for i in 0..8 {
            for j in 0..8 {
                bernoulli[[0, i, j]] = 2.0 * i as f64;
            }
        }
        let mut dudt = Array3::zeros(shape);
        evaluate_dudt(
            &mut dudt, &h, &u, &v, &zeta, &bernoulli, &grid, &forcing, &params, 1.0, false,
            &decomp,
        );
        for i in 2..=6 {
            for j in 1..=6 {
                assert!((dudt[[0, i, j]] - (-2.0 / 1e4)).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn n_layer_diffusion_closes_the_column() {
        let (grid, decomp, forcing, mut params) = setup(6, 6, 3);
        params.kh = vec![120.0, 80.0, 50.0];
        let shape = (3, 8, 8);
        let mut h = Array3::from_elem(shape, 300.0);
        // a bump in the top two layers makes every lateral term non-trivial
        h[[0, 3, 3]] = 340.0;
        h[[1, 3, 4]] = 280.0;
        wrap_3d(&mut h);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let mut dhdt = Array3::zeros(shape);
        evaluate_dhdt(&mut dhdt, &h, &u, &v, &grid, &forcing, &params, true, &decomp);
        for i in 1..=6 {
            for j in 1..=6 {
                let column: f64 = (0..3).map(|k| dhdt[[k, i, j]]).sum();
                assert!(column.abs() < 1e-12, "column sum {column} at ({i}, {j})");
            }
        }
    }

    #[test]
    fn wind_only_touches_the_top_layer() {
        let (grid, decomp, mut forcing, params) = setup(6, 6, 2);
        forcing.wind_x.fill(0.1);
        let shape = (2, 8, 8);
        let h = Array3::from_elem(shape, 400.0);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let zeta = Array3::zeros(shape);
        let bernoulli = Array3::zeros(shape);
        let mut dudt = Array3::zeros(shape);
        evaluate_dudt(
            &mut dudt, &h, &u, &v, &zeta, &bernoulli, &grid, &forcing, &params, 1.0, false,
            &decomp,
        );
        let expected = 2.0 * 0.1 / (1026.0 * 800.0);
        assert!((dudt[[0, 3, 3]] - expected).abs() < 1e-15);
        assert_eq!(dudt[[1, 3, 3]], 0.0);
    }
}
