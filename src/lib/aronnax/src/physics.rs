//! Layer-physics variants.
//!
//! The run is either reduced-gravity (deepest layer passive, no free
//! surface) or n-layer isopycnal (full column active, free surface carried
//! by the barotropic correction). The two differ in how the Bernoulli
//! potential stacks up and in whether the thickness diffusion must close the
//! column; everything else is shared.

use ndarray::{Array3, Axis, Zip, s};

use crate::boundary::wrap_3d;
use crate::decomp::Decomp;
use crate::grid::Grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerPhysics {
    ReducedGravity,
    NLayer,
}

impl LayerPhysics {
    pub fn n_layer(self) -> bool {
        self == LayerPhysics::NLayer
    }

    /// Bernoulli potential at H points: Montgomery potential plus kinetic
    /// energy density averaged from the surrounding faces.
    pub fn evaluate_bernoulli(
        self,
        bernoulli: &mut Array3<f64>,
        h: &Array3<f64>,
        u: &Array3<f64>,
        v: &Array3<f64>,
        grid: &Grid,
        g: &[f64],
        decomp: &Decomp,
    ) {
        let (layers, nx, ny) = (grid.layers, grid.nx, grid.ny);
        let depth = &grid.depth;
        decomp.install(|| {
            let mut interior = bernoulli.slice_mut(s![.., 1..=nx, 1..=ny]);
            Zip::indexed(interior.lanes_mut(Axis(0)))
                .par_for_each(|(ii, jj), mut col| {
                    let i = ii + 1;
                    let j = jj + 1;
                    let kinetic = |k: usize| {
                        (u[[k, i, j]] * u[[k, i, j]]
                            + u[[k, i + 1, j]] * u[[k, i + 1, j]]
                            + v[[k, i, j]] * v[[k, i, j]]
                            + v[[k, i, j + 1]] * v[[k, i, j + 1]])
                            / 4.0
                    };
                    let total: f64 = (0..layers).map(|k| h[[k, i, j]]).sum();
                    match self {
                        LayerPhysics::ReducedGravity => {
                            // b_k = sum over deeper interfaces of g_l times the
                            // cumulative thickness above them
                            let mut tail = 0.0;
                            let mut cumulative = total;
                            for k in (0..layers).rev() {
                                tail += g[k] * cumulative;
                                col[k] = tail + kinetic(k);
                                cumulative -= h[[k, i, j]];
                            }
                        }
                        LayerPhysics::NLayer => {
                            // interface heights from the bathymetry up, then the
                            // Montgomery potential layer by layer
                            let mut interface = -depth[[i, j]] + total;
                            let mut montgomery = 0.0;
                            col[0] = kinetic(0);
                            for k in 1..layers {
                                interface -= h[[k - 1, i, j]];
                                montgomery += g[k] * interface;
                                col[k] = montgomery + kinetic(k);
                            }
                        }
                    }
                });
        });
        wrap_3d(bernoulli);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ndarray::Array3;

    fn setup(layers: usize, h0: f64) -> (Grid, Decomp) {
        let mut config = Config::default();
        config.grid.nx = 4;
        config.grid.ny = 4;
        config.grid.layers = layers;
        config.grid.dx = 1e4;
        config.grid.dy = 1e4;
        config.model.h0 = h0;
        let grid = Grid::new(&config).unwrap();
        let decomp = Decomp::new(&config).unwrap();
        (grid, decomp)
    }

    #[test]
    fn reduced_gravity_single_layer_at_rest() {
        let (grid, decomp) = setup(1, 2000.0);
        let shape = (1, 6, 6);
        let h = Array3::from_elem(shape, 400.0);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let mut b = Array3::zeros(shape);
        LayerPhysics::ReducedGravity.evaluate_bernoulli(&mut b, &h, &u, &v, &grid, &[0.01], &decomp);
        for i in 1..=4 {
            for j in 1..=4 {
                assert!((b[[0, i, j]] - 0.01 * 400.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn two_layer_montgomery_stack() {
        let (grid, decomp) = setup(2, 500.0);
        let shape = (2, 6, 6);
        let mut h = Array3::zeros(shape);
        h.slice_mut(s![0, .., ..]).fill(300.0);
        h.slice_mut(s![1, .., ..]).fill(200.0);
        let u = Array3::zeros(shape);
        let v = Array3::zeros(shape);
        let mut b = Array3::zeros(shape);
        let g = [9.8, 0.02];
        LayerPhysics::NLayer.evaluate_bernoulli(&mut b, &h, &u, &v, &grid, &g, &decomp);
        // flat column: the interface under the 300 m top layer sits at
        // -300 m, so b1 = 0 and b2 = g2 * (-300)
        for i in 1..=4 {
            for j in 1..=4 {
                assert!((b[[0, i, j]] - 0.0).abs() < 1e-12);
                assert!((b[[1, i, j]] - 0.02 * (-300.0)).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn kinetic_energy_reaches_every_layer() {
        let (grid, decomp) = setup(2, 500.0);
        let shape = (2, 6, 6);
        let mut h = Array3::zeros(shape);
        h.slice_mut(s![0, .., ..]).fill(300.0);
        h.slice_mut(s![1, .., ..]).fill(200.0);
        let u = Array3::from_elem(shape, 0.5);
        let v = Array3::zeros(shape);
        let mut b_rest = Array3::zeros(shape);
        let mut b_moving = Array3::zeros(shape);
        let g = [9.8, 0.02];
        LayerPhysics::NLayer.evaluate_bernoulli(
            &mut b_rest,
            &h,
            &Array3::zeros(shape),
            &v,
            &grid,
            &g,
            &decomp,
        );
        LayerPhysics::NLayer.evaluate_bernoulli(&mut b_moving, &h, &u, &v, &grid, &g, &decomp);
        // two u faces contribute 0.25 m²/s² each at every point
        for k in 0..2 {
            assert!((b_moving[[k, 2, 2]] - b_rest[[k, 2, 2]] - 0.125).abs() < 1e-12);
        }
    }
}
