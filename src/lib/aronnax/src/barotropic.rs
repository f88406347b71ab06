//! Barotropic correction (n-layer mode only).
//!
//! After the provisional AB3 update, the depth-integrated transport implies
//! a new free surface through the continuity equation. The elliptic solve
//! finds it, the surface-pressure gradient corrects the velocities, and the
//! layer thicknesses are rescaled so the column matches `depth + fsf·η`
//! again.

use tracing::warn;

use crate::boundary::{apply_boundary_u, apply_boundary_v, wrap_2d, wrap_3d};
use crate::error::ModelError;
use crate::solver::SolveStats;
use crate::Model;

impl Model {
    pub(crate) fn barotropic_correction(&mut self, step: u64) -> Result<SolveStats, ModelError> {
        let (nx, ny, layers) = (self.grid.nx, self.grid.ny, self.grid.layers);
        let (dx, dy) = (self.grid.dx, self.grid.dy);
        let dt = self.config.numerics.dt;
        let fsf = self.config.numerics.freesurf_fac;

        // Face-integrated barotropic transports from the provisional state;
        // the free-surface contribution rides in the top layer.
        for i in 1..=nx {
            for j in 1..=ny {
                let mut ub = 0.0;
                let mut vb = 0.0;
                for k in 0..layers {
                    let surface = if k == 0 { fsf } else { 0.0 };
                    let here = self.work.h[[k, i, j]] + surface * self.state.eta[[i, j]];
                    let west = self.work.h[[k, i - 1, j]] + surface * self.state.eta[[i - 1, j]];
                    let south = self.work.h[[k, i, j - 1]] + surface * self.state.eta[[i, j - 1]];
                    ub += self.work.u[[k, i, j]] * 0.5 * (here + west);
                    vb += self.work.v[[k, i, j]] * 0.5 * (here + south);
                }
                self.scratch.ub[[i, j]] = ub;
                self.scratch.vb[[i, j]] = vb;
            }
        }
        wrap_2d(&mut self.scratch.ub);
        wrap_2d(&mut self.scratch.vb);

        // Provisional surface from the transport divergence
        for i in 1..=nx {
            for j in 1..=ny {
                let divergence = (self.scratch.ub[[i + 1, j]] - self.scratch.ub[[i, j]]) / dx
                    + (self.scratch.vb[[i, j + 1]] - self.scratch.vb[[i, j]]) / dy;
                self.scratch.etastar[[i, j]] =
                    fsf * self.state.eta[[i, j]] - dt * divergence;
            }
        }
        wrap_2d(&mut self.scratch.etastar);

        let stats = match self.solver.as_mut() {
            Some(solver) => solver.solve(&mut self.work.eta, &self.scratch.etastar, dt, step)?,
            // reduced-gravity runs never get here; keep the invariant cheaply
            None => SolveStats {
                converged: true,
                iterations: 0,
                relative_residual: 0.0,
            },
        };

        for i in 1..=nx {
            for j in 1..=ny {
                self.work.eta[[i, j]] *= self.grid.wetmask[[i, j]];
            }
        }
        wrap_2d(&mut self.work.eta);

        // Surface-pressure correction of the velocities, all layers alike
        let g_surface = self.params.g[0];
        for k in 0..layers {
            for i in 1..=nx {
                for j in 1..=ny {
                    self.work.u[[k, i, j]] -= dt
                        * g_surface
                        * (self.work.eta[[i, j]] - self.work.eta[[i - 1, j]])
                        / dx;
                    self.work.v[[k, i, j]] -= dt
                        * g_surface
                        * (self.work.eta[[i, j]] - self.work.eta[[i, j - 1]])
                        / dy;
                }
            }
        }

        // Rescale every column so the thicknesses close on depth + fsf·η
        let mut worst = 0.0_f64;
        for i in 1..=nx {
            for j in 1..=ny {
                if self.grid.wetmask[[i, j]] == 0.0 {
                    continue;
                }
                let column: f64 = (0..layers).map(|k| self.work.h[[k, i, j]]).sum();
                if column <= 0.0 {
                    continue;
                }
                let ratio =
                    (fsf * self.work.eta[[i, j]] + self.grid.depth[[i, j]]) / column;
                worst = worst.max((ratio - 1.0).abs());
                for k in 0..layers {
                    self.work.h[[k, i, j]] *= ratio;
                }
            }
        }
        if worst > self.config.numerics.thickness_error {
            warn!(
                step,
                max_relative_mismatch = worst,
                "layer thicknesses drifted from the free surface; rescaled and continuing"
            );
        }
        wrap_3d(&mut self.work.h);

        apply_boundary_u(&mut self.work.u, &self.grid);
        apply_boundary_v(&mut self.work.v, &self.grid);

        Ok(stats)
    }
}
