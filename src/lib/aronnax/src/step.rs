//! Time integration: the RK2 bootstrap and the AB3 main step.

use ndarray::{Array3, Zip};
use tracing::{debug, warn};

use crate::boundary::{apply_boundary_u, apply_boundary_v, wrap_3d};
use crate::decomp::Decomp;
use crate::error::ModelError;
use crate::grid::Grid;
use crate::kernels::{KernelParams, evaluate_dhdt, evaluate_dudt, evaluate_dvdt, evaluate_zeta};
use crate::physics::LayerPhysics;
use crate::state::{Forcing, Scratch};
use crate::Model;

/// One full tendency evaluation at the given state, written into the current
/// history slots.
#[allow(clippy::too_many_arguments)]
fn evaluate_tendencies(
    dhdt: &mut Array3<f64>,
    dudt: &mut Array3<f64>,
    dvdt: &mut Array3<f64>,
    scratch: &mut Scratch,
    h: &Array3<f64>,
    u: &Array3<f64>,
    v: &Array3<f64>,
    grid: &Grid,
    forcing: &Forcing,
    params: &KernelParams,
    physics: LayerPhysics,
    decomp: &Decomp,
    wind_mag: f64,
) {
    evaluate_zeta(&mut scratch.zeta, u, v, grid, decomp);
    physics.evaluate_bernoulli(&mut scratch.bernoulli, h, u, v, grid, &params.g, decomp);
    let n_layer = physics.n_layer();
    evaluate_dhdt(dhdt, h, u, v, grid, forcing, params, n_layer, decomp);
    evaluate_dudt(
        dudt,
        h,
        u,
        v,
        &scratch.zeta,
        &scratch.bernoulli,
        grid,
        forcing,
        params,
        wind_mag,
        n_layer,
        decomp,
    );
    evaluate_dvdt(
        dvdt,
        h,
        u,
        v,
        &scratch.zeta,
        &scratch.bernoulli,
        grid,
        forcing,
        params,
        wind_mag,
        n_layer,
        decomp,
    );
}

/// out = base + scale · tendency, elementwise.
fn forward(
    out: &mut Array3<f64>,
    base: &Array3<f64>,
    tendency: &Array3<f64>,
    scale: f64,
    decomp: &Decomp,
) {
    decomp.install(|| {
        Zip::from(&mut *out)
            .and(base)
            .and(tendency)
            .par_for_each(|o, &b, &t| *o = b + scale * t);
    });
}

/// Third-order Adams–Bashforth combination of the three tendency slots.
fn forward_ab3(
    out: &mut Array3<f64>,
    base: &Array3<f64>,
    current: &Array3<f64>,
    old: &Array3<f64>,
    veryold: &Array3<f64>,
    dt: f64,
    decomp: &Decomp,
) {
    decomp.install(|| {
        Zip::from(&mut *out)
            .and(base)
            .and(current)
            .and(old)
            .and(veryold)
            .par_for_each(|o, &b, &f0, &f1, &f2| {
                *o = b + dt * (23.0 * f0 - 16.0 * f1 + 5.0 * f2) / 12.0;
            });
    });
}

impl Model {
    /// Two half-Runge–Kutta steps that populate the very-old and old tendency
    /// slots before the AB3 loop takes over. The history receives the
    /// half-point re-evaluation, not the initial one. No barotropic
    /// correction, clipping, or output happens here.
    pub fn bootstrap(&mut self) {
        let dt = self.config.numerics.dt;
        for pass in 0..2u64 {
            let step = pass + 1;
            let wind_mag = self.forcing.wind_mag_at(step);

            evaluate_tendencies(
                &mut self.hist.dhdt,
                &mut self.hist.dudt,
                &mut self.hist.dvdt,
                &mut self.scratch,
                &self.state.h,
                &self.state.u,
                &self.state.v,
                &self.grid,
                &self.forcing,
                &self.params,
                self.physics,
                &self.decomp,
                wind_mag,
            );

            forward(&mut self.work.h, &self.state.h, &self.hist.dhdt, 0.5 * dt, &self.decomp);
            forward(&mut self.work.u, &self.state.u, &self.hist.dudt, 0.5 * dt, &self.decomp);
            forward(&mut self.work.v, &self.state.v, &self.hist.dvdt, 0.5 * dt, &self.decomp);
            apply_boundary_u(&mut self.work.u, &self.grid);
            apply_boundary_v(&mut self.work.v, &self.grid);
            wrap_3d(&mut self.work.h);

            evaluate_tendencies(
                &mut self.hist.dhdt,
                &mut self.hist.dudt,
                &mut self.hist.dvdt,
                &mut self.scratch,
                &self.work.h,
                &self.work.u,
                &self.work.v,
                &self.grid,
                &self.forcing,
                &self.params,
                self.physics,
                &self.decomp,
                wind_mag,
            );

            forward(&mut self.work.h, &self.state.h, &self.hist.dhdt, dt, &self.decomp);
            forward(&mut self.work.u, &self.state.u, &self.hist.dudt, dt, &self.decomp);
            forward(&mut self.work.v, &self.state.v, &self.hist.dvdt, dt, &self.decomp);
            apply_boundary_u(&mut self.work.u, &self.grid);
            apply_boundary_v(&mut self.work.v, &self.grid);
            wrap_3d(&mut self.work.h);

            self.hist.rotate();
            self.state.swap(&mut self.work);
        }
    }

    /// Advance one AB3 step. `step` is the absolute step index; the first
    /// main-loop step of a fresh run is 3.
    pub fn step(&mut self, step: u64) -> Result<(), ModelError> {
        let dt = self.config.numerics.dt;
        let hmin = self.config.numerics.hmin;
        let wind_mag = self.forcing.wind_mag_at(step);

        evaluate_tendencies(
            &mut self.hist.dhdt,
            &mut self.hist.dudt,
            &mut self.hist.dvdt,
            &mut self.scratch,
            &self.state.h,
            &self.state.u,
            &self.state.v,
            &self.grid,
            &self.forcing,
            &self.params,
            self.physics,
            &self.decomp,
            wind_mag,
        );

        forward_ab3(
            &mut self.work.h,
            &self.state.h,
            &self.hist.dhdt,
            &self.hist.dhdt_old,
            &self.hist.dhdt_veryold,
            dt,
            &self.decomp,
        );
        forward_ab3(
            &mut self.work.u,
            &self.state.u,
            &self.hist.dudt,
            &self.hist.dudt_old,
            &self.hist.dudt_veryold,
            dt,
            &self.decomp,
        );
        forward_ab3(
            &mut self.work.v,
            &self.state.v,
            &self.hist.dvdt,
            &self.hist.dvdt_old,
            &self.hist.dvdt_veryold,
            dt,
            &self.decomp,
        );

        apply_boundary_u(&mut self.work.u, &self.grid);
        apply_boundary_v(&mut self.work.v, &self.grid);
        wrap_3d(&mut self.work.h);

        let solver_stats = if self.physics.n_layer() {
            Some(self.barotropic_correction(step)?)
        } else {
            None
        };

        // Minimum-thickness clip; one warning per step at most
        let mut clipped = 0usize;
        for k in 0..self.grid.layers {
            for i in 1..=self.grid.nx {
                for j in 1..=self.grid.ny {
                    if self.work.h[[k, i, j]] < hmin {
                        self.work.h[[k, i, j]] = hmin;
                        clipped += 1;
                    }
                }
            }
        }
        if clipped > 0 {
            warn!(step, cells = clipped, "layer thickness clipped to hmin");
        }
        wrap_3d(&mut self.work.h);

        self.output.accumulate(&self.work);

        self.hist.rotate();
        self.state.swap(&mut self.work);

        if self.config.numerics.debug_level >= 2 {
            if let Some(stats) = &solver_stats {
                debug!(
                    step,
                    iterations = stats.iterations,
                    relative_residual = stats.relative_residual,
                    "free-surface solve"
                );
            }
        }

        self.output.finish_step(
            step,
            &self.state,
            &self.hist,
            &self.forcing,
            &self.grid,
            &self.decomp,
            wind_mag,
        )?;

        Ok(())
    }
}
