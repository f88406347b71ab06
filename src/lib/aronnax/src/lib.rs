// File: `src/lib/aronnax/src/lib.rs`
//
// UNIT SYSTEM: SI (CONSISTENT THROUGHOUT)
// =======================================
// Length: meter (m)
// Time: second (s)
// Velocity: m/s
// Layer thickness, depth, free surface: m
// Wind stress: N/m² (enters the momentum equations divided by ρ₀·h)
// Reduced gravity: m/s²
// Coriolis parameter: 1/s
//
// All gridded fields live on an Arakawa C-grid of nx × ny interior cells
// with a one-cell halo on every side (index range 0..nx+1, 0..ny+1):
// thickness and free surface at cell centers, u on west faces, v on south
// faces, vorticity on southwest corners. Arrays are layer-major [k, i, j].

pub mod barotropic;
pub mod boundary;
pub mod config;
pub mod decomp;
pub mod error;
pub mod grid;
pub mod io;
pub mod kernels;
pub mod output;
pub mod physics;
pub mod solver;
pub mod state;
pub mod step;

use std::path::Path;

use tracing::info;

use crate::boundary::{apply_boundary_u, apply_boundary_v, wrap_2d, wrap_3d};
use crate::config::{SolverMethod, given, per_layer};
use crate::decomp::Decomp;
use crate::io::Stagger;
use crate::kernels::KernelParams;
use crate::output::OutputScheduler;
use crate::physics::LayerPhysics;
use crate::solver::{CgSolver, FreeSurfaceSolver, SorSolver, assemble_stencil};
use crate::state::{Forcing, Scratch, State, TendencyHistory};

pub use crate::config::Config;
pub use crate::error::ModelError;
pub use crate::grid::Grid;

/// The assembled model: geometry, state, forcing, history, solver, and the
/// output scheduler, allocated once and stepped in place.
pub struct Model {
    pub(crate) config: Config,
    pub(crate) grid: Grid,
    pub(crate) decomp: Decomp,
    pub(crate) physics: LayerPhysics,
    pub(crate) params: KernelParams,
    pub(crate) state: State,
    pub(crate) work: State,
    pub(crate) hist: TendencyHistory,
    pub(crate) scratch: Scratch,
    pub(crate) forcing: Forcing,
    pub(crate) solver: Option<FreeSurfaceSolver>,
    pub(crate) output: OutputScheduler,
}

impl Model {
    /// Build a model from a validated configuration. Gridded inputs are read
    /// here; `base_dir` anchors the `output/` and `checkpoints/` directories.
    pub fn new(config: Config, base_dir: &Path) -> Result<Model, ModelError> {
        config.validate()?;
        let grid = Grid::new(&config)?;
        let decomp = Decomp::new(&config)?;
        let params = KernelParams::new(&config)?;
        let physics = if config.model.red_grav {
            LayerPhysics::ReducedGravity
        } else {
            LayerPhysics::NLayer
        };
        let (nx, ny, layers) = (grid.nx, grid.ny, grid.layers);

        let forcing = load_forcing(&config, &grid)?;

        let mut state = State::zeros(&grid);
        match given(&config.initial_conditions.init_h_file) {
            Some(path) => state.h = io::read_3d(path, nx, ny, layers, Stagger::H)?,
            None => {
                if config.model.hmean.is_empty() {
                    return Err(ModelError::Config(
                        "either initHfile or hmean must be given".to_string(),
                    ));
                }
                let hmean = per_layer("hmean", &config.model.hmean, layers, 0.0)?;
                for (k, &thickness) in hmean.iter().enumerate() {
                    if !(thickness > 0.0) {
                        return Err(ModelError::Config(format!(
                            "hmean must be positive, got {} for layer {}",
                            thickness,
                            k + 1
                        )));
                    }
                    state.h.slice_mut(ndarray::s![k, .., ..]).fill(thickness);
                }
            }
        }
        wrap_3d(&mut state.h);
        if let Some(path) = given(&config.initial_conditions.init_u_file) {
            state.u = io::read_3d(path, nx, ny, layers, Stagger::U)?;
        }
        if let Some(path) = given(&config.initial_conditions.init_v_file) {
            state.v = io::read_3d(path, nx, ny, layers, Stagger::V)?;
        }
        if let Some(path) = given(&config.initial_conditions.init_eta_file) {
            state.eta = io::read_2d(path, nx, ny, Stagger::H)?;
        }
        apply_boundary_u(&mut state.u, &grid);
        apply_boundary_v(&mut state.v, &grid);
        wrap_2d(&mut state.eta);

        let solver = if physics.n_layer() {
            let stencil = assemble_stencil(
                &grid,
                params.g[0],
                config.numerics.freesurf_fac,
                config.numerics.dt,
            );
            Some(match config.pressure_solver.method {
                SolverMethod::Sor => FreeSurfaceSolver::Sor(SorSolver::new(
                    &grid,
                    stencil,
                    config.numerics.eps,
                    config.numerics.maxits,
                )),
                SolverMethod::Cg => FreeSurfaceSolver::Cg(CgSolver::new(
                    &grid,
                    stencil,
                    config.numerics.eps,
                    config.numerics.maxits,
                )),
            })
        } else {
            None
        };

        let mut hist = TendencyHistory::zeros(&grid);
        if config.numerics.niter0 > 0 {
            let (restored_state, restored_hist) = output::load_checkpoint(
                base_dir,
                config.numerics.niter0,
                &grid,
                physics.n_layer(),
            )?;
            state = restored_state;
            hist = restored_hist;
        }

        let output = OutputScheduler::new(&config, &grid, base_dir)?;
        let work = State::zeros(&grid);
        let scratch = Scratch::zeros(&grid);

        info!(
            nx,
            ny,
            layers,
            workers = decomp.workers(),
            reduced_gravity = !physics.n_layer(),
            "model assembled"
        );

        Ok(Model {
            config,
            grid,
            decomp,
            physics,
            params,
            state,
            work,
            hist,
            scratch,
            forcing,
            solver,
            output,
        })
    }

    /// Run to completion: bootstrap (fresh starts only), then the AB3 loop.
    pub fn run(&mut self) -> Result<(), ModelError> {
        let total = self.config.numerics.n_time_steps;
        let niter0 = self.config.numerics.niter0;
        let first = if niter0 == 0 {
            info!(steps = total, "bootstrapping tendency history with two RK2 half-steps");
            self.bootstrap();
            3
        } else {
            info!(restart_step = niter0, "resuming from checkpoint");
            niter0 + 1
        };
        for n in first..=total {
            self.step(n)?;
        }
        info!(steps = total, "run complete");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

fn load_forcing(config: &Config, grid: &Grid) -> Result<Forcing, ModelError> {
    let (nx, ny, layers) = (grid.nx, grid.ny, grid.layers);
    let shape3 = (layers, nx + 2, ny + 2);
    let shape2 = (nx + 2, ny + 2);
    let steps = config.numerics.n_time_steps as usize;

    let wind_x = match given(&config.external_forcing.zonal_wind_file) {
        Some(path) => io::read_2d(path, nx, ny, Stagger::U)?,
        None => ndarray::Array2::zeros(shape2),
    };
    let wind_y = match given(&config.external_forcing.meridional_wind_file) {
        Some(path) => io::read_2d(path, nx, ny, Stagger::V)?,
        None => ndarray::Array2::zeros(shape2),
    };
    let wind_mag = match given(&config.external_forcing.wind_mag_time_series_file) {
        Some(path) => io::read_series(path, steps)?,
        None => vec![1.0; steps],
    };

    let read_sponge = |path: &Option<std::path::PathBuf>, stagger: Stagger| {
        match given(path) {
            Some(p) => io::read_3d(p, nx, ny, layers, stagger),
            None => Ok(ndarray::Array3::zeros(shape3)),
        }
    };

    Ok(Forcing {
        wind_x,
        wind_y,
        wind_mag,
        sponge_h_time_scale: read_sponge(&config.sponge.sponge_h_time_scale_file, Stagger::H)?,
        sponge_u_time_scale: read_sponge(&config.sponge.sponge_u_time_scale_file, Stagger::U)?,
        sponge_v_time_scale: read_sponge(&config.sponge.sponge_v_time_scale_file, Stagger::V)?,
        sponge_h: read_sponge(&config.sponge.sponge_h_file, Stagger::H)?,
        sponge_u: read_sponge(&config.sponge.sponge_u_file, Stagger::U)?,
        sponge_v: read_sponge(&config.sponge.sponge_v_file, Stagger::V)?,
    })
}
