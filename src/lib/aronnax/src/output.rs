//! Output scheduling: snapshots, running averages, checkpoints, diagnostics.
//!
//! Four independent cadences, each expressed in whole steps (`⌊freq/dt⌋`);
//! a cadence of zero disables that artifact. An emission fires on step `n`
//! when `(n−1) mod w == 0`. Snapshot files are `output/snap.<field>.<step>`,
//! averages `output/av.<field>.<step>`, checkpoints `checkpoints/<field>.<step>`
//! (written via rename so a crash never corrupts a restart point), and the
//! diagnostics are one CSV per field with a `meanNN,maxNN,minNN,stdNN` block
//! per layer.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3};
use tracing::info;

use crate::config::Config;
use crate::decomp::Decomp;
use crate::error::ModelError;
use crate::grid::Grid;
use crate::io::{self, Stagger};
use crate::state::{Forcing, State, TendencyHistory};

pub struct OutputScheduler {
    snapshot_every: u64,
    average_every: u64,
    checkpoint_every: u64,
    diag_every: u64,
    output_dir: PathBuf,
    checkpoint_dir: PathBuf,
    dump_wind: bool,
    debug_level: u8,
    n_layer_mode: bool,
    nx: usize,
    ny: usize,
    // running-average accumulators, zeroed after each emission
    h_sum: Array3<f64>,
    u_sum: Array3<f64>,
    v_sum: Array3<f64>,
    eta_sum: Array2<f64>,
    // reusable buffer for scaled or averaged fields on their way to disk
    staging_3d: Array3<f64>,
    staging_2d: Array2<f64>,
}

fn due(every: u64, step: u64) -> bool {
    every > 0 && (step - 1) % every == 0
}

impl OutputScheduler {
    pub fn new(config: &Config, grid: &Grid, base_dir: &Path) -> Result<OutputScheduler, ModelError> {
        let output_dir = base_dir.join("output");
        let checkpoint_dir = base_dir.join("checkpoints");
        fs::create_dir_all(&output_dir)?;
        fs::create_dir_all(&checkpoint_dir)?;

        let shape3 = (grid.layers, grid.nx + 2, grid.ny + 2);
        let shape2 = (grid.nx + 2, grid.ny + 2);
        let scheduler = OutputScheduler {
            snapshot_every: config.steps_between(config.numerics.dump_freq),
            average_every: config.steps_between(config.numerics.av_freq),
            checkpoint_every: config.steps_between(config.numerics.checkpoint_freq),
            diag_every: config.steps_between(config.numerics.diag_freq),
            output_dir,
            checkpoint_dir,
            dump_wind: config.external_forcing.dump_wind,
            debug_level: config.numerics.debug_level,
            n_layer_mode: !config.model.red_grav,
            nx: grid.nx,
            ny: grid.ny,
            h_sum: Array3::zeros(shape3),
            u_sum: Array3::zeros(shape3),
            v_sum: Array3::zeros(shape3),
            eta_sum: Array2::zeros(shape2),
            staging_3d: Array3::zeros(shape3),
            staging_2d: Array2::zeros(shape2),
        };
        // restarts keep appending to the existing diagnostic files
        if scheduler.diag_every > 0 && config.numerics.niter0 == 0 {
            scheduler.write_diag_header("h", grid.layers)?;
            scheduler.write_diag_header("u", grid.layers)?;
            scheduler.write_diag_header("v", grid.layers)?;
            if scheduler.n_layer_mode {
                scheduler.write_diag_header("eta", 1)?;
            }
        }
        Ok(scheduler)
    }

    fn stamped(&self, dir: &Path, kind: &str, field: &str, step: u64) -> PathBuf {
        dir.join(format!("{}.{}.{:010}", kind, field, step))
    }

    fn diag_path(&self, field: &str) -> PathBuf {
        self.output_dir.join(format!("diag.{}.csv", field))
    }

    fn write_diag_header(&self, field: &str, layers: usize) -> Result<(), ModelError> {
        let mut header = String::from("timestep");
        for k in 1..=layers {
            header.push_str(&format!(",mean{k:02},max{k:02},min{k:02},std{k:02}"));
        }
        header.push('\n');
        fs::write(self.diag_path(field), header)?;
        Ok(())
    }

    /// Add the post-step state into the running averages.
    pub fn accumulate(&mut self, state: &State) {
        if self.average_every == 0 {
            return;
        }
        self.h_sum += &state.h;
        self.u_sum += &state.u;
        self.v_sum += &state.v;
        self.eta_sum += &state.eta;
    }

    /// Emit whatever is due at the end of step `step`.
    pub fn finish_step(
        &mut self,
        step: u64,
        state: &State,
        hist: &TendencyHistory,
        forcing: &Forcing,
        grid: &Grid,
        decomp: &Decomp,
        wind_mag: f64,
    ) -> Result<(), ModelError> {
        if due(self.snapshot_every, step) {
            self.write_snapshots(step, state, hist, forcing, wind_mag)?;
            // the NaN guard rides on the snapshot cadence
            if decomp.any_nan(&state.h) {
                return Err(ModelError::NanThickness { step });
            }
        }
        if due(self.average_every, step) {
            self.write_averages(step)?;
        }
        if due(self.checkpoint_every, step) {
            self.write_checkpoint(step, state, hist)?;
        }
        if due(self.diag_every, step) {
            self.write_diagnostics(step, state, grid, decomp)?;
        }
        Ok(())
    }

    fn write_snapshots(
        &mut self,
        step: u64,
        state: &State,
        hist: &TendencyHistory,
        forcing: &Forcing,
        wind_mag: f64,
    ) -> Result<(), ModelError> {
        let dir = self.output_dir.clone();
        let (nx, ny) = (self.nx, self.ny);
        io::write_3d(&self.stamped(&dir, "snap", "h", step), &state.h, nx, ny, Stagger::H)?;
        io::write_3d(&self.stamped(&dir, "snap", "u", step), &state.u, nx, ny, Stagger::U)?;
        io::write_3d(&self.stamped(&dir, "snap", "v", step), &state.v, nx, ny, Stagger::V)?;
        if self.n_layer_mode {
            io::write_2d(&self.stamped(&dir, "snap", "eta", step), &state.eta, nx, ny, Stagger::H)?;
        }
        if self.dump_wind {
            self.staging_2d.assign(&forcing.wind_x);
            self.staging_2d *= wind_mag;
            io::write_2d(&self.stamped(&dir, "snap", "wind_x", step), &self.staging_2d, nx, ny, Stagger::U)?;
            self.staging_2d.assign(&forcing.wind_y);
            self.staging_2d *= wind_mag;
            io::write_2d(&self.stamped(&dir, "snap", "wind_y", step), &self.staging_2d, nx, ny, Stagger::V)?;
        }
        if self.debug_level >= 1 {
            // post-rotation, the "old" slots hold the tendencies that
            // advanced this step
            io::write_3d(&self.stamped(&dir, "snap", "dhdt", step), &hist.dhdt_old, nx, ny, Stagger::H)?;
            io::write_3d(&self.stamped(&dir, "snap", "dudt", step), &hist.dudt_old, nx, ny, Stagger::U)?;
            io::write_3d(&self.stamped(&dir, "snap", "dvdt", step), &hist.dvdt_old, nx, ny, Stagger::V)?;
        }
        Ok(())
    }

    fn write_averages(&mut self, step: u64) -> Result<(), ModelError> {
        // the very first step of a run has nothing meaningful accumulated
        if step > 1 {
            let dir = self.output_dir.clone();
            let (nx, ny) = (self.nx, self.ny);
            let window = self.average_every as f64;

            self.staging_3d.assign(&self.h_sum);
            self.staging_3d /= window;
            io::write_3d(&self.stamped(&dir, "av", "h", step), &self.staging_3d, nx, ny, Stagger::H)?;
            self.staging_3d.assign(&self.u_sum);
            self.staging_3d /= window;
            io::write_3d(&self.stamped(&dir, "av", "u", step), &self.staging_3d, nx, ny, Stagger::U)?;
            self.staging_3d.assign(&self.v_sum);
            self.staging_3d /= window;
            io::write_3d(&self.stamped(&dir, "av", "v", step), &self.staging_3d, nx, ny, Stagger::V)?;
            if self.n_layer_mode {
                self.staging_2d.assign(&self.eta_sum);
                self.staging_2d /= window;
                io::write_2d(&self.stamped(&dir, "av", "eta", step), &self.staging_2d, nx, ny, Stagger::H)?;
            }
        }
        self.h_sum.fill(0.0);
        self.u_sum.fill(0.0);
        self.v_sum.fill(0.0);
        self.eta_sum.fill(0.0);
        Ok(())
    }

    fn write_checkpoint(
        &self,
        step: u64,
        state: &State,
        hist: &TendencyHistory,
    ) -> Result<(), ModelError> {
        let dir = &self.checkpoint_dir;
        let (nx, ny) = (self.nx, self.ny);
        let name = |field: &str| dir.join(format!("{}.state.{:010}", field, step));
        io::write_3d_atomic(&name("h"), &state.h, nx, ny, Stagger::H)?;
        io::write_3d_atomic(&name("u"), &state.u, nx, ny, Stagger::U)?;
        io::write_3d_atomic(&name("v"), &state.v, nx, ny, Stagger::V)?;
        if self.n_layer_mode {
            io::write_2d_atomic(&name("eta"), &state.eta, nx, ny, Stagger::H)?;
        }
        let triples: [(&str, &Array3<f64>, Stagger); 9] = [
            ("dhdt", &hist.dhdt, Stagger::H),
            ("dhdt_old", &hist.dhdt_old, Stagger::H),
            ("dhdt_veryold", &hist.dhdt_veryold, Stagger::H),
            ("dudt", &hist.dudt, Stagger::U),
            ("dudt_old", &hist.dudt_old, Stagger::U),
            ("dudt_veryold", &hist.dudt_veryold, Stagger::U),
            ("dvdt", &hist.dvdt, Stagger::V),
            ("dvdt_old", &hist.dvdt_old, Stagger::V),
            ("dvdt_veryold", &hist.dvdt_veryold, Stagger::V),
        ];
        for (label, field, stagger) in triples {
            io::write_3d_atomic(&name(label), field, nx, ny, stagger)?;
        }
        info!(step, "checkpoint written");
        Ok(())
    }

    fn write_diagnostics(
        &self,
        step: u64,
        state: &State,
        grid: &Grid,
        decomp: &Decomp,
    ) -> Result<(), ModelError> {
        self.append_diag_row(step, "h", &state.h, grid.layers, decomp)?;
        self.append_diag_row(step, "u", &state.u, grid.layers, decomp)?;
        self.append_diag_row(step, "v", &state.v, grid.layers, decomp)?;
        if self.n_layer_mode {
            // borrow eta as a single-layer view for the same reduction
            let eta_view = state
                .eta
                .view()
                .insert_axis(ndarray::Axis(0))
                .to_owned();
            self.append_diag_row(step, "eta", &eta_view, 1, decomp)?;
        }
        Ok(())
    }

    fn append_diag_row(
        &self,
        step: u64,
        field: &str,
        values: &Array3<f64>,
        layers: usize,
        decomp: &Decomp,
    ) -> Result<(), ModelError> {
        let mut row = format!("{step}");
        for k in 0..layers {
            let stats = decomp.layer_stats(values, k);
            row.push_str(&format!(
                ",{:.6e},{:.6e},{:.6e},{:.6e}",
                stats.mean, stats.max, stats.min, stats.std
            ));
        }
        row.push('\n');
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.diag_path(field))?;
        file.write_all(row.as_bytes())?;
        Ok(())
    }
}

/// Reload state and tendency history from the checkpoint written at `step`.
pub(crate) fn load_checkpoint(
    base_dir: &Path,
    step: u64,
    grid: &Grid,
    n_layer_mode: bool,
) -> Result<(State, TendencyHistory), ModelError> {
    let dir = base_dir.join("checkpoints");
    let (nx, ny, layers) = (grid.nx, grid.ny, grid.layers);
    let name = |field: &str| dir.join(format!("{}.state.{:010}", field, step));

    let mut state = State::zeros(grid);
    state.h = io::read_3d(&name("h"), nx, ny, layers, Stagger::H)?;
    state.u = io::read_3d(&name("u"), nx, ny, layers, Stagger::U)?;
    state.v = io::read_3d(&name("v"), nx, ny, layers, Stagger::V)?;
    if n_layer_mode {
        state.eta = io::read_2d(&name("eta"), nx, ny, Stagger::H)?;
    }

    let mut hist = TendencyHistory::zeros(grid);
    hist.dhdt = io::read_3d(&name("dhdt"), nx, ny, layers, Stagger::H)?;
    hist.dhdt_old = io::read_3d(&name("dhdt_old"), nx, ny, layers, Stagger::H)?;
    hist.dhdt_veryold = io::read_3d(&name("dhdt_veryold"), nx, ny, layers, Stagger::H)?;
    hist.dudt = io::read_3d(&name("dudt"), nx, ny, layers, Stagger::U)?;
    hist.dudt_old = io::read_3d(&name("dudt_old"), nx, ny, layers, Stagger::U)?;
    hist.dudt_veryold = io::read_3d(&name("dudt_veryold"), nx, ny, layers, Stagger::U)?;
    hist.dvdt = io::read_3d(&name("dvdt"), nx, ny, layers, Stagger::V)?;
    hist.dvdt_old = io::read_3d(&name("dvdt_old"), nx, ny, layers, Stagger::V)?;
    hist.dvdt_veryold = io::read_3d(&name("dvdt_veryold"), nx, ny, layers, Stagger::V)?;

    Ok((state, hist))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_fires_on_the_offset_pattern() {
        assert!(!due(0, 1));
        assert!(due(10, 1));
        assert!(due(10, 11));
        assert!(!due(10, 10));
        assert!(due(1, 7));
    }
}
