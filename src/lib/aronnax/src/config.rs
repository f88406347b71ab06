use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ModelError;

/// Full run configuration, one struct per file section.
///
/// Key spellings follow the configuration-file format verbatim (`dumpFreq`,
/// `RedGrav`, `g_vec`, ...); fields are renamed where Rust naming differs.
/// Every key has a default so a section may be omitted entirely.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub numerics: Numerics,
    pub model: ModelSection,
    pub pressure_solver: PressureSolver,
    pub sponge: Sponge,
    pub physics: Physics,
    pub grid: GridSection,
    pub initial_conditions: InitialConditions,
    pub external_forcing: ExternalForcing,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Numerics {
    /// Horizontal momentum viscosity [m²/s]
    pub au: f64,
    /// Horizontal thickness diffusivity per layer [m²/s]; one entry broadcasts
    pub kh: Vec<f64>,
    /// Vertical thickness diffusivity [m²/s]
    pub kv: f64,
    /// Vertical momentum coupling between adjacent layers [1/s]
    pub ar: f64,
    /// Linear bottom drag on the deepest layer [1/s]
    #[serde(rename = "botDrag")]
    pub bot_drag: f64,
    /// Time step [s]
    pub dt: f64,
    /// Tangential boundary condition: 0 = free slip, 1 = no slip
    pub slip: f64,
    /// Restart step; 0 starts fresh, otherwise resume from that checkpoint
    pub niter0: u64,
    /// Total number of time steps (inclusive of the bootstrap steps)
    #[serde(rename = "nTimeSteps")]
    pub n_time_steps: u64,
    /// Snapshot output interval [s]; 0 disables
    #[serde(rename = "dumpFreq")]
    pub dump_freq: f64,
    /// Running-average output interval [s]; 0 disables
    #[serde(rename = "avFreq")]
    pub av_freq: f64,
    /// Checkpoint interval [s]; 0 disables
    #[serde(rename = "checkpointFreq")]
    pub checkpoint_freq: f64,
    /// Diagnostic CSV interval [s]; 0 disables
    #[serde(rename = "diagFreq")]
    pub diag_freq: f64,
    /// Minimum layer thickness [m]; thinner layers are clipped
    pub hmin: f64,
    /// Iteration cap for the free-surface solver
    pub maxits: usize,
    /// Relative residual tolerance for the free-surface solver
    pub eps: f64,
    /// Free-surface coefficient: 0 = rigid lid, 1 = full free surface
    #[serde(rename = "freesurfFac")]
    pub freesurf_fac: f64,
    /// Tolerated relative mismatch between column thickness and depth + η
    pub thickness_error: f64,
    /// 0 = production outputs, 1 = snapshot tendencies, 2 = per-step solver logs
    pub debug_level: u8,
}

impl Default for Numerics {
    fn default() -> Self {
        Numerics {
            au: 0.0,
            kh: Vec::new(),
            kv: 0.0,
            ar: 0.0,
            bot_drag: 0.0,
            dt: 0.0,
            slip: 0.0,
            niter0: 0,
            n_time_steps: 0,
            dump_freq: 0.0,
            av_freq: 0.0,
            checkpoint_freq: 0.0,
            diag_freq: 0.0,
            hmin: 0.0,
            maxits: 1000,
            eps: 1e-7,
            freesurf_fac: 0.0,
            thickness_error: 1e-2,
            debug_level: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelSection {
    /// Mean layer thickness per layer [m]; used when no initial h file is given
    pub hmean: Vec<f64>,
    /// Bathymetry file (H-shaped 2D); empty means flat bottom at H0
    #[serde(rename = "depthFile")]
    pub depth_file: Option<PathBuf>,
    /// Flat-bottom depth [m]
    #[serde(rename = "H0")]
    pub h0: f64,
    /// Reduced-gravity mode: deepest layer is passive and the free surface is unused
    #[serde(rename = "RedGrav")]
    pub red_grav: bool,
}

impl Default for ModelSection {
    fn default() -> Self {
        ModelSection {
            hmean: Vec::new(),
            depth_file: None,
            h0: 0.0,
            red_grav: false,
        }
    }
}

/// Free-surface solver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverMethod {
    /// In-process successive over-relaxation (Gauss–Seidel with Chebyshev ω)
    #[default]
    Sor,
    /// Preconditioned conjugate gradients on the assembled sparse matrix
    Cg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PressureSolver {
    #[serde(rename = "nProcX")]
    pub n_proc_x: usize,
    #[serde(rename = "nProcY")]
    pub n_proc_y: usize,
    pub method: SolverMethod,
}

impl Default for PressureSolver {
    fn default() -> Self {
        PressureSolver {
            n_proc_x: 1,
            n_proc_y: 1,
            method: SolverMethod::Sor,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sponge {
    /// Relaxation rate for h [1/s], H-shaped 3D
    #[serde(rename = "spongeHTimeScaleFile")]
    pub sponge_h_time_scale_file: Option<PathBuf>,
    /// Relaxation rate for u [1/s], U-shaped 3D
    #[serde(rename = "spongeUTimeScaleFile")]
    pub sponge_u_time_scale_file: Option<PathBuf>,
    /// Relaxation rate for v [1/s], V-shaped 3D
    #[serde(rename = "spongeVTimeScaleFile")]
    pub sponge_v_time_scale_file: Option<PathBuf>,
    /// Relaxation target for h [m], H-shaped 3D
    #[serde(rename = "spongeHfile")]
    pub sponge_h_file: Option<PathBuf>,
    /// Relaxation target for u [m/s], U-shaped 3D
    #[serde(rename = "spongeUfile")]
    pub sponge_u_file: Option<PathBuf>,
    /// Relaxation target for v [m/s], V-shaped 3D
    #[serde(rename = "spongeVfile")]
    pub sponge_v_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Physics {
    /// Reduced gravity at the top of each layer [m/s²]; one entry broadcasts
    pub g_vec: Vec<f64>,
    /// Reference density [kg/m³]
    pub rho0: f64,
}

impl Default for Physics {
    fn default() -> Self {
        Physics {
            g_vec: Vec::new(),
            rho0: 1026.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridSection {
    pub nx: usize,
    pub ny: usize,
    pub layers: usize,
    /// Zonal grid spacing [m]
    pub dx: f64,
    /// Meridional grid spacing [m]
    pub dy: f64,
    /// Coriolis parameter at U points, U-shaped 2D; empty uses f0 + beta·y
    #[serde(rename = "fUfile")]
    pub f_u_file: Option<PathBuf>,
    /// Coriolis parameter at V points, V-shaped 2D; empty uses f0 + beta·y
    #[serde(rename = "fVfile")]
    pub f_v_file: Option<PathBuf>,
    /// Wet mask (1 = wet, 0 = dry), H-shaped 2D; empty means fully wet
    #[serde(rename = "wetMaskFile")]
    pub wet_mask_file: Option<PathBuf>,
    /// Coriolis parameter at the southern boundary [1/s]
    pub f0: f64,
    /// Meridional Coriolis gradient [1/(m·s)]
    pub beta: f64,
}

impl Default for GridSection {
    fn default() -> Self {
        GridSection {
            nx: 0,
            ny: 0,
            layers: 1,
            dx: 1.0,
            dy: 1.0,
            f_u_file: None,
            f_v_file: None,
            wet_mask_file: None,
            f0: 0.0,
            beta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitialConditions {
    #[serde(rename = "initUfile")]
    pub init_u_file: Option<PathBuf>,
    #[serde(rename = "initVfile")]
    pub init_v_file: Option<PathBuf>,
    #[serde(rename = "initHfile")]
    pub init_h_file: Option<PathBuf>,
    #[serde(rename = "initEtaFile")]
    pub init_eta_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalForcing {
    /// Zonal wind stress [N/m²], U-shaped 2D
    #[serde(rename = "zonalWindFile")]
    pub zonal_wind_file: Option<PathBuf>,
    /// Meridional wind stress [N/m²], V-shaped 2D
    #[serde(rename = "meridionalWindFile")]
    pub meridional_wind_file: Option<PathBuf>,
    /// Quadratic drag on the wind relative to the surface flow
    #[serde(rename = "RelativeWind")]
    pub relative_wind: bool,
    /// Drag coefficient for RelativeWind [dimensionless]
    #[serde(rename = "Cd")]
    pub cd: f64,
    /// Include the (scaled) wind stress fields in snapshots
    #[serde(rename = "DumpWind")]
    pub dump_wind: bool,
    /// Per-step multiplier on both wind components, nTimeSteps doubles
    pub wind_mag_time_series_file: Option<PathBuf>,
}

impl Default for ExternalForcing {
    fn default() -> Self {
        ExternalForcing {
            zonal_wind_file: None,
            meridional_wind_file: None,
            relative_wind: false,
            cd: 0.0,
            dump_wind: false,
            wind_mag_time_series_file: None,
        }
    }
}

/// Treat a missing key and an empty filename the same way.
pub(crate) fn given(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

/// Resolve a per-layer parameter list: empty falls back to the default, a
/// single entry broadcasts, anything else must match the layer count.
pub(crate) fn per_layer(
    name: &str,
    values: &[f64],
    layers: usize,
    default: f64,
) -> Result<Vec<f64>, ModelError> {
    match values.len() {
        0 => Ok(vec![default; layers]),
        1 => Ok(vec![values[0]; layers]),
        n if n == layers => Ok(values.to_vec()),
        n => Err(ModelError::Config(format!(
            "{} must have 1 or {} entries, got {}",
            name, layers, n
        ))),
    }
}

impl Config {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Config, ModelError> {
        let text = fs::read_to_string(path).map_err(|e| {
            ModelError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| ModelError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check scalar parameters before any allocation or file loading.
    pub fn validate(&self) -> Result<(), ModelError> {
        let fail = |msg: String| Err(ModelError::Config(msg));

        if self.grid.nx == 0 || self.grid.ny == 0 {
            return fail(format!(
                "grid must be non-empty, got nx={} ny={}",
                self.grid.nx, self.grid.ny
            ));
        }
        if self.grid.layers == 0 {
            return fail("layers must be at least 1".to_string());
        }
        if !(self.grid.dx > 0.0) || !(self.grid.dy > 0.0) {
            return fail(format!(
                "grid spacing must be positive, got dx={} dy={}",
                self.grid.dx, self.grid.dy
            ));
        }
        if !(self.numerics.dt > 0.0) {
            return fail(format!("dt must be positive, got {}", self.numerics.dt));
        }
        if self.numerics.n_time_steps == 0 {
            return fail("nTimeSteps must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.numerics.slip) {
            return fail(format!(
                "slip must lie in [0, 1], got {}",
                self.numerics.slip
            ));
        }
        if !(self.numerics.eps > 0.0) || !self.numerics.eps.is_finite() {
            return fail(format!(
                "eps must be positive and finite, got {}",
                self.numerics.eps
            ));
        }
        if self.numerics.maxits == 0 {
            return fail("maxits must be at least 1".to_string());
        }
        if self.numerics.freesurf_fac < 0.0 {
            return fail(format!(
                "freesurfFac must be non-negative, got {}",
                self.numerics.freesurf_fac
            ));
        }
        if !(self.numerics.thickness_error > 0.0) {
            return fail(format!(
                "thickness_error must be positive, got {}",
                self.numerics.thickness_error
            ));
        }
        if self.numerics.hmin < 0.0 {
            return fail(format!("hmin must be non-negative, got {}", self.numerics.hmin));
        }
        if !(self.physics.rho0 > 0.0) {
            return fail(format!("rho0 must be positive, got {}", self.physics.rho0));
        }
        if self.external_forcing.cd < 0.0 {
            return fail(format!(
                "Cd must be non-negative, got {}",
                self.external_forcing.cd
            ));
        }
        if self.pressure_solver.n_proc_x == 0 || self.pressure_solver.n_proc_y == 0 {
            return fail(format!(
                "worker grid must be non-empty, got nProcX={} nProcY={}",
                self.pressure_solver.n_proc_x, self.pressure_solver.n_proc_y
            ));
        }
        if self.grid.nx % self.pressure_solver.n_proc_x != 0 {
            return fail(format!(
                "nx={} is not divisible by nProcX={}",
                self.grid.nx, self.pressure_solver.n_proc_x
            ));
        }
        if self.grid.ny % self.pressure_solver.n_proc_y != 0 {
            return fail(format!(
                "ny={} is not divisible by nProcY={}",
                self.grid.ny, self.pressure_solver.n_proc_y
            ));
        }
        if self.numerics.niter0 >= self.numerics.n_time_steps && self.numerics.niter0 > 0 {
            return fail(format!(
                "niter0={} leaves no steps to run (nTimeSteps={})",
                self.numerics.niter0, self.numerics.n_time_steps
            ));
        }
        // Per-layer lists are checked for length here so the failure points at
        // the configuration rather than at allocation.
        per_layer("kh", &self.numerics.kh, self.grid.layers, 0.0)?;
        per_layer("g_vec", &self.physics.g_vec, self.grid.layers, 9.8)?;
        if !self.model.hmean.is_empty() {
            per_layer("hmean", &self.model.hmean, self.grid.layers, 0.0)?;
        }
        Ok(())
    }

    /// Output cadence in whole steps; 0 disables.
    pub(crate) fn steps_between(&self, freq_seconds: f64) -> u64 {
        if freq_seconds <= 0.0 {
            0
        } else {
            (freq_seconds / self.numerics.dt).floor() as u64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        let mut config = Config::default();
        config.grid.nx = 8;
        config.grid.ny = 8;
        config.numerics.dt = 600.0;
        config.numerics.n_time_steps = 10;
        config
    }

    #[test]
    fn parses_native_key_spellings() {
        let text = r#"
            [numerics]
            dt = 600.0
            nTimeSteps = 101
            dumpFreq = 6000.0
            botDrag = 1e-6
            freesurfFac = 1.0

            [model]
            RedGrav = true
            H0 = 2000.0
            hmean = [400.0]

            [grid]
            nx = 10
            ny = 10
            layers = 1
            dx = 2e4
            dy = 2e4
            f0 = 1e-4

            [physics]
            g_vec = [0.01]

            [external_forcing]
            RelativeWind = true
            Cd = 0.0055
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.numerics.n_time_steps, 101);
        assert_eq!(config.numerics.bot_drag, 1e-6);
        assert!(config.model.red_grav);
        assert_eq!(config.model.h0, 2000.0);
        assert_eq!(config.grid.f0, 1e-4);
        assert!(config.external_forcing.relative_wind);
        assert_eq!(config.external_forcing.cd, 0.0055);
        config.validate().unwrap();
    }

    #[test]
    fn defaults_disable_outputs() {
        let config = minimal();
        assert_eq!(config.steps_between(config.numerics.dump_freq), 0);
        assert_eq!(config.numerics.niter0, 0);
        assert!(!config.external_forcing.relative_wind);
        assert_eq!(config.pressure_solver.method, SolverMethod::Sor);
        config.validate().unwrap();
    }

    #[test]
    fn cadence_floors_to_whole_steps() {
        let config = minimal();
        assert_eq!(config.steps_between(6000.0), 10);
        assert_eq!(config.steps_between(6599.0), 10);
    }

    #[test]
    fn rejects_bad_worker_grid() {
        let mut config = minimal();
        config.pressure_solver.n_proc_x = 3;
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn rejects_layer_count_mismatch() {
        let mut config = minimal();
        config.numerics.kh = vec![100.0, 200.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn broadcasts_single_entry() {
        let kh = per_layer("kh", &[150.0], 3, 0.0).unwrap();
        assert_eq!(kh, vec![150.0, 150.0, 150.0]);
        let kh = per_layer("kh", &[], 2, 0.0).unwrap();
        assert_eq!(kh, vec![0.0, 0.0]);
    }
}
