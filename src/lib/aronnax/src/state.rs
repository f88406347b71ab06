use std::mem;

use ndarray::{Array2, Array3};

use crate::grid::Grid;

/// Prognostic fields. `h` is the layer thickness [m] at H points, `u`/`v`
/// the velocities [m/s] at U/V points, `eta` the free-surface anomaly [m]
/// (identically zero in reduced-gravity mode).
pub struct State {
    pub h: Array3<f64>,
    pub u: Array3<f64>,
    pub v: Array3<f64>,
    pub eta: Array2<f64>,
}

impl State {
    pub fn zeros(grid: &Grid) -> State {
        let shape3 = (grid.layers, grid.nx + 2, grid.ny + 2);
        State {
            h: Array3::zeros(shape3),
            u: Array3::zeros(shape3),
            v: Array3::zeros(shape3),
            eta: Array2::zeros((grid.nx + 2, grid.ny + 2)),
        }
    }

    /// Exchange contents with another state; buffers only, no copies.
    pub fn swap(&mut self, other: &mut State) {
        mem::swap(&mut self.h, &mut other.h);
        mem::swap(&mut self.u, &mut other.u);
        mem::swap(&mut self.v, &mut other.v);
        mem::swap(&mut self.eta, &mut other.eta);
    }
}

/// Three named tendency slots per variable, as the AB3 stepper needs them.
/// `dhdt`/`dudt`/`dvdt` hold the current evaluation; `_old` and `_veryold`
/// the two previous ones.
pub struct TendencyHistory {
    pub dhdt: Array3<f64>,
    pub dudt: Array3<f64>,
    pub dvdt: Array3<f64>,
    pub dhdt_old: Array3<f64>,
    pub dudt_old: Array3<f64>,
    pub dvdt_old: Array3<f64>,
    pub dhdt_veryold: Array3<f64>,
    pub dudt_veryold: Array3<f64>,
    pub dvdt_veryold: Array3<f64>,
}

impl TendencyHistory {
    pub fn zeros(grid: &Grid) -> TendencyHistory {
        let shape = (grid.layers, grid.nx + 2, grid.ny + 2);
        TendencyHistory {
            dhdt: Array3::zeros(shape),
            dudt: Array3::zeros(shape),
            dvdt: Array3::zeros(shape),
            dhdt_old: Array3::zeros(shape),
            dudt_old: Array3::zeros(shape),
            dvdt_old: Array3::zeros(shape),
            dhdt_veryold: Array3::zeros(shape),
            dudt_veryold: Array3::zeros(shape),
            dvdt_veryold: Array3::zeros(shape),
        }
    }

    /// Age the slots: very-old ← old, old ← current. The current slot ends up
    /// holding the discarded very-old buffer, ready to be overwritten. Two
    /// swaps per variable, never a copy.
    pub fn rotate(&mut self) {
        mem::swap(&mut self.dhdt_veryold, &mut self.dhdt_old);
        mem::swap(&mut self.dhdt_old, &mut self.dhdt);
        mem::swap(&mut self.dudt_veryold, &mut self.dudt_old);
        mem::swap(&mut self.dudt_old, &mut self.dudt);
        mem::swap(&mut self.dvdt_veryold, &mut self.dvdt_old);
        mem::swap(&mut self.dvdt_old, &mut self.dvdt);
    }
}

/// External forcing held fixed over the run: wind stress fields, the per-step
/// wind magnitude multiplier, and the sponge targets and rates.
pub struct Forcing {
    /// Zonal wind stress [N/m²] at U points
    pub wind_x: Array2<f64>,
    /// Meridional wind stress [N/m²] at V points
    pub wind_y: Array2<f64>,
    /// Multiplier on both wind components, one entry per step
    pub wind_mag: Vec<f64>,
    /// Relaxation rate toward the h target [1/s]; 0 disables locally
    pub sponge_h_time_scale: Array3<f64>,
    pub sponge_u_time_scale: Array3<f64>,
    pub sponge_v_time_scale: Array3<f64>,
    pub sponge_h: Array3<f64>,
    pub sponge_u: Array3<f64>,
    pub sponge_v: Array3<f64>,
}

impl Forcing {
    pub fn wind_mag_at(&self, step: u64) -> f64 {
        self.wind_mag
            .get((step.max(1) - 1) as usize)
            .copied()
            .unwrap_or(1.0)
    }
}

/// Per-step work arrays, allocated once at startup.
pub struct Scratch {
    /// Relative vorticity [1/s] at Z points
    pub zeta: Array3<f64>,
    /// Bernoulli potential [m²/s²] at H points
    pub bernoulli: Array3<f64>,
    /// Depth-integrated zonal transport [m²/s] at U points
    pub ub: Array2<f64>,
    /// Depth-integrated meridional transport [m²/s] at V points
    pub vb: Array2<f64>,
    /// Provisional free surface before the elliptic solve [m]
    pub etastar: Array2<f64>,
}

impl Scratch {
    pub fn zeros(grid: &Grid) -> Scratch {
        let shape3 = (grid.layers, grid.nx + 2, grid.ny + 2);
        let shape2 = (grid.nx + 2, grid.ny + 2);
        Scratch {
            zeta: Array3::zeros(shape3),
            bernoulli: Array3::zeros(shape3),
            ub: Array2::zeros(shape2),
            vb: Array2::zeros(shape2),
            etastar: Array2::zeros(shape2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn rotation_ages_slots_without_copying() {
        let shape = (1, 3, 3);
        let mut hist = TendencyHistory {
            dhdt: Array3::from_elem(shape, 3.0),
            dudt: Array3::from_elem(shape, 3.0),
            dvdt: Array3::from_elem(shape, 3.0),
            dhdt_old: Array3::from_elem(shape, 2.0),
            dudt_old: Array3::from_elem(shape, 2.0),
            dvdt_old: Array3::from_elem(shape, 2.0),
            dhdt_veryold: Array3::from_elem(shape, 1.0),
            dudt_veryold: Array3::from_elem(shape, 1.0),
            dvdt_veryold: Array3::from_elem(shape, 1.0),
        };
        hist.rotate();
        assert_eq!(hist.dhdt_veryold[[0, 0, 0]], 2.0);
        assert_eq!(hist.dhdt_old[[0, 0, 0]], 3.0);
        // the current slot now holds the recycled very-old buffer
        assert_eq!(hist.dhdt[[0, 0, 0]], 1.0);
    }

    #[test]
    fn wind_series_indexing_is_one_based() {
        let grid_free = Forcing {
            wind_x: Array2::zeros((3, 3)),
            wind_y: Array2::zeros((3, 3)),
            wind_mag: vec![0.5, 0.75, 1.0],
            sponge_h_time_scale: Array3::zeros((1, 3, 3)),
            sponge_u_time_scale: Array3::zeros((1, 3, 3)),
            sponge_v_time_scale: Array3::zeros((1, 3, 3)),
            sponge_h: Array3::zeros((1, 3, 3)),
            sponge_u: Array3::zeros((1, 3, 3)),
            sponge_v: Array3::zeros((1, 3, 3)),
        };
        assert_eq!(grid_free.wind_mag_at(1), 0.5);
        assert_eq!(grid_free.wind_mag_at(3), 1.0);
        assert_eq!(grid_free.wind_mag_at(4), 1.0);
    }
}
