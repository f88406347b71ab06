//! Tile ownership and the worker pool.
//!
//! The interior is split into `nProcX × nProcY` rectangular tiles, one per
//! worker. Tiles share the process address space, so the halo exchange is the
//! periodic wrap itself; what remains of the rank bookkeeping is the
//! worker-count contract (checked at startup), a dedicated thread pool sized
//! to exactly that many workers, and tile-parallel reductions for the global
//! diagnostics that would otherwise be collectives.

use ndarray::Array3;
use rayon::prelude::*;

use crate::config::Config;
use crate::error::ModelError;

/// One worker's subrectangle of the interior, inclusive bounds.
#[derive(Debug, Clone, Copy)]
pub struct Tile {
    pub i0: usize,
    pub i1: usize,
    pub j0: usize,
    pub j1: usize,
}

/// Per-layer summary statistics produced by a tile reduction.
#[derive(Debug, Clone, Copy)]
pub struct LayerStats {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy)]
struct Partial {
    count: usize,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Partial {
    fn empty() -> Partial {
        Partial {
            count: 0,
            sum: 0.0,
            sum_sq: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn merge(self, other: Partial) -> Partial {
        Partial {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

pub struct Decomp {
    pub n_proc_x: usize,
    pub n_proc_y: usize,
    pub tiles: Vec<Tile>,
    pool: rayon::ThreadPool,
}

impl Decomp {
    pub fn new(config: &Config) -> Result<Decomp, ModelError> {
        let nx = config.grid.nx;
        let ny = config.grid.ny;
        let n_proc_x = config.pressure_solver.n_proc_x;
        let n_proc_y = config.pressure_solver.n_proc_y;
        // validated in Config::validate, but decomposition owns the contract
        if nx % n_proc_x != 0 || ny % n_proc_y != 0 {
            return Err(ModelError::Config(format!(
                "grid {}x{} does not tile into {}x{} workers",
                nx, ny, n_proc_x, n_proc_y
            )));
        }
        let tile_nx = nx / n_proc_x;
        let tile_ny = ny / n_proc_y;
        let mut tiles = Vec::with_capacity(n_proc_x * n_proc_y);
        for px in 0..n_proc_x {
            for py in 0..n_proc_y {
                tiles.push(Tile {
                    i0: 1 + px * tile_nx,
                    i1: (px + 1) * tile_nx,
                    j0: 1 + py * tile_ny,
                    j1: (py + 1) * tile_ny,
                });
            }
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_proc_x * n_proc_y)
            .build()
            .map_err(|e| ModelError::WorkerPool(e.to_string()))?;
        Ok(Decomp {
            n_proc_x,
            n_proc_y,
            tiles,
            pool,
        })
    }

    pub fn workers(&self) -> usize {
        self.n_proc_x * self.n_proc_y
    }

    /// Run a sweep on the worker pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Summary statistics of one layer over the interior H range.
    pub fn layer_stats(&self, field: &Array3<f64>, k: usize) -> LayerStats {
        let partial = self.install(|| {
            self.tiles
                .par_iter()
                .map(|tile| {
                    let mut p = Partial::empty();
                    for i in tile.i0..=tile.i1 {
                        for j in tile.j0..=tile.j1 {
                            let value = field[[k, i, j]];
                            p.count += 1;
                            p.sum += value;
                            p.sum_sq += value * value;
                            p.min = p.min.min(value);
                            p.max = p.max.max(value);
                        }
                    }
                    p
                })
                .reduce(Partial::empty, Partial::merge)
        });
        let count = partial.count.max(1) as f64;
        let mean = partial.sum / count;
        let variance = (partial.sum_sq / count - mean * mean).max(0.0);
        LayerStats {
            mean,
            max: partial.max,
            min: partial.min,
            std: variance.sqrt(),
        }
    }

    /// True if any interior value of any layer is NaN.
    pub fn any_nan(&self, field: &Array3<f64>) -> bool {
        let layers = field.dim().0;
        self.install(|| {
            self.tiles.par_iter().any(|tile| {
                for k in 0..layers {
                    for i in tile.i0..=tile.i1 {
                        for j in tile.j0..=tile.j1 {
                            if field[[k, i, j]].is_nan() {
                                return true;
                            }
                        }
                    }
                }
                false
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use ndarray::Array3;

    fn decomp(nx: usize, ny: usize, px: usize, py: usize) -> Result<Decomp, ModelError> {
        let mut config = Config::default();
        config.grid.nx = nx;
        config.grid.ny = ny;
        config.pressure_solver.n_proc_x = px;
        config.pressure_solver.n_proc_y = py;
        Decomp::new(&config)
    }

    #[test]
    fn tiles_cover_the_interior_exactly() {
        let d = decomp(8, 6, 2, 3).unwrap();
        assert_eq!(d.workers(), 6);
        let mut covered = vec![false; 8 * 6];
        for tile in &d.tiles {
            for i in tile.i0..=tile.i1 {
                for j in tile.j0..=tile.j1 {
                    let idx = (i - 1) * 6 + (j - 1);
                    assert!(!covered[idx], "tile overlap at ({i}, {j})");
                    covered[idx] = true;
                }
            }
        }
        assert!(covered.iter().all(|&c| c));
    }

    #[test]
    fn indivisible_grid_is_rejected() {
        assert!(decomp(8, 6, 3, 1).is_err());
    }

    #[test]
    fn tiled_stats_match_a_serial_pass() {
        let d = decomp(6, 6, 2, 2).unwrap();
        let mut field = Array3::<f64>::zeros((1, 8, 8));
        for i in 1..=6 {
            for j in 1..=6 {
                field[[0, i, j]] = (i * j) as f64;
            }
        }
        let stats = d.layer_stats(&field, 0);
        assert_eq!(stats.max, 36.0);
        assert_eq!(stats.min, 1.0);
        let serial_mean = (1..=6)
            .flat_map(|i| (1..=6).map(move |j| (i * j) as f64))
            .sum::<f64>()
            / 36.0;
        assert!((stats.mean - serial_mean).abs() < 1e-12);
    }

    #[test]
    fn nan_guard_sees_interior_only() {
        let d = decomp(4, 4, 1, 1).unwrap();
        let mut field = Array3::<f64>::zeros((1, 6, 6));
        field[[0, 0, 0]] = f64::NAN; // halo corner, ignored
        assert!(!d.any_nan(&field));
        field[[0, 2, 3]] = f64::NAN;
        assert!(d.any_nan(&field));
    }
}
