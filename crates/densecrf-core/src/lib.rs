//! Dense 2D CRF inference.
//!
//! Given an image, a dense table of per-pixel label costs and the bandwidths
//! of a Gaussian and a bilateral kernel, the crate computes a labeling that
//! minimizes the fully-connected Potts energy
//!
//! ```text
//! E(x) = sum_i U_i(x_i) + sum_{i<j} w_ij [x_i != x_j]
//! ```
//!
//! and reports the labeling, its energy and a lower bound on the optimum.
//!
//! # Solvers
//!
//! 1. **Mean-field** ([`SolverKind::MeanField`], `"MF"`):
//!    - Per-pixel label distributions updated by dense kernel filtering.
//!    - Parallel Jacobi updates over pixels with rayon.
//!    - Bound: the unary-only lower bound.
//!
//! 2. **TRW-S** ([`SolverKind::Trws`], `"TRWS"`):
//!    - Explicit pixel graph, thresholded by `min_pairwise_cost`.
//!    - Sequential forward/backward sweeps over monotonic chains.
//!    - Bound: the dual lower bound, never above the reported energy.
//!
//! # Configuration
//!
//! - [`config::SolveOptions`]: typed per-call options with a builder
//! - [`params::Params`]: string-keyed option maps as passed by a host environment
//!
//! # Example
//!
//! ```
//! use densecrf_core::{CrfSolver, ImageView, SolveOptions, SolverKind};
//!
//! let pixels = vec![128u8; 4 * 4 * 3];
//! let image = ImageView::new(&pixels, 4, 4, 3).unwrap();
//! // Two labels per pixel; label 0 is cheaper everywhere.
//! let unary: Vec<f32> = (0..16).flat_map(|_| [0.0, 1.0]).collect();
//!
//! let options = SolveOptions::builder()
//!     .solver(SolverKind::Trws)
//!     .iterations(5)
//!     .build();
//! let mut solver = CrfSolver::with_options(options);
//! let solution = solver.solve(&image, &unary).unwrap();
//! assert!(solution.labeling.iter().all(|&l| l == 0));
//! assert!(solution.bound <= solution.energy + 1e-9);
//! ```

/// Configuration types for a solve call.
pub mod config;
/// Cost oracles and the energy functional.
pub mod cost;
/// Error types.
pub mod error;
/// Image buffer abstraction.
pub mod image;
/// Flattened index conversions.
pub mod index;
/// Mean-field inference.
pub mod mean_field;
/// String-keyed option maps.
pub mod params;
/// Solver capability and shared problem definition.
pub mod solver;
/// Utilities for testing and synthetic data generation.
pub mod test_utils;
/// TRW-S message passing.
pub mod trws;

pub use crate::config::{NormalizationType, PairwiseWeights, SolveOptions, SolverKind};
pub use crate::error::{ConfigError, CrfError};
pub use crate::image::ImageView;
pub use crate::params::{ParamValue, Params};
pub use crate::solver::{Problem, Solver, SolverState, Termination};
use bumpalo::Bump;

/// Statistics of a single solve call.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveStats {
    /// Time spent validating inputs and building the cost oracles, in milliseconds.
    pub setup_ms: f64,
    /// Time spent in the solver, in milliseconds.
    pub inference_ms: f64,
    /// Total time of the call, in milliseconds.
    pub total_ms: f64,
    /// Mean-field iterations or TRW-S sweeps actually run.
    pub iterations_run: usize,
    /// Edges of the TRW-S graph (0 for mean-field).
    pub num_edges: usize,
    /// Why the solver stopped.
    pub termination: Termination,
    /// State the solver finished in.
    pub final_state: SolverState,
    /// TRW-S bound before the first sweep and after each sweep (empty for mean-field).
    pub bound_trace: Vec<f64>,
}

/// Result of a solve call.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Solution {
    /// One label per pixel, row-major.
    pub labeling: Vec<u32>,
    /// Energy of `labeling`.
    pub energy: f64,
    /// Lower bound on the optimal energy.
    pub bound: f64,
    /// Timings and solver diagnostics.
    pub stats: SolveStats,
}

impl Solution {
    /// Labels as floating-point values, for hosts without integer arrays.
    #[must_use]
    pub fn labeling_as_f64(&self) -> Vec<f64> {
        self.labeling.iter().map(|&l| f64::from(l)).collect()
    }
}

/// Reusable solver front-end.
///
/// Holds the per-call options and a scratch arena that is reset at the
/// start of every call, so repeated solves reuse the same memory.
pub struct CrfSolver {
    arena: Bump,
    options: SolveOptions,
}

impl Default for CrfSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CrfSolver {
    /// Create a solver with default options (mean-field, 20 iterations).
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SolveOptions::default())
    }

    /// Create a solver with custom options.
    #[must_use]
    pub fn with_options(options: SolveOptions) -> Self {
        Self {
            arena: Bump::new(),
            options,
        }
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> SolveOptions {
        self.options
    }

    /// Replace the options used by subsequent calls.
    pub fn set_options(&mut self, options: SolveOptions) {
        self.options = options;
    }

    /// Label `image` given the per-pixel unary table `unary`.
    ///
    /// `unary` holds the label costs of each pixel contiguously; the number of
    /// labels is `unary.len() / (rows * cols)` and must divide exactly.
    pub fn solve(&mut self, image: &ImageView, unary: &[f32]) -> Result<Solution, CrfError> {
        let options = self.options;
        let start_total = std::time::Instant::now();
        options.validate()?;
        let problem = Problem::new(*image, unary, options.weights)?;
        self.arena.reset();

        if options.debug {
            tracing::info!(
                rows = image.rows,
                cols = image.cols,
                channels = image.channels,
                labels = problem.num_labels(),
                solver = options.solver.name(),
                iterations = options.iterations,
                min_pairwise_cost = options.min_pairwise_cost,
                "solving dense CRF"
            );
        }
        let setup_ms = start_total.elapsed().as_secs_f64() * 1000.0;

        let start_inference = std::time::Instant::now();
        let output = solver::solver_for(options.solver).solve(&self.arena, &problem, &options)?;
        let inference_ms = start_inference.elapsed().as_secs_f64() * 1000.0;

        let stats = SolveStats {
            setup_ms,
            inference_ms,
            total_ms: start_total.elapsed().as_secs_f64() * 1000.0,
            iterations_run: output.iterations_run,
            num_edges: output.num_edges,
            termination: output.termination,
            final_state: output.final_state,
            bound_trace: output.bound_trace,
        };
        if options.debug {
            tracing::info!(
                energy = output.energy,
                bound = output.bound,
                iterations_run = stats.iterations_run,
                num_edges = stats.num_edges,
                setup_ms = stats.setup_ms,
                inference_ms = stats.inference_ms,
                total_ms = stats.total_ms,
                "dense CRF solved"
            );
        }

        Ok(Solution {
            labeling: output.labeling,
            energy: output.energy,
            bound: output.bound,
            stats,
        })
    }
}

/// Host-style entry point: raw buffers, `[rows, cols, channels]` and an option map.
///
/// # Errors
/// Returns [`CrfError::Configuration`] for malformed inputs or options (before
/// any computation) and [`CrfError::InternalSolver`] if TRW-S fails.
///
/// # Example
/// ```
/// use densecrf_core::{solve, Params};
///
/// let image = vec![0u8; 2 * 2 * 3];
/// let unary = vec![1.0f32; 2 * 2 * 2];
/// let params = Params::new()
///     .with("solver", "TRWS")
///     .with("gaussian_weight", 0.0)
///     .with("bilateral_weight", 0.0);
/// let solution = solve(&image, &unary, [2, 2, 3], &params).unwrap();
/// assert_eq!(solution.labeling, vec![0, 0, 0, 0]);
/// assert_eq!(solution.energy, 4.0);
/// ```
pub fn solve(
    image: &[u8],
    unary: &[f32],
    size: [usize; 3],
    options: &Params,
) -> Result<Solution, CrfError> {
    let options = SolveOptions::from_params(options)?;
    let [rows, cols, channels] = size;
    let image = ImageView::new(image, rows, cols, channels)?;
    CrfSolver::with_options(options).solve(&image, unary)
}

/// Version of the core library.
#[must_use]
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
