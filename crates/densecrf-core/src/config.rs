//! Configuration types for a solve call.
//!
//! - [`PairwiseWeights`]: kernel bandwidths and weights of the energy (immutable once built)
//! - [`SolveOptions`]: solver selection and iteration controls
//!
//! Both are plain `Copy` structs with defaults and builders. Host-style
//! string-keyed option maps are converted through [`crate::params`].

use crate::error::ConfigError;
use std::str::FromStr;

// ============================================================================
// Solver and normalization selectors
// ============================================================================

/// Inference algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverKind {
    /// Fully-connected mean-field approximation ("MF").
    #[default]
    MeanField,
    /// Sequential tree-reweighted message passing ("TRWS").
    Trws,
}

impl SolverKind {
    /// Name used in option maps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MeanField => "MF",
            Self::Trws => "TRWS",
        }
    }
}

impl FromStr for SolverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MF" => Ok(Self::MeanField),
            "TRWS" => Ok(Self::Trws),
            other => Err(ConfigError::UnknownSolver(other.to_string())),
        }
    }
}

/// How the mean-field filter output is normalized.
///
/// With `D_i = sum_{j != i} K(i, j)`:
/// - `None`: `K Q` (exact mean-field update of the reported Potts energy)
/// - `Before`: `K D^-1 Q`
/// - `After`: `D^-1 K Q`
/// - `Symmetric`: `D^-1/2 K D^-1/2 Q`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NormalizationType {
    /// No normalization.
    None,
    /// Normalize the source distribution.
    Before,
    /// Normalize the filter response.
    After,
    /// Symmetric normalization on both sides.
    #[default]
    Symmetric,
}

impl FromStr for NormalizationType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const NAMES: [(&str, NormalizationType); 4] = [
            ("NO_NORMALIZATION", NormalizationType::None),
            ("NORMALIZE_BEFORE", NormalizationType::Before),
            ("NORMALIZE_AFTER", NormalizationType::After),
            ("NORMALIZE_SYMMETRIC", NormalizationType::Symmetric),
        ];
        NAMES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, kind)| kind)
            .ok_or_else(|| ConfigError::InvalidParameter {
                name: "normalization",
                reason: format!("unknown normalization type `{s}`"),
            })
    }
}

// ============================================================================
// PairwiseWeights
// ============================================================================

/// Bandwidths and weights of the Gaussian (spatial) and bilateral kernels.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairwiseWeights {
    /// Spatial kernel stddev along columns (default: 3.0).
    pub gaussian_x_stddev: f64,
    /// Spatial kernel stddev along rows (default: 3.0).
    pub gaussian_y_stddev: f64,
    /// Spatial kernel Potts weight (default: 3.0).
    pub gaussian_weight: f64,
    /// Bilateral kernel position stddev along columns (default: 80.0).
    pub bilateral_x_stddev: f64,
    /// Bilateral kernel position stddev along rows (default: 80.0).
    pub bilateral_y_stddev: f64,
    /// Bilateral kernel stddev of the first channel (default: 13.0).
    pub bilateral_r_stddev: f64,
    /// Bilateral kernel stddev of the second channel (default: 13.0).
    pub bilateral_g_stddev: f64,
    /// Bilateral kernel stddev of the third channel (default: 13.0).
    pub bilateral_b_stddev: f64,
    /// Bilateral kernel Potts weight (default: 10.0).
    pub bilateral_weight: f64,
}

impl Default for PairwiseWeights {
    fn default() -> Self {
        Self {
            gaussian_x_stddev: 3.0,
            gaussian_y_stddev: 3.0,
            gaussian_weight: 3.0,
            bilateral_x_stddev: 80.0,
            bilateral_y_stddev: 80.0,
            bilateral_r_stddev: 13.0,
            bilateral_g_stddev: 13.0,
            bilateral_b_stddev: 13.0,
            bilateral_weight: 10.0,
        }
    }
}

impl PairwiseWeights {
    /// Weights with both kernels switched off (unary-only energy).
    #[must_use]
    pub fn zero() -> Self {
        Self {
            gaussian_weight: 0.0,
            bilateral_weight: 0.0,
            ..Self::default()
        }
    }

    /// Check that stddevs are positive and weights are non-negative.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let stddevs = [
            ("gaussian_x_stddev", self.gaussian_x_stddev),
            ("gaussian_y_stddev", self.gaussian_y_stddev),
            ("bilateral_x_stddev", self.bilateral_x_stddev),
            ("bilateral_y_stddev", self.bilateral_y_stddev),
            ("bilateral_r_stddev", self.bilateral_r_stddev),
            ("bilateral_g_stddev", self.bilateral_g_stddev),
            ("bilateral_b_stddev", self.bilateral_b_stddev),
        ];
        for (name, value) in stddevs {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("stddev must be positive and finite, got {value}"),
                });
            }
        }
        for (name, value) in [
            ("gaussian_weight", self.gaussian_weight),
            ("bilateral_weight", self.bilateral_weight),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("weight must be non-negative and finite, got {value}"),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// SolveOptions
// ============================================================================

/// Per-call solver configuration.
///
/// # Example
/// ```
/// use densecrf_core::config::{SolveOptions, SolverKind};
///
/// let options = SolveOptions::builder()
///     .solver(SolverKind::Trws)
///     .iterations(50)
///     .min_pairwise_cost(0.01)
///     .build();
/// assert_eq!(options.iterations, 50);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveOptions {
    /// Inference algorithm (default: mean-field).
    pub solver: SolverKind,
    /// Number of mean-field iterations or TRW-S sweeps (default: 20).
    pub iterations: usize,
    /// Emit stage timings and problem diagnostics through `tracing` (default: false).
    pub debug: bool,
    /// TRW-S only: pairs with a lower pairwise cost get no edge (default: 0.0, dense graph).
    pub min_pairwise_cost: f64,
    /// Optional early-stop tolerance (default: None, always run `iterations`).
    ///
    /// Mean-field stops when no probability changes by more than this;
    /// TRW-S stops when a sweep improves the bound by less than this.
    pub tolerance: Option<f64>,
    /// Mean-field filter normalization (default: symmetric).
    pub normalization: NormalizationType,
    /// Energy weights.
    pub weights: PairwiseWeights,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            solver: SolverKind::MeanField,
            iterations: 20,
            debug: false,
            min_pairwise_cost: 0.0,
            tolerance: None,
            normalization: NormalizationType::Symmetric,
            weights: PairwiseWeights::default(),
        }
    }
}

impl SolveOptions {
    /// Create a new builder for `SolveOptions`.
    #[must_use]
    pub fn builder() -> SolveOptionsBuilder {
        SolveOptionsBuilder::default()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if self.min_pairwise_cost.is_nan() {
            return Err(ConfigError::InvalidParameter {
                name: "min_pairwise_cost",
                reason: "must not be NaN".into(),
            });
        }
        if let Some(tol) = self.tolerance {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name: "tolerance",
                    reason: format!("must be positive and finite, got {tol}"),
                });
            }
        }
        Ok(())
    }
}

/// Builder for [`SolveOptions`].
#[derive(Default)]
pub struct SolveOptionsBuilder {
    solver: Option<SolverKind>,
    iterations: Option<usize>,
    debug: Option<bool>,
    min_pairwise_cost: Option<f64>,
    tolerance: Option<f64>,
    normalization: Option<NormalizationType>,
    weights: Option<PairwiseWeights>,
}

impl SolveOptionsBuilder {
    /// Set the inference algorithm.
    #[must_use]
    pub fn solver(mut self, solver: SolverKind) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Set the iteration (sweep) budget.
    #[must_use]
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Enable diagnostic output.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Set the TRW-S edge threshold.
    #[must_use]
    pub fn min_pairwise_cost(mut self, cost: f64) -> Self {
        self.min_pairwise_cost = Some(cost);
        self
    }

    /// Enable early stopping with the given tolerance.
    #[must_use]
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Set the mean-field normalization.
    #[must_use]
    pub fn normalization(mut self, normalization: NormalizationType) -> Self {
        self.normalization = Some(normalization);
        self
    }

    /// Set the energy weights.
    #[must_use]
    pub fn weights(mut self, weights: PairwiseWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Build the options, using defaults for unset fields.
    #[must_use]
    pub fn build(self) -> SolveOptions {
        let d = SolveOptions::default();
        SolveOptions {
            solver: self.solver.unwrap_or(d.solver),
            iterations: self.iterations.unwrap_or(d.iterations),
            debug: self.debug.unwrap_or(d.debug),
            min_pairwise_cost: self.min_pairwise_cost.unwrap_or(d.min_pairwise_cost),
            tolerance: self.tolerance.or(d.tolerance),
            normalization: self.normalization.unwrap_or(d.normalization),
            weights: self.weights.unwrap_or(d.weights),
        }
    }
}
