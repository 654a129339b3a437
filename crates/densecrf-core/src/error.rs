//! Error types for the inference pipeline.
//!
//! Every failure is reported through [`CrfError`] before any output is
//! produced. There are no retryable errors: inference is a synchronous,
//! deterministic computation.

use thiserror::Error;

/// Malformed, missing or inconsistent inputs.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// The `solver` option is missing or names an unsupported solver.
    #[error("Unknown solver")]
    UnknownSolver(String),
    /// The grid has a zero dimension.
    #[error("invalid grid size {rows}x{cols}: both dimensions must be positive")]
    InvalidGrid {
        /// Number of rows (M).
        rows: usize,
        /// Number of columns (N).
        cols: usize,
    },
    /// The grid dimensions overflow the addressable size.
    #[error("grid size {rows}x{cols}x{depth} overflows the addressable range")]
    SizeOverflow {
        /// Number of rows (M).
        rows: usize,
        /// Number of columns (N).
        cols: usize,
        /// Channels or labels per pixel.
        depth: usize,
    },
    /// The image has zero channels.
    #[error("image must have at least one channel")]
    NoChannels,
    /// The image buffer does not hold exactly M*N*C bytes.
    #[error("image buffer holds {actual} bytes, expected {expected}")]
    ImageSizeMismatch {
        /// M*N*C.
        expected: usize,
        /// Length of the buffer.
        actual: usize,
    },
    /// The unary table size is not a multiple of the number of pixels.
    #[error("unary table with {entries} entries is not divisible into {variables} variables")]
    LabelCountMismatch {
        /// Total number of unary entries.
        entries: usize,
        /// Number of pixels (M*N).
        variables: usize,
    },
    /// The unary table is empty.
    #[error("unary table must contain at least one label")]
    NoLabels,
    /// The label count does not fit a `u32` label index.
    #[error("{0} labels exceed the supported label range")]
    TooManyLabels(usize),
    /// A unary entry is NaN or infinite.
    #[error("unary cost at index {index} is not finite")]
    NonFiniteUnary {
        /// Flat index into the unary table.
        index: usize,
    },
    /// A parameter value is out of its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        /// Option key.
        name: &'static str,
        /// What is wrong with the value.
        reason: String,
    },
    /// An option value has the wrong type.
    #[error("option `{key}` must be a {expected}")]
    WrongType {
        /// Option key.
        key: String,
        /// Expected type name.
        expected: &'static str,
    },
}

/// Top-level error of a solve call.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum CrfError {
    /// Inputs rejected before inference started.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// The message-passing engine failed during construction or iteration.
    #[error("internal solver error: {0}")]
    InternalSolver(String),
}

impl CrfError {
    /// Returns true if the error was caused by the caller's inputs.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Shorthand used across the crate.
pub type Result<T, E = CrfError> = std::result::Result<T, E>;
