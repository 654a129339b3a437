//! String-keyed option maps, as handed over by a host environment.
//!
//! Hosts pass a loosely typed struct of options (`{"solver": "TRWS",
//! "iterations": 50, ...}`). [`Params`] stores those values and
//! [`SolveOptions::from_params`] turns them into a validated configuration.

use crate::config::{NormalizationType, PairwiseWeights, SolveOptions, SolverKind};
use crate::error::ConfigError;
use std::collections::BTreeMap;

/// A single option value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// String.
    Str(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Conversion from a [`ParamValue`] to a concrete option type.
pub trait FromParam: Sized {
    /// Type name used in error messages.
    const TYPE_NAME: &'static str;

    /// Convert, returning `None` on a type mismatch.
    fn from_param(value: &ParamValue) -> Option<Self>;
}

impl FromParam for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_param(value: &ParamValue) -> Option<Self> {
        match *value {
            ParamValue::Bool(b) => Some(b),
            // Hosts without a boolean type pass 0/1.
            ParamValue::Int(i) => Some(i != 0),
            _ => None,
        }
    }
}

impl FromParam for i64 {
    const TYPE_NAME: &'static str = "integer";

    #[allow(clippy::cast_possible_truncation)]
    fn from_param(value: &ParamValue) -> Option<Self> {
        match *value {
            ParamValue::Int(i) => Some(i),
            // Numeric hosts store every number as a double.
            ParamValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
            _ => None,
        }
    }
}

impl FromParam for f64 {
    const TYPE_NAME: &'static str = "number";

    #[allow(clippy::cast_precision_loss)]
    fn from_param(value: &ParamValue) -> Option<Self> {
        match *value {
            ParamValue::Float(f) => Some(f),
            ParamValue::Int(i) => Some(i as f64),
            _ => None,
        }
    }
}

impl FromParam for String {
    const TYPE_NAME: &'static str = "string";

    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Keys understood by [`SolveOptions::from_params`].
pub const KNOWN_KEYS: &[&str] = &[
    "solver",
    "iterations",
    "debug",
    "min_pairwise_cost",
    "tolerance",
    "normalization",
    "gaussian_x_stddev",
    "gaussian_y_stddev",
    "gaussian_weight",
    "bilateral_x_stddev",
    "bilateral_y_stddev",
    "bilateral_r_stddev",
    "bilateral_g_stddev",
    "bilateral_b_stddev",
    "bilateral_weight",
];

/// An ordered map of option names to values.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Params {
    values: BTreeMap<String, ParamValue>,
}

impl Params {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the map for chaining.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn get_raw(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Typed value of `key`, or `None` if absent.
    pub fn get<T: FromParam>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => T::from_param(value)
                .map(Some)
                .ok_or_else(|| ConfigError::WrongType {
                    key: key.to_string(),
                    expected: T::TYPE_NAME,
                }),
        }
    }

    /// Typed value of `key`, or `default` if absent.
    pub fn get_or<T: FromParam>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Keys that no parser recognizes.
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|k| !KNOWN_KEYS.contains(k))
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl PairwiseWeights {
    /// Read weights from an option map, falling back to defaults.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let d = Self::default();
        let weights = Self {
            gaussian_x_stddev: params.get_or("gaussian_x_stddev", d.gaussian_x_stddev)?,
            gaussian_y_stddev: params.get_or("gaussian_y_stddev", d.gaussian_y_stddev)?,
            gaussian_weight: params.get_or("gaussian_weight", d.gaussian_weight)?,
            bilateral_x_stddev: params.get_or("bilateral_x_stddev", d.bilateral_x_stddev)?,
            bilateral_y_stddev: params.get_or("bilateral_y_stddev", d.bilateral_y_stddev)?,
            bilateral_r_stddev: params.get_or("bilateral_r_stddev", d.bilateral_r_stddev)?,
            bilateral_g_stddev: params.get_or("bilateral_g_stddev", d.bilateral_g_stddev)?,
            bilateral_b_stddev: params.get_or("bilateral_b_stddev", d.bilateral_b_stddev)?,
            bilateral_weight: params.get_or("bilateral_weight", d.bilateral_weight)?,
        };
        weights.validate()?;
        Ok(weights)
    }
}

impl SolveOptions {
    /// Parse and validate an option map.
    ///
    /// `solver` is mandatory; every other key falls back to its default.
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        let solver = match params.get::<String>("solver")? {
            Some(name) => name.parse::<SolverKind>()?,
            None => return Err(ConfigError::UnknownSolver("Not set".into())),
        };

        let d = Self::default();
        let iterations = params.get_or("iterations", i64::try_from(d.iterations).unwrap_or(20))?;
        let iterations = usize::try_from(iterations).map_err(|_| ConfigError::InvalidParameter {
            name: "iterations",
            reason: format!("must be non-negative, got {iterations}"),
        })?;

        let normalization = match params.get::<String>("normalization")? {
            Some(name) => name.parse::<NormalizationType>()?,
            None => d.normalization,
        };

        for key in params.unknown_keys() {
            tracing::warn!(key, "ignoring unrecognized option");
        }

        let options = Self {
            solver,
            iterations,
            debug: params.get_or("debug", d.debug)?,
            min_pairwise_cost: params.get_or("min_pairwise_cost", d.min_pairwise_cost)?,
            tolerance: params.get("tolerance")?,
            normalization,
            weights: PairwiseWeights::from_params(params)?,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_params() {
        let params = Params::new().with("solver", "TRWS");
        let options = SolveOptions::from_params(&params).unwrap();
        assert_eq!(options.solver, SolverKind::Trws);
        assert_eq!(options.iterations, 20);
        assert!(!options.debug);
        assert_eq!(options.min_pairwise_cost, 0.0);
        assert_eq!(options.weights, PairwiseWeights::default());
    }

    #[test]
    fn test_missing_solver_is_unknown() {
        let err = SolveOptions::from_params(&Params::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSolver(_)));
    }

    #[test]
    fn test_unknown_solver() {
        let params = Params::new().with("solver", "XYZ");
        assert_eq!(
            SolveOptions::from_params(&params),
            Err(ConfigError::UnknownSolver("XYZ".into()))
        );
    }

    #[test]
    fn test_numeric_host_values() {
        // Hosts that store everything as doubles.
        let params: Params = [
            ("solver", ParamValue::from("MF")),
            ("iterations", ParamValue::Float(7.0)),
            ("debug", ParamValue::Int(1)),
            ("gaussian_weight", ParamValue::Int(2)),
            ("normalization", ParamValue::from("NO_NORMALIZATION")),
        ]
        .into_iter()
        .collect();
        let options = SolveOptions::from_params(&params).unwrap();
        assert_eq!(options.iterations, 7);
        assert!(options.debug);
        assert_eq!(options.weights.gaussian_weight, 2.0);
        assert_eq!(options.normalization, NormalizationType::None);
    }

    #[test]
    fn test_wrong_types_rejected() {
        let params = Params::new().with("solver", "MF").with("iterations", "many");
        assert_eq!(
            SolveOptions::from_params(&params),
            Err(ConfigError::WrongType {
                key: "iterations".into(),
                expected: "integer"
            })
        );

        let params = Params::new().with("solver", 3i64);
        assert!(matches!(
            SolveOptions::from_params(&params),
            Err(ConfigError::WrongType { .. })
        ));

        let params = Params::new().with("solver", "MF").with("iterations", 2.5);
        assert!(SolveOptions::from_params(&params).is_err());
    }

    #[test]
    fn test_negative_iterations_rejected() {
        let params = Params::new().with("solver", "MF").with("iterations", -3i64);
        assert!(matches!(
            SolveOptions::from_params(&params),
            Err(ConfigError::InvalidParameter {
                name: "iterations",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_keys_listed() {
        let params = Params::new()
            .with("solver", "MF")
            .with("colour_space", "lab");
        assert_eq!(params.unknown_keys().collect::<Vec<_>>(), vec!["colour_space"]);
        assert!(SolveOptions::from_params(&params).is_ok());
    }
}
