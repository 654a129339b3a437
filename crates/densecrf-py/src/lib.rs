//! Python bindings for the densecrf inference engine.
// pyo3 macro expansions contain unsafe blocks.
#![allow(unsafe_code)]

use densecrf_core::{CrfError, ParamValue, Params};
use numpy::{PyArray2, PyArrayMethods, PyReadonlyArray3, PyReadonlyArrayDyn, PyUntypedArrayMethods};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyInt, PyString};

// ============================================================================
// Stats (Python-compatible wrapper)
// ============================================================================

/// Python-compatible solve statistics.
#[pyclass]
#[derive(Clone, Default)]
pub struct SolveStats {
    /// Input validation and oracle setup time (ms).
    #[pyo3(get)]
    pub setup_ms: f64,
    /// Solver time (ms).
    #[pyo3(get)]
    pub inference_ms: f64,
    /// Total time (ms).
    #[pyo3(get)]
    pub total_ms: f64,
    /// Iterations or sweeps run.
    #[pyo3(get)]
    pub iterations_run: usize,
    /// TRW-S graph edges.
    #[pyo3(get)]
    pub num_edges: usize,
    /// Whether the tolerance criterion stopped the solver early.
    #[pyo3(get)]
    pub converged: bool,
    /// TRW-S bound per sweep.
    #[pyo3(get)]
    pub bound_trace: Vec<f64>,
}

impl From<densecrf_core::SolveStats> for SolveStats {
    fn from(s: densecrf_core::SolveStats) -> Self {
        Self {
            setup_ms: s.setup_ms,
            inference_ms: s.inference_ms,
            total_ms: s.total_ms,
            iterations_run: s.iterations_run,
            num_edges: s.num_edges,
            converged: s.termination == densecrf_core::Termination::Converged,
            bound_trace: s.bound_trace,
        }
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn to_py_err(err: CrfError) -> PyErr {
    match err {
        CrfError::Configuration(_) => PyValueError::new_err(err.to_string()),
        CrfError::InternalSolver(_) => PyRuntimeError::new_err(err.to_string()),
    }
}

/// Convert an options dict into a [`Params`] map.
fn params_from_dict(options: Option<&Bound<'_, PyDict>>) -> PyResult<Params> {
    let mut params = Params::new();
    let Some(dict) = options else {
        return Ok(params);
    };
    for (key, value) in dict.iter() {
        let key: String = key
            .extract()
            .map_err(|_| PyValueError::new_err("option names must be strings"))?;
        // bool is a subclass of int in Python, so it is checked first.
        let value = if value.is_instance_of::<PyBool>() {
            ParamValue::Bool(value.extract()?)
        } else if value.is_instance_of::<PyInt>() {
            ParamValue::Int(value.extract()?)
        } else if value.is_instance_of::<PyFloat>() {
            ParamValue::Float(value.extract()?)
        } else if value.is_instance_of::<PyString>() {
            ParamValue::Str(value.extract()?)
        } else if let Ok(number) = value.extract::<f64>() {
            // NumPy scalars and other number-likes
            ParamValue::Float(number)
        } else {
            return Err(PyValueError::new_err(format!(
                "option `{key}` has unsupported type {}",
                value.get_type().name()?
            )));
        };
        params.insert(&key, value);
    }
    Ok(params)
}

/// Run the core solver on NumPy inputs with the GIL released.
fn run_solve(
    py: Python<'_>,
    image: &PyReadonlyArray3<'_, u8>,
    unary: &PyReadonlyArrayDyn<'_, f32>,
    size: (usize, usize, usize),
    options: Option<&Bound<'_, PyDict>>,
) -> PyResult<densecrf_core::Solution> {
    let (rows, cols, channels) = size;
    if image.shape() != [rows, cols, channels] {
        return Err(PyValueError::new_err(format!(
            "image shape {:?} does not match size ({rows}, {cols}, {channels})",
            image.shape()
        )));
    }
    let params = params_from_dict(options)?;
    let image = image
        .as_slice()
        .map_err(|_| PyValueError::new_err("image must be a contiguous uint8 array"))?;
    let unary = unary
        .as_slice()
        .map_err(|_| PyValueError::new_err("unary must be a contiguous float32 array"))?;

    py.allow_threads(|| densecrf_core::solve(image, unary, [rows, cols, channels], &params))
        .map_err(to_py_err)
}

/// Reshape a row-major labeling into an `rows x cols` float64 array.
fn labeling_array<'py>(
    py: Python<'py>,
    solution: &densecrf_core::Solution,
    rows: usize,
    cols: usize,
) -> PyResult<Bound<'py, PyArray2<f64>>> {
    numpy::PyArray1::from_vec(py, solution.labeling_as_f64())
        .reshape([rows, cols])
        .map_err(|_| PyRuntimeError::new_err("Failed to reshape NumPy array"))
}

// ============================================================================
// Functions
// ============================================================================

/// Label an image with a dense CRF.
///
/// `image` is a uint8 array of shape `size = (M, N, C)`. `unary` is a float32
/// array holding the label costs of each pixel contiguously, e.g. shape
/// `(M, N, L)` in C order or `(L, M*N)` in Fortran order. `options` is a dict
/// with at least `"solver"` set to `"MF"` or `"TRWS"`.
///
/// Returns `(labeling, energy, bound)` with `labeling` a float64 `(M, N)` array.
#[pyfunction]
#[pyo3(signature = (image, unary, size, options=None))]
#[allow(clippy::needless_pass_by_value)]
fn solve<'py>(
    py: Python<'py>,
    image: PyReadonlyArray3<'py, u8>,
    unary: PyReadonlyArrayDyn<'py, f32>,
    size: (usize, usize, usize),
    options: Option<&Bound<'py, PyDict>>,
) -> PyResult<(Bound<'py, PyArray2<f64>>, f64, f64)> {
    let solution = run_solve(py, &image, &unary, size, options)?;
    let labeling = labeling_array(py, &solution, size.0, size.1)?;
    Ok((labeling, solution.energy, solution.bound))
}

/// Like `solve`, additionally returning a `SolveStats` object.
#[pyfunction]
#[pyo3(signature = (image, unary, size, options=None))]
#[allow(clippy::needless_pass_by_value)]
fn solve_with_stats<'py>(
    py: Python<'py>,
    image: PyReadonlyArray3<'py, u8>,
    unary: PyReadonlyArrayDyn<'py, f32>,
    size: (usize, usize, usize),
    options: Option<&Bound<'py, PyDict>>,
) -> PyResult<(Bound<'py, PyArray2<f64>>, f64, f64, SolveStats)> {
    let solution = run_solve(py, &image, &unary, size, options)?;
    let labeling = labeling_array(py, &solution, size.0, size.1)?;
    Ok((
        labeling,
        solution.energy,
        solution.bound,
        SolveStats::from(solution.stats),
    ))
}

/// Version of the core library.
#[pyfunction]
fn version() -> &'static str {
    densecrf_core::version()
}

// ============================================================================
// Module registration
// ============================================================================

/// The densecrf Python module.
#[pymodule]
fn densecrf(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<SolveStats>()?;
    m.add_function(wrap_pyfunction!(solve, m)?)?;
    m.add_function(wrap_pyfunction!(solve_with_stats, m)?)?;
    m.add_function(wrap_pyfunction!(version, m)?)?;
    Ok(())
}
