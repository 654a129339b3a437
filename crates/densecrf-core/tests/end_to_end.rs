#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use densecrf_core::mean_field::MeanFieldState;
use densecrf_core::trws::TrwsState;
use densecrf_core::{solve, ConfigError, CrfError, ParamValue, Params, SolverState};

fn zero_weight_params(solver: &str) -> Params {
    Params::new()
        .with("solver", solver)
        .with("gaussian_weight", 0.0)
        .with("bilateral_weight", 0.0)
}

#[test]
fn test_uniform_unary_zero_weights_both_solvers_agree() {
    let image = vec![17u8, 200, 3, 99, 45, 250, 0, 128, 64, 32, 16, 8];
    let unary = vec![0.5f32; 2 * 2 * 2];

    let mf = solve(&image, &unary, [2, 2, 3], &zero_weight_params("MF")).unwrap();
    let trws = solve(&image, &unary, [2, 2, 3], &zero_weight_params("TRWS")).unwrap();

    assert_eq!(mf.labeling, vec![0, 0, 0, 0]);
    assert_eq!(trws.labeling, mf.labeling);
    assert!((mf.energy - 2.0).abs() < 1e-12);
    assert!((trws.energy - 2.0).abs() < 1e-12);
    assert!(trws.bound <= trws.energy + 1e-9);
    assert!(mf.bound <= mf.energy);
    assert_eq!(
        mf.stats.final_state,
        SolverState::MeanField(MeanFieldState::MaxIterReached)
    );
}

#[test]
fn test_unknown_solver_produces_no_outputs() {
    let image = vec![0u8; 2 * 2 * 3];
    let unary = vec![0.0f32; 8];
    let params = Params::new().with("solver", "XYZ");
    let err = solve(&image, &unary, [2, 2, 3], &params).unwrap_err();
    assert_eq!(
        err,
        CrfError::Configuration(ConfigError::UnknownSolver("XYZ".into()))
    );
    assert!(err.is_configuration());
    assert!(err.to_string().contains("Unknown solver"));
}

#[test]
fn test_label_count_derived_exactly() {
    let image = vec![0u8; 3 * 5 * 3];
    for labels in 1..5 {
        let unary = vec![1.0f32; labels * 15];
        let solution = solve(&image, &unary, [3, 5, 3], &zero_weight_params("MF")).unwrap();
        assert_eq!(solution.labeling.len(), 15);
        assert!(solution.labeling.iter().all(|&l| (l as usize) < labels));
    }

    let unary = vec![1.0f32; 2 * 15 + 1];
    let err = solve(&image, &unary, [3, 5, 3], &zero_weight_params("MF")).unwrap_err();
    assert_eq!(
        err,
        CrfError::Configuration(ConfigError::LabelCountMismatch {
            entries: 31,
            variables: 15
        })
    );
}

#[test]
fn test_bad_sizes_rejected() {
    let unary = vec![0.0f32; 8];
    let err = solve(&[0u8; 12], &unary, [0, 2, 3], &zero_weight_params("MF")).unwrap_err();
    assert!(matches!(
        err,
        CrfError::Configuration(ConfigError::InvalidGrid { rows: 0, cols: 2 })
    ));

    let err = solve(&[0u8; 11], &unary, [2, 2, 3], &zero_weight_params("MF")).unwrap_err();
    assert!(matches!(
        err,
        CrfError::Configuration(ConfigError::ImageSizeMismatch {
            expected: 12,
            actual: 11
        })
    ));
}

#[test]
fn test_overflowing_sizes_rejected() {
    let err = solve(&[], &[1.0], [usize::MAX, 2, 1], &zero_weight_params("MF")).unwrap_err();
    assert!(matches!(
        err,
        CrfError::Configuration(ConfigError::SizeOverflow { cols: 2, depth: 1, .. })
    ));

    let err = solve(&[], &[1.0], [1, usize::MAX / 2, 3], &zero_weight_params("TRWS")).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_infinite_threshold_gives_unary_argmin() {
    let image: Vec<u8> = (0..3 * 4 * 3).map(|i| (i * 53 % 256) as u8).collect();
    let unary: Vec<f32> = (0..12 * 3).map(|i| ((i * 11) % 7) as f32).collect();
    let params = Params::new()
        .with("solver", "TRWS")
        .with("min_pairwise_cost", f64::INFINITY)
        .with("iterations", 5i64);
    let solution = solve(&image, &unary, [3, 4, 3], &params).unwrap();

    let argmin: Vec<u32> = unary
        .chunks(3)
        .map(|c| {
            let mut best = 0;
            for (l, &v) in c.iter().enumerate() {
                if v < c[best] {
                    best = l;
                }
            }
            best as u32
        })
        .collect();
    assert_eq!(solution.labeling, argmin);
    assert_eq!(solution.stats.num_edges, 0);
    let unary_sum: f64 = argmin
        .iter()
        .enumerate()
        .map(|(i, &l)| f64::from(unary[i * 3 + l as usize]))
        .sum();
    assert!((solution.energy - unary_sum).abs() < 1e-9);
    assert!((solution.bound - unary_sum).abs() < 1e-9);
}

#[test]
fn test_options_from_host_values() {
    let image = vec![10u8; 2 * 3 * 3];
    let unary: Vec<f32> = (0..6).flat_map(|_| [0.0f32, 1.0]).collect();
    let params: Params = [
        ("solver", ParamValue::from("TRWS")),
        ("iterations", ParamValue::Float(4.0)),
        ("debug", ParamValue::Bool(true)),
        ("min_pairwise_cost", ParamValue::Int(0)),
        ("bilateral_r_stddev", ParamValue::Float(20.0)),
        ("not_an_option", ParamValue::Int(1)),
    ]
    .into_iter()
    .collect();
    let solution = solve(&image, &unary, [2, 3, 3], &params).unwrap();
    assert_eq!(solution.stats.iterations_run, 4);
    assert_eq!(solution.stats.num_edges, 15);
    assert_eq!(solution.stats.bound_trace.len(), 5);
    assert_eq!(solution.labeling, vec![0; 6]);
    assert_eq!(solution.labeling_as_f64(), vec![0.0; 6]);
    assert_eq!(
        solution.stats.final_state,
        SolverState::Trws(TrwsState::Converged)
    );
}

#[test]
fn test_wrong_option_type_is_configuration_error() {
    let image = vec![0u8; 4];
    let unary = vec![0.0f32; 8];
    let params = Params::new()
        .with("solver", "MF")
        .with("gaussian_weight", "heavy");
    let err = solve(&image, &unary, [2, 2, 1], &params).unwrap_err();
    assert!(matches!(
        err,
        CrfError::Configuration(ConfigError::WrongType { .. })
    ));
}
