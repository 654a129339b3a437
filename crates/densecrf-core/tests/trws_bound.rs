#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use densecrf_core::solver::Problem;
use densecrf_core::test_utils::brute_force_minimum;
use densecrf_core::trws::{PottsGraph, TrwsEngine};
use densecrf_core::{CrfSolver, ImageView, PairwiseWeights, SolveOptions, SolverKind};
use bumpalo::Bump;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn random_weights(rng: &mut ChaCha8Rng) -> PairwiseWeights {
    PairwiseWeights {
        gaussian_x_stddev: rng.gen_range(0.5..4.0),
        gaussian_y_stddev: rng.gen_range(0.5..4.0),
        gaussian_weight: rng.gen_range(0.0..3.0),
        bilateral_x_stddev: rng.gen_range(1.0..10.0),
        bilateral_y_stddev: rng.gen_range(1.0..10.0),
        bilateral_r_stddev: rng.gen_range(5.0..60.0),
        bilateral_g_stddev: rng.gen_range(5.0..60.0),
        bilateral_b_stddev: rng.gen_range(5.0..60.0),
        bilateral_weight: rng.gen_range(0.0..5.0),
    }
}

fn chain_weights() -> PairwiseWeights {
    // Horizontal neighbors cost ~1.82, everything else < 0.5.
    PairwiseWeights {
        gaussian_x_stddev: 1.0,
        gaussian_y_stddev: 0.1,
        gaussian_weight: 3.0,
        bilateral_weight: 0.0,
        ..PairwiseWeights::default()
    }
}

#[test]
fn test_bound_never_exceeds_energy_on_random_grids() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..25 {
        let rows = rng.gen_range(1..4);
        let cols = rng.gen_range(1..4);
        let labels = rng.gen_range(2..4);
        let image: Vec<u8> = (0..rows * cols * 3).map(|_| rng.gen()).collect();
        let unary: Vec<f32> = (0..rows * cols * labels)
            .map(|_| rng.gen_range(0.0..5.0))
            .collect();
        let threshold = if rng.gen_bool(0.5) {
            0.0
        } else {
            rng.gen_range(0.0..2.0)
        };
        let options = SolveOptions::builder()
            .solver(SolverKind::Trws)
            .iterations(rng.gen_range(0..8))
            .min_pairwise_cost(threshold)
            .weights(random_weights(&mut rng))
            .build();

        let view = ImageView::new(&image, rows, cols, 3).unwrap();
        let solution = CrfSolver::with_options(options)
            .solve(&view, &unary)
            .unwrap();
        let slack = 1e-9 * solution.energy.abs().max(1.0);
        assert!(
            solution.bound <= solution.energy + slack,
            "bound {} above energy {}",
            solution.bound,
            solution.energy
        );

        let problem = Problem::new(view, &unary, options.weights).unwrap();
        let energy = problem.energy().with_min_pairwise_cost(threshold);
        let (optimum, _) = brute_force_minimum(&energy, rows * cols, labels);
        assert!(solution.bound <= optimum + slack);
        assert!(optimum <= solution.energy + slack);
    }
}

#[test]
fn test_bound_trace_is_non_decreasing() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    for _ in 0..10 {
        let image: Vec<u8> = (0..4 * 4 * 3).map(|_| rng.gen()).collect();
        let unary: Vec<f32> = (0..16 * 3).map(|_| rng.gen_range(0.0..3.0)).collect();
        let options = SolveOptions::builder()
            .solver(SolverKind::Trws)
            .iterations(6)
            .weights(random_weights(&mut rng))
            .build();
        let view = ImageView::new(&image, 4, 4, 3).unwrap();
        let solution = CrfSolver::with_options(options)
            .solve(&view, &unary)
            .unwrap();

        let trace = &solution.stats.bound_trace;
        assert_eq!(trace.len(), 7);
        assert!(trace.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*trace.last().unwrap(), solution.bound);
    }
}

#[test]
fn test_zero_iterations_reports_initial_bound() {
    let image = vec![120u8; 3 * 3 * 3];
    let unary: Vec<f32> = (0..9).flat_map(|i| [i as f32 * 0.25, 1.0]).collect();
    let base = SolveOptions::builder().solver(SolverKind::Trws);
    let view = ImageView::new(&image, 3, 3, 3).unwrap();

    let initial = CrfSolver::with_options(base.iterations(0).build())
        .solve(&view, &unary)
        .unwrap();
    assert_eq!(initial.stats.iterations_run, 0);
    assert_eq!(initial.stats.bound_trace.len(), 1);

    let later = CrfSolver::with_options(
        SolveOptions::builder()
            .solver(SolverKind::Trws)
            .iterations(5)
            .build(),
    )
    .solve(&view, &unary)
    .unwrap();
    assert!(initial.bound <= later.bound);
    assert!(later.bound <= later.energy + 1e-9);
}

#[test]
fn test_forest_is_solved_exactly() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let (rows, cols, labels) = (3, 4, 2);
    let image = vec![0u8; rows * cols];
    for _ in 0..5 {
        let unary: Vec<f32> = (0..rows * cols * labels)
            .map(|_| rng.gen_range(0.0..4.0))
            .collect();
        let view = ImageView::new(&image, rows, cols, 1).unwrap();
        let problem = Problem::new(view, &unary, chain_weights()).unwrap();

        let graph = PottsGraph::build(&problem, 1.0).unwrap();
        assert_eq!(graph.num_edges(), rows * (cols - 1));
        assert_eq!(graph.num_chains(), rows);

        let arena = Bump::new();
        let mut engine = TrwsEngine::new(&arena, &problem, &graph);
        let run = engine.run(2, None).unwrap();
        let labeling = engine.labeling();

        let energy = problem.energy().with_min_pairwise_cost(1.0);
        let (optimum, _) = brute_force_minimum(&energy, rows * cols, labels);
        let bound = *run.bound_trace.last().unwrap();
        assert!((energy.energy(&labeling) - optimum).abs() < 1e-9);
        assert!((bound - optimum).abs() < 1e-9);
    }
}
