//! Fully-connected mean-field inference.
//!
//! Every pixel keeps a distribution `Q_i` over labels. Starting from the
//! softmin of the unary costs, each iteration filters the current
//! distributions with the Gaussian and bilateral kernels over all other pixels
//! and renormalizes:
//!
//! ```text
//! Q_i(l) ∝ exp(-U_i(l) + sum_k w_k * t_i^k * sum_{j != i} K^k(i, j) s_j^k Q_j(l))
//! ```
//!
//! where `s` and `t` implement the [`NormalizationType`]. All pixels are
//! updated in parallel from a read-only snapshot of the previous iteration.
//! The filter is evaluated exactly, so an iteration costs `O(V^2 L)`.

use crate::config::{NormalizationType, SolveOptions};
use crate::cost::{lowest_unary_cost, KernelFeatures};
use crate::error::CrfError;
use crate::solver::{Problem, Solver, SolverOutput, SolverState, Termination};
use bumpalo::Bump;
use multiversion::multiversion;
use rayon::prelude::*;

/// Progress of a mean-field run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MeanFieldState {
    /// No distribution yet.
    Uninitialized,
    /// Distributions hold the softmin of the unary costs.
    Initialized,
    /// At least one update has been applied.
    Iterating,
    /// The tolerance criterion fired.
    Converged,
    /// The iteration budget is exhausted.
    MaxIterReached,
}

/// Mean-field solver ("MF").
pub struct MeanField;

impl Solver for MeanField {
    fn name(&self) -> &'static str {
        "MF"
    }

    fn solve(
        &self,
        arena: &Bump,
        problem: &Problem,
        options: &SolveOptions,
    ) -> Result<SolverOutput, CrfError> {
        let _span = tracing::info_span!(
            "mean_field",
            pixels = problem.num_pixels(),
            labels = problem.num_labels()
        )
        .entered();

        let mut inference = MeanFieldInference::new(arena, problem, options);
        inference.initialize();
        inference.run(options.iterations, options.tolerance);

        let labeling = inference.labeling();
        let termination = if inference.state() == MeanFieldState::Converged {
            Termination::Converged
        } else {
            Termination::MaxIterations
        };
        Ok(SolverOutput {
            energy: problem.energy().energy(&labeling),
            bound: lowest_unary_cost(&problem.unary),
            labeling,
            iterations_run: inference.iterations_run(),
            num_edges: 0,
            bound_trace: Vec::new(),
            termination,
            final_state: SolverState::MeanField(inference.state()),
        })
    }
}

/// Per-pixel scale factors implementing a normalization mode for one kernel.
struct KernelScaling<'a> {
    /// Applied to the source pixel `j`.
    source: &'a [f32],
    /// Applied to the filter response at pixel `i`.
    target: &'a [f32],
}

/// The mean-field state machine over one problem.
pub struct MeanFieldInference<'p, 'a> {
    problem: &'p Problem<'a>,
    num_labels: usize,
    features: KernelFeatures,
    gaussian_weight: f32,
    bilateral_weight: f32,
    gaussian_scaling: KernelScaling<'p>,
    bilateral_scaling: KernelScaling<'p>,
    q: &'p mut [f32],
    next: &'p mut [f32],
    state: MeanFieldState,
    iterations_run: usize,
}

impl<'p, 'a> MeanFieldInference<'p, 'a> {
    /// Allocate buffers and precompute the kernel normalization.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(arena: &'p Bump, problem: &'p Problem<'a>, options: &SolveOptions) -> Self {
        let n = problem.num_pixels();
        let l = problem.num_labels();
        let weights = problem.pairwise.weights();
        let features = problem.pairwise.features();
        let gaussian_weight = weights.gaussian_weight as f32;
        let bilateral_weight = weights.bilateral_weight as f32;

        let (gaussian_scaling, bilateral_scaling) = {
            let _span = tracing::debug_span!("kernel_normalization").entered();
            (
                scaling(
                    arena,
                    options.normalization,
                    gaussian_weight > 0.0,
                    &features.gaussian,
                ),
                scaling(
                    arena,
                    options.normalization,
                    bilateral_weight > 0.0,
                    &features.bilateral,
                ),
            )
        };

        Self {
            problem,
            num_labels: l,
            features,
            gaussian_weight,
            bilateral_weight,
            gaussian_scaling,
            bilateral_scaling,
            q: arena.alloc_slice_fill_copy(n * l, 0.0f32),
            next: arena.alloc_slice_fill_copy(n * l, 0.0f32),
            state: MeanFieldState::Uninitialized,
            iterations_run: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MeanFieldState {
        self.state
    }

    /// Number of updates applied so far.
    #[must_use]
    pub fn iterations_run(&self) -> usize {
        self.iterations_run
    }

    /// Current distribution of pixel `i`.
    #[must_use]
    pub fn distribution(&self, i: usize) -> &[f32] {
        &self.q[i * self.num_labels..(i + 1) * self.num_labels]
    }

    /// Set every distribution to the softmin of its unary costs.
    pub fn initialize(&mut self) {
        let unary = &self.problem.unary;
        self.q
            .par_chunks_mut(self.num_labels)
            .enumerate()
            .for_each(|(i, qi)| {
                for (q, &u) in qi.iter_mut().zip(unary.costs(i)) {
                    *q = -u;
                }
                softmax_in_place(qi);
            });
        self.state = MeanFieldState::Initialized;
        self.iterations_run = 0;
    }

    /// Apply one parallel update; returns the largest probability change.
    ///
    /// # Panics
    /// Panics if called before [`MeanFieldInference::initialize`].
    pub fn step(&mut self) -> f32 {
        assert!(
            self.state != MeanFieldState::Uninitialized,
            "mean-field step before initialization"
        );
        let n = self.problem.num_pixels();
        let l = self.num_labels;
        let unary = &self.problem.unary;
        let q = &*self.q;
        let feats = &self.features;
        let (wg, wb) = (self.gaussian_weight, self.bilateral_weight);
        let (gs, bs) = (&self.gaussian_scaling, &self.bilateral_scaling);

        let max_change = self
            .next
            .par_chunks_mut(l)
            .enumerate()
            .map_init(
                || (vec![0.0f32; n], vec![0.0f32; l]),
                |(row, msg), (i, out)| {
                    // Combined, normalized kernel row of pixel i.
                    let tg = wg * gs.target[i];
                    let tb = wb * bs.target[i];
                    for (j, r) in row.iter_mut().enumerate() {
                        let mut k = 0.0;
                        if tg > 0.0 {
                            k += tg
                                * gs.source[j]
                                * kernel(&feats.gaussian[i], &feats.gaussian[j]);
                        }
                        if tb > 0.0 {
                            k += tb
                                * bs.source[j]
                                * kernel(&feats.bilateral[i], &feats.bilateral[j]);
                        }
                        *r = k;
                    }
                    row[i] = 0.0;

                    weighted_label_sum(row, q, msg);

                    for ((o, &m), &u) in out.iter_mut().zip(msg.iter()).zip(unary.costs(i)) {
                        *o = m - u;
                    }
                    softmax_in_place(out);

                    out.iter()
                        .zip(&q[i * l..(i + 1) * l])
                        .fold(0.0f32, |acc, (a, b)| acc.max((a - b).abs()))
                },
            )
            .reduce(|| 0.0f32, f32::max);

        std::mem::swap(&mut self.q, &mut self.next);
        self.iterations_run += 1;
        self.state = MeanFieldState::Iterating;
        max_change
    }

    /// Iterate up to `iterations` times, stopping early once the largest
    /// probability change drops below `tolerance` (if given).
    pub fn run(&mut self, iterations: usize, tolerance: Option<f64>) {
        for _ in 0..iterations {
            let change = self.step();
            tracing::trace!(
                iteration = self.iterations_run,
                max_change = change,
                "mean-field update"
            );
            if tolerance.is_some_and(|tol| f64::from(change) < tol) {
                self.state = MeanFieldState::Converged;
                return;
            }
        }
        self.state = MeanFieldState::MaxIterReached;
    }

    /// Most probable label of each pixel (ties resolve to the lowest label).
    ///
    /// Before any update this is exactly the per-pixel unary argmin.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn labeling(&self) -> Vec<u32> {
        let unary = &self.problem.unary;
        if self.iterations_run == 0 {
            return (0..self.problem.num_pixels())
                .map(|i| unary.argmin(i))
                .collect();
        }
        self.q
            .chunks(self.num_labels)
            .map(|qi| {
                // first maximum wins ties
                let mut best = 0;
                for (l, &p) in qi.iter().enumerate() {
                    if p > qi[best] {
                        best = l;
                    }
                }
                best as u32
            })
            .collect()
    }
}

/// `exp(-0.5 * |a - b|^2)`.
#[inline(always)]
fn kernel<const D: usize>(a: &[f32; D], b: &[f32; D]) -> f32 {
    let mut d2 = 0.0f32;
    for k in 0..D {
        let d = a[k] - b[k];
        d2 += d * d;
    }
    (-0.5 * d2).exp()
}

/// Source/target scale factors of one kernel for the given normalization.
fn scaling<'b, const D: usize>(
    arena: &'b Bump,
    normalization: NormalizationType,
    active: bool,
    features: &[[f32; D]],
) -> KernelScaling<'b> {
    let n = features.len();
    let source = arena.alloc_slice_fill_copy(n, 1.0f32);
    let target = arena.alloc_slice_fill_copy(n, 1.0f32);
    if !active || normalization == NormalizationType::None {
        return KernelScaling { source, target };
    }

    // D_i = sum_{j != i} K(i, j)
    let degree: Vec<f32> = (0..n)
        .into_par_iter()
        .map(|i| {
            let fi = &features[i];
            features
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, fj)| kernel(fi, fj))
                .sum::<f32>()
        })
        .collect();

    let inv = |d: f32| if d > 0.0 { 1.0 / d } else { 0.0 };
    let inv_sqrt = |d: f32| if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 };
    for ((s, t), &d) in source.iter_mut().zip(target.iter_mut()).zip(&degree) {
        match normalization {
            NormalizationType::None => {}
            NormalizationType::Before => *s = inv(d),
            NormalizationType::After => *t = inv(d),
            NormalizationType::Symmetric => {
                *s = inv_sqrt(d);
                *t = inv_sqrt(d);
            }
        }
    }
    KernelScaling { source, target }
}

/// `out[l] = sum_j row[j] * q[j * L + l]` with `L = out.len()`.
#[multiversion(targets(
    "x86_64+avx2+fma",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn weighted_label_sum(row: &[f32], q: &[f32], out: &mut [f32]) {
    let l = out.len();
    out.fill(0.0);
    for (&w, qj) in row.iter().zip(q.chunks_exact(l)) {
        if w == 0.0 {
            continue;
        }
        for (o, &p) in out.iter_mut().zip(qj) {
            *o += w * p;
        }
    }
}

/// Replace `values` by `softmax(values)`.
fn softmax_in_place(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in values.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in values.iter_mut() {
        *v /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PairwiseWeights;
    use crate::image::ImageView;

    fn problem<'a>(
        image: &'a [u8],
        unary: &'a [f32],
        rows: usize,
        cols: usize,
        weights: PairwiseWeights,
    ) -> Problem<'a> {
        let img = ImageView::new(image, rows, cols, 3).unwrap();
        Problem::new(img, unary, weights).unwrap()
    }

    #[test]
    fn test_softmax_normalizes() {
        let mut v = [1.0f32, 2.0, 3.0];
        softmax_in_place(&mut v);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(v[2] > v[1] && v[1] > v[0]);
    }

    #[test]
    fn test_state_transitions() {
        let image = vec![0u8; 2 * 2 * 3];
        let unary = vec![0.0f32, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        let p = problem(&image, &unary, 2, 2, PairwiseWeights::default());
        let arena = Bump::new();
        let options = SolveOptions::default();

        let mut mf = MeanFieldInference::new(&arena, &p, &options);
        assert_eq!(mf.state(), MeanFieldState::Uninitialized);
        mf.initialize();
        assert_eq!(mf.state(), MeanFieldState::Initialized);
        let sum: f32 = mf.distribution(0).iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        mf.step();
        assert_eq!(mf.state(), MeanFieldState::Iterating);
        mf.run(3, None);
        assert_eq!(mf.state(), MeanFieldState::MaxIterReached);
        assert_eq!(mf.iterations_run(), 4);
    }

    #[test]
    fn test_zero_iterations_is_unary_argmin() {
        let image: Vec<u8> = (0..3 * 3 * 3).map(|i| (i * 29 % 256) as u8).collect();
        let unary: Vec<f32> = (0..9 * 3).map(|i| ((i * 7) % 5) as f32).collect();
        let p = problem(&image, &unary, 3, 3, PairwiseWeights::default());
        let arena = Bump::new();
        let options = SolveOptions::builder().iterations(0).build();

        let out = MeanField.solve(&arena, &p, &options).unwrap();
        let expected: Vec<u32> = (0..9).map(|i| p.unary.argmin(i)).collect();
        assert_eq!(out.labeling, expected);
        assert_eq!(out.iterations_run, 0);
    }

    #[test]
    fn test_smoothing_flips_outlier() {
        // 3x3 uniform image; every pixel prefers label 0 except the center,
        // which weakly prefers label 1. Strong smoothing pulls it back.
        let image = vec![128u8; 3 * 3 * 3];
        let mut unary = Vec::new();
        for i in 0..9 {
            if i == 4 {
                unary.extend_from_slice(&[0.6f32, 0.4]);
            } else {
                unary.extend_from_slice(&[0.0f32, 2.0]);
            }
        }
        let weights = PairwiseWeights {
            gaussian_weight: 5.0,
            bilateral_weight: 5.0,
            ..PairwiseWeights::default()
        };
        let p = problem(&image, &unary, 3, 3, weights);
        let arena = Bump::new();
        let options = SolveOptions::builder()
            .normalization(NormalizationType::None)
            .iterations(5)
            .build();
        let out = MeanField.solve(&arena, &p, &options).unwrap();
        assert_eq!(out.labeling, vec![0; 9]);
    }

    #[test]
    fn test_tolerance_stops_early() {
        let image = vec![0u8; 4 * 4 * 3];
        let unary: Vec<f32> = (0..16).flat_map(|_| [0.0f32, 3.0]).collect();
        let p = problem(&image, &unary, 4, 4, PairwiseWeights::default());
        let arena = Bump::new();
        let options = SolveOptions::builder()
            .iterations(50)
            .tolerance(1e-3)
            .build();
        let out = MeanField.solve(&arena, &p, &options).unwrap();
        assert_eq!(out.termination, Termination::Converged);
        assert!(out.iterations_run < 50);
    }

    #[test]
    fn test_normalization_modes_agree_on_easy_problem() {
        let image = vec![10u8; 3 * 4 * 3];
        let unary: Vec<f32> = (0..12)
            .flat_map(|i| if i < 6 { [0.0f32, 4.0] } else { [4.0, 0.0] })
            .collect();
        let p = problem(&image, &unary, 3, 4, PairwiseWeights::default());
        for normalization in [
            NormalizationType::None,
            NormalizationType::Before,
            NormalizationType::After,
            NormalizationType::Symmetric,
        ] {
            let arena = Bump::new();
            let options = SolveOptions::builder().normalization(normalization).build();
            let out = MeanField.solve(&arena, &p, &options).unwrap();
            assert!(out.labeling.iter().all(|&x| x < 2));
            assert!(out.bound <= out.energy);
        }
    }

    #[test]
    fn test_weighted_label_sum() {
        let row = [1.0f32, 0.0, 2.0];
        let q = [0.5f32, 0.5, 0.9, 0.1, 0.25, 0.75];
        let mut out = [0.0f32; 2];
        weighted_label_sum(&row, &q, &mut out);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[1] - 2.0).abs() < 1e-6);
    }
}
