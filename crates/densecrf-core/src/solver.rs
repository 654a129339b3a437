//! The solver capability shared by mean-field and TRW-S.
//!
//! Both algorithms consume the same [`Problem`] (image, unary and pairwise
//! oracles) and produce a [`SolverOutput`]; they differ only in how they
//! optimize. The concrete solver is selected from [`SolverKind`].

use crate::config::{PairwiseWeights, SolveOptions, SolverKind};
use crate::cost::{EnergyFunctor, PairwiseCost, UnaryCost};
use crate::error::{ConfigError, CrfError};
use crate::image::ImageView;
use crate::mean_field::MeanFieldState;
use crate::trws::TrwsState;
use bumpalo::Bump;

/// A validated inference problem: borrowed inputs plus the cost oracles built on them.
pub struct Problem<'a> {
    /// The image the pairwise kernels are evaluated on.
    pub image: ImageView<'a>,
    /// Unary cost oracle.
    pub unary: UnaryCost<'a>,
    /// Pairwise cost oracle.
    pub pairwise: PairwiseCost<'a>,
}

impl<'a> Problem<'a> {
    /// Build the oracles, checking that the unary table matches the image grid.
    pub fn new(
        image: ImageView<'a>,
        unary: &'a [f32],
        weights: PairwiseWeights,
    ) -> Result<Self, ConfigError> {
        weights.validate()?;
        let unary = UnaryCost::new(unary, image.rows, image.cols)?;
        Ok(Self {
            image,
            unary,
            pairwise: PairwiseCost::new(image, weights),
        })
    }

    /// Number of pixels (graph nodes).
    #[must_use]
    pub fn num_pixels(&self) -> usize {
        self.image.num_pixels()
    }

    /// Number of labels.
    #[must_use]
    pub fn num_labels(&self) -> usize {
        self.unary.num_labels()
    }

    /// Energy evaluator over all pixel pairs.
    #[must_use]
    pub fn energy(&self) -> EnergyFunctor<'a, '_> {
        EnergyFunctor::new(&self.unary, &self.pairwise)
    }
}

/// Why the iteration loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// The iteration budget was used up.
    #[default]
    MaxIterations,
    /// The optional tolerance criterion fired before the budget ran out.
    Converged,
}

/// Final state of the solver's state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SolverState {
    /// Mean-field distribution state.
    MeanField(MeanFieldState),
    /// TRW-S message-passing state.
    Trws(TrwsState),
}

impl Default for SolverState {
    fn default() -> Self {
        Self::MeanField(MeanFieldState::Uninitialized)
    }
}

/// Raw result of a solver run.
#[derive(Clone, Debug, Default)]
pub struct SolverOutput {
    /// One label per pixel.
    pub labeling: Vec<u32>,
    /// Energy of `labeling`.
    pub energy: f64,
    /// Lower bound on the optimal energy.
    pub bound: f64,
    /// Iterations (sweeps) actually performed.
    pub iterations_run: usize,
    /// Edges in the explicit graph (0 for mean-field, which never builds one).
    pub num_edges: usize,
    /// Bound after each sweep, starting with the bound before the first sweep (TRW-S only).
    pub bound_trace: Vec<f64>,
    /// Why iteration stopped.
    pub termination: Termination,
    /// State the solver finished in.
    pub final_state: SolverState,
}

/// An inference algorithm over a [`Problem`].
pub trait Solver: Send + Sync {
    /// Name used in option maps ("MF", "TRWS").
    fn name(&self) -> &'static str;

    /// Run inference. Scratch buffers are allocated from `arena`.
    fn solve(
        &self,
        arena: &Bump,
        problem: &Problem,
        options: &SolveOptions,
    ) -> Result<SolverOutput, CrfError>;
}

/// Returns the solver implementing `kind`.
#[must_use]
pub fn solver_for(kind: SolverKind) -> Box<dyn Solver> {
    match kind {
        SolverKind::MeanField => Box::new(crate::mean_field::MeanField),
        SolverKind::Trws => Box::new(crate::trws::Trws),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solver_for_names() {
        assert_eq!(solver_for(SolverKind::MeanField).name(), "MF");
        assert_eq!(solver_for(SolverKind::Trws).name(), "TRWS");
    }

    #[test]
    fn test_problem_rejects_mismatched_unary() {
        let data = vec![0u8; 2 * 2 * 3];
        let img = ImageView::new(&data, 2, 2, 3).unwrap();
        let unary = vec![0.0f32; 9];
        assert!(matches!(
            Problem::new(img, &unary, PairwiseWeights::default()),
            Err(ConfigError::LabelCountMismatch {
                entries: 9,
                variables: 4
            })
        ));
    }
}
