//! Position evaluators consumed by the search.

use crate::board::Board;
use crate::error::EvaluationError;
use crate::movegen::Action;

/// Output of an evaluator: one prior per legal action, in the order given,
/// and the value of the position for the player to move, in `[-1, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub priors: Vec<f64>,
    pub value: f64,
}

impl Evaluation {
    pub fn uniform(n: usize, value: f64) -> Self {
        let p = if n == 0 { 0.0 } else { 1.0 / n as f64 };
        Self {
            priors: vec![p; n],
            value,
        }
    }
}

/// Maps a position to action priors and a value estimate.
///
/// Implementations may block on a remote model; no timeout is imposed here.
pub trait Evaluator {
    fn evaluate(
        &mut self,
        board: &Board,
        actions: &[Action],
    ) -> Result<Evaluation, EvaluationError>;
}

impl<E: Evaluator + ?Sized> Evaluator for Box<E> {
    fn evaluate(
        &mut self,
        board: &Board,
        actions: &[Action],
    ) -> Result<Evaluation, EvaluationError> {
        (**self).evaluate(board, actions)
    }
}

/// Uniform priors and a constant value.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformEvaluator {
    pub value: f64,
}

impl Evaluator for UniformEvaluator {
    fn evaluate(
        &mut self,
        _board: &Board,
        actions: &[Action],
    ) -> Result<Evaluation, EvaluationError> {
        Ok(Evaluation::uniform(actions.len(), self.value))
    }
}

/// Normalise non-negative weights into a distribution; all-zero weights
/// become uniform.
pub fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter_mut().for_each(|w| *w /= total);
    } else if !weights.is_empty() {
        let p = 1.0 / weights.len() as f64;
        weights.iter_mut().for_each(|w| *w = p);
    }
}
