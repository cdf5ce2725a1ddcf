//! Monte Carlo rollouts (random game simulation).
//!
//! [`RolloutEvaluator`] is the model-free [`Evaluator`]: priors favour
//! captures by the value of the captured piece, and the value comes from a
//! short random playout. It stands in for a trained network when none is
//! available and keeps self-play runnable offline.

use tracing::trace;

use crate::board::{Board, PieceKind, Side};
use crate::constants::{MATERIAL_SCALE, PRIOR_CAPTURE, PRIOR_EVEN, ROLLOUT_DEPTH};
use crate::error::EvaluationError;
use crate::evaluator::{Evaluation, Evaluator, normalize};
use crate::movegen::{Action, captured_by, legal_moves_for_side};

pub struct RolloutEvaluator {
    rng: fastrand::Rng,
    depth: usize,
}

impl RolloutEvaluator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            depth: ROLLOUT_DEPTH,
        }
    }

    /// Maximum number of plies per playout.
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }
}

impl Evaluator for RolloutEvaluator {
    fn evaluate(
        &mut self,
        board: &Board,
        actions: &[Action],
    ) -> Result<Evaluation, EvaluationError> {
        let priors = capture_priors(board, actions);
        let value = rollout(board, self.depth, &mut self.rng);
        trace!(actions = actions.len(), value, "rollout");
        Ok(Evaluation { priors, value })
    }
}

/// Prior weights: every move gets [`PRIOR_EVEN`], plus [`PRIOR_CAPTURE`]
/// per point of captured material. Normalised.
pub fn capture_priors(board: &Board, actions: &[Action]) -> Vec<f64> {
    let mut priors: Vec<f64> = actions
        .iter()
        .map(|a| {
            let gain = captured_by(board, a).map_or(0, |p| p.kind.capture_value());
            PRIOR_EVEN + PRIOR_CAPTURE * gain as f64
        })
        .collect();
    normalize(&mut priors);
    priors
}

/// Play up to `depth` random plies from `board` and score the result for
/// the side to move at the start.
///
/// Taking a king scores 1 for the taker, a draw scores 0, and an
/// unfinished playout scores the material balance scaled by
/// [`MATERIAL_SCALE`] into `[-1, 1]`. A side without moves passes.
pub fn rollout(board: &Board, depth: usize, rng: &mut fastrand::Rng) -> f64 {
    let mut board = board.clone();
    let mut sign = 1.0;

    for _ in 0..depth {
        let actions = legal_moves_for_side(&board, Side::Ours);
        if !actions.is_empty() {
            let action = actions[rng.usize(..actions.len())];
            let captured = board.move_piece(action.from, action.to);
            if captured.is_some_and(|p| p.kind == PieceKind::King) {
                return sign;
            }
            if board.is_draw() {
                return 0.0;
            }
        }
        board = board.mirrored();
        sign = -sign;
    }

    let balance = board.material(Side::Ours) as f64 - board.material(Side::Theirs) as f64;
    sign * (balance / MATERIAL_SCALE).clamp(-1.0, 1.0)
}
