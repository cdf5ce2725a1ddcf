//! The game engine.
//!
//! An [`Environment`] owns the transposition cache (state key to board,
//! legal actions, and color to move) and the state-link cache (key and
//! action index to transition). Both grow for the lifetime of the instance;
//! separate instances share nothing, so episodes can run side by side.
//!
//! Transitions always hand back the board mirrored for the next mover.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::board::{Board, Color, Formation, PieceKind, Side};
use crate::codec::{self, StateKey};
use crate::constants::POLICY_SIZE;
use crate::error::{Error, Result};
use crate::movegen::{Action, legal_moves_for_side};
use crate::persistence::{NoPersistence, StateIndex};

/// Memoised position: created on first visit and never changed.
#[derive(Clone, Debug)]
pub struct PositionEntry {
    pub board: Board,
    pub actions: Vec<Action>,
    pub side: Color,
}

impl PositionEntry {
    fn new(board: Board, side: Color) -> Self {
        let actions = legal_moves_for_side(&board, Side::Ours);
        Self {
            board,
            actions,
            side,
        }
    }
}

/// Result of applying one action to a cached position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    /// Key of the resulting position, seen by the next mover.
    pub next: StateKey,
    /// Capture value of the taken piece, 0 for a quiet move.
    pub reward: u32,
    pub captured: Option<PieceKind>,
    /// The king was taken or the position is a draw.
    pub done: bool,
    pub is_draw: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub winner: Option<Color>,
    pub is_draw: bool,
}

/// Result of [`Environment::step`]. `next` is `None` when the action was
/// rejected and the current position is unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutcome {
    pub next: Option<StateKey>,
    pub reward: u32,
    pub done: bool,
    pub info: StepInfo,
}

impl StepOutcome {
    fn rejected() -> Self {
        Self {
            next: None,
            reward: 0,
            done: false,
            info: StepInfo::default(),
        }
    }
}

/// Opening and bookkeeping options for an [`Environment`].
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvConfig {
    /// Blue's formation; random on each reset when `None`.
    pub blue: Option<Formation>,
    /// Red's formation; random on each reset when `None`.
    pub red: Option<Formation>,
    pub seed: Option<u64>,
    /// Report every position reached by [`Environment::step`] to the state index.
    pub record_states: bool,
}

impl EnvConfig {
    pub fn with_formations(mut self, blue: Formation, red: Formation) -> Self {
        self.blue = Some(blue);
        self.red = Some(red);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn recording_states(mut self, record: bool) -> Self {
        self.record_states = record;
        self
    }
}

pub struct Environment {
    config: EnvConfig,
    rng: fastrand::Rng,
    positions: HashMap<StateKey, PositionEntry>,
    links: HashMap<StateKey, HashMap<usize, Transition>>,
    index: Box<dyn StateIndex>,
    current: StateKey,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(EnvConfig::default())
    }
}

impl Environment {
    /// Create an environment already reset to an opening position.
    pub fn new(config: EnvConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        let placeholder = codec::encode(&Board::empty(), Color::Blue);
        let mut env = Self {
            config,
            rng,
            positions: HashMap::new(),
            links: HashMap::new(),
            index: Box::new(NoPersistence),
            current: placeholder,
        };
        env.reset();
        env
    }

    /// Replace the state index used when `record_states` is on.
    pub fn with_state_index(mut self, index: Box<dyn StateIndex>) -> Self {
        self.index = index;
        self
    }

    /// Start a new game from an opening position. Blue moves first.
    pub fn reset(&mut self) -> StateKey {
        let blue = self
            .config
            .blue
            .unwrap_or_else(|| Formation::random(&mut self.rng));
        let red = self
            .config
            .red
            .unwrap_or_else(|| Formation::random(&mut self.rng));
        debug!(?blue, ?red, "reset");
        let key = self.load_position(Board::initial(blue, red), Color::Blue);
        self.record(&key);
        key
    }

    /// Make `board`, seen by `to_move`, the current position.
    pub fn load_position(&mut self, board: Board, to_move: Color) -> StateKey {
        let key = self.insert_position(board, to_move);
        self.current = key.clone();
        key
    }

    fn insert_position(&mut self, board: Board, to_move: Color) -> StateKey {
        let key = codec::encode(&board, to_move);
        if let Entry::Vacant(slot) = self.positions.entry(key.clone()) {
            slot.insert(PositionEntry::new(board, to_move));
        }
        key
    }

    fn record(&mut self, key: &StateKey) {
        if !self.config.record_states {
            return;
        }
        if let Err(e) = self.index.insert_if_absent(key) {
            warn!(error = %e, "failed to record state");
        }
    }

    /// The cached entry for `key`, generated on first request.
    pub fn position(&mut self, key: &StateKey) -> Result<&PositionEntry> {
        let entry = match self.positions.entry(key.clone()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let (board, side) = codec::decode(key.as_str())?;
                slot.insert(PositionEntry::new(board, side))
            }
        };
        Ok(entry)
    }

    pub fn get_legal_actions(&mut self, key: &StateKey) -> Result<&[Action]> {
        Ok(&self.position(key)?.actions)
    }

    /// Apply the action at `index` in `key`'s legal action list.
    ///
    /// # Errors
    /// - [`Error::NoLegalAction`] if the mover has no legal action (use [`Environment::pass`])
    /// - [`Error::InvalidAction`] if `index` is out of range
    pub fn apply(&mut self, key: &StateKey, index: usize) -> Result<Transition> {
        if let Some(known) = self.links.get(key).and_then(|out| out.get(&index)) {
            return Ok(known.clone());
        }

        let entry = self.position(key)?;
        if entry.actions.is_empty() {
            return Err(Error::NoLegalAction);
        }
        let action = *entry.actions.get(index).ok_or(Error::InvalidAction {
            index,
            len: entry.actions.len(),
        })?;
        let mut board = entry.board.clone();
        let side = entry.side;

        let captured = board.move_piece(action.from, action.to).map(|p| p.kind);
        let reward = captured.map_or(0, PieceKind::capture_value);
        let is_draw = board.is_draw();
        let done = captured == Some(PieceKind::King) || is_draw;

        let next = self.insert_position(board.mirrored(), side.opposite());
        let transition = Transition {
            next,
            reward,
            captured,
            done,
            is_draw,
        };
        self.links
            .entry(key.clone())
            .or_default()
            .insert(index, transition.clone());
        Ok(transition)
    }

    /// Hand the move to the opponent without moving a piece.
    pub fn pass(&mut self, key: &StateKey) -> Result<StateKey> {
        let entry = self.position(key)?;
        let board = entry.board.mirrored();
        let side = entry.side.opposite();
        Ok(self.insert_position(board, side))
    }

    /// Target of a previously applied transition, if cached.
    pub fn link(&self, key: &StateKey, index: usize) -> Option<&StateKey> {
        self.links.get(key)?.get(&index).map(|t| &t.next)
    }

    pub fn cached_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn cached_links(&self) -> usize {
        self.links.values().map(HashMap::len).sum()
    }

    // =========================================================================
    // Episode interface
    // =========================================================================

    pub fn current(&self) -> &StateKey {
        &self.current
    }

    /// Color to move in the current position.
    pub fn turn(&self) -> Color {
        self.current.to_move()
    }

    pub fn next_turn(&self) -> Color {
        self.turn().opposite()
    }

    /// Legal actions of the current position.
    pub fn get_all_actions(&mut self) -> Result<Vec<Action>> {
        let key = self.current.clone();
        Ok(self.get_legal_actions(&key)?.to_vec())
    }

    /// Play `action` in the current position, or pass with `None`.
    ///
    /// An action that is not legal here is rejected: `next` is `None` and
    /// nothing changes. If the mover has no legal action at all, any request
    /// becomes a pass.
    pub fn step(&mut self, action: Option<&Action>) -> Result<StepOutcome> {
        let key = self.current.clone();
        let mover = key.to_move();

        let index = match action {
            None => None,
            Some(action) => {
                let actions = self.get_legal_actions(&key)?;
                if actions.is_empty() {
                    None
                } else {
                    match actions.iter().position(|a| a.same_squares(action)) {
                        Some(index) => Some(index),
                        None => {
                            warn!(%action, key = %key, "rejected illegal action");
                            return Ok(StepOutcome::rejected());
                        }
                    }
                }
            }
        };

        let Some(index) = index else {
            let next = self.pass(&key)?;
            debug!(%mover, "pass");
            self.current = next.clone();
            self.record(&next);
            return Ok(StepOutcome {
                next: Some(next),
                reward: 0,
                done: false,
                info: StepInfo::default(),
            });
        };

        let transition = self.apply(&key, index)?;
        self.current = transition.next.clone();
        self.record(&transition.next);

        let winner = (transition.captured == Some(PieceKind::King)).then_some(mover);
        Ok(StepOutcome {
            next: Some(transition.next),
            reward: transition.reward,
            done: transition.done,
            info: StepInfo {
                winner,
                is_draw: transition.is_draw,
            },
        })
    }

    /// Scatter per-action probabilities into the fixed-size policy vector
    /// indexed by [`Action::policy_index`].
    pub fn convert_action_probs_to_policy_probs(actions: &[Action], probs: &[f64]) -> Vec<f32> {
        let mut policy = vec![0.0f32; POLICY_SIZE];
        for (action, &p) in actions.iter().zip(probs) {
            policy[action.policy_index()] += p as f32;
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::board::{Piece, Square};
    use crate::error::PersistenceError;

    fn fixed() -> Environment {
        Environment::new(
            EnvConfig::default()
                .with_formations(Formation::MaSangMaSang, Formation::SangMaMaSang)
                .with_seed(7),
        )
    }

    fn kings_and_guards() -> Board {
        let mut board = Board::empty();
        board.place(Square::new(4, 8), Piece::ours(PieceKind::King));
        board.place(Square::new(4, 1), Piece::theirs(PieceKind::King));
        board.place(Square::new(3, 9), Piece::ours(PieceKind::Guard));
        board.place(Square::new(5, 0), Piece::theirs(PieceKind::Guard));
        board
    }

    #[test]
    fn test_reset_opening() {
        let mut env = fixed();
        let key = env.current().clone();
        assert_eq!(key.to_move(), Color::Blue);
        assert_eq!(env.get_legal_actions(&key).unwrap().len(), 31);
        assert_eq!(env.cached_positions(), 1);
    }

    #[test]
    fn test_random_formations_are_seeded() {
        let a = Environment::new(EnvConfig::default().with_seed(11));
        let b = Environment::new(EnvConfig::default().with_seed(11));
        assert_eq!(a.current(), b.current());
    }

    #[test]
    fn test_apply_quiet_move_mirrors() {
        let mut env = fixed();
        let key = env.current().clone();
        let action = env.get_legal_actions(&key).unwrap()[0];
        let t = env.apply(&key, 0).unwrap();
        assert_eq!(t.reward, 0);
        assert!(!t.done);
        assert_eq!(t.next.to_move(), Color::Red);

        let before = key.board().unwrap();
        let after = t.next.board().unwrap().mirrored();
        assert_eq!(after.get(action.to).map(|p| p.kind), Some(action.kind));
        assert!(after.is_empty_at(action.from));
        assert_eq!(after.piece_count(), before.piece_count());
    }

    #[test]
    fn test_apply_caches_link() {
        let mut env = fixed();
        let key = env.current().clone();
        let first = env.apply(&key, 3).unwrap();
        let positions = env.cached_positions();
        let second = env.apply(&key, 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(env.cached_positions(), positions);
        assert_eq!(env.link(&key, 3), Some(&first.next));
        assert_eq!(env.cached_links(), 1);
    }

    #[test]
    fn test_apply_out_of_range() {
        let mut env = fixed();
        let key = env.current().clone();
        let err = env.apply(&key, 31).unwrap_err();
        assert_eq!(err, Error::InvalidAction { index: 31, len: 31 });
    }

    #[test]
    fn test_capture_reward_and_king_capture() {
        let mut board = kings_and_guards();
        board.place(Square::new(4, 5), Piece::ours(PieceKind::Chariot));
        board.place(Square::new(0, 5), Piece::theirs(PieceKind::Horse));
        let mut env = fixed();
        let key = env.load_position(board, Color::Red);

        let actions = env.get_legal_actions(&key).unwrap().to_vec();
        let horse = actions.iter().position(|a| a.to == Square::new(0, 5)).unwrap();
        let t = env.apply(&key, horse).unwrap();
        assert_eq!(t.reward, 5);
        assert_eq!(t.captured, Some(PieceKind::Horse));
        assert!(!t.done);

        let king = actions.iter().position(|a| a.to == Square::new(4, 1)).unwrap();
        let t = env.apply(&key, king).unwrap();
        assert_eq!(t.reward, 73);
        assert!(t.done);
        assert!(!t.is_draw);
        assert_eq!(t.next.to_move(), Color::Blue);
    }

    #[test]
    fn test_draw_after_capture() {
        let mut board = kings_and_guards();
        board.place(Square::new(3, 8), Piece::ours(PieceKind::Guard));
        board.place(Square::new(3, 7), Piece::theirs(PieceKind::Soldier));
        let mut env = fixed();
        let key = env.load_position(board, Color::Blue);
        let actions = env.get_legal_actions(&key).unwrap().to_vec();
        let take = actions
            .iter()
            .position(|a| a.kind == PieceKind::Guard && a.to == Square::new(3, 7))
            .unwrap();
        let t = env.apply(&key, take).unwrap();
        assert_eq!(t.reward, 2);
        assert!(t.is_draw);
        assert!(t.done);
    }

    #[test]
    fn test_no_legal_action_passes() {
        let mut board = Board::empty();
        board.place(Square::new(4, 1), Piece::theirs(PieceKind::King));
        let mut env = fixed();
        let key = env.load_position(board, Color::Blue);
        assert!(env.get_legal_actions(&key).unwrap().is_empty());
        assert_eq!(env.apply(&key, 0).unwrap_err(), Error::NoLegalAction);

        let stray = Action::new(
            Piece::ours(PieceKind::Soldier),
            Square::new(0, 0),
            Square::new(1, 0),
        );
        let outcome = env.step(Some(&stray)).unwrap();
        let next = outcome.next.unwrap();
        assert_eq!(outcome.reward, 0);
        assert!(!outcome.done);
        assert_eq!(next, codec::mirror_key(&key));
        assert_eq!(env.current(), &next);
        assert_eq!(env.turn(), Color::Red);
        assert!(!env.get_legal_actions(&next).unwrap().is_empty());
    }

    #[test]
    fn test_step_rejects_illegal_action() {
        let mut env = fixed();
        let before = env.current().clone();
        let bogus = Action::new(
            Piece::ours(PieceKind::Chariot),
            Square::new(0, 9),
            Square::new(0, 0),
        );
        let outcome = env.step(Some(&bogus)).unwrap();
        assert_eq!(outcome.next, None);
        assert_eq!(env.current(), &before);
    }

    #[test]
    fn test_step_reports_winner() {
        let mut board = kings_and_guards();
        board.place(Square::new(4, 5), Piece::ours(PieceKind::Chariot));
        let mut env = fixed();
        env.load_position(board, Color::Red);
        let take_king = env
            .get_all_actions()
            .unwrap()
            .into_iter()
            .find(|a| a.to == Square::new(4, 1))
            .unwrap();
        let outcome = env.step(Some(&take_king)).unwrap();
        assert!(outcome.done);
        assert_eq!(outcome.info.winner, Some(Color::Red));
        assert!(!outcome.info.is_draw);
    }

    struct Counting(Rc<Cell<usize>>);

    impl StateIndex for Counting {
        fn insert_if_absent(
            &mut self,
            _key: &StateKey,
        ) -> std::result::Result<bool, PersistenceError> {
            self.0.set(self.0.get() + 1);
            Ok(true)
        }
    }

    struct Unavailable;

    impl StateIndex for Unavailable {
        fn insert_if_absent(
            &mut self,
            _key: &StateKey,
        ) -> std::result::Result<bool, PersistenceError> {
            Err(PersistenceError("connection refused".into()))
        }
    }

    #[test]
    fn test_records_visited_states() {
        let seen = Rc::new(Cell::new(0));
        let mut env = Environment::new(EnvConfig::default().with_seed(3).recording_states(true))
            .with_state_index(Box::new(Counting(seen.clone())));
        env.reset();
        for _ in 0..2 {
            let action = env.get_all_actions().unwrap()[0];
            env.step(Some(&action)).unwrap();
        }
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn test_recording_is_off_by_default() {
        let seen = Rc::new(Cell::new(0));
        let mut env = fixed().with_state_index(Box::new(Counting(seen.clone())));
        let action = env.get_all_actions().unwrap()[0];
        env.step(Some(&action)).unwrap();
        assert_eq!(seen.get(), 0);
    }

    #[test]
    fn test_unavailable_index_does_not_stop_play() {
        let mut env = Environment::new(EnvConfig::default().with_seed(5).recording_states(true))
            .with_state_index(Box::new(Unavailable));
        let action = env.get_all_actions().unwrap()[0];
        let outcome = env.step(Some(&action)).unwrap();
        assert!(outcome.next.is_some());
    }

    #[test]
    fn test_uncached_key_is_generated_on_demand() {
        let mut env = fixed();
        let key: StateKey = "b:76,K,13".parse().unwrap();
        assert_eq!(env.get_legal_actions(&key).unwrap().len(), 8);
        assert_eq!(env.cached_positions(), 2);
    }

    #[test]
    fn test_policy_conversion() {
        let mut env = fixed();
        let actions = env.get_all_actions().unwrap();
        let probs = vec![1.0 / actions.len() as f64; actions.len()];
        let policy = Environment::convert_action_probs_to_policy_probs(&actions, &probs);
        assert_eq!(policy.len(), POLICY_SIZE);
        let total: f32 = policy.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(policy[actions[0].policy_index()] > 0.0);
    }
}
