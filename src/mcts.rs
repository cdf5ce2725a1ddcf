//! Monte Carlo Tree Search (MCTS) with PUCT selection.
//!
//! Each node stores the statistics of the move that led to it: visits `v`,
//! accumulated value `w` from the point of view of the player who made that
//! move, and the prior `p` the evaluator gave it. Children are created when
//! their parent is expanded, but their positions are only resolved through
//! the [`Environment`] when selection first walks into them.
//!
//! One simulation:
//! - descend from the root by maximising `Q + c_puct * P * sqrt(ΣN) / (1 + N)`
//! - evaluate the leaf (or score it from the game result) and expand it
//! - walk the path again, adding the value with alternating sign

use tracing::{debug, trace};

use crate::board::PieceKind;
use crate::codec::StateKey;
use crate::constants::{C_PUCT, N_SIMS};
use crate::env::Environment;
use crate::error::{Error, EvaluationError, Result};
use crate::evaluator::{Evaluator, normalize};

/// Search parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MctsConfig {
    /// Simulations per call to [`Mcts::search`].
    pub simulations: usize,
    pub c_puct: f64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            simulations: N_SIMS,
            c_puct: C_PUCT,
        }
    }
}

impl MctsConfig {
    pub fn with_simulations(mut self, simulations: usize) -> Self {
        self.simulations = simulations;
        self
    }

    pub fn with_c_puct(mut self, c_puct: f64) -> Self {
        self.c_puct = c_puct;
        self
    }
}

/// Game result at a node, for the player to move there.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Terminal {
    /// The mover's king has been taken.
    Loss,
    Draw,
}

impl Terminal {
    pub fn value(self) -> f64 {
        match self {
            Terminal::Loss => -1.0,
            Terminal::Draw => 0.0,
        }
    }
}

/// A node in the search tree.
#[derive(Clone, Debug)]
pub struct TreeNode {
    /// Index of the move in the parent's legal actions; `None` for a pass
    /// and for a fresh root.
    pub action: Option<usize>,
    /// Position at this node, resolved on first visit.
    pub key: Option<StateKey>,
    pub terminal: Option<Terminal>,
    /// Number of visits
    pub v: u32,
    /// Accumulated value for the player who moved into this node
    pub w: f64,
    /// Prior probability
    pub p: f64,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn root(key: StateKey) -> Self {
        Self {
            key: Some(key),
            ..Self::child(None, 1.0)
        }
    }

    fn child(action: Option<usize>, p: f64) -> Self {
        Self {
            action,
            key: None,
            terminal: None,
            v: 0,
            w: 0.0,
            p,
            children: Vec::new(),
        }
    }

    /// Mean value, 0 when unvisited.
    #[inline]
    pub fn q(&self) -> f64 {
        if self.v > 0 { self.w / self.v as f64 } else { 0.0 }
    }

    pub fn is_expanded(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_pass(&self) -> bool {
        self.action.is_none()
    }
}

/// Pick the child with the highest PUCT score. Ties go to the lowest index.
fn most_urgent(node: &TreeNode, c_puct: f64) -> usize {
    let total: u32 = node.children.iter().map(|c| c.v).sum();
    let sqrt_total = (total as f64).sqrt();

    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, child) in node.children.iter().enumerate() {
        let score = child.q() + c_puct * child.p * sqrt_total / (1.0 + child.v as f64);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

/// Resolve the position a child leads to, recording whether the game ended.
fn resolve(
    env: &mut Environment,
    parent: &StateKey,
    child: &mut TreeNode,
    passes: usize,
) -> Result<()> {
    let fatal = |e: Error| match e {
        Error::InvalidAction { .. } | Error::NoLegalAction => {
            Error::CorruptTree(format!("selected move is not playable in {parent}: {e}"))
        }
        e => e,
    };

    match child.action {
        Some(index) => {
            let t = env.apply(parent, index).map_err(fatal)?;
            child.terminal = match (t.captured, t.done) {
                (Some(PieceKind::King), _) => Some(Terminal::Loss),
                (_, true) => Some(Terminal::Draw),
                _ => None,
            };
            child.key = Some(t.next);
        }
        None => {
            child.key = Some(env.pass(parent)?);
            if passes >= 2 {
                child.terminal = Some(Terminal::Draw);
            }
        }
    }
    Ok(())
}

/// Descend to a leaf, resolving positions on the way.
///
/// Returns the path of child indices from the root to the leaf. `passes`
/// counts the consecutive passes that led to the root.
fn tree_descend(
    root: &mut TreeNode,
    env: &mut Environment,
    c_puct: f64,
    mut passes: usize,
) -> Result<Vec<usize>> {
    let mut path = Vec::new();
    let mut node = root;

    while node.is_expanded() && node.terminal.is_none() {
        let parent = node
            .key
            .clone()
            .ok_or_else(|| Error::CorruptTree("expanded node without a position".into()))?;
        let idx = most_urgent(node, c_puct);
        path.push(idx);

        let child = &mut node.children[idx];
        passes = if child.is_pass() { passes + 1 } else { 0 };
        if child.key.is_none() {
            resolve(env, &parent, child, passes)?;
        }
        node = child;
    }
    Ok(path)
}

/// Evaluate and expand the node at the end of `path`. Returns its value
/// for the player to move there.
fn expand<E: Evaluator + ?Sized>(
    root: &mut TreeNode,
    path: &[usize],
    env: &mut Environment,
    evaluator: &mut E,
) -> Result<f64> {
    let node = path.iter().fold(root, |node, &idx| &mut node.children[idx]);
    if let Some(terminal) = node.terminal {
        return Ok(terminal.value());
    }

    let key = node
        .key
        .clone()
        .ok_or_else(|| Error::CorruptTree("leaf without a position".into()))?;
    let entry = env.position(&key)?;
    let evaluation = evaluator.evaluate(&entry.board, &entry.actions)?;
    if evaluation.priors.len() != entry.actions.len() {
        return Err(EvaluationError(format!(
            "{} priors for {} actions",
            evaluation.priors.len(),
            entry.actions.len()
        ))
        .into());
    }
    if !evaluation.value.is_finite() {
        return Err(EvaluationError(format!("value {} is not finite", evaluation.value)).into());
    }
    if let Some(p) = evaluation.priors.iter().find(|p| !p.is_finite() || **p < 0.0) {
        return Err(EvaluationError(format!("invalid prior {p}")).into());
    }

    if entry.actions.is_empty() {
        node.children.push(TreeNode::child(None, 1.0));
    } else {
        node.children = evaluation
            .priors
            .iter()
            .enumerate()
            .map(|(i, &p)| TreeNode::child(Some(i), p))
            .collect();
    }
    Ok(evaluation.value.clamp(-1.0, 1.0))
}

/// Add `value` (for the leaf's mover) along the path, flipping sign per ply.
fn tree_update(root: &mut TreeNode, path: &[usize], value: f64) {
    // Perspective of the player who moved into the root.
    let mut score = if path.len() % 2 == 0 { -value } else { value };
    root.v += 1;
    root.w += score;

    let mut node = root;
    for &idx in path {
        score = -score;
        node = &mut node.children[idx];
        node.v += 1;
        node.w += score;
    }
}

/// Turn visit counts into a distribution. A temperature of zero (or less)
/// puts all mass on the most visited entry, the first one on ties.
pub fn visit_probs(visits: &[u32], temperature: f64) -> Vec<f64> {
    if visits.is_empty() {
        return Vec::new();
    }
    if temperature <= f64::EPSILON {
        let mut best = 0;
        for (i, &n) in visits.iter().enumerate() {
            if n > visits[best] {
                best = i;
            }
        }
        let mut probs = vec![0.0; visits.len()];
        probs[best] = 1.0;
        return probs;
    }
    let mut probs: Vec<f64> = visits
        .iter()
        .map(|&n| (n as f64).powf(1.0 / temperature))
        .collect();
    normalize(&mut probs);
    probs
}

/// Draw an index from `probs`. Returns `None` when there is no mass left.
pub fn sample(probs: &[f64], rng: &mut fastrand::Rng) -> Option<usize> {
    let total: f64 = probs.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let mut target = rng.f64() * total;
    let mut last = None;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        if target < p {
            return Some(i);
        }
        target -= p;
        last = Some(i);
    }
    last
}

/// Result of one search from the root.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    /// Distribution over root children, in legal-action order.
    pub probs: Vec<f64>,
    /// Sampled child index.
    pub choice: usize,
}

/// Search engine rooted at one position.
pub struct Mcts {
    config: MctsConfig,
    root: TreeNode,
    /// Consecutive passes played right before the root position.
    passes: usize,
}

impl Mcts {
    pub fn new(root: StateKey, config: MctsConfig) -> Self {
        Self {
            config,
            root: TreeNode::root(root),
            passes: 0,
        }
    }

    /// Mark the root as reached by `passes` consecutive passes, so one more
    /// pass inside the tree ends the game as it would in play.
    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes;
        self
    }

    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn config(&self) -> &MctsConfig {
        &self.config
    }

    /// Run the configured number of simulations.
    ///
    /// # Errors
    /// Evaluator failures abort the batch; statistics gathered by earlier
    /// simulations are kept.
    pub fn search<E: Evaluator + ?Sized>(
        &mut self,
        env: &mut Environment,
        evaluator: &mut E,
    ) -> Result<()> {
        for i in 0..self.config.simulations {
            let path = tree_descend(&mut self.root, env, self.config.c_puct, self.passes)?;
            let value = expand(&mut self.root, &path, env, &mut *evaluator)?;
            tree_update(&mut self.root, &path, value);
            trace!(sim = i, depth = path.len(), value, "simulation");
        }
        debug!(
            visits = self.root.v,
            children = self.root.children.len(),
            value = self.root_value(),
            "search done"
        );
        Ok(())
    }

    /// Visit counts of the root's children.
    pub fn visit_counts(&self) -> Vec<u32> {
        self.root.children.iter().map(|c| c.v).collect()
    }

    /// Mean value of the root for its player to move.
    pub fn root_value(&self) -> f64 {
        -self.root.q()
    }

    /// Search, then sample a root child by visit counts at `temperature`.
    ///
    /// # Errors
    /// A root that is still unexpanded after the search (no simulations
    /// configured) is reported as [`Error::CorruptTree`].
    pub fn get_action<E: Evaluator + ?Sized>(
        &mut self,
        env: &mut Environment,
        evaluator: &mut E,
        temperature: f64,
        rng: &mut fastrand::Rng,
    ) -> Result<SearchResult> {
        self.search(env, &mut *evaluator)?;
        if !self.root.is_expanded() {
            return Err(Error::CorruptTree(format!(
                "root {} not expanded after {} simulations",
                self.root.key.as_ref().map_or_else(String::new, ToString::to_string),
                self.config.simulations
            )));
        }
        let probs = visit_probs(&self.visit_counts(), temperature);
        let choice = sample(&probs, rng).ok_or(Error::NoLegalAction)?;
        Ok(SearchResult { probs, choice })
    }

    /// Move the root to `key`, reached by playing root child `child`.
    /// Statistics below that child are kept when its position matches;
    /// otherwise the tree starts over.
    pub fn advance(&mut self, child: usize, key: &StateKey) {
        let mut children = std::mem::take(&mut self.root.children);
        let passed = children.get(child).is_some_and(TreeNode::is_pass);
        self.passes = if passed { self.passes + 1 } else { 0 };
        let reused = (child < children.len() && children[child].key.as_ref() == Some(key))
            .then(|| children.swap_remove(child));
        self.root = match reused {
            Some(mut node) => {
                node.action = None;
                debug!(visits = node.v, "reusing subtree");
                node
            }
            None => TreeNode::root(key.clone()),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Board, Color, Formation, Piece, Square};
    use crate::env::EnvConfig;
    use crate::evaluator::{Evaluation, UniformEvaluator};
    use crate::movegen::Action;

    fn env() -> Environment {
        Environment::new(
            EnvConfig::default()
                .with_formations(Formation::MaSangMaSang, Formation::MaSangMaSang)
                .with_seed(1),
        )
    }

    /// Chariot facing an undefended king: the capture is the only capture.
    fn king_hunt(env: &mut Environment) -> StateKey {
        let mut board = Board::empty();
        board.place(Square::new(4, 5), Piece::ours(PieceKind::Chariot));
        board.place(Square::new(4, 8), Piece::ours(PieceKind::King));
        board.place(Square::new(4, 1), Piece::theirs(PieceKind::King));
        board.place(Square::new(3, 0), Piece::theirs(PieceKind::Guard));
        env.load_position(board, Color::Blue)
    }

    fn capture_index(env: &mut Environment, key: &StateKey) -> usize {
        let actions = env.get_legal_actions(key).unwrap();
        let board = key.board().unwrap();
        let captures: Vec<usize> = actions
            .iter()
            .enumerate()
            .filter(|(_, a)| board.get(a.to).is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(captures.len(), 1);
        captures[0]
    }

    #[test]
    fn test_first_simulation_expands_root() {
        let mut env = env();
        let mut mcts = Mcts::new(env.current().clone(), MctsConfig::default().with_simulations(1));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        assert_eq!(mcts.root().children.len(), 31);
        assert_eq!(mcts.root().v, 1);
        assert!(mcts.visit_counts().iter().all(|&n| n == 0));
    }

    #[test]
    fn test_visits_add_up() {
        let mut env = env();
        let mut mcts = Mcts::new(env.current().clone(), MctsConfig::default().with_simulations(50));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        assert_eq!(mcts.root().v, 50);
        assert_eq!(mcts.visit_counts().iter().sum::<u32>(), 49);
    }

    #[test]
    fn test_capture_visits_grow_with_simulations() {
        let mut last = 0;
        for sims in [10, 40, 100, 200] {
            let mut env = env();
            let key = king_hunt(&mut env);
            let capture = capture_index(&mut env, &key);
            let mut mcts = Mcts::new(key, MctsConfig::default().with_simulations(sims));
            mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
            let visits = mcts.visit_counts();
            assert!(visits[capture] >= last, "{sims} sims: {} < {last}", visits[capture]);
            last = visits[capture];
        }
        let mut env = env();
        let key = king_hunt(&mut env);
        let capture = capture_index(&mut env, &key);
        let mut mcts = Mcts::new(key, MctsConfig::default().with_simulations(200));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let probs = visit_probs(&mcts.visit_counts(), 0.0);
        assert_eq!(probs[capture], 1.0);
        assert_eq!(mcts.root().children[capture].terminal, Some(Terminal::Loss));
        assert!(mcts.root_value() > 0.5);
    }

    #[test]
    fn test_visit_probs_temperature() {
        let visits = [1, 3, 0, 4];
        let probs = visit_probs(&visits, 1.0);
        assert_eq!(probs, vec![0.125, 0.375, 0.0, 0.5]);
        assert_eq!(visit_probs(&visits, 0.0), vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(visit_probs(&[2, 5, 5], 0.0), vec![0.0, 1.0, 0.0]);
        assert_eq!(visit_probs(&[0, 0], 1.0), vec![0.5, 0.5]);
    }

    #[test]
    fn test_sampling_follows_temperature() {
        let visits = vec![5u32; 10];
        let mut seen = std::collections::HashSet::new();
        let mut rng = fastrand::Rng::with_seed(17);
        for _ in 0..50 {
            seen.insert(sample(&visit_probs(&visits, 1.0), &mut rng).unwrap());
        }
        assert!(seen.len() > 1);
        for _ in 0..50 {
            assert_eq!(sample(&visit_probs(&visits, 0.0), &mut rng), Some(0));
        }
        assert_eq!(sample(&[0.0, 0.0], &mut rng), None);
        assert_eq!(sample(&[0.0, 1.0, 0.0], &mut rng), Some(1));
    }

    #[test]
    fn test_pass_edge_when_no_moves() {
        let mut env = env();
        let mut board = Board::empty();
        board.place(Square::new(4, 1), Piece::theirs(PieceKind::King));
        let key = env.load_position(board, Color::Red);
        let mut mcts = Mcts::new(key, MctsConfig::default().with_simulations(3));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let root = mcts.root();
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].is_pass());
        assert_eq!(root.children[0].key.as_ref().map(|k| k.to_move()), Some(Color::Blue));
    }

    #[test]
    fn test_advance_keeps_subtree() {
        let mut env = env();
        let root = env.current().clone();
        let mut mcts = Mcts::new(root.clone(), MctsConfig::default().with_simulations(100));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let best = visit_probs(&mcts.visit_counts(), 0.0)
            .iter()
            .position(|&p| p == 1.0)
            .unwrap();
        let visits = mcts.root().children[best].v;
        let next = env.link(&root, best).unwrap().clone();

        mcts.advance(best, &next);
        assert_eq!(mcts.root().key.as_ref(), Some(&next));
        assert_eq!(mcts.root().v, visits);

        let other: StateKey = "b:76,K,13".parse().unwrap();
        mcts.advance(0, &other);
        assert_eq!(mcts.root().v, 0);
        assert!(!mcts.root().is_expanded());
    }

    struct Broken;

    impl Evaluator for Broken {
        fn evaluate(
            &mut self,
            _board: &Board,
            _actions: &[Action],
        ) -> std::result::Result<Evaluation, EvaluationError> {
            Err(EvaluationError("model offline".into()))
        }
    }

    struct Short;

    impl Evaluator for Short {
        fn evaluate(
            &mut self,
            _board: &Board,
            _actions: &[Action],
        ) -> std::result::Result<Evaluation, EvaluationError> {
            Ok(Evaluation::uniform(1, 0.0))
        }
    }

    /// Returns a fixed value with uniform priors, with one prior replaced.
    struct Garbage {
        value: f64,
        first_prior: Option<f64>,
    }

    impl Evaluator for Garbage {
        fn evaluate(
            &mut self,
            _board: &Board,
            actions: &[Action],
        ) -> std::result::Result<Evaluation, EvaluationError> {
            let mut evaluation = Evaluation::uniform(actions.len(), self.value);
            if let Some(p) = self.first_prior {
                evaluation.priors[0] = p;
            }
            Ok(evaluation)
        }
    }

    #[test]
    fn test_evaluator_errors_propagate() {
        let mut env = env();
        let mut mcts = Mcts::new(env.current().clone(), MctsConfig::default().with_simulations(5));
        let err = mcts.search(&mut env, &mut Broken).unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
        assert!(err.is_fatal());

        let err = mcts.search(&mut env, &mut Short).unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
        assert!(!mcts.root().is_expanded());
    }

    #[test]
    fn test_non_finite_or_negative_evaluations_are_rejected() {
        let cases = [
            (f64::NAN, None),
            (f64::INFINITY, None),
            (0.0, Some(-0.5)),
            (0.0, Some(f64::NAN)),
        ];
        for (value, first_prior) in cases {
            let mut env = env();
            let mut mcts =
                Mcts::new(env.current().clone(), MctsConfig::default().with_simulations(3));
            let err = mcts
                .search(&mut env, &mut Garbage { value, first_prior })
                .unwrap_err();
            assert!(matches!(err, Error::Evaluation(_)), "{value} {first_prior:?}");
            assert!(!mcts.root().is_expanded());
            assert_eq!(mcts.root().v, 0);
        }
    }

    #[test]
    fn test_zero_simulations_is_a_fatal_error() {
        let mut env = env();
        let mut mcts = Mcts::new(env.current().clone(), MctsConfig::default().with_simulations(0));
        let mut rng = fastrand::Rng::with_seed(1);
        let err = mcts
            .get_action(&mut env, &mut UniformEvaluator::default(), 1.0, &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::CorruptTree(_)));
        assert!(err.is_fatal());
    }

    /// Neither side has a piece, so every move is a pass.
    fn stalled(env: &mut Environment) -> StateKey {
        env.load_position(Board::empty(), Color::Blue)
    }

    #[test]
    fn test_second_pass_is_a_draw_in_the_tree() {
        let mut env = env();
        let key = stalled(&mut env);
        let mut mcts = Mcts::new(key.clone(), MctsConfig::default().with_simulations(2));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let pass = &mcts.root().children[0];
        assert!(pass.is_pass());
        assert_eq!(pass.terminal, None);
        assert_eq!(pass.children[0].terminal, None);

        let mut env = self::env();
        let key = stalled(&mut env);
        let mut mcts = Mcts::new(key, MctsConfig::default().with_simulations(2)).with_passes(1);
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        assert_eq!(mcts.root().children[0].terminal, Some(Terminal::Draw));
        assert_eq!(mcts.root_value(), 0.0);
    }

    #[test]
    fn test_advance_counts_passes() {
        let mut env = env();
        let key = stalled(&mut env);
        let mut mcts = Mcts::new(key.clone(), MctsConfig::default().with_simulations(2));
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let next = mcts.root().children[0].key.clone().unwrap();
        mcts.advance(0, &next);
        assert_eq!(mcts.passes(), 1);

        let mut env = self::env();
        let root = env.current().clone();
        let mut mcts = Mcts::new(root.clone(), MctsConfig::default().with_simulations(2))
            .with_passes(1);
        mcts.search(&mut env, &mut UniformEvaluator::default()).unwrap();
        let next = env.link(&root, 0).unwrap().clone();
        mcts.advance(0, &next);
        assert_eq!(mcts.passes(), 0);
    }
}
