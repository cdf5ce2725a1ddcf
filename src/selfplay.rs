//! Self-play driver.
//!
//! Plays one episode against itself: search, pick a move by visit counts,
//! play it in the [`Environment`], and record the position together with
//! the search policy in the canonical action space. Moves are sampled in
//! proportion to visits for the first `exploration_step` moves and greedily
//! afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::board::Color;
use crate::codec::StateKey;
use crate::constants::{EXPLORATION_STEP, MAX_STEP};
use crate::env::{Environment, StepOutcome};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::mcts::{Mcts, MctsConfig, TreeNode, sample};
use crate::movegen::Action;
use crate::persistence::{Quality, QualityStore};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelfPlayConfig {
    pub mcts: MctsConfig,
    /// Budget of step attempts, failed attempts included.
    pub max_step: usize,
    /// Moves played with temperature 1 before switching to greedy play.
    pub exploration_step: usize,
    /// Keep the subtree of the played move instead of searching afresh.
    pub reuse_tree: bool,
    pub seed: Option<u64>,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        Self {
            mcts: MctsConfig::default(),
            max_step: MAX_STEP,
            exploration_step: EXPLORATION_STEP,
            reuse_tree: false,
            seed: None,
        }
    }
}

impl SelfPlayConfig {
    pub fn with_mcts(mut self, mcts: MctsConfig) -> Self {
        self.mcts = mcts;
        self
    }

    pub fn with_max_step(mut self, max_step: usize) -> Self {
        self.max_step = max_step;
        self
    }

    pub fn with_exploration_step(mut self, exploration_step: usize) -> Self {
        self.exploration_step = exploration_step;
        self
    }

    pub fn with_tree_reuse(mut self, reuse: bool) -> Self {
        self.reuse_tree = reuse;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sampling temperature for the move at `step`.
    pub fn temperature(&self, step: usize) -> f64 {
        if step >= self.exploration_step { 0.0 } else { 1.0 }
    }
}

/// Why an episode stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    KingCaptured,
    Draw,
    /// The only candidate move was rejected by the environment.
    NoPlayableAction,
    DoublePass,
    StepLimit,
    /// Stopped by a fatal error.
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeInfo {
    pub winner: Option<Color>,
    pub is_draw: bool,
    /// Moves actually played.
    pub steps: usize,
    pub end: EndReason,
}

/// Training data from one episode: the position before each move and the
/// search policy that chose it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub info: EpisodeInfo,
    pub states: Vec<StateKey>,
    /// One vector per state over the canonical action space. A pass has no
    /// action to put mass on, so its policy is all zeros.
    pub policies: Vec<Vec<f32>>,
}

impl Trajectory {
    fn new() -> Self {
        Self {
            info: EpisodeInfo {
                winner: None,
                is_draw: false,
                steps: 0,
                end: EndReason::StepLimit,
            },
            states: Vec::new(),
            policies: Vec::new(),
        }
    }

    fn finish(mut self, end: EndReason, winner: Option<Color>, is_draw: bool) -> Self {
        self.info = EpisodeInfo {
            winner,
            is_draw,
            steps: self.states.len(),
            end,
        };
        self
    }
}

/// An episode stopped by a fatal error, with everything recorded before it.
#[derive(Debug, thiserror::Error)]
#[error("episode aborted: {error}")]
pub struct AbortedEpisode {
    pub partial: Trajectory,
    #[source]
    pub error: Error,
}

enum Played {
    Stepped { choice: usize, pass: bool, outcome: StepOutcome },
    /// Every candidate was rejected.
    Exhausted,
}

/// Play one episode from a fresh [`Environment::reset`].
///
/// Recoverable environment errors are logged and the step is retried; each
/// attempt counts against `max_step`. Fatal errors abort the episode and
/// hand back the partial trajectory.
pub fn self_play<E: Evaluator + ?Sized>(
    env: &mut Environment,
    evaluator: &mut E,
    config: &SelfPlayConfig,
    quality: &mut dyn QualityStore,
) -> std::result::Result<Trajectory, AbortedEpisode> {
    env.reset();
    run_episode(env, evaluator, config, quality)
}

/// Play from the environment's current position.
fn run_episode<E: Evaluator + ?Sized>(
    env: &mut Environment,
    evaluator: &mut E,
    config: &SelfPlayConfig,
    quality: &mut dyn QualityStore,
) -> std::result::Result<Trajectory, AbortedEpisode> {
    let mut rng = config
        .seed
        .map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
    let mut key = env.current().clone();
    let mut mcts = Mcts::new(key.clone(), config.mcts);
    let mut trajectory = Trajectory::new();
    let mut passes = 0;
    let mut attempts = 0;

    info!(start = %key, "episode start");

    macro_rules! abort {
        ($err:expr) => {
            return Err(AbortedEpisode {
                partial: trajectory.finish(EndReason::Aborted, None, false),
                error: $err,
            })
        };
    }

    while attempts < config.max_step {
        attempts += 1;
        let temperature = config.temperature(trajectory.states.len());

        if mcts.root().key.as_ref() != Some(env.current()) {
            abort!(Error::CorruptTree(format!(
                "search root is not the current position {}",
                env.current()
            )));
        }
        let actions = match env.get_all_actions() {
            Ok(actions) => actions,
            Err(e) if e.is_fatal() => abort!(e),
            Err(e) => {
                warn!(attempt = attempts, error = %e, "reading actions failed, retrying");
                continue;
            }
        };
        let result = match mcts.get_action(env, &mut *evaluator, temperature, &mut rng) {
            Ok(result) => result,
            Err(e) if e.is_fatal() => abort!(e),
            Err(e) => {
                warn!(attempt = attempts, error = %e, "search failed, retrying");
                continue;
            }
        };
        record_quality(quality, &key, mcts.root_value());

        let children = &mcts.root().children;
        let step = |action: Option<&Action>| env.step(action);
        let played = match play(children, &actions, &result.probs, result.choice, &mut rng, step) {
            Ok(played) => played,
            Err(e) if e.is_fatal() => abort!(e),
            Err(e) => {
                warn!(attempt = attempts, error = %e, "step failed, retrying");
                continue;
            }
        };
        let (choice, pass, outcome) = match played {
            Played::Stepped { choice, pass, outcome } => (choice, pass, outcome),
            Played::Exhausted => return Ok(no_playable_action(env, trajectory)),
        };
        let Some(next) = outcome.next else {
            abort!(Error::CorruptTree("accepted step without a position".into()));
        };

        let policy = Environment::convert_action_probs_to_policy_probs(&actions, &result.probs);
        trajectory.states.push(key);
        trajectory.policies.push(policy);
        debug!(
            step = trajectory.states.len(),
            temperature,
            reward = outcome.reward,
            pass,
            "played"
        );

        if outcome.done {
            let end = if outcome.info.is_draw && outcome.info.winner.is_none() {
                EndReason::Draw
            } else {
                EndReason::KingCaptured
            };
            let trajectory = trajectory.finish(end, outcome.info.winner, outcome.info.is_draw);
            info!(winner = ?trajectory.info.winner, steps = trajectory.info.steps, "episode done");
            return Ok(trajectory);
        }

        passes = if pass { passes + 1 } else { 0 };
        if passes >= 2 {
            let trajectory = trajectory.finish(EndReason::DoublePass, None, false);
            info!(steps = trajectory.info.steps, "both sides passed");
            return Ok(trajectory);
        }

        if config.reuse_tree {
            mcts.advance(choice, &next);
        } else {
            mcts = Mcts::new(next.clone(), config.mcts).with_passes(passes);
        }
        key = next;
    }

    let trajectory = trajectory.finish(EndReason::StepLimit, None, false);
    info!(steps = trajectory.info.steps, "step budget exhausted");
    Ok(trajectory)
}

/// The game ends when the only candidate is rejected; the side to move next
/// is credited with the win.
fn no_playable_action(env: &Environment, trajectory: Trajectory) -> Trajectory {
    let winner = env.next_turn();
    info!(%winner, "no playable action");
    trajectory.finish(EndReason::NoPlayableAction, Some(winner), false)
}

/// Play root child `choice` through `step`, resampling among the remaining
/// candidates whenever it is rejected.
fn play<F>(
    children: &[TreeNode],
    actions: &[Action],
    probs: &[f64],
    mut choice: usize,
    rng: &mut fastrand::Rng,
    mut step: F,
) -> Result<Played>
where
    F: FnMut(Option<&Action>) -> Result<StepOutcome>,
{
    let mut candidates: Vec<usize> = (0..children.len()).collect();

    loop {
        let child = children.get(choice).ok_or(Error::InvalidAction {
            index: choice,
            len: children.len(),
        })?;
        let action = match child.action {
            Some(index) => Some(*actions.get(index).ok_or(Error::InvalidAction {
                index,
                len: actions.len(),
            })?),
            None => None,
        };

        let outcome = step(action.as_ref())?;
        if outcome.next.is_some() {
            return Ok(Played::Stepped {
                choice,
                pass: action.is_none(),
                outcome,
            });
        }

        if candidates.len() <= 1 {
            return Ok(Played::Exhausted);
        }
        candidates.retain(|&c| c != choice);
        let weights: Vec<f64> = candidates.iter().map(|&c| probs[c]).collect();
        let pick = sample(&weights, rng).unwrap_or_else(|| rng.usize(..candidates.len()));
        choice = candidates[pick];
        warn!(choice, remaining = candidates.len(), "action rejected, resampling");
    }
}

/// Fold the searched value of `key` into the quality store. Failures are
/// logged and ignored.
fn record_quality(store: &mut dyn QualityStore, key: &StateKey, value: f64) {
    let previous = match store.get(key) {
        Ok(previous) => previous,
        Err(e) => {
            warn!(error = %e, "quality lookup failed");
            return;
        }
    };
    let merged = previous
        .unwrap_or(Quality {
            visits: 0,
            value: 0.0,
        })
        .merged(value);
    if let Err(e) = store.put(key, merged) {
        warn!(error = %e, "quality update failed");
    }
}
