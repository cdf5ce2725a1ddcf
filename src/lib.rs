//! Janggi-Zero: a Janggi (Korean chess) self-play engine.
//!
//! This crate generates training games for a policy/value model by running
//! Monte Carlo Tree Search against itself. Boards are always stored from the
//! point of view of the player to move; after every move the board is
//! mirrored for the opponent.
//!
//! ## Modules
//!
//! - [`constants`] - Board geometry, capture values and search defaults
//! - [`board`] - Pieces, squares, opening formations and the board itself
//! - [`codec`] - Canonical state keys (encode, decode, mirror)
//! - [`movegen`] - Per-piece legal move generation
//! - [`env`] - Game engine with position and transition caches
//! - [`evaluator`] - The evaluator interface consumed by the search
//! - [`playout`] - Random-playout evaluator
//! - [`mcts`] - Monte Carlo Tree Search with PUCT
//! - [`selfplay`] - Self-play episode driver
//! - [`persistence`] - Optional state index and quality store
//! - [`error`] - Error types
//!
//! ## Example
//!
//! ```
//! use janggi_zero::env::{EnvConfig, Environment};
//! use janggi_zero::mcts::MctsConfig;
//! use janggi_zero::persistence::NoPersistence;
//! use janggi_zero::playout::RolloutEvaluator;
//! use janggi_zero::selfplay::{SelfPlayConfig, self_play};
//!
//! let mut env = Environment::new(EnvConfig::default().with_seed(1));
//! let mut evaluator = RolloutEvaluator::new(1).with_depth(4);
//! let config = SelfPlayConfig::default()
//!     .with_mcts(MctsConfig::default().with_simulations(8))
//!     .with_max_step(4)
//!     .with_seed(1);
//!
//! let trajectory = self_play(&mut env, &mut evaluator, &config, &mut NoPersistence).unwrap();
//! println!("{} moves, winner {:?}", trajectory.info.steps, trajectory.info.winner);
//! ```

pub mod board;
pub mod codec;
pub mod constants;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod mcts;
pub mod movegen;
pub mod persistence;
pub mod playout;
pub mod selfplay;

pub use error::{Error, Result};
