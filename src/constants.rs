//! Constants for board geometry, capture values, and engine parameters.
//!
//! The board is always stored from the point of view of the player to move:
//! their pieces start on rows 6..=9 and advance toward row 0.

// =============================================================================
// Board Geometry
// =============================================================================

/// Number of rows (ranks).
pub const ROWS: usize = 10;

/// Number of columns (files).
pub const COLS: usize = 9;

/// Total number of squares.
pub const SQUARES: usize = ROWS * COLS;

/// Leftmost palace column.
pub const PALACE_MIN_X: usize = 3;

/// Rightmost palace column.
pub const PALACE_MAX_X: usize = 5;

/// Palace column of the diagonal crossing point.
pub const PALACE_CENTER_X: usize = 4;

/// Rows of the palace nearest row 0.
pub const TOP_PALACE_ROWS: (usize, usize) = (0, 2);

/// Rows of the palace nearest row 9.
pub const BOTTOM_PALACE_ROWS: (usize, usize) = (7, 9);

// =============================================================================
// Capture Values
// =============================================================================

pub const SOLDIER_VALUE: u32 = 2;
pub const ELEPHANT_VALUE: u32 = 3;
pub const GUARD_VALUE: u32 = 3;
pub const HORSE_VALUE: u32 = 5;
pub const CANNON_VALUE: u32 = 7;
pub const CHARIOT_VALUE: u32 = 13;

/// Capturing the king ends the game.
pub const KING_VALUE: u32 = 73;

// =============================================================================
// State Key Format
// =============================================================================

/// Separator between tokens of an encoded board.
pub const KEY_SEPARATOR: char = ',';

/// Separator between the side-to-move marker and the board tokens.
pub const KEY_SIDE_SEPARATOR: char = ':';

// =============================================================================
// Policy Vector
// =============================================================================

/// Size of the canonical action space (every from-square to every to-square).
pub const POLICY_SIZE: usize = SQUARES * SQUARES;

// =============================================================================
// MCTS (Monte Carlo Tree Search) Parameters
// =============================================================================

/// Default number of simulations per real move.
pub const N_SIMS: usize = 200;

/// Default PUCT exploration constant.
pub const C_PUCT: f64 = 1.5;

// =============================================================================
// Self-Play Parameters
// =============================================================================

/// Default step budget for one episode.
pub const MAX_STEP: usize = 200;

/// Real moves played with temperature 1 before switching to argmax.
pub const EXPLORATION_STEP: usize = 30;

// =============================================================================
// Rollout Evaluator Parameters
// =============================================================================

/// Maximum plies played by one rollout.
pub const ROLLOUT_DEPTH: usize = 40;

/// Base prior weight for every legal action.
pub const PRIOR_EVEN: f64 = 10.0;

/// Prior weight added per point of captured material.
pub const PRIOR_CAPTURE: f64 = 2.0;

/// Material difference mapped to a value of +/-1 by rollouts.
pub const MATERIAL_SCALE: f64 = 40.0;
