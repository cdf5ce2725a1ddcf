//! State keys: the canonical, reversible text form of a board plus the
//! color to move.
//!
//! A key looks like `b:r,e,h,g,1,g,e,h,r,4,k,...`. The leading character is
//! the color to move (`b` or `r`), followed by the board cells in row-major
//! order. Pieces are single-character tokens (uppercase for the mover,
//! lowercase for the opponent) and runs of empty cells are written as
//! decimal run lengths. Run lengths are always maximal, so every
//! `(board, color)` pair has exactly one key.
//!
//! Rotating the board by 180 degrees reverses the row-major cell order, so
//! the opponent's key can be produced by reversing the token list and
//! swapping token case, without decoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, Piece};
use crate::constants::{COLS, KEY_SEPARATOR, KEY_SIDE_SEPARATOR, ROWS, SQUARES};
use crate::error::{Error, Result};

/// Canonical encoding of a board and the color to move.
///
/// Only produced by [`encode`] or by parsing a string that [`decode`]s
/// cleanly, so every `StateKey` is well-formed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StateKey(String);

impl StateKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Color of the player to move.
    pub fn to_move(&self) -> Color {
        match self.0.chars().next() {
            Some('r') => Color::Red,
            _ => Color::Blue,
        }
    }

    /// Decode back into the board it was built from.
    pub fn board(&self) -> Result<Board> {
        decode(&self.0).map(|(board, _)| board)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StateKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)?;
        Ok(StateKey(s.to_string()))
    }
}

impl TryFrom<String> for StateKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        decode(&s)?;
        Ok(StateKey(s))
    }
}

impl From<StateKey> for String {
    fn from(key: StateKey) -> String {
        key.0
    }
}

/// Encode a board seen by `to_move` into its state key.
pub fn encode(board: &Board, to_move: Color) -> StateKey {
    let mut tokens: Vec<String> = Vec::new();
    let mut empty = 0usize;
    for cell in board.cells() {
        match cell {
            None => empty += 1,
            Some(piece) => {
                if empty > 0 {
                    tokens.push(empty.to_string());
                    empty = 0;
                }
                tokens.push(piece.token().to_string());
            }
        }
    }
    if empty > 0 {
        tokens.push(empty.to_string());
    }

    let sep = KEY_SEPARATOR.to_string();
    StateKey(format!(
        "{}{KEY_SIDE_SEPARATOR}{}",
        to_move.as_char(),
        tokens.join(&sep)
    ))
}

/// Decode a state key into the board and the color to move.
///
/// # Errors
/// [`Error::MalformedKey`] for a missing or unknown color marker, empty
/// tokens, unknown piece letters, zero or zero-padded run lengths, adjacent
/// run lengths, or a cell count other than 90.
pub fn decode(key: &str) -> Result<(Board, Color)> {
    let malformed = |reason: String| Error::MalformedKey {
        key: key.to_string(),
        reason,
    };

    let (marker, body) = key
        .split_once(KEY_SIDE_SEPARATOR)
        .ok_or_else(|| malformed("missing color marker".into()))?;
    let mut marker_chars = marker.chars();
    let to_move = match (marker_chars.next(), marker_chars.next()) {
        (Some(c), None) => Color::from_char(c),
        _ => None,
    }
    .ok_or_else(|| malformed(format!("unknown color marker `{marker}`")))?;

    let mut cells = [[None; COLS]; ROWS];
    let mut filled = 0usize;
    let mut after_run = false;

    for token in body.split(KEY_SEPARATOR) {
        if token.is_empty() {
            return Err(malformed("empty token".into()));
        }
        if token.bytes().all(|b| b.is_ascii_digit()) {
            if after_run {
                return Err(malformed(format!("run length `{token}` follows another run")));
            }
            if token.starts_with('0') {
                return Err(malformed(format!("run length `{token}` is zero or zero-padded")));
            }
            let run: usize = token
                .parse()
                .map_err(|_| malformed(format!("run length `{token}` out of range")))?;
            if run > SQUARES - filled {
                return Err(malformed(format!("run length `{token}` runs off the board")));
            }
            filled += run;
            after_run = true;
        } else {
            let mut chars = token.chars();
            let piece = match (chars.next(), chars.next()) {
                (Some(c), None) => Piece::from_token(c),
                _ => None,
            }
            .ok_or_else(|| malformed(format!("unknown token `{token}`")))?;
            if filled >= SQUARES {
                return Err(malformed("more than 90 cells".into()));
            }
            cells[filled / COLS][filled % COLS] = Some(piece);
            filled += 1;
            after_run = false;
        }
    }

    if filled != SQUARES {
        return Err(malformed(format!("{filled} cells instead of {SQUARES}")));
    }
    Ok((Board::from_cells(cells), to_move))
}

/// The board as seen by the opposing player.
pub fn mirror(board: &Board) -> Board {
    board.mirrored()
}

/// [`mirror`] applied directly to a key: reverse the tokens, swap piece
/// ownership, and hand the move to the other color.
pub fn mirror_key(key: &StateKey) -> StateKey {
    let (marker, body) = key
        .0
        .split_once(KEY_SIDE_SEPARATOR)
        .unwrap_or(("b", key.0.as_str()));
    let to_move = marker
        .chars()
        .next()
        .and_then(Color::from_char)
        .unwrap_or(Color::Blue)
        .opposite();

    let sep = KEY_SEPARATOR.to_string();
    let tokens: Vec<String> = body
        .split(KEY_SEPARATOR)
        .rev()
        .map(|token| {
            token
                .chars()
                .map(|c| {
                    if c.is_ascii_uppercase() {
                        c.to_ascii_lowercase()
                    } else {
                        c.to_ascii_uppercase()
                    }
                })
                .collect()
        })
        .collect();

    StateKey(format!(
        "{}{KEY_SIDE_SEPARATOR}{}",
        to_move.as_char(),
        tokens.join(&sep)
    ))
}
