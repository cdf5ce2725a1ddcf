//! Janggi board representation.
//!
//! The board is a 10x9 grid stored from the perspective of the player to
//! move: [`Side::Ours`] pieces belong to the mover and start on the bottom
//! rows, [`Side::Theirs`] pieces belong to the opponent. After every move the
//! board is [mirrored](Board::mirrored) so the new mover is `Ours` again,
//! the same color-swapping scheme a Go engine uses for `X`/`x` stones.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BOTTOM_PALACE_ROWS, CANNON_VALUE, CHARIOT_VALUE, COLS, ELEPHANT_VALUE, GUARD_VALUE,
    HORSE_VALUE, KING_VALUE, PALACE_CENTER_X, PALACE_MAX_X, PALACE_MIN_X, ROWS, SOLDIER_VALUE,
    TOP_PALACE_ROWS,
};

/// Owner of a piece, relative to the player to move.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Ours,
    Theirs,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Ours => Side::Theirs,
            Side::Theirs => Side::Ours,
        }
    }

    /// Row delta of a forward step for this side.
    pub fn forward(self) -> isize {
        match self {
            Side::Ours => -1,
            Side::Theirs => 1,
        }
    }

    /// Rows spanned by this side's own palace.
    pub fn palace_rows(self) -> (usize, usize) {
        match self {
            Side::Ours => BOTTOM_PALACE_ROWS,
            Side::Theirs => TOP_PALACE_ROWS,
        }
    }
}

/// Absolute player identity. Blue moves first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Red,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::Blue => Color::Red,
            Color::Red => Color::Blue,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Color::Blue => 'b',
            Color::Red => 'r',
        }
    }

    pub fn from_char(c: char) -> Option<Color> {
        match c {
            'b' => Some(Color::Blue),
            'r' => Some(Color::Red),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Color::Blue => write!(f, "blue"),
            Color::Red => write!(f, "red"),
        }
    }
}

/// The seven Janggi piece types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceKind {
    Soldier,
    Elephant,
    Guard,
    Horse,
    Cannon,
    Chariot,
    King,
}

impl PieceKind {
    pub const ALL: [PieceKind; 7] = [
        PieceKind::Soldier,
        PieceKind::Elephant,
        PieceKind::Guard,
        PieceKind::Horse,
        PieceKind::Cannon,
        PieceKind::Chariot,
        PieceKind::King,
    ];

    /// Reward for capturing a piece of this kind.
    pub fn capture_value(self) -> u32 {
        match self {
            PieceKind::Soldier => SOLDIER_VALUE,
            PieceKind::Elephant => ELEPHANT_VALUE,
            PieceKind::Guard => GUARD_VALUE,
            PieceKind::Horse => HORSE_VALUE,
            PieceKind::Cannon => CANNON_VALUE,
            PieceKind::Chariot => CHARIOT_VALUE,
            PieceKind::King => KING_VALUE,
        }
    }

    /// Position of this kind in [`PieceKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Uppercase letter used in state keys and board printouts.
    pub fn letter(self) -> char {
        match self {
            PieceKind::Soldier => 'S',
            PieceKind::Elephant => 'E',
            PieceKind::Guard => 'G',
            PieceKind::Horse => 'H',
            PieceKind::Cannon => 'C',
            PieceKind::Chariot => 'R',
            PieceKind::King => 'K',
        }
    }

    pub fn from_letter(c: char) -> Option<PieceKind> {
        PieceKind::ALL
            .into_iter()
            .find(|kind| kind.letter() == c.to_ascii_uppercase())
    }
}

/// A piece on the board.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Piece {
    pub side: Side,
    pub kind: PieceKind,
}

impl Piece {
    pub const fn ours(kind: PieceKind) -> Self {
        Self {
            side: Side::Ours,
            kind,
        }
    }

    pub const fn theirs(kind: PieceKind) -> Self {
        Self {
            side: Side::Theirs,
            kind,
        }
    }

    /// Single-character token: uppercase for the mover, lowercase for the opponent.
    pub fn token(self) -> char {
        match self.side {
            Side::Ours => self.kind.letter(),
            Side::Theirs => self.kind.letter().to_ascii_lowercase(),
        }
    }

    pub fn from_token(c: char) -> Option<Piece> {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let kind = PieceKind::from_letter(c)?;
        let side = if c.is_ascii_uppercase() {
            Side::Ours
        } else {
            Side::Theirs
        };
        Some(Piece { side, kind })
    }

    /// The same piece seen from the other player's side.
    pub fn flipped(self) -> Piece {
        Piece {
            side: self.side.opposite(),
            kind: self.kind,
        }
    }
}

/// A board coordinate: `x` is the column (0..9), `y` the row (0..10).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square {
    pub x: usize,
    pub y: usize,
}

impl Square {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// The square `(dx, dy)` away, or `None` when it falls off the board.
    pub fn offset(self, dx: isize, dy: isize) -> Option<Square> {
        let x = self.x.checked_add_signed(dx)?;
        let y = self.y.checked_add_signed(dy)?;
        (x < COLS && y < ROWS).then_some(Square { x, y })
    }

    /// Row-major index in `0..SQUARES`.
    pub fn index(self) -> usize {
        self.y * COLS + self.x
    }

    /// The square after rotating the board by 180 degrees.
    pub fn rotated(self) -> Square {
        Square {
            x: COLS - 1 - self.x,
            y: ROWS - 1 - self.y,
        }
    }

    fn palace_rows(self) -> Option<(usize, usize)> {
        if !(PALACE_MIN_X..=PALACE_MAX_X).contains(&self.x) {
            return None;
        }
        [TOP_PALACE_ROWS, BOTTOM_PALACE_ROWS]
            .into_iter()
            .find(|&(lo, hi)| (lo..=hi).contains(&self.y))
    }

    /// Whether the square lies in either palace.
    pub fn in_palace(self) -> bool {
        self.palace_rows().is_some()
    }

    /// Whether the square lies in the palace owned by `side`.
    pub fn in_palace_of(self, side: Side) -> bool {
        self.palace_rows() == Some(side.palace_rows())
    }

    /// Whether the square is the crossing point of a palace's diagonals.
    pub fn is_palace_center(self) -> bool {
        self.palace_rows()
            .is_some_and(|(lo, _)| self.x == PALACE_CENTER_X && self.y == lo + 1)
    }

    /// Whether a one-square diagonal step from `self` to `to` follows a
    /// palace line. Palace diagonals always pass through the center.
    pub fn palace_diagonal_to(self, to: Square) -> bool {
        match (self.palace_rows(), to.palace_rows()) {
            (Some(a), Some(b)) if a == b => self.is_palace_center() || to.is_palace_center(),
            _ => false,
        }
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Back-rank arrangements of horses (ma) and elephants (sang), read left to
/// right from the owner's side of the board.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Formation {
    MaSangMaSang,
    MaSangSangMa,
    SangMaSangMa,
    SangMaMaSang,
}

impl Formation {
    pub const ALL: [Formation; 4] = [
        Formation::MaSangMaSang,
        Formation::MaSangSangMa,
        Formation::SangMaSangMa,
        Formation::SangMaMaSang,
    ];

    /// Back rank from the owner's side. The center file stays empty; the king
    /// starts one row forward.
    pub fn back_rank(self) -> [Option<PieceKind>; COLS] {
        use PieceKind::{Chariot as R, Elephant as E, Guard as G, Horse as H};
        let (left, right) = match self {
            Formation::MaSangMaSang => ([H, E], [H, E]),
            Formation::MaSangSangMa => ([H, E], [E, H]),
            Formation::SangMaSangMa => ([E, H], [E, H]),
            Formation::SangMaMaSang => ([E, H], [H, E]),
        };
        [
            Some(R),
            Some(left[0]),
            Some(left[1]),
            Some(G),
            None,
            Some(G),
            Some(right[0]),
            Some(right[1]),
            Some(R),
        ]
    }

    pub fn random(rng: &mut fastrand::Rng) -> Formation {
        Formation::ALL[rng.usize(..Formation::ALL.len())]
    }
}

/// A 10x9 Janggi board seen from the player to move.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Board {
    cells: [[Option<Piece>; COLS]; ROWS],
}

impl Default for Board {
    fn default() -> Self {
        Self::empty()
    }
}

impl Board {
    pub fn empty() -> Self {
        Self {
            cells: [[None; COLS]; ROWS],
        }
    }

    /// The opening position with the mover using `ours` and the opponent
    /// using `theirs`.
    pub fn initial(ours: Formation, theirs: Formation) -> Self {
        let mut board = Self::empty();
        for (x, kind) in ours.back_rank().into_iter().enumerate() {
            if let Some(kind) = kind {
                board.place(Square::new(x, ROWS - 1), Piece::ours(kind));
            }
        }
        // The opponent's back rank is rotated, so its left is our right.
        for (x, kind) in theirs.back_rank().into_iter().rev().enumerate() {
            if let Some(kind) = kind {
                board.place(Square::new(x, 0), Piece::theirs(kind));
            }
        }
        board.place(Square::new(PALACE_CENTER_X, ROWS - 2), Piece::ours(PieceKind::King));
        board.place(Square::new(PALACE_CENTER_X, 1), Piece::theirs(PieceKind::King));
        for x in [1, COLS - 2] {
            board.place(Square::new(x, ROWS - 3), Piece::ours(PieceKind::Cannon));
            board.place(Square::new(x, 2), Piece::theirs(PieceKind::Cannon));
        }
        for x in (0..COLS).step_by(2) {
            board.place(Square::new(x, ROWS - 4), Piece::ours(PieceKind::Soldier));
            board.place(Square::new(x, 3), Piece::theirs(PieceKind::Soldier));
        }
        board
    }

    #[inline]
    pub fn get(&self, sq: Square) -> Option<Piece> {
        self.cells[sq.y][sq.x]
    }

    #[inline]
    pub fn is_empty_at(&self, sq: Square) -> bool {
        self.get(sq).is_none()
    }

    /// Whether `sq` holds a piece belonging to `side`.
    #[inline]
    pub fn is_side_at(&self, sq: Square, side: Side) -> bool {
        self.get(sq).is_some_and(|p| p.side == side)
    }

    pub fn place(&mut self, sq: Square, piece: Piece) {
        self.cells[sq.y][sq.x] = Some(piece);
    }

    pub fn clear(&mut self, sq: Square) -> Option<Piece> {
        self.cells[sq.y][sq.x].take()
    }

    /// Move the piece on `from` to `to`, returning whatever was captured.
    pub fn move_piece(&mut self, from: Square, to: Square) -> Option<Piece> {
        let moving = self.clear(from);
        std::mem::replace(&mut self.cells[to.y][to.x], moving)
    }

    /// Occupied squares in row-major order.
    pub fn pieces(&self) -> impl Iterator<Item = (Square, Piece)> + '_ {
        self.cells.iter().enumerate().flat_map(|(y, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(x, cell)| cell.map(|p| (Square::new(x, y), p)))
        })
    }

    /// Cells in row-major order, including empty ones.
    pub fn cells(&self) -> impl Iterator<Item = Option<Piece>> + '_ {
        self.cells.iter().flatten().copied()
    }

    pub(crate) fn from_cells(cells: [[Option<Piece>; COLS]; ROWS]) -> Self {
        Self { cells }
    }

    pub fn piece_count(&self) -> usize {
        self.pieces().count()
    }

    /// Sum of capture values of `side`'s pieces, kings excluded.
    pub fn material(&self, side: Side) -> u32 {
        self.pieces()
            .filter(|(_, p)| p.side == side && p.kind != PieceKind::King)
            .map(|(_, p)| p.kind.capture_value())
            .sum()
    }

    /// The board as seen by the opponent: rotated 180 degrees with sides swapped.
    pub fn mirrored(&self) -> Board {
        let mut out = Board::empty();
        for (sq, piece) in self.pieces() {
            out.place(sq.rotated(), piece.flipped());
        }
        out
    }

    /// Neither side has attacking material left: only kings and guards remain.
    ///
    /// Positions where the remaining cannons can never find a screen are not
    /// recognised.
    pub fn is_draw(&self) -> bool {
        self.pieces()
            .all(|(_, p)| matches!(p.kind, PieceKind::King | PieceKind::Guard))
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (y, row) in self.cells.iter().enumerate() {
            write!(f, "{y} ")?;
            for cell in row {
                let ch = cell.map_or('.', Piece::token);
                write!(f, "{ch} ")?;
            }
            writeln!(f)?;
        }
        write!(f, "  ")?;
        for x in 0..COLS {
            write!(f, "{x} ")?;
        }
        writeln!(f)
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        fmt::Display::fmt(self, f)
    }
}
