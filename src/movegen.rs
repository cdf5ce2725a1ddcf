//! Legal move generation.
//!
//! Each piece kind has its own pure generator, dispatched through a table
//! indexed by [`PieceKind::index`]. Generators work for either side: the
//! forward direction and the home palace follow the piece's [`Side`].
//!
//! Janggi check rules are not enforced: a king may step into attack and
//! capturing it ends the game.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::board::{Board, Piece, PieceKind, Side, Square};
use crate::constants::SQUARES;

/// Direction of a move relative to the side making it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
}

impl Direction {
    /// Classify the displacement `(dx, dy)` as seen by `side`.
    pub fn of(side: Side, dx: isize, dy: isize) -> Direction {
        // Normalise so that forward is always -y and left is always -x.
        let (dx, dy) = match side {
            Side::Ours => (dx, dy),
            Side::Theirs => (-dx, -dy),
        };
        match (dx.signum(), dy.signum()) {
            (0, -1) => Direction::Forward,
            (0, 1) => Direction::Backward,
            (-1, 0) => Direction::Left,
            (1, 0) => Direction::Right,
            (-1, -1) => Direction::ForwardLeft,
            (1, -1) => Direction::ForwardRight,
            (-1, 1) => Direction::BackwardLeft,
            _ => Direction::BackwardRight,
        }
    }
}

/// A single ply: which piece moves from where to where.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    pub from: Square,
    pub to: Square,
    pub direction: Direction,
    /// Chebyshev length of the move.
    pub step: usize,
    pub kind: PieceKind,
}

impl Action {
    pub fn new(piece: Piece, from: Square, to: Square) -> Self {
        let dx = to.x as isize - from.x as isize;
        let dy = to.y as isize - from.y as isize;
        Self {
            from,
            to,
            direction: Direction::of(piece.side, dx, dy),
            step: dx.unsigned_abs().max(dy.unsigned_abs()),
            kind: piece.kind,
        }
    }

    /// Index of this move in the canonical `from * 90 + to` action space.
    pub fn policy_index(&self) -> usize {
        self.from.index() * SQUARES + self.to.index()
    }

    /// Whether both actions move the same squares, ignoring the tags.
    pub fn same_squares(&self, other: &Action) -> bool {
        self.from == other.from && self.to == other.to
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}->{} {:?}x{}",
            self.kind, self.from, self.to, self.direction, self.step
        )
    }
}

type Generator = fn(&Board, Square, Piece, &mut Vec<Action>);

/// Generators in [`PieceKind::ALL`] order. Guards and kings share the
/// palace-step rule.
const GENERATORS: [Generator; 7] = [
    soldier_moves,
    elephant_moves,
    palace_moves,
    horse_moves,
    cannon_moves,
    chariot_moves,
    palace_moves,
];

/// Legal moves of the piece on `sq`. An empty square yields no moves.
pub fn legal_moves(board: &Board, sq: Square) -> Vec<Action> {
    let mut out = Vec::new();
    if let Some(piece) = board.get(sq) {
        GENERATORS[piece.kind.index()](board, sq, piece, &mut out);
    }
    out
}

/// Legal moves of every piece of `side`, scanning rows top to bottom and
/// each row left to right. Policy vectors depend on this order.
pub fn legal_moves_for_side(board: &Board, side: Side) -> Vec<Action> {
    let mut out = Vec::new();
    for (sq, piece) in board.pieces() {
        if piece.side == side {
            GENERATORS[piece.kind.index()](board, sq, piece, &mut out);
        }
    }
    out
}

/// The piece `action` would capture, if any.
pub fn captured_by(board: &Board, action: &Action) -> Option<Piece> {
    board.get(action.to)
}

/// Unit horizontal delta pointing to `side`'s left.
fn left(side: Side) -> isize {
    match side {
        Side::Ours => -1,
        Side::Theirs => 1,
    }
}

/// Forward, left, right, backward.
fn orthogonals(side: Side) -> [(isize, isize); 4] {
    let (f, l) = (side.forward(), left(side));
    [(0, f), (l, 0), (-l, 0), (0, -f)]
}

/// Forward-left, forward-right, backward-left, backward-right.
fn diagonals(side: Side) -> [(isize, isize); 4] {
    let (f, l) = (side.forward(), left(side));
    [(l, f), (-l, f), (l, -f), (-l, -f)]
}

fn push_unless_own(board: &Board, piece: Piece, from: Square, to: Square, out: &mut Vec<Action>) {
    if !board.is_side_at(to, piece.side) {
        out.push(Action::new(piece, from, to));
    }
}

/// Soldier: forward, left, or right one square. Inside the enemy palace it
/// may also step forward along a palace diagonal.
fn soldier_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    let (f, l) = (piece.side.forward(), left(piece.side));

    if from.in_palace_of(piece.side.opposite()) {
        for dx in [-l, l] {
            if let Some(to) = from.offset(dx, f).filter(|&to| from.palace_diagonal_to(to)) {
                push_unless_own(board, piece, from, to, out);
            }
        }
    }

    for (dx, dy) in [(0, f), (-l, 0), (l, 0)] {
        if let Some(to) = from.offset(dx, dy) {
            push_unless_own(board, piece, from, to, out);
        }
    }
}

/// Guard and king: one step inside their own palace, diagonally only along
/// palace lines.
fn palace_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    for (dx, dy) in orthogonals(piece.side).into_iter().chain(diagonals(piece.side)) {
        let Some(to) = from.offset(dx, dy) else {
            continue;
        };
        if !to.in_palace_of(piece.side) {
            continue;
        }
        if dx != 0 && dy != 0 && !from.palace_diagonal_to(to) {
            continue;
        }
        push_unless_own(board, piece, from, to, out);
    }
}

/// One orthogonal step followed by `diagonal_steps` outward diagonal steps.
/// Every square passed through must be empty.
fn leap_moves(
    board: &Board,
    from: Square,
    piece: Piece,
    diagonal_steps: usize,
    out: &mut Vec<Action>,
) {
    for (dx, dy) in orthogonals(piece.side) {
        let Some(first) = from.offset(dx, dy) else {
            continue;
        };
        if !board.is_empty_at(first) {
            continue;
        }
        'legs: for s in [-1, 1] {
            let (ddx, ddy) = if dx == 0 { (s, dy) } else { (dx, s) };
            let mut at = first;
            for step in 1..=diagonal_steps {
                match at.offset(ddx, ddy) {
                    Some(next) => at = next,
                    None => continue 'legs,
                }
                if step < diagonal_steps && !board.is_empty_at(at) {
                    continue 'legs;
                }
            }
            push_unless_own(board, piece, from, at, out);
        }
    }
}

fn horse_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    leap_moves(board, from, piece, 1, out);
}

fn elephant_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    leap_moves(board, from, piece, 2, out);
}

/// Chariot: slides orthogonally, and along palace diagonals in either palace.
fn chariot_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    for (dx, dy) in orthogonals(piece.side) {
        slide(board, from, piece, (dx, dy), false, out);
    }
    for (dx, dy) in diagonals(piece.side) {
        slide(board, from, piece, (dx, dy), true, out);
    }
}

fn slide(
    board: &Board,
    from: Square,
    piece: Piece,
    (dx, dy): (isize, isize),
    palace_line: bool,
    out: &mut Vec<Action>,
) {
    let mut at = from;
    while let Some(next) = at.offset(dx, dy) {
        if palace_line && !at.palace_diagonal_to(next) {
            break;
        }
        match board.get(next) {
            None => out.push(Action::new(piece, from, next)),
            Some(other) => {
                if other.side != piece.side {
                    out.push(Action::new(piece, from, next));
                }
                break;
            }
        }
        at = next;
    }
}

/// Cannon: must jump exactly one screen piece, which may not be a cannon,
/// and may not capture a cannon. Along palace diagonals it jumps the center.
fn cannon_moves(board: &Board, from: Square, piece: Piece, out: &mut Vec<Action>) {
    let lands_on = |to: Square| match board.get(to) {
        None => true,
        Some(other) => other.side != piece.side && other.kind != PieceKind::Cannon,
    };

    for (dx, dy) in orthogonals(piece.side) {
        let mut at = from;
        let screen = loop {
            match at.offset(dx, dy) {
                Some(next) if board.is_empty_at(next) => at = next,
                other => break other,
            }
        };
        let Some(screen) = screen else {
            continue;
        };
        if board.get(screen).is_some_and(|p| p.kind == PieceKind::Cannon) {
            continue;
        }
        let mut at = screen;
        while let Some(next) = at.offset(dx, dy) {
            if board.is_empty_at(next) {
                out.push(Action::new(piece, from, next));
                at = next;
                continue;
            }
            if lands_on(next) {
                out.push(Action::new(piece, from, next));
            }
            break;
        }
    }

    for (dx, dy) in diagonals(piece.side) {
        let Some(mid) = from.offset(dx, dy).filter(|&mid| from.palace_diagonal_to(mid)) else {
            continue;
        };
        let Some(to) = mid.offset(dx, dy).filter(|&to| mid.palace_diagonal_to(to)) else {
            continue;
        };
        let screened = board
            .get(mid)
            .is_some_and(|p| p.kind != PieceKind::Cannon);
        if screened && lands_on(to) {
            out.push(Action::new(piece, from, to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Formation;

    fn lone(piece: Piece, sq: Square) -> Board {
        let mut board = Board::empty();
        board.place(sq, piece);
        board
    }

    fn targets(actions: &[Action]) -> Vec<(usize, usize)> {
        let mut out: Vec<_> = actions.iter().map(|a| (a.to.x, a.to.y)).collect();
        out.sort();
        out
    }

    #[test]
    fn test_opening_count() {
        for ours in Formation::ALL {
            for theirs in Formation::ALL {
                let board = Board::initial(ours, theirs);
                assert_eq!(legal_moves_for_side(&board, Side::Ours).len(), 31);
                assert_eq!(legal_moves_for_side(&board, Side::Theirs).len(), 31);
            }
        }
    }

    #[test]
    fn test_opening_order_is_row_major() {
        let board = Board::initial(Formation::MaSangMaSang, Formation::MaSangMaSang);
        let moves = legal_moves_for_side(&board, Side::Ours);
        // Leftmost soldier first: forward, then right.
        assert_eq!(moves[0].from, Square::new(0, 6));
        assert_eq!(moves[0].to, Square::new(0, 5));
        assert_eq!(moves[0].direction, Direction::Forward);
        assert_eq!(moves[1].to, Square::new(1, 6));
        assert_eq!(moves[1].direction, Direction::Right);
        let froms: Vec<_> = moves.iter().map(|a| (a.from.y, a.from.x)).collect();
        let mut sorted = froms.clone();
        sorted.sort();
        assert_eq!(froms, sorted);
    }

    #[test]
    fn test_empty_square_has_no_moves() {
        let board = Board::initial(Formation::MaSangMaSang, Formation::MaSangMaSang);
        assert!(legal_moves(&board, Square::new(4, 4)).is_empty());
    }

    #[test]
    fn test_soldier_palace_diagonals() {
        let soldier = Piece::ours(PieceKind::Soldier);
        let center = legal_moves(&lone(soldier, Square::new(4, 1)), Square::new(4, 1));
        assert_eq!(targets(&center), vec![(3, 0), (3, 1), (4, 0), (5, 0), (5, 1)]);

        let corner = legal_moves(&lone(soldier, Square::new(3, 2)), Square::new(3, 2));
        assert_eq!(targets(&corner), vec![(2, 2), (3, 1), (4, 1), (4, 2)]);

        // No diagonals in its own palace or outside a palace.
        let home = legal_moves(&lone(soldier, Square::new(3, 9)), Square::new(3, 9));
        assert_eq!(targets(&home), vec![(2, 9), (3, 8), (4, 9)]);
    }

    #[test]
    fn test_soldier_at_edge() {
        let soldier = Piece::ours(PieceKind::Soldier);
        let moves = legal_moves(&lone(soldier, Square::new(0, 0)), Square::new(0, 0));
        assert_eq!(targets(&moves), vec![(1, 0)]);
    }

    #[test]
    fn test_their_soldier_moves_down() {
        let soldier = Piece::theirs(PieceKind::Soldier);
        let moves = legal_moves(&lone(soldier, Square::new(4, 8)), Square::new(4, 8));
        assert_eq!(targets(&moves), vec![(3, 8), (3, 9), (4, 9), (5, 8), (5, 9)]);
        let forward = moves.iter().find(|a| a.to == Square::new(4, 9)).unwrap();
        assert_eq!(forward.direction, Direction::Forward);
    }

    #[test]
    fn test_horse_blocked_leg() {
        let mut board = lone(Piece::ours(PieceKind::Horse), Square::new(4, 5));
        assert_eq!(legal_moves(&board, Square::new(4, 5)).len(), 8);
        board.place(Square::new(4, 4), Piece::theirs(PieceKind::Soldier));
        let moves = legal_moves(&board, Square::new(4, 5));
        assert_eq!(
            targets(&moves),
            vec![(2, 4), (2, 6), (3, 7), (5, 7), (6, 4), (6, 6)]
        );
    }

    #[test]
    fn test_elephant_blocked_diagonal() {
        let mut board = lone(Piece::ours(PieceKind::Elephant), Square::new(4, 5));
        let moves = legal_moves(&board, Square::new(4, 5));
        assert_eq!(
            targets(&moves),
            vec![(1, 3), (1, 7), (2, 2), (2, 8), (6, 2), (6, 8), (7, 3), (7, 7)]
        );
        board.place(Square::new(3, 3), Piece::ours(PieceKind::Soldier));
        let moves = legal_moves(&board, Square::new(4, 5));
        assert_eq!(moves.len(), 7);
        assert!(moves.iter().all(|a| a.to != Square::new(2, 2)));
    }

    #[test]
    fn test_chariot_slides_and_palace_line() {
        let board = lone(Piece::ours(PieceKind::Chariot), Square::new(3, 7));
        let moves = legal_moves(&board, Square::new(3, 7));
        assert_eq!(moves.len(), 19);
        assert!(moves.iter().any(|a| a.to == Square::new(5, 9) && a.step == 2));
        assert!(moves.iter().all(|a| a.to != Square::new(2, 6)));
    }

    #[test]
    fn test_chariot_stops_at_pieces() {
        let mut board = lone(Piece::ours(PieceKind::Chariot), Square::new(0, 9));
        board.place(Square::new(0, 6), Piece::theirs(PieceKind::Horse));
        board.place(Square::new(2, 9), Piece::ours(PieceKind::Elephant));
        let moves = legal_moves(&board, Square::new(0, 9));
        assert_eq!(targets(&moves), vec![(0, 6), (0, 7), (0, 8), (1, 9)]);
    }

    #[test]
    fn test_cannon_needs_screen() {
        let mut board = lone(Piece::ours(PieceKind::Cannon), Square::new(4, 9));
        assert!(legal_moves(&board, Square::new(4, 9)).is_empty());

        board.place(Square::new(4, 5), Piece::theirs(PieceKind::Soldier));
        board.place(Square::new(4, 2), Piece::theirs(PieceKind::Chariot));
        let moves = legal_moves(&board, Square::new(4, 9));
        assert_eq!(targets(&moves), vec![(4, 2), (4, 3), (4, 4)]);
    }

    #[test]
    fn test_cannon_cannot_use_or_take_cannon() {
        let mut board = lone(Piece::ours(PieceKind::Cannon), Square::new(4, 9));
        board.place(Square::new(4, 5), Piece::theirs(PieceKind::Cannon));
        assert!(legal_moves(&board, Square::new(4, 9)).is_empty());

        let mut board = lone(Piece::ours(PieceKind::Cannon), Square::new(0, 9));
        board.place(Square::new(0, 7), Piece::ours(PieceKind::Soldier));
        board.place(Square::new(0, 5), Piece::theirs(PieceKind::Cannon));
        let moves = legal_moves(&board, Square::new(0, 9));
        assert_eq!(targets(&moves), vec![(0, 6)]);
    }

    #[test]
    fn test_cannon_palace_jump() {
        let mut board = lone(Piece::ours(PieceKind::Cannon), Square::new(3, 9));
        board.place(Square::new(4, 8), Piece::ours(PieceKind::Guard));
        let moves = legal_moves(&board, Square::new(3, 9));
        assert_eq!(targets(&moves), vec![(5, 7)]);

        board.place(Square::new(5, 7), Piece::ours(PieceKind::Horse));
        assert!(legal_moves(&board, Square::new(3, 9)).is_empty());
    }

    #[test]
    fn test_king_and_guard_stay_in_palace() {
        let king = Piece::ours(PieceKind::King);
        assert_eq!(legal_moves(&lone(king, Square::new(4, 8)), Square::new(4, 8)).len(), 8);

        let edge = legal_moves(&lone(king, Square::new(4, 7)), Square::new(4, 7));
        assert_eq!(targets(&edge), vec![(3, 7), (4, 8), (5, 7)]);

        let guard = Piece::ours(PieceKind::Guard);
        let corner = legal_moves(&lone(guard, Square::new(3, 9)), Square::new(3, 9));
        assert_eq!(targets(&corner), vec![(3, 8), (4, 8), (4, 9)]);

        let theirs = Piece::theirs(PieceKind::King);
        let top = legal_moves(&lone(theirs, Square::new(4, 1)), Square::new(4, 1));
        assert_eq!(top.len(), 8);
    }

    #[test]
    fn test_never_targets_own_piece() {
        for ours in Formation::ALL {
            let board = Board::initial(ours, Formation::SangMaMaSang);
            for side in [Side::Ours, Side::Theirs] {
                for action in legal_moves_for_side(&board, side) {
                    assert!(!board.is_side_at(action.to, side), "{action}");
                    assert_eq!(board.get(action.from).map(|p| p.kind), Some(action.kind));
                }
            }
        }
    }

    #[test]
    fn test_policy_index() {
        let piece = Piece::ours(PieceKind::Chariot);
        let action = Action::new(piece, Square::new(0, 9), Square::new(0, 7));
        assert_eq!(action.policy_index(), 81 * 90 + 63);
        assert_eq!(action.direction, Direction::Forward);
        assert_eq!(action.step, 2);
    }
}
