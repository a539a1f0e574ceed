//! Game geometry contract.
//!
//! The engine never deals cards or scores hands itself; it only needs the
//! per-street shape of the game. Betting structure lives in
//! [`BettingTree`](crate::tree::BettingTree), boards in
//! [`BoardTree`](crate::board::BoardTree), and concrete holdings in
//! [`HandTree`](crate::hands::HandTree).

use crate::cards::Card;

/// Street and card geometry of a two-player game.
///
/// Streets are `0..=max_street()`; a node belongs to exactly one street and
/// traversal only crosses from `st` to `st + 1` at street-initial nodes.
pub trait Game: Send + Sync {
    /// Index of the final street.
    fn max_street(&self) -> usize;

    /// Highest card ordinal in the deck.
    fn max_card(&self) -> Card;

    /// Number of cards dealt *at* the given street (street 0 means hole cards).
    fn num_cards_for_street(&self, st: usize) -> usize;

    /// Number of distinct hole-card holdings on the given street.
    fn num_hole_card_pairs(&self, st: usize) -> usize;

    /// Total board cards visible on the given street.
    fn num_board_cards(&self, st: usize) -> usize;

    /// Number of players. The engine requires exactly two.
    fn num_players(&self) -> usize {
        2
    }

    /// Number of board-card orderings that collapse into one canonical board
    /// when entering the given street. Divides accumulated values at the
    /// street boundary.
    fn street_permutations(&self, st: usize) -> f64;
}
