//! Card indices and the dense hole-card encoding.
//!
//! Cards are plain ordinals in `0..=max_card`; the game decides what they
//! mean. Reach vectors are indexed over the full product space of hole-card
//! encodings so lookups never search.

/// A card ordinal. The deck is `0..=Game::max_card()`.
pub type Card = u8;

/// Dense encoding of a two-card holding: `hi * (max_card + 1) + lo`.
///
/// For single-hole-card games the encoding is just the card itself.
#[inline]
#[must_use]
pub fn encode_pair(max_card: Card, hi: Card, lo: Card) -> usize {
    usize::from(hi) * (usize::from(max_card) + 1) + usize::from(lo)
}

/// Size of the reach-vector index space for `num_hole_cards` cards.
#[must_use]
pub fn num_encodings(max_card: Card, num_hole_cards: usize) -> usize {
    let max_card1 = usize::from(max_card) + 1;
    if num_hole_cards == 1 {
        max_card1
    } else {
        max_card1 * max_card1
    }
}
