//! Terminal payoff evaluation.
//!
//! Terminal values are reach-weighted: the value of holding `i` sums the
//! opponent's reach over every holding that does not share a card with `i`.
//! Shared-card exclusion uses inclusion-exclusion over the per-card reach
//! totals maintained by [`common_bet_response_calcs`].

use crate::cards::Card;
use crate::hands::CanonicalCards;
use crate::reach::hand_encoding;
use crate::tree::Node;

/// Terminal payoff oracle. The engine calls these as opaque primitives at
/// showdown and fold leaves.
pub trait TerminalPayoffs: Send + Sync {
    /// Counterfactual showdown values for every holding, in hand order.
    fn showdown(
        &self,
        node: &Node,
        hands: &CanonicalCards,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: &[f64],
    ) -> Vec<f64>;

    /// Counterfactual fold values for traverser `p`.
    fn fold(
        &self,
        node: &Node,
        p: usize,
        hands: &CanonicalCards,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: &[f64],
    ) -> Vec<f64>;
}

/// Derive the opponent-reach marginals consumed at terminals: the total
/// reach and, per card, the reach of holdings containing that card.
///
/// `total_card_probs` must span `0..=max_card`; it is overwritten. Returns
/// the reach sum.
pub fn common_bet_response_calcs(
    hands: &CanonicalCards,
    num_hole_cards: usize,
    max_card: Card,
    opp_probs: &[f64],
    total_card_probs: &mut [f64],
) -> f64 {
    debug_assert_eq!(total_card_probs.len(), usize::from(max_card) + 1);
    total_card_probs.fill(0.0);
    let mut sum_opp_probs = 0.0;
    for i in 0..hands.num_raw() {
        let cards = hands.cards(i);
        let enc = hand_encoding(num_hole_cards, max_card, cards);
        let opp_prob = opp_probs[enc];
        sum_opp_probs += opp_prob;
        total_card_probs[usize::from(cards[0])] += opp_prob;
        if num_hole_cards == 2 {
            total_card_probs[usize::from(cards[1])] += opp_prob;
        }
    }
    sum_opp_probs
}

/// Pot-split payoffs over the hand values carried by [`CanonicalCards`].
///
/// Fold awards half the pot against the opponent's unblocked reach;
/// showdown pays `half_pot * (P(win) - P(lose))` with ties worth zero,
/// computed in two rank-ordered sweeps.
#[derive(Debug, Clone)]
pub struct StandardPayoffs {
    num_hole_cards: usize,
}

impl StandardPayoffs {
    #[must_use]
    pub fn new(num_hole_cards: usize) -> Self {
        Self { num_hole_cards }
    }

    /// Opponent reach of holdings that do not collide with `cards`.
    fn live_opp_prob(
        &self,
        cards: [Card; 2],
        enc: usize,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: &[f64],
    ) -> f64 {
        if self.num_hole_cards == 1 {
            sum_opp_probs - total_card_probs[usize::from(cards[0])]
        } else {
            // Identical pairs share both cards: subtracted twice, added back
            // once, hence correctly excluded.
            sum_opp_probs - total_card_probs[usize::from(cards[0])]
                - total_card_probs[usize::from(cards[1])]
                + opp_probs[enc]
        }
    }
}

impl TerminalPayoffs for StandardPayoffs {
    fn showdown(
        &self,
        node: &Node,
        hands: &CanonicalCards,
        opp_probs: &[f64],
        _sum_opp_probs: f64,
        total_card_probs: &[f64],
    ) -> Vec<f64> {
        let n = hands.num_raw();
        #[allow(clippy::cast_possible_truncation)]
        let max_card = (total_card_probs.len() - 1) as u8;
        let half_pot = f64::from(node.pot_size()) / 2.0;

        // Ascending sweep: P(opponent holds a strictly weaker, unblocked hand).
        let win_probs = directional_sweep(
            hands,
            self.num_hole_cards,
            max_card,
            opp_probs,
            (0..n).collect::<Vec<_>>().as_slice(),
        );
        // Descending sweep: P(strictly stronger, unblocked).
        let lose_probs = directional_sweep(
            hands,
            self.num_hole_cards,
            max_card,
            opp_probs,
            (0..n).rev().collect::<Vec<_>>().as_slice(),
        );

        let mut vals = vec![0.0; n];
        for i in 0..n {
            vals[i] = half_pot * (win_probs[i] - lose_probs[i]);
        }
        vals
    }

    fn fold(
        &self,
        node: &Node,
        p: usize,
        hands: &CanonicalCards,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: &[f64],
    ) -> Vec<f64> {
        let n = hands.num_raw();
        #[allow(clippy::cast_possible_truncation)]
        let max_card = (total_card_probs.len() - 1) as u8;
        let half_pot = f64::from(node.pot_size()) / 2.0;
        let sign = if node.player_folding() == p { -1.0 } else { 1.0 };
        let mut vals = vec![0.0; n];
        for i in 0..n {
            let cards = hands.cards(i);
            let enc = hand_encoding(self.num_hole_cards, max_card, cards);
            let live = self.live_opp_prob(cards, enc, opp_probs, sum_opp_probs, total_card_probs);
            vals[i] = sign * half_pot * live;
        }
        vals
    }
}

/// Accumulate, for each holding in visit order, the unblocked reach of
/// previously visited strictly different-valued holdings. Visiting ascending
/// yields win probabilities, descending yields lose probabilities.
fn directional_sweep(
    hands: &CanonicalCards,
    num_hole_cards: usize,
    max_card: Card,
    opp_probs: &[f64],
    order: &[usize],
) -> Vec<f64> {
    let n = hands.num_raw();
    let mut out = vec![0.0; n];
    let mut cum = 0.0;
    let mut cum_cards = vec![0.0; usize::from(max_card) + 1];
    let mut pos = 0;
    while pos < n {
        let value = hands.hand_value(order[pos]);
        let begin = pos;
        while pos < n && hands.hand_value(order[pos]) == value {
            let i = order[pos];
            let cards = hands.cards(i);
            out[i] = cum - cum_cards[usize::from(cards[0])]
                - if num_hole_cards == 2 {
                    cum_cards[usize::from(cards[1])]
                } else {
                    0.0
                };
            pos += 1;
        }
        // Fold this equal-value group into the running totals.
        for &i in &order[begin..pos] {
            let cards = hands.cards(i);
            let enc = hand_encoding(num_hole_cards, max_card, cards);
            let opp_prob = opp_probs[enc];
            if opp_prob <= 0.0 {
                continue;
            }
            cum += opp_prob;
            cum_cards[usize::from(cards[0])] += opp_prob;
            if num_hole_cards == 2 {
                cum_cards[usize::from(cards[1])] += opp_prob;
            }
        }
    }
    out
}
