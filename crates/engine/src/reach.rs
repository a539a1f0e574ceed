//! Opponent reach propagation.
//!
//! At an opponent choice node the parent reach vector is split across
//! successors using the opponent's current strategy, and sumprobs are
//! accumulated under the warmup weighting policy. Storage typing is handled
//! by the [`CfrValue`] policy trait, so the {unabstracted, bucketed} pair of
//! functions here covers every {int, float} regret/sumprob combination.

use arrayvec::ArrayVec;

use crate::cards::{Card, encode_pair};
use crate::hands::CanonicalCards;
use crate::probs::regrets_to_probs;
use crate::values::{CfrValue, halve_row_on_overflow};
use crate::MAX_SUCCS;

/// Sumprob update gating and weighting for the current traversal.
#[derive(Debug, Clone, Copy)]
pub struct SumprobPolicy {
    pub value_calculation: bool,
    pub it: u32,
    pub soft_warmup: u32,
    pub hard_warmup: u32,
    pub scaling: f64,
}

impl SumprobPolicy {
    /// The weight applied to this iteration's reach contributions, or `None`
    /// when sumprobs must not be touched (value-only runs and the hard
    /// warmup window).
    #[must_use]
    pub fn weight(&self) -> Option<f64> {
        if self.value_calculation || (self.hard_warmup > 0 && self.it <= self.hard_warmup) {
            return None;
        }
        if (self.hard_warmup == 0 && self.soft_warmup == 0)
            || (self.soft_warmup > 0 && self.it <= self.soft_warmup)
        {
            Some(1.0)
        } else if self.hard_warmup > 0 {
            Some(f64::from(self.it - self.hard_warmup))
        } else {
            Some(f64::from(self.it - self.soft_warmup))
        }
    }
}

/// Per-hand strategy derivation inputs for the unabstracted variant.
pub struct StrategyInputs<'a> {
    pub nonneg: bool,
    pub uniform: bool,
    pub default_succ_index: usize,
    pub explore: f64,
    pub num_nonterminal_succs: usize,
    pub nonterminal_succs: &'a [bool],
}

/// Split `opp_probs` across successors, deriving the strategy per hand pair
/// from the `cs_vals` row (regrets, or sumprobs in value-only runs), and
/// accumulate weighted sumprobs.
///
/// `cs_vals` is the board slice `num_hole_card_pairs * num_succs`; so is
/// `sumprobs` when present. `succ_opp_probs[s]` spans the full encoding
/// space.
#[allow(clippy::too_many_arguments)]
pub fn process_opp_probs<R: CfrValue, S: CfrValue>(
    hands: &CanonicalCards,
    num_hole_cards: usize,
    max_card: Card,
    num_succs: usize,
    strategy: &StrategyInputs<'_>,
    cs_vals: &[R],
    opp_probs: &[f64],
    succ_opp_probs: &mut [Vec<f64>],
    mut sumprobs: Option<&mut [S]>,
    policy: &SumprobPolicy,
) {
    let weight = policy.weight();
    let mut current_probs: ArrayVec<f64, MAX_SUCCS> = ArrayVec::new();
    for _ in 0..num_succs {
        current_probs.push(0.0);
    }
    for i in 0..hands.num_raw() {
        let cards = hands.cards(i);
        let enc = hand_encoding(num_hole_cards, max_card, cards);
        let opp_prob = opp_probs[enc];
        if opp_prob == 0.0 {
            for succ in succ_opp_probs.iter_mut() {
                succ[enc] = 0.0;
            }
            continue;
        }
        let row = &cs_vals[i * num_succs..(i + 1) * num_succs];
        regrets_to_probs(
            row,
            strategy.nonneg,
            strategy.uniform,
            strategy.default_succ_index,
            strategy.explore,
            strategy.num_nonterminal_succs,
            strategy.nonterminal_succs,
            &mut current_probs,
        );
        let mut overflowed = false;
        for s in 0..num_succs {
            let succ_opp_prob = opp_prob * current_probs[s];
            succ_opp_probs[s][enc] = succ_opp_prob;
            if let (Some(w), Some(sp)) = (weight, sumprobs.as_deref_mut()) {
                let cell = &mut sp[i * num_succs + s];
                *cell = cell.add_weighted(succ_opp_prob, w, policy.scaling);
                overflowed |= cell.overflowed();
            }
        }
        if overflowed {
            if let Some(sp) = sumprobs.as_deref_mut() {
                halve_row_on_overflow(&mut sp[i * num_succs..(i + 1) * num_succs]);
            }
        }
    }
}

/// Bucketed variant: the strategy is read from the precomputed
/// current-strategy row for the hand's bucket, and sumprobs are indexed by
/// bucket rather than `(board, hand pair)`.
#[allow(clippy::too_many_arguments)]
pub fn process_opp_probs_bucketed<S: CfrValue>(
    hands: &CanonicalCards,
    num_hole_cards: usize,
    max_card: Card,
    num_succs: usize,
    current_probs: &[f64],
    street_buckets: &[usize],
    opp_probs: &[f64],
    succ_opp_probs: &mut [Vec<f64>],
    mut sumprobs: Option<&mut [S]>,
    policy: &SumprobPolicy,
) {
    let weight = policy.weight();
    for i in 0..hands.num_raw() {
        let cards = hands.cards(i);
        let enc = hand_encoding(num_hole_cards, max_card, cards);
        let opp_prob = opp_probs[enc];
        if opp_prob == 0.0 {
            for succ in succ_opp_probs.iter_mut() {
                succ[enc] = 0.0;
            }
            continue;
        }
        let b = street_buckets[i];
        let probs = &current_probs[b * num_succs..(b + 1) * num_succs];
        let mut overflowed = false;
        for s in 0..num_succs {
            let succ_opp_prob = opp_prob * probs[s];
            succ_opp_probs[s][enc] = succ_opp_prob;
            if let (Some(w), Some(sp)) = (weight, sumprobs.as_deref_mut()) {
                let cell = &mut sp[b * num_succs + s];
                *cell = cell.add_weighted(succ_opp_prob, w, policy.scaling);
                overflowed |= cell.overflowed();
            }
        }
        if overflowed {
            if let Some(sp) = sumprobs.as_deref_mut() {
                halve_row_on_overflow(&mut sp[b * num_succs..(b + 1) * num_succs]);
            }
        }
    }
}

/// Reach-vector index of a holding.
#[inline]
#[must_use]
pub fn hand_encoding(num_hole_cards: usize, max_card: Card, cards: [Card; 2]) -> usize {
    if num_hole_cards == 1 {
        usize::from(cards[0])
    } else {
        encode_pair(max_card, cards[0], cards[1])
    }
}
