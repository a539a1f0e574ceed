//! Toy games shared by the integration tests.
//!
//! Both fixtures deal a single hole card from a tiny ordinal deck, which
//! keeps reach vectors small while still exercising blockers, street
//! crossings, and showdown ordering.
#![allow(dead_code)]

use cfr_engine::board::BoardTree;
use cfr_engine::cards::Card;
use cfr_engine::game::Game;
use cfr_engine::hands::{CanonicalCards, HandTree};
use cfr_engine::tree::{BettingTree, BettingTreeBuilder};

/// Single-street game: one hole card from a deck of `num_cards`, no board.
pub struct OneCardGame {
    pub num_cards: usize,
}

impl Game for OneCardGame {
    fn max_street(&self) -> usize {
        0
    }

    fn max_card(&self) -> Card {
        (self.num_cards - 1) as Card
    }

    fn num_cards_for_street(&self, st: usize) -> usize {
        usize::from(st == 0)
    }

    fn num_hole_card_pairs(&self, _st: usize) -> usize {
        self.num_cards
    }

    fn num_board_cards(&self, _st: usize) -> usize {
        0
    }

    fn street_permutations(&self, _st: usize) -> f64 {
        1.0
    }
}

/// Hands for [`OneCardGame`]: card `i` has hand value `i`.
pub struct OneCardHands {
    hands: CanonicalCards,
}

impl OneCardHands {
    pub fn new(num_cards: usize) -> Self {
        let cards: Vec<[Card; 2]> = (0..num_cards).map(|c| [c as Card, 0]).collect();
        let values: Vec<u32> = (0..num_cards as u32).collect();
        Self {
            hands: CanonicalCards::new(cards).with_hand_values(values),
        }
    }
}

impl HandTree for OneCardHands {
    fn hands(&self, _st: usize, _gbd: usize) -> &CanonicalCards {
        &self.hands
    }

    fn hcp_index(&self, _st: usize, cards: &[Card]) -> usize {
        usize::from(cards[0])
    }
}

/// Two-street game: one hole card from a four-card deck, one board card
/// dealt on street 1.
pub struct TwoStreetGame;

pub const TWO_STREET_DECK: usize = 4;

impl Game for TwoStreetGame {
    fn max_street(&self) -> usize {
        1
    }

    fn max_card(&self) -> Card {
        (TWO_STREET_DECK - 1) as Card
    }

    fn num_cards_for_street(&self, st: usize) -> usize {
        usize::from(st <= 1)
    }

    fn num_hole_card_pairs(&self, st: usize) -> usize {
        if st == 0 { TWO_STREET_DECK } else { TWO_STREET_DECK - 1 }
    }

    fn num_board_cards(&self, st: usize) -> usize {
        usize::from(st == 1)
    }

    fn street_permutations(&self, _st: usize) -> f64 {
        1.0
    }
}

/// Boards for [`TwoStreetGame`]: street 1 deals any of the four cards.
pub struct TwoStreetBoards {
    boards: Vec<[Card; 1]>,
}

impl TwoStreetBoards {
    pub fn new() -> Self {
        Self {
            boards: (0..TWO_STREET_DECK).map(|c| [c as Card]).collect(),
        }
    }
}

impl BoardTree for TwoStreetBoards {
    fn num_boards(&self, st: usize) -> usize {
        if st == 0 { 1 } else { TWO_STREET_DECK }
    }

    fn global_index(&self, root_st: usize, root_bd: usize, st: usize, lbd: usize) -> usize {
        // Street 0 has a single board, so local and global indices coincide
        // everywhere below it.
        if st == root_st { root_bd } else { lbd }
    }

    fn local_index(&self, root_st: usize, _root_bd: usize, st: usize, gbd: usize) -> usize {
        if st == root_st { 0 } else { gbd }
    }

    fn succ_board_begin(&self, _pst: usize, _pgbd: usize, _nst: usize) -> usize {
        0
    }

    fn succ_board_end(&self, _pst: usize, _pgbd: usize, nst: usize) -> usize {
        if nst == 0 { 1 } else { TWO_STREET_DECK }
    }

    fn num_variants(&self, _st: usize, _gbd: usize) -> u32 {
        1
    }

    fn board(&self, st: usize, gbd: usize) -> &[Card] {
        if st == 0 { &[] } else { &self.boards[gbd] }
    }
}

/// Hands for [`TwoStreetGame`]: street 0 holds all four cards; street 1
/// excludes the board card. Hand value equals the card.
pub struct TwoStreetHands {
    street0: CanonicalCards,
    street1: Vec<CanonicalCards>,
}

impl TwoStreetHands {
    /// Variant where street-0 hand 3 is a non-canonical copy of hand 2.
    pub fn with_street0_isomorphism() -> Self {
        let cards: Vec<[Card; 2]> = (0..TWO_STREET_DECK).map(|c| [c as Card, 0]).collect();
        let street0 =
            CanonicalCards::with_variants(cards, vec![1, 1, 2, 0], vec![0, 1, 2, 2]);
        Self {
            street0,
            ..Self::new()
        }
    }

    pub fn new() -> Self {
        let street0 =
            CanonicalCards::new((0..TWO_STREET_DECK).map(|c| [c as Card, 0]).collect());
        let street1 = (0..TWO_STREET_DECK)
            .map(|board| {
                let cards: Vec<[Card; 2]> = (0..TWO_STREET_DECK)
                    .filter(|&c| c != board)
                    .map(|c| [c as Card, 0])
                    .collect();
                let values: Vec<u32> = cards.iter().map(|c| u32::from(c[0])).collect();
                CanonicalCards::new(cards).with_hand_values(values)
            })
            .collect();
        Self { street0, street1 }
    }
}

impl HandTree for TwoStreetHands {
    fn hands(&self, st: usize, gbd: usize) -> &CanonicalCards {
        if st == 0 { &self.street0 } else { &self.street1[gbd] }
    }

    fn hcp_index(&self, st: usize, cards: &[Card]) -> usize {
        if st == 0 {
            return usize::from(cards[0]);
        }
        let board = cards[2];
        (0..TWO_STREET_DECK as Card)
            .filter(|&c| c != board)
            .position(|c| c == cards[0])
            .expect("hole card conflicts with board")
    }
}

/// Single-street check/bet tree: P0 checks or bets; facing a bet P1 calls or
/// folds; facing a check P1 checks behind or bets and P0 calls or folds.
pub fn one_street_tree() -> BettingTree {
    let mut b = BettingTreeBuilder::new();
    let sd_checks = b.showdown(0, 2);
    let sd_bet_call = b.showdown(0, 6);
    let p1_folds = b.fold(0, 2, 1);
    let p0_folds = b.fold(0, 2, 0);
    let sd_check_bet_call = b.showdown(0, 6);
    let p1_facing_bet = b.choice(0, 1, 2, vec![sd_bet_call, p1_folds], Some(0), Some(1));
    let p0_facing_bet = b.choice(0, 0, 2, vec![sd_check_bet_call, p0_folds], Some(0), Some(1));
    let p1_after_check = b.choice(0, 1, 2, vec![sd_checks, p0_facing_bet], Some(0), None);
    let root = b.choice(0, 0, 2, vec![p1_after_check, p1_facing_bet], Some(0), None);
    b.build(root, 0)
}

/// A trivial single-decision tree: P0 checks or bets, P1 only ever calls a
/// bet; both lines end at street-1 showdowns after both players check the
/// new street.
pub fn two_street_tree() -> BettingTree {
    let mut b = BettingTreeBuilder::new();

    // Street-1 subtree after the checked pot.
    let sd_small = b.showdown(1, 2);
    let s1_p1_small = b.choice(1, 1, 2, vec![sd_small], Some(0), None);
    let s1_p0_small = b.choice(1, 0, 2, vec![s1_p1_small], Some(0), None);

    // Street-1 subtree after bet and call.
    let sd_big = b.showdown(1, 6);
    let s1_p1_big = b.choice(1, 1, 6, vec![sd_big], Some(0), None);
    let s1_p0_big = b.choice(1, 0, 6, vec![s1_p1_big], Some(0), None);

    // Street 0.
    let p1_fold = b.fold(0, 2, 1);
    let p1_facing_bet = b.choice(0, 1, 2, vec![s1_p0_big, p1_fold], Some(0), Some(1));
    let p1_after_check = b.choice(0, 1, 2, vec![s1_p0_small], Some(0), None);
    let root = b.choice(0, 0, 2, vec![p1_after_check, p1_facing_bet], Some(0), None);
    b.build(root, 1)
}
