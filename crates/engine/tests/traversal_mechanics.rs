//! Traversal mechanics over toy games.
//!
//! Exercises the core recursion end to end: terminal payoff passthrough,
//! first-iteration regret arithmetic, value-vector shape, canonical-value
//! propagation across a street boundary, clamping, warmup gating, pruning
//! equivalence, and the two-player zero-sum identity.

mod common;

use cfr_engine::board::SingleRunout;
use cfr_engine::buckets::{NoBuckets, TableBuckets};
use cfr_engine::config::CfrConfig;
use cfr_engine::engine::{CfrEngine, EngineContext};
use cfr_engine::error::EngineError;
use cfr_engine::terminal::{StandardPayoffs, TerminalPayoffs, common_bet_response_calcs};
use cfr_engine::tree::{BettingTree, BettingTreeBuilder};
use common::{
    OneCardGame, OneCardHands, TWO_STREET_DECK, TwoStreetBoards, TwoStreetGame, TwoStreetHands,
    one_street_tree, two_street_tree,
};
use test_macros::timed_test;

fn one_street_engine(tree: BettingTree, num_cards: usize, config: CfrConfig) -> CfrEngine {
    let ctx = EngineContext::new(
        Box::new(OneCardGame { num_cards }),
        tree,
        Box::new(SingleRunout),
        Box::new(OneCardHands::new(num_cards)),
        Box::new(NoBuckets),
        Box::new(StandardPayoffs::new(1)),
        config,
    )
    .unwrap();
    CfrEngine::new(ctx)
}

fn two_street_engine(config: CfrConfig) -> CfrEngine {
    let ctx = EngineContext::new(
        Box::new(TwoStreetGame),
        two_street_tree(),
        Box::new(TwoStreetBoards::new()),
        Box::new(TwoStreetHands::new()),
        Box::new(NoBuckets),
        Box::new(StandardPayoffs::new(1)),
        config,
    )
    .unwrap();
    CfrEngine::new(ctx)
}

#[timed_test]
fn fold_tree_returns_fold_payoffs_verbatim() {
    let mut b = BettingTreeBuilder::new();
    let root = b.fold(0, 10, 1);
    let tree = b.build(root, 0);
    let mut engine = one_street_engine(tree, 3, CfrConfig::default());

    let hands = OneCardHands::new(3);
    let hands = cfr_engine::hands::HandTree::hands(&hands, 0, 0);
    let opp_probs = vec![0.4, 0.6, 1.0];
    let mut totals = vec![0.0; 3];
    let sum = common_bet_response_calcs(hands, 1, 2, &opp_probs, &mut totals);

    let root = engine.context().tree().root();
    let vals = engine
        .process(root, 0, &opp_probs, sum, Some(&totals), "", 0)
        .unwrap();

    let node = engine.context().tree().node(root);
    let expected = StandardPayoffs::new(1).fold(node, 0, hands, &opp_probs, sum, &totals);
    assert_eq!(vals, expected);
}

#[timed_test]
fn first_iteration_regrets_follow_default_succ_policy() {
    // P0 picks between checking down a 2-pot and a 6-pot showdown. With all
    // regrets zero the whole current strategy sits on the default (call)
    // successor, so values equal successor 0 and its regret delta is zero.
    let mut b = BettingTreeBuilder::new();
    let small = b.showdown(0, 2);
    let big = b.showdown(0, 6);
    let root = b.choice(0, 0, 2, vec![small, big], Some(0), None);
    let tree = b.build(root, 0);
    let mut engine = one_street_engine(tree, 3, CfrConfig::default());

    engine.set_iteration(1);
    engine.half_iteration(0).unwrap();

    let table = engine.regrets().table(0, 0, 0).unwrap().read();
    // Showdown values: pot 2 -> [-2, 0, 2]; pot 6 -> [-6, 0, 6].
    // Deltas against the adopted successor 0: [0, -4], [0, 0], [0, 4].
    assert_eq!(table.as_int().unwrap(), &[0, -4, 0, 0, 0, 4]);
}

#[timed_test]
fn value_vectors_match_street_hole_card_pairs() {
    let mut engine = one_street_engine(one_street_tree(), 3, CfrConfig::default());
    let vals = engine.half_iteration(0).unwrap();
    assert_eq!(vals.len(), 3);

    let mut engine = two_street_engine(CfrConfig::default());
    let vals = engine.half_iteration(0).unwrap();
    assert_eq!(vals.len(), TWO_STREET_DECK);
}

#[timed_test]
fn non_canonical_hands_carry_canonical_values() {
    let ctx = EngineContext::new(
        Box::new(TwoStreetGame),
        two_street_tree(),
        Box::new(TwoStreetBoards::new()),
        Box::new(TwoStreetHands::with_street0_isomorphism()),
        Box::new(NoBuckets),
        Box::new(StandardPayoffs::new(1)),
        CfrConfig {
            uniform: true,
            ..CfrConfig::default()
        },
    )
    .unwrap();
    let mut engine = CfrEngine::new(ctx);
    let vals = engine.half_iteration(0).unwrap();
    // Street-0 hand 3 is a variant of hand 2.
    assert!(
        (vals[3] - vals[2]).abs() < 1e-12,
        "variant hand should mirror its canonical representative: {vals:?}"
    );
}

#[timed_test]
fn nn_regrets_stay_between_floor_and_ceiling() {
    let config = CfrConfig {
        nnr: true,
        regret_floors: vec![0],
        regret_ceilings: vec![5],
        regret_scaling: vec![100.0],
        ..CfrConfig::default()
    };
    let mut engine = one_street_engine(one_street_tree(), 3, config);
    engine.run(3).unwrap();

    let tree = engine.context().tree();
    for p in 0..2 {
        for nt in 0..tree.num_nonterminals(p, 0) {
            let table = engine.regrets().table(p, 0, nt).unwrap().read();
            for &r in table.as_int().unwrap() {
                assert!((0..=5).contains(&r), "regret {r} escaped [0, 5]");
            }
        }
    }
}

#[timed_test]
fn hard_warmup_freezes_all_sumprobs() {
    let config = CfrConfig {
        hard_warmup: 5,
        ..CfrConfig::default()
    };
    let mut engine = one_street_engine(one_street_tree(), 3, config);
    engine.run(3).unwrap();

    let tree = engine.context().tree();
    for p in 0..2 {
        for nt in 0..tree.num_nonterminals(p, 0) {
            let table = engine.sumprobs().table(p, 0, nt).unwrap().read();
            assert!(
                table.as_int().unwrap().iter().all(|&s| s == 0),
                "sumprobs moved during the hard warmup window"
            );
        }
    }
}

#[timed_test]
fn soft_warmup_weight_scales_accumulation() {
    // Lone opponent decision, uniform strategy, full reach: each successor
    // accumulates 1.0 * (it - soft_warmup) * 0.5 per hand.
    let mut b = BettingTreeBuilder::new();
    let small = b.showdown(0, 2);
    let big = b.showdown(0, 6);
    let root = b.choice(0, 1, 2, vec![small, big], Some(0), None);
    let tree = b.build(root, 0);
    let config = CfrConfig {
        uniform: true,
        soft_warmup: 5,
        double_sumprobs: true,
        ..CfrConfig::default()
    };
    let mut engine = one_street_engine(tree, 3, config);
    engine.set_iteration(7);
    engine.half_iteration(0).unwrap();

    let table = engine.sumprobs().table(1, 0, 0).unwrap().read();
    for &s in table.as_double().unwrap() {
        assert!((s - 1.0).abs() < 1e-12, "expected 0.5 * (7 - 5), got {s}");
    }
}

#[timed_test]
fn pruned_branches_do_not_change_parent_values() {
    let config = CfrConfig {
        nnr: true,
        ..CfrConfig::default()
    };
    let mut pruned = one_street_engine(one_street_tree(), 3, config.clone());
    let mut unpruned = one_street_engine(one_street_tree(), 3, config);
    unpruned.set_prune(false);

    // P1 folds every hand when facing a bet, zeroing the call branch's reach.
    for engine in [&pruned, &unpruned] {
        let mut table = engine.regrets().table(1, 0, 1).unwrap().write();
        table.as_int_mut().unwrap().copy_from_slice(&[0, 100, 0, 100, 0, 100]);
    }

    let vals_pruned = pruned.half_iteration(0).unwrap();
    let vals_unpruned = unpruned.half_iteration(0).unwrap();
    for (a, b) in vals_pruned.iter().zip(&vals_unpruned) {
        assert!((a - b).abs() < 1e-12, "{vals_pruned:?} vs {vals_unpruned:?}");
    }
}

#[timed_test]
fn uniform_root_values_are_zero_sum() {
    let config = CfrConfig {
        uniform: true,
        ..CfrConfig::default()
    };
    let mut engine = two_street_engine(config);
    engine.set_iteration(1);
    let v0: f64 = engine.half_iteration(0).unwrap().iter().sum();
    let v1: f64 = engine.half_iteration(1).unwrap().iter().sum();
    assert!(
        (v0 + v1).abs() < 1e-9,
        "player values should cancel: {v0} + {v1}"
    );
}

#[timed_test]
fn one_street_zero_sum_holds_too() {
    let config = CfrConfig {
        uniform: true,
        ..CfrConfig::default()
    };
    let mut engine = one_street_engine(one_street_tree(), 3, config);
    let v0: f64 = engine.half_iteration(0).unwrap().iter().sum();
    let v1: f64 = engine.half_iteration(1).unwrap().iter().sum();
    assert!((v0 + v1).abs() < 1e-9, "{v0} + {v1}");
}

#[timed_test]
fn bucketed_exploration_floors_cached_strategy() {
    // Four successors, two of them terminal; explore 0.2 guarantees every
    // nonterminal successor at least 0.1 in the cached rows.
    let mut b = BettingTreeBuilder::new();
    let sd = b.showdown(0, 2);
    let fold = b.fold(0, 2, 0);
    let inner_a_sd = b.showdown(0, 4);
    let inner_b_sd = b.showdown(0, 4);
    let inner_a = b.choice(0, 1, 2, vec![inner_a_sd], Some(0), None);
    let inner_b = b.choice(0, 1, 2, vec![inner_b_sd], Some(0), None);
    let root = b.choice(0, 0, 2, vec![sd, fold, inner_a, inner_b], Some(0), Some(1));
    let tree = b.build(root, 0);

    let buckets = TableBuckets::new(vec![Some((2, vec![0, 1, 1]))]);
    let config = CfrConfig {
        explore: 0.2,
        ..CfrConfig::default()
    };
    let ctx = EngineContext::new(
        Box::new(OneCardGame { num_cards: 3 }),
        tree,
        Box::new(SingleRunout),
        Box::new(OneCardHands::new(3)),
        Box::new(buckets),
        Box::new(StandardPayoffs::new(1)),
        config,
    )
    .unwrap();
    let mut engine = CfrEngine::new(ctx);
    engine.refresh_current_strategy();

    let cache = engine.current_strategy().unwrap();
    let row = cache.row(0, 0, 0).unwrap();
    let num_succs = 4;
    for b_idx in 0..2 {
        let probs = &row[b_idx * num_succs..(b_idx + 1) * num_succs];
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "bucket {b_idx} row sums to {sum}");
        // Successors 2 and 3 are nonterminal.
        assert!(probs[2] >= 0.1 - 1e-12, "{probs:?}");
        assert!(probs[3] >= 0.1 - 1e-12, "{probs:?}");
    }
}

#[timed_test]
fn asymmetric_sumprobs_skip_the_dropped_player() {
    let ctx = EngineContext::new(
        Box::new(OneCardGame { num_cards: 3 }),
        one_street_tree(),
        Box::new(SingleRunout),
        Box::new(OneCardHands::new(3)),
        Box::new(NoBuckets),
        Box::new(StandardPayoffs::new(1)),
        CfrConfig::default(),
    )
    .unwrap()
    .with_sumprob_players([true, false]);
    let mut engine = CfrEngine::new(ctx);
    engine.run(2).unwrap();

    assert!(engine.sumprobs().players(0));
    assert!(!engine.sumprobs().players(1));
    assert!(engine.sumprobs().table(1, 0, 0).is_none());
    // Player 0 still accumulated.
    let table = engine.sumprobs().table(0, 0, 0).unwrap().read();
    assert!(table.as_int().unwrap().iter().any(|&s| s != 0));
}

#[timed_test]
fn short_best_response_vector_is_rejected() {
    let mut engine = two_street_engine(CfrConfig::default());
    let err = engine.set_best_response_streets(vec![true]).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[timed_test]
fn best_response_takes_per_hand_argmax() {
    // P0 best-responds between two showdown pots; the argmax per hand picks
    // whichever pot favors that hand.
    let mut b = BettingTreeBuilder::new();
    let small = b.showdown(0, 2);
    let big = b.showdown(0, 6);
    let root = b.choice(0, 0, 2, vec![small, big], Some(0), None);
    let tree = b.build(root, 0);
    let mut engine = one_street_engine(tree, 3, CfrConfig::default());
    engine.set_value_calculation(true);
    engine.set_best_response_streets(vec![true]).unwrap();

    let vals = engine.half_iteration(0).unwrap();
    // Pot 2 values [-2, 0, 2]; pot 6 values [-6, 0, 6]. Argmax: [-2, 0, 6].
    assert!((vals[0] + 2.0).abs() < 1e-12, "{vals:?}");
    assert!(vals[1].abs() < 1e-12, "{vals:?}");
    assert!((vals[2] - 6.0).abs() < 1e-12, "{vals:?}");
}

#[timed_test]
fn value_calculation_leaves_stores_untouched() {
    let mut engine = one_street_engine(one_street_tree(), 3, CfrConfig::default());
    engine.set_value_calculation(true);
    engine.set_iteration(1);
    engine.half_iteration(0).unwrap();

    let tree = engine.context().tree();
    for p in 0..2 {
        for nt in 0..tree.num_nonterminals(p, 0) {
            let regrets = engine.regrets().table(p, 0, nt).unwrap().read();
            assert!(regrets.as_int().unwrap().iter().all(|&r| r == 0));
            let sumprobs = engine.sumprobs().table(p, 0, nt).unwrap().read();
            assert!(sumprobs.as_int().unwrap().iter().all(|&s| s == 0));
        }
    }
}
