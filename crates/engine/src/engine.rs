//! The traversal engine.
//!
//! One [`CfrEngine`] performs post-order walks of the betting tree for a
//! fixed traverser, propagating opponent reach downward and counterfactual
//! values upward. Node dispatch follows the node kind: terminals delegate to
//! the payoff oracle, street crossings expand the board, the traverser's
//! choices mix successor values and update regrets, the opponent's choices
//! split reach and accumulate sumprobs.
//!
//! Storage dispatch happens once per node: the current-strategy values are
//! copied out of the typed table and the generic update routines run against
//! whichever element policy the table holds.

use std::sync::Arc;

use arrayvec::ArrayVec;
use parking_lot::RwLock;

use crate::MAX_SUCCS;
use crate::board::BoardTree;
use crate::buckets::Buckets;
use crate::cards::{Card, num_encodings};
use crate::config::{CfrConfig, StreetParams};
use crate::error::EngineError;
use crate::game::Game;
use crate::hands::HandTree;
use crate::probs::regrets_to_probs;
use crate::reach::{
    SumprobPolicy, StrategyInputs, hand_encoding, process_opp_probs, process_opp_probs_bucketed,
};
use crate::subgame::{Subgame, SubgamePool};
use crate::terminal::{TerminalPayoffs, common_bet_response_calcs};
use crate::tree::{BettingTree, Node, NodeId};
use crate::values::{CfrTables, CfrValue, CurrentStrategy, Table, halve_row_on_overflow};

/// Immutable collaborators and resolved parameters, shared between the main
/// engine and its subgame workers.
pub struct EngineContext {
    game: Box<dyn Game>,
    tree: BettingTree,
    boards: Box<dyn BoardTree>,
    hand_tree: Box<dyn HandTree>,
    buckets: Box<dyn Buckets>,
    payoffs: Box<dyn TerminalPayoffs>,
    config: CfrConfig,
    params: StreetParams,
    sumprob_players: [bool; 2],
}

impl EngineContext {
    /// Validate the configuration against the game and assemble the shared
    /// context.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for per-street vectors shorter than
    /// the street count, a zero-sized pool, out-of-range exploration, or a
    /// split at street zero.
    pub fn new(
        game: Box<dyn Game>,
        tree: BettingTree,
        boards: Box<dyn BoardTree>,
        hand_tree: Box<dyn HandTree>,
        buckets: Box<dyn Buckets>,
        payoffs: Box<dyn TerminalPayoffs>,
        config: CfrConfig,
    ) -> Result<Self, EngineError> {
        let params = config.resolve(game.max_street())?;
        if config.subgame_street == 0 {
            return Err(EngineError::Config(
                "subgame_street must be at least 1".into(),
            ));
        }
        Ok(Self {
            game,
            tree,
            boards,
            hand_tree,
            buckets,
            payoffs,
            config,
            params,
            sumprob_players: [true, true],
        })
    }

    /// Restrict sumprob allocation to selected players (asymmetric mode).
    #[must_use]
    pub fn with_sumprob_players(mut self, players: [bool; 2]) -> Self {
        self.sumprob_players = players;
        self
    }

    #[must_use]
    pub fn tree(&self) -> &BettingTree {
        &self.tree
    }

    #[must_use]
    pub fn game(&self) -> &dyn Game {
        self.game.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &CfrConfig {
        &self.config
    }

    #[must_use]
    pub fn params(&self) -> &StreetParams {
        &self.params
    }

    fn split_active(&self) -> bool {
        self.config.subgame_street <= self.game.max_street()
    }
}

/// `[player][nt][parent board]` cache of joined subgame value vectors.
type FinalValsCache = Vec<Vec<Vec<Option<Vec<f64>>>>>;

/// Board-slice copy of the current-strategy source values for one node.
enum CsVals {
    Int(Vec<i32>),
    Double(Vec<f64>),
}

fn copy_cs_slice(table: &RwLock<Table>, offset: usize, len: usize) -> CsVals {
    let guard = table.read();
    match &*guard {
        Table::Int(v) => CsVals::Int(v[offset..offset + len].to_vec()),
        Table::Double(v) => CsVals::Double(v[offset..offset + len].to_vec()),
    }
}

/// Vanilla CFR traversal over a betting tree.
///
/// Construct once, then drive with [`run`](Self::run) for full iterations or
/// [`half_iteration`](Self::half_iteration) for one traverser's pass. Mode
/// setters switch the same recursion between learning, value-only, and
/// best-response behavior.
pub struct CfrEngine {
    ctx: Arc<EngineContext>,
    regrets: Arc<CfrTables>,
    sumprobs: Arc<CfrTables>,
    current_strategy: Option<Arc<CurrentStrategy>>,

    /// `street_buckets[st][hand]` for the boards on the current traversal
    /// path; refreshed at each street boundary.
    street_buckets: Vec<Vec<usize>>,

    p: usize,
    target_p: usize,
    it: u32,
    last_checkpoint_it: u32,

    value_calculation: bool,
    br_current: bool,
    best_response_streets: Vec<bool>,
    always_call_preflop: bool,
    prune: bool,
    pre_phase: bool,

    inside_subgame: bool,
    root_bd_st: usize,
    root_bd: usize,

    pool: Option<SubgamePool>,
    final_vals: FinalValsCache,
}

impl CfrEngine {
    /// Build the main engine: allocates both stores and, when the subgame
    /// split is active, the worker pool and final-vals cache.
    #[must_use]
    pub fn new(ctx: EngineContext) -> Self {
        let regrets = Arc::new(CfrTables::allocate(
            &ctx.tree,
            ctx.game.as_ref(),
            ctx.boards.as_ref(),
            ctx.buckets.as_ref(),
            &ctx.params.bucket_thresholds,
            ctx.config.double_regrets,
            [true, true],
        ));
        let sumprobs = Arc::new(CfrTables::allocate(
            &ctx.tree,
            ctx.game.as_ref(),
            ctx.boards.as_ref(),
            ctx.buckets.as_ref(),
            &ctx.params.bucket_thresholds,
            ctx.config.double_sumprobs,
            ctx.sumprob_players,
        ));

        let (pool, final_vals) = if ctx.split_active() {
            let split = ctx.config.subgame_street;
            let num_boards = ctx.boards.num_boards(split - 1);
            let cache: FinalValsCache = (0..2)
                .map(|p| {
                    (0..ctx.tree.num_nonterminals(p, split))
                        .map(|_| vec![None; num_boards])
                        .collect()
                })
                .collect();
            (Some(SubgamePool::new(ctx.config.num_threads)), cache)
        } else {
            (None, vec![Vec::new(), Vec::new()])
        };

        let ctx = Arc::new(ctx);
        let mut engine = Self {
            street_buckets: street_bucket_scratch(&ctx),
            regrets,
            sumprobs,
            current_strategy: None,
            p: 0,
            target_p: usize::MAX,
            it: 0,
            last_checkpoint_it: 0,
            value_calculation: false,
            br_current: false,
            best_response_streets: vec![false; ctx.game.max_street() + 1],
            always_call_preflop: false,
            prune: true,
            pre_phase: false,
            inside_subgame: false,
            root_bd_st: 0,
            root_bd: 0,
            pool,
            final_vals,
            ctx,
        };
        engine.prefill_street_zero_buckets();
        engine
    }

    /// A worker-side engine sharing the main engine's stores, rooted at a
    /// subgame board. No pool, no final-vals cache, no re-splitting.
    pub(crate) fn subgame_instance(
        ctx: Arc<EngineContext>,
        regrets: Arc<CfrTables>,
        sumprobs: Arc<CfrTables>,
        current_strategy: Option<Arc<CurrentStrategy>>,
        root_bd_st: usize,
        root_bd: usize,
    ) -> Self {
        let mut engine = Self {
            street_buckets: street_bucket_scratch(&ctx),
            regrets,
            sumprobs,
            current_strategy,
            p: 0,
            target_p: usize::MAX,
            it: 0,
            last_checkpoint_it: 0,
            value_calculation: false,
            br_current: false,
            best_response_streets: vec![false; ctx.game.max_street() + 1],
            always_call_preflop: false,
            prune: true,
            pre_phase: false,
            inside_subgame: true,
            root_bd_st,
            root_bd,
            pool: None,
            final_vals: vec![Vec::new(), Vec::new()],
            ctx,
        };
        engine.prefill_street_zero_buckets();
        engine
    }

    // --- mode setters -----------------------------------------------------

    pub fn set_iteration(&mut self, it: u32) {
        self.it = it;
    }

    pub fn set_last_checkpoint_it(&mut self, it: u32) {
        self.last_checkpoint_it = it;
    }

    pub fn set_target_p(&mut self, target_p: usize) {
        self.target_p = target_p;
    }

    /// Value-only traversal: read strategy from sumprobs, never mutate
    /// either store.
    pub fn set_value_calculation(&mut self, on: bool) {
        self.value_calculation = on;
    }

    /// In value-only runs, derive the opponent's strategy from regrets (the
    /// current iterate) instead of sumprobs.
    pub fn set_br_current(&mut self, on: bool) {
        self.br_current = on;
    }

    /// Streets on which the traverser plays a per-hand best response rather
    /// than the current mixed strategy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when fewer than `max_street + 1`
    /// entries are supplied.
    pub fn set_best_response_streets(&mut self, streets: Vec<bool>) -> Result<(), EngineError> {
        let need = self.ctx.game.max_street() + 1;
        if streets.len() < need {
            return Err(EngineError::Config(format!(
                "best_response_streets has {} entries, need {need}",
                streets.len()
            )));
        }
        self.best_response_streets = streets;
        Ok(())
    }

    pub fn set_always_call_preflop(&mut self, on: bool) {
        self.always_call_preflop = on;
    }

    /// Skip opponent-choice branches whose reach sum is zero.
    pub fn set_prune(&mut self, on: bool) {
        self.prune = on;
    }

    pub fn set_pre_phase(&mut self, on: bool) {
        self.pre_phase = on;
    }

    // --- accessors --------------------------------------------------------

    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    #[must_use]
    pub fn regrets(&self) -> &CfrTables {
        &self.regrets
    }

    #[must_use]
    pub fn sumprobs(&self) -> &CfrTables {
        &self.sumprobs
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.it
    }

    /// The bucketed strategy cache for the current iteration, if built.
    #[must_use]
    pub fn current_strategy(&self) -> Option<&CurrentStrategy> {
        self.current_strategy.as_deref()
    }

    // --- drivers ----------------------------------------------------------

    /// Run full CFR iterations: refresh the bucketed strategy cache, run a
    /// half iteration per player, then apply the deferred bucketed floor
    /// pass.
    ///
    /// # Errors
    ///
    /// Propagates any traversal or pool error.
    pub fn run(&mut self, num_iterations: u32) -> Result<(), EngineError> {
        let max_street = self.ctx.game.max_street();
        let any_bucketed = (0..=max_street).any(|st| !self.ctx.buckets.none(st));
        for _ in 0..num_iterations {
            self.it += 1;
            log::debug!("iteration {}", self.it);
            if any_bucketed {
                self.refresh_current_strategy();
            }
            for p in 0..self.ctx.game.num_players() {
                self.half_iteration(p)?;
            }
            if any_bucketed && self.ctx.config.nnr && !self.value_calculation {
                self.regrets.floor_bucketed(&self.ctx.params.regret_floors);
            }
        }
        Ok(())
    }

    /// One traversal pass for player `p` from the tree root with uniform
    /// opponent reach. Runs the pre-phase spawn pass first when the subgame
    /// split is active. Returns the root value vector.
    ///
    /// # Errors
    ///
    /// Propagates traversal errors, missing subgame results, and pool
    /// failures.
    pub fn half_iteration(&mut self, p: usize) -> Result<Vec<f64>, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        self.p = p;
        let root = ctx.tree.root();
        let root_st = ctx.tree.node(root).street();
        let num_hole_cards = ctx.game.num_cards_for_street(0);
        let max_card = ctx.game.max_card();
        let opp_probs = vec![1.0; num_encodings(max_card, num_hole_cards)];
        let hands = ctx.hand_tree.hands(root_st, self.global_board(root_st, 0));
        let mut total_card_probs = vec![0.0; usize::from(max_card) + 1];
        let sum_opp_probs = common_bet_response_calcs(
            hands,
            num_hole_cards,
            max_card,
            &opp_probs,
            &mut total_card_probs,
        );

        if ctx.split_active() && !self.inside_subgame {
            if let Some(pool) = &self.pool {
                pool.reset_for_pass();
            }
            self.pre_phase = true;
            let result = self.process(
                root,
                0,
                &opp_probs,
                sum_opp_probs,
                Some(&total_card_probs),
                "",
                root_st,
            );
            self.pre_phase = false;
            result?;
            self.wait_for_final_subgames()?;
        }

        self.process(
            root,
            0,
            &opp_probs,
            sum_opp_probs,
            Some(&total_card_probs),
            "",
            root_st,
        )
    }

    /// Worker entry point: expand the split-street node rooted at this
    /// engine's board and return parent-street values.
    pub(crate) fn run_subgame(
        &mut self,
        root: NodeId,
        p: usize,
        opp_probs: &[f64],
        action_seq: &str,
    ) -> Result<Vec<f64>, EngineError> {
        self.p = p;
        let parent_st = self.ctx.tree.node(root).street() - 1;
        self.process(root, 0, opp_probs, 0.0, None, action_seq, parent_st)
    }

    /// Join every outstanding subgame into the final-vals cache. Calling
    /// again with nothing outstanding is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates pool invariant violations and worker errors.
    pub fn wait_for_final_subgames(&mut self) -> Result<(), EngineError> {
        let Some(mut pool) = self.pool.take() else {
            return Ok(());
        };
        let mut harvested = Vec::new();
        let result = pool.wait_for_all(|subgame| {
            harvested.push(subgame);
            Ok(())
        });
        self.pool = Some(pool);
        result?;
        for mut subgame in harvested {
            self.install_final_vals(&mut subgame)?;
        }
        Ok(())
    }

    // --- recursion --------------------------------------------------------

    /// Post-order traversal dispatch. Returns one counterfactual value per
    /// hole-card pair of the node's street.
    ///
    /// # Errors
    ///
    /// Propagates storage-policy and subgame errors.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        node_id: NodeId,
        lbd: usize,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: Option<&[f64]>,
        action_seq: &str,
        last_st: usize,
    ) -> Result<Vec<f64>, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let node = ctx.tree.node(node_id);
        let st = node.street();
        if node.terminal() {
            let hands = ctx.hand_tree.hands(st, self.global_board(st, lbd));
            let total_card_probs =
                total_card_probs.expect("terminal reached without opponent-reach marginals");
            let vals = if node.showdown() {
                ctx.payoffs
                    .showdown(node, hands, opp_probs, sum_opp_probs, total_card_probs)
            } else {
                ctx.payoffs
                    .fold(node, self.p, hands, opp_probs, sum_opp_probs, total_card_probs)
            };
            return Ok(vals);
        }
        if st > last_st {
            return self.street_initial(node_id, lbd, opp_probs, action_seq);
        }
        if node.player_acting() == self.p {
            self.our_choice(node_id, lbd, opp_probs, sum_opp_probs, total_card_probs, action_seq)
        } else {
            self.opp_choice(node_id, lbd, opp_probs, sum_opp_probs, total_card_probs, action_seq)
        }
    }

    /// Traverser's decision: recurse into every successor, mix values under
    /// the current strategy (or take the best response), and update regrets
    /// when learning.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn our_choice(
        &mut self,
        node_id: NodeId,
        lbd: usize,
        opp_probs: &[f64],
        sum_opp_probs: f64,
        total_card_probs: Option<&[f64]>,
        action_seq: &str,
    ) -> Result<Vec<f64>, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let node = ctx.tree.node(node_id);
        let st = node.street();
        let nt = node.nonterminal_id();
        let num_succs = node.num_succs();
        let num_hole_card_pairs = ctx.game.num_hole_card_pairs(st);

        let mut succ_vals: Vec<Vec<f64>> = Vec::with_capacity(num_succs);
        for s in 0..num_succs {
            let seq = format!("{action_seq}{}", node.action_name(s));
            succ_vals.push(self.process(
                node.ith_succ(s),
                lbd,
                opp_probs,
                sum_opp_probs,
                total_card_probs,
                &seq,
                st,
            )?);
        }
        if num_succs == 1 {
            return Ok(succ_vals.pop().expect("one successor"));
        }

        let mut vals = vec![0.0; num_hole_card_pairs];
        if self.best_response_streets[st] {
            if self.always_call_preflop && st == 0 {
                let csi = node.default_succ_index();
                vals.copy_from_slice(&succ_vals[csi]);
            } else {
                for i in 0..num_hole_card_pairs {
                    vals[i] = succ_vals
                        .iter()
                        .map(|sv| sv[i])
                        .fold(f64::NEG_INFINITY, f64::max);
                }
            }
            return Ok(vals);
        }

        let learning = !self.value_calculation && !self.pre_phase;
        let bucketed = self.node_bucketed(node);
        if bucketed {
            let cache = self.current_strategy.as_ref().ok_or_else(|| {
                EngineError::Config("bucketed street traversed without a strategy cache".into())
            })?;
            let row = cache.row(self.p, st, nt).ok_or_else(|| {
                EngineError::Config(format!(
                    "no cached strategy for player {} street {st} nonterminal {nt}",
                    self.p
                ))
            })?;
            for i in 0..num_hole_card_pairs {
                let b = self.street_buckets[st][i];
                for (s, sv) in succ_vals.iter().enumerate() {
                    vals[i] += sv[i] * row[b * num_succs + s];
                }
            }
            if learning {
                let table = self
                    .regrets
                    .table(self.p, st, nt)
                    .expect("regrets allocated for both players");
                let mut guard = table.write();
                let ceiling = ctx.params.regret_ceilings[st];
                let scaling = ctx.params.regret_scaling[st];
                match &mut *guard {
                    Table::Int(v) => update_regrets_bucketed(
                        v,
                        num_succs,
                        &vals,
                        &succ_vals,
                        &self.street_buckets[st],
                        ceiling,
                        scaling,
                        ctx.config.nnr,
                    ),
                    Table::Double(v) => update_regrets_bucketed(
                        v,
                        num_succs,
                        &vals,
                        &succ_vals,
                        &self.street_buckets[st],
                        ceiling,
                        scaling,
                        ctx.config.nnr,
                    ),
                }
            }
            return Ok(vals);
        }

        // Unabstracted: derive the strategy per hand pair on the fly.
        let use_avg = self.value_calculation
            || (ctx.config.use_avg_for_current_it > 0
                && self.it >= ctx.config.use_avg_for_current_it);
        let (source, nonneg, explore) = if use_avg {
            (Arc::clone(&self.sumprobs), true, 0.0)
        } else {
            (
                Arc::clone(&self.regrets),
                ctx.config.nnr && ctx.params.regret_floors[st] >= 0,
                ctx.config.explore,
            )
        };
        let (nonterminal_succs, num_nonterminal_succs) = self.nonterminal_mask(node);
        let gbd = self.global_board(st, lbd);
        let offset = gbd * num_hole_card_pairs * num_succs;
        let len = num_hole_card_pairs * num_succs;
        let table = source.table(self.p, st, nt).ok_or_else(|| {
            EngineError::Config(format!("no strategy source for player {}", self.p))
        })?;
        let cs = copy_cs_slice(table, offset, len);
        let strategy = StrategyInputs {
            nonneg,
            uniform: ctx.config.uniform,
            default_succ_index: node.default_succ_index(),
            explore,
            num_nonterminal_succs,
            nonterminal_succs: &nonterminal_succs,
        };
        match &cs {
            CsVals::Int(v) => mix_values(v, num_succs, &succ_vals, &strategy, &mut vals),
            CsVals::Double(v) => mix_values(v, num_succs, &succ_vals, &strategy, &mut vals),
        }
        if learning {
            let floor = ctx.params.regret_floors[st];
            let ceiling = ctx.params.regret_ceilings[st];
            let scaling = ctx.params.regret_scaling[st];
            let mut guard = table.write();
            match &cs {
                CsVals::Int(_) => update_regrets(
                    &mut guard.as_int_mut()?[offset..offset + len],
                    num_succs,
                    &vals,
                    &succ_vals,
                    floor,
                    ceiling,
                    scaling,
                    ctx.config.nnr,
                ),
                CsVals::Double(_) => update_regrets(
                    &mut guard.as_double_mut()?[offset..offset + len],
                    num_succs,
                    &vals,
                    &succ_vals,
                    floor,
                    ceiling,
                    scaling,
                    ctx.config.nnr,
                ),
            }
        }
        Ok(vals)
    }

    /// Opponent's decision: split reach across successors, accumulate
    /// sumprobs, recurse, and sum the surviving branches' values.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    fn opp_choice(
        &mut self,
        node_id: NodeId,
        lbd: usize,
        opp_probs: &[f64],
        _sum_opp_probs: f64,
        _total_card_probs: Option<&[f64]>,
        action_seq: &str,
    ) -> Result<Vec<f64>, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let node = ctx.tree.node(node_id);
        let st = node.street();
        let nt = node.nonterminal_id();
        let num_succs = node.num_succs();
        let num_hole_card_pairs = ctx.game.num_hole_card_pairs(st);
        let num_hole_cards = ctx.game.num_cards_for_street(0);
        let max_card = ctx.game.max_card();
        let gbd = self.global_board(st, lbd);
        let hands = ctx.hand_tree.hands(st, gbd);
        let opp = self.p ^ 1;

        let mut succ_opp_probs: Vec<Vec<f64>> = if num_succs == 1 {
            vec![opp_probs.to_vec()]
        } else {
            vec![vec![0.0; opp_probs.len()]; num_succs]
        };

        if num_succs > 1 {
            let value_only = self.value_calculation && !self.br_current;
            let explore = if value_only { 0.0 } else { ctx.config.explore };
            let nonneg = if value_only {
                true
            } else {
                ctx.config.nnr && ctx.params.regret_floors[st] >= 0
            };
            let policy = SumprobPolicy {
                value_calculation: self.value_calculation,
                it: self.it,
                soft_warmup: ctx.config.soft_warmup,
                hard_warmup: ctx.config.hard_warmup,
                scaling: ctx.params.sumprob_scaling[st],
            };
            let update_sumprobs = ctx.params.sumprob_streets[st]
                && self.sumprobs.players(opp)
                && !self.pre_phase
                && !self.value_calculation;
            let bucketed = self.node_bucketed(node);

            if bucketed {
                let cache = self.current_strategy.as_ref().ok_or_else(|| {
                    EngineError::Config("bucketed street traversed without a strategy cache".into())
                })?;
                let current_probs = cache.row(opp, st, nt).ok_or_else(|| {
                    EngineError::Config(format!(
                        "no cached strategy for player {opp} street {st} nonterminal {nt}"
                    ))
                })?;
                if update_sumprobs {
                    let table = self
                        .sumprobs
                        .table(opp, st, nt)
                        .expect("gated on players()");
                    let mut guard = table.write();
                    match &mut *guard {
                        Table::Int(v) => process_opp_probs_bucketed::<i32>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            current_probs,
                            &self.street_buckets[st],
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(v),
                            &policy,
                        ),
                        Table::Double(v) => process_opp_probs_bucketed::<f64>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            current_probs,
                            &self.street_buckets[st],
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(v),
                            &policy,
                        ),
                    }
                } else {
                    process_opp_probs_bucketed::<f64>(
                        hands,
                        num_hole_cards,
                        max_card,
                        num_succs,
                        current_probs,
                        &self.street_buckets[st],
                        opp_probs,
                        &mut succ_opp_probs,
                        None,
                        &policy,
                    );
                }
            } else {
                let use_avg = value_only
                    || (ctx.config.use_avg_for_current_it > 0
                        && self.it >= ctx.config.use_avg_for_current_it);
                let source = if use_avg {
                    Arc::clone(&self.sumprobs)
                } else {
                    Arc::clone(&self.regrets)
                };
                let offset = gbd * num_hole_card_pairs * num_succs;
                let len = num_hole_card_pairs * num_succs;
                let cs_table = source.table(opp, st, nt).ok_or_else(|| {
                    EngineError::Config(format!("no strategy source for player {opp}"))
                })?;
                let cs = copy_cs_slice(cs_table, offset, len);
                let (nonterminal_succs, num_nonterminal_succs) = self.nonterminal_mask(node);
                let strategy = StrategyInputs {
                    nonneg,
                    uniform: ctx.config.uniform,
                    default_succ_index: node.default_succ_index(),
                    explore,
                    num_nonterminal_succs,
                    nonterminal_succs: &nonterminal_succs,
                };
                if update_sumprobs {
                    let table = self
                        .sumprobs
                        .table(opp, st, nt)
                        .expect("gated on players()");
                    let mut guard = table.write();
                    match (&cs, &mut *guard) {
                        (CsVals::Int(v), Table::Int(sp)) => process_opp_probs::<i32, i32>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(&mut sp[offset..offset + len]),
                            &policy,
                        ),
                        (CsVals::Int(v), Table::Double(sp)) => process_opp_probs::<i32, f64>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(&mut sp[offset..offset + len]),
                            &policy,
                        ),
                        (CsVals::Double(v), Table::Int(sp)) => process_opp_probs::<f64, i32>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(&mut sp[offset..offset + len]),
                            &policy,
                        ),
                        (CsVals::Double(v), Table::Double(sp)) => process_opp_probs::<f64, f64>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            Some(&mut sp[offset..offset + len]),
                            &policy,
                        ),
                    }
                } else {
                    match &cs {
                        CsVals::Int(v) => process_opp_probs::<i32, f64>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            None,
                            &policy,
                        ),
                        CsVals::Double(v) => process_opp_probs::<f64, f64>(
                            hands,
                            num_hole_cards,
                            max_card,
                            num_succs,
                            &strategy,
                            v,
                            opp_probs,
                            &mut succ_opp_probs,
                            None,
                            &policy,
                        ),
                    }
                }
            }
        }

        let mut vals: Option<Vec<f64>> = None;
        let mut succ_total_card_probs = vec![0.0; usize::from(max_card) + 1];
        for s in 0..num_succs {
            let succ_sum_opp_probs = common_bet_response_calcs(
                hands,
                num_hole_cards,
                max_card,
                &succ_opp_probs[s],
                &mut succ_total_card_probs,
            );
            if self.prune && succ_sum_opp_probs == 0.0 {
                continue;
            }
            let seq = format!("{action_seq}{}", node.action_name(s));
            let succ_vals = self.process(
                node.ith_succ(s),
                lbd,
                &succ_opp_probs[s],
                succ_sum_opp_probs,
                Some(&succ_total_card_probs),
                &seq,
                st,
            )?;
            match vals.as_mut() {
                None => vals = Some(succ_vals),
                Some(acc) => {
                    for (a, v) in acc.iter_mut().zip(&succ_vals) {
                        *a += v;
                    }
                }
            }
        }
        // Every branch pruned: the board cards just dealt blocked every
        // opponent holding that still had reach.
        Ok(vals.unwrap_or_else(|| vec![0.0; num_hole_card_pairs]))
    }

    /// Board-card dealing boundary: expand every reachable successor board,
    /// fold next-street values back onto parent-street canonical holdings,
    /// and normalise by deal multiplicity.
    #[allow(clippy::too_many_lines)]
    fn street_initial(
        &mut self,
        node_id: NodeId,
        plbd: usize,
        opp_probs: &[f64],
        action_seq: &str,
    ) -> Result<Vec<f64>, EngineError> {
        let ctx = Arc::clone(&self.ctx);
        let node = ctx.tree.node(node_id);
        let nst = node.street();
        let pst = nst - 1;
        let prev_num_hole_card_pairs = ctx.game.num_hole_card_pairs(pst);

        if nst == ctx.config.subgame_street && !self.inside_subgame {
            if self.pre_phase {
                self.spawn_subgame(node_id, plbd, action_seq, opp_probs)?;
                // The caller expects a value vector; the real values arrive
                // in the non-prephase pass.
                return Ok(vec![0.0; prev_num_hole_card_pairs]);
            }
            let player = node.player_acting();
            let nt = node.nonterminal_id();
            return self.final_vals[player][nt][plbd]
                .take()
                .ok_or(EngineError::MissingFinalVals {
                    player,
                    nt,
                    board: plbd,
                });
        }

        let num_hole_cards = ctx.game.num_cards_for_street(0);
        let max_card = ctx.game.max_card();
        let pgbd = self.global_board(pst, plbd);
        let pred_hands = ctx.hand_tree.hands(pst, pgbd);

        // Reverse map from encoding to parent canonical hand index, covering
        // non-canonical holdings through their representative.
        let mut prev_canons = vec![0usize; num_encodings(max_card, num_hole_cards)];
        for ph in 0..prev_num_hole_card_pairs {
            let enc = hand_encoding(num_hole_cards, max_card, pred_hands.cards(ph));
            prev_canons[enc] = pred_hands.canon(ph);
        }

        let mut vals = vec![0.0; prev_num_hole_card_pairs];
        let ngbd_begin = ctx.boards.succ_board_begin(pst, pgbd, nst);
        let ngbd_end = ctx.boards.succ_board_end(pst, pgbd, nst);
        for ngbd in ngbd_begin..ngbd_end {
            let nlbd = if self.root_bd_st == 0 {
                ngbd
            } else {
                ctx.boards.local_index(self.root_bd_st, self.root_bd, nst, ngbd)
            };
            let hands = ctx.hand_tree.hands(nst, ngbd);
            if !ctx.buckets.none(nst) {
                self.fill_street_buckets(nst, ngbd, hands);
            }
            // Reach is unchanged across a chance node; marginals are
            // recomputed at the next opponent choice.
            let next_vals = self.process(node_id, nlbd, opp_probs, 0.0, None, action_seq, nst)?;
            let board_variants = f64::from(ctx.boards.num_variants(nst, ngbd));
            let hands = ctx.hand_tree.hands(nst, ngbd);
            for (nh, nv) in next_vals.iter().enumerate() {
                let enc = hand_encoding(num_hole_cards, max_card, hands.cards(nh));
                vals[prev_canons[enc]] += board_variants * nv;
            }
        }

        let scale_down = ctx.game.street_permutations(nst);
        for ph in 0..prev_num_hole_card_pairs {
            let variants = pred_hands.num_variants(ph);
            if variants > 0 {
                vals[ph] /= scale_down * f64::from(variants);
            }
        }
        for ph in 0..prev_num_hole_card_pairs {
            if pred_hands.num_variants(ph) == 0 {
                let enc = hand_encoding(num_hole_cards, max_card, pred_hands.cards(ph));
                vals[ph] = vals[prev_canons[enc]];
            }
        }
        Ok(vals)
    }

    // --- bucketed current-strategy cache ----------------------------------

    /// Rebuild the bucketed current-strategy cache from the configured
    /// source store. Call once per iteration before traversing.
    pub fn refresh_current_strategy(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let max_street = ctx.game.max_street();
        let mut cache = CurrentStrategy::shaped(&ctx.tree, max_street);
        for id in 0..ctx.tree.num_nodes() {
            let node = ctx.tree.node(id);
            if node.terminal() || node.num_succs() <= 1 || !self.node_bucketed(node) {
                continue;
            }
            let p = node.player_acting();
            let st = node.street();
            let nt = node.nonterminal_id();
            let num_succs = node.num_succs();
            let use_avg = self.value_calculation
                || (ctx.config.use_avg_for_current_it > 0
                    && self.it >= ctx.config.use_avg_for_current_it);
            let (source, nonneg, explore) = if use_avg {
                (&self.sumprobs, true, 0.0)
            } else {
                (
                    &self.regrets,
                    ctx.config.nnr && ctx.params.regret_floors[st] >= 0,
                    ctx.config.explore,
                )
            };
            let Some(table) = source.table(p, st, nt) else {
                continue;
            };
            let num_buckets = ctx.buckets.num_buckets(st);
            let (nonterminal_succs, num_nonterminal_succs) = self.nonterminal_mask(node);
            let cs = copy_cs_slice(table, 0, num_buckets * num_succs);
            let mut row = vec![0.0; num_buckets * num_succs];
            for b in 0..num_buckets {
                let out = &mut row[b * num_succs..(b + 1) * num_succs];
                match &cs {
                    CsVals::Int(v) => regrets_to_probs(
                        &v[b * num_succs..(b + 1) * num_succs],
                        nonneg,
                        ctx.config.uniform,
                        node.default_succ_index(),
                        explore,
                        num_nonterminal_succs,
                        &nonterminal_succs,
                        out,
                    ),
                    CsVals::Double(v) => regrets_to_probs(
                        &v[b * num_succs..(b + 1) * num_succs],
                        nonneg,
                        ctx.config.uniform,
                        node.default_succ_index(),
                        explore,
                        num_nonterminal_succs,
                        &nonterminal_succs,
                        out,
                    ),
                }
            }
            cache.set_row(p, st, nt, row);
        }
        self.current_strategy = Some(Arc::new(cache));
    }

    // --- helpers ----------------------------------------------------------

    fn node_bucketed(&self, node: &Node) -> bool {
        let st = node.street();
        !self.ctx.buckets.none(st)
            && node.pot_size() < self.ctx.params.bucket_thresholds[st]
    }

    fn global_board(&self, st: usize, lbd: usize) -> usize {
        if self.root_bd_st == 0 {
            lbd
        } else {
            self.ctx
                .boards
                .global_index(self.root_bd_st, self.root_bd, st, lbd)
        }
    }

    fn nonterminal_mask(&self, node: &Node) -> (ArrayVec<bool, MAX_SUCCS>, usize) {
        let mut mask = ArrayVec::new();
        let mut count = 0;
        for s in 0..node.num_succs() {
            let nonterminal = !self.ctx.tree.node(node.ith_succ(s)).terminal();
            mask.push(nonterminal);
            count += usize::from(nonterminal);
        }
        (mask, count)
    }

    /// Populate `street_buckets[nst]` for the hands on board `ngbd`. On the
    /// final street holdings are reordered by hand value, so the unordered
    /// pair index is recovered through the hand tree.
    fn fill_street_buckets(&mut self, nst: usize, ngbd: usize, hands: &crate::hands::CanonicalCards) {
        let ctx = Arc::clone(&self.ctx);
        let num_hole_card_pairs = ctx.game.num_hole_card_pairs(nst);
        let max_street = ctx.game.max_street();
        if nst == max_street {
            let board = ctx.boards.board(nst, ngbd);
            let mut cards: Vec<Card> = Vec::with_capacity(2 + board.len());
            for i in 0..num_hole_card_pairs {
                cards.clear();
                let hole = hands.cards(i);
                cards.push(hole[0]);
                cards.push(hole[1]);
                cards.extend_from_slice(board);
                let hcp = ctx.hand_tree.hcp_index(nst, &cards);
                let h = ngbd * num_hole_card_pairs + hcp;
                self.street_buckets[nst][i] = ctx.buckets.bucket(nst, h);
            }
        } else {
            for i in 0..num_hole_card_pairs {
                let h = ngbd * num_hole_card_pairs + i;
                self.street_buckets[nst][i] = ctx.buckets.bucket(nst, h);
            }
        }
    }

    fn prefill_street_zero_buckets(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        if ctx.buckets.none(0) {
            return;
        }
        let num_hole_card_pairs = ctx.game.num_hole_card_pairs(0);
        if ctx.game.max_street() == 0 {
            let gbd = self.global_board(0, 0);
            let hands = ctx.hand_tree.hands(0, gbd);
            self.fill_street_buckets(0, gbd, hands);
        } else {
            for i in 0..num_hole_card_pairs {
                self.street_buckets[0][i] = ctx.buckets.bucket(0, i);
            }
        }
    }

    // --- subgame plumbing -------------------------------------------------

    fn spawn_subgame(
        &mut self,
        node_id: NodeId,
        plbd: usize,
        action_seq: &str,
        opp_probs: &[f64],
    ) -> Result<(), EngineError> {
        let pst = self.ctx.tree.node(node_id).street() - 1;
        let pgbd = self.global_board(pst, plbd);
        let subgame = Subgame::new(
            Arc::clone(&self.ctx),
            Arc::clone(&self.regrets),
            Arc::clone(&self.sumprobs),
            self.current_strategy.clone(),
            node_id,
            plbd,
            pgbd,
            action_seq.to_string(),
            self.p,
            self.target_p,
            self.it,
            self.last_checkpoint_it,
            opp_probs.to_vec(),
            self.value_calculation,
            self.br_current,
            self.best_response_streets.clone(),
        );
        let mut pool = self.pool.take().ok_or_else(|| {
            EngineError::ConcurrencyInvariant("subgame split active without a pool".into())
        })?;
        let stale = pool.spawn(subgame);
        self.pool = Some(pool);
        if let Some(mut stale) = stale? {
            self.install_final_vals(&mut stale)?;
        }
        Ok(())
    }

    fn install_final_vals(&mut self, subgame: &mut Subgame) -> Result<(), EngineError> {
        let root = self.ctx.tree.node(subgame.root());
        let player = root.player_acting();
        let nt = root.nonterminal_id();
        let plbd = subgame.parent_lbd();
        let vals = subgame.take_final_vals()?;
        log::debug!("joined subgame player {player} nt {nt} board {plbd}");
        self.final_vals[player][nt][plbd] = Some(vals);
        Ok(())
    }
}

fn street_bucket_scratch(ctx: &EngineContext) -> Vec<Vec<usize>> {
    (0..=ctx.game.max_street())
        .map(|st| {
            if ctx.buckets.none(st) {
                Vec::new()
            } else {
                vec![0; ctx.game.num_hole_card_pairs(st)]
            }
        })
        .collect()
}

/// Mix successor values under the strategy derived from `cs_vals`, one hand
/// pair at a time.
fn mix_values<T: CfrValue>(
    cs_vals: &[T],
    num_succs: usize,
    succ_vals: &[Vec<f64>],
    strategy: &StrategyInputs<'_>,
    vals: &mut [f64],
) {
    let mut current_probs: ArrayVec<f64, MAX_SUCCS> = ArrayVec::new();
    for _ in 0..num_succs {
        current_probs.push(0.0);
    }
    for (i, val) in vals.iter_mut().enumerate() {
        regrets_to_probs(
            &cs_vals[i * num_succs..(i + 1) * num_succs],
            strategy.nonneg,
            strategy.uniform,
            strategy.default_succ_index,
            strategy.explore,
            strategy.num_nonterminal_succs,
            strategy.nonterminal_succs,
            &mut current_probs,
        );
        let mut acc = 0.0;
        for (s, sv) in succ_vals.iter().enumerate() {
            acc += sv[i] * current_probs[s];
        }
        *val = acc;
    }
}

/// Two-pass regret update for unabstracted nodes. With `nn_regrets` every
/// element is clamped into `[floor, ceiling]`; otherwise updates run free
/// and integer rows halve on overflow.
#[allow(clippy::too_many_arguments)]
fn update_regrets<T: CfrValue>(
    regrets: &mut [T],
    num_succs: usize,
    vals: &[f64],
    succ_vals: &[Vec<f64>],
    floor: i32,
    ceiling: i32,
    scaling: f64,
    nn_regrets: bool,
) {
    for (i, &val) in vals.iter().enumerate() {
        let row = &mut regrets[i * num_succs..(i + 1) * num_succs];
        if nn_regrets {
            for (s, sv) in succ_vals.iter().enumerate() {
                row[s] = row[s].add_update(sv[i] - val, scaling).clamp_to(floor, ceiling);
            }
        } else {
            for (s, sv) in succ_vals.iter().enumerate() {
                row[s] = row[s].add_update(sv[i] - val, scaling);
            }
            halve_row_on_overflow(row);
        }
    }
}

/// Regret update for bucketed nodes. No flooring on this path; the deferred
/// floor pass runs at end of iteration. With `nn_regrets` only the ceiling
/// clamps, and integer overflow halving is not applied; without it, updates
/// run free with overflow halving.
#[allow(clippy::too_many_arguments)]
fn update_regrets_bucketed<T: CfrValue>(
    regrets: &mut [T],
    num_succs: usize,
    vals: &[f64],
    succ_vals: &[Vec<f64>],
    street_buckets: &[usize],
    ceiling: i32,
    scaling: f64,
    nn_regrets: bool,
) {
    for (i, &val) in vals.iter().enumerate() {
        let b = street_buckets[i];
        let row = &mut regrets[b * num_succs..(b + 1) * num_succs];
        if nn_regrets {
            for (s, sv) in succ_vals.iter().enumerate() {
                row[s] = row[s].add_update(sv[i] - val, scaling).clamp_high(ceiling);
            }
        } else {
            for (s, sv) in succ_vals.iter().enumerate() {
                row[s] = row[s].add_update(sv[i] - val, scaling);
            }
            halve_row_on_overflow(row);
        }
    }
}
