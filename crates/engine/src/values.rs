//! Regret and sumprob storage.
//!
//! Each `(player, street, nonterminal)` owns one flat table, typed either
//! `i32` or `f64` at construction. The two element types carry different
//! numeric policies, captured by [`CfrValue`]: integers are fixed-point
//! (per-street scaling), clamp to configured bounds, and halve a whole row
//! when any entry crosses ±2e9; floats do none of that. Writing the update
//! routines against the trait collapses the four `{int,double}²` storage
//! combinations into single generic implementations.
//!
//! Tables sit behind `RwLock`s so subgame workers can share the store; the
//! traversal partition (one writer per nonterminal) keeps them uncontended.

use parking_lot::RwLock;
use rayon::prelude::*;

use crate::board::BoardTree;
use crate::buckets::Buckets;
use crate::error::EngineError;
use crate::game::Game;
use crate::tree::BettingTree;

/// Magnitude beyond which an integer row is halved.
pub const OVERFLOW_LIMIT: i64 = 2_000_000_000;

/// Numeric storage policy for regret/sumprob elements.
pub trait CfrValue: Copy + Into<f64> + Send + Sync + 'static {
    /// Type name used in [`EngineError::PolicyMismatch`] diagnostics.
    const KIND: &'static str;

    /// Apply a regret delta. Integers round `delta * scaling`; floats add
    /// the raw delta and ignore scaling.
    fn add_update(self, delta: f64, scaling: f64) -> Self;

    /// Clamp to the configured `[floor, ceiling]` bounds.
    fn clamp_to(self, floor: i32, ceiling: i32) -> Self;

    /// Clamp to the ceiling only (the bucketed update path defers flooring).
    fn clamp_high(self, ceiling: i32) -> Self;

    /// Accumulate a weighted reach probability into a sumprob entry.
    /// Integers round `prob * weight * scaling`; floats add `prob * weight`.
    fn add_weighted(self, prob: f64, weight: f64, scaling: f64) -> Self;

    /// True when the magnitude calls for halving the whole row. Always false
    /// for floats.
    fn overflowed(self) -> bool;

    fn halve(self) -> Self;
}

impl CfrValue for i32 {
    const KIND: &'static str = "i32";

    #[allow(clippy::cast_possible_truncation)]
    fn add_update(self, delta: f64, scaling: f64) -> Self {
        let sum = i64::from(self) + (delta * scaling).round() as i64;
        sum.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    fn clamp_to(self, floor: i32, ceiling: i32) -> Self {
        self.clamp(floor, ceiling)
    }

    fn clamp_high(self, ceiling: i32) -> Self {
        self.min(ceiling)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_weighted(self, prob: f64, weight: f64, scaling: f64) -> Self {
        let sum = i64::from(self) + (prob * weight * scaling).round() as i64;
        sum.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    fn overflowed(self) -> bool {
        i64::from(self).abs() > OVERFLOW_LIMIT
    }

    fn halve(self) -> Self {
        self / 2
    }
}

impl CfrValue for f64 {
    const KIND: &'static str = "f64";

    fn add_update(self, delta: f64, _scaling: f64) -> Self {
        self + delta
    }

    fn clamp_to(self, floor: i32, ceiling: i32) -> Self {
        self.clamp(f64::from(floor), f64::from(ceiling))
    }

    fn clamp_high(self, ceiling: i32) -> Self {
        self.min(f64::from(ceiling))
    }

    fn add_weighted(self, prob: f64, weight: f64, _scaling: f64) -> Self {
        self + prob * weight
    }

    fn overflowed(self) -> bool {
        false
    }

    fn halve(self) -> Self {
        self
    }
}

/// Halve every element of `row` if any element has overflowed. The whole
/// row scales together so the implied strategy is unchanged.
pub fn halve_row_on_overflow<T: CfrValue>(row: &mut [T]) -> bool {
    if row.iter().any(|v| v.overflowed()) {
        for v in row.iter_mut() {
            *v = v.halve();
        }
        true
    } else {
        false
    }
}

/// One nonterminal's backing storage.
#[derive(Debug, Clone)]
pub enum Table {
    Int(Vec<i32>),
    Double(Vec<f64>),
}

impl Table {
    fn zeroed(len: usize, int: bool) -> Self {
        if int {
            Table::Int(vec![0; len])
        } else {
            Table::Double(vec![0.0; len])
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Table::Int(_) => i32::KIND,
            Table::Double(_) => f64::KIND,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Table::Int(v) => v.len(),
            Table::Double(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view of the full table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyMismatch`] when the table holds floats.
    pub fn as_int(&self) -> Result<&[i32], EngineError> {
        match self {
            Table::Int(v) => Ok(v),
            Table::Double(_) => Err(EngineError::PolicyMismatch {
                requested: i32::KIND,
                actual: f64::KIND,
            }),
        }
    }

    /// Typed mutable view of the full table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyMismatch`] when the table holds floats.
    pub fn as_int_mut(&mut self) -> Result<&mut [i32], EngineError> {
        match self {
            Table::Int(v) => Ok(v),
            Table::Double(_) => Err(EngineError::PolicyMismatch {
                requested: i32::KIND,
                actual: f64::KIND,
            }),
        }
    }

    /// Typed view of the full table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyMismatch`] when the table holds ints.
    pub fn as_double(&self) -> Result<&[f64], EngineError> {
        match self {
            Table::Double(v) => Ok(v),
            Table::Int(_) => Err(EngineError::PolicyMismatch {
                requested: f64::KIND,
                actual: i32::KIND,
            }),
        }
    }

    /// Typed mutable view of the full table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PolicyMismatch`] when the table holds ints.
    pub fn as_double_mut(&mut self) -> Result<&mut [f64], EngineError> {
        match self {
            Table::Double(v) => Ok(v),
            Table::Int(_) => Err(EngineError::PolicyMismatch {
                requested: f64::KIND,
                actual: i32::KIND,
            }),
        }
    }
}

struct Entry {
    table: RwLock<Table>,
    bucketed: bool,
    street: usize,
}

/// Per-player, per-street, per-nonterminal storage of action values.
///
/// Unabstracted nonterminals allocate
/// `num_boards(st) * num_hole_card_pairs(st) * num_succs` elements, indexed
/// by `(global board, hand pair, successor)`. Bucketed nonterminals allocate
/// `num_buckets(st) * num_succs`, indexed by `(bucket, successor)`.
pub struct CfrTables {
    /// `[player][street]`: whether elements are `i32`.
    ints: Vec<Vec<bool>>,
    /// Players this store is allocated for (asymmetric mode may drop one).
    players: [bool; 2],
    /// `[player][street][nonterminal]`.
    entries: Vec<Vec<Vec<Entry>>>,
}

impl CfrTables {
    /// Allocate zeroed tables for every nonterminal of `tree`.
    ///
    /// A nonterminal is bucketed when its street has buckets and its pot is
    /// below the street's bucket threshold. `double_precision` selects `f64`
    /// elements on every street; `players` drops allocation for a player in
    /// asymmetric mode.
    #[must_use]
    pub fn allocate(
        tree: &BettingTree,
        game: &dyn Game,
        boards: &dyn BoardTree,
        buckets: &dyn Buckets,
        bucket_thresholds: &[u32],
        double_precision: bool,
        players: [bool; 2],
    ) -> Self {
        let max_street = game.max_street();
        let ints = vec![vec![!double_precision; max_street + 1]; 2];
        let mut entries: Vec<Vec<Vec<Entry>>> = (0..2)
            .map(|p| {
                (0..=max_street)
                    .map(|st| {
                        let count = if players[p] { tree.num_nonterminals(p, st) } else { 0 };
                        Vec::with_capacity(count)
                    })
                    .collect()
            })
            .collect();

        for id in 0..tree.num_nodes() {
            let node = tree.node(id);
            if node.terminal() {
                continue;
            }
            let p = node.player_acting();
            if !players[p] {
                continue;
            }
            let st = node.street();
            let bucketed = !buckets.none(st) && node.pot_size() < bucket_thresholds[st];
            let rows = if bucketed {
                buckets.num_buckets(st)
            } else {
                boards.num_boards(st) * game.num_hole_card_pairs(st)
            };
            let len = rows * node.num_succs();
            let nt = node.nonterminal_id();
            let street_entries = &mut entries[p][st];
            if street_entries.len() <= nt {
                street_entries.resize_with(nt + 1, || Entry {
                    table: RwLock::new(Table::zeroed(0, !double_precision)),
                    bucketed: false,
                    street: st,
                });
            }
            street_entries[nt] = Entry {
                table: RwLock::new(Table::zeroed(len, !double_precision)),
                bucketed,
                street: st,
            };
        }

        Self {
            ints,
            players,
            entries,
        }
    }

    /// Whether `(player, street)` stores integers.
    #[must_use]
    pub fn ints(&self, player: usize, street: usize) -> bool {
        self.ints[player][street]
    }

    /// Whether the store is allocated for `player`.
    #[must_use]
    pub fn players(&self, player: usize) -> bool {
        self.players[player]
    }

    /// The lock guarding one nonterminal's table. `None` when the store is
    /// not allocated for the player.
    #[must_use]
    pub fn table(&self, player: usize, street: usize, nt: usize) -> Option<&RwLock<Table>> {
        if !self.players[player] {
            return None;
        }
        Some(&self.entries[player][street][nt].table)
    }

    /// Apply the deferred floor pass to every bucketed table.
    ///
    /// Bucketed regret updates skip flooring on the update path; this runs
    /// once at end of iteration, in parallel across tables.
    pub fn floor_bucketed(&self, floors: &[i32]) {
        self.entries
            .par_iter()
            .flatten()
            .flatten()
            .filter(|e| e.bucketed)
            .for_each(|e| {
                let floor = floors[e.street];
                let mut guard = e.table.write();
                match &mut *guard {
                    Table::Int(v) => {
                        for x in v.iter_mut() {
                            if *x < floor {
                                *x = floor;
                            }
                        }
                    }
                    Table::Double(v) => {
                        let floor = f64::from(floor);
                        for x in v.iter_mut() {
                            if *x < floor {
                                *x = floor;
                            }
                        }
                    }
                }
            });
    }
}

/// `[player][street][nonterminal]` -> `num_buckets * num_succs` probs.
type StrategyRows = Vec<Vec<Vec<Option<Vec<f64>>>>>;

/// Precomputed bucketed action probabilities, rebuilt at the start of each
/// iteration and shared read-only with subgame workers.
pub struct CurrentStrategy {
    rows: StrategyRows,
}

impl CurrentStrategy {
    /// An empty cache shaped for `tree`.
    #[must_use]
    pub fn shaped(tree: &BettingTree, max_street: usize) -> Self {
        let rows = (0..2)
            .map(|p| {
                (0..=max_street)
                    .map(|st| vec![None; tree.num_nonterminals(p, st)])
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn set_row(&mut self, player: usize, street: usize, nt: usize, probs: Vec<f64>) {
        self.rows[player][street][nt] = Some(probs);
    }

    /// The cached `num_buckets * num_succs` probability row, if filled.
    #[must_use]
    pub fn row(&self, player: usize, street: usize, nt: usize) -> Option<&[f64]> {
        self.rows[player][street][nt].as_deref()
    }
}
