#![deny(clippy::all)]
#![warn(clippy::pedantic)]

//! Vanilla CFR traversal engine for two-player zero-sum poker games.
//!
//! The engine walks a betting tree in post-order, propagating opponent reach
//! probabilities downward and counterfactual values upward, updating
//! per-information-set regret tables and average-strategy accumulators. It
//! supports unabstracted and bucketed streets, integer (fixed-point) and
//! double-precision storage, best-response and value-only traversals, and a
//! bounded worker pool that solves subgames below a configured street in
//! parallel.
//!
//! # Modules
//!
//! - `config` - solver options, loaded from YAML
//! - `engine` - the traversal recursion and iteration drivers
//! - `values` - typed regret/sumprob tables
//! - `subgame` - the split-street worker pool
//! - `tree`, `board`, `hands`, `buckets`, `game` - the game-side contracts

pub mod board;
pub mod buckets;
pub mod cards;
pub mod config;
pub mod engine;
pub mod error;
pub mod game;
pub mod hands;
pub mod probs;
pub mod reach;
pub mod subgame;
pub mod terminal;
pub mod tree;
pub mod values;

pub use config::CfrConfig;
pub use engine::{CfrEngine, EngineContext};
pub use error::EngineError;
pub use game::Game;
pub use tree::{BettingTree, BettingTreeBuilder, Node, NodeId};

/// Upper bound on successors at any decision node; sizes the stack-allocated
/// probability rows used in the hot loops.
pub const MAX_SUCCS: usize = 16;
