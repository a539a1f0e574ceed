//! Betting tree: an index arena of decision and terminal nodes.
//!
//! The engine borrows nodes during traversal and identifies information sets
//! by the dense `nonterminal_id` assigned per `(player, street)` at build
//! time. Tree construction rules (which bets are legal, pot arithmetic) are
//! the caller's business; the builder only wires nodes together and assigns
//! ids.

/// Index of a node within its [`BettingTree`].
pub type NodeId = usize;

/// Assigned to terminals, which have no nonterminal id.
const NO_NT: usize = usize::MAX;

#[derive(Debug, Clone)]
enum NodeKind {
    /// Hand goes to showdown.
    Showdown,
    /// A player folded.
    Fold { player_folding: usize },
    /// A player must act.
    Choice {
        player_acting: usize,
        call_succ_index: Option<usize>,
        fold_succ_index: Option<usize>,
    },
}

/// A vertex of the betting tree.
#[derive(Debug, Clone)]
pub struct Node {
    street: usize,
    pot_size: u32,
    kind: NodeKind,
    succs: Vec<NodeId>,
    nonterminal_id: usize,
}

impl Node {
    /// Street this node belongs to.
    #[must_use]
    pub fn street(&self) -> usize {
        self.street
    }

    /// Pot size at this node. Pending bets are not included.
    #[must_use]
    pub fn pot_size(&self) -> u32 {
        self.pot_size
    }

    #[must_use]
    pub fn terminal(&self) -> bool {
        self.succs.is_empty()
    }

    #[must_use]
    pub fn showdown(&self) -> bool {
        matches!(self.kind, NodeKind::Showdown)
    }

    /// Player who folded to end the hand. Meaningless unless this is a fold
    /// terminal.
    #[must_use]
    pub fn player_folding(&self) -> usize {
        match self.kind {
            NodeKind::Fold { player_folding } => player_folding,
            _ => usize::MAX,
        }
    }

    /// Player to act at this node. Meaningless at terminals.
    #[must_use]
    pub fn player_acting(&self) -> usize {
        match self.kind {
            NodeKind::Choice { player_acting, .. } => player_acting,
            _ => usize::MAX,
        }
    }

    #[must_use]
    pub fn num_succs(&self) -> usize {
        self.succs.len()
    }

    #[must_use]
    pub fn ith_succ(&self, s: usize) -> NodeId {
        self.succs[s]
    }

    /// Dense index within `(player_acting, street)`.
    #[must_use]
    pub fn nonterminal_id(&self) -> usize {
        self.nonterminal_id
    }

    #[must_use]
    pub fn call_succ_index(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Choice {
                call_succ_index, ..
            } => call_succ_index,
            _ => None,
        }
    }

    /// Successor the probability policy falls back to when no action carries
    /// positive weight: the call successor when one exists, else successor 0.
    #[must_use]
    pub fn default_succ_index(&self) -> usize {
        self.call_succ_index().unwrap_or(0)
    }

    /// Short action label for building action sequences ("c", "f", "b2", ...).
    #[must_use]
    pub fn action_name(&self, s: usize) -> String {
        match self.kind {
            NodeKind::Choice {
                call_succ_index,
                fold_succ_index,
                ..
            } => {
                if call_succ_index == Some(s) {
                    "c".to_string()
                } else if fold_succ_index == Some(s) {
                    "f".to_string()
                } else {
                    format!("b{s}")
                }
            }
            _ => String::new(),
        }
    }
}

/// An immutable betting tree with dense nonterminal ids.
#[derive(Debug, Clone)]
pub struct BettingTree {
    nodes: Vec<Node>,
    root: NodeId,
    /// `[player][street]` nonterminal counts.
    num_nonterminals: Vec<Vec<usize>>,
}

impl BettingTree {
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of decision nodes for `player` on `street`.
    #[must_use]
    pub fn num_nonterminals(&self, player: usize, street: usize) -> usize {
        self.num_nonterminals[player][street]
    }
}

/// Builder for [`BettingTree`]. Add nodes leaves-first, then `build` with the
/// root id; `build` assigns nonterminal ids in depth-first preorder.
#[derive(Default)]
pub struct BettingTreeBuilder {
    nodes: Vec<Node>,
}

impl BettingTreeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Add a showdown terminal.
    pub fn showdown(&mut self, street: usize, pot_size: u32) -> NodeId {
        self.push(Node {
            street,
            pot_size,
            kind: NodeKind::Showdown,
            succs: Vec::new(),
            nonterminal_id: NO_NT,
        })
    }

    /// Add a fold terminal.
    pub fn fold(&mut self, street: usize, pot_size: u32, player_folding: usize) -> NodeId {
        self.push(Node {
            street,
            pot_size,
            kind: NodeKind::Fold { player_folding },
            succs: Vec::new(),
            nonterminal_id: NO_NT,
        })
    }

    /// Add a decision node with the given successors.
    ///
    /// # Panics
    ///
    /// Panics if `succs` is empty or a marked call/fold index is out of range.
    pub fn choice(
        &mut self,
        street: usize,
        player_acting: usize,
        pot_size: u32,
        succs: Vec<NodeId>,
        call_succ_index: Option<usize>,
        fold_succ_index: Option<usize>,
    ) -> NodeId {
        assert!(!succs.is_empty(), "choice node needs successors");
        for idx in [call_succ_index, fold_succ_index].into_iter().flatten() {
            assert!(idx < succs.len(), "succ index {idx} out of range");
        }
        self.push(Node {
            street,
            pot_size,
            kind: NodeKind::Choice {
                player_acting,
                call_succ_index,
                fold_succ_index,
            },
            succs,
            nonterminal_id: NO_NT,
        })
    }

    /// Finish the tree rooted at `root` for a game with streets
    /// `0..=max_street`.
    #[must_use]
    pub fn build(mut self, root: NodeId, max_street: usize) -> BettingTree {
        let mut counters = vec![vec![0usize; max_street + 1]; 2];
        let mut stack = vec![root];
        let mut visited = vec![false; self.nodes.len()];
        // Preorder DFS, successors in ascending index order.
        while let Some(id) = stack.pop() {
            if visited[id] {
                continue;
            }
            visited[id] = true;
            let node = &mut self.nodes[id];
            if let NodeKind::Choice { player_acting, .. } = node.kind {
                let slot = &mut counters[player_acting][node.street];
                node.nonterminal_id = *slot;
                *slot += 1;
            }
            for &succ in node.succs.iter().rev() {
                stack.push(succ);
            }
        }
        BettingTree {
            nodes: self.nodes,
            root,
            num_nonterminals: counters,
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_macros::timed_test;

    /// check/bet root for player 0; bet line ends in call/fold for player 1.
    fn small_tree() -> BettingTree {
        let mut b = BettingTreeBuilder::new();
        let sd_check = b.showdown(0, 2);
        let sd_call = b.showdown(0, 4);
        let fold = b.fold(0, 2, 1);
        let facing_bet = b.choice(0, 1, 2, vec![sd_call, fold], Some(0), Some(1));
        let root = b.choice(0, 0, 2, vec![sd_check, facing_bet], Some(0), None);
        b.build(root, 0)
    }

    #[timed_test]
    fn nonterminal_ids_are_dense_per_player() {
        let tree = small_tree();
        assert_eq!(tree.num_nonterminals(0, 0), 1);
        assert_eq!(tree.num_nonterminals(1, 0), 1);
        let root = tree.node(tree.root());
        assert_eq!(root.nonterminal_id(), 0);
        let facing_bet = tree.node(root.ith_succ(1));
        assert_eq!(facing_bet.nonterminal_id(), 0);
        assert_eq!(facing_bet.player_acting(), 1);
    }

    #[timed_test]
    fn terminal_kinds_are_distinguished() {
        let tree = small_tree();
        let root = tree.node(tree.root());
        let sd = tree.node(root.ith_succ(0));
        assert!(sd.terminal());
        assert!(sd.showdown());
        let facing_bet = tree.node(root.ith_succ(1));
        let fold = tree.node(facing_bet.ith_succ(1));
        assert!(fold.terminal());
        assert!(!fold.showdown());
        assert_eq!(fold.player_folding(), 1);
    }

    #[timed_test]
    fn default_succ_prefers_call() {
        let tree = small_tree();
        let root = tree.node(tree.root());
        assert_eq!(root.default_succ_index(), 0);
        let facing_bet = tree.node(root.ith_succ(1));
        assert_eq!(facing_bet.default_succ_index(), 0);
        assert_eq!(facing_bet.action_name(0), "c");
        assert_eq!(facing_bet.action_name(1), "f");
        assert_eq!(root.action_name(1), "b1");
    }
}
