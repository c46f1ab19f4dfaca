//! Wait-for graph: directed multigraph of transaction dependencies.
//!
//! An edge `waiter -> holder` means `waiter` is blocked waiting for a lock
//! held by `holder`. [`WaitForGraph::detect_cycle`] runs a depth-first
//! search with two mark sets (visited, on-stack); a back edge to a node on
//! the current DFS stack is a cycle, and any node on that cycle is a valid
//! victim candidate (the spec does not require picking a specific one).

use std::collections::{HashMap, HashSet};

/// Adjacency mapping `waiter_id -> set of holder_ids`.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    adj: HashMap<u64, HashSet<u64>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self { adj: HashMap::new() }
    }

    /// Record that `waiter` is waiting for `holder`. Idempotent: ensures
    /// `holder` is a node in the graph (possibly with an empty out-set) so
    /// traversal can reach it even if nothing else depends on it yet.
    pub fn add_dependency(&mut self, waiter: u64, holder: u64) {
        self.adj.entry(waiter).or_default().insert(holder);
        self.adj.entry(holder).or_default();
    }

    /// Remove a transaction entirely: its own out-edges and any incoming
    /// edge from another waiter. Called at commit/abort.
    pub fn remove_transaction(&mut self, txn_id: u64) {
        self.adj.remove(&txn_id);
        for holders in self.adj.values_mut() {
            holders.remove(&txn_id);
        }
    }

    /// Clear only `txn_id`'s out-edges, leaving it as a node. Called when
    /// `txn_id` acquires its lock or times out.
    pub fn remove_waiting(&mut self, txn_id: u64) {
        if let Some(holders) = self.adj.get_mut(&txn_id) {
            holders.clear();
        }
    }

    /// Return any node participating in a cycle, or `None`. Total and
    /// side-effect free; traversal order is unspecified.
    pub fn detect_cycle(&self) -> Option<u64> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();

        for &start in self.adj.keys() {
            if !visited.contains(&start) {
                if let Some(victim) = self.visit(start, &mut visited, &mut on_stack) {
                    return Some(victim);
                }
            }
        }
        None
    }

    fn visit(
        &self,
        node: u64,
        visited: &mut HashSet<u64>,
        on_stack: &mut HashSet<u64>,
    ) -> Option<u64> {
        visited.insert(node);
        on_stack.insert(node);

        if let Some(holders) = self.adj.get(&node) {
            for &next in holders {
                if on_stack.contains(&next) {
                    return Some(node);
                }
                if !visited.contains(&next) {
                    if let Some(victim) = self.visit(next, visited, on_stack) {
                        return Some(victim);
                    }
                }
            }
        }

        on_stack.remove(&node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_cycle_in_empty_graph() {
        let wfg = WaitForGraph::new();
        assert_eq!(wfg.detect_cycle(), None);
    }

    #[test]
    fn chain_without_cycle() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(2, 3);
        assert_eq!(wfg.detect_cycle(), None);
    }

    #[test]
    fn direct_cycle_is_detected() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(2, 1);
        assert!(wfg.detect_cycle().is_some());
    }

    #[test]
    fn longer_cycle_is_detected() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(2, 3);
        wfg.add_dependency(3, 1);
        assert!(wfg.detect_cycle().is_some());
    }

    #[test]
    fn remove_transaction_breaks_cycle() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(2, 1);
        wfg.remove_transaction(1);
        assert_eq!(wfg.detect_cycle(), None);
    }

    #[test]
    fn remove_waiting_clears_only_out_edges() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(2, 1);
        wfg.remove_waiting(1);
        assert_eq!(wfg.detect_cycle(), None);
        // node 1 still exists (as a holder target for 2), just with no out-edges
        assert!(wfg.adj.contains_key(&1));
    }

    #[test]
    fn add_dependency_is_idempotent() {
        let mut wfg = WaitForGraph::new();
        wfg.add_dependency(1, 2);
        wfg.add_dependency(1, 2);
        assert_eq!(wfg.adj.get(&1).unwrap().len(), 1);
    }
}
