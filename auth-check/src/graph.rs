//! Cycle detection for relation-graph traversals.

use crate::context::CheckContext;
use crate::models::SubjectSet;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Graph nodes already visited by one traversal.
///
/// Shared by every branch forked from the same top-level check, so concurrent
/// siblings see each other's visits.
#[derive(Debug, Default)]
pub struct VisitedRegistry {
    nodes: Mutex<HashSet<SubjectSet>>,
}

impl VisitedRegistry {
    pub(crate) fn with_node(node: &SubjectSet) -> Self {
        let mut nodes = HashSet::new();
        nodes.insert(node.clone());
        Self {
            nodes: Mutex::new(nodes),
        }
    }

    /// Inserts `node` and reports whether it was already present.
    fn mark(&self, node: &SubjectSet) -> bool {
        let mut nodes = self.nodes.lock();
        if nodes.contains(node) {
            return true;
        }
        nodes.insert(node.clone());
        false
    }

    pub fn contains(&self, node: &SubjectSet) -> bool {
        self.nodes.lock().contains(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.lock().is_empty()
    }
}

/// Records `node` as visited on the traversal carried by `ctx`.
///
/// The first call on a context without a registry allocates one and returns a
/// new derived context. Every later call mutates that registry in place and
/// hands back a clone of `ctx` sharing it. The boolean is `true` when `node` had
/// already been visited, i.e. the branch ran into a cycle.
pub fn check_and_mark(ctx: &CheckContext, node: &SubjectSet) -> (CheckContext, bool) {
    match ctx.visited() {
        None => {
            let registry = Arc::new(VisitedRegistry::with_node(node));
            (ctx.with_registry(registry), false)
        }
        Some(registry) => {
            let visited = registry.mark(node);
            (ctx.clone(), visited)
        }
    }
}
