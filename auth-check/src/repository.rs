use crate::{checkgroup::Edge, error::CheckError, models::*};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// One page of edges leaving a graph node
#[derive(Debug, Clone, Default)]
pub struct EdgePage {
    pub edges: Vec<Edge>,
    pub next_page_token: Option<String>,
}

/// Enumerates the direct edges of the relation graph
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EdgeExpander: Send + Sync {
    /// Edges leaving `node`, starting at `page_token` (`None` for the first page)
    async fn expand(
        &self,
        node: &SubjectSet,
        page_token: Option<String>,
    ) -> Result<EdgePage, CheckError>;
}

/// In-memory tuple store for testing and development
pub struct InMemoryTupleStore {
    tuples: Arc<DashMap<String, RelationTuple>>,
    page_size: usize,
}

impl InMemoryTupleStore {
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    pub fn new() -> Self {
        Self::with_page_size(Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tuples: Arc::new(DashMap::new()),
            page_size: page_size.max(1),
        }
    }

    fn tuple_key(tuple: &RelationTuple) -> String {
        tuple.to_string()
    }

    pub fn write_tuple(&self, tuple: RelationTuple) {
        self.tuples.insert(Self::tuple_key(&tuple), tuple);
    }

    pub fn delete_tuple(&self, tuple: &RelationTuple) -> bool {
        self.tuples.remove(&Self::tuple_key(tuple)).is_some()
    }

    pub fn write_tuples(&self, tuples: impl IntoIterator<Item = RelationTuple>) {
        for tuple in tuples {
            self.write_tuple(tuple);
        }
    }

    pub fn tuple_exists(&self, tuple: &RelationTuple) -> bool {
        self.tuples.contains_key(&Self::tuple_key(tuple))
    }

    /// Read tuples matching the given filter, sorted.
    /// None values act as wildcards
    pub fn read_tuples(
        &self,
        namespace: Option<&str>,
        object: Option<&str>,
        relation: Option<&str>,
        subject: Option<&Subject>,
    ) -> Vec<RelationTuple> {
        let mut tuples: Vec<RelationTuple> = self
            .tuples
            .iter()
            .filter(|entry| {
                let tuple = entry.value();
                namespace.map_or(true, |n| tuple.namespace == n)
                    && object.map_or(true, |o| tuple.object == o)
                    && relation.map_or(true, |r| tuple.relation == r)
                    && subject.map_or(true, |s| tuple.subject == *s)
            })
            .map(|entry| entry.value().clone())
            .collect();
        tuples.sort();
        tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl Default for InMemoryTupleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EdgeExpander for InMemoryTupleStore {
    async fn expand(
        &self,
        node: &SubjectSet,
        page_token: Option<String>,
    ) -> Result<EdgePage, CheckError> {
        let offset = match page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                CheckError::MalformedInput(format!("invalid page token {:?}", token))
            })?,
            None => 0,
        };

        let tuples = self.read_tuples(
            Some(&node.namespace),
            Some(&node.object),
            Some(&node.relation),
            None,
        );
        let total = tuples.len();
        let end = offset.saturating_add(self.page_size).min(total);
        let edges: Vec<Edge> = tuples
            .into_iter()
            .skip(offset)
            .take(end.saturating_sub(offset))
            .map(Edge::from_tuple)
            .collect();
        let next_page_token = (end < total).then(|| end.to_string());

        debug!(%node, edges = edges.len(), offset, "expanded node");
        Ok(EdgePage {
            edges,
            next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeType;

    fn tuple(s: &str) -> RelationTuple {
        s.parse().unwrap()
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryTupleStore::new();
        let owner = tuple("default:doc1#owner@alice");

        store.write_tuple(owner.clone());
        assert!(store.tuple_exists(&owner));

        let tuples = store.read_tuples(None, None, None, Some(&Subject::id("alice")));
        assert_eq!(tuples, vec![owner.clone()]);

        assert!(store.delete_tuple(&owner));
        assert!(!store.tuple_exists(&owner));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expand_pages_edges() {
        let store = InMemoryTupleStore::with_page_size(2);
        store.write_tuples([
            tuple("default:doc#viewer@alice"),
            tuple("default:doc#viewer@bob"),
            tuple("default:doc#viewer@(default:group#member)"),
            tuple("default:doc#owner@carol"),
        ]);
        let node = SubjectSet::new("default", "doc", "viewer");

        let first = store.expand(&node, None).await.unwrap();
        assert_eq!(first.edges.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));

        let second = store.expand(&node, first.next_page_token).await.unwrap();
        assert_eq!(second.edges.len(), 1);
        assert!(second.next_page_token.is_none());

        let kinds: Vec<NodeType> = first
            .edges
            .iter()
            .chain(second.edges.iter())
            .map(|e| e.node_type)
            .collect();
        assert_eq!(kinds.iter().filter(|k| **k == NodeType::Union).count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_page_token() {
        let store = InMemoryTupleStore::new();
        let node = SubjectSet::new("default", "doc", "viewer");
        let err = store.expand(&node, Some("abc".to_string())).await.unwrap_err();
        assert!(err.is_bad_request());
    }
}
