use crate::{
    checkgroup::{with_edge, CheckFn, CheckResult, Checkgroup, Factory, ResultSink},
    config::EngineConfig,
    context::CheckContext,
    error::CheckError,
    models::*,
    repository::EdgeExpander,
    tree::NodeType,
};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Permission checker answering "does the subject have the relation on the
/// object", by expanding subject sets recursively:
/// - a tuple naming the subject directly proves membership
/// - a tuple naming a subject set is followed into that set, in parallel with
///   every other tuple of the same node
/// - nodes already visited by the traversal are not entered again
#[derive(Clone)]
pub struct CheckEngine {
    expander: Arc<dyn EdgeExpander>,
    config: Arc<EngineConfig>,
    factory: Factory,
}

impl CheckEngine {
    pub fn new(expander: Arc<dyn EdgeExpander>, config: EngineConfig) -> Self {
        let factory = config.checkgroup.factory();
        Self {
            expander,
            config: Arc::new(config),
            factory,
        }
    }

    pub fn with_factory(mut self, factory: Factory) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Checks `tuple`, returning the membership and its explanation tree.
    ///
    /// Every call starts a new traversal: visited nodes recorded on `ctx` by
    /// earlier requests are not taken into account.
    #[instrument(skip_all, fields(tuple = %tuple))]
    pub async fn check(
        &self,
        ctx: &CheckContext,
        tuple: &RelationTuple,
        max_depth: Option<u32>,
    ) -> CheckResult {
        let rest_depth = self.config.effective_depth(max_depth);
        let (ctx, _) = ctx.fresh_traversal().check_and_mark(&tuple.object_set());

        let result = self
            .check_is_allowed(tuple.clone(), rest_depth)
            .run(ctx)
            .await;
        debug!(membership = %result.membership(), "check finished");
        result
    }

    /// Like [`CheckEngine::check`], reduced to a boolean.
    pub async fn check_is_member(
        &self,
        ctx: &CheckContext,
        tuple: &RelationTuple,
        max_depth: Option<u32>,
    ) -> Result<bool, CheckError> {
        self.check(ctx, tuple, max_depth)
            .await
            .into_allowed()
            .map(|(allowed, _)| allowed)
    }

    fn check_is_allowed(&self, tuple: RelationTuple, rest_depth: u32) -> CheckFn {
        if rest_depth == 0 {
            trace!(%tuple, "maximum depth reached");
            return CheckFn::unknown();
        }

        let engine = self.clone();
        CheckFn::new(move |ctx: CheckContext, sink: ResultSink| async move {
            let group = (engine.factory)(ctx.clone());
            engine.expand_subject(&ctx, group.as_ref(), &tuple, rest_depth).await;
            sink.send(group.result().await);
        })
    }

    /// Adds one check per edge leaving the node of `tuple` to `group`.
    async fn expand_subject(
        &self,
        ctx: &CheckContext,
        group: &dyn Checkgroup,
        tuple: &RelationTuple,
        rest_depth: u32,
    ) {
        let node = tuple.object_set();
        let mut inner_ctx = ctx.clone();
        let mut page_token = None;

        loop {
            let page = tokio::select! {
                page = self.expander.expand(&node, page_token.take()) => page,
                _ = ctx.cancelled() => {
                    group.add(CheckFn::error(ctx.err()));
                    return;
                }
            };
            let page = match page {
                Ok(page) => page,
                Err(err) => {
                    debug!(%node, error = %err, "expansion failed");
                    group.add(CheckFn::error(CheckError::expansion(&node, err)));
                    return;
                }
            };

            for edge in page.edges {
                if group.done() {
                    return;
                }

                if edge.tuple.subject == tuple.subject {
                    group.add(with_edge(edge, CheckFn::is_member()));
                    continue;
                }
                if edge.node_type != NodeType::Union {
                    continue;
                }
                let Some(set) = edge.tuple.subject.as_subject_set().cloned() else {
                    continue;
                };

                let (next_ctx, visited) = inner_ctx.check_and_mark(&set);
                inner_ctx = next_ctx;
                if visited {
                    trace!(node = %set, "cycle detected, skipping");
                    continue;
                }

                let child = tuple.with_object_set(&set);
                group.add(with_edge(edge, self.check_is_allowed(child, rest_depth - 1)));
            }

            match page.next_page_token {
                Some(token) if !group.done() => page_token = Some(token),
                _ => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkgroup::{Edge, Membership};
    use crate::repository::{EdgePage, InMemoryTupleStore, MockEdgeExpander};
    use crate::tree::ExpandTree;

    fn tuple(s: &str) -> RelationTuple {
        s.parse().unwrap()
    }

    fn engine_with(tuples: &[&str]) -> CheckEngine {
        let store = InMemoryTupleStore::new();
        store.write_tuples(tuples.iter().map(|s| tuple(s)));
        CheckEngine::new(Arc::new(store), EngineConfig::default())
    }

    #[tokio::test]
    async fn test_direct_permission() {
        let engine = engine_with(&["default:doc1#viewer@alice"]);
        let ctx = CheckContext::new();

        let result = engine.check(&ctx, &tuple("default:doc1#viewer@alice"), None).await;
        assert_eq!(result.membership(), Membership::IsMember);
        assert_eq!(
            result.tree(),
            Some(&ExpandTree::Leaf {
                tuple: tuple("default:doc1#viewer@alice")
            })
        );

        assert!(!engine
            .check_is_member(&ctx, &tuple("default:doc1#viewer@bob"), None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_indirect_permission_is_explained() {
        let engine = engine_with(&[
            "default:doc1#viewer@(default:folder#viewer)",
            "default:folder#viewer@(default:group#member)",
            "default:group#member@alice",
        ]);

        let result = engine
            .check(&CheckContext::new(), &tuple("default:doc1#viewer@alice"), None)
            .await;
        assert_eq!(result.membership(), Membership::IsMember);
        assert_eq!(
            result.tree(),
            Some(&ExpandTree::Union {
                tuple: tuple("default:doc1#viewer@(default:folder#viewer)"),
                children: vec![ExpandTree::Union {
                    tuple: tuple("default:folder#viewer@(default:group#member)"),
                    children: vec![ExpandTree::Leaf {
                        tuple: tuple("default:group#member@alice"),
                    }],
                }],
            })
        );
    }

    #[tokio::test]
    async fn test_depth_limit() {
        let engine = engine_with(&[
            "default:a#rel@(default:b#rel)",
            "default:b#rel@(default:c#rel)",
            "default:c#rel@alice",
        ]);
        let ctx = CheckContext::new();
        let request = tuple("default:a#rel@alice");

        assert!(!engine.check_is_member(&ctx, &request, Some(2)).await.unwrap());
        assert!(engine.check_is_member(&ctx, &request, Some(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_expansion_failure_becomes_error() {
        let mut expander = MockEdgeExpander::new();
        expander
            .expect_expand()
            .returning(|_, _| Err(CheckError::StorageError("connection refused".to_string())));
        let engine = CheckEngine::new(Arc::new(expander), EngineConfig::default());

        let result = engine
            .check(&CheckContext::new(), &tuple("default:doc#viewer@alice"), None)
            .await;
        match result {
            CheckResult::Error(CheckError::Expansion { node, source }) => {
                assert_eq!(node, "default:doc#viewer");
                assert!(matches!(*source, CheckError::StorageError(_)));
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failing_branch_is_hidden_by_member() {
        let mut expander = MockEdgeExpander::new();
        expander.expect_expand().returning(|node, _| {
            let edges = match node.object.as_str() {
                "doc" => vec![
                    Edge::from_tuple(tuple("default:doc#viewer@(default:broken#member)")),
                    Edge::from_tuple(tuple("default:doc#viewer@(default:team#member)")),
                ],
                "team" => vec![Edge::from_tuple(tuple("default:team#member@alice"))],
                _ => return Err(CheckError::StorageError("unavailable".to_string())),
            };
            Ok(EdgePage {
                edges,
                next_page_token: None,
            })
        });
        let engine = CheckEngine::new(Arc::new(expander), EngineConfig::default());

        let allowed = engine
            .check_is_member(&CheckContext::new(), &tuple("default:doc#viewer@alice"), None)
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn test_member_on_later_page() {
        let store = InMemoryTupleStore::with_page_size(1);
        store.write_tuples([
            tuple("default:doc#viewer@bob"),
            tuple("default:doc#viewer@carol"),
            tuple("default:doc#viewer@(default:team#member)"),
            tuple("default:team#member@alice"),
        ]);
        let engine = CheckEngine::new(Arc::new(store), EngineConfig::default());

        for factory in [
            crate::checkgroup::ConcurrentCheckgroup::factory as Factory,
            crate::checkgroup::SequentialCheckgroup::factory as Factory,
        ] {
            let allowed = engine
                .clone()
                .with_factory(factory)
                .check_is_member(&CheckContext::new(), &tuple("default:doc#viewer@alice"), None)
                .await
                .unwrap();
            assert!(allowed);
        }
    }

    #[tokio::test]
    async fn test_subject_set_as_subject() {
        let engine = engine_with(&["default:doc#viewer@(default:group#member)"]);
        let allowed = engine
            .check_is_member(
                &CheckContext::new(),
                &tuple("default:doc#viewer@(default:group#member)"),
                None,
            )
            .await
            .unwrap();
        assert!(allowed);
    }
}
