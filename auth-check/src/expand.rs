use crate::{
    config::EngineConfig,
    context::CheckContext,
    error::{CheckError, Result},
    models::*,
    repository::EdgeExpander,
    tree::{NodeType, SubjectTree},
};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Builds the tree of every subject reachable from a subject set
#[derive(Clone)]
pub struct ExpandEngine {
    expander: Arc<dyn EdgeExpander>,
    config: Arc<EngineConfig>,
}

impl ExpandEngine {
    pub fn new(expander: Arc<dyn EdgeExpander>, config: EngineConfig) -> Self {
        Self {
            expander,
            config: Arc::new(config),
        }
    }

    /// Expands `subject` into its subject tree.
    ///
    /// Returns `None` when the subject set was already visited by the
    /// traversal. Subject sets at the depth limit are returned as leaves
    /// without being read.
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn build_tree(
        &self,
        ctx: &CheckContext,
        subject: &Subject,
        max_depth: Option<u32>,
    ) -> Result<Option<SubjectTree>> {
        let rest_depth = self.config.effective_depth(max_depth);
        let tree = self
            .build(&ctx.fresh_traversal(), subject, rest_depth)
            .await?;
        debug!(nodes = tree.as_ref().map_or(0, count_nodes), "expand finished");
        Ok(tree)
    }

    fn build<'a>(
        &'a self,
        ctx: &'a CheckContext,
        subject: &'a Subject,
        rest_depth: u32,
    ) -> BoxFuture<'a, Result<Option<SubjectTree>>> {
        async move {
            let set = match subject {
                Subject::Id(_) => return Ok(Some(SubjectTree::leaf(subject.clone()))),
                Subject::Set(set) => set,
            };

            let (ctx, visited) = ctx.check_and_mark(set);
            if visited {
                trace!(node = %set, "already expanded, skipping");
                return Ok(None);
            }
            if rest_depth <= 1 {
                return Ok(Some(SubjectTree::leaf(subject.clone())));
            }

            let mut children = Vec::new();
            let mut page_token = None;
            loop {
                if ctx.is_cancelled() {
                    return Err(ctx.err());
                }
                let page = tokio::select! {
                    page = self.expander.expand(set, page_token.take()) => page,
                    _ = ctx.cancelled() => return Err(ctx.err()),
                };
                let page = page.map_err(|err| CheckError::expansion(set, err))?;

                for edge in &page.edges {
                    if let Some(child) = self.build(&ctx, &edge.tuple.subject, rest_depth - 1).await? {
                        children.push(child);
                    }
                }

                match page.next_page_token {
                    Some(token) => page_token = Some(token),
                    None => break,
                }
            }

            Ok(Some(SubjectTree {
                node_type: NodeType::Union,
                subject: subject.clone(),
                children,
            }))
        }
        .boxed()
    }
}

fn count_nodes(tree: &SubjectTree) -> usize {
    1 + tree.children.iter().map(count_nodes).sum::<usize>()
}
