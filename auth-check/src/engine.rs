use crate::{
    check::CheckEngine,
    config::EngineConfig,
    context::CheckContext,
    error::Result,
    expand::ExpandEngine,
    models::*,
    repository::InMemoryTupleStore,
    tree::SubjectTree,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Authorization engine answering check and expand requests over an
/// in-memory tuple store
pub struct AuthorizationEngine {
    /// Storage for relation tuples
    store: Arc<InMemoryTupleStore>,

    checker: CheckEngine,

    expander: ExpandEngine,

    config: Arc<EngineConfig>,
}

impl AuthorizationEngine {
    /// Create a new engine with an empty store
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store = Arc::new(InMemoryTupleStore::with_page_size(config.page_size));
        Self::with_store(store, config)
    }

    /// Create an engine reading from an existing store
    pub fn with_store(store: Arc<InMemoryTupleStore>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            max_read_depth = config.max_read_depth,
            checkgroup = ?config.checkgroup,
            "authorization engine initialized"
        );

        Ok(Self {
            checker: CheckEngine::new(store.clone(), config.clone()),
            expander: ExpandEngine::new(store.clone(), config.clone()),
            store,
            config: Arc::new(config),
        })
    }

    pub fn store(&self) -> &Arc<InMemoryTupleStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =============================================================================
    // Tuple Management
    // =============================================================================

    /// Write a relation tuple
    pub fn write_tuple(&self, tuple: RelationTuple) {
        debug!(%tuple, "writing tuple");
        self.store.write_tuple(tuple);
    }

    /// Delete a relation tuple, returning whether it existed
    pub fn delete_tuple(&self, tuple: &RelationTuple) -> bool {
        debug!(%tuple, "deleting tuple");
        self.store.delete_tuple(tuple)
    }

    // =============================================================================
    // Authorization Operations
    // =============================================================================

    /// Check whether `tuple` holds, using the configured maximum depth
    pub async fn check(&self, tuple: &RelationTuple) -> Result<bool> {
        self.checker
            .check_is_member(&self.request_context(), tuple, None)
            .await
    }

    /// Check a request, attaching the explanation tree when `explain` is set
    pub async fn check_request(&self, request: CheckRequest) -> Result<CheckResponse> {
        let ctx = self.request_context();
        let (allowed, tree) = self
            .checker
            .check(&ctx, &request.tuple, request.max_depth)
            .await
            .into_allowed()?;

        debug!(tuple = %request.tuple, allowed, "check request answered");
        Ok(CheckResponse {
            allowed,
            tree: tree.filter(|_| request.explain),
        })
    }

    /// Expand a subject set into the tree of its subjects
    pub async fn expand(&self, request: ExpandRequest) -> Result<Option<SubjectTree>> {
        let subject = Subject::Set(request.subject_set);
        self.expander
            .build_tree(&self.request_context(), &subject, request.max_depth)
            .await
    }

    /// Fresh context for one request, bounded by the configured timeout
    fn request_context(&self) -> CheckContext {
        let ctx = CheckContext::new();
        match self.config.request_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}
