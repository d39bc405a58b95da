use crate::error::CheckError;
use crate::graph::{self, VisitedRegistry};
use crate::models::SubjectSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Propagation token threaded through every check of one request.
///
/// Carries the cancellation signal, an optional deadline and, once the
/// traversal visited its first node, the shared [`VisitedRegistry`].
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    visited: Option<Arc<VisitedRegistry>>,
}

impl CheckContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            visited: None,
        }
    }

    /// Sets a deadline `timeout` from now, keeping an earlier one if present.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Derives a context that is canceled with this one but can also be
    /// canceled on its own.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            visited: self.visited.clone(),
        }
    }

    /// Same cancellation and deadline, without any visited nodes.
    pub fn fresh_traversal(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            visited: None,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline_passed()
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// The error describing why this context is done.
    pub fn err(&self) -> CheckError {
        if self.deadline_passed() {
            CheckError::DeadlineExceeded
        } else {
            CheckError::Canceled
        }
    }

    /// See [`graph::check_and_mark`].
    pub fn check_and_mark(&self, node: &SubjectSet) -> (CheckContext, bool) {
        graph::check_and_mark(self, node)
    }

    pub fn visited(&self) -> Option<&Arc<VisitedRegistry>> {
        self.visited.as_ref()
    }

    /// Whether both contexts record their visits in the same registry.
    pub fn same_traversal(&self, other: &CheckContext) -> bool {
        match (&self.visited, &other.visited) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    pub(crate) fn with_registry(&self, registry: Arc<VisitedRegistry>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            visited: Some(registry),
        }
    }
}
