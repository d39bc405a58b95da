//! Union aggregation of concurrently evaluated checks.
//!
//! A [`Checkgroup`] collects [`CheckFn`]s and resolves to [`Membership::IsMember`]
//! as soon as one of them does, or to [`Membership::NotMember`] once all of them
//! reported without a positive answer. Groups nest: [`Checkgroup::check_fn`]
//! turns a group into a check that can be added to its parent.

mod concurrent;
mod sequential;

pub use concurrent::ConcurrentCheckgroup;
pub use sequential::SequentialCheckgroup;

use crate::context::CheckContext;
use crate::error::CheckError;
use crate::models::RelationTuple;
use crate::tree::{ExpandTree, NodeType};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Membership {
    #[default]
    Unknown,
    IsMember,
    NotMember,
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Membership::Unknown => write!(f, "unknown"),
            Membership::IsMember => write!(f, "is member"),
            Membership::NotMember => write!(f, "not member"),
        }
    }
}

/// Outcome of a single check.
#[derive(Debug)]
pub enum CheckResult {
    Membership {
        membership: Membership,
        tree: Option<ExpandTree>,
    },
    Error(CheckError),
}

impl CheckResult {
    pub fn is_member() -> Self {
        Self::with_membership(Membership::IsMember)
    }

    pub fn not_member() -> Self {
        Self::with_membership(Membership::NotMember)
    }

    pub fn unknown() -> Self {
        Self::with_membership(Membership::Unknown)
    }

    pub fn with_membership(membership: Membership) -> Self {
        Self::Membership {
            membership,
            tree: None,
        }
    }

    pub fn error(err: CheckError) -> Self {
        Self::Error(err)
    }

    /// The membership, or `Unknown` for errors.
    pub fn membership(&self) -> Membership {
        match self {
            CheckResult::Membership { membership, .. } => *membership,
            CheckResult::Error(_) => Membership::Unknown,
        }
    }

    pub fn tree(&self) -> Option<&ExpandTree> {
        match self {
            CheckResult::Membership { tree, .. } => tree.as_ref(),
            CheckResult::Error(_) => None,
        }
    }

    pub fn err(&self) -> Option<&CheckError> {
        match self {
            CheckResult::Error(err) => Some(err),
            CheckResult::Membership { .. } => None,
        }
    }

    /// Prepends `edge` to the explanation tree. Errors pass through untouched.
    pub fn annotate(self, edge: Edge) -> Self {
        match self {
            CheckResult::Membership { membership, tree } => {
                let tree = match tree {
                    None => ExpandTree::Leaf { tuple: edge.tuple },
                    Some(child) => ExpandTree::Union {
                        tuple: edge.tuple,
                        children: vec![child],
                    },
                };
                CheckResult::Membership {
                    membership,
                    tree: Some(tree),
                }
            }
            err @ CheckResult::Error(_) => err,
        }
    }

    /// Collapses the result into the answer handed to API callers.
    pub fn into_allowed(self) -> Result<(bool, Option<ExpandTree>), CheckError> {
        match self {
            CheckResult::Membership {
                membership: Membership::IsMember,
                tree,
            } => Ok((true, tree)),
            CheckResult::Membership { .. } => Ok((false, None)),
            CheckResult::Error(err) => Err(err),
        }
    }
}

/// An edge of the relation graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub tuple: RelationTuple,
    pub node_type: NodeType,
}

impl Edge {
    pub fn new(tuple: RelationTuple, node_type: NodeType) -> Self {
        Self { tuple, node_type }
    }

    /// Edges to subject sets lead to unions, edges to subject ids to leaves.
    pub fn from_tuple(tuple: RelationTuple) -> Self {
        let node_type = match tuple.subject.as_subject_set() {
            Some(_) => NodeType::Union,
            None => NodeType::Leaf,
        };
        Self { tuple, node_type }
    }
}

/// Write side of a single-result slot. Sending never blocks.
#[derive(Debug)]
pub struct ResultSink(oneshot::Sender<CheckResult>);

/// Read side of a single-result slot.
#[derive(Debug)]
pub struct ResultReceiver(oneshot::Receiver<CheckResult>);

impl ResultSink {
    pub fn channel() -> (ResultSink, ResultReceiver) {
        let (tx, rx) = oneshot::channel();
        (ResultSink(tx), ResultReceiver(rx))
    }

    /// Delivers the result; it is dropped if the reader already moved on.
    pub fn send(self, result: CheckResult) {
        if self.0.send(result).is_err() {
            tracing::trace!("check result discarded, receiver is gone");
        }
    }
}

impl ResultReceiver {
    pub async fn recv(self) -> CheckResult {
        match self.0.await {
            Ok(result) => result,
            Err(_) => CheckResult::error(CheckError::InternalError(anyhow::anyhow!(
                "check finished without reporting a result"
            ))),
        }
    }
}

/// A unit of evaluable work. Delivers exactly one result to its sink.
pub struct CheckFn(Box<dyn FnOnce(CheckContext, ResultSink) -> BoxFuture<'static, ()> + Send>);

impl CheckFn {
    pub fn new<F, Fut>(check: F) -> Self
    where
        F: FnOnce(CheckContext, ResultSink) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self(Box::new(
            move |ctx: CheckContext, sink: ResultSink| -> BoxFuture<'static, ()> {
                check(ctx, sink).boxed()
            },
        ))
    }

    /// A check that always reports `result`.
    pub fn constant(result: CheckResult) -> Self {
        Self::new(move |_, sink| async move { sink.send(result) })
    }

    pub fn is_member() -> Self {
        Self::constant(CheckResult::is_member())
    }

    pub fn not_member() -> Self {
        Self::constant(CheckResult::not_member())
    }

    pub fn unknown() -> Self {
        Self::constant(CheckResult::unknown())
    }

    pub fn error(err: CheckError) -> Self {
        Self::constant(CheckResult::error(err))
    }

    pub fn call(self, ctx: CheckContext, sink: ResultSink) -> BoxFuture<'static, ()> {
        (self.0)(ctx, sink)
    }

    /// Runs the check on its own task and waits for its result or for `ctx`
    /// to be canceled, whichever comes first.
    pub async fn run(self, ctx: CheckContext) -> CheckResult {
        let (sink, receiver) = ResultSink::channel();
        tokio::spawn(self.call(ctx.clone(), sink));
        tokio::select! {
            biased;
            result = receiver.recv() => result,
            _ = ctx.cancelled() => CheckResult::error(ctx.err()),
        }
    }
}

impl fmt::Debug for CheckFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CheckFn")
    }
}

/// Annotates the result of `check` with `edge`.
///
/// A child result without a tree becomes a leaf for the edge's tuple, a child
/// tree becomes the single child of a union node for the edge's tuple. When the
/// context is canceled first the wrapper reports the cancellation and leaves the
/// child to observe it on its own.
pub fn with_edge(edge: Edge, check: CheckFn) -> CheckFn {
    CheckFn::new(move |ctx, sink| async move {
        sink.send(check.run(ctx).await.annotate(edge));
    })
}

/// The union aggregation engine.
pub trait Checkgroup: Send + Sync {
    /// Non-blocking; `true` once the group resolved.
    fn done(&self) -> bool;

    /// Registers another check. Ignored once the group resolved.
    fn add(&self, check: CheckFn);

    /// Resolves the group to `IsMember` without running any check.
    fn set_is_member(&self);

    /// Waits for the verdict. Closes the group for further checks.
    fn result(&self) -> BoxFuture<'_, CheckResult>;

    /// The group as a check of its own, for nesting.
    fn check_fn(self: Arc<Self>) -> CheckFn;
}

pub type Factory = fn(CheckContext) -> Arc<dyn Checkgroup>;

pub const DEFAULT_FACTORY: Factory = ConcurrentCheckgroup::factory;

/// Creates a group with [`DEFAULT_FACTORY`].
pub fn new(ctx: CheckContext) -> Arc<dyn Checkgroup> {
    DEFAULT_FACTORY(ctx)
}

/// Tracks the resolution policy shared by the group implementations.
#[derive(Debug, Default)]
pub(crate) struct Verdict {
    first_error: Option<CheckError>,
}

impl Verdict {
    /// Folds in one result; returns the final result if it decides the group.
    pub(crate) fn observe(&mut self, result: CheckResult) -> Option<CheckResult> {
        match result {
            CheckResult::Membership {
                membership: Membership::IsMember,
                ..
            } => Some(result),
            CheckResult::Membership { .. } => None,
            CheckResult::Error(err) => {
                if self.first_error.is_none() {
                    self.first_error = Some(err);
                } else {
                    tracing::debug!(error = %err, "discarding additional check error");
                }
                None
            }
        }
    }

    /// The verdict once every check reported without a positive answer.
    pub(crate) fn exhausted(self) -> CheckResult {
        match self.first_error {
            Some(err) => CheckResult::Error(err),
            None => CheckResult::not_member(),
        }
    }
}
