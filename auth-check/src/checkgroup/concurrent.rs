use super::{CheckFn, CheckResult, Checkgroup, ResultSink, Verdict};
use crate::context::CheckContext;
use crate::error::CheckError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

enum Command {
    Check(CheckFn),
    SetIsMember,
}

/// Runs every added check on its own tokio task.
///
/// A consumer task started by [`ConcurrentCheckgroup::new`] receives the checks,
/// spawns them and folds in their results. Resolving the group cancels the
/// derived context its checks run under.
pub struct ConcurrentCheckgroup {
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    outcome: Mutex<Option<oneshot::Receiver<CheckResult>>>,
    done: Arc<AtomicBool>,
}

impl ConcurrentCheckgroup {
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: CheckContext) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (outcome_tx, outcome) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));

        tokio::spawn(consume(ctx, receiver, outcome_tx, done.clone()));

        Self {
            commands: Mutex::new(Some(commands)),
            outcome: Mutex::new(Some(outcome)),
            done,
        }
    }

    pub fn factory(ctx: CheckContext) -> Arc<dyn Checkgroup> {
        Arc::new(Self::new(ctx))
    }

    fn send(&self, command: Command) {
        if let Some(commands) = self.commands.lock().as_ref() {
            if commands.send(command).is_err() {
                trace!("checkgroup already resolved, command ignored");
            }
        }
    }
}

impl Checkgroup for ConcurrentCheckgroup {
    fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn add(&self, check: CheckFn) {
        if self.done() {
            return;
        }
        self.send(Command::Check(check));
    }

    fn set_is_member(&self) {
        self.done.store(true, Ordering::Release);
        self.send(Command::SetIsMember);
    }

    fn result(&self) -> BoxFuture<'_, CheckResult> {
        // no further checks: lets the consumer resolve once the pending ones reported
        self.commands.lock().take();
        let outcome = self.outcome.lock().take();

        async move {
            let Some(outcome) = outcome else {
                return CheckResult::error(CheckError::InternalError(anyhow::anyhow!(
                    "checkgroup result was already consumed"
                )));
            };
            outcome.await.unwrap_or_else(|_| {
                CheckResult::error(CheckError::InternalError(anyhow::anyhow!(
                    "checkgroup consumer stopped without a result"
                )))
            })
        }
        .boxed()
    }

    fn check_fn(self: Arc<Self>) -> CheckFn {
        CheckFn::new(move |_, sink: ResultSink| async move {
            sink.send(self.result().await);
        })
    }
}

async fn consume(
    ctx: CheckContext,
    mut commands: mpsc::UnboundedReceiver<Command>,
    outcome: oneshot::Sender<CheckResult>,
    done: Arc<AtomicBool>,
) {
    let checks_ctx = ctx.child();
    let (results_tx, mut results) = mpsc::unbounded_channel::<CheckResult>();
    let mut verdict = Verdict::default();
    let (mut total, mut finished) = (0usize, 0usize);
    let mut adding_done = false;

    let result = loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break CheckResult::error(ctx.err()),
            Some(result) = results.recv() => {
                finished += 1;
                if let Some(result) = verdict.observe(result) {
                    break result;
                }
                if adding_done && finished == total {
                    break std::mem::take(&mut verdict).exhausted();
                }
            }
            command = commands.recv(), if !adding_done => match command {
                Some(Command::Check(check)) => {
                    total += 1;
                    let ctx = checks_ctx.clone();
                    let results_tx = results_tx.clone();
                    tokio::spawn(async move {
                        // the receiver is gone once the group resolved
                        let _ = results_tx.send(check.run(ctx).await);
                    });
                }
                Some(Command::SetIsMember) => break CheckResult::is_member(),
                None => {
                    adding_done = true;
                    if finished == total {
                        break std::mem::take(&mut verdict).exhausted();
                    }
                }
            },
        }
    };

    checks_ctx.cancel();
    done.store(true, Ordering::Release);
    debug!(
        membership = %result.membership(),
        checks = total,
        reported = finished,
        "checkgroup resolved"
    );
    if outcome.send(result).is_err() {
        trace!("checkgroup result was never read");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkgroup::{Membership, ResultSink};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn group(ctx: &CheckContext) -> Arc<dyn Checkgroup> {
        ConcurrentCheckgroup::factory(ctx.clone())
    }

    fn never() -> CheckFn {
        CheckFn::new(|ctx: CheckContext, sink: ResultSink| async move {
            ctx.cancelled().await;
            sink.send(CheckResult::error(ctx.err()));
        })
    }

    #[tokio::test]
    async fn test_empty_group_is_not_member() {
        let g = group(&CheckContext::new());
        assert_eq!(g.result().await.membership(), Membership::NotMember);
        assert!(g.done());
    }

    #[tokio::test]
    async fn test_is_member_short_circuits_pending_checks() {
        let g = group(&CheckContext::new());
        g.add(never());
        g.add(never());
        g.add(CheckFn::is_member());

        let result = tokio::time::timeout(Duration::from_secs(5), g.result())
            .await
            .unwrap();
        assert_eq!(result.membership(), Membership::IsMember);
        assert!(g.done());
    }

    #[tokio::test]
    async fn test_waits_for_every_negative() {
        let reported = Arc::new(AtomicUsize::new(0));
        let g = group(&CheckContext::new());
        for i in 0..8u64 {
            let reported = reported.clone();
            g.add(CheckFn::new(move |_, sink: ResultSink| async move {
                tokio::time::sleep(Duration::from_millis(i * 5)).await;
                reported.fetch_add(1, Ordering::SeqCst);
                sink.send(CheckResult::not_member());
            }));
        }

        assert_eq!(g.result().await.membership(), Membership::NotMember);
        assert_eq!(reported.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_error_surfaces_without_member() {
        let g = group(&CheckContext::new());
        g.add(CheckFn::not_member());
        g.add(CheckFn::error(CheckError::StorageError("down".to_string())));
        g.add(CheckFn::unknown());

        let result = g.result().await;
        assert!(matches!(result, CheckResult::Error(CheckError::StorageError(_))));
    }

    #[tokio::test]
    async fn test_error_is_discarded_after_member() {
        let g = group(&CheckContext::new());
        g.add(CheckFn::is_member());
        g.add(CheckFn::new(|_, sink: ResultSink| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sink.send(CheckResult::error(CheckError::StorageError("late".to_string())));
        }));

        assert_eq!(g.result().await.membership(), Membership::IsMember);
    }

    #[tokio::test]
    async fn test_error_before_member_is_discarded() {
        let g = group(&CheckContext::new());
        g.add(CheckFn::error(CheckError::StorageError("early".to_string())));
        g.add(CheckFn::new(|_, sink: ResultSink| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sink.send(CheckResult::is_member());
        }));

        assert_eq!(g.result().await.membership(), Membership::IsMember);
    }

    #[tokio::test]
    async fn test_set_is_member() {
        let g = group(&CheckContext::new());
        g.add(never());
        g.set_is_member();
        assert!(g.done());

        assert_eq!(g.result().await.membership(), Membership::IsMember);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let ctx = CheckContext::new();
        let g = group(&ctx);
        g.add(never());

        ctx.cancel();
        let result = g.result().await;
        assert!(matches!(result, CheckResult::Error(CheckError::Canceled)));
    }

    #[tokio::test]
    async fn test_resolution_cancels_running_checks() {
        let observed = Arc::new(AtomicBool::new(false));
        let g = group(&CheckContext::new());
        {
            let observed = observed.clone();
            g.add(CheckFn::new(move |ctx: CheckContext, sink: ResultSink| async move {
                ctx.cancelled().await;
                observed.store(true, Ordering::SeqCst);
                sink.send(CheckResult::error(ctx.err()));
            }));
        }
        g.add(CheckFn::is_member());

        assert_eq!(g.result().await.membership(), Membership::IsMember);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !observed.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_nested_groups() {
        let ctx = CheckContext::new();
        let inner = group(&ctx);
        inner.add(CheckFn::not_member());
        inner.add(CheckFn::is_member());

        let outer = group(&ctx);
        outer.add(CheckFn::not_member());
        outer.add(inner.check_fn());

        assert_eq!(outer.result().await.membership(), Membership::IsMember);
    }

    #[tokio::test]
    async fn test_add_after_result_is_ignored() {
        let g = group(&CheckContext::new());
        g.add(CheckFn::not_member());
        assert_eq!(g.result().await.membership(), Membership::NotMember);

        g.add(CheckFn::is_member());
        assert!(matches!(
            g.result().await,
            CheckResult::Error(CheckError::InternalError(_))
        ));
    }
}
