use super::{CheckFn, CheckResult, Checkgroup, ResultSink, Verdict};
use crate::context::CheckContext;
use crate::error::CheckError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Evaluates checks one after the other, in the order they were added.
///
/// Nothing runs before [`Checkgroup::result`] is awaited. Stops at the first
/// positive answer, which makes the explanation tree deterministic.
pub struct SequentialCheckgroup {
    ctx: CheckContext,
    checks: Mutex<Option<Vec<CheckFn>>>,
    is_member: AtomicBool,
    done: AtomicBool,
}

impl SequentialCheckgroup {
    pub fn new(ctx: CheckContext) -> Self {
        Self {
            ctx,
            checks: Mutex::new(Some(Vec::new())),
            is_member: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    pub fn factory(ctx: CheckContext) -> Arc<dyn Checkgroup> {
        Arc::new(Self::new(ctx))
    }
}

impl Checkgroup for SequentialCheckgroup {
    fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn add(&self, check: CheckFn) {
        if let Some(checks) = self.checks.lock().as_mut() {
            checks.push(check);
        }
    }

    fn set_is_member(&self) {
        self.is_member.store(true, Ordering::Release);
        self.done.store(true, Ordering::Release);
    }

    fn result(&self) -> BoxFuture<'_, CheckResult> {
        let checks = self.checks.lock().take();

        async move {
            let Some(checks) = checks else {
                return CheckResult::error(CheckError::InternalError(anyhow::anyhow!(
                    "checkgroup result was already consumed"
                )));
            };

            let result = if self.is_member.load(Ordering::Acquire) {
                CheckResult::is_member()
            } else {
                let checks_ctx = self.ctx.child();
                let mut verdict = Verdict::default();
                let mut decided = None;
                for check in checks {
                    if self.ctx.is_cancelled() {
                        decided = Some(CheckResult::error(self.ctx.err()));
                        break;
                    }
                    if let Some(result) = verdict.observe(check.run(checks_ctx.clone()).await) {
                        decided = Some(result);
                        break;
                    }
                }
                checks_ctx.cancel();
                match decided {
                    Some(result) => result,
                    // a check may have ended early because the group's context was canceled
                    None if self.ctx.is_cancelled() => CheckResult::error(self.ctx.err()),
                    None => verdict.exhausted(),
                }
            };

            self.done.store(true, Ordering::Release);
            result
        }
        .boxed()
    }

    fn check_fn(self: Arc<Self>) -> CheckFn {
        CheckFn::new(move |_, sink: ResultSink| async move {
            sink.send(self.result().await);
        })
    }
}
