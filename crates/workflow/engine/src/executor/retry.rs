//! Attempt loop: per-attempt timeout, retry with backoff, cancellation

use super::{StepContext, StepDispatcher, StepOutcome};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use workflow_types::{StepError, StepKind, StepSpec};

/// Per-attempt timeout for `step`
///
/// Human input waits indefinitely unless the step declares its own timeout.
pub fn attempt_timeout(step: &StepSpec, default: Option<Duration>) -> Option<Duration> {
    match (&step.kind, step.timeout()) {
        (_, Some(timeout)) => Some(timeout),
        (StepKind::HumanInput { .. }, None) => None,
        (_, None) => default,
    }
}

/// Run `step` to a final outcome, retrying retryable failures
///
/// Returns the number of attempts made alongside the outcome.
pub async fn run_step(
    dispatcher: &StepDispatcher,
    step: &StepSpec,
    mut ctx: StepContext,
    default_timeout: Option<Duration>,
) -> (u32, StepOutcome) {
    let timeout = attempt_timeout(step, default_timeout);
    let max_attempts = step.retry.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        ctx.attempt = attempt;
        ctx.deadline = timeout.map(|t| Instant::now() + t);

        let outcome = run_attempt(dispatcher, step, &ctx, timeout).await;
        let error = match outcome {
            Ok(value) => return (attempt, Ok(value)),
            Err(error) => error,
        };

        if !error.is_retryable() || attempt >= max_attempts {
            debug!(
                execution_id = %ctx.execution_id,
                step_id = %ctx.step_id,
                attempt,
                error = %error,
                "Step attempts exhausted"
            );
            return (attempt, Err(error));
        }

        let delay = step.retry.delay_after(attempt);
        warn!(
            execution_id = %ctx.execution_id,
            step_id = %ctx.step_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying step"
        );

        tokio::select! {
            _ = ctx.cancel.cancelled() => return (attempt, Err(StepError::cancelled())),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_attempt(
    dispatcher: &StepDispatcher,
    step: &StepSpec,
    ctx: &StepContext,
    timeout: Option<Duration>,
) -> StepOutcome {
    let work = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, dispatcher.execute(step, ctx))
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::timeout(format!(
                        "attempt exceeded {} ms",
                        limit.as_millis()
                    )))
                }),
            None => dispatcher.execute(step, ctx).await,
        }
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(StepError::cancelled()),
        outcome = work => outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AgentExecutor, CollaboratorResult, HttpWebhookClient, Unconfigured};
    use crate::executor::testing::context;
    use crate::human::HumanInputHub;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use workflow_types::{AgentId, ErrorKind, RetryPolicy, RoleId};

    /// Sleeps past any short timeout on the first `slow` calls
    struct SlowThenFast {
        calls: AtomicU32,
        slow: u32,
    }

    #[async_trait]
    impl AgentExecutor for SlowThenFast {
        async fn invoke(
            &self,
            _agent: &AgentId,
            _payload: Value,
            _deadline: Option<Instant>,
            _cancel: CancellationToken,
        ) -> CollaboratorResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.slow {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(json!("done"))
        }
    }

    fn dispatcher(agents: Arc<dyn AgentExecutor>) -> StepDispatcher {
        StepDispatcher::new(
            agents,
            Arc::new(Unconfigured),
            Arc::new(HttpWebhookClient::new()),
            HumanInputHub::new(),
        )
    }

    fn bound_context(step: &StepSpec) -> StepContext {
        let mut bindings = BTreeMap::new();
        bindings.insert(RoleId::new("worker"), AgentId::new("w1"));
        context(step, json!(null), json!({})).with_role_bindings(Arc::new(bindings))
    }

    #[test]
    fn test_attempt_timeout_defaults() {
        let default = Some(Duration::from_secs(1));
        assert_eq!(attempt_timeout(&StepSpec::passthrough("p"), default), default);
        assert_eq!(attempt_timeout(&StepSpec::human("h", "?"), default), None);
        assert_eq!(
            attempt_timeout(&StepSpec::human("h", "?").with_timeout_ms(20), default),
            Some(Duration::from_millis(20))
        );
    }

    #[tokio::test]
    async fn test_timeouts_retried_until_success() {
        let agent = Arc::new(SlowThenFast {
            calls: AtomicU32::new(0),
            slow: 2,
        });
        let step = StepSpec::agent("s", "worker", "task")
            .with_timeout_ms(50)
            .with_retry(RetryPolicy::fixed(2, 10));

        let (attempts, outcome) =
            run_step(&dispatcher(agent.clone()), &step, bound_context(&step), None).await;
        assert_eq!(attempts, 3);
        assert_eq!(outcome.unwrap(), json!("done"));
        assert_eq!(agent.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let agent = Arc::new(SlowThenFast {
            calls: AtomicU32::new(0),
            slow: 10,
        });
        let step = StepSpec::agent("s", "worker", "task")
            .with_timeout_ms(20)
            .with_retry(RetryPolicy::fixed(1, 5));

        let (attempts, outcome) =
            run_step(&dispatcher(agent), &step, bound_context(&step), None).await;
        assert_eq!(attempts, 2);
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_non_retryable_not_retried() {
        let step = StepSpec::condition("c", "missing > 1").with_retry(RetryPolicy::fixed(3, 5));
        let ctx = context(&step, json!(null), json!({}));
        let (attempts, outcome) =
            run_step(&dispatcher(Arc::new(Unconfigured)), &step, ctx, None).await;
        assert_eq!(attempts, 1);
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Expression);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let step = StepSpec::agent("s", "worker", "task")
            .with_retry(RetryPolicy::fixed(5, 60_000));
        let ctx = bound_context(&step);
        let cancel = ctx.cancel.clone();

        let handle = tokio::spawn(async move {
            run_step(&dispatcher(Arc::new(Unconfigured)), &step, ctx, None).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let (attempts, outcome) = handle.await.unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(outcome.unwrap_err().kind, ErrorKind::Cancelled);
    }
}
