//! Executors that suspend: wait and human input

use super::{StepContext, StepOutcome};
use crate::human::HumanInputHub;
use std::time::Duration;
use workflow_types::StepError;

/// Sleep for `duration_ms`, then pass the input through
pub async fn wait(duration_ms: u64, ctx: &StepContext) -> StepOutcome {
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::cancelled()),
        _ = tokio::time::sleep(Duration::from_millis(duration_ms)) => Ok(ctx.input.clone()),
    }
}

/// Park until a value is supplied for this execution and step
pub async fn human_input(hub: &HumanInputHub, prompt: &str, ctx: &StepContext) -> StepOutcome {
    let (rx, _registration) = hub.register(&ctx.execution_id, &ctx.step_id);
    ctx.notify_waiting();

    tracing::info!(
        execution_id = %ctx.execution_id,
        step_id = %ctx.step_id,
        prompt,
        "Waiting for human input"
    );

    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(StepError::cancelled()),
        value = rx => value.map_err(|_| StepError::executor("human input channel closed")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::context;
    use serde_json::json;
    use workflow_types::{ErrorKind, StepSpec};

    #[tokio::test]
    async fn test_wait_passes_input_through() {
        let step = StepSpec::wait("pause", 5);
        let ctx = context(&step, json!({"k": 1}), json!({}));
        assert_eq!(wait(5, &ctx).await.unwrap(), json!({"k": 1}));
    }

    #[tokio::test]
    async fn test_wait_cancellable() {
        let step = StepSpec::wait("pause", 60_000);
        let ctx = context(&step, json!(null), json!({}));
        ctx.cancel.cancel();
        let err = wait(60_000, &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_human_input_resumes_with_value() {
        let hub = HumanInputHub::new();
        let step = StepSpec::human("approve", "Approve?");
        let ctx = context(&step, json!(null), json!({}));

        let supplier = {
            let hub = hub.clone();
            let exec = ctx.execution_id.clone();
            let id = ctx.step_id.clone();
            tokio::spawn(async move {
                while !hub.is_waiting(&exec, &id) {
                    tokio::task::yield_now().await;
                }
                hub.supply(&exec, &id, json!("yes")).unwrap();
            })
        };

        let out = human_input(&hub, "Approve?", &ctx).await.unwrap();
        supplier.await.unwrap();
        assert_eq!(out, json!("yes"));
        assert_eq!(hub.waiting_count(), 0);
    }
}
