use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use relay_shared::{
    relay_provider, ActionContext, ActionDescriptor, ActionProvider, ParamSpec, ParamType,
    ProviderConfig, ProviderManifest, RelayError, RelayResult,
};

pub const LONG_RUNNING_TASK: &str = "long_running_task";

#[relay_provider(
    name = "task.worker",
    description = "Paces a multi-step unit of work, reporting progress after every step.",
    version = "0.1.0",
    config_keys = ["max_steps"],
    tags = ["#DEMO", "#TASK"]
)]
pub struct WorkerProvider {
    max_steps: u64,
}

impl WorkerProvider {
    pub async fn new_provider(config: ProviderConfig) -> anyhow::Result<Self> {
        let max_steps = config
            .config_values
            .get("max_steps")
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);
        Ok(Self { max_steps })
    }

    async fn long_running_task(&self, params: Value, ctx: ActionContext) -> RelayResult<Value> {
        let steps = params
            .get("steps")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                RelayError::InvalidArgument("steps must be a non-negative integer".into())
            })?;
        if steps == 0 || steps > self.max_steps {
            return Err(RelayError::InvalidArgument(format!(
                "steps must be between 1 and {}",
                self.max_steps
            )));
        }
        let step_delay_ms = params
            .get("step_delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(25);
        let label = params
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("work")
            .to_string();

        for step in 1..=steps {
            // Cooperative cancellation point between logical steps
            ctx.checkpoint(format!("stopped before step {} of {}", step, steps))?;
            if step_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step_delay_ms)).await;
            }
            ctx.reporter
                .running(step, steps, format!("{}: step {} of {}", label, step, steps))
                .await;
        }

        Ok(json!({
            "steps_completed": steps,
            "message": format!("{} finished after {} steps", label, steps),
        }))
    }
}

#[async_trait]
impl ActionProvider for WorkerProvider {
    fn manifest(&self) -> ProviderManifest {
        self.auto_manifest()
    }

    fn descriptors(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(
            LONG_RUNNING_TASK,
            "Runs a paced sequence of steps with per-step progress reporting.",
        )
        .with_param("steps", ParamSpec::required(ParamType::Integer))
        .with_param("step_delay_ms", ParamSpec::optional(ParamType::Integer, json!(25)))
        .with_param("label", ParamSpec::optional(ParamType::String, json!("work")))
        .returning("steps_completed and a summary message")]
    }

    async fn execute(
        &self,
        action: &str,
        params: Value,
        ctx: ActionContext,
    ) -> RelayResult<Value> {
        match action {
            LONG_RUNNING_TASK => self.long_running_task(params, ctx).await,
            other => Err(RelayError::ActionNotFound(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_shared::{CancellationToken, ProgressReporter};

    fn provider() -> WorkerProvider {
        WorkerProvider { max_steps: 100 }
    }

    fn ctx() -> ActionContext {
        ActionContext::new(ProgressReporter::disabled(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_completes_and_reports_step_count() {
        let result = provider()
            .long_running_task(json!({"steps": 3, "step_delay_ms": 0}), ctx())
            .await
            .unwrap();
        assert_eq!(result["steps_completed"], json!(3));
        assert!(!result["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_steps_rejected() {
        let err = provider()
            .long_running_task(json!({"steps": 0}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_steps_above_provider_limit_rejected() {
        let err = provider()
            .long_running_task(json!({"steps": 101, "step_delay_ms": 0}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_stops_before_first_step() {
        let ctx = ctx();
        ctx.cancellation.request_cancel();
        let err = provider()
            .long_running_task(json!({"steps": 5, "step_delay_ms": 0}), ctx)
            .await
            .unwrap_err();
        match err {
            RelayError::Cancelled(msg) => assert!(msg.contains("step 1")),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_action_rejected() {
        let err = provider()
            .execute("no_such_action", json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ActionNotFound(_)));
    }
}
