use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::StreamExt;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use relay_shared::{
    ActionContext, ActionOutcome, CancellationToken, ProgressReporter, ProgressSink, RelayError,
    RelayId, RelayResult, ValueStream,
};

use crate::config::RuntimeConfig;
use crate::registry::{ActionEntry, ActionRegistry};
use crate::validation;

/// Invocation-time options. Everything is optional: no sink means progress
/// updates are discarded, no token means the invocation is only bounded by
/// its time budget, no timeout falls back to the configured default.
#[derive(Default)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
    pub sink: Option<Arc<dyn ProgressSink>>,
}

impl InvokeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct InflightInfo {
    pub invocation_id: RelayId,
    pub action: String,
    pub started_at: DateTime<Utc>,
}

struct Inflight {
    action: String,
    token: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Removes the in-flight entry when the invocation finishes or its stream
/// is dropped by the consumer.
struct InflightGuard {
    table: Arc<DashMap<RelayId, Inflight>>,
    id: RelayId,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

/// Dispatches named actions to their providers, plumbing the progress
/// reporter and cancellation token through, and normalizing every outcome.
///
/// State machine per invocation: Pending → Running → {Completed, Cancelled,
/// Failed}. Validation failures happen in Pending and are returned as `Err`;
/// once Running, callers always receive a structured `ActionOutcome`.
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
    inflight: Arc<DashMap<RelayId, Inflight>>,
    semaphore: Arc<tokio::sync::Semaphore>,
    default_timeout: Duration,
}

impl ActionExecutor {
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, config: &RuntimeConfig) -> Self {
        Self {
            registry,
            inflight: Arc::new(DashMap::new()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(
                config.max_concurrent_invocations,
            )),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Currently running invocations.
    #[must_use]
    pub fn inflight(&self) -> Vec<InflightInfo> {
        self.inflight
            .iter()
            .map(|entry| InflightInfo {
                invocation_id: *entry.key(),
                action: entry.value().action.clone(),
                started_at: entry.value().started_at,
            })
            .collect()
    }

    /// Request cooperative cancellation of a running invocation by id.
    /// Returns false if the invocation is no longer in flight.
    pub fn cancel(&self, invocation_id: &RelayId) -> bool {
        match self.inflight.get(invocation_id) {
            Some(entry) => {
                entry.value().token.request_cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a single-result action to completion.
    pub async fn invoke(
        &self,
        action: &str,
        params: Value,
        opts: InvokeOptions,
    ) -> RelayResult<ActionOutcome> {
        let entry = self.registry.resolve(action).await?;
        if entry.descriptor.is_streaming() {
            return Err(RelayError::InvalidArgument(format!(
                "action '{}' produces a stream; use invoke_streaming",
                action
            )));
        }
        let params = validation::validate_params(&entry.descriptor, params)?;

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let token = opts.cancellation.unwrap_or_default();
        let reporter = ProgressReporter::new(opts.sink);

        let invocation_id = RelayId::new();
        self.inflight.insert(
            invocation_id,
            Inflight {
                action: action.to_string(),
                token: token.clone(),
                started_at: Utc::now(),
            },
        );
        let _guard = InflightGuard {
            table: self.inflight.clone(),
            id: invocation_id,
        };

        let outcome = self
            .run_unary(&entry, action, params, timeout, token, &reporter, invocation_id)
            .await;
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_unary(
        &self,
        entry: &ActionEntry,
        action: &str,
        params: serde_json::Map<String, Value>,
        timeout: Duration,
        token: CancellationToken,
        reporter: &ProgressReporter,
        invocation_id: RelayId,
    ) -> ActionOutcome {
        let _permit = match self.semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => {
                warn!("executor semaphore closed during shutdown");
                return ActionOutcome::Failed(RelayError::Execution(
                    "executor is shutting down".to_string(),
                ));
            }
        };

        info!(action = %action, invocation = %invocation_id, "🚀 Dispatching action");
        reporter
            .started(format!("Action '{}' started", action))
            .await;

        let ctx = ActionContext::new(reporter.clone(), token);
        let fut = entry.provider.execute(action, Value::Object(params), ctx);

        // Catch panics so a misbehaving provider cannot take the permit down
        // with it; the timeout drop kills any kill_on_drop subprocess.
        let result = tokio::time::timeout(
            timeout,
            std::panic::AssertUnwindSafe(fut).catch_unwind(),
        )
        .await;

        match result {
            Err(_elapsed) => {
                let err = RelayError::Timeout {
                    action: action.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                error!(action = %action, invocation = %invocation_id, "⏱️ Hard time budget exceeded");
                reporter.failed(err.to_string()).await;
                ActionOutcome::Failed(err)
            }
            Ok(Err(_panic)) => {
                let err = RelayError::Execution(format!("action '{}' panicked", action));
                error!(action = %action, invocation = %invocation_id, "🔥 Action panicked");
                reporter.failed(err.to_string()).await;
                ActionOutcome::Failed(err)
            }
            Ok(Ok(Ok(value))) => {
                info!(action = %action, invocation = %invocation_id, "✅ Action completed");
                reporter
                    .completed(format!("Action '{}' completed", action), HashMap::new())
                    .await;
                ActionOutcome::Completed(value)
            }
            Ok(Ok(Err(RelayError::Cancelled(message)))) => {
                info!(action = %action, invocation = %invocation_id, "🛑 Action cancelled");
                reporter.cancelled(message.clone()).await;
                ActionOutcome::Cancelled { message }
            }
            Ok(Ok(Err(err))) => {
                error!(action = %action, invocation = %invocation_id, error = %err, "❌ Action failed");
                reporter.failed(err.to_string()).await;
                ActionOutcome::Failed(err)
            }
        }
    }

    /// Execute a streaming action, returning its element stream. Elements
    /// are forwarded to the consumer as the provider produces them; the
    /// terminal progress update carries `total_items_streamed`.
    pub async fn invoke_streaming(
        &self,
        action: &str,
        params: Value,
        opts: InvokeOptions,
    ) -> RelayResult<ValueStream> {
        let entry = self.registry.resolve(action).await?;
        if !entry.descriptor.is_streaming() {
            return Err(RelayError::StreamingNotSupported(action.to_string()));
        }
        let params = validation::validate_params(&entry.descriptor, params)?;

        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let token = opts.cancellation.unwrap_or_default();
        let reporter = ProgressReporter::new(opts.sink);
        let ctx = ActionContext::new(reporter.clone(), token.clone());

        let invocation_id = RelayId::new();
        self.inflight.insert(
            invocation_id,
            Inflight {
                action: action.to_string(),
                token: token.clone(),
                started_at: Utc::now(),
            },
        );
        let guard = InflightGuard {
            table: self.inflight.clone(),
            id: invocation_id,
        };

        let mut inner = match entry.provider.execute_stream(action, Value::Object(params), ctx) {
            Ok(stream) => stream,
            Err(e) => return Err(e),
        };

        let action_name = action.to_string();
        let semaphore = self.semaphore.clone();
        let stream = async_stream::stream! {
            // Guard lives inside the stream so the in-flight entry is
            // cleared even when the consumer drops the stream early.
            let _guard = guard;
            match semaphore.acquire_owned().await {
                Err(_) => {
                    warn!("executor semaphore closed during shutdown");
                    yield Err(RelayError::Execution("executor is shutting down".to_string()));
                }
                Ok(_permit) => {
                    info!(action = %action_name, invocation = %invocation_id, "🚀 Dispatching streaming action");
                    reporter
                        .started(format!("Streaming action '{}' started", action_name))
                        .await;

                    let deadline = tokio::time::Instant::now() + timeout;
                    let mut count: u64 = 0;
                    loop {
                        if token.is_cancelled() {
                            let message = format!("cancelled after {} elements", count);
                            info!(action = %action_name, invocation = %invocation_id, "🛑 Stream cancelled");
                            reporter.cancelled(message).await;
                            break;
                        }
                        match tokio::time::timeout_at(deadline, inner.next()).await {
                            Err(_elapsed) => {
                                let err = RelayError::Timeout {
                                    action: action_name.clone(),
                                    timeout_ms: timeout.as_millis() as u64,
                                };
                                error!(action = %action_name, invocation = %invocation_id, "⏱️ Stream time budget exceeded");
                                reporter.failed(err.to_string()).await;
                                yield Err(err);
                                break;
                            }
                            Ok(None) => {
                                let mut data = HashMap::new();
                                data.insert(
                                    "total_items_streamed".to_string(),
                                    serde_json::json!(count),
                                );
                                info!(
                                    action = %action_name,
                                    invocation = %invocation_id,
                                    total = count,
                                    "✅ Stream completed"
                                );
                                reporter
                                    .completed(format!("Streamed {} elements", count), data)
                                    .await;
                                break;
                            }
                            Ok(Some(Ok(value))) => {
                                count += 1;
                                yield Ok(value);
                            }
                            Ok(Some(Err(err))) => {
                                error!(action = %action_name, invocation = %invocation_id, error = %err, "❌ Stream failed");
                                reporter.failed(err.to_string()).await;
                                yield Err(err);
                                break;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
