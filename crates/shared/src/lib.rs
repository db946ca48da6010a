use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub use inventory;
pub use relay_macros::relay_provider;

/// SDK version constant for consistent version reporting across all providers.
/// Providers should reference this instead of their own CARGO_PKG_VERSION.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unique identifier within the Relay runtime (providers, invocations, traces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayId(Uuid);

impl std::fmt::Display for RelayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Default generates a random UUID v4. Each default RelayId is unique,
/// suitable for invocation ids. For deterministic ids use `from_name()`.
impl Default for RelayId {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_name(name: &str) -> Self {
        let namespace = Uuid::NAMESPACE_DNS;
        Self(Uuid::new_v5(&namespace, name.as_bytes()))
    }
}

// Explicit serde tagging for consistent serialization across the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum RelayError {
    #[error("Duplicate action: {0}")]
    DuplicateAction(String),
    #[error("Action not found: {0}")]
    ActionNotFound(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Action '{0}' does not support streaming")]
    StreamingNotSupported(String),
    #[error("Action '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Incompatible SDK version: {0}")]
    SdkVersion(String),
}

pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Provider-internal failures carry their cause chain into the execution error.
impl From<anyhow::Error> for RelayError {
    fn from(err: anyhow::Error) -> Self {
        RelayError::Execution(format!("{:#}", err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ParamSpec {
    pub fn required(ty: ParamType) -> Self {
        Self {
            ty,
            required: true,
            default: None,
        }
    }

    pub fn optional(ty: ParamType, default: serde_json::Value) -> Self {
        Self {
            ty,
            required: false,
            default: Some(default),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// The action resolves to a single value.
    Single,
    /// The action produces a finite, non-restartable sequence of elements.
    Stream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSpec {
    pub kind: ResultKind,
    pub description: String,
}

/// Static metadata describing a single action: name, parameter schema and
/// result shape. Immutable once registered; lifetime = the owning provider's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub params: HashMap<String, ParamSpec>,
    pub result: ResultSpec,
}

impl ActionDescriptor {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: HashMap::new(),
            result: ResultSpec {
                kind: ResultKind::Single,
                description: String::new(),
            },
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.params.insert(name.to_string(), spec);
        self
    }

    #[must_use]
    pub fn streaming(mut self, description: &str) -> Self {
        self.result = ResultSpec {
            kind: ResultKind::Stream,
            description: description.to_string(),
        };
        self
    }

    #[must_use]
    pub fn returning(mut self, description: &str) -> Self {
        self.result.description = description.to_string();
        self
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.result.kind == ResultKind::Stream
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Out-of-band status notification emitted during an action's execution.
/// Value type, created fresh per emission and consumed immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub status: ProgressStatus,
    pub current_step: u64,
    pub percentage: f32,
    pub message: String,
    pub data: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(
        status: ProgressStatus,
        current_step: u64,
        percentage: f32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            current_step,
            percentage,
            message: message.into(),
            data: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

/// Shared set-once flag for cooperative cancellation. Polled, never pushed:
/// the running action checks `is_cancelled` at safe points and returns early.
/// A non-cooperating action cannot be stopped by this mechanism alone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: the flag is set at most once and never unset.
    pub fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("cancellation requested");
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Uniform notification interface for progress subscribers. Callers adapt
/// their own subscriber (sync callback, channel, ...) to this trait; the
/// executor and action bodies never branch on the calling convention.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, update: ProgressUpdate) -> anyhow::Result<()>;
}

/// Best-effort progress emitter handed to running actions.
///
/// Absent subscriber: updates are silently dropped. Failing subscriber: the
/// error is logged and execution continues — progress reporting must never
/// abort the primary task. Step numbers are clamped to be monotonically
/// non-decreasing within one invocation.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Option<Arc<dyn ProgressSink>>,
    last_step: Arc<AtomicU64>,
    last_percent_bits: Arc<AtomicU32>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            last_step: Arc::new(AtomicU64::new(0)),
            last_percent_bits: Arc::new(AtomicU32::new(0.0f32.to_bits())),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Highest step emitted so far for this invocation.
    #[must_use]
    pub fn current_step(&self) -> u64 {
        self.last_step.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn last_percentage(&self) -> f32 {
        f32::from_bits(self.last_percent_bits.load(Ordering::SeqCst))
    }

    pub async fn emit(&self, mut update: ProgressUpdate) {
        let prev = self.last_step.fetch_max(update.current_step, Ordering::SeqCst);
        if update.current_step < prev {
            tracing::warn!(
                step = update.current_step,
                prev = prev,
                "non-monotonic progress step; clamping"
            );
            update.current_step = prev;
        }
        self.last_percent_bits
            .store(update.percentage.to_bits(), Ordering::SeqCst);

        let Some(sink) = &self.sink else { return };
        if let Err(e) = sink.emit(update).await {
            tracing::warn!(error = %e, "progress subscriber failed; continuing");
        }
    }

    pub async fn started(&self, message: impl Into<String>) {
        self.emit(ProgressUpdate::new(ProgressStatus::Started, 0, 0.0, message))
            .await;
    }

    pub async fn running(&self, step: u64, total: u64, message: impl Into<String>) {
        let percentage = if total == 0 {
            100.0
        } else {
            (step as f32 / total as f32) * 100.0
        };
        self.emit(ProgressUpdate::new(
            ProgressStatus::Running,
            step,
            percentage.clamp(0.0, 100.0),
            message,
        ))
        .await;
    }

    pub async fn completed(
        &self,
        message: impl Into<String>,
        data: HashMap<String, serde_json::Value>,
    ) {
        let mut update = ProgressUpdate::new(
            ProgressStatus::Completed,
            self.current_step(),
            100.0,
            message,
        );
        update.data = data;
        self.emit(update).await;
    }

    pub async fn cancelled(&self, message: impl Into<String>) {
        self.emit(ProgressUpdate::new(
            ProgressStatus::Cancelled,
            self.current_step(),
            self.last_percentage(),
            message,
        ))
        .await;
    }

    pub async fn failed(&self, message: impl Into<String>) {
        self.emit(ProgressUpdate::new(
            ProgressStatus::Failed,
            self.current_step(),
            self.last_percentage(),
            message,
        ))
        .await;
    }
}

/// Execution-time environment handed to a running action: the progress
/// reporter and the cancellation token are the only state shared with the
/// caller; everything else moves through the update/outcome channel.
#[derive(Clone)]
pub struct ActionContext {
    pub reporter: ProgressReporter,
    pub cancellation: CancellationToken,
}

impl ActionContext {
    #[must_use]
    pub fn new(reporter: ProgressReporter, cancellation: CancellationToken) -> Self {
        Self {
            reporter,
            cancellation,
        }
    }

    /// Cooperative cancellation point. Actions call this between logical
    /// steps and `?` their way out with a `Cancelled` outcome.
    pub fn checkpoint(&self, message: impl Into<String>) -> RelayResult<()> {
        if self.cancellation.is_cancelled() {
            Err(RelayError::Cancelled(message.into()))
        } else {
            Ok(())
        }
    }
}

/// Tagged terminal outcome of one action invocation. Produced exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail")]
pub enum ActionOutcome {
    Completed(serde_json::Value),
    Cancelled { message: String },
    Failed(RelayError),
}

/// Element stream returned by streaming actions: lazy, finite, not restartable.
pub type ValueStream = futures::stream::BoxStream<'static, RelayResult<serde_json::Value>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderManifest {
    pub id: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
    pub required_config_keys: Vec<String>,
    pub sdk_version: String,
}

pub struct ProviderConfig {
    pub id: String,
    pub config_values: HashMap<String, String>,
}

/// The one capability contract every provider implements: metadata, action
/// descriptors, and an execution entry point per result shape.
#[async_trait]
pub trait ActionProvider: Send + Sync {
    fn manifest(&self) -> ProviderManifest;

    /// Descriptors for every action this provider exposes.
    fn descriptors(&self) -> Vec<ActionDescriptor>;

    async fn execute(
        &self,
        action: &str,
        params: serde_json::Value,
        ctx: ActionContext,
    ) -> RelayResult<serde_json::Value>;

    /// Streaming entry point. Providers without streaming actions keep the
    /// default; the executor reports the error instead of silently falling
    /// back to whole-result semantics.
    fn execute_stream(
        &self,
        action: &str,
        params: serde_json::Value,
        ctx: ActionContext,
    ) -> RelayResult<ValueStream> {
        let _ = (params, ctx);
        Err(RelayError::StreamingNotSupported(action.to_string()))
    }
}

#[async_trait]
pub trait ProviderFactory: Send + Sync {
    fn name(&self) -> &str;
    async fn create(&self, config: ProviderConfig) -> anyhow::Result<Arc<dyn ActionProvider>>;
}

pub struct ProviderRegistrar {
    pub factory: fn() -> Arc<dyn ProviderFactory>,
}

inventory::collect!(ProviderRegistrar);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        updates: Mutex<Vec<ProgressUpdate>>,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn emit(&self, update: ProgressUpdate) -> anyhow::Result<()> {
            self.updates.lock().unwrap().push(update);
            Ok(())
        }
    }

    #[test]
    fn test_cancellation_token_set_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.request_cancel();
        assert!(token.is_cancelled());
        // Repeat calls are idempotent; the flag is never unset
        token.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancellation_token_shared_by_clone() {
        let token = CancellationToken::new();
        let shared = token.clone();
        shared.request_cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_checkpoint_returns_cancelled() {
        let ctx = ActionContext::new(ProgressReporter::disabled(), CancellationToken::new());
        assert!(ctx.checkpoint("between steps").is_ok());
        ctx.cancellation.request_cancel();
        match ctx.checkpoint("between steps") {
            Err(RelayError::Cancelled(msg)) => assert_eq!(msg, "between steps"),
            other => panic!("expected Cancelled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reporter_without_sink_is_noop() {
        let reporter = ProgressReporter::disabled();
        reporter.started("ok").await;
        reporter.running(1, 2, "ok").await;
        assert_eq!(reporter.current_step(), 1);
    }

    #[tokio::test]
    async fn test_reporter_clamps_non_monotonic_steps() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let reporter = ProgressReporter::new(Some(sink.clone()));
        reporter.running(3, 10, "forward").await;
        reporter.running(1, 10, "backward").await;

        let updates = sink.updates.lock().unwrap();
        assert_eq!(updates[0].current_step, 3);
        // Regression is clamped to the previous maximum
        assert_eq!(updates[1].current_step, 3);
    }

    #[tokio::test]
    async fn test_reporter_percentage_bounds() {
        let sink = Arc::new(RecordingSink {
            updates: Mutex::new(Vec::new()),
        });
        let reporter = ProgressReporter::new(Some(sink.clone()));
        reporter.running(4, 4, "done").await;
        let updates = sink.updates.lock().unwrap();
        assert!((updates[0].percentage - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_execution_error_keeps_cause_chain() {
        let inner = anyhow::anyhow!("connection refused");
        let outer = inner.context("fetching page");
        let err: RelayError = outer.into();
        match err {
            RelayError::Execution(msg) => {
                assert!(msg.contains("fetching page"));
                assert!(msg.contains("connection refused"));
            }
            other => panic!("expected Execution, got {:?}", other),
        }
    }

    #[test]
    fn test_descriptor_builder() {
        let d = ActionDescriptor::new("export_records", "Streams records.")
            .with_param("count", ParamSpec::required(ParamType::Integer))
            .with_param(
                "prefix",
                ParamSpec::optional(ParamType::String, serde_json::json!("record")),
            )
            .streaming("one element per record");
        assert!(d.is_streaming());
        assert!(d.params["count"].required);
        assert_eq!(
            d.params["prefix"].default,
            Some(serde_json::json!("record"))
        );
    }

    #[test]
    fn test_outcome_serialization_tags() {
        let outcome = ActionOutcome::Cancelled {
            message: "stopped at step 2".into(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "Cancelled");
    }

    #[test]
    fn test_relay_id_from_name_is_deterministic() {
        assert_eq!(RelayId::from_name("task.worker"), RelayId::from_name("task.worker"));
        assert_ne!(RelayId::from_name("task.worker"), RelayId::from_name("data.export"));
    }
}
