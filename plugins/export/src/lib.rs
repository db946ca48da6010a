use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use relay_shared::{
    relay_provider, ActionContext, ActionDescriptor, ActionProvider, ParamSpec, ParamType,
    ProviderConfig, ProviderManifest, RelayError, RelayResult, ValueStream,
};

pub const EXPORT_RECORDS: &str = "export_records";

#[relay_provider(
    name = "data.export",
    description = "Streams synthetic records incrementally instead of buffering the full set.",
    version = "0.1.0",
    config_keys = ["max_records"],
    tags = ["#DEMO", "#STREAM"]
)]
pub struct ExportProvider {
    max_records: u64,
}

impl ExportProvider {
    pub async fn new_provider(config: ProviderConfig) -> anyhow::Result<Self> {
        let max_records = config
            .config_values
            .get("max_records")
            .and_then(|v| v.parse().ok())
            .unwrap_or(100_000);
        Ok(Self { max_records })
    }
}

#[async_trait]
impl ActionProvider for ExportProvider {
    fn manifest(&self) -> ProviderManifest {
        self.auto_manifest()
    }

    fn descriptors(&self) -> Vec<ActionDescriptor> {
        vec![ActionDescriptor::new(
            EXPORT_RECORDS,
            "Emits `count` indexed records, pacing each one by `delay_ms`.",
        )
        .with_param("count", ParamSpec::required(ParamType::Integer))
        .with_param("delay_ms", ParamSpec::optional(ParamType::Integer, json!(0)))
        .with_param("prefix", ParamSpec::optional(ParamType::String, json!("record")))
        .streaming("one JSON object per exported record, in index order")]
    }

    async fn execute(
        &self,
        action: &str,
        _params: Value,
        _ctx: ActionContext,
    ) -> RelayResult<Value> {
        match action {
            EXPORT_RECORDS => Err(RelayError::InvalidArgument(format!(
                "action '{}' produces a stream; use invoke_streaming",
                EXPORT_RECORDS
            ))),
            other => Err(RelayError::ActionNotFound(other.to_string())),
        }
    }

    fn execute_stream(
        &self,
        action: &str,
        params: Value,
        ctx: ActionContext,
    ) -> RelayResult<ValueStream> {
        if action != EXPORT_RECORDS {
            return Err(RelayError::StreamingNotSupported(action.to_string()));
        }

        let count = params
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                RelayError::InvalidArgument("count must be a non-negative integer".into())
            })?;
        if count > self.max_records {
            return Err(RelayError::InvalidArgument(format!(
                "count must be at most {}",
                self.max_records
            )));
        }
        let delay_ms = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(0);
        let prefix = params
            .get("prefix")
            .and_then(Value::as_str)
            .unwrap_or("record")
            .to_string();

        let stream = async_stream::stream! {
            for index in 0..count {
                // Stop producing once the caller has given up; the executor
                // reports the cancelled terminal state.
                if ctx.cancellation.is_cancelled() {
                    break;
                }
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                yield Ok(json!({
                    "index": index,
                    "id": format!("{}-{}", prefix, index),
                }));
            }
        };

        Ok(Box::pin(stream))
    }
}
