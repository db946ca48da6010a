use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use relay_shared::{
    ActionContext, ActionDescriptor, ActionProvider, ProviderManifest, RelayResult, SDK_VERSION,
};

pub enum MockBehavior {
    Succeed(Value),
    Fail(String),
    Panic,
    Sleep(Duration),
}

/// Configurable provider for exercising executor and registry paths
/// without real plugins.
pub struct MockProvider {
    pub id: String,
    pub actions: Vec<ActionDescriptor>,
    pub behavior: MockBehavior,
    pub sdk_version: String,
}

impl MockProvider {
    pub fn new(id: &str, action: &str) -> Self {
        Self {
            id: id.to_string(),
            actions: vec![ActionDescriptor::new(action, "mock action")],
            behavior: MockBehavior::Succeed(json!({"ok": true})),
            sdk_version: SDK_VERSION.to_string(),
        }
    }

    pub fn with_behavior(mut self, behavior: MockBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_actions(mut self, actions: Vec<ActionDescriptor>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_sdk_version(mut self, version: &str) -> Self {
        self.sdk_version = version.to_string();
        self
    }
}

#[async_trait]
impl ActionProvider for MockProvider {
    fn manifest(&self) -> ProviderManifest {
        ProviderManifest {
            id: self.id.clone(),
            description: "mock provider".to_string(),
            version: "0.0.0".to_string(),
            tags: vec![],
            required_config_keys: vec![],
            sdk_version: self.sdk_version.clone(),
        }
    }

    fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.actions.clone()
    }

    async fn execute(
        &self,
        _action: &str,
        _params: Value,
        _ctx: ActionContext,
    ) -> RelayResult<Value> {
        match &self.behavior {
            MockBehavior::Succeed(value) => Ok(value.clone()),
            MockBehavior::Fail(message) => {
                Err(anyhow::anyhow!("{}", message).context("mock execution").into())
            }
            MockBehavior::Panic => panic!("intentional test panic"),
            MockBehavior::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(json!({"slept_ms": duration.as_millis() as u64}))
            }
        }
    }
}
