use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use relay_shared::{
    ActionDescriptor, ActionProvider, ProviderManifest, RelayError, RelayResult, SDK_VERSION,
};

use crate::validation;

/// One registered action: its descriptor plus the provider that owns it.
#[derive(Clone)]
pub struct ActionEntry {
    pub descriptor: ActionDescriptor,
    pub provider_id: String,
    pub provider: Arc<dyn ActionProvider>,
}

/// In-memory action table. Descriptors are immutable once registered and
/// live exactly as long as the owning provider.
pub struct ActionRegistry {
    actions: tokio::sync::RwLock<HashMap<String, ActionEntry>>,
    providers: tokio::sync::RwLock<HashMap<String, Arc<dyn ActionProvider>>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: tokio::sync::RwLock::new(HashMap::new()),
            providers: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Register a provider and all of its actions. All-or-nothing: if any
    /// action name is already taken, nothing is inserted.
    pub async fn register_provider(&self, provider: Arc<dyn ActionProvider>) -> RelayResult<()> {
        let manifest = provider.manifest();

        // Providers compiled against a different SDK line are rejected at
        // the door, before any of their actions become resolvable.
        sdk_compatible(&manifest.sdk_version).map_err(RelayError::SdkVersion)?;

        let descriptors = provider.descriptors();
        if descriptors.is_empty() {
            warn!(provider = %manifest.id, "provider registered no actions");
        }
        for descriptor in &descriptors {
            validation::validate_descriptor(descriptor)?;
        }

        // Acquire both locks before inserting so registration is atomic with
        // respect to concurrent resolves.
        let mut actions = self.actions.write().await;
        let mut providers = self.providers.write().await;

        if providers.contains_key(&manifest.id) {
            return Err(RelayError::DuplicateAction(format!(
                "provider '{}' is already registered",
                manifest.id
            )));
        }
        for descriptor in &descriptors {
            if actions.contains_key(&descriptor.name) {
                return Err(RelayError::DuplicateAction(descriptor.name.clone()));
            }
        }

        for descriptor in descriptors {
            info!(
                provider = %manifest.id,
                action = %descriptor.name,
                streaming = descriptor.is_streaming(),
                "🔌 Registered action"
            );
            actions.insert(
                descriptor.name.clone(),
                ActionEntry {
                    descriptor,
                    provider_id: manifest.id.clone(),
                    provider: provider.clone(),
                },
            );
        }
        providers.insert(manifest.id, provider);
        Ok(())
    }

    pub async fn resolve(&self, name: &str) -> RelayResult<ActionEntry> {
        let actions = self.actions.read().await;
        actions
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::ActionNotFound(name.to_string()))
    }

    /// Remove a provider and every action it owns.
    pub async fn unregister_provider(&self, provider_id: &str) -> RelayResult<()> {
        let mut actions = self.actions.write().await;
        let mut providers = self.providers.write().await;

        if providers.remove(provider_id).is_none() {
            return Err(RelayError::ActionNotFound(format!(
                "provider '{}' is not registered",
                provider_id
            )));
        }
        actions.retain(|_, entry| entry.provider_id != provider_id);
        info!(provider = %provider_id, "🔌 Provider unregistered");
        Ok(())
    }

    pub async fn list_actions(&self) -> Vec<ActionDescriptor> {
        let actions = self.actions.read().await;
        let mut list: Vec<_> = actions.values().map(|e| e.descriptor.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn list_providers(&self) -> Vec<ProviderManifest> {
        let providers = self.providers.read().await;
        let mut list: Vec<_> = providers.values().map(|p| p.manifest()).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.read().await.is_empty()
    }
}

/// A provider is compatible when it was built against the same SDK major
/// line (same minor while the major is still 0).
fn sdk_compatible(provider_sdk: &str) -> Result<(), String> {
    let runtime = semver::Version::parse(SDK_VERSION)
        .map_err(|e| format!("runtime SDK version unparseable: {}", e))?;
    let theirs = semver::Version::parse(provider_sdk)
        .map_err(|e| format!("provider SDK version '{}' unparseable: {}", provider_sdk, e))?;

    let compatible = if runtime.major == 0 {
        theirs.major == 0 && theirs.minor == runtime.minor
    } else {
        theirs.major == runtime.major
    };

    if compatible {
        Ok(())
    } else {
        Err(format!(
            "provider built against SDK {}, runtime is {}",
            provider_sdk, SDK_VERSION
        ))
    }
}
