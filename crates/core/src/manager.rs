use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use relay_shared::{ProviderConfig, ProviderFactory};

use crate::registry::ActionRegistry;

/// Discovers provider factories and bootstraps them into an ActionRegistry.
/// One provider failing to initialize is logged and skipped; it never takes
/// the rest of the runtime down with it.
pub struct ProviderManager {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl Default for ProviderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register_factory(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Register all built-in providers discovered via inventory.
    pub fn register_builtins(&mut self) {
        info!("🔍 Scanning for providers via inventory...");

        let mut discovered_count = 0;
        for registrar in relay_shared::inventory::iter::<relay_shared::ProviderRegistrar> {
            let factory = (registrar.factory)();
            info!("📦 Discovered provider factory: {}", factory.name());
            self.register_factory(factory);
            discovered_count += 1;
        }

        if discovered_count == 0 {
            error!("⚠️ No provider factories discovered! Check that:");
            error!("   1. Provider crates are added to relay_core/Cargo.toml");
            error!("   2. Provider crates are imported in relay_core/src/lib.rs");
        } else {
            info!("✅ Discovered {} provider factories", discovered_count);
        }
    }

    #[must_use]
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create every known provider with its config values and register it.
    pub async fn initialize_all(
        &self,
        mut configs: HashMap<String, HashMap<String, String>>,
    ) -> anyhow::Result<ActionRegistry> {
        let registry = ActionRegistry::new();

        let mut failed_providers = Vec::new();
        for (name, factory) in &self.factories {
            let config_values = configs.remove(name).unwrap_or_default();
            let config = ProviderConfig {
                id: name.clone(),
                config_values,
            };

            info!(provider = %name, "🔌 Initializing provider");
            match factory.create(config).await {
                Ok(provider) => {
                    if let Err(e) = registry.register_provider(provider).await {
                        error!(provider = %name, error = %e, "❌ Failed to register provider");
                        failed_providers.push(name.clone());
                    }
                }
                Err(e) => {
                    error!(provider = %name, error = %e, "❌ Failed to bootstrap provider");
                    failed_providers.push(name.clone());
                }
            }
        }

        if !failed_providers.is_empty() {
            warn!(
                count = failed_providers.len(),
                providers = ?failed_providers,
                "⚠️ {} provider(s) failed to initialize",
                failed_providers.len()
            );
        }

        Ok(registry)
    }
}
