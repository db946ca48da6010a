use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

use crate::config::RuntimeConfig;
use crate::executor::{ActionExecutor, InvokeOptions};
use crate::manager::ProviderManager;
use crate::progress::progress_channel;

#[derive(Parser)]
#[command(name = "relay_system", about = "Relay action runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List all registered actions
    List,
    /// Invoke a named action with a JSON parameter bag
    Run {
        /// Action name, e.g. "long_running_task"
        action: String,
        /// JSON object with the action parameters
        #[arg(long, default_value = "{}")]
        params: String,
        /// Hard time budget; falls back to RELAY_ACTION_TIMEOUT_SECS
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Drive the streaming path and print elements as they arrive
        #[arg(long)]
        stream: bool,
    },
}

/// Per-provider config values injected from the environment at runtime
/// (never persisted anywhere).
fn provider_configs_from_env() -> HashMap<String, HashMap<String, String>> {
    let mut configs: HashMap<String, HashMap<String, String>> = HashMap::new();

    if let Ok(commands) = std::env::var("RELAY_SHELL_ALLOWED_COMMANDS") {
        configs
            .entry("tool.shell".to_string())
            .or_default()
            .insert("allowed_commands".to_string(), commands);
    }
    if let Ok(hosts) = std::env::var("RELAY_FETCH_ALLOWED_HOSTS") {
        configs
            .entry("net.fetch".to_string())
            .or_default()
            .insert("allowed_hosts".to_string(), hosts);
    }

    configs
}

pub async fn dispatch(command: Command) -> anyhow::Result<()> {
    let config = RuntimeConfig::load()?;

    let mut manager = ProviderManager::new();
    manager.register_builtins();
    let registry = Arc::new(manager.initialize_all(provider_configs_from_env()).await?);
    let executor = ActionExecutor::new(registry.clone(), &config);

    match command {
        Command::List => {
            for descriptor in registry.list_actions().await {
                let kind = if descriptor.is_streaming() {
                    "[stream]"
                } else {
                    "        "
                };
                println!("{:<24} {} {}", descriptor.name, kind, descriptor.description);
            }
            Ok(())
        }
        Command::Run {
            action,
            params,
            timeout_secs,
            stream,
        } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("--params must be valid JSON")?;

            let (sink, mut updates) = progress_channel(config.progress_channel_capacity);
            let printer = tokio::spawn(async move {
                while let Some(update) = updates.next().await {
                    println!(
                        "[{:>5.1}%] {:<9} {}",
                        update.percentage,
                        format!("{:?}", update.status).to_lowercase(),
                        update.message
                    );
                }
            });

            let mut opts = InvokeOptions::new().with_sink(sink);
            if let Some(secs) = timeout_secs {
                opts = opts.with_timeout(Duration::from_secs(secs));
            }

            if stream {
                let mut elements = executor.invoke_streaming(&action, params, opts).await?;
                while let Some(item) = elements.next().await {
                    match item {
                        Ok(value) => println!("{}", value),
                        Err(e) => {
                            eprintln!("stream error: {}", e);
                            break;
                        }
                    }
                }
            } else {
                let outcome = executor.invoke(&action, params, opts).await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }

            // Executor side of the channel is gone once the invocation ends
            printer.await.ok();
            Ok(())
        }
    }
}
