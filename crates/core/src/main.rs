use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env next to the CWD, falling back to the executable's directory
    if dotenvy::dotenv().is_err() {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
    tracing_subscriber::fmt::init();

    let cli = relay_core::cli::Cli::parse();
    relay_core::cli::dispatch(cli.command).await
}
