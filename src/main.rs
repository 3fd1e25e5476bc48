use clap::Parser;
use tracing_subscriber::EnvFilter;

use hr_approval_core::cli::{self, Cli};

#[tokio::main]
async fn main() {
    // Load .env if present so DATABASE_URL, JWT_SECRET, etc. are picked up
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = hr_approval_core::config::config();
    tracing::info!("Starting approval service in {:?} mode", config.environment);

    let cli = Cli::parse();
    if let Err(e) = cli::run(cli, config).await {
        match std::env::var("CLI_VERBOSE").as_deref() {
            Ok("true") | Ok("1") => eprintln!("Error: {e:?}"),
            _ => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}
