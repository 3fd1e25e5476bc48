use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::app::{app, AppState};
use crate::approval::ApprovalEngine;
use crate::auth::TokenService;
use crate::authz::AuthorizationEvaluator;
use crate::config::{AppConfig, Environment};
use crate::database::{
    ApprovalStore, DatabaseManager, MemoryApprovalStore, PgApprovalStore, PgSessionPool,
};
use crate::notification::{LogNotifier, Notifier, WebhookNotifier};
use crate::scheduler::{self, DeadlineScheduler};

#[derive(Parser)]
#[command(name = "hr-approval")]
#[command(about = "Multi-tenant approval workflow service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API together with the deadline scheduler")]
    Serve {
        #[arg(long, help = "Listen port, overrides API_PORT")]
        port: Option<u16>,
    },

    #[command(about = "Run a single deadline sweep and exit")]
    Sweep,

    #[command(about = "Load and validate configuration and the role hierarchy")]
    CheckConfig,
}

pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;
    let authz = Arc::new(load_authorization(config)?);

    match cli.command {
        Commands::CheckConfig => {
            tracing::info!(
                environment = ?config.environment,
                hierarchy_edges = authz.hierarchy().edges().count(),
                "Configuration is valid"
            );
            println!("configuration ok ({:?})", config.environment);
            Ok(())
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.api.port);
            let notifier = Arc::new(build_notifier(config)?);
            match config.database.url {
                Some(_) => {
                    let store = Arc::new(connect_store(config).await?);
                    serve(config, port, store, notifier, authz).await
                }
                None if matches!(config.environment, Environment::Development) => {
                    tracing::warn!("DATABASE_URL not set, serving from in-memory storage");
                    serve(config, port, Arc::new(MemoryApprovalStore::new()), notifier, authz).await
                }
                None => anyhow::bail!("DATABASE_URL is required outside development"),
            }
        }
        Commands::Sweep => {
            let notifier = Arc::new(build_notifier(config)?);
            let store = Arc::new(connect_store(config).await?);
            let engine = ApprovalEngine::new(store, notifier, authz);
            let report = DeadlineScheduler::new(engine, config.scheduler.clone())
                .sweep_once(Utc::now())
                .await?;
            println!(
                "swept {} tenants: {} escalated, {} failed",
                report.tenants, report.escalated, report.failed
            );
            Ok(())
        }
    }
}

fn load_authorization(config: &AppConfig) -> anyhow::Result<AuthorizationEvaluator> {
    match &config.role_hierarchy_file {
        Some(path) => AuthorizationEvaluator::from_file(path)
            .with_context(|| format!("failed to load role hierarchy from {}", path)),
        None => Ok(AuthorizationEvaluator::default()),
    }
}

fn build_notifier(config: &AppConfig) -> anyhow::Result<Box<dyn Notifier>> {
    match &config.notification.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(url.clone(), config.scheduler.escalation_timeout())?;
            Ok(Box::new(notifier))
        }
        None => Ok(Box::new(LogNotifier)),
    }
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<PgApprovalStore> {
    let pool = DatabaseManager::connect(&config.database).await?;
    DatabaseManager::health_check(&pool).await?;
    Ok(PgApprovalStore::new(PgSessionPool::new(pool)))
}

async fn serve<S, N>(
    config: &AppConfig,
    port: u16,
    store: Arc<S>,
    notifier: Arc<N>,
    authz: Arc<AuthorizationEvaluator>,
) -> anyhow::Result<()>
where
    S: ApprovalStore + 'static,
    N: Notifier + 'static,
{
    let tokens = TokenService::from_config(&config.security)?;
    let engine = ApprovalEngine::new(store, notifier, authz);
    let router = app(AppState::new(engine.clone(), tokens));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Arc::new(DeadlineScheduler::new(engine, config.scheduler.clone()));
    let sweeper_handle = scheduler::spawn(sweeper, wait_for_shutdown(shutdown_rx.clone()));

    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Approval API listening on http://{}", bind_addr);

    let server = axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown(shutdown_rx));
    let signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    };

    let (served, _, swept) = futures::future::join3(server.into_future(), signal, sweeper_handle).await;
    served.context("server error")?;
    swept.context("scheduler task panicked")?;
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
