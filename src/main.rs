//! fiducia entry point.
//!
//! Thin by intent: parse flags, set up tracing, load config, build the
//! application, start background tasks, and serve HTTP. Exit codes: 0
//! success, 1 fatal runtime error, 2 configuration error.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use fiducia::application::bootstrap::App;
use fiducia::config::{Config, Mode};
use fiducia::interfaces::http::build_router;

#[derive(Parser, Debug)]
#[command(name = "fiducia", about = "Multi-agent investment advisory core")]
struct Cli {
    /// Address to bind the HTTP server to (overrides BIND_ADDRESS)
    #[arg(long)]
    bind: Option<String>,

    /// Path to the compliance policy document (overrides POLICY_PATH)
    #[arg(long)]
    policy: Option<std::path::PathBuf>,

    /// Force mock mode for broker and LLM regardless of credentials
    #[arg(long)]
    mock: bool,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };
    if cli.mock {
        config.mode = Mode::Mock;
    }
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(policy) = cli.policy {
        config.policy.path = Some(policy);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let bind_address = config.bind_address.clone();
    let app = Arc::new(App::build(config).await.context("Failed to build application")?);
    let background = app.start_background();

    let router = build_router(Arc::clone(&app));
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("fiducia listening on http://{bind_address}");

    let shutdown_app = Arc::clone(&app);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received; draining background tasks");
            shutdown_app.shutdown();
        })
        .await
        .context("server crashed")?;

    // Let the watcher and synchronizer observe the stop signal and finish
    // their current iteration.
    app.shutdown();
    for handle in background {
        let _ = handle.await;
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
