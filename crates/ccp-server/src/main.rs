//! Workflow controller entry point.
//!
//! Binary name: `ccp`
//!
//! Parses CLI arguments, loads configuration and the workflow document, then
//! runs the controller, the watched-directory observer and the admin API
//! until Ctrl+C or SIGTERM.

mod cli;
mod http;
mod state;

use anyhow::Context;
use ccp_infra::config::{clamp_limits, load_config};
use ccp_infra::watcher::{DEFAULT_DEBOUNCE, forward_events, start_watcher};
use ccp_infra::workflow::load_workflow;
use ccp_observe::tracing_setup::{init_tracing, verbosity_directive};
use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format, verbosity_directive(cli.verbose))
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    match cli.command {
        Commands::ValidateWorkflow { path } => {
            let workflow = load_workflow(&path)
                .await
                .with_context(|| format!("invalid workflow document {}", path.display()))?;
            println!(
                "{}: {} chains, {} links, {} watched directories",
                path.display(),
                workflow.chains.len(),
                workflow.links.len(),
                workflow.watched_directories.len()
            );
        }

        Commands::Serve(args) => {
            let config = clamp_limits(args.apply(load_config(&cli.config).await));
            let state = AppState::init(config).await?;
            state.controller.run();

            let watched_dir = state.config.watched_dir();
            let (watcher, events) = start_watcher(
                &watched_dir,
                &state.workflow.watched_directories,
                DEFAULT_DEBOUNCE,
            )?;
            let forwarder = forward_events(events, state.controller.clone());

            let addr = state.config.admin_addr.clone();
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind admin API on {addr}"))?;
            tracing::info!(
                addr = %addr,
                shared_dir = %state.config.shared_dir.display(),
                watched_dir = %watched_dir.display(),
                "controller started"
            );

            let controller = state.controller.clone();
            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            drop(watcher);
            forwarder.abort();
            controller.close().await?;
            tracing::info!("controller stopped");
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
