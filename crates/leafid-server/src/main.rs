#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::handler::router;
use server::state::AppState;
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

// mimalloc holds up better than the system allocator under many concurrent
// requests, and much better than musl's.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let state = AppState::start(&config).await?;
    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    let served = axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop the background tasks even if the server failed.
    state.shutdown().await;
    served?;

    tracing::info!("Server stopped");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            addr = %config.server_addr,
            "Listening with config: {config:#?}"
        );
    } else {
        tracing::info!(
            segment = config.segment.is_some(),
            snowflake = config.snowflake.is_some(),
            addr = %config.server_addr,
            "Listening"
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Draining connections before exit");
}
