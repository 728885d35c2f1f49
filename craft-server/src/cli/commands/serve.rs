use crate::api::{create_router, AppState};
use crate::cli::{
    commands::{build_service, EngineArgs},
    config::Config,
    error::{CliError, CliResult},
};
use clap::Args;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ServeCommand {
    /// Port to bind the server to
    #[arg(short, long, env = "CRAFT_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CRAFT_HOST")]
    pub host: Option<String>,

    /// Disable the permissive CORS layer
    #[arg(long)]
    pub no_cors: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl ServeCommand {
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.no_cors {
            config.server.cors_enabled = false;
        }
        self.engine.apply(config);
    }
}

pub async fn execute(cmd: ServeCommand, mut config: Config) -> CliResult<()> {
    info!("Starting Infini-Craft API server");
    cmd.apply(&mut config);

    let service = build_service(&config)?;
    let app = create_router(AppState::new(service), config.server.cors_enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| CliError::InvalidArgument(format!("Invalid host:port combination: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| CliError::Server(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("Infini-Craft API server listening on http://{}", addr);
    if !config.server.cors_enabled {
        warn!("CORS disabled; browser clients on other origins will be refused");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| CliError::Server(e.to_string()))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received, starting graceful shutdown");
}
