use std::sync::Arc;

use clap::Parser;
use encchat::{
    api::{self, AllowedOrigins},
    config::ServerConfig,
    Relay,
};
use log::{info, warn};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received, closing server");
}

#[tokio::main]
async fn main() -> Result<(), warp::Error> {
    pretty_env_logger::init();

    let config = ServerConfig::parse();

    // The registry lives exactly as long as the server.
    let relay = Arc::new(Relay::new());
    let routes = api::build_filters(relay, AllowedOrigins::new(&config.allowed_origins));

    let (addr, server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(config.socket_addr(), shutdown_signal())?;
    info!("encchat server listening on {}", addr);
    info!("allowed origins: {}", config.allowed_origins.join(", "));

    server.await;
    info!("server closed");
    Ok(())
}
