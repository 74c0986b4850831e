use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chat_hub::config::Config;
use chat_hub::server::Server;

const DEFAULT_FILTER: &str = "chat_hub=info,server=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("chat hub v{} starting", env!("CARGO_PKG_VERSION"));

    let srv = Server::new(config);

    // Graceful shutdown on Ctrl-C
    let shutdown = srv.shutdown_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down…");
        shutdown.cancel();
    });

    srv.listen_and_serve().await
}
