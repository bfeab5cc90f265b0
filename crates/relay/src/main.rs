// socialnet-relay: standalone fan-out server.

use anyhow::Context;
use socialnet_relay::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .init();

    socialnet_relay::server::run(config).await.context("socialnet relay terminated unexpectedly")
}
