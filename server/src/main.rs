use anyhow::Result;
use tokio_util::sync::CancellationToken;

use server::{api, build_state, config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::load_with_discovery()?;
    let state = build_state(&config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_token.cancel();
        }
    });

    api::run_api(state, &config.listen.addr, shutdown).await
}
