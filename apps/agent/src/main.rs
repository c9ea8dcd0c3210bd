//! OTA transfer agent.
//!
//! Headless service that receives package transfers from a coordinator as
//! line-delimited JSON on stdin and answers on stdout. Logs go to stderr.
//!
//! Usage: `ota-agent [CONFIG_PATH]`

mod app;
mod config;
mod stdio;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs must stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("OTA agent v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load(std::env::args_os().nth(1).map(PathBuf::from))?;
    tracing::info!(
        token_url = %config.auth.token_url,
        client_id = %config.auth.client_id,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    Ok(())
}
