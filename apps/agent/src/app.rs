use std::sync::Arc;
use std::time::Duration;

use ota_auth::{AuthClient, CredentialStore};
use ota_handler::{Dispatcher, ReportService, SEND_BUFFER_SIZE, Sender, TransferHandler, spawn_reaper};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::stdio;

/// How long pending replies get to reach stdout during shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Main agent loop: serves stdin until it closes or Ctrl+C arrives.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    if config.auth.token_url.is_empty() {
        anyhow::bail!("auth.token_url is not configured");
    }
    let mut client = AuthClient::http(config.auth.token_url.clone())?
        .with_retry(config.retry_config())
        .with_default_lifetime(Duration::from_secs(config.auth.default_token_lifetime_secs));
    if let Some(scope) = &config.auth.scope {
        client = client.with_scope(scope.clone());
    }

    let credentials = config.credentials();
    if credentials.is_none() {
        tracing::warn!("no client credentials configured, requests will be rejected");
    }
    let store = CredentialStore::new(client, credentials)
        .with_refresh_timeout(Duration::from_secs(config.auth.refresh_timeout_secs))
        .with_expiry_skew(Duration::from_secs(config.auth.expiry_skew_secs));

    let reports = match &config.transfer.manifest_path {
        Some(path) => ReportService::open(path).await?,
        None => ReportService::new(),
    };

    let (sender, outbound) = Sender::channel(SEND_BUFFER_SIZE);
    let handler = Arc::new(TransferHandler::new(
        Arc::new(store),
        Arc::new(reports),
        config.handler_config(),
        sender.clone(),
    ));
    let reaper = spawn_reaper(Arc::clone(&handler), cancel.clone());

    let (inbound_tx, inbound_rx) = mpsc::channel(SEND_BUFFER_SIZE);
    let reader = tokio::spawn(stdio::read_messages(
        tokio::io::stdin(),
        inbound_tx,
        sender.clone(),
        cancel.clone(),
    ));
    let writer = tokio::spawn(stdio::write_messages(tokio::io::stdout(), outbound));
    let mut dispatcher =
        tokio::spawn(Dispatcher::new(handler, sender).run(inbound_rx, cancel.clone()));

    tracing::info!(
        package_dir = ?config.transfer.package_dir,
        checksum_policy = ?config.transfer.checksum_policy,
        "agent ready"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = &mut dispatcher => {
            tracing::info!("input closed, shutting down");
        }
    }

    cancel.cancel();
    if !dispatcher.is_finished() {
        let _ = dispatcher.await;
    }
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    match reader.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "stdin reader failed"),
        Err(e) => tracing::warn!(error = %e, "stdin reader panicked"),
        Ok(Ok(())) => {}
    }

    // The writer ends once the last sender clone is gone.
    match tokio::time::timeout(FLUSH_TIMEOUT, writer).await {
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "stdout writer failed"),
        Ok(Err(e)) => tracing::warn!(error = %e, "stdout writer panicked"),
        Err(_) => tracing::warn!("timed out flushing pending replies"),
        Ok(Ok(Ok(()))) => {}
    }

    tracing::info!("agent stopped");
    Ok(())
}
