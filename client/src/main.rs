//! barls-client demo driver.
//!
//! Launches the server, walks the full session once, and prints what the
//! server sent back: initialize → hover on `file:///test.bar` at 3:7 →
//! showMessage → shutdown → exit.

use anyhow::{Context as _, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use barls_client::{ClientEvent, LanguageClient, LaunchConfig};
use barls_protocol::MarkupKind;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = LaunchConfig {
        command: std::env::args().nth(1).unwrap_or_else(|| "barls-server".to_string()),
        ..LaunchConfig::default()
    };

    let cancel = CancellationToken::new();
    let mut client = LanguageClient::launch(config, &cancel)
        .await
        .context("launching barls-server")?;

    let result = client
        .initialize(vec![MarkupKind::PlainText])
        .await
        .context("initialize")?;
    anyhow::ensure!(
        result.capabilities.hover_provider,
        "server did not declare hover support"
    );

    client.hover("file:///test.bar", 3, 7).context("hover")?;

    match client.next_event().await {
        Some(ClientEvent::MessageShown(msg)) => println!("{}", msg.message),
        other => anyhow::bail!("expected a server message, got {other:?}"),
    }

    client.shutdown().await.context("shutdown")?;
    client.exit().context("exit")?;

    if let Some(status) = client.wait_for_server_exit().await? {
        tracing::info!(%status, "server exited");
    }

    match client.next_event().await {
        Some(ClientEvent::SessionEnded { error: None }) => Ok(()),
        Some(ClientEvent::SessionEnded { error: Some(e) }) => {
            anyhow::bail!("session ended with transport failure: {e}")
        }
        other => anyhow::bail!("expected session end, got {other:?}"),
    }
}
