//! barls-server entry point.
//!
//! Spawned by the editor-side client. Connects to the rendezvous sockets,
//! serves one session, and exits when the client says so (or the transport
//! dies). Logs go to stderr; the protocol owns the pipes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use barls_rpc::RpcChannel;
use barls_server::{EndReason, Session, SessionEvent, router};
use barls_transport::PipePair;

const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(10);

/// Rendezvous directory: first CLI argument, then `BARLS_PIPE_DIR`, then a
/// well-known temp location shared with the client's default.
fn pipe_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("BARLS_PIPE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| std::env::temp_dir().join("barls"))
}

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

    let dir = pipe_dir();
    tracing::info!(dir = %dir.display(), "barls-server connecting");

    let connection = barls_transport::connect(&dir, &PipePair::default(), RENDEZVOUS_TIMEOUT)
        .await
        .context("rendezvous with client")?;
    let (reader, writer) = connection.into_streams();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(events_tx);
    let channel = RpcChannel::new(reader, writer);
    let served = channel.run(&mut session, &router()).await;

    match served {
        Ok(()) => {
            if !session.is_closed() {
                // Client went away without sending exit.
                session.end(EndReason::TransportFailed(
                    "stream closed without exit".to_string(),
                ));
            }
        }
        Err(e) => session.end(EndReason::TransportFailed(e.to_string())),
    }

    // The run loop has returned and the connection is dropped; report the
    // one-time session-ended signal and finish.
    while let Ok(event) = events_rx.try_recv() {
        match event {
            SessionEvent::Initialized { hover_format } => {
                tracing::debug!(hover_format = %hover_format.as_str(), "session was initialized");
            }
            SessionEvent::Ended { reason } => match reason {
                EndReason::Clean => tracing::info!("session ended cleanly"),
                EndReason::NoShutdown => {
                    tracing::warn!("session ended via exit without shutdown");
                }
                EndReason::TransportFailed(msg) => {
                    tracing::error!(error = %msg, "session ended: transport failure");
                    anyhow::bail!("transport failure: {msg}");
                }
            },
        }
    }

    Ok(())
}
