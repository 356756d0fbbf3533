//! Rendezvous failure taxonomy.

use std::path::PathBuf;

/// Everything is fatal to session establishment; there is no retry above
/// the short connect backoff inside the bounded wait.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server child process could not start. Raised before any
    /// connection wait, so the caller never blocks on a peer that will
    /// never arrive.
    #[error("failed to spawn server process: {0}")]
    ProcessSpawnFailed(#[source] std::io::Error),

    /// The caller's cancellation signal fired while waiting for the peer.
    #[error("rendezvous cancelled")]
    RendezvousCancelled,

    /// The peer did not appear within the bounded wait, or the named
    /// endpoint never existed.
    #[error("rendezvous failed: {reason}")]
    RendezvousFailed { reason: String },

    /// A listener endpoint could not be created.
    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("transport i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
