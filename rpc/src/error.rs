//! Error taxonomy for the RPC channel.

use std::time::Duration;

use barls_protocol::ResponseError;

/// Failures surfaced by the channel and its send API.
///
/// [`Transport`](RpcError::Transport) and [`Codec`](RpcError::Codec) are
/// fatal to the session: the serve loop returns them and the connection is
/// torn down. The remaining variants describe individual outbound calls.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A stream read or write failed after the connection was established.
    #[error("transport broken: {0}")]
    Transport(#[source] std::io::Error),

    /// The inbound byte stream did not contain a well-formed frame.
    #[error("malformed frame: {0}")]
    Codec(String),

    /// The writer task is gone or its queue is full; nothing can be sent.
    #[error("outbound channel closed")]
    ChannelClosed,

    /// The reader stopped before the peer answered a pending request.
    #[error("response channel dropped")]
    ResponseDropped,

    /// The peer did not answer a request within the bound.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The peer answered a request with a JSON-RPC error object.
    #[error(transparent)]
    Peer(#[from] ResponseError),
}

impl RpcError {
    /// Whether this failure ends the session (as opposed to a single call).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Codec(_))
    }
}
