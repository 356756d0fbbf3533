//! Session state machine and lifecycle events.

use barls_protocol::MarkupKind;
use tokio::sync::mpsc;

/// Lifecycle of a single client connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Negotiating,
    Active,
    ShuttingDown,
    Closed,
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `shutdown` then `exit`, in order.
    Clean,
    /// `exit` arrived without a prior `shutdown`. Accepted, but abnormal.
    NoShutdown,
    /// The transport failed or the peer vanished mid-session.
    TransportFailed(String),
}

/// Published to the hosting process at lifecycle transitions, over an
/// explicit observer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Capability negotiation finished; the hover format is now fixed.
    Initialized { hover_format: MarkupKind },
    /// The session is over. Emitted exactly once.
    Ended { reason: EndReason },
}

/// Per-connection state threaded through every handler invocation.
///
/// Handlers run strictly sequentially on the serve loop, so no interior
/// locking is needed; the negotiated hover format is written once during
/// initialization and only read afterwards.
pub struct Session {
    state: SessionState,
    hover_format: Option<MarkupKind>,
    events: mpsc::UnboundedSender<SessionEvent>,
    ended: bool,
    closed_traffic_logged: bool,
}

impl Session {
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            state: SessionState::Uninitialized,
            hover_format: None,
            events,
            ended: false,
            closed_traffic_logged: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// The format negotiated during initialize. `None` before `Active`.
    #[must_use]
    pub fn hover_format(&self) -> Option<&MarkupKind> {
        self.hover_format.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.state, to = ?state, "session transition");
        self.state = state;
    }

    pub(crate) fn finish_negotiation(&mut self, format: MarkupKind) {
        self.hover_format = Some(format.clone());
        self.set_state(SessionState::Active);
        let _ = self.events.send(SessionEvent::Initialized {
            hover_format: format,
        });
    }

    /// Transition to `Closed` and raise the session-ended signal. The signal
    /// fires exactly once even if called again.
    pub fn end(&mut self, reason: EndReason) {
        self.set_state(SessionState::Closed);
        if self.ended {
            return;
        }
        self.ended = true;
        let _ = self.events.send(SessionEvent::Ended { reason });
    }

    /// Log post-teardown traffic once per session, then stay silent.
    pub(crate) fn note_traffic_after_close(&mut self, method: &str) {
        if !self.closed_traffic_logged {
            tracing::warn!(%method, "message received after session closed, ignoring");
            self.closed_traffic_logged = true;
        }
    }
}
