//! Static method registry and the per-dispatch handler context.
//!
//! Handlers are plain function pointers registered once at startup, as an
//! explicit table instead of runtime discovery. Requests and notifications
//! have distinct shapes: a request handler produces a result (or an error
//! object) that is sent back to the peer; a notification handler has no
//! return channel.

use std::collections::HashMap;

use barls_protocol::ResponseError;
use serde_json::Value;

use crate::channel::RpcSender;
use crate::error::RpcError;

pub type RequestHandler<S> =
    fn(&mut S, &mut Context<'_>, Option<Value>) -> Result<Value, ResponseError>;

pub type NotificationHandler<S> = fn(&mut S, &mut Context<'_>, Option<Value>);

/// Maps method names to handlers over shared state `S`.
pub struct Router<S> {
    requests: HashMap<&'static str, RequestHandler<S>>,
    notifications: HashMap<&'static str, NotificationHandler<S>>,
}

impl<S> Default for Router<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Router<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    #[must_use]
    pub fn on_request(mut self, method: &'static str, handler: RequestHandler<S>) -> Self {
        self.requests.insert(method, handler);
        self
    }

    #[must_use]
    pub fn on_notification(
        mut self,
        method: &'static str,
        handler: NotificationHandler<S>,
    ) -> Self {
        self.notifications.insert(method, handler);
        self
    }

    pub(crate) fn request_handler(&self, method: &str) -> Option<RequestHandler<S>> {
        self.requests.get(method).copied()
    }

    pub(crate) fn notification_handler(&self, method: &str) -> Option<NotificationHandler<S>> {
        self.notifications.get(method).copied()
    }
}

/// Handed to every handler invocation. Lets handlers issue fire-and-forget
/// notifications back to the peer and ask the serve loop to stop once the
/// current dispatch returns.
pub struct Context<'a> {
    sender: &'a RpcSender,
    close_requested: bool,
    send_failure: Option<RpcError>,
}

impl<'a> Context<'a> {
    /// Build a context around a sender. The serve loop does this for every
    /// dispatch; direct handler invocation (tests, embedding) can too.
    #[must_use]
    pub fn new(sender: &'a RpcSender) -> Self {
        Self {
            sender,
            close_requested: false,
            send_failure: None,
        }
    }

    /// Enqueue an outbound notification. Never blocks on delivery; a send
    /// failure is recorded and ends the session after this dispatch.
    pub fn notify(&mut self, method: &'static str, params: Option<Value>) {
        if let Err(e) = self.sender.notify(method, params) {
            tracing::warn!(%method, error = %e, "failed to enqueue outbound notification");
            if self.send_failure.is_none() {
                self.send_failure = Some(e);
            }
        }
    }

    /// Stop the serve loop after the current dispatch returns.
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub(crate) fn take_send_failure(&mut self) -> Option<RpcError> {
        self.send_failure.take()
    }
}
