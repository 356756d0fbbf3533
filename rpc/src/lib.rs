//! Duplex JSON-RPC message channel over a pair of byte streams.
//!
//! LSP frames messages as `Content-Length: N\r\n\r\n{json}`. The [`codec`]
//! module reads and writes that framing; [`RpcChannel`] wraps one inbound and
//! one outbound stream into a single logical channel with a writer task, a
//! pending-request map for outbound calls, and a [`Router`] mapping method
//! names to handler functions.

pub mod codec;

mod channel;
mod error;
mod router;

pub use channel::{RpcChannel, RpcSender};
pub use error::RpcError;
pub use router::{Context, NotificationHandler, RequestHandler, Router};
