//! The bar language server.
//!
//! Hover is the only capability. The [`target`] module registers the method
//! handlers (`initialize`, `textDocument/hover`, `shutdown`, `exit`) on a
//! [`barls_rpc::Router`]; [`session`] carries the state machine and the
//! negotiated hover format through every handler invocation.

pub mod session;
pub mod target;

pub use session::{EndReason, Session, SessionEvent, SessionState};
pub use target::router;
