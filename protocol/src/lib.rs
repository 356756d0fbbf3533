//! Wire types for the bar language server protocol.
//!
//! This crate defines the JSON-RPC 2.0 envelope ([`Request`],
//! [`Notification`], [`Response`]) and the LSP payload subset the client
//! and server exchange: capability descriptors for `initialize`, hover
//! position parameters, and `window/showMessage` parameters.

pub mod jsonrpc;
pub mod lsp;

pub use jsonrpc::{Notification, Request, Response, ResponseError};
pub use lsp::{
    ClientCapabilities, HoverClientCapabilities, InitializeParams, InitializeResult, MarkupKind,
    MessageType, Position, ServerCapabilities, ShowMessageParams, TextDocumentClientCapabilities,
    TextDocumentIdentifier, TextDocumentPositionParams,
};

/// LSP method names used by this protocol core.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";
    pub const TEXT_DOCUMENT_HOVER: &str = "textDocument/hover";
    pub const WINDOW_SHOW_MESSAGE: &str = "window/showMessage";
}
