//! Editor-side client for the bar language server.
//!
//! [`LanguageClient::launch`] spawns `barls-server`, performs the pipe
//! rendezvous as the listener, and runs the RPC serve loop in a background
//! task. The host drives the session through the typed API (initialize,
//! hover, shutdown, exit) and observes `window/showMessage` traffic and the
//! one-time session-ended signal through [`ClientEvent`]s.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use barls_protocol::{
    InitializeParams, InitializeResult, MarkupKind, ShowMessageParams,
    TextDocumentPositionParams, methods,
};
use barls_rpc::{Context, Router, RpcChannel, RpcError, RpcSender};
use barls_transport::{LaunchCommand, PipePair, TransportError};

const DEFAULT_RENDEZVOUS_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("server command {0:?} not found in PATH")]
    CommandNotFound(String),

    /// The server did not declare hover support during initialization, or
    /// initialization never happened. Sending hover anyway would violate
    /// the capability contract.
    #[error("server did not declare hover support")]
    HoverUnsupported,

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

/// How to start and find the server. All fields default so `{}` is a valid
/// config.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfig {
    /// Executable path, or a bare name resolved through PATH.
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Rendezvous directory. Defaults to a per-process temp location, passed
    /// to the server through `BARLS_PIPE_DIR`.
    #[serde(default)]
    pub pipe_dir: Option<PathBuf>,
    #[serde(default = "default_rendezvous_timeout")]
    pub rendezvous_timeout_secs: u64,
}

fn default_command() -> String {
    "barls-server".to_string()
}

fn default_rendezvous_timeout() -> u64 {
    DEFAULT_RENDEZVOUS_TIMEOUT_SECS
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            working_dir: None,
            pipe_dir: None,
            rendezvous_timeout_secs: default_rendezvous_timeout(),
        }
    }
}

/// What the session surfaces to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The server asked us to show a message (`window/showMessage`).
    MessageShown(ShowMessageParams),
    /// The serve loop finished. `error` is `None` on a clean end (peer EOF
    /// after exit) and carries the failure otherwise. Emitted exactly once.
    SessionEnded { error: Option<String> },
}

struct ClientState {
    events: mpsc::UnboundedSender<ClientEvent>,
}

fn show_message(state: &mut ClientState, _ctx: &mut Context<'_>, params: Option<serde_json::Value>) {
    let Some(params) = params else {
        tracing::warn!("showMessage without params");
        return;
    };
    match serde_json::from_value::<ShowMessageParams>(params) {
        Ok(msg) => {
            tracing::info!(message = %msg.message, "server message");
            let _ = state.events.send(ClientEvent::MessageShown(msg));
        }
        Err(e) => tracing::warn!(error = %e, "unparseable showMessage params"),
    }
}

fn client_router() -> Router<ClientState> {
    Router::new().on_notification(methods::WINDOW_SHOW_MESSAGE, show_message)
}

/// A live session with a bar language server.
pub struct LanguageClient {
    sender: RpcSender,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    child: Option<Child>,
    hover_supported: bool,
}

impl LanguageClient {
    /// Spawn the configured server and rendezvous with it.
    ///
    /// The cancellation token aborts the connection wait (not the running
    /// session; once established, teardown is driven by shutdown/exit or
    /// transport failure).
    pub async fn launch(
        config: LaunchConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, ClientError> {
        let program = resolve_command(&config.command)?;
        let pipe_dir = config
            .pipe_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("barls-{}", std::process::id())));

        let command = LaunchCommand {
            program,
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            env: vec![(
                "BARLS_PIPE_DIR".to_string(),
                pipe_dir.display().to_string(),
            )],
        };

        tracing::info!(
            program = %command.program.display(),
            dir = %pipe_dir.display(),
            "launching language server"
        );
        let (connection, child) = barls_transport::launch(
            &pipe_dir,
            &PipePair::default(),
            &command,
            Duration::from_secs(config.rendezvous_timeout_secs),
            cancel,
        )
        .await?;

        let (reader, writer) = connection.into_streams();
        Ok(Self::attach(reader, writer, Some(child)))
    }

    /// Wire a client onto an already-connected stream pair.
    ///
    /// `launch` uses this after rendezvous; tests and alternative transports
    /// can call it directly.
    pub fn attach<R, W>(reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let channel = RpcChannel::new(reader, writer);
        let sender = channel.sender();

        let (events_tx, events) = mpsc::unbounded_channel();
        let ended_tx = events_tx.clone();
        tokio::spawn(async move {
            let router = client_router();
            let mut state = ClientState { events: events_tx };
            let error = match channel.run(&mut state, &router).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::error!(error = %e, "session failed");
                    Some(e.to_string())
                }
            };
            let _ = ended_tx.send(ClientEvent::SessionEnded { error });
        });

        Self {
            sender,
            events,
            child,
            hover_supported: false,
        }
    }

    /// Capability negotiation. Must complete before any hover is sent.
    pub async fn initialize(
        &mut self,
        formats: Vec<MarkupKind>,
    ) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams::with_hover_formats(formats);
        let params = serde_json::to_value(params).map_err(|e| RpcError::Codec(e.to_string()))?;
        let result = self.sender.request(methods::INITIALIZE, Some(params)).await?;
        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| RpcError::Codec(e.to_string()))?;
        self.hover_supported = result.capabilities.hover_provider;
        Ok(result)
    }

    /// Fire-and-forget hover notification for a document position.
    pub fn hover(
        &self,
        uri: impl Into<String>,
        line: u32,
        character: u32,
    ) -> Result<(), ClientError> {
        if !self.hover_supported {
            return Err(ClientError::HoverUnsupported);
        }
        let params = TextDocumentPositionParams::new(uri, line, character);
        let params = serde_json::to_value(params).map_err(|e| RpcError::Codec(e.to_string()))?;
        self.sender
            .notify(methods::TEXT_DOCUMENT_HOVER, Some(params))?;
        Ok(())
    }

    /// Request an orderly shutdown. The server keeps the connection until
    /// [`exit`](Self::exit).
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.sender.request(methods::SHUTDOWN, None).await?;
        Ok(())
    }

    /// Tell the server to terminate. Fire-and-forget; follow with
    /// [`wait_for_server_exit`](Self::wait_for_server_exit) when a child
    /// process was spawned.
    pub fn exit(&self) -> Result<(), ClientError> {
        self.sender.notify(methods::EXIT, None)?;
        Ok(())
    }

    /// Next session event; `None` once the event stream is exhausted after
    /// `SessionEnded`.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Reap the spawned server process, if any.
    pub async fn wait_for_server_exit(&mut self) -> Result<Option<std::process::ExitStatus>, ClientError> {
        match self.child.as_mut() {
            Some(child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }
}

fn resolve_command(command: &str) -> Result<PathBuf, ClientError> {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return Ok(PathBuf::from(command));
    }
    which::which(command).map_err(|_| ClientError::CommandNotFound(command.to_string()))
}
