//! Method handlers: capability negotiation, hover, shutdown, exit.

use barls_protocol::{
    InitializeParams, InitializeResult, MarkupKind, MessageType, ResponseError,
    ServerCapabilities, ShowMessageParams, TextDocumentPositionParams, methods,
};
use barls_rpc::{Context, Router};
use serde_json::Value;

use crate::session::{EndReason, Session, SessionState};

/// Build the static method registry. Hover is the only capability; every
/// other method a client might send gets the channel's method-not-found
/// treatment.
#[must_use]
pub fn router() -> Router<Session> {
    Router::new()
        .on_request(methods::INITIALIZE, initialize)
        .on_request(methods::SHUTDOWN, shutdown)
        .on_notification(methods::TEXT_DOCUMENT_HOVER, hover)
        .on_notification(methods::EXIT, exit)
}

/// Pick the hover format for the rest of the session.
///
/// The first declared format wins; a client that declares nothing gets
/// plaintext.
fn negotiate_hover_format(declared: &[MarkupKind]) -> MarkupKind {
    match declared {
        [] => {
            tracing::info!("client declared no hover formats, falling back to plaintext");
            MarkupKind::PlainText
        }
        [only] => only.clone(),
        [first, ..] => {
            tracing::info!(
                declared = declared.len(),
                chosen = %first.as_str(),
                "client declared multiple hover formats, using the first"
            );
            first.clone()
        }
    }
}

fn initialize(
    session: &mut Session,
    _ctx: &mut Context<'_>,
    params: Option<Value>,
) -> Result<Value, ResponseError> {
    if session.is_closed() {
        session.note_traffic_after_close(methods::INITIALIZE);
        return Err(ResponseError::invalid_request("session closed"));
    }
    if session.state() != SessionState::Uninitialized {
        tracing::warn!(state = ?session.state(), "rejecting repeated initialize");
        return Err(ResponseError::invalid_request(
            "initialize already received",
        ));
    }

    let params: InitializeParams = match params {
        Some(value) => serde_json::from_value(value)
            .map_err(|e| ResponseError::invalid_request(format!("bad initialize params: {e}")))?,
        None => InitializeParams::default(),
    };
    session.set_state(SessionState::Negotiating);

    let declared = &params.capabilities.text_document.hover.content_format;
    let format = negotiate_hover_format(declared);
    tracing::info!(hover_format = %format.as_str(), "session initialized");
    session.finish_negotiation(format);

    let result = InitializeResult {
        capabilities: ServerCapabilities {
            hover_provider: true,
        },
    };
    serde_json::to_value(result).map_err(|e| ResponseError::internal(e.to_string()))
}

/// Render the hover status line in the negotiated format.
///
/// An unrecognized format can only mean negotiation stored a value no
/// compose arm knows; callers assert on it in debug builds, and production
/// degrades to a generic message instead of taking the session down.
fn compose_hover_message(format: &MarkupKind, position: &TextDocumentPositionParams) -> String {
    let uri = match url::Url::parse(&position.text_document.uri) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => position.text_document.uri.clone(),
    };
    let (line, character) = (position.position.line, position.position.character);

    match format {
        MarkupKind::PlainText => format!(
            "barls - File: {uri} Line: {line} Character: {character} HoverContentFormat: plaintext"
        ),
        MarkupKind::Markdown => format!(
            "barls - **File:** {uri} _Line:_ {line} _Character:_ {character} \
             **HoverContentFormat:** markdown"
        ),
        MarkupKind::Unrecognized(raw) => {
            tracing::error!(format = %raw, "negotiated hover format has no renderer");
            "barls - HoverContentFormat: unsupported".to_string()
        }
    }
}

fn hover(session: &mut Session, ctx: &mut Context<'_>, params: Option<Value>) {
    if session.is_closed() {
        session.note_traffic_after_close(methods::TEXT_DOCUMENT_HOVER);
        return;
    }
    if session.state() != SessionState::Active {
        tracing::warn!(state = ?session.state(), "dropping hover outside active session");
        return;
    }

    let Some(params) = params else {
        tracing::warn!("hover notification without params");
        return;
    };
    let position: TextDocumentPositionParams = match serde_json::from_value(params) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable hover params");
            return;
        }
    };

    // finish_negotiation ran before the session could become Active.
    let Some(format) = session.hover_format().cloned() else {
        tracing::error!("active session without a negotiated hover format");
        return;
    };
    debug_assert!(
        !matches!(format, MarkupKind::Unrecognized(_)),
        "unknown hover content format: {}",
        format.as_str()
    );

    let message = compose_hover_message(&format, &position);
    let params = ShowMessageParams {
        message_type: MessageType::Info,
        message,
    };
    match serde_json::to_value(&params) {
        Ok(value) => ctx.notify(methods::WINDOW_SHOW_MESSAGE, Some(value)),
        Err(e) => tracing::error!(error = %e, "serializing showMessage params"),
    }
}

fn shutdown(
    session: &mut Session,
    _ctx: &mut Context<'_>,
    _params: Option<Value>,
) -> Result<Value, ResponseError> {
    if session.is_closed() {
        session.note_traffic_after_close(methods::SHUTDOWN);
        return Err(ResponseError::invalid_request("session closed"));
    }
    if session.state() != SessionState::Active {
        tracing::warn!(state = ?session.state(), "rejecting shutdown outside active session");
        return Err(ResponseError::invalid_request(
            "shutdown is only valid in an active session",
        ));
    }

    // Resources are not released yet; that happens on exit.
    session.set_state(SessionState::ShuttingDown);
    Ok(Value::Null)
}

fn exit(session: &mut Session, ctx: &mut Context<'_>, _params: Option<Value>) {
    if session.is_closed() {
        session.note_traffic_after_close(methods::EXIT);
        return;
    }

    let reason = if session.state() == SessionState::ShuttingDown {
        tracing::info!("exit after shutdown, closing session");
        EndReason::Clean
    } else {
        // Tolerated per protocol leniency, but worth distinguishing.
        tracing::warn!(state = ?session.state(), "exit without prior shutdown");
        EndReason::NoShutdown
    };
    session.end(reason);
    ctx.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionEvent;
    use barls_rpc::RpcChannel;
    use barls_rpc::codec::{FrameDecoder, FrameEncoder};
    use tokio::io::{DuplexStream, duplex};
    use tokio::sync::mpsc;

    #[test]
    fn negotiation_single_format_wins() {
        assert_eq!(
            negotiate_hover_format(&[MarkupKind::Markdown]),
            MarkupKind::Markdown
        );
    }

    #[test]
    fn negotiation_empty_list_falls_back_to_plaintext() {
        assert_eq!(negotiate_hover_format(&[]), MarkupKind::PlainText);
    }

    #[test]
    fn negotiation_multiple_formats_uses_the_first() {
        assert_eq!(
            negotiate_hover_format(&[MarkupKind::Markdown, MarkupKind::PlainText]),
            MarkupKind::Markdown
        );
    }

    #[test]
    fn plaintext_message_carries_all_fields() {
        let position = TextDocumentPositionParams::new("file:///test.bar", 3, 7);
        let msg = compose_hover_message(&MarkupKind::PlainText, &position);
        assert!(msg.contains("file:///test.bar"), "{msg}");
        assert!(msg.contains("Line: 3"), "{msg}");
        assert!(msg.contains("Character: 7"), "{msg}");
        assert!(msg.contains("plaintext"), "{msg}");
    }

    #[test]
    fn markdown_message_uses_emphasis_markers() {
        let position = TextDocumentPositionParams::new("file:///test.bar", 3, 7);
        let msg = compose_hover_message(&MarkupKind::Markdown, &position);
        assert!(msg.contains("**File:** file:///test.bar"), "{msg}");
        assert!(msg.contains("_Line:_ 3"), "{msg}");
        assert!(msg.contains("_Character:_ 7"), "{msg}");
        assert!(msg.contains("markdown"), "{msg}");
    }

    #[test]
    fn unrecognized_format_degrades_to_generic_message() {
        let position = TextDocumentPositionParams::new("file:///test.bar", 3, 7);
        let msg = compose_hover_message(
            &MarkupKind::Unrecognized("html".to_string()),
            &position,
        );
        assert_eq!(msg, "barls - HoverContentFormat: unsupported");
    }

    #[test]
    fn non_uri_document_identifier_is_rendered_verbatim() {
        let position = TextDocumentPositionParams::new("not a uri", 0, 0);
        let msg = compose_hover_message(&MarkupKind::PlainText, &position);
        assert!(msg.contains("not a uri"), "{msg}");
    }

    // Handler-level tests driving the Session through a real channel.

    struct Peer {
        enc: FrameEncoder<tokio::io::WriteHalf<DuplexStream>>,
        dec: FrameDecoder<tokio::io::ReadHalf<DuplexStream>>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        serve: tokio::task::JoinHandle<Result<Session, barls_rpc::RpcError>>,
    }

    fn serve_session() -> Peer {
        let (ours, theirs) = duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);

        let (events_tx, events) = mpsc::unbounded_channel();
        let serve = tokio::spawn(async move {
            let mut session = Session::new(events_tx);
            let channel = RpcChannel::new(our_read, our_write);
            channel.run(&mut session, &router()).await.map(|()| session)
        });

        Peer {
            enc: FrameEncoder::new(their_write),
            dec: FrameDecoder::new(their_read),
            events,
            serve,
        }
    }

    fn initialize_frame(id: u64, formats: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "capabilities": {
                    "textDocument": { "hover": { "contentFormat": formats } }
                }
            }
        })
    }

    fn hover_frame(uri: &str, line: u32, character: u32) -> serde_json::Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/hover",
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }
        })
    }

    #[tokio::test]
    async fn initialize_declares_hover_provider_and_fixes_format() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["plaintext"])))
            .await
            .unwrap();

        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["capabilities"]["hoverProvider"], true);
        assert_eq!(
            peer.events.recv().await.unwrap(),
            SessionEvent::Initialized {
                hover_format: MarkupKind::PlainText
            }
        );
    }

    #[tokio::test]
    async fn second_initialize_is_rejected() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["plaintext"])))
            .await
            .unwrap();
        peer.dec.decode().await.unwrap().unwrap();

        peer.enc
            .encode(&initialize_frame(2, serde_json::json!(["markdown"])))
            .await
            .unwrap();
        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(reply["id"], 2);
        assert_eq!(
            reply["error"]["code"],
            barls_protocol::jsonrpc::INVALID_REQUEST
        );
    }

    #[tokio::test]
    async fn hover_produces_exactly_one_show_message() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["plaintext"])))
            .await
            .unwrap();
        peer.dec.decode().await.unwrap().unwrap();

        peer.enc
            .encode(&hover_frame("file:///test.bar", 3, 7))
            .await
            .unwrap();

        let msg = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(msg["method"], "window/showMessage");
        assert_eq!(msg["params"]["type"], 3);
        let text = msg["params"]["message"].as_str().unwrap();
        assert!(text.contains("file:///test.bar"), "{text}");
        assert!(text.contains('3'), "{text}");
        assert!(text.contains('7'), "{text}");
        assert!(text.contains("plaintext"), "{text}");

        // Nothing else outbound: next frame is the shutdown reply.
        peer.enc
            .encode(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "shutdown"}))
            .await
            .unwrap();
        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(reply["id"], 2);
    }

    #[tokio::test]
    async fn empty_content_format_falls_back_to_plaintext_hover() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!([])))
            .await
            .unwrap();
        peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(
            peer.events.recv().await.unwrap(),
            SessionEvent::Initialized {
                hover_format: MarkupKind::PlainText
            }
        );

        peer.enc
            .encode(&hover_frame("file:///fallback.bar", 1, 2))
            .await
            .unwrap();
        let msg = peer.dec.decode().await.unwrap().unwrap();
        let text = msg["params"]["message"].as_str().unwrap();
        assert!(text.contains("plaintext"), "{text}");
    }

    #[tokio::test]
    async fn markdown_negotiation_renders_markdown_hover() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["markdown"])))
            .await
            .unwrap();
        peer.dec.decode().await.unwrap().unwrap();

        peer.enc
            .encode(&hover_frame("file:///test.bar", 3, 7))
            .await
            .unwrap();
        let msg = peer.dec.decode().await.unwrap().unwrap();
        let text = msg["params"]["message"].as_str().unwrap();
        assert!(text.contains("**File:**"), "{text}");
    }

    #[tokio::test]
    async fn hover_before_initialize_is_dropped() {
        let mut peer = serve_session();

        peer.enc
            .encode(&hover_frame("file:///early.bar", 0, 0))
            .await
            .unwrap();

        // No showMessage: the next outbound frame answers initialize.
        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["plaintext"])))
            .await
            .unwrap();
        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(reply["id"], 1);
        assert!(reply["result"]["capabilities"]["hoverProvider"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn shutdown_then_exit_closes_cleanly() {
        let mut peer = serve_session();

        peer.enc
            .encode(&initialize_frame(1, serde_json::json!(["plaintext"])))
            .await
            .unwrap();
        peer.dec.decode().await.unwrap().unwrap();
        assert!(matches!(
            peer.events.recv().await.unwrap(),
            SessionEvent::Initialized { .. }
        ));

        peer.enc
            .encode(&serde_json::json!({"jsonrpc": "2.0", "id": 2, "method": "shutdown"}))
            .await
            .unwrap();
        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(reply["id"], 2);
        assert!(reply["result"].is_null());
        assert!(reply.get("error").is_none());

        peer.enc
            .encode(&serde_json::json!({"jsonrpc": "2.0", "method": "exit"}))
            .await
            .unwrap();

        let session = peer.serve.await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            peer.events.recv().await.unwrap(),
            SessionEvent::Ended {
                reason: EndReason::Clean
            }
        );
        assert!(peer.events.try_recv().is_err(), "Ended fires exactly once");
    }

    #[tokio::test]
    async fn shutdown_before_initialize_is_rejected() {
        let mut peer = serve_session();

        peer.enc
            .encode(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "shutdown"}))
            .await
            .unwrap();
        let reply = peer.dec.decode().await.unwrap().unwrap();
        assert_eq!(
            reply["error"]["code"],
            barls_protocol::jsonrpc::INVALID_REQUEST
        );
    }

    #[tokio::test]
    async fn exit_without_shutdown_closes_abnormally() {
        let mut peer = serve_session();

        peer.enc
            .encode(&serde_json::json!({"jsonrpc": "2.0", "method": "exit"}))
            .await
            .unwrap();

        let session = peer.serve.await.unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            peer.events.recv().await.unwrap(),
            SessionEvent::Ended {
                reason: EndReason::NoShutdown
            }
        );
    }

    #[tokio::test]
    async fn closed_session_ignores_direct_traffic() {
        // Drive handlers directly to exercise the post-Closed branches the
        // serve loop normally never reaches.
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut session = Session::new(events_tx);
        session.end(EndReason::NoShutdown);
        events.try_recv().unwrap();

        let (ours, _theirs) = duplex(1024);
        let (r, w) = tokio::io::split(ours);
        let channel = RpcChannel::new(r, w);
        let sender = channel.sender();
        let mut ctx = Context::new(&sender);

        let err = initialize(&mut session, &mut ctx, None).unwrap_err();
        assert_eq!(err.code, barls_protocol::jsonrpc::INVALID_REQUEST);

        hover(
            &mut session,
            &mut ctx,
            Some(
                serde_json::to_value(TextDocumentPositionParams::new("file:///x.bar", 0, 0))
                    .unwrap(),
            ),
        );
        exit(&mut session, &mut ctx, None);

        // Still closed, no second Ended event.
        assert!(session.is_closed());
        assert!(events.try_recv().is_err());
    }
}
