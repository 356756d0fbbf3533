//! End-to-end session over in-memory streams: a real `LanguageClient` wired
//! to a real server session, no child process or sockets involved.

use tokio::sync::mpsc;

use barls_client::{ClientError, ClientEvent, LanguageClient};
use barls_protocol::{MarkupKind, MessageType};
use barls_rpc::{RpcChannel, RpcError};
use barls_server::{EndReason, Session, SessionEvent, SessionState};

type ServerHandle = tokio::task::JoinHandle<Result<Session, RpcError>>;

fn wire_session() -> (
    LanguageClient,
    mpsc::UnboundedReceiver<SessionEvent>,
    ServerHandle,
) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_end);
    let (server_read, server_write) = tokio::io::split(server_end);

    let (events_tx, server_events) = mpsc::unbounded_channel();
    let server = tokio::spawn(async move {
        let mut session = Session::new(events_tx);
        RpcChannel::new(server_read, server_write)
            .run(&mut session, &barls_server::router())
            .await
            .map(|()| session)
    });

    let client = LanguageClient::attach(client_read, client_write, None);
    (client, server_events, server)
}

#[tokio::test]
async fn full_session_initialize_hover_shutdown_exit() {
    let (mut client, mut server_events, server) = wire_session();

    let result = client.initialize(vec![MarkupKind::PlainText]).await.unwrap();
    assert!(result.capabilities.hover_provider);
    assert_eq!(
        server_events.recv().await.unwrap(),
        SessionEvent::Initialized {
            hover_format: MarkupKind::PlainText
        }
    );

    client.hover("file:///test.bar", 3, 7).unwrap();
    match client.next_event().await.unwrap() {
        ClientEvent::MessageShown(msg) => {
            assert_eq!(msg.message_type, MessageType::Info);
            assert!(msg.message.contains("file:///test.bar"), "{}", msg.message);
            assert!(msg.message.contains('3'), "{}", msg.message);
            assert!(msg.message.contains('7'), "{}", msg.message);
            assert!(msg.message.contains("plaintext"), "{}", msg.message);
        }
        other => panic!("expected MessageShown, got {other:?}"),
    }

    client.shutdown().await.unwrap();
    client.exit().unwrap();

    let session = server.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        server_events.recv().await.unwrap(),
        SessionEvent::Ended {
            reason: EndReason::Clean
        }
    );
    assert!(
        server_events.try_recv().is_err(),
        "session-ended signal must fire exactly once"
    );

    assert_eq!(
        client.next_event().await.unwrap(),
        ClientEvent::SessionEnded { error: None }
    );
}

#[tokio::test]
async fn repeated_initialize_surfaces_peer_error() {
    let (mut client, mut server_events, _server) = wire_session();

    client.initialize(vec![MarkupKind::PlainText]).await.unwrap();
    server_events.recv().await.unwrap();

    let err = client
        .initialize(vec![MarkupKind::Markdown])
        .await
        .unwrap_err();
    match err {
        ClientError::Rpc(RpcError::Peer(e)) => {
            assert!(e.message.contains("already"), "{}", e.message);
        }
        other => panic!("expected peer error, got {other}"),
    }

    // The negotiated format is unchanged: hover still renders plaintext.
    client.hover("file:///still.bar", 1, 2).unwrap();
    match client.next_event().await.unwrap() {
        ClientEvent::MessageShown(msg) => {
            assert!(msg.message.contains("plaintext"), "{}", msg.message);
        }
        other => panic!("expected MessageShown, got {other:?}"),
    }
}

#[tokio::test]
async fn exit_without_shutdown_is_abnormal_but_accepted() {
    let (mut client, mut server_events, server) = wire_session();

    client.initialize(vec![MarkupKind::PlainText]).await.unwrap();
    server_events.recv().await.unwrap();

    client.exit().unwrap();

    let session = server.await.unwrap().unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(
        server_events.recv().await.unwrap(),
        SessionEvent::Ended {
            reason: EndReason::NoShutdown
        }
    );
    assert_eq!(
        client.next_event().await.unwrap(),
        ClientEvent::SessionEnded { error: None }
    );
}
