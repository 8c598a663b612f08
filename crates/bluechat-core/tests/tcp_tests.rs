//! TCP transport tests on the loopback interface

mod test_utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bluechat_core::*;
use test_utils::STEP;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

fn loopback() -> Arc<TcpTransport> {
    Arc::new(TcpTransport::new("127.0.0.1:0"))
}

async fn next_event(events: &mut EventReceiver) -> ChatEvent {
    timeout(STEP, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

#[tokio::test]
async fn test_tcp_accept_and_exchange() {
    let transport = loopback();
    let acceptor = transport.listen(ServiceId::SERIAL_PORT).await.unwrap();
    let endpoint = acceptor.local_endpoint();
    assert!(endpoint.starts_with("127.0.0.1:"));
    assert!(!endpoint.ends_with(":0"));

    let pending = {
        let acceptor = acceptor.clone();
        tokio::spawn(async move { acceptor.accept().await })
    };
    let near = transport
        .connect(&PeerHandle::anonymous(&endpoint), ServiceId::SERIAL_PORT)
        .await
        .unwrap();
    let far = timeout(STEP, pending).await.unwrap().unwrap().unwrap();

    near.write(b"ping").await.unwrap();
    let mut buf = [0u8; 16];
    let n = far.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"ping");

    far.close().await;
    assert_eq!(near.read(&mut buf).await, Err(ChatError::Disconnected));
    acceptor.close();
}

#[tokio::test]
async fn test_tcp_close_unblocks_accept() {
    let transport = loopback();
    let acceptor = transport.listen(ServiceId::SERIAL_PORT).await.unwrap();

    let pending = {
        let acceptor = acceptor.clone();
        tokio::spawn(async move { acceptor.accept().await.err() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    acceptor.close();
    acceptor.close();

    let result = timeout(STEP, pending).await.expect("accept must unblock").unwrap();
    assert_eq!(result, Some(ChatError::Cancelled));
    assert!(acceptor.is_closed());
}

#[tokio::test]
async fn test_tcp_connect_refused() {
    let transport = loopback();
    let acceptor = transport.listen(ServiceId::SERIAL_PORT).await.unwrap();
    let endpoint = acceptor.local_endpoint();
    acceptor.close();
    drop(acceptor);

    // The socket is released once the accept task observes the close.
    let result = timeout(STEP, async {
        loop {
            match transport
                .connect(&PeerHandle::anonymous(&endpoint), ServiceId::SERIAL_PORT)
                .await
            {
                Ok(socket) => {
                    socket.close().await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Err(e) => break e,
            }
        }
    })
    .await
    .expect("listener socket must be released after close");
    assert!(matches!(result, ChatError::ConnectFailed { .. }));
}

#[tokio::test]
async fn test_tcp_silent_client_does_not_block_others() {
    let server = ConnectionManager::new(loopback(), ChatConfig::default()).unwrap();
    let mut server_events = server.take_event_receiver().unwrap();
    server.start_listening().await.unwrap();
    let endpoint = server.listening_endpoint().await.expect("bound endpoint");

    // Connects but never sends its preamble.
    let _silent = TcpStream::connect(&endpoint).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let client = ConnectionManager::new(loopback(), ChatConfig::default()).unwrap();
    let started = Instant::now();
    client
        .connect_to(PeerHandle::new(&endpoint, "Server"))
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut server_events).await,
        ChatEvent::Connected {
            origin: SessionOrigin::Inbound,
            ..
        }
    ));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "valid client waited {:?} behind a silent one",
        started.elapsed()
    );

    client.shutdown().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_tcp_service_mismatch_is_rejected_and_listener_continues() {
    let server = ConnectionManager::new(loopback(), ChatConfig::default()).unwrap();
    let mut server_events = server.take_event_receiver().unwrap();
    server.start_listening().await.unwrap();
    let endpoint = server.listening_endpoint().await.expect("bound endpoint");

    // A client speaking for another service is dropped without a session.
    let other = Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
    let mut stray = TcpStream::connect(&endpoint).await.unwrap();
    stray.write_all(other.as_bytes()).await.unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(STEP, stray.read(&mut buf))
        .await
        .expect("mismatching client should be dropped")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(server.state(), ConnectionState::Listening);

    // The listener keeps accepting matching clients.
    let client = ConnectionManager::new(loopback(), ChatConfig::default()).unwrap();
    let mut client_events = client.take_event_receiver().unwrap();
    client
        .connect_to(PeerHandle::new(&endpoint, "Server"))
        .await
        .unwrap();

    assert!(matches!(
        next_event(&mut client_events).await,
        ChatEvent::Connected { .. }
    ));
    assert!(matches!(
        next_event(&mut server_events).await,
        ChatEvent::Connected {
            origin: SessionOrigin::Inbound,
            ..
        }
    ));

    client.send(b"over tcp").await.unwrap();
    match next_event(&mut server_events).await {
        ChatEvent::MessageReceived { message, .. } => {
            assert_eq!(message.text(), "over tcp");
            assert_eq!(message.order, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }

    client.shutdown().await;
    match next_event(&mut server_events).await {
        ChatEvent::SessionEnded { reason, .. } => assert_eq!(reason, EndReason::PeerClosed),
        other => panic!("unexpected event {:?}", other),
    }
    server.shutdown().await;
}

#[tokio::test]
async fn test_tcp_bind_failure_is_unavailable() {
    let first = TcpTransport::new("127.0.0.1:0");
    let acceptor = first.listen(ServiceId::SERIAL_PORT).await.unwrap();

    let second = TcpTransport::new(acceptor.local_endpoint());
    let result = second.listen(ServiceId::SERIAL_PORT).await;
    assert!(matches!(result, Err(ChatError::TransportUnavailable { .. })));
    acceptor.close();
}
