//! Integration tests for the framed TCP transport.
//!
//! These spin up a real listener on an OS-assigned loopback port and
//! dial it with a second connection, so bytes actually cross a socket.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wvs_transport::{Connection, TcpConnection, TcpTransport, Transport, TransportError, MAX_FRAME_LEN};

async fn pair() -> (TcpConnection, TcpConnection) {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.expect("should bind");
    let addr = transport.local_addr().expect("bound address");

    let server = tokio::spawn(async move { transport.accept().await.expect("should accept") });
    let client = TcpConnection::connect(addr).await.expect("should connect");
    let server = server.await.expect("accept task");
    (server, client)
}

// =========================================================================
// Frames
// =========================================================================

#[tokio::test]
async fn test_frames_cross_the_socket_in_both_directions() {
    let (server, client) = pair().await;
    assert_ne!(server.id(), client.id());

    server.send(b"hello worker").await.unwrap();
    client.send(b"hello center").await.unwrap();

    assert_eq!(client.recv().await.unwrap().unwrap(), b"hello worker");
    assert_eq!(server.recv().await.unwrap().unwrap(), b"hello center");
}

#[tokio::test]
async fn test_back_to_back_frames_keep_their_boundaries() {
    let (server, client) = pair().await;

    server.send(&[1]).await.unwrap();
    server.send(&[]).await.unwrap();
    server.send(&[2, 3]).await.unwrap();

    assert_eq!(client.recv().await.unwrap().unwrap(), vec![1]);
    assert_eq!(client.recv().await.unwrap().unwrap(), Vec::<u8>::new());
    assert_eq!(client.recv().await.unwrap().unwrap(), vec![2, 3]);
}

#[tokio::test]
async fn test_recv_returns_none_after_peer_close() {
    let (server, client) = pair().await;

    client.close().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server.recv())
        .await
        .expect("recv should finish")
        .expect("clean close is not an error");
    assert!(result.is_none());
}

// =========================================================================
// Limits
// =========================================================================

#[tokio::test]
async fn test_oversized_header_is_rejected() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let server = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes())
        .await
        .unwrap();
    let server = server.await.unwrap();

    let err = server.recv().await.unwrap_err();
    assert!(matches!(err, TransportError::FrameTooLarge { .. }));
}

#[tokio::test]
async fn test_send_writes_little_endian_length_prefix() {
    let mut transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let server = tokio::spawn(async move { transport.accept().await.unwrap() });

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let server = server.await.unwrap();
    server.send(&[0xAA, 0xBB, 0xCC]).await.unwrap();

    let mut buf = [0u8; 7];
    raw.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, [3, 0, 0, 0, 0xAA, 0xBB, 0xCC]);
}
