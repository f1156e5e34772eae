//! Handshake and framing over a real loopback socket.

use std::time::Duration;

use serde_json::json;
use svbridge_ipc::{
    AuthKey, ChannelError, Envelope, Payload, accept_authenticated, bind_loopback,
    connect_authenticated, encode_frame,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(5);

fn payload_of(n: usize) -> Payload {
    let mut payload = Payload::new();
    payload.insert("data".into(), json!("a".repeat(n)));
    payload
}

#[tokio::test]
async fn authenticated_round_trip_of_every_size() {
    let listener = bind_loopback().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let key = AuthKey::generate().unwrap();

    let server = tokio::spawn(async move {
        let (tx, mut rx) = accept_authenticated(&listener, &key).await.unwrap();
        // Echo until the client hangs up.
        while let Ok(envelope) = rx.recv().await {
            tx.send(&envelope).await.unwrap();
        }
    });

    let (tx, mut rx) = connect_authenticated(addr, &key).await.unwrap();
    // Zero, small, and large enough to span many socket reads.
    for n in [0, 1, 4096, 1_000_000] {
        let sent = Envelope::event("audio", payload_of(n));
        tx.send(&sent).await.unwrap();
        let echoed = timeout(LIMIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(echoed, sent);
    }

    tx.close().await;
    timeout(LIMIT, server).await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_key_closes_before_any_command() {
    let listener = bind_loopback().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let key = AuthKey::generate().unwrap();

    let server = tokio::spawn(async move { accept_authenticated(&listener, &key).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(AuthKey::generate().unwrap().as_bytes()).await.unwrap();
    let frame = encode_frame(&Envelope::command(1, "initialize", Payload::new())).unwrap();
    // The server may already have closed; a failed write is fine.
    let _ = stream.write_all(&frame).await;

    let result = timeout(LIMIT, server).await.unwrap().unwrap();
    assert!(matches!(result, Err(ChannelError::HandshakeRejected)));

    // Nothing is ever sent back; the socket just closes.
    let mut buf = [0u8; 1];
    let read = timeout(LIMIT, stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn short_key_is_rejected() {
    let listener = bind_loopback().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let key = AuthKey::generate().unwrap();

    let server = tokio::spawn(async move { accept_authenticated(&listener, &key).await });

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[1, 2, 3, 4]).await.unwrap();
    drop(stream);

    let result = timeout(LIMIT, server).await.unwrap().unwrap();
    assert!(matches!(result, Err(ChannelError::HandshakeRejected)));
}

#[tokio::test]
async fn concurrent_senders_never_interleave() {
    let listener = bind_loopback().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let key = AuthKey::generate().unwrap();

    let server = tokio::spawn(async move {
        let (_tx, mut rx) = accept_authenticated(&listener, &key).await.unwrap();
        let mut seen = Vec::new();
        for _ in 0..40 {
            seen.push(rx.recv().await.unwrap());
        }
        seen
    });

    let (tx, _rx) = connect_authenticated(addr, &key).await.unwrap();
    let mut writers = Vec::new();
    for w in 0..4u64 {
        let tx = tx.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..10u64 {
                let mut payload = payload_of(20_000);
                payload.insert("writer".into(), json!(w));
                tx.send(&Envelope::command(w * 100 + i, "speak", payload))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let seen = timeout(LIMIT, server).await.unwrap().unwrap();
    assert_eq!(seen.len(), 40);
    assert!(seen.iter().all(|e| matches!(e, Envelope::Command { .. })));
}
