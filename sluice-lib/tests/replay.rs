//! A request whose connection is closed by the server half-way is replayed
//! once on a fresh connection, and the shared connection gets replaced.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use sluice_lib::{DispatcherBuilder, ErrorKind, Request, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Minimal HTTP/1.1 server. The first `drops` requests to `/flaky` are
/// answered by closing the connection; later ones get a `200`. Everything
/// else, including the connection probe, gets a `404`.
async fn flaky_server(drops: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, Arc::clone(&counter), drops));
        }
    });

    (format!("http://{address}"), seen)
}

async fn serve(mut stream: TcpStream, counter: Arc<AtomicUsize>, drops: usize) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let end = loop {
            if let Some(position) = buffer.windows(HEAD_END.len()).position(|w| w == HEAD_END) {
                break position + HEAD_END.len();
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
            }
        };
        let head: Vec<u8> = buffer.drain(..end).collect();

        let reply: &[u8] = if head.starts_with(b"GET /flaky ") {
            if counter.fetch_add(1, Ordering::SeqCst) < drops {
                // Hang up without answering
                return;
            }
            b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 11\r\n\r\n{\"ok\":true}"
        } else {
            b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n"
        };

        if stream.write_all(reply).await.is_err() {
            return;
        }
    }
}

async fn dispatcher(base_url: String) -> sluice_lib::Dispatcher {
    DispatcherBuilder::builder()
        .token(SecretString::from("test-token".to_string()))
        .base_url(base_url)
        .sweep_interval(Duration::ZERO)
        .build()
        .dispatcher()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_closed_stream_is_replayed() {
    let (base_url, seen) = flaky_server(1).await;
    let dispatcher = dispatcher(base_url).await;
    assert_eq!(dispatcher.connections().generation(), 1);

    let response = dispatcher.submit(Request::get("/flaky")).await.unwrap();
    assert_eq!(response, Response::Body(r#"{"ok":true}"#.into()));
    assert_eq!(seen.load(Ordering::SeqCst), 2);

    // The shared connection is replaced in the background
    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.connections().generation() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // Later requests go through the new connection
    let response = dispatcher.submit(Request::get("/flaky")).await.unwrap();
    assert!(!response.is_empty());
}

#[tokio::test]
async fn test_failed_replay_is_reported() {
    let (base_url, seen) = flaky_server(2).await;
    let dispatcher = dispatcher(base_url).await;

    let error = dispatcher.submit(Request::get("/flaky")).await.unwrap_err();
    assert!(matches!(error, ErrorKind::Network(_)));
    assert!(error.is_transport());
    // Exactly one replay
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_api_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let result = DispatcherBuilder::builder()
        .token(SecretString::from("test-token".to_string()))
        .base_url(format!("http://{address}"))
        .reconnect(sluice_lib::ReconnectPolicy {
            max_attempts: Some(1),
            ..Default::default()
        })
        .build()
        .dispatcher()
        .await;
    assert!(matches!(result, Err(ErrorKind::ConnectionDown(_))));
}
