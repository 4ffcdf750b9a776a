//! Serve mode over a real socket

mod common;

use common::{header, output, Action, FakeInterpreter};
use ember_config::Config;
use ember_runtime::{Bridge, BridgeWorker, MemoryEnvironment, RuntimeState, Server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

fn cookie_script() -> Vec<Action> {
    vec![
        header("HTTP/1.1 202 Accepted"),
        header("Set-Cookie: sid=abc; Path=/"),
        header("X-Engine: fake"),
        output("sid="),
        Action::EchoSymbol("_COOKIE", "sid"),
    ]
}

async fn start(config: Config) -> (Arc<Server>, BridgeWorker, SocketAddr, JoinHandle<ember_core::Result<()>>) {
    let bridge = Bridge::with_environment(
        FakeInterpreter::new(cookie_script()),
        MemoryEnvironment::new(),
        &Config::default(),
    );
    let worker = BridgeWorker::spawn(bridge, 4).unwrap();

    let server = Arc::new(
        Server::builder()
            .config(config)
            .bridge(worker.handle())
            .build()
            .unwrap(),
    );
    assert_eq!(server.state().await, RuntimeState::Initializing);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };
    (server, worker, addr, serving)
}

const PAGE_REQUEST: &str = "GET /page?x=1 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serve_forwards_response() {
    let mut config = Config::default();
    config.serve.shutdown_timeout = Duration::from_secs(1);
    let (server, worker, addr, serving) = start(config).await;

    let first = send(addr, PAGE_REQUEST).await;
    assert!(first.starts_with("HTTP/1.1 202 Accepted\r\n"));
    assert!(first.to_ascii_lowercase().contains("x-engine: fake"));
    assert!(first.to_ascii_lowercase().contains("set-cookie: sid=abc; path=/"));
    assert!(first.ends_with("sid=-"));

    // Another client never sees the first client's cookie
    let second = send(addr, PAGE_REQUEST).await;
    assert!(second.ends_with("sid=-"));
    assert!(server.cookies().is_empty());

    server.shutdown_signal().trigger();
    serving.await.unwrap().unwrap();
    assert_eq!(server.state().await, RuntimeState::Stopped);

    worker.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_cookie_header_is_forwarded() {
    let (server, worker, addr, serving) = start(Config::default()).await;

    let response = send(
        addr,
        "GET / HTTP/1.1\r\nHost: localhost\r\nCookie: sid=mine\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.ends_with("sid=mine"));

    server.shutdown_signal().trigger();
    serving.await.unwrap().unwrap();
    worker.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replay_cookies_when_enabled() {
    let mut config = Config::default();
    config.serve.replay_cookies = true;
    let (server, worker, addr, serving) = start(config).await;

    let first = send(addr, PAGE_REQUEST).await;
    assert!(first.ends_with("sid=-"));
    assert_eq!(server.cookies().get("sid").as_deref(), Some("abc"));

    let second = send(addr, PAGE_REQUEST).await;
    assert!(second.ends_with("sid=abc"));

    server.shutdown_signal().trigger();
    serving.await.unwrap().unwrap();
    worker.join().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_body_is_rejected() {
    let bridge = Bridge::with_environment(
        FakeInterpreter::new(vec![output("never")]),
        MemoryEnvironment::new(),
        &Config::default(),
    );
    let worker = BridgeWorker::spawn(bridge, 4).unwrap();

    let mut config = Config::default();
    config.serve.max_body_size = 8;
    let server = Arc::new(
        Server::builder()
            .config(config)
            .bridge(worker.handle())
            .build()
            .unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(listener).await })
    };

    let response = send(
        addr,
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 20\r\nConnection: close\r\n\r\n01234567890123456789",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    server.shutdown_signal().trigger();
    serving.await.unwrap().unwrap();
    worker.join().await.unwrap();
}
