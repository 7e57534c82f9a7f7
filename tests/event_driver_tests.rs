//! Integration tests for the event-loop driver.
//!
//! These run against a local raw-TCP fixture server so the exact bytes on
//! the wire (keep-alive, content-length framing, chunked bodies, garbage)
//! are under test control.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use gust::bench::Benchmark;
use gust::config::{Config, LoadStrategy};
use gust::request::PreparedRequest;

type Responder = Arc<dyn Fn(&str) -> Vec<u8> + Send + Sync>;

struct Fixture {
    addr: SocketAddr,
    hits: Arc<AtomicU64>,
}

impl Fixture {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Keep-alive HTTP server answering every request head with
/// `respond(path)`. Requests are assumed body-less.
async fn spawn_fixture(respond: Responder) -> Fixture {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU64::new(0));

    let accept_hits = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(serve_conn(stream, respond.clone(), accept_hits.clone()));
        }
    });

    Fixture { addr, hits }
}

async fn serve_conn(mut stream: TcpStream, respond: Responder, hits: Arc<AtomicU64>) {
    let mut buf: Vec<u8> = Vec::new();
    let mut tmp = [0u8; 4096];

    loop {
        let head_end = loop {
            if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            match stream.read(&mut tmp).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        buf.drain(..head_end);

        hits.fetch_add(1, Ordering::SeqCst);
        let response = respond(&path);
        if stream.write_all(&response).await.is_err() {
            return;
        }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn ok_body(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
    .into_bytes()
}

fn status_body(status: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n\r\n{}",
        status,
        body.len(),
        body
    )
    .into_bytes()
}

fn config() -> Config {
    Config {
        connections: 2,
        threads: 1,
        duration: Duration::from_secs(10),
        timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

fn get(url: &str) -> PreparedRequest {
    PreparedRequest::get(url.parse().unwrap())
}

#[tokio::test]
async fn test_unbounded_duration_run() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body("hello"))).await;

    let config = Config {
        duration: Duration::from_secs(1),
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/echo")))
        .run()
        .await
        .unwrap();

    assert!(results.total_requests > 0);
    assert_eq!(results.total_errors, 0);
    assert_eq!(results.status_codes.len(), 1);
    assert_eq!(results.status_codes[&200], results.total_requests);
    assert_eq!(results.total_read_bytes, 5 * results.total_requests);
    assert!(results.duration >= Duration::from_millis(900));
    assert!(results.duration <= Duration::from_secs(3));
    assert!(results.total_write_bytes > 0);
    assert!(!results.rps_samples.is_empty());
}

#[tokio::test]
async fn test_pipelines_many_requests_per_connection() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body("ok"))).await;

    let config = Config {
        connections: 1,
        requests: 50,
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/")))
        .run()
        .await
        .unwrap();

    // Fifty responses over one persistent socket.
    assert_eq!(results.total_requests, 50);
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 50);
    assert_eq!(results.status_codes[&200], 50);
}

#[tokio::test]
async fn test_bounded_request_ceiling_is_exact() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body("hello"))).await;

    let config = Config {
        connections: 4,
        requests: 10,
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/echo")))
        .run()
        .await
        .unwrap();

    assert_eq!(results.total_requests, 10);
    assert_eq!(results.total_errors, 0);
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_single_request_many_connections() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body("hello"))).await;

    let config = Config {
        connections: 10,
        requests: 1,
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/once")))
        .run()
        .await
        .unwrap();

    // Exactly one response is delivered; the other nine sessions observe
    // cancellation before sending.
    assert_eq!(results.total_requests, 1);
    assert_eq!(results.status_codes[&200], 1);
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_404_is_not_an_error() {
    let fixture = spawn_fixture(Arc::new(|_: &str| status_body("404 Not Found", "nope"))).await;

    let config = Config {
        duration: Duration::from_millis(500),
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/missing")))
        .run()
        .await
        .unwrap();

    assert!(results.total_requests > 0);
    assert_eq!(results.total_errors, 0);
    assert_eq!(results.status_codes[&404], results.total_requests);
    assert!(results.min_latency > Duration::ZERO);
}

#[tokio::test]
async fn test_chunked_responses() {
    let chunked = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
    let fixture = spawn_fixture(Arc::new(|_: &str| chunked.to_vec())).await;

    let config = Config {
        connections: 1,
        requests: 5,
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/chunked")))
        .run()
        .await
        .unwrap();

    assert_eq!(results.total_requests, 5);
    assert_eq!(results.total_errors, 0);
    assert_eq!(results.total_read_bytes, 25);
}

#[tokio::test]
async fn test_malformed_response_closes_socket_and_records_error() {
    let fixture = spawn_fixture(Arc::new(|_: &str| b"BOGUS/9 totally not http\r\n\r\n".to_vec())).await;

    let config = Config {
        connections: 1,
        duration: Duration::from_millis(500),
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/garbage")))
        .run()
        .await
        .unwrap();

    // The parse failure is data, not a fatal error; the socket closed and
    // was never redialed.
    assert_eq!(results.total_errors, 1);
    assert!(results.errors[0].contains("parse"));
    assert!(results.status_codes.is_empty());
    assert_eq!(fixture.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_asserts_against_parsed_responses() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body(r#"{"x":7}"#))).await;

    let passing = Config {
        connections: 1,
        requests: 5,
        asserts_text: Some("status == 200\ngjson \"x\" == 7".to_string()),
        ..config()
    };
    let results = Benchmark::new(passing, get(&fixture.url("/json")))
        .run()
        .await
        .unwrap();
    assert_eq!(results.total_requests, 5);
    assert_eq!(results.total_errors, 0);

    let failing = Config {
        connections: 1,
        requests: 5,
        asserts_text: Some("gjson \"x\" == 8".to_string()),
        ..config()
    };
    let results = Benchmark::new(failing, get(&fixture.url("/json")))
        .run()
        .await
        .unwrap();
    assert_eq!(results.total_requests, 5);
    assert_eq!(results.total_errors, 5);
    assert_eq!(results.status_codes[&200], 5);
}

#[tokio::test]
async fn test_round_robin_endpoints_balanced() {
    let fixture = spawn_fixture(Arc::new(|path: &str| match path {
        "/a" => ok_body("aa"),
        _ => ok_body("bb"),
    }))
    .await;

    let url_a = fixture.url("/a");
    let url_b = fixture.url("/b");

    let config = Config {
        connections: 2,
        requests: 40,
        load_strategy: LoadStrategy::RoundRobin,
        ..config()
    };
    let results = Benchmark::with_requests(config, vec![get(&url_a), get(&url_b)])
        .run()
        .await
        .unwrap();

    assert_eq!(results.total_requests, 40);
    let a = &results.endpoints[&url_a];
    let b = &results.endpoints[&url_b];
    assert!(a.requests.abs_diff(b.requests) <= 1);

    for ep in results.endpoints.values() {
        let status_sum: u64 = ep.status_codes.values().sum();
        assert_eq!(ep.requests, status_sum + ep.errors);
    }
}

#[tokio::test]
async fn test_rate_limit_holds_aggregate_rate() {
    let fixture = spawn_fixture(Arc::new(|_: &str| ok_body("ok"))).await;

    let config = Config {
        connections: 4,
        duration: Duration::from_secs(2),
        rate: 20,
        ..config()
    };
    let results = Benchmark::new(config, get(&fixture.url("/")))
        .run()
        .await
        .unwrap();

    // ~20 req/s over ~2s; generous bounds for scheduler noise.
    assert!(
        results.total_requests >= 20 && results.total_requests <= 60,
        "total {}",
        results.total_requests
    );
}

#[tokio::test]
async fn test_zero_reachable_sockets_is_fatal() {
    // Bind a listener and drop it so the port is closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = Config {
        connections: 2,
        timeout: Duration::from_millis(500),
        ..config()
    };
    let err = Benchmark::new(config, get(&format!("http://{}/", addr)))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, gust::errors::EngineError::Connect { .. }));
}
