// tests/upstream_redaction.rs
//
// Provider keys ride in the query string; failures built from real HTTP
// exchanges must never carry them into causes (which end up in logs).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use movie_aggregator::config::UpstreamSettings;
use movie_aggregator::retry::{FailureKind, RetryExecutor, RetryPolicy};
use movie_aggregator::search::SearchQuery;
use movie_aggregator::upstream::{http::build_client, omdb::OmdbClient, MovieSearchSource};

const KEY: &str = "SECRETKEY123";

/// Answers every connection with a bare 500.
async fn failing_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                    )
                    .await;
                let _ = sock.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn client(base_url: &str) -> OmdbClient {
    let settings = UpstreamSettings {
        connect_timeout_ms: 1_000,
        response_timeout_ms: 2_000,
        ..UpstreamSettings::default()
    };
    OmdbClient::new(build_client(&settings).unwrap(), base_url, KEY)
}

#[tokio::test]
async fn status_failure_cause_omits_api_key() {
    let base = failing_server().await;
    let omdb = client(&base);
    let exec = RetryExecutor::new(RetryPolicy::new(2, Duration::ZERO).unwrap());
    let query = SearchQuery::parse("matrix", None, None);

    let err = exec
        .execute(|| omdb.search_page(&query, 1))
        .await
        .unwrap_err();

    assert_eq!(err.status, Some(500));
    assert_eq!(err.attempts, 1);
    assert!(err.cause.contains("500"), "cause: {}", err.cause);
    assert!(!err.cause.contains(KEY), "cause leaked key: {}", err.cause);
    assert!(!err.to_string().contains(KEY));
}

#[tokio::test]
async fn transport_failure_cause_omits_api_key() {
    // Bind then drop so the port refuses connections.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let omdb = client(&format!("http://{addr}"));
    let exec = RetryExecutor::new(RetryPolicy::new(1, Duration::ZERO).unwrap());
    let query = SearchQuery::parse("matrix", None, None);

    let err = exec
        .execute(|| omdb.search_page(&query, 1))
        .await
        .unwrap_err();

    assert_eq!(err.status, None);
    assert_ne!(err.kind, FailureKind::ClientError);
    assert!(!err.cause.contains(KEY), "cause leaked key: {}", err.cause);
    assert!(!err.to_string().contains(KEY));
}
