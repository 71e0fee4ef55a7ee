// src/upstream/http.rs
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::config::UpstreamSettings;
use crate::retry::{CallOutcome, FailureKind, UpstreamFailure};

/// Shared client for all upstream providers. Every request inherits the
/// connect and response timeouts.
pub fn build_client(settings: &UpstreamSettings) -> anyhow::Result<Client> {
    let client = Client::builder()
        .user_agent(concat!("movie-aggregator/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.response_timeout())
        .build()?;
    Ok(client)
}

/// Map a transport error onto the retry taxonomy. The URL is dropped from
/// the message since provider keys travel in the query string.
pub fn classify_error(err: reqwest::Error) -> UpstreamFailure {
    let err = err.without_url();
    if err.is_timeout() {
        return UpstreamFailure::timeout(err.to_string());
    }
    if let Some(status) = err.status() {
        return UpstreamFailure::status(status.as_u16(), err.to_string());
    }
    UpstreamFailure::new(FailureKind::Unknown, err.to_string())
}

/// Send `req` and decode a JSON body. Non-2xx statuses become failures
/// carrying the status code and the request path (never the query).
pub async fn get_json<T: DeserializeOwned>(req: RequestBuilder) -> CallOutcome<T> {
    let resp = req
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(classify_error)?;

    let status = resp.status();
    if !status.is_success() {
        let path = resp.url().path().to_string();
        return Err(UpstreamFailure::status(
            status.as_u16(),
            format!("{path} returned {status}"),
        ));
    }

    // Body timeouts still count as timeouts; anything else here is a decode problem.
    let bytes = resp.bytes().await.map_err(classify_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| UpstreamFailure::new(FailureKind::Unknown, format!("decoding body: {e}")))
}
