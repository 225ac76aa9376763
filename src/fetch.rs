// Copyright (c) 2026 The Collector Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]

//! Bounded HTTP fetcher (component E, §4.E): a single-shot GET with a
//! hard read timeout and no retries of its own — retry policy belongs to
//! the caller (the sync engine, component F).
//!
//! Client construction follows the teacher's `GutsClient`
//! (`AbdelStark-guts/crates/guts-migrate/src/client.rs`): one
//! long-lived `reqwest::Client` built once with a fixed timeout.

use std::io::Read as _;
use std::time::Duration;

use thiserror::Error;

/// Fetcher errors (§7).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request failed at the transport level (DNS, connect, TLS, or
    /// the read timeout elapsed).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server responded with a status other than 200 or 404.
    #[error("unexpected status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    /// The response body claimed to be deflate-compressed but failed to
    /// inflate.
    #[error("failed to inflate response body: {0}")]
    Inflate(#[from] std::io::Error),
}

/// Outcome of a single fetch attempt.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// `200 OK`; the (already-decompressed, if applicable) body.
    Body(Vec<u8>),
    /// `404 Not Found` — the resource doesn't exist at the peer. Not an
    /// error: callers use this to skip a descriptor type a peer doesn't
    /// serve.
    NotFound,
}

/// A bounded HTTP client used by the sync engine to mirror peer
/// `index.json` files and the descriptors they list.
pub struct Fetcher {
    client: reqwest::Client,
}

/// Hard ceiling on how long a single read may take (§4.E).
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

impl Fetcher {
    /// Build a fetcher with the fixed read timeout. Fails only if the
    /// platform's TLS backend can't be initialized.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// GET `url`. A `deflate`-encoded body (per the `Content-Encoding`
    /// response header) is transparently inflated; any other encoding is
    /// returned as-is (the caller is expected to know the wire format it
    /// asked for).
    pub async fn get(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        let response = self.client.get(url).send().await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let is_deflate = response
                    .headers()
                    .get(reqwest::header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.eq_ignore_ascii_case("deflate"))
                    .unwrap_or(false);
                let bytes = response.bytes().await?.to_vec();
                if is_deflate {
                    Ok(FetchOutcome::Body(inflate(&bytes)?))
                } else {
                    Ok(FetchOutcome::Body(bytes))
                }
            }
            reqwest::StatusCode::NOT_FOUND => Ok(FetchOutcome::NotFound),
            other => Err(FetchError::UnexpectedStatus(other)),
        }
    }
}

fn inflate(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = flate2::read::DeflateDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_200_body_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let outcome = fetcher
            .get(&format!("{}/index.json", server.uri()))
            .await
            .unwrap();
        match outcome {
            FetchOutcome::Body(b) => assert_eq!(b, b"hello"),
            FetchOutcome::NotFound => panic!("expected a body"),
        }
    }

    #[tokio::test]
    async fn maps_404_to_not_found_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let outcome = fetcher.get(&format!("{}/missing", server.uri())).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NotFound));
    }

    #[tokio::test]
    async fn maps_server_error_to_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new().unwrap();
        let err = fetcher.get(&format!("{}/broken", server.uri())).await.unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStatus(_)));
    }
}
