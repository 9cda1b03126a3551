//! HTTP delivery worker.
//!
//! Consumes sealed batches and issues exactly one POST per batch. Delivery is
//! at-least-once-attempted, never retried: a network error or an HTTP status
//! of 400 or above is logged and the batch discarded. That is a documented
//! property of the output, not an oversight — retrying belongs to the
//! endpoint's ingestion tier, not to this shipper.
//!
//! Successful responses are drained so the pooled connection can be reused.
//! The worker exits once the batch queue is closed and empty.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, USER_AGENT};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error};

use crate::batcher::Batch;
use crate::error::InitError;

/// The delivery worker for one instance.
pub struct Flusher {
    client: reqwest::Client,
    url: reqwest::Url,
    headers: HeaderMap,
}

impl Flusher {
    /// Builds the worker, resolving the configured header map once.
    ///
    /// A header name or value that is not valid HTTP is a fatal init error.
    pub fn new(
        client: reqwest::Client,
        post_url: &str,
        extra_headers: &HashMap<String, String>,
    ) -> Result<Self, InitError> {
        let url = reqwest::Url::parse(post_url)
            .map_err(|_| InitError::InvalidUrl(post_url.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));
        for (name, value) in extra_headers {
            let header_name = name
                .parse::<HeaderName>()
                .map_err(|_| InitError::InvalidHeader(name.clone()))?;
            let header_value = value
                .parse::<HeaderValue>()
                .map_err(|_| InitError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        Ok(Flusher {
            client,
            url,
            headers,
        })
    }

    /// Runs the delivery loop until the batch queue closes and drains.
    pub async fn run(self, mut rx: Receiver<Batch>) {
        while let Some(batch) = rx.recv().await {
            self.send(batch).await;
        }
        debug!("Batch queue closed, stopping delivery worker");
    }

    /// Issues the single POST for one batch.
    async fn send(&self, batch: Batch) {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(batch.payload);
        if batch.compressed {
            request = request.header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                // Drain the body regardless of status so the connection can
                // be reused.
                let body = response.bytes().await.unwrap_or_default();
                if status.as_u16() >= 400 {
                    error!(
                        %status,
                        records = batch.records,
                        "HTTP response not ok, discarding batch"
                    );
                } else {
                    debug!(
                        %status,
                        records = batch.records,
                        body_bytes = body.len(),
                        "Delivered batch"
                    );
                }
            }
            Err(e) => {
                error!(records = batch.records, "HTTP request failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use tokio::sync::mpsc;

    fn batch(payload: &[u8], compressed: bool) -> Batch {
        Batch {
            payload: payload.to_vec(),
            records: 1,
            compressed,
        }
    }

    fn flusher_for(url: &str) -> Flusher {
        let headers = HashMap::from([(
            "Content-Type".to_string(),
            "application/octets".to_string(),
        )]);
        Flusher::new(build_client().expect("client"), url, &headers).expect("flusher")
    }

    #[test]
    fn test_invalid_header_rejected() {
        let headers = HashMap::from([("bad header name".to_string(), "v".to_string())]);
        let result = Flusher::new(
            build_client().expect("client"),
            "https://example.com/x",
            &headers,
        );
        assert!(matches!(result, Err(InitError::InvalidHeader(_))));
    }

    #[tokio::test]
    async fn test_send_posts_payload_with_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("Content-Type", "application/octets")
            .match_header("User-Agent", crate::USER_AGENT)
            .match_body(b"{\"a\":1}\n".to_vec())
            .with_status(200)
            .create_async()
            .await;

        let flusher = flusher_for(&format!("{}/ingest", server.url()));
        flusher.send(batch(b"{\"a\":1}\n", false)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_sets_content_encoding_for_compressed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("Content-Encoding", "gzip")
            .with_status(202)
            .create_async()
            .await;

        let flusher = flusher_for(&format!("{}/ingest", server.url()));
        flusher.send(batch(b"\x1f\x8b", true)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_send_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        // expect(1): a retry would trip the assertion.
        let mock = server
            .mock("POST", "/ingest")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let flusher = flusher_for(&format!("{}/ingest", server.url()));
        flusher.send(batch(b"x", false)).await;

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_exits() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let flusher = flusher_for(&format!("{}/ingest", server.url()));
        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(flusher.run(rx));

        tx.send(batch(b"one", false)).await.expect("send");
        tx.send(batch(b"two", false)).await.expect("send");
        drop(tx);

        worker.await.expect("worker should exit cleanly");
        mock.assert_async().await;
    }
}
