//! End-to-end pipeline tests: a started instance delivering to a local mock
//! endpoint, covering match enrichment, dedup suppression, field removal,
//! batching, and shutdown semantics together.

use std::io::Write;

use chrono::Utc;
use http_post_output::config::Config;
use http_post_output::instance::Instance;
use http_post_output::pipeline::{Disposition, DropReason};
use http_post_output::record::FieldValue;

fn write_match_map(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(content.as_bytes()).expect("write");
    file
}

fn record(pairs: &[(&str, &str)]) -> Vec<(String, FieldValue)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), FieldValue::Text((*v).to_string())))
        .collect()
}

fn base_config(url: &str, match_map_path: &str) -> Config {
    Config {
        id: "e2e".to_string(),
        post_url: format!("{url}/ingest"),
        match_map_file: match_map_path.to_string(),
        gzip_body: false,
        max_records: 2,
        max_period_ms: 60_000,
        deduplicate_key_fields: vec!["env".to_string(), "msg".to_string()],
        deduplicate_size: 16,
        remove_fields: vec!["secret".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_enriched_deduplicated_batch_is_delivered() {
    let mut server = mockito::Server::new_async().await;
    // serde_json maps serialize with sorted keys, so the body is exact.
    let expected = concat!(
        "{\"env\":\"prod\",\"msg\":\"one\",\"team\":\"sre\"}\n",
        "{\"env\":\"prod\",\"msg\":\"two\",\"team\":\"sre\"}\n",
    );
    let mock = server
        .mock("POST", "/ingest")
        .match_header("Content-Type", "application/octets")
        .match_body(expected)
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let map = write_match_map(r#"{"env": {"prod": {"team": "sre"}}}"#);
    let config = base_config(&server.url(), map.path().to_str().expect("path"));
    let mut instance = Instance::start(config).expect("instance");

    let now = Utc::now();
    assert_eq!(
        instance
            .process(record(&[("env", "prod"), ("msg", "one"), ("secret", "x")]), now)
            .await,
        Disposition::Queued
    );
    // Same dedup key: suppressed, never reaches the batch.
    assert_eq!(
        instance
            .process(record(&[("env", "prod"), ("msg", "one")]), now)
            .await,
        Disposition::Dropped(DropReason::Duplicate)
    );
    assert_eq!(
        instance
            .process(record(&[("env", "prod"), ("msg", "two")]), now)
            .await,
        Disposition::Queued
    );

    // Two queued records fill the batch; shutdown drains the workers, so the
    // POST has happened by the time it returns.
    instance.shutdown().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_flush_on_shutdown_delivers_partial_gzip_batch() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .match_header("Content-Encoding", "gzip")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let map = write_match_map(r#"{"env": {"*": {}}}"#);
    let mut config = base_config(&server.url(), map.path().to_str().expect("path"));
    config.gzip_body = true;
    config.max_records = 10;
    config.flush_on_shutdown = true;

    let mut instance = Instance::start(config).expect("instance");
    assert_eq!(
        instance
            .process(record(&[("env", "dev"), ("msg", "only")]), Utc::now())
            .await,
        Disposition::Queued
    );

    instance.shutdown().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_partial_batch_discarded_by_default() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let map = write_match_map(r#"{"env": {"*": {}}}"#);
    let mut config = base_config(&server.url(), map.path().to_str().expect("path"));
    config.max_records = 10;

    let mut instance = Instance::start(config).expect("instance");
    assert_eq!(
        instance
            .process(record(&[("env", "dev"), ("msg", "lost")]), Utc::now())
            .await,
        Disposition::Queued
    );

    instance.shutdown().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unmatched_records_never_reach_the_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let map = write_match_map(r#"{"host": {"web-*": {"role": "frontend"}}}"#);
    let config = base_config(&server.url(), map.path().to_str().expect("path"));

    let mut instance = Instance::start(config).expect("instance");
    assert_eq!(
        instance
            .process(record(&[("host", "db-01"), ("msg", "a")]), Utc::now())
            .await,
        Disposition::Dropped(DropReason::NoMatch)
    );

    instance.shutdown().await;
    mock.assert_async().await;
}
