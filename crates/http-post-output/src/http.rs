//! HTTP client construction.
//!
//! One client per instance, shared across that instance's delivery requests.
//! The contract the client must satisfy: TLS 1.2 or newer, no automatic
//! redirect following (a redirect response is the final response), connection
//! reuse with a small per-host pool, and bounded connect time.

use std::time::Duration;

use crate::error::InitError;

/// Dial timeout for new connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// TCP keep-alive interval on pooled connections.
const TCP_KEEPALIVE: Duration = Duration::from_secs(50);

/// Upper bound on idle pooled connections per host.
const MAX_IDLE_PER_HOST: usize = 2;

/// Builds the delivery client for one instance.
pub fn build_client() -> Result<reqwest::Client, InitError> {
    let client = reqwest::Client::builder()
        .min_tls_version(reqwest::tls::Version::TLS_1_2)
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(Some(TCP_KEEPALIVE))
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .build()?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client() {
        assert!(build_client().is_ok());
    }
}
