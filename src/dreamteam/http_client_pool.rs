//! HTTP Client Pool for maintaining persistent connections.
//!
//! The model endpoint, the search service, the session pool and the web surfer all go
//! through this pool, so each base URL keeps one configured `reqwest::Client` and reuses its
//! connections across turns.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::time::Duration;

/// Global cache of HTTP clients indexed by base URL.
static CLIENT_POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

/// Creates or retrieves a shared HTTP client for the given base URL.
///
/// The client keeps up to 32 idle connections per host for 90 seconds, sends TCP
/// keepalives every 60 seconds, gives up connecting after 30 seconds and caps a whole
/// request at 5 minutes.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL
        .entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|e| {
            log::error!(
                "dreamteam::http_client_pool: falling back to default client: {}",
                e
            );
            reqwest::Client::new()
        })
}

/// Scheme and authority of `url`, used as the pool key.
pub fn base_url_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_pool_keys_by_base_url() {
        let url = "https://example.openai.azure.com";
        let _client1 = get_or_create_client(url);
        let _client2 = get_or_create_client(url);
        assert!(CLIENT_POOL.contains_key(url));

        let other = "https://example.search.windows.net";
        let _client3 = get_or_create_client(other);
        assert!(CLIENT_POOL.contains_key(other));
        // Can't check exact length due to parallel test execution
        assert!(CLIENT_POOL.len() >= 2);
    }

    #[test]
    fn test_base_url_of_strips_path_and_query() {
        assert_eq!(
            base_url_of("https://pool.example.io/code/execute?identifier=1"),
            "https://pool.example.io"
        );
        assert_eq!(base_url_of("not a url"), "not a url");
    }
}
