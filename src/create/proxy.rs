use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::time::Duration;

const PROXY_LIST_URL: &str =
    "https://proxy.webshare.io/api/v2/proxy/list/?mode=direct&country_code__in=US&page_size=1";

/// Network egress point acquired once per run. The browsing session and every
/// artifact download route through the same endpoint.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    pub server: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct ProxyListing {
    #[serde(default)]
    results: Vec<ProxyRecord>,
}

#[derive(Debug, Deserialize)]
struct ProxyRecord {
    proxy_address: String,
    port: u16,
    username: String,
    password: String,
}

/// Fetch one US egress endpoint from the proxy listing API.
pub async fn acquire(api_key: &str) -> Result<ProxyEndpoint> {
    let client = reqwest::Client::builder()
        .user_agent(format!("vidgen/{}", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    let resp = client
        .get(PROXY_LIST_URL)
        .header("Authorization", format!("Token {api_key}"))
        .send()
        .await
        .context("Failed to query proxy listing")?;

    if !resp.status().is_success() {
        bail!("Proxy listing API returned status: {}", resp.status());
    }

    let listing: ProxyListing = resp
        .json()
        .await
        .context("Failed to parse proxy listing response")?;
    let record = listing
        .results
        .into_iter()
        .next()
        .context("Proxy listing returned no endpoints")?;

    Ok(ProxyEndpoint {
        server: format!("http://{}:{}", record.proxy_address, record.port),
        username: record.username,
        password: record.password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_response_decodes() {
        let listing: ProxyListing = serde_json::from_str(
            r#"{"results": [{"proxy_address": "1.2.3.4", "port": 8080,
                "username": "u", "password": "p"}]}"#,
        )
        .expect("parse listing");
        assert_eq!(listing.results.len(), 1);
        assert_eq!(listing.results[0].port, 8080);
    }
}
