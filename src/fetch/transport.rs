use log::debug;
use url::Url;

use crate::error::RemoteFetchError;

// ---------------------------------------------------------------------------
// Transport – one blocking GET, body as text
// ---------------------------------------------------------------------------

/// The seam between the fetchers and the network.
///
/// Implementations perform a single GET and return the body of a 2xx
/// response. Anything else is a [`RemoteFetchError`]; nothing retries.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<String, RemoteFetchError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &Url) -> Result<String, RemoteFetchError> {
        (**self).get(url)
    }
}

/// Blocking HTTP transport with the client's default timeouts.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<String, RemoteFetchError> {
        let shown = redact(url);
        debug!("GET {shown}");
        let network = |source| RemoteFetchError::Network {
            url: shown.clone(),
            source,
        };

        let response = self
            .client
            .get(url.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(network)?;
        let status = response.status();
        let body = response.text().map_err(network)?;

        if !status.is_success() {
            return Err(RemoteFetchError::Status {
                url: shown,
                status: status.as_u16(),
                body: body.trim().chars().take(500).collect(),
            });
        }
        Ok(body)
    }
}

/// URL as text with the API key masked, for logs and error messages.
pub fn redact(url: &Url) -> String {
    if !url.query_pairs().any(|(k, _)| k == "key") {
        return url.to_string();
    }
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "key" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_masks_key_only() {
        let url = Url::parse("https://api.census.gov/data/2022/acs/acs5?get=NAME&key=SECRET").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("SECRET"));
        assert!(shown.contains("get=NAME"));
        assert!(shown.contains("key=***") || shown.contains("key=%2A%2A%2A"));

        let plain = Url::parse("https://example.test/a?b=c").unwrap();
        assert_eq!(redact(&plain), "https://example.test/a?b=c");
    }

    struct Echo;

    impl Transport for Echo {
        fn get(&self, url: &Url) -> Result<String, RemoteFetchError> {
            Ok(url.path().to_string())
        }
    }

    #[test]
    fn test_borrowed_transport_delegates() {
        let url = Url::parse("https://example.test/ping").unwrap();
        fn fetch_with<T: Transport>(transport: T, url: &Url) -> String {
            transport.get(url).unwrap()
        }
        let echo = Echo;
        assert_eq!(fetch_with(&echo, &url), "/ping");
    }
}
