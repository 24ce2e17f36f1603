// Network transport boundary.
// Defines the Fetcher trait the requester fetches through, plus the default
// reqwest-backed implementation.

use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

const USER_AGENT: &str = concat!("niced-request/", env!("CARGO_PKG_VERSION"));

/// Transport capability: fetch the bytes behind a request identifier.
///
/// The core is indifferent to protocol details; anything satisfying this
/// signature can back a requester (the tests use in-memory stubs).
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(
        &self,
        request: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

/// Default transport: treats the request identifier as a URL and issues a
/// plain GET through reqwest.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an already-configured client (custom headers, proxies, timeouts).
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &str) -> Result<Vec<u8>, FetchError> {
        debug!(url = request, "fetching");
        let response = self
            .client
            .get(request)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: request.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: request.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
                url: request.to_string(),
                message: e.to_string(),
            })?;
        Ok(body.to_vec())
    }
}
