//! Rate-limited ("niced") HTTP fetching with a persistent on-disk cache.
//!
//! A [`NicedRequester`] serves repeated requests for the same resource from
//! disk without touching the network, and spaces the network calls it does
//! make by a configurable minimum interval, so programs that poll or scrape
//! third-party endpoints stay polite and avoid redundant round-trips.
//!
//! ```no_run
//! use niced_request::NicedRequester;
//!
//! # async fn run() -> niced_request::Result<()> {
//! let requester = NicedRequester::new()?;
//! // First call fetches over HTTP and caches the body.
//! let body = requester.perform_request("http://httpbin.org/get?bla1=blabla").await?;
//! // Second call is served from disk, instantly.
//! let again = requester.perform_request("http://httpbin.org/get?bla1=blabla").await?;
//! assert_eq!(body, again);
//! # Ok(())
//! # }
//! ```
//!
//! Cache layout is pluggable through the [`Organizer`] policy, the transport
//! through the [`Fetcher`] trait; see [`Config`] for the construction knobs.

pub mod cache;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod organizer;
pub mod requester;

pub use cache::{CacheKey, CacheStore, EntryMeta, default_cache_root};
pub use error::{Error, FetchError, PolicyError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use limiter::{DEFAULT_MIN_INTERVAL, RateLimiter};
pub use organizer::{DefaultOrganizer, Organizer};
pub use requester::{Config, NicedRequester};
