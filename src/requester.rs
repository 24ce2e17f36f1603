// Niced caching requester.
// Orchestrates cache lookup, the pacing gate, the network fetch, and the
// atomic write-back; collapses concurrent misses on one key into one fetch.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheStore, default_cache_root};
use crate::error::{Error, FetchError, Result};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::limiter::{DEFAULT_MIN_INTERVAL, RateLimiter};
use crate::organizer::{DefaultOrganizer, Organizer};

/// Construction knobs for a [`NicedRequester`].
///
/// Every field has a default: the per-user cache directory, the organizer
/// that puts all entries at the cache root, and one second between network
/// calls.
pub struct Config {
    /// Overrides the cache root location.
    pub cache_root: Option<PathBuf>,
    /// Overrides the layout policy mapping requests to sub-directories.
    pub organizer: Option<Box<dyn Organizer>>,
    /// Minimum spacing between outbound network calls.
    pub min_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root: None,
            organizer: None,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

/// Outcome shared between every caller collapsed onto one fetch.
type FlightOutcome = std::result::Result<Vec<u8>, FlightFailure>;

#[derive(Debug, Clone)]
enum FlightFailure {
    Fetch(FetchError),
    Store(String),
}

struct Shared<F> {
    store: CacheStore,
    organizer: Box<dyn Organizer>,
    limiter: RateLimiter,
    fetcher: F,
    in_flight: Mutex<HashMap<PathBuf, broadcast::Sender<FlightOutcome>>>,
}

/// Cache-first requester that paces its network calls.
///
/// A hit is served straight from disk; a miss passes the rate limiter gate,
/// fetches, persists the body atomically, and returns it. Concurrent misses
/// on the same key share one fetch and one limiter slot.
pub struct NicedRequester<F: Fetcher = HttpFetcher> {
    shared: Arc<Shared<F>>,
}

impl<F: Fetcher> Clone for NicedRequester<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl NicedRequester<HttpFetcher> {
    /// All-defaults requester backed by the bundled HTTP transport.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// HTTP-backed requester with custom configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new()?;
        Self::with_fetcher(config, fetcher)
    }
}

impl<F: Fetcher> NicedRequester<F> {
    /// Requester over a caller-supplied transport.
    pub fn with_fetcher(config: Config, fetcher: F) -> Result<Self> {
        let root = match config.cache_root {
            Some(root) => root,
            None => default_cache_root().ok_or_else(|| {
                Error::Io(io::Error::other(
                    "could not determine a per-user cache directory",
                ))
            })?,
        };
        let organizer = config
            .organizer
            .unwrap_or_else(|| Box::new(DefaultOrganizer));

        Ok(Self {
            shared: Arc::new(Shared {
                store: CacheStore::new(root),
                organizer,
                limiter: RateLimiter::new(config.min_interval),
                fetcher,
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The directory owning this requester's cache entries.
    pub fn cache_root(&self) -> &Path {
        self.shared.store.root()
    }

    /// Fetch the body behind `request`, serving from cache when possible.
    ///
    /// A cached entry is returned without touching the rate limiter or the
    /// network. On a miss the call may block while the pacing gate waits out
    /// the minimum interval. A corrupt entry is treated as a miss and
    /// re-fetched through the normal paced path. A failed fetch writes
    /// nothing, so the next call for the same identifier retries.
    pub async fn perform_request(&self, request: &str) -> Result<Vec<u8>> {
        if request.is_empty() {
            return Err(Error::InvalidRequest);
        }
        let segment = self.shared.organizer.organize(request)?;
        let key = CacheKey::derive(&segment, request)?;

        if self.shared.store.exists(&key) {
            match self.shared.store.read(&key) {
                Ok(body) => {
                    debug!(request, "cache hit");
                    return Ok(body);
                }
                Err(Error::CacheCorrupt { path, source }) => {
                    warn!(
                        request,
                        path = %path.display(),
                        error = %source,
                        "corrupt cache entry, re-fetching"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        debug!(request, "cache miss");
        self.join_flight(&key, request).await
    }

    /// Remove the cached entry for `request`, if any. The next
    /// [`perform_request`](Self::perform_request) for it will fetch again.
    pub fn evict(&self, request: &str) -> Result<()> {
        if request.is_empty() {
            return Err(Error::InvalidRequest);
        }
        let segment = self.shared.organizer.organize(request)?;
        let key = CacheKey::derive(&segment, request)?;
        self.shared.store.remove(&key)
    }

    /// Join the in-flight fetch for `key`, starting one if none exists.
    async fn join_flight(&self, key: &CacheKey, request: &str) -> Result<Vec<u8>> {
        let path = key.body_path(self.shared.store.root());

        let mut rx = {
            let mut in_flight = lock_registry(&self.shared.in_flight);
            if let Some(tx) = in_flight.get(&path) {
                debug!(request, "joining in-flight fetch");
                tx.subscribe()
            } else {
                let (tx, rx) = broadcast::channel(1);
                in_flight.insert(path.clone(), tx.clone());
                self.spawn_flight(key.clone(), request.to_string(), path, tx);
                rx
            }
        };

        match rx.recv().await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(FlightFailure::Fetch(err))) => Err(Error::Fetch(err)),
            Ok(Err(FlightFailure::Store(message))) => Err(Error::Io(io::Error::other(message))),
            // The flight vanished without publishing an outcome (task
            // aborted, runtime shutting down).
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Run the fetch as a detached task so a caller abandoning its future
    /// does not waste the limiter slot: the fetch completes and lands in the
    /// cache regardless.
    fn spawn_flight(
        &self,
        key: CacheKey,
        request: String,
        path: PathBuf,
        tx: broadcast::Sender<FlightOutcome>,
    ) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome = shared.run_flight(&key, &request).await;

            // Deregister before sending, under the registry lock: a caller
            // that saw this flight in the registry has already subscribed
            // and is guaranteed the outcome.
            let mut in_flight = lock_registry(&shared.in_flight);
            in_flight.remove(&path);
            let _ = tx.send(outcome);
        });
    }
}

impl<F: Fetcher> Shared<F> {
    async fn run_flight(&self, key: &CacheKey, request: &str) -> FlightOutcome {
        // A previous flight may have published while this caller was
        // queueing up; serve it rather than spend a limiter slot.
        if self.store.exists(key) {
            if let Ok(body) = self.store.read(key) {
                return Ok(body);
            }
        }

        self.limiter.wait_turn().await;
        let body = self
            .fetcher
            .fetch(request)
            .await
            .map_err(FlightFailure::Fetch)?;
        self.store
            .write(key, request, &body)
            .map_err(|e| FlightFailure::Store(e.to_string()))?;
        Ok(body)
    }
}

fn lock_registry<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::Instant;

    /// In-memory transport recording when each call was admitted.
    struct StubFetcher {
        responses: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<(String, Instant)>>,
        delay: Duration,
    }

    impl StubFetcher {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn call_count(shared: &NicedRequester<StubFetcher>) -> usize {
            shared.shared.fetcher.calls.lock().unwrap().len()
        }

        fn call_instants(shared: &NicedRequester<StubFetcher>) -> Vec<Instant> {
            shared
                .shared
                .fetcher
                .calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, at)| *at)
                .collect()
        }
    }

    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &str) -> std::result::Result<Vec<u8>, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((request.to_string(), Instant::now()));
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            match self.responses.get(request) {
                Some(body) => Ok(body.clone()),
                None => Err(FetchError::Transport {
                    url: request.to_string(),
                    message: "no stub response".to_string(),
                }),
            }
        }
    }

    fn requester(
        dir: &TempDir,
        fetcher: StubFetcher,
    ) -> NicedRequester<StubFetcher> {
        let config = Config {
            cache_root: Some(dir.path().to_path_buf()),
            organizer: Some(Box::new(|_: &str| "a".to_string())),
            min_interval: Duration::from_secs(1),
        };
        NicedRequester::with_fetcher(config, fetcher).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_identifier_scenario() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[("u1", "R1"), ("u2", "R2")]));

        // Two cold requests: both hit the network, paced one second apart.
        assert_eq!(req.perform_request("u1").await.unwrap(), b"R1");
        assert_eq!(req.perform_request("u2").await.unwrap(), b"R2");

        let instants = StubFetcher::call_instants(&req);
        assert_eq!(instants.len(), 2);
        assert!(instants[1] - instants[0] >= Duration::from_secs(1));

        // Repeats are served from disk: no network calls, no pacing delay.
        let before = Instant::now();
        assert_eq!(req.perform_request("u1").await.unwrap(), b"R1");
        assert_eq!(req.perform_request("u2").await.unwrap(), b"R2");
        assert_eq!(Instant::now() - before, Duration::ZERO);
        assert_eq!(StubFetcher::call_count(&req), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_invariant_across_misses() {
        let dir = TempDir::new().unwrap();
        let req = requester(
            &dir,
            StubFetcher::new(&[("u1", "R1"), ("u2", "R2"), ("u3", "R3")]),
        );

        for id in ["u1", "u2", "u3"] {
            req.perform_request(id).await.unwrap();
        }

        let instants = StubFetcher::call_instants(&req);
        assert_eq!(instants.len(), 3);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_does_not_poison_the_cache() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[]));

        assert!(matches!(
            req.perform_request("u1").await,
            Err(Error::Fetch(_))
        ));
        // Nothing was cached: the retry goes back to the network.
        assert!(matches!(
            req.perform_request("u1").await,
            Err(Error::Fetch(_))
        ));
        assert_eq!(StubFetcher::call_count(&req), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_identifier_is_rejected() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[]));

        assert!(matches!(
            req.perform_request("").await,
            Err(Error::InvalidRequest)
        ));
        assert_eq!(StubFetcher::call_count(&req), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_traversal_organizer_fails_without_fetching() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            cache_root: Some(dir.path().to_path_buf()),
            organizer: Some(Box::new(|_: &str| "..".to_string())),
            min_interval: Duration::from_secs(1),
        };
        let req =
            NicedRequester::with_fetcher(config, StubFetcher::new(&[("u1", "R1")])).unwrap();

        assert!(matches!(
            req.perform_request("u1").await,
            Err(Error::Policy(_))
        ));
        assert_eq!(StubFetcher::call_count(&req), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_entry_self_heals() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[("u1", "R1")]));

        req.perform_request("u1").await.unwrap();
        assert_eq!(StubFetcher::call_count(&req), 1);

        // Wreck the entry: body path exists but cannot be read as a file.
        let key = CacheKey::derive("a", "u1").unwrap();
        let body = key.body_path(dir.path());
        fs::remove_file(&body).unwrap();
        fs::create_dir(&body).unwrap();

        assert_eq!(req.perform_request("u1").await.unwrap(), b"R1");
        assert_eq!(StubFetcher::call_count(&req), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_collapse_into_one_fetch() {
        let dir = TempDir::new().unwrap();
        let req = requester(
            &dir,
            StubFetcher::new(&[("u1", "R1")]).with_delay(Duration::from_millis(100)),
        );

        let a = {
            let req = req.clone();
            tokio::spawn(async move { req.perform_request("u1").await })
        };
        let b = {
            let req = req.clone();
            tokio::spawn(async move { req.perform_request("u1").await })
        };

        assert_eq!(a.await.unwrap().unwrap(), b"R1");
        assert_eq!(b.await.unwrap().unwrap(), b"R1");
        assert_eq!(StubFetcher::call_count(&req), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_caller_leaves_fetch_to_complete() {
        let dir = TempDir::new().unwrap();
        let req = requester(
            &dir,
            StubFetcher::new(&[("u1", "R1")]).with_delay(Duration::from_secs(5)),
        );

        let abandoned = {
            let req = req.clone();
            tokio::spawn(async move { req.perform_request("u1").await })
        };
        // Let the flight get admitted, then abandon the caller.
        for _ in 0..20 {
            if StubFetcher::call_count(&req) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(StubFetcher::call_count(&req), 1);
        abandoned.abort();

        // The detached flight still completes and lands in the cache.
        assert_eq!(req.perform_request("u1").await.unwrap(), b"R1");
        assert_eq!(StubFetcher::call_count(&req), 1);

        let key = CacheKey::derive("a", "u1").unwrap();
        assert!(key.body_path(dir.path()).is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_forces_a_refetch() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[("u1", "R1")]));

        req.perform_request("u1").await.unwrap();
        req.evict("u1").unwrap();
        req.perform_request("u1").await.unwrap();

        assert_eq!(StubFetcher::call_count(&req), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sidecar_written_alongside_body() {
        let dir = TempDir::new().unwrap();
        let req = requester(&dir, StubFetcher::new(&[("u1", "R1")]));

        req.perform_request("u1").await.unwrap();

        let key = CacheKey::derive("a", "u1").unwrap();
        let store = CacheStore::new(dir.path().to_path_buf());
        let meta = store.read_meta(&key).unwrap().unwrap();
        assert_eq!(meta.request, "u1");
    }
}
