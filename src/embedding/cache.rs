//! Query embedding cache with per-key request coalescing
//!
//! Embedding generation is the most expensive step of a discovery request,
//! so computed query vectors are held for a TTL. Concurrent requests for the
//! same key share a single generation: one caller leads, the rest join the
//! in-flight computation and receive its outcome, success or failure. A
//! failed generation never populates the cache; the next call starts fresh.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use super::EmbeddingError;

type FlightOutcome = Option<Result<Vec<f32>, EmbeddingError>>;

struct CachedVector {
    vector: Vec<f32>,
    created_at: Instant,
}

struct Inner {
    entries: HashMap<String, CachedVector>,
    flights: HashMap<String, watch::Receiver<FlightOutcome>>,
}

enum Role {
    Lead(watch::Sender<FlightOutcome>),
    Join(watch::Receiver<FlightOutcome>),
}

/// Embedding cache shared across concurrent discovery requests
///
/// The inner lock guards two tables: completed entries and in-flight
/// generations. It is never held across an await point.
pub struct EmbeddingCache {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                flights: HashMap::new(),
            }),
            ttl,
        }
    }

    /// Return the cached vector for `text`, generating it on miss
    ///
    /// On a miss the first caller invokes `generate` exactly once; callers
    /// arriving while that generation is in flight wait for and share its
    /// result. An entry older than the TTL is treated as a miss.
    pub async fn get<F, Fut>(&self, text: &str, generate: F) -> Result<Vec<f32>, EmbeddingError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<f32>, EmbeddingError>>,
    {
        let key = cache_key(text);

        loop {
            let role = {
                let mut inner = self.inner.lock().unwrap();

                if let Some(entry) = inner.entries.get(&key) {
                    if entry.created_at.elapsed() < self.ttl {
                        return Ok(entry.vector.clone());
                    }
                }

                match inner.flights.get(&key) {
                    Some(rx) => Role::Join(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        inner.flights.insert(key.clone(), rx);
                        Role::Lead(tx)
                    }
                }
            };

            match role {
                Role::Lead(tx) => {
                    let result = generate().await;

                    {
                        let mut inner = self.inner.lock().unwrap();
                        inner.flights.remove(&key);
                        if let Ok(vector) = &result {
                            inner.entries.insert(
                                key.clone(),
                                CachedVector {
                                    vector: vector.clone(),
                                    created_at: Instant::now(),
                                },
                            );
                        }
                    }

                    let _ = tx.send(Some(result.clone()));
                    return result;
                }
                Role::Join(mut rx) => {
                    let outcome = loop {
                        if let Some(result) = rx.borrow_and_update().clone() {
                            break Some(result);
                        }
                        if rx.changed().await.is_err() {
                            break None;
                        }
                    };

                    match outcome {
                        Some(result) => return result,
                        None => {
                            // Leader dropped without publishing; evict the
                            // dead flight and take another pass.
                            let mut inner = self.inner.lock().unwrap();
                            let dead = inner
                                .flights
                                .get(&key)
                                .map(|existing| existing.same_channel(&rx))
                                .unwrap_or(false);
                            if dead {
                                inner.flights.remove(&key);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Number of cached entries, expired ones included until swept
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Drop every cached entry
    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }

    /// Remove entries older than the TTL, returning how many were evicted
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - inner.entries.len()
    }

    /// Spawn the periodic TTL sweep; readers are never blocked by it
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    tracing::debug!(evicted, "embedding cache sweep");
                }
            }
        })
    }
}

/// Cache key: blake3 digest of the full trimmed query text
///
/// Hashing the whole text (rather than a bounded prefix) keeps two distinct
/// long queries from ever sharing a key. Filters stay out of the key because
/// the cached value is a pure text embedding.
fn cache_key(text: &str) -> String {
    blake3::hash(text.trim().as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_generator(
        counter: Arc<AtomicUsize>,
        delay: Duration,
        result: Result<Vec<f32>, EmbeddingError>,
    ) -> impl Fn() -> std::pin::Pin<Box<dyn Future<Output = Result<Vec<f32>, EmbeddingError>> + Send>>
    {
        move || {
            let counter = counter.clone();
            let result = result.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                result
            })
        }
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_generation() {
        let cache = EmbeddingCache::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        let generate =
            counting_generator(counter.clone(), Duration::ZERO, Ok(vec![1.0, 2.0, 3.0]));

        let first = cache.get("graphing calculator", &generate).await.unwrap();
        let second = cache.get("graphing calculator", &generate).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_generation() {
        let cache = Arc::new(EmbeddingCache::new(Duration::from_secs(60)));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let generate = counting_generator(
                counter.clone(),
                Duration::from_millis(50),
                Ok(vec![0.5, 0.5]),
            );
            handles.push(tokio::spawn(async move {
                cache.get("shared query", &generate).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), vec![0.5, 0.5]);
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_failure_then_retry() {
        let cache = Arc::new(EmbeddingCache::new(Duration::from_secs(60)));
        let counter = Arc::new(AtomicUsize::new(0));

        let failing = counting_generator(
            counter.clone(),
            Duration::from_millis(50),
            Err(EmbeddingError::Generation("upstream down".to_string())),
        );

        let mut handles = Vec::new();
        for _ in 0..2 {
            let cache = cache.clone();
            let generate = counting_generator(
                counter.clone(),
                Duration::from_millis(50),
                Err(EmbeddingError::Generation("upstream down".to_string())),
            );
            handles.push(tokio::spawn(async move {
                cache.get("doomed query", &generate).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_err());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 0);

        // A later call is a fresh attempt, not a cached failure
        let retry = cache.get("doomed query", &failing).await;
        assert!(retry.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_regenerates() {
        let cache = EmbeddingCache::new(Duration::from_millis(20));
        let counter = Arc::new(AtomicUsize::new(0));

        let generate = counting_generator(counter.clone(), Duration::ZERO, Ok(vec![1.0]));

        cache.get("short lived", &generate).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get("short lived", &generate).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_expired() {
        let cache = EmbeddingCache::new(Duration::from_millis(30));
        let counter = Arc::new(AtomicUsize::new(0));
        let generate = counting_generator(counter.clone(), Duration::ZERO, Ok(vec![1.0]));

        cache.get("old entry", &generate).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.get("fresh entry", &generate).await.unwrap();

        assert_eq!(cache.size(), 2);
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_clear_empties_cache() {
        let cache = EmbeddingCache::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));
        let generate = counting_generator(counter.clone(), Duration::ZERO, Ok(vec![1.0]));

        cache.get("a", &generate).await.unwrap();
        cache.get("b", &generate).await.unwrap();
        assert_eq!(cache.size(), 2);

        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_key_distinguishes_long_queries_sharing_prefix() {
        let cache = EmbeddingCache::new(Duration::from_secs(60));
        let counter = Arc::new(AtomicUsize::new(0));

        let prefix = "a".repeat(200);
        let first = format!("{} first tail", prefix);
        let second = format!("{} second tail", prefix);

        let gen_a = counting_generator(counter.clone(), Duration::ZERO, Ok(vec![1.0]));
        let gen_b = counting_generator(counter.clone(), Duration::ZERO, Ok(vec![2.0]));

        let a = cache.get(&first, &gen_a).await.unwrap();
        let b = cache.get(&second, &gen_b).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.size(), 2);
    }
}
