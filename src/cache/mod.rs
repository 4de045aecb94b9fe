//! Request-keyed LRU cache guarding the fetch/transform pipeline.

pub mod disk;
pub mod lru;
pub mod memory;

pub use disk::DiskBackend;
pub use lru::LruIndex;
pub use memory::MemoryBackend;

use crate::config::MissStrategy;
use crate::fetch::{FetchError, Fetcher};
use crate::fingerprint::{Fingerprint, TransformRequest};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::HeaderMap;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
    #[error("cache capacity must be > 0")]
    InvalidCapacity,
}

/// Where cached payloads live.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// What the index stores per entry: the bytes themselves or a file path.
    type Handle: Send + Sync;

    async fn write(&self, key: &Fingerprint, bytes: &Bytes) -> io::Result<Self::Handle>;
    async fn read(&self, handle: &Self::Handle) -> io::Result<Bytes>;
    async fn remove(&self, handle: &Self::Handle) -> io::Result<()>;
}

/// Cache operations used by the HTTP layer.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Returns the transformed bytes for `request`, fetching on a miss.
    async fn get(&self, request: &TransformRequest, headers: HeaderMap)
        -> Result<Bytes, CacheError>;

    /// Inserts or overwrites `key`, evicting at most one entry.
    async fn put(&self, key: Fingerprint, bytes: Bytes) -> Result<(), CacheError>;

    /// Removes every entry and returns how many were removed.
    async fn clear(&self) -> Result<usize, CacheError>;

    async fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

type InFlight = Shared<BoxFuture<'static, Result<Bytes, FetchError>>>;

struct Inner<H> {
    index: LruIndex<H>,
    in_flight: HashMap<Fingerprint, InFlight>,
}

/// LRU cache over a [`Backend`], filling misses through a [`Fetcher`].
///
/// One async mutex guards the index, the in-flight registry and every
/// backend mutation. Payloads leave the cache as `Bytes`, never as handles.
pub struct LruCache<B: Backend> {
    inner: Mutex<Inner<B::Handle>>,
    backend: B,
    fetcher: Arc<dyn Fetcher>,
    strategy: MissStrategy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<B: Backend> LruCache<B> {
    pub fn new(
        capacity: usize,
        backend: B,
        fetcher: Arc<dyn Fetcher>,
        strategy: MissStrategy,
    ) -> Result<Self, CacheError> {
        let capacity = NonZeroUsize::new(capacity).ok_or(CacheError::InvalidCapacity)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                index: LruIndex::new(capacity),
                in_flight: HashMap::new(),
            }),
            backend,
            fetcher,
            strategy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.index.is_empty()
    }

    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.index.capacity()
    }

    pub async fn contains(&self, key: &Fingerprint) -> bool {
        self.inner.lock().await.index.contains(key)
    }

    /// Cached keys, most recently used first.
    pub async fn keys(&self) -> Vec<Fingerprint> {
        self.inner.lock().await.index.keys().cloned().collect()
    }

    /// Reads a cached payload and promotes it.
    ///
    /// An entry whose backing file vanished is dropped and reported as a
    /// miss.
    async fn lookup(
        &self,
        inner: &mut Inner<B::Handle>,
        key: &Fingerprint,
    ) -> Result<Option<Bytes>, CacheError> {
        let read = match inner.index.get(key) {
            Some(handle) => self.backend.read(handle).await,
            None => return Ok(None),
        };
        match read {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("Cached payload for key={} is gone, dropping entry", key);
                inner.index.remove(key);
                Ok(None)
            }
            Err(e) => Err(CacheError::Storage(e)),
        }
    }

    /// Writes the payload, evicts if needed, then updates the index.
    ///
    /// Backend writes and deletes happen before the index changes, so any
    /// failure returns with the index and the surviving files untouched.
    async fn store(
        &self,
        inner: &mut Inner<B::Handle>,
        key: Fingerprint,
        bytes: Bytes,
    ) -> Result<(), CacheError> {
        let handle = self.backend.write(&key, &bytes).await?;

        if let Some(victim) = inner.index.victim_for(&key) {
            if let Some(victim_handle) = inner.index.peek(victim) {
                if let Err(e) = self.backend.remove(victim_handle).await {
                    tracing::error!("Failed to evict key={}: {}", victim, e);
                    if let Err(cleanup) = self.backend.remove(&handle).await {
                        tracing::warn!("Failed to roll back write for key={}: {}", key, cleanup);
                    }
                    return Err(CacheError::Storage(e));
                }
            }
        }

        if let Some((evicted, _)) = inner.index.insert(key, handle) {
            tracing::debug!("Evicted cache entry: key={}", evicted);
        }
        Ok(())
    }

    async fn get_serialized(
        &self,
        request: &TransformRequest,
        headers: HeaderMap,
        key: Fingerprint,
    ) -> Result<Bytes, CacheError> {
        let mut inner = self.inner.lock().await;
        if let Some(bytes) = self.lookup(&mut inner, &key).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::info!("Cache hit for key={}", key);
            return Ok(bytes);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Cache miss for key={}, fetching from {}", key, request.source_url());
        let bytes = self.fetcher.fetch(request, headers).await?;
        self.store(&mut inner, key, bytes.clone()).await?;
        Ok(bytes)
    }

    /// The first miss for a key publishes a shared fetch; later misses for
    /// the same key await it. Whichever waiter finishes first stores the
    /// result, so a cancelled leader does not lose it.
    async fn get_coalesced(
        &self,
        request: &TransformRequest,
        headers: HeaderMap,
        key: Fingerprint,
    ) -> Result<Bytes, CacheError> {
        let pending = {
            let mut inner = self.inner.lock().await;
            if let Some(bytes) = self.lookup(&mut inner, &key).await? {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Cache hit for key={}", key);
                return Ok(bytes);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);

            match inner.in_flight.get(&key) {
                Some(pending) => {
                    tracing::debug!("Joining in-flight fetch for key={}", key);
                    pending.clone()
                }
                None => {
                    tracing::info!("Cache miss for key={}, fetching from {}", key, request.source_url());
                    let fetcher = Arc::clone(&self.fetcher);
                    let req = request.clone();
                    let fut: InFlight = async move { fetcher.fetch(&req, headers).await }
                        .boxed()
                        .shared();
                    inner.in_flight.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let result = pending.clone().await;

        let mut inner = self.inner.lock().await;
        let registered = inner
            .in_flight
            .get(&key)
            .is_some_and(|f| f.ptr_eq(&pending));
        if registered {
            inner.in_flight.remove(&key);
            if let Ok(bytes) = &result {
                self.store(&mut inner, key, bytes.clone()).await?;
            }
        }
        result.map_err(CacheError::from)
    }
}

#[async_trait::async_trait]
impl<B: Backend> Cache for LruCache<B> {
    async fn get(
        &self,
        request: &TransformRequest,
        headers: HeaderMap,
    ) -> Result<Bytes, CacheError> {
        let key = Fingerprint::of(request);
        match self.strategy {
            MissStrategy::Serialized => self.get_serialized(request, headers, key).await,
            MissStrategy::Coalesced => self.get_coalesced(request, headers, key).await,
        }
    }

    async fn put(&self, key: Fingerprint, bytes: Bytes) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().await;
        self.store(&mut inner, key, bytes).await
    }

    /// Removes entries oldest first. On a failed delete the remaining
    /// entries, including the failed one, stay indexed.
    async fn clear(&self) -> Result<usize, CacheError> {
        let mut inner = self.inner.lock().await;
        let mut removed = 0;
        while let Some(key) = inner.index.oldest().cloned() {
            if let Some(handle) = inner.index.peek(&key) {
                self.backend.remove(handle).await?;
            }
            inner.index.remove(&key);
            removed += 1;
        }
        tracing::info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.index.len(),
            capacity: inner.index.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
