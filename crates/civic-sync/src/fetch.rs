//! # Fetch Cache
//!
//! Pull-side cache: TTL entries, one in-flight load per key, linear retry and
//! stale fallback.
//!
//! ## Fetch Decision
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  fetch(key, source, options)                                            │
//! │                                                                         │
//! │  fresh entry && !force ─────────────────────────► cached value  (hit)  │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  load already in flight for key ────────────────► await shared (dedup) │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  start shared load:                                                     │
//! │    attempt 1 ─fail─► wait 1×base ─► attempt 2 ─fail─► wait 2×base ─► …  │
//! │       │ ok                                                              │
//! │       ▼                                                                 │
//! │    store entry, return value                                            │
//! │                                                                         │
//! │  all attempts failed:                                                   │
//! │    fallback_to_stale && entry exists ───────────► stale value          │
//! │    otherwise ──────────────────────────────────► FetchError (reported) │
//! │                                                                         │
//! │  cancel token fired ───────────────────────────► Aborted               │
//! │    (no retry, cache untouched, not reported)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every caller that joins a load gets the same outcome, stale fallback
//! included. The cancel token of the caller that started the load governs it.
//! Loads run on their own task: dropping every caller's future does not stop
//! one, so the result is still stored and `is_loading` clears.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use civic_core::validation::validate_cache_key;
use civic_core::CONTEXT_COMPONENT;
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::event_bus::{panic_message, ListenerId, ListenerSet};
use crate::loader::{LoadError, ResourceLoader};
use crate::reporter::{context, ErrorReporter};
use crate::COMPONENT_FETCH;

// =============================================================================
// Options & Configuration
// =============================================================================

/// Per-call fetch options.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Retries after the first attempt.
    pub retries: u32,

    /// How long a stored value stays fresh.
    pub ttl: Duration,

    /// Skip the fresh-entry check.
    pub force: bool,

    /// Serve the last stored value if every attempt fails.
    pub fallback_to_stale: bool,

    /// Aborts the load when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            retries: 3,
            ttl: Duration::from_secs(300),
            force: false,
            fallback_to_stale: true,
            cancel: None,
        }
    }
}

impl FetchOptions {
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn fallback_to_stale(mut self, fallback: bool) -> Self {
        self.fallback_to_stale = fallback;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Cache-wide settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchCacheConfig {
    /// Wait before retry `n` is `n × retry_base_delay`.
    pub retry_base_delay: Duration,

    /// Entry limit; the oldest entry is evicted first. 0 means unlimited.
    pub max_entries: usize,
}

impl Default for FetchCacheConfig {
    fn default() -> Self {
        FetchCacheConfig {
            retry_base_delay: Duration::from_secs(1),
            max_entries: 0,
        }
    }
}

// =============================================================================
// Events & Stats
// =============================================================================

/// Delivered to cache subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    /// A new load started.
    Loading { key: String },
    /// A load succeeded and its value was stored.
    Loaded { key: String, attempts: u32 },
    /// A load failed. `stale_served` tells whether callers got the old value.
    Error {
        key: String,
        error: FetchError,
        stale_served: bool,
    },
    /// Served from a fresh entry.
    CacheHit { key: String },
    /// Joined a load already in flight.
    Deduplicated { key: String },
    /// One key (or everything, when `None`) was cleared.
    CacheClear { key: Option<String> },
}

impl FetchEvent {
    /// Event name as exposed to consumers.
    pub fn name(&self) -> &'static str {
        match self {
            FetchEvent::Loading { .. } => "loading",
            FetchEvent::Loaded { .. } => "loaded",
            FetchEvent::Error { .. } => "error",
            FetchEvent::CacheHit { .. } => "cache-hit",
            FetchEvent::Deduplicated { .. } => "deduplicated",
            FetchEvent::CacheClear { .. } => "cache-clear",
        }
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FetchStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub stale_served: u64,
    pub deduplicated: u64,
    /// `hits / requests`, 0.0 with no requests.
    pub hit_rate: f64,
    pub cache_size: usize,
    pub in_flight: usize,
}

// =============================================================================
// Fetch Cache
// =============================================================================

type SharedLoad = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedLoad>,
    requests: u64,
    hits: u64,
    misses: u64,
    errors: u64,
    stale_served: u64,
    deduplicated: u64,
}

struct Inner {
    loader: Arc<dyn ResourceLoader>,
    reporter: ErrorReporter,
    config: FetchCacheConfig,
    state: Mutex<State>,
    listeners: ListenerSet<FetchEvent>,
}

/// Deduplicating TTL cache in front of a [`ResourceLoader`].
///
/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct FetchCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// How a load ended, before cache bookkeeping.
enum LoadOutcome {
    Loaded { value: Value, attempts: u32 },
    Failed { attempts: u32, last_error: LoadError },
    Aborted,
}

impl FetchCache {
    pub fn new(
        loader: Arc<dyn ResourceLoader>,
        reporter: ErrorReporter,
        config: FetchCacheConfig,
    ) -> Self {
        FetchCache {
            inner: Arc::new(Inner {
                loader,
                reporter,
                config,
                state: Mutex::new(State::default()),
                listeners: ListenerSet::new("fetch"),
            }),
        }
    }

    /// Returns the value for `key`, loading `source` if needed.
    ///
    /// ## Errors
    /// - `InvalidKey` for an empty or oversized key
    /// - `Exhausted` when every attempt failed and no stale value was served
    /// - `Aborted` when the load's cancel token fired
    pub async fn fetch(
        &self,
        key: &str,
        source: &str,
        options: FetchOptions,
    ) -> Result<Value, FetchError> {
        validate_cache_key(key).map_err(FetchError::InvalidKey)?;

        let (shared, event) = {
            let mut state = self.inner.state.lock();
            state.requests += 1;

            if !options.force {
                if let Some(entry) = state.entries.get(key) {
                    if entry.is_fresh(Instant::now()) {
                        let value = entry.value.clone();
                        state.hits += 1;
                        drop(state);
                        debug!(key = %key, "Cache hit");
                        self.emit(FetchEvent::CacheHit { key: key.to_string() });
                        return Ok(value);
                    }
                }
            }

            if let Some(existing) = state.in_flight.get(key) {
                let shared = existing.clone();
                state.deduplicated += 1;
                (shared, FetchEvent::Deduplicated { key: key.to_string() })
            } else {
                state.misses += 1;
                let shared = Self::spawn_load(self.inner.clone(), key, source, options);
                state.in_flight.insert(key.to_string(), shared.clone());
                (shared, FetchEvent::Loading { key: key.to_string() })
            }
        };

        debug!(key = %key, event = event.name(), "Fetch");
        self.emit(event);
        shared.await
    }

    /// Fetches several resources concurrently with shared options.
    pub async fn fetch_batch(
        &self,
        requests: &[(&str, &str)],
        options: &FetchOptions,
    ) -> HashMap<String, Result<Value, FetchError>> {
        let fetches = requests.iter().map(|(key, source)| {
            let options = options.clone();
            async move { (key.to_string(), self.fetch(key, source, options).await) }
        });
        join_all(fetches).await.into_iter().collect()
    }

    /// Starts a fetch in the background and discards the result.
    pub fn prefetch(&self, key: &str, source: &str, options: FetchOptions) -> JoinHandle<()> {
        let cache = self.clone();
        let key = key.to_string();
        let source = source.to_string();
        tokio::spawn(async move {
            match cache.fetch(&key, &source, options).await {
                Ok(_) => debug!(key = %key, "Prefetched"),
                Err(e) => debug!(key = %key, error = %e, "Prefetch failed"),
            }
        })
    }

    /// Runs the load on its own task so it completes even if every caller
    /// drops its future. Callers await the shared task output.
    fn spawn_load(inner: Arc<Inner>, key: &str, source: &str, options: FetchOptions) -> SharedLoad {
        let task = {
            let key = key.to_string();
            let source = source.to_string();
            tokio::spawn(async move {
                match AssertUnwindSafe(Self::load(inner.clone(), key.clone(), source, options))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => {
                        inner.state.lock().in_flight.remove(&key);
                        let message = format!("loader panicked: {}", panic_message(panic.as_ref()));
                        warn!(key = %key, "Load task panicked");
                        Err(FetchError::Exhausted {
                            key,
                            attempts: 1,
                            last_error: LoadError::Other(message),
                        })
                    }
                }
            })
        };

        let key = key.to_string();
        async move {
            match task.await {
                Ok(result) => result,
                // Only happens when the runtime shuts down under the task
                Err(e) => {
                    debug!(key = %key, error = %e, "Load task did not finish");
                    Err(FetchError::Aborted { key })
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn load(
        inner: Arc<Inner>,
        key: String,
        source: String,
        options: FetchOptions,
    ) -> Result<Value, FetchError> {
        let outcome = Self::attempt_loads(&inner, &key, &source, &options).await;
        Self::finish(&inner, &key, &source, &options, outcome)
    }

    async fn attempt_loads(
        inner: &Inner,
        key: &str,
        source: &str,
        options: &FetchOptions,
    ) -> LoadOutcome {
        let cancel = options.cancel.clone().unwrap_or_default();
        let max_attempts = options.retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return LoadOutcome::Aborted;
            }

            if attempt > 1 {
                let delay = inner.config.retry_base_delay.saturating_mul(attempt - 1);
                debug!(key = %key, attempt, ?delay, "Waiting before retry");
                tokio::select! {
                    _ = cancel.cancelled() => return LoadOutcome::Aborted,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return LoadOutcome::Aborted,
                result = inner.loader.load(source) => result,
            };

            match result {
                Ok(value) => return LoadOutcome::Loaded { value, attempts: attempt },
                Err(e) => {
                    warn!(key = %key, source = %source, attempt, error = %e, "Load attempt failed");
                    last_error = Some(e);
                }
            }
        }

        LoadOutcome::Failed {
            attempts: max_attempts,
            last_error: last_error
                .unwrap_or_else(|| LoadError::Other("no attempt was made".to_string())),
        }
    }

    /// Applies a finished load to the cache and turns it into the shared result.
    fn finish(
        inner: &Inner,
        key: &str,
        source: &str,
        options: &FetchOptions,
        outcome: LoadOutcome,
    ) -> Result<Value, FetchError> {
        let mut state = inner.state.lock();
        state.in_flight.remove(key);

        match outcome {
            LoadOutcome::Aborted => {
                drop(state);
                debug!(key = %key, "Load aborted");
                Err(FetchError::Aborted { key: key.to_string() })
            }

            LoadOutcome::Loaded { value, attempts } => {
                Self::store(&mut state, inner.config.max_entries, key, value.clone(), options.ttl);
                drop(state);
                debug!(key = %key, attempts, "Loaded");
                inner.listeners.emit(&FetchEvent::Loaded {
                    key: key.to_string(),
                    attempts,
                });
                Ok(value)
            }

            LoadOutcome::Failed { attempts, last_error } => {
                state.errors += 1;
                let error = FetchError::Exhausted {
                    key: key.to_string(),
                    attempts,
                    last_error,
                };

                let stale = if options.fallback_to_stale {
                    state.entries.get(key).map(|entry| entry.value.clone())
                } else {
                    None
                };
                if stale.is_some() {
                    state.stale_served += 1;
                }
                drop(state);

                let stale_served = stale.is_some();
                if stale_served {
                    info!(key = %key, error = %error, "Serving stale value");
                } else {
                    inner.reporter.report(
                        &error,
                        context([
                            (CONTEXT_COMPONENT, COMPONENT_FETCH),
                            ("key", key),
                            ("source", source),
                        ]),
                    );
                }

                inner.listeners.emit(&FetchEvent::Error {
                    key: key.to_string(),
                    error: error.clone(),
                    stale_served,
                });

                stale.ok_or(error)
            }
        }
    }

    fn store(state: &mut State, max_entries: usize, key: &str, value: Value, ttl: Duration) {
        if max_entries > 0 && !state.entries.contains_key(key) && state.entries.len() >= max_entries {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                state.entries.remove(&oldest);
                debug!(evicted = %oldest, "Cache full, evicted oldest entry");
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    // =========================================================================
    // Cache Management
    // =========================================================================

    /// Removes one entry, or every entry when `key` is `None`.
    pub fn clear_cache(&self, key: Option<&str>) {
        {
            let mut state = self.inner.state.lock();
            match key {
                Some(k) => {
                    state.entries.remove(k);
                }
                None => state.entries.clear(),
            }
        }
        debug!(key = ?key, "Cache cleared");
        self.emit(FetchEvent::CacheClear {
            key: key.map(str::to_string),
        });
    }

    /// Removes entries past their TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.inner.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_fresh(now));
        before - state.entries.len()
    }

    /// Returns the value for `key` if it is fresh. No load, no events, no counters.
    pub fn get_cached(&self, key: &str) -> Option<Value> {
        let state = self.inner.state.lock();
        state
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.inner.state.lock().in_flight.contains_key(key)
    }

    /// Fraction of requests so far that are not waiting on a load.
    ///
    /// 1.0 when nothing has been requested.
    pub fn progress(&self) -> f64 {
        let state = self.inner.state.lock();
        if state.requests == 0 {
            return 1.0;
        }
        let pending = state.in_flight.len() as f64;
        let total = state.requests as f64;
        ((total - pending) / total).clamp(0.0, 1.0)
    }

    pub fn stats(&self) -> FetchStats {
        let state = self.inner.state.lock();
        FetchStats {
            requests: state.requests,
            hits: state.hits,
            misses: state.misses,
            errors: state.errors,
            stale_served: state.stale_served,
            deduplicated: state.deduplicated,
            hit_rate: if state.requests == 0 {
                0.0
            } else {
                state.hits as f64 / state.requests as f64
            },
            cache_size: state.entries.len(),
            in_flight: state.in_flight.len(),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe(&self, listener: impl Fn(&FetchEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    fn emit(&self, event: FetchEvent) {
        self.inner.listeners.emit(&event);
    }
}
