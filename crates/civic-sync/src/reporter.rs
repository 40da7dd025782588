//! # Error Reporter
//!
//! The single surface every failure in the client ends up on.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  report() / wrap() / try_or_fallback()        panic hook                │
//! │  ConnectionManager, FetchCache                spawn_monitored()         │
//! │            │                                        │                   │
//! │            └──────────────────┬─────────────────────┘                   │
//! │                               ▼                                         │
//! │             ┌──────────────────────────────────┐                        │
//! │             │ bounded log (max_errors, FIFO)   │──► listeners (isolated)│
//! │             └────────────────┬─────────────────┘                        │
//! │                              │ last persist_limit records               │
//! │                              ▼                                          │
//! │             ┌──────────────────────────────────┐                        │
//! │             │ writer task (one per reporter)   │──► ErrorPersistence    │
//! │             └──────────────────────────────────┘                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `report()` never fails and never panics. Persistence is best-effort: the
//! writer logs a failed save and moves on.

use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use civic_core::record::summarize_chain;
use civic_core::{ErrorContext, ErrorRecord, ErrorSource, CONTEXT_COMPONENT, CONTEXT_TYPE};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::event_bus::{panic_message, ListenerId, ListenerSet};
use crate::persistence::ErrorPersistence;

/// Cause-chain links kept in `stack_summary`.
const CHAIN_DEPTH: usize = 8;

// =============================================================================
// Configuration & Events
// =============================================================================

/// Reporter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    /// Records kept in memory. Oldest are evicted first.
    pub max_errors: usize,

    /// Records forwarded to persistence (the most recent ones).
    pub persist_limit: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig {
            max_errors: 50,
            persist_limit: 20,
        }
    }
}

/// Delivered to reporter subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ReporterEvent {
    /// A record was appended.
    Error(ErrorRecord),
    /// The log was cleared.
    Clear,
}

/// Summary of the in-memory log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReporterStats {
    pub total: usize,
    pub last_24h: usize,
    /// Keyed by `context.component`; records without one count as `"unknown"`.
    pub by_component: BTreeMap<String, usize>,
}

// =============================================================================
// Error Reporter
// =============================================================================

struct Inner {
    config: ReporterConfig,
    log: Mutex<VecDeque<ErrorRecord>>,
    listeners: ListenerSet<ReporterEvent>,
    writer: Option<mpsc::UnboundedSender<Vec<ErrorRecord>>>,
}

/// Bounded error log with capture helpers.
///
/// Cheap to clone; clones share one log.
///
/// ## Usage
/// ```rust,ignore
/// let reporter = ErrorReporter::with_persistence(config, Arc::new(store)).await;
/// reporter.install_panic_hook();
///
/// let parse = reporter.wrap(|s: &str| s.parse::<u32>(), context("component", "filters"));
/// let limit = reporter.try_or_fallback(|| load_limit(), 100, context("component", "filters"));
/// ```
#[derive(Clone)]
pub struct ErrorReporter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("persistent", &self.inner.writer.is_some())
            .finish()
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(ReporterConfig::default())
    }
}

impl ErrorReporter {
    /// Creates a memory-only reporter. Does not need a runtime.
    pub fn new(config: ReporterConfig) -> Self {
        Self::build(config, VecDeque::new(), None)
    }

    /// Creates a reporter backed by `persistence`.
    ///
    /// Previously stored records are loaded first; a failed load is logged and
    /// the reporter starts empty. Spawns the writer task, so this must run
    /// inside a tokio runtime.
    pub async fn with_persistence(
        config: ReporterConfig,
        persistence: Arc<dyn ErrorPersistence>,
    ) -> Self {
        let mut log: VecDeque<ErrorRecord> = match persistence.load().await {
            Ok(records) => {
                info!(count = records.len(), "Loaded persisted error log");
                records.into()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load persisted error log, starting empty");
                VecDeque::new()
            }
        };
        while log.len() > config.max_errors {
            log.pop_front();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(persistence, rx));

        Self::build(config, log, Some(tx))
    }

    fn build(
        config: ReporterConfig,
        log: VecDeque<ErrorRecord>,
        writer: Option<mpsc::UnboundedSender<Vec<ErrorRecord>>>,
    ) -> Self {
        ErrorReporter {
            inner: Arc::new(Inner {
                config,
                log: Mutex::new(log),
                listeners: ListenerSet::new("reporter"),
                writer,
            }),
        }
    }

    // =========================================================================
    // Reporting
    // =========================================================================

    /// Records `error` with its cause chain. Returns the record id.
    pub fn report(&self, error: &(dyn std::error::Error + 'static), context: ErrorContext) -> String {
        self.report_with_source(error, context, ErrorSource::Reported)
    }

    /// Records a plain message. Returns the record id.
    pub fn report_message(&self, message: impl Into<String>, context: ErrorContext) -> String {
        let message = message.into();
        self.record(message.clone(), message, context, ErrorSource::Reported)
    }

    fn report_with_source(
        &self,
        error: &(dyn std::error::Error + 'static),
        context: ErrorContext,
        source: ErrorSource,
    ) -> String {
        self.record(
            error.to_string(),
            summarize_chain(error, CHAIN_DEPTH),
            context,
            source,
        )
    }

    fn record(
        &self,
        message: String,
        stack_summary: String,
        context: ErrorContext,
        source: ErrorSource,
    ) -> String {
        let record = self.append(message, stack_summary, context, source);
        let id = record.id.clone();
        self.notify(&ReporterEvent::Error(record));
        id
    }

    /// Appends to the log and queues the persisted suffix. Never calls listeners.
    fn append(
        &self,
        message: String,
        stack_summary: String,
        context: ErrorContext,
        source: ErrorSource,
    ) -> ErrorRecord {
        let record = ErrorRecord::new(message, stack_summary, context, source);

        {
            let mut log = self.inner.log.lock();
            log.push_back(record.clone());
            while log.len() > self.inner.config.max_errors {
                log.pop_front();
            }
            // Queued under the lock so snapshots reach the writer in log order
            if let Some(writer) = &self.inner.writer {
                let skip = log.len().saturating_sub(self.inner.config.persist_limit);
                let suffix = log.iter().skip(skip).cloned().collect::<Vec<_>>();
                if writer.send(suffix).is_err() {
                    debug!("Error log writer has stopped");
                }
            }
        }

        warn!(
            id = %record.id,
            component = record.component().unwrap_or("unknown"),
            source = %record.source,
            message = %record.message,
            "Error reported"
        );
        record
    }

    fn notify(&self, event: &ReporterEvent) {
        let _guard = NotifyGuard::enter();
        self.inner.listeners.emit(event);
    }

    // =========================================================================
    // Capture Helpers
    // =========================================================================

    /// Wraps `f` so every `Err` it returns is reported, then passed through.
    ///
    /// Functions of several arguments take a tuple.
    pub fn wrap<A, T, E, F>(&self, f: F, context: ErrorContext) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        let reporter = self.clone();
        move |arg| {
            let result = f(arg);
            if let Err(ref e) = result {
                reporter.report(e, context.clone());
            }
            result
        }
    }

    /// Async form of [`ErrorReporter::wrap`].
    pub fn wrap_async<A, T, E, F, Fut>(
        &self,
        f: F,
        context: ErrorContext,
    ) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let reporter = self.clone();
        move |arg| {
            let fut = f(arg);
            let reporter = reporter.clone();
            let context = context.clone();
            async move {
                let result = fut.await;
                if let Err(ref e) = result {
                    reporter.report(e, context);
                }
                result
            }
            .boxed()
        }
    }

    /// Runs `f`; on `Err` or panic reports it and returns `fallback`.
    pub fn try_or_fallback<T, E, F>(&self, f: F, fallback: T, context: ErrorContext) -> T
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        self.try_or_none(f, context).unwrap_or(fallback)
    }

    /// Runs `f`; on `Err` or panic reports it and returns `None`.
    pub fn try_or_none<T, E, F>(&self, f: F, context: ErrorContext) -> Option<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + 'static,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.report(&e, context);
                None
            }
            Err(panic) => {
                self.report_message(format!("panic: {}", panic_message(panic.as_ref())), context);
                None
            }
        }
    }

    /// Async form of [`ErrorReporter::try_or_fallback`].
    pub async fn try_or_fallback_async<T, E, Fut>(
        &self,
        fut: Fut,
        fallback: T,
        context: ErrorContext,
    ) -> T
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.report(&e, context);
                fallback
            }
            Err(panic) => {
                self.report_message(format!("panic: {}", panic_message(panic.as_ref())), context);
                fallback
            }
        }
    }

    // =========================================================================
    // Global Hooks
    // =========================================================================

    /// Reports every panic in the process with `type = "uncaught"`.
    ///
    /// The record is appended from inside the hook; subscribers are notified
    /// from a spawned task when the panicking thread is inside a tokio runtime,
    /// and not at all otherwise. The previously installed hook still runs
    /// afterwards.
    pub fn install_panic_hook(&self) {
        let reporter = self.clone();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let message = panic_message(info.payload());
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_default();

            let mut context = ErrorContext::new();
            context.insert(CONTEXT_TYPE.to_string(), ErrorSource::Uncaught.as_str().to_string());
            if !location.is_empty() {
                context.insert("location".to_string(), location.clone());
            }
            let record = reporter.append(message, location, context, ErrorSource::Uncaught);

            // A listener panicking inside the hook would abort the process, so
            // listeners hear about the panic from a task instead. Panics raised
            // by reporter listeners themselves are logged but not re-announced.
            if !NotifyGuard::active() {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let reporter = reporter.clone();
                    runtime.spawn(async move {
                        reporter.notify(&ReporterEvent::Error(record));
                    });
                }
            }

            previous(info);
        }));
        info!("Panic hook installed");
    }

    /// Spawns `fut`, reporting an `Err` or panic with `type = "unhandled-async"`.
    ///
    /// The handle resolves to `Some(value)` on success.
    pub fn spawn_monitored<T, E, F>(&self, label: impl Into<String>, fut: F) -> JoinHandle<Option<T>>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let reporter = self.clone();
        let label = label.into();
        tokio::spawn(async move {
            let mut context = ErrorContext::new();
            context.insert(
                CONTEXT_TYPE.to_string(),
                ErrorSource::UnhandledAsync.as_str().to_string(),
            );
            context.insert("task".to_string(), label);

            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(e)) => {
                    reporter.report_with_source(&e, context, ErrorSource::UnhandledAsync);
                    None
                }
                Err(panic) => {
                    let message = format!("panic: {}", panic_message(panic.as_ref()));
                    reporter.record(message.clone(), message, context, ErrorSource::UnhandledAsync);
                    None
                }
            }
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Records whose context contains every `filter` entry, oldest first.
    pub fn errors(&self, filter: &ErrorContext) -> Vec<ErrorRecord> {
        self.inner
            .log
            .lock()
            .iter()
            .filter(|r| r.matches(filter))
            .cloned()
            .collect()
    }

    /// Every record, oldest first.
    pub fn all(&self) -> Vec<ErrorRecord> {
        self.inner.log.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties the log and the persisted copy.
    pub fn clear(&self) {
        {
            let mut log = self.inner.log.lock();
            log.clear();
            if let Some(writer) = &self.inner.writer {
                let _ = writer.send(Vec::new());
            }
        }
        info!("Error log cleared");
        self.notify(&ReporterEvent::Clear);
    }

    pub fn stats(&self) -> ReporterStats {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let log = self.inner.log.lock();

        let mut stats = ReporterStats {
            total: log.len(),
            ..Default::default()
        };
        for record in log.iter() {
            if record.timestamp >= cutoff {
                stats.last_24h += 1;
            }
            let component = record
                .context
                .get(CONTEXT_COMPONENT)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_component.entry(component).or_default() += 1;
        }
        stats
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    pub fn subscribe(&self, listener: impl Fn(&ReporterEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}

thread_local! {
    static NOTIFYING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running reporter listeners.
struct NotifyGuard {
    previous: bool,
}

impl NotifyGuard {
    fn enter() -> Self {
        NotifyGuard {
            previous: NOTIFYING.with(|flag| flag.replace(true)),
        }
    }

    fn active() -> bool {
        NOTIFYING.with(Cell::get)
    }
}

impl Drop for NotifyGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        NOTIFYING.with(|flag| flag.set(previous));
    }
}

/// Builds a context map from pairs.
pub fn context<I, K, V>(pairs: I) -> ErrorContext
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

async fn writer_loop(
    persistence: Arc<dyn ErrorPersistence>,
    mut rx: mpsc::UnboundedReceiver<Vec<ErrorRecord>>,
) {
    while let Some(mut suffix) = rx.recv().await {
        // Each message is a full snapshot; only the newest matters.
        while let Ok(newer) = rx.try_recv() {
            suffix = newer;
        }
        match persistence.save(&suffix).await {
            Ok(()) => debug!(count = suffix.len(), "Error log saved"),
            Err(e) => warn!(error = %e, "Failed to persist error log"),
        }
    }
    debug!("Error log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("parse failed: {0}")]
    struct ParseFailure(String);

    fn reporter(max_errors: usize) -> ErrorReporter {
        ErrorReporter::new(ReporterConfig {
            max_errors,
            persist_limit: 2,
        })
    }

    #[test]
    fn test_fifo_eviction() {
        let reporter = reporter(3);
        for i in 0..5 {
            reporter.report_message(format!("error {}", i), ErrorContext::new());
        }

        let messages: Vec<_> = reporter.all().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["error 2", "error 3", "error 4"]);
    }

    #[test]
    fn test_wrap_reports_and_passes_through() {
        let reporter = reporter(10);
        let parse = reporter.wrap(
            |s: &str| s.parse::<u32>().map_err(|e| ParseFailure(e.to_string())),
            context([("component", "filters")]),
        );

        assert_eq!(parse("42").unwrap(), 42);
        assert!(parse("x").is_err());
        assert_eq!(reporter.len(), 1);
        assert_eq!(reporter.all()[0].component(), Some("filters"));
    }

    #[test]
    fn test_try_or_fallback_catches_err_and_panic() {
        let reporter = reporter(10);

        let value = reporter.try_or_fallback(
            || Err::<u32, _>(ParseFailure("bad".into())),
            7,
            context([("component", "a")]),
        );
        assert_eq!(value, 7);

        let value: Option<u32> = reporter.try_or_none(
            || -> Result<u32, ParseFailure> { panic!("exploded") },
            context([("component", "b")]),
        );
        assert_eq!(value, None);

        let ok = reporter.try_or_fallback(|| Ok::<_, ParseFailure>(1), 0, ErrorContext::new());
        assert_eq!(ok, 1);

        assert_eq!(reporter.len(), 2);
        assert!(reporter.all()[1].message.contains("exploded"));
    }

    #[test]
    fn test_errors_filter_and_stats() {
        let reporter = reporter(10);
        reporter.report_message("a", context([("component", "fetch"), ("key", "stats")]));
        reporter.report_message("b", context([("component", "fetch"), ("key", "map")]));
        reporter.report_message("c", context([("component", "connection")]));
        reporter.report_message("d", ErrorContext::new());

        assert_eq!(reporter.errors(&context([("component", "fetch")])).len(), 2);
        assert_eq!(reporter.errors(&context([("key", "map")])).len(), 1);

        let stats = reporter.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.last_24h, 4);
        assert_eq!(stats.by_component.get("fetch"), Some(&2));
        assert_eq!(stats.by_component.get("unknown"), Some(&1));
    }

    #[test]
    fn test_listener_panic_is_isolated() {
        let reporter = reporter(10);
        let seen = Arc::new(AtomicUsize::new(0));

        reporter.subscribe(|_| panic!("bad listener"));
        let s = seen.clone();
        reporter.subscribe(move |event| {
            if matches!(event, ReporterEvent::Error(_) | ReporterEvent::Clear) {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        reporter.report_message("x", ErrorContext::new());
        reporter.clear();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(reporter.is_empty());
    }

    #[test]
    fn test_cause_chain_in_stack_summary() {
        #[derive(Debug, thiserror::Error)]
        #[error("load failed")]
        struct Outer(#[source] ParseFailure);

        let reporter = reporter(10);
        reporter.report(&Outer(ParseFailure("bad digit".into())), ErrorContext::new());
        assert_eq!(
            reporter.all()[0].stack_summary,
            "load failed ← parse failed: bad digit"
        );
    }

    #[tokio::test]
    async fn test_persistence_receives_suffix_and_clear() {
        let store = Arc::new(MemoryPersistence::new());
        let reporter = ErrorReporter::with_persistence(
            ReporterConfig {
                max_errors: 10,
                persist_limit: 2,
            },
            store.clone(),
        )
        .await;

        for m in ["a", "b", "c"] {
            reporter.report_message(m, ErrorContext::new());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let saved: Vec<_> = store.snapshot().into_iter().map(|r| r.message).collect();
        assert_eq!(saved, vec!["b", "c"]);

        reporter.clear();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_persisted_copy_matches_log_under_concurrent_clear() {
        let store = Arc::new(MemoryPersistence::new());
        let reporter = ErrorReporter::with_persistence(
            ReporterConfig {
                max_errors: 10,
                persist_limit: 3,
            },
            store.clone(),
        )
        .await;

        let writers: Vec<_> = (0..2)
            .map(|t| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        if (i + t) % 7 == 0 {
                            reporter.clear();
                        } else {
                            reporter.report_message(format!("{}-{}", t, i), ErrorContext::new());
                        }
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let in_memory: Vec<_> = reporter.all().into_iter().rev().take(3).rev().map(|r| r.id).collect();
        let persisted: Vec<_> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(persisted, in_memory);
    }

    #[tokio::test]
    async fn test_with_persistence_loads_existing() {
        let existing: Vec<_> = (0..5)
            .map(|i| ErrorRecord::new(format!("old {}", i), "", ErrorContext::new(), ErrorSource::Reported))
            .collect();
        let store = Arc::new(MemoryPersistence::with_records(existing));

        let reporter = ErrorReporter::with_persistence(
            ReporterConfig {
                max_errors: 3,
                persist_limit: 3,
            },
            store,
        )
        .await;
        let messages: Vec<_> = reporter.all().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["old 2", "old 3", "old 4"]);
    }

    #[tokio::test]
    async fn test_spawn_monitored_reports_failures() {
        let reporter = reporter(10);

        let ok = reporter.spawn_monitored("ok", async { Ok::<_, ParseFailure>(5) });
        assert_eq!(ok.await.unwrap(), Some(5));

        let failed =
            reporter.spawn_monitored("refresh", async { Err::<(), _>(ParseFailure("gone".into())) });
        assert_eq!(failed.await.unwrap(), None);

        let record = &reporter.all()[0];
        assert_eq!(record.source, ErrorSource::UnhandledAsync);
        assert_eq!(record.context.get("type").map(String::as_str), Some("unhandled-async"));
        assert_eq!(record.context.get("task").map(String::as_str), Some("refresh"));
    }

    #[tokio::test]
    async fn test_wrap_async() {
        let reporter = reporter(10);
        let load = reporter.wrap_async(
            |n: u32| async move {
                if n > 3 {
                    Err(ParseFailure(format!("{} too large", n)))
                } else {
                    Ok(n)
                }
            },
            context([("component", "loader")]),
        );

        assert_eq!(load(2).await.unwrap(), 2);
        assert!(load(9).await.is_err());
        assert_eq!(reporter.errors(&context([("component", "loader")])).len(), 1);
    }
}
