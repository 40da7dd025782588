//! # Civic Link Client
//!
//! Runs the client data layer headless: connects the push channel, warms the
//! fetch cache and logs what arrives.
//!
//! ## Usage
//! ```text
//! civic-client [path/to/client.toml]
//!
//! RUST_LOG=civic_sync=debug CIVIC_TIER=1 civic-client
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use civic_sync::{
    ClientConfig, ConnectionEvent, ConnectionManager, DataKind, ErrorReporter, EventKind,
    FetchCache, FetchEvent, HttpLoader, ReporterEvent, SqlitePersistence, TokioScheduler,
    WsConnector,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    info!("Starting Civic Link client...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ClientConfig::load(config_path).context("loading client configuration")?;
    let endpoint = config.connection.resolve_endpoint()?;
    info!(
        endpoint = %endpoint,
        tier = config.connection.tier,
        api_base = %config.fetch.base_url,
        "Configuration loaded"
    );

    // Error reporter first, so everything after it can report
    let reporter = match &config.errors.database_path {
        Some(path) => {
            let persistence = SqlitePersistence::open(path)
                .await
                .with_context(|| format!("opening error log at {}", path.display()))?;
            ErrorReporter::with_persistence(config.reporter_config(), Arc::new(persistence)).await
        }
        None => ErrorReporter::new(config.reporter_config()),
    };
    reporter.install_panic_hook();
    reporter.subscribe(|event| {
        if let ReporterEvent::Error(record) = event {
            debug!(id = %record.id, source = %record.source, "Error recorded");
        }
    });

    // Pull side
    let loader = HttpLoader::new(&config.fetch.base_url, config.fetch.request_timeout())?;
    let cache = FetchCache::new(Arc::new(loader), reporter.clone(), config.fetch_cache_config());
    cache.subscribe(|event| match event {
        FetchEvent::Loaded { key, attempts } => info!(key = %key, attempts, "Resource loaded"),
        FetchEvent::Error { key, error, stale_served } => {
            warn!(key = %key, error = %error, stale_served, "Resource load failed")
        }
        other => debug!(event = other.name(), "Fetch event"),
    });

    // Push side
    let manager = ConnectionManager::new(
        Arc::new(WsConnector::new(config.connection.connect_timeout())),
        Arc::new(TokioScheduler::new()),
        reporter.clone(),
        config.connection_options(),
    )?;
    register_listeners(&manager);

    for entry in &config.fetch.prefetch {
        cache.prefetch(&entry.key, &entry.source, config.fetch.default_options());
    }

    manager.connect(
        endpoint.as_str(),
        i64::from(config.connection.tier),
        config.connection.credential.clone(),
        config.connection.subscriptions.clone(),
    )?;

    shutdown_signal().await;

    manager.disconnect();
    let stats = cache.stats();
    info!(
        requests = stats.requests,
        hit_rate = stats.hit_rate,
        errors = reporter.len(),
        "Client shutdown complete"
    );
    Ok(())
}

fn register_listeners(manager: &ConnectionManager) {
    manager.on(EventKind::Open, |_| info!("Push channel open"));

    manager.on(EventKind::AuthOk, |event| {
        if let ConnectionEvent::AuthOk {
            tier, delay_hours, ..
        } = event
        {
            info!(tier = %tier, delay_hours, "Authenticated");
        }
    });

    manager.on(EventKind::Close, |event| {
        if let ConnectionEvent::Close { reason, intentional } = event {
            info!(reason = ?reason, intentional, "Push channel closed");
        }
    });

    manager.on(EventKind::Error, |event| {
        if let ConnectionEvent::Error { message } = event {
            warn!(message = %message, "Push channel error");
        }
    });

    for kind in DataKind::ALL {
        manager.on(kind.into(), |event| {
            if let ConnectionEvent::Data { kind, data } = event {
                info!(kind = %kind, bytes = data.to_string().len(), "Data received");
            }
        });
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
