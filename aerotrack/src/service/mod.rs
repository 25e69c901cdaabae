//! Service orchestration.
//!
//! Builds every component from the resolved configuration, wires them
//! together, and runs them as tasks under one cancellation token. Each
//! component registers with the readiness map when its main loop starts;
//! shutdown cancels the token and joins every task, giving the HTTP
//! server a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{self, AppState, Hub};
use crate::config::{normalize_http_addr, Config, ConfigError};
use crate::db::{Database, DbConfig, SessionStats};
use crate::feed::{FeedClient, FeedConfig, FeedError, FeedFormat};
use crate::flight::FlightTracker;
use crate::health::{HealthMonitor, Readiness};
use crate::range::RangeTracker;
use crate::registry::RegistryClient;
use crate::tracker::{Tracker, TrackerConfig};
use crate::webhook::WebhookDispatcher;

/// Grace period for in-flight HTTP requests on shutdown.
const HTTP_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
/// Cadence of the session-stats checkpoint.
const SESSION_SAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Errors that abort startup. Everything else degrades and logs.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run the full service until `shutdown` is cancelled.
pub async fn run(config: Config, no_db: bool, shutdown: CancellationToken) -> Result<(), ServiceError> {
    let feed_format: FeedFormat = config.feed_format.parse()?;
    let stale_timeout = config.stale_timeout()?;
    let receiver = config.receiver();

    // The store is optional: a failed connection degrades to in-memory
    // operation rather than aborting startup.
    let db = if no_db || config.database.host.is_empty() {
        info!("Running without database");
        None
    } else {
        let db_config = DbConfig {
            host: config.database.host.clone(),
            port: config.database.port,
            user: config.database.user.clone(),
            password: config.database.password.clone(),
            dbname: config.database.dbname.clone(),
            sslmode: config.database.sslmode.clone(),
        };
        match Database::connect(&db_config).await {
            Ok(db) => {
                if let Err(e) = db.migrate().await {
                    warn!(error = %e, "Database migration failed");
                }
                Some(Arc::new(db))
            }
            Err(e) => {
                warn!(error = %e, "Database connection failed, running without persistence");
                None
            }
        }
    };

    let webhooks = if config.webhooks.enabled() {
        info!("Webhooks enabled");
        Some(Arc::new(WebhookDispatcher::new(config.webhooks.clone())))
    } else {
        None
    };

    let health = Arc::new(HealthMonitor::new(
        config.webhooks.health_thresholds,
        webhooks.clone(),
    ));
    let readiness = Arc::new(Readiness::new());

    let range = Arc::new(RangeTracker::new(db.clone()));
    range.load().await;
    let flights = Arc::new(FlightTracker::new(db.clone()));
    let registry = Arc::new(RegistryClient::new(db.clone()));

    let mut tracker = Tracker::new(TrackerConfig {
        stale_timeout,
        trail_length: config.trail_length,
        receiver,
        ..Default::default()
    });
    if let Some(db) = &db {
        tracker = tracker.with_db(Arc::clone(db));
    }
    tracker = tracker
        .with_registry(Arc::clone(&registry))
        .with_range(Arc::clone(&range))
        .with_flights(Arc::clone(&flights));
    if let Some(hooks) = &webhooks {
        tracker = tracker.with_webhooks(Arc::clone(hooks));
    }
    let tracker = Arc::new(tracker);

    let feed_client = FeedClient::new(
        FeedConfig {
            host: config.sbs_host.clone(),
            port: config.sbs_port,
            format: feed_format,
            receiver,
            ..Default::default()
        },
        Arc::clone(&tracker),
    );
    let feed_stats = feed_client.stats();

    let hub = Arc::new(Hub::new(Arc::clone(&tracker)));

    let state = AppState {
        tracker: Arc::clone(&tracker),
        db: db.clone(),
        feed: feed_stats,
        health: Arc::clone(&health),
        range: Arc::clone(&range),
        webhooks: webhooks.clone(),
        readiness: Arc::clone(&readiness),
        hub: Arc::clone(&hub),
        node_name: if config.node_name.is_empty() {
            None
        } else {
            Some(config.node_name.clone())
        },
    };
    let router = api::router(state);

    let http_addr = normalize_http_addr(&config.http_addr);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .map_err(|e| ServiceError::Bind {
            addr: http_addr.clone(),
            source: e,
        })?;

    info!(
        http_addr = %http_addr,
        feed = format!("{}:{} ({})", config.sbs_host, config.sbs_port, feed_format),
        persistence = db.is_some(),
        "aerotrack starting"
    );

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if let Some(hooks) = webhooks.clone() {
        let token = shutdown.clone();
        spawn_component("webhooks", &readiness, &mut handles, async move {
            hooks.run(token).await;
        });
    }

    {
        let health = Arc::clone(&health);
        let token = shutdown.clone();
        spawn_component("health_monitor", &readiness, &mut handles, async move {
            health.run(token).await;
        });
    }

    {
        let token = shutdown.clone();
        spawn_component("feed_client", &readiness, &mut handles, async move {
            feed_client.run(token).await;
        });
    }

    {
        let tracker = Arc::clone(&tracker);
        let token = shutdown.clone();
        spawn_component("tracker", &readiness, &mut handles, async move {
            tracker.run(token).await;
        });
    }

    {
        let hub = Arc::clone(&hub);
        let token = shutdown.clone();
        spawn_component("hub", &readiness, &mut handles, async move {
            hub.run(token).await;
        });
    }

    if let Some(db) = db.clone() {
        let tracker = Arc::clone(&tracker);
        let token = shutdown.clone();
        spawn_component("session_stats", &readiness, &mut handles, async move {
            session_stats_saver(db, tracker, token).await;
        });
    }

    let http_handle = {
        readiness.mark_not_ready("http_server", "starting");
        let readiness = Arc::clone(&readiness);
        let token = shutdown.clone();
        let fatal = shutdown.clone();
        tokio::spawn(async move {
            readiness.mark_ready("http_server");
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                warn!(error = %e, "HTTP server error");
                fatal.cancel();
            }
            readiness.mark_not_ready("http_server", "");
        })
    };

    shutdown.cancelled().await;
    info!("Shutting down");

    if tokio::time::timeout(HTTP_SHUTDOWN_DEADLINE, http_handle)
        .await
        .is_err()
    {
        warn!("HTTP server did not stop within the grace period");
    }
    for handle in handles {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Spawn a component task bracketed by readiness transitions.
fn spawn_component(
    name: &'static str,
    readiness: &Arc<Readiness>,
    handles: &mut Vec<JoinHandle<()>>,
    fut: impl std::future::Future<Output = ()> + Send + 'static,
) {
    readiness.mark_not_ready(name, "starting");
    let readiness = Arc::clone(readiness);
    handles.push(tokio::spawn(async move {
        readiness.mark_ready(name);
        info!(component = name, "Component running");
        fut.await;
        readiness.mark_not_ready(name, "");
        info!(component = name, "Component stopped");
    }));
}

/// Periodically checkpoint session counters, and once more on shutdown.
async fn session_stats_saver(db: Arc<Database>, tracker: Arc<Tracker>, shutdown: CancellationToken) {
    let session_start = Utc::now();
    let mut interval = tokio::time::interval(SESSION_SAVE_INTERVAL);
    interval.tick().await; // immediate first tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => save_session(&db, &tracker, session_start).await,
        }
    }
    save_session(&db, &tracker, session_start).await;
}

async fn save_session(db: &Database, tracker: &Tracker, session_start: chrono::DateTime<Utc>) {
    let stats = tracker.stats();
    let record = SessionStats {
        total_seen: stats.total_seen as i64,
        max_range_nm: stats.max_range_nm,
        max_range_icao: stats.max_range_icao,
        session_start,
        last_save: Utc::now(),
    };
    if let Err(e) = db.save_session_stats(&record).await {
        warn!(error = %e, "Failed to save session stats");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_and_clean_shutdown() {
        let config = Config {
            http_addr: "127.0.0.1:0".to_string(),
            // Point the feed at a port nothing listens on; the client
            // just backs off until shutdown.
            sbs_port: 1,
            ..Default::default()
        };

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { run(config, true, token).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("service must stop after cancellation")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bad_feed_format_is_fatal() {
        let config = Config {
            feed_format: "uat".to_string(),
            ..Default::default()
        };
        let result = run(config, true, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Feed(_))));
    }

    #[tokio::test]
    async fn test_bad_stale_timeout_is_fatal() {
        let config = Config {
            stale_timeout: "sixty".to_string(),
            ..Default::default()
        };
        let result = run(config, true, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let config = Config {
            http_addr: addr.to_string(),
            ..Default::default()
        };
        let result = run(config, true, CancellationToken::new()).await;
        assert!(matches!(result, Err(ServiceError::Bind { .. })));
    }
}
