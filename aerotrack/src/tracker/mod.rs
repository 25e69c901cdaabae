//! Authoritative in-memory aircraft state.
//!
//! The tracker owns the live aircraft map and everything derived from it.
//! Partial records from the wire parsers are merged under a single write
//! lock; observers (HTTP handlers, the WebSocket hub) take the read lock
//! and deep-copy. All I/O - persistence, registry enrichment, webhooks -
//! happens after the lock is released, through bounded queues that drop
//! on overflow rather than stall the ingest path.
//!
//! ```text
//!                 ┌─────────────────────────────────────────┐
//!  Update ──────► │ RwLock<aircraft map>                    │──► events (broadcast)
//!                 │  merge · motion filter · trail · range  │──► persistence queue (N workers)
//!                 └─────────────────────────────────────────┘──► registry queue (1 worker)
//!                        ▲ 10 s staleness sweep                 ──► webhook dispatcher
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::flight::FlightTracker;
use crate::geo;
use crate::model::{Aircraft, ReceiverLocation, RegistryInfo, TrailPoint};
use crate::range::RangeTracker;
use crate::registry::RegistryClient;
use crate::webhook::{self, WebhookDispatcher};

const DEFAULT_PERSISTENCE_WORKERS: usize = 4;
const DEFAULT_PERSISTENCE_QUEUE: usize = 512;
const DEFAULT_REGISTRY_QUEUE: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Fastest civilian ground speed the motion filter will believe.
const MAX_PLAUSIBLE_SPEED_KT: f64 = 800.0;
/// Slack factor on top of the speed ceiling.
const MOTION_SLACK: f64 = 1.5;
/// Floor on the plausible distance so low-rate updates are not rejected.
const MOTION_FLOOR_NM: f64 = 5.0;

/// Kind of change carried by an [`AircraftEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Remove,
}

/// One state-change notification. Serializes to the wire shape consumed
/// by WebSocket clients: `{"event": "...", "aircraft": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct AircraftEvent {
    pub event: EventKind,
    pub aircraft: Aircraft,
}

/// Session counters reported by `/api/v1/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    pub aircraft_count: usize,
    pub total_seen: u64,
    pub max_range_nm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_range_icao: Option<String>,
}

/// Filters for [`Tracker::search`]; text filters are case-insensitive
/// substring matches, combined with AND.
#[derive(Debug, Default, Clone)]
pub struct SearchFilters {
    pub callsign: Option<String>,
    pub aircraft_type: Option<String>,
    pub registration: Option<String>,
    pub bounds: Option<Bounds>,
}

/// Geographic bounding box, min corner to max corner.
#[derive(Debug, Clone, Copy)]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

#[derive(Debug)]
enum PersistTask {
    Aircraft(Aircraft),
    Position(Aircraft),
}

/// Tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Aircraft not observed for this long are evicted.
    pub stale_timeout: Duration,
    /// Maximum trail points retained per aircraft.
    pub trail_length: usize,
    /// Receiver location for derived distance/bearing.
    pub receiver: Option<ReceiverLocation>,
    pub persistence_workers: usize,
    pub persistence_queue: usize,
    pub registry_queue: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            stale_timeout: Duration::from_secs(60),
            trail_length: 50,
            receiver: None,
            persistence_workers: DEFAULT_PERSISTENCE_WORKERS,
            persistence_queue: DEFAULT_PERSISTENCE_QUEUE,
            registry_queue: DEFAULT_REGISTRY_QUEUE,
        }
    }
}

struct State {
    aircraft: HashMap<String, Aircraft>,
    total_seen: u64,
    max_range_nm: f64,
    max_range_icao: Option<String>,
}

/// The live aircraft map and its workers. Construct with [`Tracker::new`],
/// attach collaborators with the `with_*` builders, wrap in an `Arc`, and
/// drive the background work with [`Tracker::run`].
pub struct Tracker {
    config: TrackerConfig,
    state: RwLock<State>,
    events_tx: broadcast::Sender<AircraftEvent>,

    db: Option<Arc<Database>>,
    registry: Option<Arc<RegistryClient>>,
    webhooks: Option<Arc<WebhookDispatcher>>,
    range: Option<Arc<RangeTracker>>,
    flights: Option<Arc<FlightTracker>>,

    persist_tx: Option<mpsc::Sender<PersistTask>>,
    persist_rx: Mutex<Option<mpsc::Receiver<PersistTask>>>,
    registry_tx: Option<mpsc::Sender<String>>,
    registry_rx: Mutex<Option<mpsc::Receiver<String>>>,
    registry_pending: Mutex<HashSet<String>>,

    shutting_down: AtomicBool,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        if let Some(rx) = config.receiver {
            info!(lat = rx.lat, lon = rx.lon, "Receiver location configured");
        }
        Self {
            config,
            state: RwLock::new(State {
                aircraft: HashMap::new(),
                total_seen: 0,
                max_range_nm: 0.0,
                max_range_icao: None,
            }),
            events_tx,
            db: None,
            registry: None,
            webhooks: None,
            range: None,
            flights: None,
            persist_tx: None,
            persist_rx: Mutex::new(None),
            registry_tx: None,
            registry_rx: Mutex::new(None),
            registry_pending: Mutex::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Attach the durable store and create the persistence queue.
    pub fn with_db(mut self, db: Arc<Database>) -> Self {
        let (tx, rx) = mpsc::channel(self.config.persistence_queue);
        self.db = Some(db);
        self.persist_tx = Some(tx);
        *self.persist_rx.get_mut().unwrap() = Some(rx);
        self
    }

    /// Attach the registry client and create the enrichment queue.
    pub fn with_registry(mut self, registry: Arc<RegistryClient>) -> Self {
        let (tx, rx) = mpsc::channel(self.config.registry_queue);
        self.registry = Some(registry);
        self.registry_tx = Some(tx);
        *self.registry_rx.get_mut().unwrap() = Some(rx);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<WebhookDispatcher>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }

    pub fn with_range(mut self, range: Arc<RangeTracker>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_flights(mut self, flights: Arc<FlightTracker>) -> Self {
        self.flights = Some(flights);
        self
    }

    /// Subscribe to add/update/remove events. Slow subscribers lag and
    /// lose old events; they are never able to block the tracker.
    pub fn subscribe(&self) -> broadcast::Receiver<AircraftEvent> {
        self.events_tx.subscribe()
    }

    /// Merge one partial record into the live map.
    ///
    /// Empty-ICAO records are silently ignored. Never fails: every
    /// downstream effect is a non-blocking enqueue or a logged error.
    pub async fn update(&self, mut update: Aircraft) {
        if update.icao.is_empty() {
            return;
        }

        let mut events: Vec<AircraftEvent> = Vec::new();
        let mut save_aircraft: Option<Aircraft> = None;
        let mut save_position: Option<Aircraft> = None;
        let mut side_snapshot: Option<Aircraft> = None;
        let mut webhook_check: Option<(Aircraft, bool)> = None;
        let mut registry_request: Option<String> = None;
        let mut added: Option<String> = None;

        {
            let mut guard = self.state.write().unwrap();
            let State {
                aircraft,
                total_seen,
                max_range_nm,
                max_range_icao,
            } = &mut *guard;

            if let Some(existing) = aircraft.get_mut(&update.icao) {
                let old_squawk = existing.squawk.clone();
                let old_lat = existing.lat;
                let old_lon = existing.lon;
                let old_alt = existing.alt_ft;
                let old_speed = existing.speed_kt;
                let old_heading = existing.heading;
                let old_time = existing.last_seen;

                if !position_plausible(existing, &update, old_time) {
                    update.lat = None;
                    update.lon = None;
                }

                existing.merge(&update);
                existing.update_derived(self.config.receiver.as_ref());

                let pos_changed = old_lat != existing.lat || old_lon != existing.lon;
                if pos_changed && existing.has_position() {
                    if let Some(pt) = existing.trail_point() {
                        existing.trail.push(pt);
                        if existing.trail.len() > self.config.trail_length {
                            let excess = existing.trail.len() - self.config.trail_length;
                            existing.trail.drain(..excess);
                        }
                    }
                }

                let snapshot = existing.clone();

                if let Some(dist) = snapshot.distance_nm {
                    if dist > *max_range_nm {
                        *max_range_nm = dist;
                        *max_range_icao = Some(snapshot.icao.clone());
                        info!(distance_nm = dist, icao = %snapshot.icao, "New session max range");
                    }
                }

                if pos_changed && snapshot.has_position() {
                    save_position = Some(snapshot.clone());
                }
                if pos_changed
                    || old_alt != snapshot.alt_ft
                    || old_speed != snapshot.speed_kt
                    || old_heading != snapshot.heading
                {
                    save_aircraft = Some(snapshot.clone());
                    events.push(AircraftEvent {
                        event: EventKind::Update,
                        aircraft: snapshot.clone(),
                    });
                }
                if snapshot.squawk != old_squawk {
                    webhook_check = Some((snapshot.clone(), false));
                }
                if self.needs_enrichment(&snapshot) {
                    registry_request = Some(snapshot.icao.clone());
                }
                side_snapshot = Some(snapshot);
            } else {
                let mut ac = update;
                ac.update_derived(self.config.receiver.as_ref());
                if let Some(pt) = ac.trail_point() {
                    ac.trail.push(pt);
                }
                *total_seen += 1;

                if let Some(dist) = ac.distance_nm {
                    if dist > *max_range_nm {
                        *max_range_nm = dist;
                        *max_range_icao = Some(ac.icao.clone());
                    }
                }

                let snapshot = ac.clone();
                aircraft.insert(ac.icao.clone(), ac);

                events.push(AircraftEvent {
                    event: EventKind::Add,
                    aircraft: snapshot.clone(),
                });
                save_aircraft = Some(snapshot.clone());
                webhook_check = Some((snapshot.clone(), true));
                if self.needs_enrichment(&snapshot) {
                    registry_request = Some(snapshot.icao.clone());
                }
                added = Some(snapshot.icao.clone());
                side_snapshot = Some(snapshot);
            }
        }

        for event in events {
            let _ = self.events_tx.send(event);
        }
        if let Some(ac) = save_aircraft {
            self.queue_persist(PersistTask::Aircraft(ac));
        }
        if let Some(ac) = save_position {
            self.queue_persist(PersistTask::Position(ac));
        }
        if let Some(snapshot) = side_snapshot {
            if let Some(range) = &self.range {
                if let (Some(bearing), Some(dist)) = (snapshot.bearing, snapshot.distance_nm) {
                    range.record(bearing, dist, &snapshot.icao);
                }
            }
            if let Some(flights) = &self.flights {
                flights.update(&snapshot).await;
            }
        }
        if let Some((snapshot, is_new)) = webhook_check {
            self.check_webhooks(&snapshot, is_new);
        }
        if let Some(icao) = registry_request {
            self.schedule_enrichment(icao);
        }
        if let Some(icao) = added {
            debug!(icao = %icao, "Aircraft added");
        }
    }

    fn check_webhooks(&self, ac: &Aircraft, is_new: bool) {
        let Some(hooks) = &self.webhooks else {
            return;
        };

        if is_new {
            hooks.send_new_aircraft(ac);
        }
        if let Some(squawk) = &ac.squawk {
            if webhook::is_emergency_squawk(squawk) {
                info!(icao = %ac.icao, squawk = %squawk, "Emergency squawk detected");
                hooks.send_emergency(ac);
            }
        }
        if let Some(pattern) = hooks.watchlist_match(ac) {
            info!(icao = %ac.icao, pattern = %pattern, "Watchlist match");
            hooks.send_watchlist_match(ac, &pattern);
        }
    }

    fn needs_enrichment(&self, ac: &Aircraft) -> bool {
        self.registry.is_some()
            && (ac.registration.is_none() || ac.aircraft_type.is_none() || ac.operator.is_none())
    }

    fn queue_persist(&self, task: PersistTask) {
        let Some(tx) = &self.persist_tx else {
            return;
        };
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(task)) = tx.try_send(task) {
            let icao = match &task {
                PersistTask::Aircraft(ac) | PersistTask::Position(ac) => &ac.icao,
            };
            warn!(icao = %icao, "Persistence queue full, dropping save");
        }
    }

    fn schedule_enrichment(&self, icao: String) {
        let Some(tx) = &self.registry_tx else {
            return;
        };
        if self.shutting_down.load(Ordering::Relaxed) {
            return;
        }

        {
            let mut pending = self.registry_pending.lock().unwrap();
            if !pending.insert(icao.clone()) {
                return;
            }
        }

        if let Err(mpsc::error::TrySendError::Full(icao)) = tx.try_send(icao) {
            self.registry_pending.lock().unwrap().remove(&icao);
            warn!(icao = %icao, "Registry lookup queue full, dropping request");
        }
    }

    /// Merge registry results for a live aircraft, emitting an UPDATE if
    /// anything changed.
    async fn apply_registry_info(&self, icao: &str, info: &RegistryInfo) {
        let snapshot = {
            let mut guard = self.state.write().unwrap();
            let Some(ac) = guard.aircraft.get_mut(icao) else {
                return;
            };

            let mut updated = false;
            if info.registration.is_some() && ac.registration != info.registration {
                ac.registration = info.registration.clone();
                updated = true;
            }
            if info.aircraft_type.is_some() && ac.aircraft_type != info.aircraft_type {
                ac.aircraft_type = info.aircraft_type.clone();
                updated = true;
            }
            let operator = info.operator.clone().or_else(|| info.owner.clone());
            if operator.is_some() && ac.operator != operator {
                ac.operator = operator;
                updated = true;
            }

            if !updated {
                return;
            }
            ac.clone()
        };

        self.queue_persist(PersistTask::Aircraft(snapshot.clone()));
        if let Some(flights) = &self.flights {
            flights.update(&snapshot).await;
        }
        let _ = self.events_tx.send(AircraftEvent {
            event: EventKind::Update,
            aircraft: snapshot,
        });
    }

    /// Snapshot of one aircraft.
    pub fn get(&self, icao: &str) -> Option<Aircraft> {
        self.state.read().unwrap().aircraft.get(icao).cloned()
    }

    /// Deep-copied snapshot of every live aircraft.
    pub fn get_all(&self) -> Vec<Aircraft> {
        self.state.read().unwrap().aircraft.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.state.read().unwrap().aircraft.len()
    }

    pub fn receiver_location(&self) -> Option<ReceiverLocation> {
        self.config.receiver
    }

    /// Trail for a live aircraft, falling back to the durable position
    /// history once it has been evicted.
    pub async fn get_trail(&self, icao: &str) -> Result<Vec<TrailPoint>, crate::db::DbError> {
        {
            let guard = self.state.read().unwrap();
            if let Some(ac) = guard.aircraft.get(icao) {
                if !ac.trail.is_empty() {
                    return Ok(ac.trail.clone());
                }
            }
        }

        match &self.db {
            Some(db) => db.position_history(icao, self.config.trail_length as i64).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn search(&self, filters: &SearchFilters) -> Vec<Aircraft> {
        self.state
            .read()
            .unwrap()
            .aircraft
            .values()
            .filter(|ac| matches_filters(ac, filters))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> TrackerStats {
        let guard = self.state.read().unwrap();
        TrackerStats {
            aircraft_count: guard.aircraft.len(),
            total_seen: guard.total_seen,
            max_range_nm: guard.max_range_nm,
            max_range_icao: guard.max_range_icao.clone(),
        }
    }

    /// Drive the staleness sweep and the background workers until the
    /// token is cancelled, then drain and join everything.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut workers = Vec::new();

        if let Some(rx) = self.persist_rx.lock().unwrap().take() {
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            for _ in 0..self.config.persistence_workers.max(1) {
                let tracker = Arc::clone(&self);
                let rx = Arc::clone(&rx);
                let shutdown = shutdown.clone();
                workers.push(tokio::spawn(async move {
                    tracker.persistence_worker(rx, shutdown).await;
                }));
            }
        }

        if let Some(rx) = self.registry_rx.lock().unwrap().take() {
            let tracker = Arc::clone(&self);
            let shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                tracker.registry_worker(rx, shutdown).await;
            }));
        }

        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.sweep_stale().await,
            }
        }

        self.shutting_down.store(true, Ordering::Relaxed);
        for worker in workers {
            let _ = worker.await;
        }
        info!("Tracker stopped");
    }

    async fn persistence_worker(
        &self,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PersistTask>>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let task = tokio::select! {
                _ = shutdown.cancelled() => break,
                task = async { rx.lock().await.recv().await } => task,
            };
            match task {
                None => break,
                Some(task) => self.handle_persist(task).await,
            }
        }
    }

    async fn handle_persist(&self, task: PersistTask) {
        let Some(db) = &self.db else {
            return;
        };
        match task {
            PersistTask::Aircraft(ac) => {
                if let Err(e) = db.save_aircraft(&ac).await {
                    warn!(icao = %ac.icao, error = %e, "Failed to save aircraft");
                }
            }
            PersistTask::Position(ac) => {
                if let Err(e) = db.save_position(&ac).await {
                    warn!(icao = %ac.icao, error = %e, "Failed to save position");
                }
            }
        }
    }

    async fn registry_worker(&self, mut rx: mpsc::Receiver<String>, shutdown: CancellationToken) {
        let Some(registry) = self.registry.clone() else {
            return;
        };
        loop {
            let icao = tokio::select! {
                _ = shutdown.cancelled() => break,
                icao = rx.recv() => icao,
            };
            let Some(icao) = icao else { break };

            let info = registry.lookup(&icao).await;
            self.registry_pending.lock().unwrap().remove(&icao);
            if let Some(info) = info {
                self.apply_registry_info(&icao, &info).await;
            }
        }
    }

    async fn sweep_stale(&self) {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.config.stale_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let candidates: Vec<String> = {
            let guard = self.state.read().unwrap();
            guard
                .aircraft
                .iter()
                .filter(|(_, ac)| now - ac.last_seen > stale_after)
                .map(|(icao, _)| icao.clone())
                .collect()
        };
        if candidates.is_empty() {
            return;
        }

        let mut removed = Vec::new();
        {
            let mut guard = self.state.write().unwrap();
            for icao in candidates {
                // Re-check under the write lock: the aircraft may have
                // been updated between the scan and now.
                let still_stale = guard
                    .aircraft
                    .get(&icao)
                    .is_some_and(|ac| now - ac.last_seen > stale_after);
                if still_stale {
                    if let Some(ac) = guard.aircraft.remove(&icao) {
                        removed.push(ac);
                    }
                }
            }
        }

        for ac in removed {
            info!(icao = %ac.icao, "Aircraft removed (stale)");
            let icao = ac.icao.clone();
            let _ = self.events_tx.send(AircraftEvent {
                event: EventKind::Remove,
                aircraft: ac,
            });
            if let Some(flights) = &self.flights {
                flights.complete_stale(&icao).await;
            }
        }
    }
}

/// Reject positions implying an implausible speed since the last fix.
///
/// ADS-B bit errors occasionally produce wildly wrong coordinates; a jump
/// beyond what the fastest civilian aircraft could cover (with slack)
/// means the new position is noise.
fn position_plausible(existing: &Aircraft, update: &Aircraft, old_time: DateTime<Utc>) -> bool {
    let (Some(new_lat), Some(new_lon)) = (update.lat, update.lon) else {
        return true;
    };
    let (Some(old_lat), Some(old_lon)) = (existing.lat, existing.lon) else {
        return true;
    };

    let elapsed = ((update.last_seen - old_time).num_milliseconds() as f64 / 1000.0).max(1.0);
    let dist = geo::quick_distance_nm(old_lat, old_lon, new_lat, new_lon);
    let ceiling = (MAX_PLAUSIBLE_SPEED_KT / 3600.0 * elapsed * MOTION_SLACK).max(MOTION_FLOOR_NM);

    if dist > ceiling {
        warn!(
            icao = %update.icao,
            distance_nm = format!("{:.1}", dist),
            elapsed_secs = format!("{:.1}", elapsed),
            max_nm = format!("{:.1}", ceiling),
            "Position jump rejected"
        );
        return false;
    }
    true
}

fn matches_filters(ac: &Aircraft, f: &SearchFilters) -> bool {
    fn contains(haystack: &Option<String>, needle: &str) -> bool {
        haystack
            .as_deref()
            .is_some_and(|h| h.to_lowercase().contains(&needle.to_lowercase()))
    }

    if let Some(callsign) = &f.callsign {
        if !contains(&ac.callsign, callsign) {
            return false;
        }
    }
    if let Some(aircraft_type) = &f.aircraft_type {
        if !contains(&ac.aircraft_type, aircraft_type) {
            return false;
        }
    }
    if let Some(registration) = &f.registration {
        if !contains(&ac.registration, registration) {
            return false;
        }
    }
    if let Some(bounds) = f.bounds {
        let (Some(lat), Some(lon)) = (ac.lat, ac.lon) else {
            return false;
        };
        if lat < bounds.min_lat || lat > bounds.max_lat || lon < bounds.min_lon || lon > bounds.max_lon
        {
            return false;
        }
    }
    true
}
