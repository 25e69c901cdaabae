//! Per-session flight aggregates.
//!
//! A flight opens when an aircraft is first observed and closes when the
//! tracker evicts it as stale. While open, every observation folds into
//! the aggregate: identity fields, peak altitude, and the cumulative
//! ground-track distance (sum of haversine segments, with a sanity
//! ceiling on any single segment so position glitches cannot add a
//! continent to the total). The open row is persisted on creation and
//! finalized with `completed = true` on closure.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::db::{Database, FlightRecord};
use crate::geo;
use crate::model::Aircraft;

/// A single position jump longer than this is treated as a glitch and
/// excluded from the ground-track total.
const MAX_SEGMENT_NM: f64 = 50.0;

/// One open flight session.
#[derive(Debug, Clone)]
pub struct ActiveFlight {
    /// Durable row id, 0 until the open row has been created.
    pub id: i64,
    pub icao: String,
    pub callsign: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub first_lat: Option<f64>,
    pub first_lon: Option<f64>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub max_alt_ft: Option<i32>,
    pub total_dist_nm: f64,
    prev_lat: Option<f64>,
    prev_lon: Option<f64>,
}

impl ActiveFlight {
    fn open(ac: &Aircraft) -> Self {
        Self {
            id: 0,
            icao: ac.icao.clone(),
            callsign: None,
            registration: None,
            aircraft_type: None,
            first_seen: ac.last_seen,
            last_seen: ac.last_seen,
            first_lat: None,
            first_lon: None,
            last_lat: None,
            last_lon: None,
            max_alt_ft: None,
            total_dist_nm: 0.0,
            prev_lat: None,
            prev_lon: None,
        }
    }

    fn absorb(&mut self, ac: &Aircraft) {
        self.last_seen = ac.last_seen;

        if ac.callsign.is_some() {
            self.callsign = ac.callsign.clone();
        }
        if ac.registration.is_some() {
            self.registration = ac.registration.clone();
        }
        if ac.aircraft_type.is_some() {
            self.aircraft_type = ac.aircraft_type.clone();
        }

        if let Some(alt) = ac.alt_ft {
            if self.max_alt_ft.is_none_or(|max| alt > max) {
                self.max_alt_ft = Some(alt);
            }
        }

        if let (Some(lat), Some(lon)) = (ac.lat, ac.lon) {
            if self.first_lat.is_none() {
                self.first_lat = Some(lat);
                self.first_lon = Some(lon);
            }

            if let (Some(prev_lat), Some(prev_lon)) = (self.prev_lat, self.prev_lon) {
                let segment = geo::haversine_nm(prev_lat, prev_lon, lat, lon);
                if segment < MAX_SEGMENT_NM {
                    self.total_dist_nm += segment;
                }
            }

            self.last_lat = Some(lat);
            self.last_lon = Some(lon);
            self.prev_lat = Some(lat);
            self.prev_lon = Some(lon);
        }
    }
}

/// Tracks one open flight per ICAO and persists transitions.
pub struct FlightTracker {
    flights: Mutex<HashMap<String, ActiveFlight>>,
    db: Option<Arc<Database>>,
}

impl FlightTracker {
    pub fn new(db: Option<Arc<Database>>) -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            db,
        }
    }

    /// Fold one observation into the aircraft's open flight, opening a
    /// new one (and persisting the open row) on first sight.
    pub async fn update(&self, ac: &Aircraft) {
        if ac.icao.is_empty() {
            return;
        }

        let mut flights = self.flights.lock().await;
        let is_new = !flights.contains_key(&ac.icao);
        let flight = flights
            .entry(ac.icao.clone())
            .or_insert_with(|| ActiveFlight::open(ac));

        flight.absorb(ac);

        if is_new {
            if let Some(db) = &self.db {
                match db.create_flight(&record_of(flight, false)).await {
                    Ok(id) => flight.id = id,
                    Err(e) => warn!(icao = %ac.icao, error = %e, "Failed to create flight row"),
                }
            }
            debug!(icao = %ac.icao, "Flight opened");
        }
    }

    /// Close and persist the flight for an aircraft the tracker evicted.
    pub async fn complete_stale(&self, icao: &str) {
        let flight = {
            let mut flights = self.flights.lock().await;
            flights.remove(icao)
        };
        let Some(flight) = flight else {
            return;
        };

        debug!(icao = %icao, total_dist_nm = flight.total_dist_nm, "Flight completed");

        if let Some(db) = &self.db {
            if flight.id > 0 {
                if let Err(e) = db.update_flight(&record_of(&flight, true)).await {
                    warn!(icao = %icao, error = %e, "Failed to finalize flight row");
                }
            }
        }
    }

    /// Number of currently open flights.
    pub async fn active_count(&self) -> usize {
        self.flights.lock().await.len()
    }

    /// Snapshot of one open flight, for tests and diagnostics.
    pub async fn get(&self, icao: &str) -> Option<ActiveFlight> {
        self.flights.lock().await.get(icao).cloned()
    }
}

fn record_of(flight: &ActiveFlight, completed: bool) -> FlightRecord {
    FlightRecord {
        id: flight.id,
        icao: flight.icao.clone(),
        callsign: flight.callsign.clone(),
        registration: flight.registration.clone(),
        aircraft_type: flight.aircraft_type.clone(),
        first_seen: flight.first_seen,
        last_seen: flight.last_seen,
        first_lat: flight.first_lat,
        first_lon: flight.first_lon,
        last_lat: flight.last_lat,
        last_lon: flight.last_lon,
        max_alt_ft: flight.max_alt_ft,
        total_dist_nm: flight.total_dist_nm,
        completed,
    }
}
