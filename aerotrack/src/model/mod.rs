//! Core aircraft state types.
//!
//! The wire carries partial observations, so every scalar except the ICAO
//! identity is optional - `None` means "never reported", which is distinct
//! from a reported zero. [`Aircraft`] doubles as the live record and the
//! partial update: parsers produce an `Aircraft` with only the observed
//! fields set, and [`Aircraft::merge`] folds it into the live record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geo;

/// Fixed receiver location used for derived distance and bearing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReceiverLocation {
    pub lat: f64,
    pub lon: f64,
}

/// One historical position of an aircraft.
///
/// Trail points are kept in memory (bounded) and appended to the durable
/// position history whenever a live position changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Registry record for an airframe, fetched from the external registry
/// service and cached in the `faa_registry` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Live state of one tracked aircraft, keyed by its ICAO24 address.
///
/// # Invariants
///
/// - `lat` and `lon` are present together or absent together
/// - `squawk`, when present, is four characters drawn from 0-7
/// - `trail` is bounded by the tracker's configured length, oldest first
/// - `last_seen` never decreases while the aircraft is live
#[derive(Debug, Clone, Serialize)]
pub struct Aircraft {
    pub icao: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsign: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aircraft_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_gnss_ft: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_kt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_ground: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_nm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing_cardinal: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<TrailPoint>,
    pub last_seen: DateTime<Utc>,
}

impl Aircraft {
    /// Create an empty record for `icao` observed at `last_seen`.
    pub fn new(icao: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            icao: icao.into(),
            callsign: None,
            registration: None,
            aircraft_type: None,
            operator: None,
            lat: None,
            lon: None,
            alt_ft: None,
            alt_gnss_ft: None,
            speed_kt: None,
            heading: None,
            vertical_rate: None,
            squawk: None,
            on_ground: None,
            rssi: None,
            distance_nm: None,
            bearing: None,
            bearing_cardinal: None,
            trail: Vec::new(),
            last_seen,
        }
    }

    /// True when both coordinates are present.
    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    /// Fold a partial update into this record.
    ///
    /// Fields absent from the update preserve the existing values; present
    /// fields overwrite. Position is all-or-nothing: the update's lat/lon
    /// are only taken when both are present. `last_seen` always advances to
    /// the update's timestamp.
    pub fn merge(&mut self, update: &Aircraft) {
        if update.callsign.is_some() {
            self.callsign = update.callsign.clone();
        }
        if update.lat.is_some() && update.lon.is_some() {
            self.lat = update.lat;
            self.lon = update.lon;
        }
        if update.alt_ft.is_some() {
            self.alt_ft = update.alt_ft;
        }
        if update.alt_gnss_ft.is_some() {
            self.alt_gnss_ft = update.alt_gnss_ft;
        }
        if update.speed_kt.is_some() {
            self.speed_kt = update.speed_kt;
        }
        if update.heading.is_some() {
            self.heading = update.heading;
        }
        if update.vertical_rate.is_some() {
            self.vertical_rate = update.vertical_rate;
        }
        if update.squawk.is_some() {
            self.squawk = update.squawk.clone();
        }
        if update.on_ground.is_some() {
            self.on_ground = update.on_ground;
        }
        if update.rssi.is_some() {
            self.rssi = update.rssi;
        }
        self.last_seen = update.last_seen;
    }

    /// Recompute distance, bearing, and cardinal from the receiver.
    ///
    /// No-op when either the receiver location or the position is unknown;
    /// previously derived values are kept in that case.
    pub fn update_derived(&mut self, rx: Option<&ReceiverLocation>) {
        let (Some(rx), Some(lat), Some(lon)) = (rx, self.lat, self.lon) else {
            return;
        };

        let dist = geo::haversine_nm(rx.lat, rx.lon, lat, lon);
        self.distance_nm = Some((dist * 10.0).round() / 10.0);

        let bearing = geo::initial_bearing(rx.lat, rx.lon, lat, lon).round();
        self.bearing = Some(bearing);
        self.bearing_cardinal = Some(geo::cardinal(bearing));
    }

    /// Current position as a trail point, if one is known.
    pub fn trail_point(&self) -> Option<TrailPoint> {
        Some(TrailPoint {
            lat: self.lat?,
            lon: self.lon?,
            alt_ft: self.alt_ft,
            speed_kt: self.speed_kt,
            heading: self.heading,
            timestamp: self.last_seen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn base_aircraft() -> Aircraft {
        let mut ac = Aircraft::new("A0A96C", ts(0));
        ac.callsign = Some("AAL123".to_string());
        ac.lat = Some(33.0);
        ac.lon = Some(-97.0);
        ac.alt_ft = Some(35_000);
        ac.speed_kt = Some(450.0);
        ac.squawk = Some("1200".to_string());
        ac
    }

    #[test]
    fn test_merge_absent_fields_preserve_existing() {
        let mut ac = base_aircraft();
        let mut update = Aircraft::new("A0A96C", ts(5));
        update.alt_ft = Some(36_000);

        ac.merge(&update);

        assert_eq!(ac.alt_ft, Some(36_000));
        assert_eq!(ac.callsign.as_deref(), Some("AAL123"));
        assert_eq!(ac.lat, Some(33.0));
        assert_eq!(ac.speed_kt, Some(450.0));
        assert_eq!(ac.squawk.as_deref(), Some("1200"));
        assert_eq!(ac.last_seen, ts(5));
    }

    #[test]
    fn test_merge_present_fields_overwrite() {
        let mut ac = base_aircraft();
        let mut update = Aircraft::new("A0A96C", ts(5));
        update.callsign = Some("AAL124".to_string());
        update.squawk = Some("7700".to_string());
        update.on_ground = Some(false);

        ac.merge(&update);

        assert_eq!(ac.callsign.as_deref(), Some("AAL124"));
        assert_eq!(ac.squawk.as_deref(), Some("7700"));
        assert_eq!(ac.on_ground, Some(false));
    }

    #[test]
    fn test_merge_position_is_all_or_nothing() {
        let mut ac = base_aircraft();
        let mut update = Aircraft::new("A0A96C", ts(5));
        update.lat = Some(34.0); // no matching lon

        ac.merge(&update);

        assert_eq!(ac.lat, Some(33.0));
        assert_eq!(ac.lon, Some(-97.0));
    }

    #[test]
    fn test_merge_absent_squawk_does_not_clear() {
        let mut ac = base_aircraft();
        let update = Aircraft::new("A0A96C", ts(5));

        ac.merge(&update);

        assert_eq!(ac.squawk.as_deref(), Some("1200"));
    }

    #[test]
    fn test_update_derived_distance_and_bearing() {
        let rx = ReceiverLocation {
            lat: 33.2878,
            lon: -96.9826,
        };
        let mut ac = Aircraft::new("A0A96C", ts(0));
        ac.lat = Some(33.1234);
        ac.lon = Some(-96.7890);

        ac.update_derived(Some(&rx));

        let dist = ac.distance_nm.unwrap();
        assert!((dist - 13.9).abs() < 0.11, "distance {}", dist);
        let bearing = ac.bearing.unwrap();
        assert!((134.0..=136.0).contains(&bearing), "bearing {}", bearing);
        assert_eq!(ac.bearing_cardinal, Some("SE"));
    }

    #[test]
    fn test_update_derived_without_receiver_is_noop() {
        let mut ac = base_aircraft();
        ac.update_derived(None);
        assert!(ac.distance_nm.is_none());
        assert!(ac.bearing.is_none());
    }

    #[test]
    fn test_serialize_skips_absent_fields() {
        let ac = Aircraft::new("ABC123", ts(0));
        let json = serde_json::to_value(&ac).unwrap();

        assert_eq!(json["icao"], "ABC123");
        assert!(json.get("callsign").is_none());
        assert!(json.get("lat").is_none());
        assert!(json.get("trail").is_none());
        assert!(json.get("last_seen").is_some());
    }

    #[test]
    fn test_trail_point_requires_position() {
        let mut ac = Aircraft::new("ABC123", ts(0));
        assert!(ac.trail_point().is_none());

        ac.lat = Some(33.0);
        ac.lon = Some(-97.0);
        ac.alt_ft = Some(10_000);
        let pt = ac.trail_point().unwrap();
        assert_eq!(pt.lat, 33.0);
        assert_eq!(pt.alt_ft, Some(10_000));
        assert_eq!(pt.timestamp, ts(0));
    }
}
