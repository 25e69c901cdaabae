//! Compact Position Reporting (CPR) decoding.
//!
//! ADS-B position messages carry 17-bit encoded latitude/longitude plus an
//! odd/even flag instead of real coordinates. Two decode strategies exist:
//!
//! - **Locally referenced**: with a known nearby position (the aircraft's
//!   last decode, or the configured receiver location) a single frame is
//!   enough. The result is rejected if it lands more than 180 nm from the
//!   reference.
//! - **Globally referenced**: an even and an odd frame received within ten
//!   seconds of each other resolve the position unambiguously, provided
//!   both fall in the same longitude-zone band. The result is rejected if
//!   a receiver reference exists and it lands more than 300 nm away.
//!
//! The decoder keeps the latest even and odd frame per aircraft plus the
//! last successful decode (which becomes the next local reference), and
//! sweeps entries whose frames have all aged out.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::geo;

/// 2^17, the CPR coordinate scale.
const CPR_SCALE: f64 = 131_072.0;
/// Maximum age spread for a global (paired-frame) decode.
const PAIR_WINDOW: Duration = Duration::from_secs(10);
/// Frames older than this are swept from the per-aircraft cache.
const FRAME_TTL: Duration = Duration::from_secs(60);
/// Local decodes further than this from the reference are rejected.
const LOCAL_MAX_NM: f64 = 180.0;
/// Global decodes further than this from the receiver are rejected.
const GLOBAL_MAX_NM: f64 = 300.0;
/// Number of latitude zones per hemisphere.
const NZ: f64 = 15.0;

#[derive(Debug, Clone, Copy)]
struct CprFrame {
    lat: u32,
    lon: u32,
    received: Instant,
}

#[derive(Default)]
struct CprState {
    /// Latest [even, odd] frame per ICAO.
    frames: HashMap<String, [Option<CprFrame>; 2]>,
    /// Last successful decode per ICAO, used as the local reference.
    last_pos: HashMap<String, (f64, f64)>,
    /// Receiver location, if configured.
    reference: Option<(f64, f64)>,
}

/// Thread-safe CPR decoder shared by the Beast decode path.
pub struct CprDecoder {
    state: Mutex<CprState>,
}

impl CprDecoder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CprState::default()),
        }
    }

    /// Set the receiver location used as a decode reference and sanity
    /// bound.
    pub fn set_reference(&self, lat: f64, lon: f64) {
        self.state.lock().unwrap().reference = Some((lat, lon));
    }

    /// Feed one position frame; returns the decoded position if this
    /// frame resolved one.
    pub fn add_frame(&self, icao: &str, cpr_lat: u32, cpr_lon: u32, odd: bool) -> Option<(f64, f64)> {
        self.add_frame_at(icao, cpr_lat, cpr_lon, odd, Instant::now())
    }

    fn add_frame_at(
        &self,
        icao: &str,
        cpr_lat: u32,
        cpr_lon: u32,
        odd: bool,
        now: Instant,
    ) -> Option<(f64, f64)> {
        let mut state = self.state.lock().unwrap();

        let entry = state.frames.entry(icao.to_string()).or_default();
        entry[usize::from(odd)] = Some(CprFrame {
            lat: cpr_lat,
            lon: cpr_lon,
            received: now,
        });

        // Prefer the aircraft's own last decode as reference, falling back
        // to the receiver location.
        let local_ref = state.last_pos.get(icao).copied().or(state.reference);

        if let Some((ref_lat, ref_lon)) = local_ref {
            if let Some(pos) = decode_local(cpr_lat, cpr_lon, odd, ref_lat, ref_lon) {
                state.last_pos.insert(icao.to_string(), pos);
                return Some(pos);
            }
        }

        let frames = state.frames.get(icao)?;
        let (even, odd_frame) = (frames[0]?, frames[1]?);

        if now.duration_since(even.received) > PAIR_WINDOW
            || now.duration_since(odd_frame.received) > PAIR_WINDOW
        {
            return None;
        }

        let pos = decode_global(even.lat, even.lon, odd_frame.lat, odd_frame.lon, odd)?;

        if let Some((ref_lat, ref_lon)) = state.reference {
            if geo::quick_distance_nm(ref_lat, ref_lon, pos.0, pos.1) > GLOBAL_MAX_NM {
                return None;
            }
        }

        state.last_pos.insert(icao.to_string(), pos);
        Some(pos)
    }

    /// Drop aircraft whose frames have all aged past the TTL.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut state = self.state.lock().unwrap();
        let stale: Vec<String> = state
            .frames
            .iter()
            .filter(|(_, frames)| {
                frames
                    .iter()
                    .flatten()
                    .all(|f| now.duration_since(f.received) >= FRAME_TTL)
            })
            .map(|(icao, _)| icao.clone())
            .collect();

        for icao in stale {
            state.frames.remove(&icao);
            state.last_pos.remove(&icao);
        }
    }
}

impl Default for CprDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-frame decode against a nearby reference position.
fn decode_local(cpr_lat: u32, cpr_lon: u32, odd: bool, ref_lat: f64, ref_lon: f64) -> Option<(f64, f64)> {
    let lat_cpr = f64::from(cpr_lat) / CPR_SCALE;
    let lon_cpr = f64::from(cpr_lon) / CPR_SCALE;

    let d_lat = if odd { 360.0 / 59.0 } else { 360.0 / 60.0 };

    let j = (ref_lat / d_lat).floor() + (0.5 + mod_pos(ref_lat, d_lat) / d_lat - lat_cpr).floor();
    let lat = d_lat * (j + lat_cpr);
    if !(-90.0..=90.0).contains(&lat) {
        return None;
    }

    let nl_val = if odd { nl(lat) - 1 } else { nl(lat) }.max(1);

    let d_lon = 360.0 / f64::from(nl_val);
    let m = (ref_lon / d_lon).floor() + (0.5 + mod_pos(ref_lon, d_lon) / d_lon - lon_cpr).floor();
    let mut lon = d_lon * (m + lon_cpr);
    if lon > 180.0 {
        lon -= 360.0;
    }
    if lon < -180.0 {
        lon += 360.0;
    }

    if geo::quick_distance_nm(ref_lat, ref_lon, lat, lon) > LOCAL_MAX_NM {
        return None;
    }

    Some((lat, lon))
}

/// Paired even/odd decode; `use_odd` selects which frame was received
/// last and therefore which latitude/longitude formulas apply.
fn decode_global(even_lat: u32, even_lon: u32, odd_lat: u32, odd_lon: u32, use_odd: bool) -> Option<(f64, f64)> {
    let lat_even = f64::from(even_lat) / CPR_SCALE;
    let lat_odd = f64::from(odd_lat) / CPR_SCALE;
    let lon_even = f64::from(even_lon) / CPR_SCALE;
    let lon_odd = f64::from(odd_lon) / CPR_SCALE;

    let j = (59.0 * lat_even - 60.0 * lat_odd + 0.5).floor();

    let mut lat_e = (360.0 / 60.0) * (mod_pos(j, 60.0) + lat_even);
    let mut lat_o = (360.0 / 59.0) * (mod_pos(j, 59.0) + lat_odd);
    if lat_e >= 270.0 {
        lat_e -= 360.0;
    }
    if lat_o >= 270.0 {
        lat_o -= 360.0;
    }

    // Both candidate latitudes must fall in the same longitude-zone band,
    // otherwise the two frames straddle a zone boundary and cannot be
    // combined.
    let nl_e = nl(lat_e);
    let nl_o = nl(lat_o);
    if nl_e != nl_o {
        return None;
    }

    let (lat, lon) = if use_odd {
        let ni = f64::from((nl_o - 1).max(1));
        let m = (lon_even * f64::from(nl_o - 1) - lon_odd * f64::from(nl_o) + 0.5).floor();
        (lat_o, (360.0 / ni) * (mod_pos(m, ni) + lon_odd))
    } else {
        let ni = f64::from(nl_e.max(1));
        let m = (lon_even * f64::from(nl_e - 1) - lon_odd * f64::from(nl_e) + 0.5).floor();
        (lat_e, (360.0 / ni) * (mod_pos(m, ni) + lon_even))
    };

    let lon = if lon >= 180.0 { lon - 360.0 } else { lon };

    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    Some((lat, lon))
}

/// Number of longitude zones at a latitude: 59 at the equator, shrinking
/// to 2 at ±87° and 1 beyond.
fn nl(lat: f64) -> i32 {
    if lat == 0.0 {
        return 59;
    }
    if lat.abs() == 87.0 {
        return 2;
    }
    if lat.abs() > 87.0 {
        return 1;
    }

    let a = 1.0 - (std::f64::consts::PI / (2.0 * NZ)).cos();
    let b = lat.to_radians().cos().powi(2);
    let x = (1.0 - a / b).clamp(-1.0, 1.0);

    (2.0 * std::f64::consts::PI / x.acos()).floor() as i32
}

/// Euclidean-style modulus that is always non-negative.
fn mod_pos(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r < 0.0 {
        r + b
    } else {
        r
    }
}
