//! SBS-1 ("BaseStation") line parser.
//!
//! SBS-1 is the CSV text format most Mode-S decoders can emit on port
//! 30003. Each message is one CR/LF-delimited line of at least 22 comma
//! separated fields; only `MSG` lines carry aircraft data. The second
//! field is a transmission type 1-8 selecting which downstream fields are
//! populated:
//!
//! ```text
//! MSG,1,111,11111,AA2BC2,111111,2016/03/11,13:07:16.663,...,UAL814  ,,,,,,,,,,,0
//! MSG,3,111,11111,A04424,111111,2016/03/11,13:07:05.343,...,,11025,,,37.17274,-122.03935,,,,,,0
//! MSG,4,111,11111,AC1FCC,111111,2016/03/11,13:07:07.777,...,,,316,106,,,1536,,,,,0
//! ```
//!
//! Empty fields mean "not reported", which is distinct from zero; the
//! parser maps them to `None` so downstream merges preserve prior values.

use chrono::{DateTime, Utc};

use crate::model::Aircraft;

const IDX_MESSAGE_TYPE: usize = 0;
const IDX_TRANSMISSION: usize = 1;
const IDX_ICAO: usize = 4;
const IDX_CALLSIGN: usize = 10;
const IDX_ALTITUDE: usize = 11;
const IDX_GROUND_SPEED: usize = 12;
const IDX_TRACK: usize = 13;
const IDX_LATITUDE: usize = 14;
const IDX_LONGITUDE: usize = 15;
const IDX_VERTICAL_RATE: usize = 16;
const IDX_SQUAWK: usize = 17;
const IDX_ON_GROUND: usize = 21;
const MIN_FIELDS: usize = 22;

/// Outcome of parsing one feed line, with enough detail for the feed
/// statistics counters.
#[derive(Debug)]
pub enum SbsLine {
    /// A `MSG` line that produced a partial aircraft record.
    Msg {
        aircraft: Aircraft,
        /// Transmission type 1-8, for the per-type counters.
        msg_type: u8,
    },
    /// A well-formed line of a kind we do not track (SEL, ID, AIR, STA,
    /// CLK, or a MSG subtype without an ICAO).
    Ignored,
    /// A line that is not valid SBS-1.
    Invalid,
}

/// Parse one SBS-1 line observed at `now`.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> SbsLine {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return SbsLine::Invalid;
    }

    if fields[IDX_MESSAGE_TYPE] != "MSG" {
        return SbsLine::Ignored;
    }

    let Some(msg_type) = parse_u8(fields[IDX_TRANSMISSION]).filter(|t| (1..=8).contains(t)) else {
        return SbsLine::Invalid;
    };

    let icao = fields[IDX_ICAO].trim();
    if icao.is_empty() {
        return SbsLine::Ignored;
    }

    let mut ac = Aircraft::new(icao.to_uppercase(), now);

    let callsign = fields[IDX_CALLSIGN].trim();
    if !callsign.is_empty() {
        ac.callsign = Some(callsign.to_string());
    }

    ac.alt_ft = parse_i32(fields[IDX_ALTITUDE]);
    ac.speed_kt = parse_f64(fields[IDX_GROUND_SPEED]);
    ac.heading = parse_f64(fields[IDX_TRACK]);
    ac.lat = parse_f64(fields[IDX_LATITUDE]);
    ac.lon = parse_f64(fields[IDX_LONGITUDE]);
    ac.vertical_rate = parse_i32(fields[IDX_VERTICAL_RATE]);
    ac.squawk = parse_squawk(fields[IDX_SQUAWK]);
    ac.on_ground = parse_on_ground(fields[IDX_ON_GROUND]);

    SbsLine::Msg {
        aircraft: ac,
        msg_type,
    }
}

fn parse_u8(s: &str) -> Option<u8> {
    s.trim().parse().ok()
}

fn parse_i32(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // Some decoders emit altitudes with a decimal part.
    s.parse::<i32>().ok().or_else(|| s.parse::<f64>().ok().map(|v| v as i32))
}

fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// A squawk is exactly four octal digits; anything else is treated as
/// unreported rather than poisoning the live record.
fn parse_squawk(s: &str) -> Option<String> {
    let s = s.trim();
    if s.len() == 4 && s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        Some(s.to_string())
    } else {
        None
    }
}

/// The on-ground flag is "0", "1", or "-1" (some decoders use -1 for
/// "true" per the original BaseStation convention).
fn parse_on_ground(s: &str) -> Option<bool> {
    match s.trim() {
        "0" => Some(false),
        "1" | "-1" => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_parse_airborne_position() {
        let line = "MSG,3,111,11111,A0A96C,111111,2025-01-01,00:00:00.000,,,,37000,,,33.1234,-96.7890,,,,,,";
        let SbsLine::Msg { aircraft, msg_type } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };

        assert_eq!(msg_type, 3);
        assert_eq!(aircraft.icao, "A0A96C");
        assert_eq!(aircraft.alt_ft, Some(37_000));
        assert_eq!(aircraft.lat, Some(33.1234));
        assert_eq!(aircraft.lon, Some(-96.7890));
        assert!(aircraft.callsign.is_none());
        assert!(aircraft.speed_kt.is_none());
        assert!(aircraft.squawk.is_none());
    }

    #[test]
    fn test_parse_identification() {
        let line = "MSG,1,111,11111,AA2BC2,111111,2016/03/11,13:07:16.663,2016/03/11,13:07:16.626,UAL814  ,,,,,,,,,,,0";
        let SbsLine::Msg { aircraft, msg_type } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };

        assert_eq!(msg_type, 1);
        assert_eq!(aircraft.icao, "AA2BC2");
        assert_eq!(aircraft.callsign.as_deref(), Some("UAL814"));
        assert_eq!(aircraft.on_ground, Some(false));
        assert!(aircraft.lat.is_none());
    }

    #[test]
    fn test_parse_velocity() {
        let line = "MSG,4,111,11111,AC1FCC,111111,2016/03/11,13:07:07.777,2016/03/11,13:07:07.713,,,316,106,,,1536,,,,,0";
        let SbsLine::Msg { aircraft, .. } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };

        assert_eq!(aircraft.speed_kt, Some(316.0));
        assert_eq!(aircraft.heading, Some(106.0));
        assert_eq!(aircraft.vertical_rate, Some(1536));
        assert!(aircraft.alt_ft.is_none());
    }

    #[test]
    fn test_empty_fields_are_absent_not_zero() {
        let line = "MSG,3,111,11111,ABC123,111111,2025-01-01,00:00:00.000,,,,,,,,,,,,,,0";
        let SbsLine::Msg { aircraft, .. } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };

        assert!(aircraft.alt_ft.is_none());
        assert!(aircraft.speed_kt.is_none());
        assert!(aircraft.lat.is_none());
        assert!(aircraft.lon.is_none());
    }

    #[test]
    fn test_icao_uppercased_and_trimmed() {
        let line = "MSG,3,111,11111, a0a96c ,111111,2025-01-01,00:00:00.000,,,,37000,,,,,,,,,,";
        let SbsLine::Msg { aircraft, .. } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };
        assert_eq!(aircraft.icao, "A0A96C");
    }

    #[test]
    fn test_squawk_validation() {
        assert_eq!(parse_squawk("7700").as_deref(), Some("7700"));
        assert_eq!(parse_squawk(" 1200 ").as_deref(), Some("1200"));
        assert!(parse_squawk("").is_none());
        assert!(parse_squawk("78A0").is_none()); // non-octal digit
        assert!(parse_squawk("770").is_none()); // too short
        assert!(parse_squawk("77000").is_none()); // too long
    }

    #[test]
    fn test_on_ground_negative_one_means_true() {
        let line = "MSG,2,111,11111,ABC123,111111,2025-01-01,00:00:00.000,,,,,,,,,,,,,,-1";
        let SbsLine::Msg { aircraft, .. } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };
        assert_eq!(aircraft.on_ground, Some(true));
    }

    #[test]
    fn test_non_msg_lines_ignored() {
        let line = "STA,,111,11111,ABC123,111111,2025-01-01,00:00:00.000,,,,,,,,,,,,,,";
        assert!(matches!(parse_line(line, now()), SbsLine::Ignored));
    }

    #[test]
    fn test_short_line_invalid() {
        assert!(matches!(parse_line("MSG,3,111", now()), SbsLine::Invalid));
        assert!(matches!(parse_line("", now()), SbsLine::Invalid));
    }

    #[test]
    fn test_bad_transmission_type_invalid() {
        let line = "MSG,9,111,11111,ABC123,111111,2025-01-01,00:00:00.000,,,,,,,,,,,,,,0";
        assert!(matches!(parse_line(line, now()), SbsLine::Invalid));
    }

    #[test]
    fn test_reemit_preserves_populated_fields() {
        // Parse, rebuild a line from the populated fields, parse again:
        // both records must agree.
        let line = "MSG,3,111,11111,A0A96C,111111,2025-01-01,00:00:00.000,,,,37000,,,33.1234,-96.7890,,4512,,,,0";
        let SbsLine::Msg { aircraft: a, .. } = parse_line(line, now()) else {
            panic!("expected MSG line");
        };

        let mut fields = vec![String::new(); MIN_FIELDS];
        fields[IDX_MESSAGE_TYPE] = "MSG".into();
        fields[IDX_TRANSMISSION] = "3".into();
        fields[IDX_ICAO] = a.icao.clone();
        fields[IDX_ALTITUDE] = a.alt_ft.unwrap().to_string();
        fields[IDX_LATITUDE] = a.lat.unwrap().to_string();
        fields[IDX_LONGITUDE] = a.lon.unwrap().to_string();
        fields[IDX_SQUAWK] = a.squawk.clone().unwrap();
        let reemitted = fields.join(",");

        let SbsLine::Msg { aircraft: b, .. } = parse_line(&reemitted, now()) else {
            panic!("expected MSG line");
        };
        assert_eq!(a.icao, b.icao);
        assert_eq!(a.alt_ft, b.alt_ft);
        assert_eq!(a.lat, b.lat);
        assert_eq!(a.lon, b.lon);
        assert_eq!(a.squawk, b.squawk);
    }
}
