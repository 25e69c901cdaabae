//! ADS-B (DF17/18) message decoding.
//!
//! Operates on the unescaped payload of a Mode-S long frame. Only
//! extended squitter downlink formats 17 and 18 are decoded; everything
//! else produces no update. The 7-byte ME field starting at byte 4
//! carries a 5-bit Type Code selecting the payload layout:
//!
//! | TC    | Payload                         |
//! |-------|---------------------------------|
//! | 1-4   | aircraft identification         |
//! | 9-18  | airborne position, baro altitude|
//! | 19    | airborne velocity               |
//! | 20-22 | airborne position, GNSS altitude|

use chrono::{DateTime, Utc};

use super::{CprDecoder, Frame};
use crate::model::Aircraft;

/// 6-bit character alphabet for TC 1-4 identification messages.
const IDENT_CHARS: &[u8; 64] =
    b"?ABCDEFGHIJKLMNOPQRSTUVWXYZ????? ???????????????0123456789??????";

/// Decode one Beast frame into a partial aircraft record.
///
/// Returns `None` for Mode-A/C frames, non-DF17/18 payloads, and frames
/// too short to carry an ME field. Position decoding goes through the
/// shared [`CprDecoder`], which resolves the encoded coordinates against
/// the per-aircraft frame history or the receiver reference.
pub fn decode(frame: &Frame, cpr: &CprDecoder, now: DateTime<Utc>) -> Option<Aircraft> {
    let data = &frame.data;
    if data.len() < 11 {
        return None;
    }

    let df = (data[0] >> 3) & 0x1F;
    if df != 17 && df != 18 {
        return None;
    }

    let icao = format!("{:02X}{:02X}{:02X}", data[1], data[2], data[3]);

    let mut ac = Aircraft::new(icao.clone(), now);
    ac.rssi = Some(frame.rssi_db);

    let me = &data[4..11];
    let tc = (me[0] >> 3) & 0x1F;

    match tc {
        1..=4 => decode_identification(me, &mut ac),
        9..=18 => decode_airborne_position(me, tc, &icao, cpr, &mut ac),
        19 => decode_velocity(me, &mut ac),
        20..=22 => decode_airborne_position(me, tc, &icao, cpr, &mut ac),
        _ => {}
    }

    Some(ac)
}

/// TC 1-4: callsign as eight 6-bit packed characters.
fn decode_identification(me: &[u8], ac: &mut Aircraft) {
    let chars = [
        (me[1] >> 2) & 0x3F,
        ((me[1] & 0x03) << 4) | (me[2] >> 4),
        ((me[2] & 0x0F) << 2) | (me[3] >> 6),
        me[3] & 0x3F,
        (me[4] >> 2) & 0x3F,
        ((me[4] & 0x03) << 4) | (me[5] >> 4),
        ((me[5] & 0x0F) << 2) | (me[6] >> 6),
        me[6] & 0x3F,
    ];

    let callsign: String = chars
        .iter()
        .map(|&c| IDENT_CHARS[c as usize] as char)
        .filter(|&c| c != '?' && c != ' ')
        .collect();

    if !callsign.is_empty() {
        ac.callsign = Some(callsign);
    }
}

/// TC 9-18 (baro) and TC 20-22 (GNSS): altitude plus CPR position.
fn decode_airborne_position(me: &[u8], tc: u8, icao: &str, cpr: &CprDecoder, ac: &mut Aircraft) {
    let alt_code = ((u32::from(me[1]) << 4) | (u32::from(me[2]) >> 4)) & 0xFFF;
    if alt_code > 0 {
        if tc < 20 {
            // Baro altitude: 12-bit field with the Q bit at position 4.
            let q_bit = (alt_code >> 4) & 1;
            if q_bit == 1 {
                let n = (alt_code & 0xF) | ((alt_code >> 1) & 0x7F0);
                let alt = n as i32 * 25 - 1000;
                if alt > -1000 && alt < 60_000 {
                    ac.alt_ft = Some(alt);
                }
            }
        } else {
            // GNSS height is a plain 25 ft multiple.
            ac.alt_gnss_ft = Some(alt_code as i32 * 25);
        }
    }

    let odd = (me[2] >> 2) & 1 == 1;
    let cpr_lat =
        (u32::from(me[2] & 0x03) << 15) | (u32::from(me[3]) << 7) | (u32::from(me[4]) >> 1);
    let cpr_lon = (u32::from(me[4] & 0x01) << 16) | (u32::from(me[5]) << 8) | u32::from(me[6]);

    if let Some((lat, lon)) = cpr.add_frame(icao, cpr_lat, cpr_lon, odd) {
        ac.lat = Some(lat);
        ac.lon = Some(lon);
    }
}

/// TC 19 subtype 1/2: ground speed from E/W and N/S components plus
/// vertical rate.
fn decode_velocity(me: &[u8], ac: &mut Aircraft) {
    let subtype = me[0] & 0x07;
    if subtype != 1 && subtype != 2 {
        return;
    }

    let ew_dir = (me[1] >> 2) & 1;
    let ew_vel = i32::from((u16::from(me[1] & 0x03) << 8) | u16::from(me[2])) - 1;
    let ns_dir = (me[3] >> 7) & 1;
    let ns_vel = i32::from((u16::from(me[3] & 0x7F) << 3) | u16::from(me[4] >> 5)) - 1;

    if ew_vel >= 0 && ns_vel >= 0 {
        let mut ew = f64::from(ew_vel);
        let mut ns = f64::from(ns_vel);
        if ew_dir == 1 {
            ew = -ew;
        }
        if ns_dir == 1 {
            ns = -ns;
        }

        let speed = (ew * ew + ns * ns).sqrt();
        let mut heading = ew.atan2(ns).to_degrees();
        if heading < 0.0 {
            heading += 360.0;
        }

        ac.speed_kt = Some(speed);
        ac.heading = Some(heading);
    }

    let vert_sign = (me[4] >> 3) & 1;
    let vert_rate = i32::from((u16::from(me[4] & 0x07) << 6) | u16::from(me[5] >> 2)) - 1;
    if vert_rate >= 0 {
        let mut vr = vert_rate * 64;
        if vert_sign == 1 {
            vr = -vr;
        }
        ac.vertical_rate = Some(vr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beast::{Frame, TYPE_MODE_S_LONG};

    fn frame(data: Vec<u8>) -> Frame {
        Frame {
            frame_type: TYPE_MODE_S_LONG,
            timestamp: 0,
            rssi_db: -20.0,
            data,
        }
    }

    fn decode_one(data: Vec<u8>) -> Option<Aircraft> {
        let cpr = CprDecoder::new();
        decode(&frame(data), &cpr, Utc::now())
    }

    // The mode-s.org worked example: DF17 identification frame for
    // ICAO 4840D6, callsign KLM1023.
    const IDENT_FRAME: [u8; 14] = [
        0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3, 0x71, 0xC3, 0x2C, 0xE0, 0x57, 0x60, 0x98,
    ];

    // The mode-s.org worked example: DF17 airborne velocity subtype 1 for
    // ICAO 485020, ground speed ~159 kt, track ~182.88 deg, -832 ft/min.
    const VELOCITY_FRAME: [u8; 14] = [
        0x8D, 0x48, 0x50, 0x20, 0x99, 0x44, 0x09, 0x94, 0x08, 0x38, 0x17, 0x5B, 0x28, 0x4F,
    ];

    // The mode-s.org worked example: DF17 airborne position (TC 11, even)
    // for ICAO 40621D at 38000 ft.
    const POSITION_FRAME: [u8; 14] = [
        0x8D, 0x40, 0x62, 0x1D, 0x58, 0xC3, 0x82, 0xD6, 0x90, 0xC8, 0xAC, 0x28, 0x63, 0xA7,
    ];

    #[test]
    fn test_decode_identification() {
        let ac = decode_one(IDENT_FRAME.to_vec()).unwrap();
        assert_eq!(ac.icao, "4840D6");
        assert_eq!(ac.callsign.as_deref(), Some("KLM1023"));
        assert_eq!(ac.rssi, Some(-20.0));
    }

    #[test]
    fn test_decode_velocity() {
        let ac = decode_one(VELOCITY_FRAME.to_vec()).unwrap();
        assert_eq!(ac.icao, "485020");

        let speed = ac.speed_kt.unwrap();
        assert!((speed - 159.2).abs() < 0.5, "speed {}", speed);
        let heading = ac.heading.unwrap();
        assert!((heading - 182.88).abs() < 0.5, "heading {}", heading);
        assert_eq!(ac.vertical_rate, Some(-832));
    }

    #[test]
    fn test_decode_position_altitude() {
        let ac = decode_one(POSITION_FRAME.to_vec()).unwrap();
        assert_eq!(ac.icao, "40621D");
        assert_eq!(ac.alt_ft, Some(38_000));
        // A single frame with no reference cannot resolve a position.
        assert!(ac.lat.is_none());
        assert!(ac.lon.is_none());
    }

    #[test]
    fn test_non_df17_rejected() {
        // DF4 surveillance reply (first 5 bits 00100).
        let mut data = POSITION_FRAME.to_vec();
        data[0] = 0x20;
        assert!(decode_one(data).is_none());
    }

    #[test]
    fn test_df18_accepted() {
        let mut data = IDENT_FRAME.to_vec();
        data[0] = 0x90; // DF18
        let ac = decode_one(data).unwrap();
        assert_eq!(ac.callsign.as_deref(), Some("KLM1023"));
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(decode_one(vec![0x8D, 0x48, 0x40]).is_none());
    }

    #[test]
    fn test_identity_bits_survive_reencode() {
        // ICAO, TC, and the packed identity characters are plain payload
        // bytes, so a decode of the same bytes is stable.
        let a = decode_one(IDENT_FRAME.to_vec()).unwrap();
        let b = decode_one(IDENT_FRAME.to_vec()).unwrap();
        assert_eq!(a.icao, b.icao);
        assert_eq!(a.callsign, b.callsign);
    }
}
