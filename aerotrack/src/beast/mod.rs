//! Mode-S "Beast" binary framing.
//!
//! The Beast format wraps raw Mode-S messages with a type tag, a 48-bit
//! MLAT timestamp, and a signal-level byte:
//!
//! ```text
//! 1A TT TS[6] RSSI[1] DATA[n]     TT: '1' Mode-A/C (n=2)
//!                                     '2' Mode-S short (n=7)
//!                                     '3' Mode-S long (n=14)
//! ```
//!
//! Any `0x1A` byte inside the timestamp, RSSI, or payload is doubled on
//! the wire (byte-stuffing) and must be unescaped before use. The parser
//! works on an accumulation buffer: [`parse_frame`] returns how many bytes
//! it consumed, and `(None, 0)` means "incomplete, keep the bytes".

mod cpr;
mod modes;

pub use cpr::CprDecoder;
pub use modes::decode;

/// Frame delimiter and stuffing escape byte.
pub const ESCAPE: u8 = 0x1A;

/// Mode-A/C frame type tag (2 data bytes).
pub const TYPE_MODE_AC: u8 = b'1';
/// Mode-S short frame type tag (7 data bytes).
pub const TYPE_MODE_S_SHORT: u8 = b'2';
/// Mode-S long frame type tag (14 data bytes).
pub const TYPE_MODE_S_LONG: u8 = b'3';

/// One unescaped Beast frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: u8,
    /// 48-bit MLAT counter, big-endian on the wire.
    pub timestamp: u64,
    /// Signal level mapped to dB.
    pub rssi_db: f64,
    /// Raw Mode-S payload (2, 7, or 14 bytes).
    pub data: Vec<u8>,
}

fn data_len(frame_type: u8) -> Option<usize> {
    match frame_type {
        TYPE_MODE_AC => Some(2),
        TYPE_MODE_S_SHORT => Some(7),
        TYPE_MODE_S_LONG => Some(14),
        _ => None,
    }
}

/// Map the signal-level byte to dB.
pub fn rssi_db(byte: u8) -> f64 {
    f64::from(byte) / 255.0 * 35.0 - 50.0
}

/// Try to parse one frame from the front of `buf`.
///
/// Returns the frame (if one was completed) and the number of bytes
/// consumed. Contract:
///
/// - `(Some(frame), n)` - a complete frame occupied the first `n` bytes
/// - `(None, 0)` - the buffer holds a frame prefix; retain it and read more
/// - `(None, n > 0)` - the first `n` bytes are garbage (bad lead byte, bad
///   type tag, or a frame truncated by the next frame start); discard them
///   and resynchronize
pub fn parse_frame(buf: &[u8]) -> (Option<Frame>, usize) {
    if buf.len() < 2 {
        return (None, 0);
    }

    if buf[0] != ESCAPE {
        return (None, 1);
    }

    let frame_type = buf[1];
    let Some(data_len) = data_len(frame_type) else {
        return (None, 2);
    };

    // 6 timestamp bytes + 1 RSSI byte + payload, all subject to stuffing.
    let needed = 6 + 1 + data_len;
    let mut body = Vec::with_capacity(needed);
    let mut i = 2;

    while body.len() < needed {
        match buf.get(i) {
            None => return (None, 0),
            Some(&ESCAPE) => match buf.get(i + 1) {
                None => return (None, 0),
                Some(&ESCAPE) => {
                    body.push(ESCAPE);
                    i += 2;
                }
                // A lone escape mid-frame is the start of the next frame:
                // this one was truncated on the wire.
                Some(_) => return (None, i),
            },
            Some(&b) => {
                body.push(b);
                i += 1;
            }
        }
    }

    let mut timestamp: u64 = 0;
    for &b in &body[0..6] {
        timestamp = (timestamp << 8) | u64::from(b);
    }

    let frame = Frame {
        frame_type,
        timestamp,
        rssi_db: rssi_db(body[6]),
        data: body[7..].to_vec(),
    };

    (Some(frame), i)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a wire frame with byte-stuffing applied, the inverse of
    /// `parse_frame`.
    fn encode_frame(frame_type: u8, timestamp: u64, rssi: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![ESCAPE, frame_type];
        let mut push = |b: u8| {
            out.push(b);
            if b == ESCAPE {
                out.push(ESCAPE);
            }
        };
        for shift in (0..6).rev() {
            push((timestamp >> (shift * 8)) as u8);
        }
        push(rssi);
        for &b in data {
            push(b);
        }
        out
    }

    #[test]
    fn test_parse_long_frame() {
        let data: Vec<u8> = (0x40..0x4E).collect();
        let wire = encode_frame(TYPE_MODE_S_LONG, 0x0000_0102_0304, 255, &data);

        let (frame, consumed) = parse_frame(&wire);
        let frame = frame.expect("complete frame");
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.frame_type, TYPE_MODE_S_LONG);
        assert_eq!(frame.timestamp, 0x0000_0102_0304);
        assert_eq!(frame.data, data);
        assert!((frame.rssi_db - (-15.0)).abs() < 1e-9); // 255 -> 35 - 50
    }

    #[test]
    fn test_rssi_mapping() {
        assert!((rssi_db(0) - (-50.0)).abs() < 1e-9);
        assert!((rssi_db(255) - (-15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_byte_stuffing_round_trip() {
        // Payload containing escape bytes survives encode -> decode.
        let data = [0x8D, ESCAPE, 0x1A, 0x00, ESCAPE, 0x58, 0xC3, 0x82, 0xD6, 0x90, 0xC8, 0xAC, 0x28, 0x63];
        let wire = encode_frame(TYPE_MODE_S_LONG, 0x1A1A_1A1A_1A1A, ESCAPE, &data);

        let (frame, consumed) = parse_frame(&wire);
        let frame = frame.expect("complete frame");
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.timestamp, 0x1A1A_1A1A_1A1A);
        assert_eq!(frame.data, data);

        // Re-encoding yields the identical wire bytes.
        let rssi_byte = ESCAPE;
        let rewire = encode_frame(frame.frame_type, frame.timestamp, rssi_byte, &frame.data);
        assert_eq!(rewire, wire);
    }

    #[test]
    fn test_partial_frame_retains_buffer() {
        let wire = encode_frame(TYPE_MODE_S_SHORT, 1, 100, &[1, 2, 3, 4, 5, 6, 7]);
        for cut in 0..wire.len() {
            let (frame, consumed) = parse_frame(&wire[..cut]);
            assert!(frame.is_none(), "cut {}", cut);
            assert_eq!(consumed, 0, "cut {}", cut);
        }
    }

    #[test]
    fn test_bad_lead_byte_consumes_one() {
        let (frame, consumed) = parse_frame(&[0x42, ESCAPE, b'2']);
        assert!(frame.is_none());
        assert_eq!(consumed, 1);
    }

    #[test]
    fn test_bad_type_tag_consumes_two() {
        let (frame, consumed) = parse_frame(&[ESCAPE, b'9', 1, 2, 3]);
        assert!(frame.is_none());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_truncated_frame_resyncs_at_next_escape() {
        // A short frame cut off by the start of the next frame: the parser
        // must discard the truncated prefix, not consume the next frame.
        let mut wire = encode_frame(TYPE_MODE_S_SHORT, 1, 100, &[1, 2, 3, 4, 5, 6, 7]);
        wire.truncate(6);
        let next = encode_frame(TYPE_MODE_S_SHORT, 2, 100, &[9, 9, 9, 9, 9, 9, 9]);
        let resync_at = wire.len();
        wire.extend_from_slice(&next);

        let (frame, consumed) = parse_frame(&wire);
        assert!(frame.is_none());
        assert_eq!(consumed, resync_at);

        let (frame, consumed) = parse_frame(&wire[consumed..]);
        let frame = frame.expect("second frame parses after resync");
        assert_eq!(consumed, next.len());
        assert_eq!(frame.timestamp, 2);
    }

    #[test]
    fn test_two_frames_and_a_prefix() {
        // Two complete frames followed by a 3-byte prefix of a third:
        // both frames come out and the prefix is retained.
        let f1 = encode_frame(TYPE_MODE_S_LONG, 10, 50, &[0u8; 14]);
        let f2 = encode_frame(TYPE_MODE_S_SHORT, 20, 60, &[1u8; 7]);
        let f3 = encode_frame(TYPE_MODE_S_LONG, 30, 70, &[2u8; 14]);

        let mut buf = Vec::new();
        buf.extend_from_slice(&f1);
        buf.extend_from_slice(&f2);
        buf.extend_from_slice(&f3[..3]);

        let (frame, consumed) = parse_frame(&buf);
        assert_eq!(frame.unwrap().timestamp, 10);
        buf.drain(..consumed);

        let (frame, consumed) = parse_frame(&buf);
        assert_eq!(frame.unwrap().timestamp, 20);
        buf.drain(..consumed);

        let (frame, consumed) = parse_frame(&buf);
        assert!(frame.is_none());
        assert_eq!(consumed, 0);
        assert_eq!(buf.len(), 3);
    }
}
