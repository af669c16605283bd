//! Modification time messages: current (0x0012) and legacy (0x000E).
//!
//! Both are advisory. Anything malformed decodes as `None` rather than an
//! error so that a bad timestamp never blocks opening a dataset.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Decode the current form: version 1, three reserved bytes, u32 seconds.
pub fn decode(data: &[u8]) -> Option<u32> {
    if data.len() < 8 || data[0] != 1 {
        return None;
    }
    Some(u32::from_le_bytes([data[4], data[5], data[6], data[7]]))
}

pub fn encode(seconds: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&[1, 0, 0, 0]);
    buf.extend_from_slice(&seconds.to_le_bytes());
    buf
}

/// Decode the legacy ASCII form `YYYYMMDDhhmmss` (UTC) into seconds since the epoch.
pub fn decode_old(data: &[u8]) -> Option<u32> {
    if data.len() < 14 || !data[..14].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let num = |r: core::ops::Range<usize>| {
        data[r]
            .iter()
            .fold(0i64, |acc, &b| acc * 10 + (b - b'0') as i64)
    };
    let (year, month, day) = (num(0..4), num(4..6), num(6..8));
    let (hour, min, sec) = (num(8..10), num(10..12), num(12..14));
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) || hour > 23 || min > 59 || sec > 60
    {
        return None;
    }
    let days = days_from_civil(year, month, day);
    let secs = days * 86_400 + hour * 3600 + min * 60 + sec;
    u32::try_from(secs).ok()
}

// Howard Hinnant's days_from_civil.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}
