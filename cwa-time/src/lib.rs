use chrono::{Duration, NaiveDate, NaiveDateTime};

pub type TimeResult<M> = std::result::Result<M, TimeError>;

#[derive(thiserror::Error, Debug)]
pub enum TimeError {
    #[error("invalid packed timestamp 0x{0:08x}")]
    InvalidTimestamp(u32),
}

/// Decode a packed CWA calendar timestamp.
///
/// Bit fields, MSB first: year-2000 (6), month (4), day (5), hour (5),
/// minute (6), second (6). The device clock is a naive local wall clock,
/// so no timezone is attached.
pub fn decode_cwa_timestamp(word: u32) -> TimeResult<NaiveDateTime> {
    let year = ((word >> 26) & 0x3f) as i32 + 2000;
    let month = (word >> 22) & 0x0f;
    let day = (word >> 17) & 0x1f;
    let hour = (word >> 12) & 0x1f;
    let min = (word >> 6) & 0x3f;
    let sec = word & 0x3f;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .ok_or(TimeError::InvalidTimestamp(word))
}

/// Pack a calendar time into the CWA 32-bit timestamp layout.
///
/// Sub-second precision is discarded; years outside 2000..=2063 wrap.
pub fn encode_cwa_timestamp(dt: &NaiveDateTime) -> u32 {
    use chrono::{Datelike, Timelike};
    let year = (dt.year() - 2000) as u32 & 0x3f;
    (year << 26)
        | (dt.month() << 22)
        | (dt.day() << 17)
        | (dt.hour() << 12)
        | (dt.minute() << 6)
        | dt.second()
}

/// Add a 16-bit fractional second (units of 1/65536 s) to an instant.
pub fn with_fractional(dt: NaiveDateTime, frac16: u16) -> NaiveDateTime {
    dt + Duration::nanoseconds(secs_to_nanos(frac16 as f64 / 65536.0))
}

/// Convert float seconds to whole nanoseconds, truncating toward zero.
pub fn secs_to_nanos(secs: f64) -> i64 {
    (secs * 1e9) as i64
}

#[test]
fn test_calendar_roundtrip() {
    for &(y, mo, d, h, mi, s) in &[
        (2000, 1, 1, 0, 0, 0),
        (2014, 7, 23, 18, 5, 59),
        (2020, 1, 2, 3, 4, 5),
        (2063, 12, 31, 23, 59, 59),
    ] {
        let dt = NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap();
        let rt = decode_cwa_timestamp(encode_cwa_timestamp(&dt)).unwrap();
        assert_eq!(dt, rt);
    }
}

#[test]
fn test_invalid_calendar_rejected() {
    // month 0 and month 13 do not form valid dates
    assert!(decode_cwa_timestamp(0).is_err());
    let bad_month = 13u32 << 22 | 1 << 17;
    assert!(decode_cwa_timestamp(bad_month).is_err());
}

#[test]
fn test_fractional() {
    let dt = NaiveDate::from_ymd_opt(2020, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap();
    // 0x8000/65536 is exactly half a second
    let half = with_fractional(dt, 0x8000);
    assert_eq!(half - dt, Duration::milliseconds(500));
    assert_eq!(with_fractional(dt, 0), dt);
}

#[test]
fn test_secs_to_nanos_truncates() {
    assert_eq!(secs_to_nanos(1.5), 1_500_000_000);
    assert_eq!(secs_to_nanos(0.8), 800_000_000);
    // toward zero, not nearest
    assert_eq!(secs_to_nanos(1e-10), 0);
    assert_eq!(secs_to_nanos(-0.25), -250_000_000);
}
