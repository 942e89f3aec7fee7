#![forbid(unsafe_code)]

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

pub fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Parse an RFC 3339 timestamp into epoch milliseconds (UTC).
pub fn parse_rfc3339_ms(raw: &str) -> Option<i64> {
    let dt = OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()?;
    let ms = dt.unix_timestamp_nanos() / 1_000_000i128;
    if ms >= i64::MIN as i128 && ms <= i64::MAX as i128 {
        Some(ms as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_and_parse_round_trip_at_millisecond_precision() {
        let ts = 1_700_000_000_123i64;
        let rendered = ts_ms_to_rfc3339(ts);
        assert_eq!(parse_rfc3339_ms(&rendered), Some(ts));
    }

    #[test]
    fn parse_accepts_zulu_and_offset_forms() {
        assert_eq!(parse_rfc3339_ms("1970-01-01T00:00:00Z"), Some(0));
        assert_eq!(
            parse_rfc3339_ms("1970-01-01T01:00:00+01:00"),
            Some(0),
            "offsets normalize to UTC"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_rfc3339_ms("yesterday"), None);
        assert_eq!(parse_rfc3339_ms(""), None);
    }
}
