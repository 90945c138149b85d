//! Timestamp helpers: journal stamps and legacy datetime conversion.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ulid::Ulid;

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", Utc::now().timestamp())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// A datetime as stored by the legacy application, which did not always
/// attach a timezone.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LegacyDateTime {
    Aware(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl LegacyDateTime {
    pub fn parse(raw: &str) -> Option<LegacyDateTime> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(LegacyDateTime::Aware(dt));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Some(LegacyDateTime::Naive(dt));
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(LegacyDateTime::Naive)
    }

    pub fn is_naive(&self) -> bool {
        matches!(self, LegacyDateTime::Naive(_))
    }

    /// Convert to UTC, interpreting naive values in `tz`.
    pub fn to_utc(&self, tz: Tz) -> DateTime<Utc> {
        match self {
            LegacyDateTime::Aware(dt) => dt.with_timezone(&Utc),
            LegacyDateTime::Naive(naive) => localize(*naive, tz),
        }
    }
}

/// Attach `tz` to a naive datetime. Ambiguous times pick the earlier
/// instant; nonexistent ones (DST gaps) are read as UTC.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

pub fn parse_tz(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// Storage format for datetimes in the destination store.
pub fn to_db(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_epoch_z_format() {
        let result = now_epoch_z();
        assert!(result.ends_with('Z'));
        let numeric_part = result.trim_end_matches('Z');
        assert!(numeric_part.parse::<u64>().is_ok());
    }

    #[test]
    fn test_new_event_id_is_valid_ulid() {
        let id = new_event_id();
        assert!(ulid::Ulid::from_string(&id).is_ok());
        assert_ne!(id, new_event_id());
    }

    #[test]
    fn test_parse_aware_and_naive() {
        let aware = LegacyDateTime::parse("2015-03-01T10:00:00+01:00").unwrap();
        assert!(!aware.is_naive());
        assert_eq!(
            to_db(aware.to_utc(chrono_tz::UTC)),
            "2015-03-01T09:00:00+00:00"
        );

        let naive = LegacyDateTime::parse("2015-03-01 10:00:00").unwrap();
        assert!(naive.is_naive());
        let zurich = parse_tz("Europe/Zurich").unwrap();
        assert_eq!(to_db(naive.to_utc(zurich)), "2015-03-01T09:00:00+00:00");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LegacyDateTime::parse("yesterday").is_none());
        assert!(parse_tz("Mars/Olympus").is_none());
    }
}
