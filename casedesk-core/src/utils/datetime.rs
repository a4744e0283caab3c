//! Serde adapter for timestamps in persisted records.
//!
//! Written as RFC3339. Read from RFC3339 text or epoch numbers, because
//! credentials saved by browser clients carry `Date.now()` milliseconds.

use chrono::{DateTime, Utc};
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

/// Numbers at or above this are epoch milliseconds, below it epoch seconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&at.to_rfc3339())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Epoch(i64),
        Text(String),
    }

    match Stored::deserialize(deserializer)? {
        Stored::Epoch(n) => from_epoch(n)
            .ok_or_else(|| D::Error::custom(format!("epoch timestamp out of range: {n}"))),
        Stored::Text(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| D::Error::custom(format!("invalid RFC3339 timestamp {text:?}: {e}"))),
    }
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Expiry {
        #[serde(with = "super")]
        at: DateTime<Utc>,
    }

    #[test]
    fn writes_rfc3339() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_string(&Expiry { at }).unwrap();
        assert!(json.contains("2026-03-01T12:00:00"));
        let back: Expiry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.at, at);
    }

    #[test]
    fn reads_browser_millis_and_seconds() {
        let millis: Expiry = serde_json::from_str(r#"{"at":1772366400000}"#).unwrap();
        let secs: Expiry = serde_json::from_str(r#"{"at":1772366400}"#).unwrap();
        assert_eq!(millis.at, secs.at);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Expiry>(r#"{"at":"tomorrow"}"#).is_err());
        assert!(serde_json::from_str::<Expiry>(r#"{"at":true}"#).is_err());
    }
}
