//! Metadata carried by speculative (optimistic) records.
//!
//! An optimistic record is created locally before the authoritative stream
//! confirms it. It carries [`OptimisticMetadata`] so the reconciliation engine
//! can find it again when the canonical record arrives. Canonical records
//! never carry metadata: the `optimistic` flag serializes as a literal `true`
//! and deserializing `false` is an error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker that always serializes as `true`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OptimisticFlag;

impl Serialize for OptimisticFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for OptimisticFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if bool::deserialize(deserializer)? {
            Ok(Self)
        } else {
            Err(serde::de::Error::custom(
                "optimistic metadata must be flagged `true`",
            ))
        }
    }
}

/// Where a speculative record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisticSource {
    /// A local user action (send, edit, retry).
    Local,
    /// A stream-time projection made ahead of the canonical record.
    Stream,
}

/// Correlation metadata attached to an optimistic record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimisticMetadata {
    /// Always `true` on the wire.
    pub optimistic: OptimisticFlag,
    /// Origin of the speculative write.
    pub optimistic_source: OptimisticSource,
    /// Key linking this record to its canonical counterpart.
    pub correlation_key: String,
    /// Creation time of the speculative write (epoch milliseconds).
    pub timestamp: i64,
}

impl OptimisticMetadata {
    /// Build metadata for a freshly created speculative record.
    pub fn new(source: OptimisticSource, correlation_key: String, timestamp: i64) -> Self {
        Self {
            optimistic: OptimisticFlag,
            optimistic_source: source,
            correlation_key,
            timestamp,
        }
    }

    /// Whether `now` falls within `window_ms` of this record's creation.
    pub fn within_window(&self, now: i64, window_ms: i64) -> bool {
        now.abs_diff(self.timestamp) <= window_ms.unsigned_abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_flag_true() {
        let meta = OptimisticMetadata::new(OptimisticSource::Local, "k".into(), 10);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["optimistic"], true);
        assert_eq!(json["optimisticSource"], "local");
        assert_eq!(json["correlationKey"], "k");
        assert_eq!(json["timestamp"], 10);
    }

    #[test]
    fn rejects_false_flag() {
        let json = serde_json::json!({
            "optimistic": false,
            "optimisticSource": "stream",
            "correlationKey": "k",
            "timestamp": 0
        });
        let err = serde_json::from_value::<OptimisticMetadata>(json).unwrap_err();
        assert!(err.to_string().contains("flagged"));
    }

    #[test]
    fn accepts_true_flag() {
        let json = serde_json::json!({
            "optimistic": true,
            "optimisticSource": "stream",
            "correlationKey": "k",
            "timestamp": 5
        });
        let meta: OptimisticMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(meta.optimistic_source, OptimisticSource::Stream);
    }

    #[test]
    fn window_is_inclusive_and_symmetric() {
        let meta = OptimisticMetadata::new(OptimisticSource::Local, "k".into(), 100_000);
        assert!(meta.within_window(130_000, 30_000));
        assert!(!meta.within_window(130_001, 30_000));
        assert!(meta.within_window(70_000, 30_000));
        assert!(!meta.within_window(69_999, 30_000));
    }

    #[test]
    fn window_survives_extreme_timestamps() {
        let oldest = OptimisticMetadata::new(OptimisticSource::Stream, "k".into(), i64::MIN);
        assert!(!oldest.within_window(i64::MAX, 30_000));
        assert!(!oldest.within_window(0, 30_000));
        assert!(oldest.within_window(i64::MIN + 10, 30_000));

        let newest = OptimisticMetadata::new(OptimisticSource::Stream, "k".into(), i64::MAX);
        assert!(!newest.within_window(i64::MIN, i64::MAX));
        assert!(newest.within_window(i64::MAX, 0));
    }
}
