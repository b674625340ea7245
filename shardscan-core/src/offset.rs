//! Shard identifiers and the typed offsets stored per shard.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Storage format for timestamp offsets in the offset store. The fraction is
/// written only when non-zero, with as many digits as it needs.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const TIMESTAMP_PARSE_FORMATS: &[&str] = &[
    TIMESTAMP_FORMAT,
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Ordinal of one physical partition of the logical table.
#[derive(
    Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ShardId(pub usize);

impl ShardId {
    /// Position of the shard in the layout.
    pub fn index(self) -> usize {
        self.0
    }

    /// Zero-padded field name used for this shard in the offset store.
    pub fn field_key(self) -> String {
        format!("{:03}", self.0)
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Resume point of a shard: every row with a scan key `<=` the offset has
/// been consumed.
///
/// Offsets of one run always share a variant; ordering between variants is
/// only defined so the type can be `Ord`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(untagged)]
pub enum Offset {
    /// Integer scan key, such as a serial id.
    Int(i64),
    /// String scan key, compared bytewise.
    Text(String),
    /// Timestamp scan key without a time zone.
    Timestamp(NaiveDateTime),
}

impl Offset {
    /// Kind of this offset.
    pub fn kind(&self) -> OffsetKind {
        match self {
            Offset::Int(_) => OffsetKind::Int,
            Offset::Text(_) => OffsetKind::Text,
            Offset::Timestamp(_) => OffsetKind::Timestamp,
        }
    }

    /// String form written to the offset store.
    pub fn encode(&self) -> String {
        match self {
            Offset::Int(value) => value.to_string(),
            Offset::Text(value) => value.clone(),
            Offset::Timestamp(value) => value.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Whether a JSON scan-key value is equal to this offset.
    pub fn matches_json(&self, value: &Value) -> bool {
        self.kind().from_json(value).as_ref() == Some(self)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Offset::Int(value)
    }
}

impl From<&str> for Offset {
    fn from(value: &str) -> Self {
        Offset::Text(value.to_string())
    }
}

impl From<NaiveDateTime> for Offset {
    fn from(value: NaiveDateTime) -> Self {
        Offset::Timestamp(value)
    }
}

/// Scalar type of the scan key, fixed per offset store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetKind {
    /// `bigint` or `integer` scan keys.
    #[default]
    Int,
    /// `text` or `varchar` scan keys.
    Text,
    /// `timestamp` scan keys.
    Timestamp,
}

impl OffsetKind {
    /// Default seed for a fresh offset store: below every positive id,
    /// every non-empty string and every timestamp after the Unix epoch.
    pub fn origin(self) -> Offset {
        match self {
            OffsetKind::Int => Offset::Int(0),
            OffsetKind::Text => Offset::Text(String::new()),
            OffsetKind::Timestamp => Offset::Timestamp(DateTime::<Utc>::UNIX_EPOCH.naive_utc()),
        }
    }

    /// Parse the stored string form of an offset.
    pub fn parse(self, raw: &str) -> Option<Offset> {
        match self {
            OffsetKind::Int => raw.trim().parse().ok().map(Offset::Int),
            OffsetKind::Text => Some(Offset::Text(raw.to_string())),
            OffsetKind::Timestamp => parse_timestamp(raw.trim()).map(Offset::Timestamp),
        }
    }

    /// Read a scan-key value out of a decoded row. `null` never yields an
    /// offset.
    pub fn from_json(self, value: &Value) -> Option<Offset> {
        match (self, value) {
            (_, Value::Null) => None,
            (OffsetKind::Int, Value::Number(number)) => number.as_i64().map(Offset::Int),
            (OffsetKind::Int, Value::String(raw)) => self.parse(raw),
            (OffsetKind::Text, Value::String(raw)) => Some(Offset::Text(raw.clone())),
            (OffsetKind::Text, Value::Number(number)) => Some(Offset::Text(number.to_string())),
            (OffsetKind::Timestamp, Value::String(raw)) => self.parse(raw),
            _ => None,
        }
    }
}

impl fmt::Display for OffsetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OffsetKind::Int => "int",
            OffsetKind::Text => "text",
            OffsetKind::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_PARSE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|value| value.naive_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, 16)
            .and_then(|d| d.and_hms_opt(h, m, s))
            .expect("valid timestamp")
    }

    #[test]
    fn shard_field_keys_are_zero_padded() {
        assert_eq!(ShardId(0).field_key(), "000");
        assert_eq!(ShardId(7).field_key(), "007");
        assert_eq!(ShardId(128).field_key(), "128");
    }

    #[test]
    fn whole_second_timestamps_are_stored_without_fraction() {
        let offset = Offset::Timestamp(ts(9, 30, 5));
        assert_eq!(offset.encode(), "2024-08-16 09:30:05");
        assert_eq!(OffsetKind::Timestamp.parse("2024-08-16 09:30:05"), Some(offset));
    }

    #[test]
    fn sub_second_timestamps_survive_the_offset_store() {
        for raw in ["2024-08-16T09:30:05.250", "2024-08-16T09:30:05.000750", "2024-08-16T09:30:05.123456789"] {
            let offset = OffsetKind::Timestamp.from_json(&json!(raw)).expect("row timestamp");
            let stored = offset.encode();
            assert_eq!(OffsetKind::Timestamp.parse(&stored), Some(offset), "{raw} stored as {stored}");
        }
        let offset = OffsetKind::Timestamp.parse("2024-08-16T09:30:05.250").expect("iso timestamp");
        assert_eq!(offset.encode(), "2024-08-16 09:30:05.250");
    }

    #[test]
    fn timestamp_kind_accepts_iso_rows() {
        let value = json!("2024-08-16T09:30:05.250");
        let parsed = OffsetKind::Timestamp.from_json(&value).expect("iso timestamp");
        assert!(parsed > Offset::Timestamp(ts(9, 30, 5)));
        assert!(parsed < Offset::Timestamp(ts(9, 30, 6)));
    }

    #[test]
    fn int_kind_reads_numbers_and_numeric_strings() {
        assert_eq!(OffsetKind::Int.from_json(&json!(42)), Some(Offset::Int(42)));
        assert_eq!(OffsetKind::Int.from_json(&json!("42")), Some(Offset::Int(42)));
        assert_eq!(OffsetKind::Int.from_json(&json!(null)), None);
        assert_eq!(OffsetKind::Int.parse("not-a-number"), None);
    }

    #[test]
    fn text_offsets_order_lexicographically() {
        assert!(Offset::from("a-100") < Offset::from("b-001"));
        assert!(Offset::Text("10".into()) < Offset::Text("9".into()));
    }
}
