//! Length-of-stay enrichment for booking records.
//!
//! A booking is a flat JSON object carrying a check-in date (`srch_ci`) and a
//! check-out date (`srch_co`) as `YYYY-MM-DD` strings. [`enrich`] adds a
//! `stay` field holding the bucket of `(check-out - check-in) + 1` days:
//!
//! | days     | `stay` |
//! |----------|--------|
//! | 1..=4    | `"0"`  |
//! | 5..=10   | `"1"`  |
//! | 11..=14  | `"2"`  |
//! | > 14     | `"3"`  |
//! | otherwise, or dates missing/invalid | `"-1"` |
//!
//! Payloads that are not JSON objects are returned unchanged, so every input
//! message yields exactly one output message.

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use stay_core::{metrics, Result};
use tracing::warn;

use crate::FnMap;

pub const CHECK_IN_FIELD: &str = "srch_ci";
pub const CHECK_OUT_FIELD: &str = "srch_co";
pub const STAY_FIELD: &str = "stay";

// ASCII digits only; no time component, no offset.
static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());

/// Length-of-stay classification written into the `stay` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StayBucket {
    /// Dates missing, malformed, impossible, or check-out before check-in.
    Unknown,
    /// 1 to 4 days.
    Short,
    /// 5 to 10 days.
    Medium,
    /// 11 to 14 days.
    Long,
    /// More than 14 days.
    Extended,
}

impl StayBucket {
    pub fn from_days(days: i64) -> Self {
        match days {
            1..=4 => Self::Short,
            5..=10 => Self::Medium,
            11..=14 => Self::Long,
            d if d > 14 => Self::Extended,
            _ => Self::Unknown,
        }
    }

    pub fn code(self) -> i8 {
        match self {
            Self::Unknown => -1,
            Self::Short => 0,
            Self::Medium => 1,
            Self::Long => 2,
            Self::Extended => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "-1",
            Self::Short => "0",
            Self::Medium => "1",
            Self::Long => "2",
            Self::Extended => "3",
        }
    }
}

impl fmt::Display for StayBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a strict `YYYY-MM-DD` calendar date. Shape mismatches and
/// impossible dates such as `2024-02-30` both yield `None`.
pub fn parse_booking_date(s: &str) -> Option<NaiveDate> {
    if !DATE_RE.is_match(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// Days between the two dates, counting both ends. Zero or negative when
/// check-out is before check-in.
pub fn stay_length(check_in: NaiveDate, check_out: NaiveDate) -> i64 {
    (check_out - check_in).num_days() + 1
}

/// Buckets a parsed booking. Non-string date values count as missing.
pub fn classify(record: &Map<String, Value>) -> StayBucket {
    let date = |field: &str| {
        record
            .get(field)
            .and_then(Value::as_str)
            .and_then(parse_booking_date)
    };
    match (date(CHECK_IN_FIELD), date(CHECK_OUT_FIELD)) {
        (Some(check_in), Some(check_out)) => {
            StayBucket::from_days(stay_length(check_in, check_out))
        }
        _ => StayBucket::Unknown,
    }
}

/// Outcome of enriching one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    /// The payload was a JSON object; `payload` is it re-serialized with `stay` set.
    Enriched { payload: String, bucket: StayBucket },
    /// The payload was not a JSON object and is forwarded byte for byte.
    Passthrough(String),
}

impl Enrichment {
    pub fn payload(&self) -> &str {
        match self {
            Self::Enriched { payload, .. } | Self::Passthrough(payload) => payload,
        }
    }

    pub fn into_payload(self) -> String {
        match self {
            Self::Enriched { payload, .. } | Self::Passthrough(payload) => payload,
        }
    }

    pub fn bucket(&self) -> Option<StayBucket> {
        match self {
            Self::Enriched { bucket, .. } => Some(*bucket),
            Self::Passthrough(_) => None,
        }
    }
}

/// Sets the `stay` field of a JSON object payload.
///
/// Field order and every other value are preserved; an existing `stay` is
/// overwritten in place. The only error is a failure to serialize the
/// result, which the caller should treat as fatal for the record.
pub fn enrich(raw: &str) -> Result<Enrichment> {
    let mut record: Map<String, Value> = match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(e) => {
            warn!(error = %e, "payload is not a JSON object, forwarding unchanged");
            return Ok(Enrichment::Passthrough(raw.to_string()));
        }
    };
    let bucket = classify(&record);
    record.insert(STAY_FIELD.to_string(), Value::String(bucket.as_str().to_string()));
    let payload = serde_json::to_string(&record)?;
    Ok(Enrichment::Enriched { payload, bucket })
}

/// String-to-string form of [`enrich`].
pub fn add_stay_field(raw: &str) -> Result<String> {
    enrich(raw).map(Enrichment::into_payload)
}

/// [`FnMap`] adapter plugging [`enrich`] into the `Map` operator.
///
/// ```no_run
/// use stay_ops::{Map, StayEnricher};
/// let op = Map::new(StayEnricher);
/// # let _ = op;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StayEnricher;

#[async_trait]
impl FnMap for StayEnricher {
    async fn call(&self, value: String) -> Result<String> {
        let enriched = enrich(&value)?;
        match enriched.bucket() {
            Some(bucket) => metrics::STAY_BUCKETS
                .with_label_values(&[bucket.as_str()])
                .inc(),
            None => metrics::PASSTHROUGH_RECORDS
                .with_label_values(&["not_json_object"])
                .inc(),
        }
        Ok(enriched.into_payload())
    }

    fn name(&self) -> &'static str {
        "StayEnricher"
    }
}
