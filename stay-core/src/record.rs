use serde::{Deserialize, Serialize};

/// Position of a record in its source partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// One broker message as seen by the pipeline: string key and value, plus the
/// broker timestamp when one is available.
///
/// A `None` value is a tombstone; operators forward it without looking at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: Option<String>,
    pub value: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: Option<i64>,
    /// Where the record was read from; `None` for sources without offsets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<Offset>,
}

impl Record {
    pub fn new(key: Option<String>, value: Option<String>, timestamp: Option<i64>) -> Self {
        Self {
            key,
            value,
            timestamp,
            offset: None,
        }
    }

    pub fn from_value<V: Into<String>>(v: V) -> Self {
        Self {
            key: None,
            value: Some(v.into()),
            timestamp: None,
            offset: None,
        }
    }

    pub fn with_key<K: Into<String>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn with_offset(mut self, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        self.offset = Some(Offset {
            topic: topic.into(),
            partition,
            offset,
        });
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_fill_envelope() {
        let rec = Record::from_value("{}").with_key("k1").with_timestamp(1_700_000_000_000);
        assert_eq!(rec.key.as_deref(), Some("k1"));
        assert_eq!(rec.value.as_deref(), Some("{}"));
        assert_eq!(rec.timestamp, Some(1_700_000_000_000));
        assert!(!rec.is_tombstone());
        assert!(Record::new(Some("k".into()), None, None).is_tombstone());

        let rec = Record::from_value("{}").with_offset("expedia", 3, 41);
        assert_eq!(
            rec.offset,
            Some(Offset {
                topic: "expedia".into(),
                partition: 3,
                offset: 41
            })
        );
    }
}
