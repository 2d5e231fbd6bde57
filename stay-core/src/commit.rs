use std::collections::BTreeMap;
use std::time::Duration;

use crate::{Offset, Result};

/// Commits source positions once the records behind them have been delivered.
///
/// Offsets handed to `commit` are the last delivered record per partition;
/// implementations translate them to whatever their source expects.
#[async_trait::async_trait]
pub trait Committer: Send + Sync {
    fn interval(&self) -> Duration;
    async fn commit(&self, offsets: Vec<Offset>) -> Result<()>;
}

/// Highest delivered offset per topic partition since the last `take`.
#[derive(Debug, Default)]
pub struct DeliveredOffsets {
    latest: BTreeMap<(String, i32), i64>,
}

impl DeliveredOffsets {
    pub fn mark(&mut self, offset: &Offset) {
        self.latest
            .entry((offset.topic.clone(), offset.partition))
            .and_modify(|o| *o = (*o).max(offset.offset))
            .or_insert(offset.offset);
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    pub fn take(&mut self) -> Vec<Offset> {
        std::mem::take(&mut self.latest)
            .into_iter()
            .map(|((topic, partition), offset)| Offset {
                topic,
                partition,
                offset,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(topic: &str, partition: i32, offset: i64) -> Offset {
        Offset {
            topic: topic.into(),
            partition,
            offset,
        }
    }

    #[test]
    fn keeps_highest_offset_per_partition() {
        let mut done = DeliveredOffsets::default();
        assert!(done.is_empty());
        done.mark(&at("expedia", 0, 4));
        done.mark(&at("expedia", 1, 9));
        done.mark(&at("expedia", 0, 7));
        done.mark(&at("expedia", 0, 5));
        assert_eq!(done.take(), vec![at("expedia", 0, 7), at("expedia", 1, 9)]);
        assert!(done.is_empty());
        assert!(done.take().is_empty());
    }
}
