//! stay-ops: operators built on top of stay-core.
//!
//! Included operators:
//! - `Map`: one-to-one mapping of record values, key and timestamp kept
//! - `StayEnricher`: the length-of-stay enrichment, used as `Map::new(StayEnricher)`

use async_trait::async_trait;
use stay_core::{Context, Operator, Record, Result};
use tracing::instrument;

pub mod stay;
pub use stay::{add_stay_field, enrich, Enrichment, StayBucket, StayEnricher};

#[async_trait]
pub trait FnMap: Send + Sync {
    async fn call(&self, value: String) -> Result<String>;
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub struct MapFn<F>(pub F);
impl<F> MapFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}
#[async_trait]
impl<F> FnMap for MapFn<F>
where
    F: Fn(String) -> String + Send + Sync,
{
    async fn call(&self, value: String) -> Result<String> {
        Ok((self.0)(value))
    }
    fn name(&self) -> &'static str {
        "MapFn"
    }
}

/// Map operator: applies a function to each record value.
///
/// Exactly one record is emitted per input, keeping key, timestamp and source
/// offset. Tombstones are forwarded without calling the function.
///
/// Example
/// ```no_run
/// use stay_ops::{Map, MapFn};
/// let map = Map::new(MapFn::new(|v: String| v.trim().to_string()));
/// # let _ = map;
/// ```
pub struct Map<F> {
    func: F,
}
impl<F> Map<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Operator for Map<F>
where
    F: FnMap + Send + Sync + 'static,
{
    #[instrument(name = "map_on_element", skip_all, fields(func = self.func.name()))]
    async fn on_element(&mut self, ctx: &mut dyn Context, rec: Record) -> Result<()> {
        stay_core::metrics::OP_THROUGHPUT
            .with_label_values(&["Map", "receive"])
            .inc();
        let mut rec = rec;
        rec.value = match rec.value.take() {
            Some(v) => Some(self.func.call(v).await?),
            None => None,
        };
        ctx.collect(rec);
        stay_core::metrics::OP_THROUGHPUT
            .with_label_values(&["Map", "emit"])
            .inc();
        Ok(())
    }

    fn name(&self) -> String {
        format!("Map({})", self.func.name())
    }
}

pub mod prelude {
    pub use super::{add_stay_field, enrich, FnMap, Map, MapFn, StayBucket, StayEnricher};
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCtx {
        out: Vec<Record>,
    }

    impl Context for TestCtx {
        fn collect(&mut self, record: Record) {
            self.out.push(record);
        }
    }

    #[tokio::test]
    async fn test_map() {
        let mut op = Map::new(MapFn::new(|v: String| v.to_uppercase()));
        let mut ctx = TestCtx { out: vec![] };
        let rec = Record::from_value("abc")
            .with_key("k")
            .with_timestamp(7)
            .with_offset("expedia", 2, 11);
        op.on_element(&mut ctx, rec).await.unwrap();
        let want = Record::new(Some("k".into()), Some("ABC".into()), Some(7)).with_offset("expedia", 2, 11);
        assert_eq!(ctx.out, vec![want]);
    }

    #[tokio::test]
    async fn map_forwards_tombstones() {
        let mut op = Map::new(MapFn::new(|_: String| -> String { panic!("not called") }));
        let mut ctx = TestCtx { out: vec![] };
        let tombstone = Record::new(Some("k".into()), None, None);
        op.on_element(&mut ctx, tombstone.clone()).await.unwrap();
        assert_eq!(ctx.out, vec![tombstone]);
    }

    #[tokio::test]
    async fn stay_enricher_in_map_keeps_envelope() {
        let mut op = Map::new(StayEnricher);
        let mut ctx = TestCtx { out: vec![] };
        let raw = r#"{"srch_ci":"2024-01-01","srch_co":"2024-01-05"}"#;
        op.on_element(&mut ctx, Record::from_value(raw).with_key("booking-1"))
            .await
            .unwrap();
        op.on_element(&mut ctx, Record::from_value("<xml/>").with_key("booking-2"))
            .await
            .unwrap();
        assert_eq!(ctx.out.len(), 2);
        assert_eq!(ctx.out[0].key.as_deref(), Some("booking-1"));
        assert_eq!(
            ctx.out[0].value.as_deref(),
            Some(r#"{"srch_ci":"2024-01-01","srch_co":"2024-01-05","stay":"1"}"#)
        );
        assert_eq!(ctx.out[1].value.as_deref(), Some("<xml/>"));
        assert_eq!(op.name(), "Map(StayEnricher)");
    }
}
