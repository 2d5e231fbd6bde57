//! stay-core: record model, stream traits and a small executor.
//!
//! Provides the pieces the stay-calculate job is wired from:
//! - `Record`: a keyed string message with an optional broker timestamp
//! - Traits: `Source`, `Operator`, `Sink`, `Context`
//! - `Executor`: tokio-based runtime driving source -> operators -> sink
//! - `Committer`: lets a source commit offsets once their records are delivered
//! - `config`: the job configuration, `metrics`: Prometheus registry
//!
//! Quick example:
//! ```no_run
//! use stay_core::{Context, Source, Sink, Operator, Record};
//! # #[tokio::main]
//! # async fn main() -> stay_core::Result<()> {
//! struct MySource;
//! #[async_trait::async_trait]
//! impl Source for MySource {
//!     async fn run(&mut self, ctx: &mut dyn Context) -> stay_core::Result<()> {
//!         ctx.collect(Record::from_value("{}"));
//!         Ok(())
//!     }
//! }
//!
//! struct MyOp;
//! #[async_trait::async_trait]
//! impl Operator for MyOp {
//!     async fn on_element(&mut self, ctx: &mut dyn Context, rec: Record) -> stay_core::Result<()> {
//!         ctx.collect(rec);
//!         Ok(())
//!     }
//! }
//!
//! struct MySink;
//! #[async_trait::async_trait]
//! impl Sink for MySink {
//!     async fn on_element(&mut self, _rec: Record) -> stay_core::Result<()> { Ok(()) }
//! }
//!
//! let mut exec = stay_core::Executor::new();
//! exec.source(MySource).operator(MyOp).sink(MySink);
//! exec.run().await?;
//! # Ok(()) }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

mod commit;
pub mod config;
pub mod metrics;
mod record;

pub use commit::{Committer, DeliveredOffsets};
pub use record::{Offset, Record};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Collects records emitted by a source or operator.
pub trait Context: Send {
    fn collect(&mut self, record: Record);
}

#[async_trait::async_trait]
pub trait Source: Send {
    async fn run(&mut self, ctx: &mut dyn Context) -> Result<()>;
    /// Called once before `run`. Sources whose records carry offsets return a
    /// committer; the executor hands it delivered offsets only.
    fn committer(&mut self) -> Result<Option<Arc<dyn Committer>>> {
        Ok(None)
    }
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[async_trait::async_trait]
pub trait Operator: Send {
    async fn on_element(&mut self, ctx: &mut dyn Context, record: Record) -> Result<()>;
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[async_trait::async_trait]
pub trait Sink: Send {
    async fn on_element(&mut self, record: Record) -> Result<()>;
    /// Makes every record passed to `on_element` durable. Called before
    /// offsets are committed and once after the last record.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

pub struct Executor {
    source: Option<Box<dyn Source>>,
    operators: Vec<Box<dyn Operator>>,
    sink: Option<Box<dyn Sink>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            source: None,
            operators: Vec::new(),
            sink: None,
        }
    }

    pub fn source<S: Source + 'static>(&mut self, s: S) -> &mut Self {
        self.source = Some(Box::new(s));
        self
    }

    pub fn operator<O: Operator + 'static>(&mut self, o: O) -> &mut Self {
        self.operators.push(Box::new(o));
        self
    }

    pub fn sink<K: Sink + 'static>(&mut self, s: K) -> &mut Self {
        self.sink = Some(Box::new(s));
        self
    }

    /// One-line description of the wired topology, e.g.
    /// `Source: KafkaSource(expedia) --> Map(StayEnricher) --> Sink: KafkaSink(expedia_ext)`.
    pub fn describe(&self) -> String {
        let mut stages = Vec::with_capacity(self.operators.len() + 2);
        stages.push(format!(
            "Source: {}",
            self.source.as_ref().map_or_else(|| "<none>".to_string(), |s| s.name())
        ));
        stages.extend(self.operators.iter().map(|op| op.name()));
        stages.push(format!(
            "Sink: {}",
            self.sink.as_ref().map_or_else(|| "<none>".to_string(), |s| s.name())
        ));
        stages.join(" --> ")
    }

    /// Runs until the source is exhausted.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs until the source is exhausted or `shutdown` resolves. On shutdown
    /// the source is stopped, records it already emitted are drained through
    /// the operators into the sink, and the sink is flushed.
    ///
    /// When the source provides a committer, delivered offsets are committed
    /// every `Committer::interval` after a sink flush, and once more after the
    /// final flush. A failed run commits nothing past the last flush.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Record>();

        struct ExecCtx {
            tx: tokio::sync::mpsc::UnboundedSender<Record>,
        }

        impl Context for ExecCtx {
            fn collect(&mut self, record: Record) {
                metrics::QUEUE_DEPTH.inc();
                if self.tx.send(record).is_err() {
                    metrics::QUEUE_DEPTH.dec();
                }
            }
        }

        let mut source = self.source.take().ok_or_else(|| anyhow::anyhow!("no source"))?;
        let mut ops = std::mem::take(&mut self.operators);
        let mut sink = self.sink.take().ok_or_else(|| anyhow::anyhow!("no sink"))?;
        let committer = source.committer()?;

        // Source task; its context owns the only sender, so the channel closes
        // when the source finishes or is aborted.
        let mut sctx = ExecCtx { tx };
        let mut src_handle = tokio::spawn(async move { source.run(&mut sctx).await });
        let src_abort = src_handle.abort_handle();

        // Operator chain + sink task
        let mut op_handle = tokio::spawn(async move {
            let mut done = DeliveredOffsets::default();
            let period = committer
                .as_ref()
                .map_or(Duration::from_secs(3600), |c| c.interval());
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some(rec) = next else { break };
                        metrics::QUEUE_DEPTH.dec();
                        let offset = rec.offset.clone();
                        deliver(&mut ops, sink.as_mut(), rec).await?;
                        if let Some(o) = &offset {
                            done.mark(o);
                        }
                    }
                    _ = ticker.tick(), if committer.is_some() && !done.is_empty() => {
                        sink.flush().await?;
                        if let Some(c) = &committer {
                            let offsets = done.take();
                            debug!(partitions = offsets.len(), "committing delivered offsets");
                            if let Err(e) = c.commit(offsets).await {
                                warn!(error = %e, "offset commit failed");
                            }
                        }
                    }
                }
            }

            debug!(sink = %sink.name(), "input drained, flushing sink");
            sink.flush().await?;
            if let Some(c) = &committer {
                if !done.is_empty() {
                    c.commit(done.take()).await?;
                }
            }
            Ok::<_, Error>(())
        });

        tokio::pin!(shutdown);
        let src_result = tokio::select! {
            res = &mut src_handle => joined(res),
            _ = &mut shutdown => {
                info!("shutdown requested, stopping source");
                src_abort.abort();
                Ok(())
            }
            res = &mut op_handle => {
                // operator or sink failed (or finished early); the source has nowhere to go
                src_abort.abort();
                return joined(res);
            }
        };
        let op_result = joined(op_handle.await);
        src_result.and(op_result)
    }
}

struct LocalCtx<'a> {
    out: &'a mut Vec<Record>,
}

impl Context for LocalCtx<'_> {
    fn collect(&mut self, record: Record) {
        self.out.push(record);
    }
}

/// Pushes one record through the operator chain and hands every result to the sink.
async fn deliver(ops: &mut [Box<dyn Operator>], sink: &mut dyn Sink, rec: Record) -> Result<()> {
    let mut batch = vec![rec];
    for op in ops.iter_mut() {
        let mut next = Vec::new();
        for item in batch.drain(..) {
            let mut lctx = LocalCtx { out: &mut next };
            let started = Instant::now();
            op.on_element(&mut lctx, item).await?;
            metrics::OP_PROC_LATENCY_MS.observe(elapsed_ms(started));
        }
        batch = next;
        if batch.is_empty() {
            return Ok(());
        }
    }
    for out in batch {
        let started = Instant::now();
        sink.on_element(out).await?;
        metrics::SINK_PROC_LATENCY_MS.observe(elapsed_ms(started));
    }
    Ok(())
}

fn joined(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    res.map_err(|e| Error::Anyhow(anyhow::anyhow!(e)))?
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

pub mod prelude {
    pub use super::{Committer, Context, Executor, Offset, Operator, Record, Result, Sink, Source};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct VecSource(Vec<Record>);
    #[async_trait::async_trait]
    impl Source for VecSource {
        async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
            for rec in self.0.drain(..) {
                ctx.collect(rec);
            }
            Ok(())
        }
        fn name(&self) -> String {
            "VecSource".into()
        }
    }

    /// Emits a few records and then never finishes.
    struct EndlessSource;
    #[async_trait::async_trait]
    impl Source for EndlessSource {
        async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
            ctx.collect(Record::from_value("a"));
            ctx.collect(Record::from_value("b"));
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Upper;
    #[async_trait::async_trait]
    impl Operator for Upper {
        async fn on_element(&mut self, ctx: &mut dyn Context, mut rec: Record) -> Result<()> {
            rec.value = rec.value.map(|v| v.to_uppercase());
            ctx.collect(rec);
            Ok(())
        }
        fn name(&self) -> String {
            "Upper".into()
        }
    }

    struct DropAll;
    #[async_trait::async_trait]
    impl Operator for DropAll {
        async fn on_element(&mut self, _ctx: &mut dyn Context, _rec: Record) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CollectSink {
        out: Arc<Mutex<Vec<Record>>>,
        flushed: Arc<Mutex<bool>>,
    }
    #[async_trait::async_trait]
    impl Sink for CollectSink {
        async fn on_element(&mut self, record: Record) -> Result<()> {
            self.out.lock().await.push(record);
            Ok(())
        }
        async fn flush(&mut self) -> Result<()> {
            *self.flushed.lock().await = true;
            Ok(())
        }
        fn name(&self) -> String {
            "CollectSink".into()
        }
    }

    struct FailingSink;
    #[async_trait::async_trait]
    impl Sink for FailingSink {
        async fn on_element(&mut self, _record: Record) -> Result<()> {
            Err(anyhow::anyhow!("broker unavailable").into())
        }
    }

    /// Emits `values` with consecutive offsets on partition 0, then idles.
    struct PartitionSource {
        values: Vec<&'static str>,
        committer: Arc<RecordingCommitter>,
    }
    #[async_trait::async_trait]
    impl Source for PartitionSource {
        async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
            for (i, v) in self.values.iter().enumerate() {
                ctx.collect(Record::from_value(*v).with_offset("expedia", 0, i as i64));
            }
            std::future::pending::<()>().await;
            Ok(())
        }
        fn committer(&mut self) -> Result<Option<Arc<dyn Committer>>> {
            Ok(Some(self.committer.clone()))
        }
    }

    /// Remembers each commit together with how many records the sink held at that moment.
    struct RecordingCommitter {
        interval: Duration,
        delivered: Arc<Mutex<Vec<Record>>>,
        commits: Mutex<Vec<(Vec<Offset>, usize)>>,
    }
    #[async_trait::async_trait]
    impl Committer for RecordingCommitter {
        fn interval(&self) -> Duration {
            self.interval
        }
        async fn commit(&self, offsets: Vec<Offset>) -> Result<()> {
            let seen = self.delivered.lock().await.len();
            self.commits.lock().await.push((offsets, seen));
            Ok(())
        }
    }

    /// Accepts records until it meets `poison`.
    #[derive(Clone, Default)]
    struct PickySink {
        out: Arc<Mutex<Vec<Record>>>,
        poison: &'static str,
    }
    #[async_trait::async_trait]
    impl Sink for PickySink {
        async fn on_element(&mut self, record: Record) -> Result<()> {
            if record.value.as_deref() == Some(self.poison) {
                return Err(anyhow::anyhow!("delivery failed").into());
            }
            self.out.lock().await.push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn offsets_are_committed_after_delivery_on_shutdown() {
        let sink = PickySink::default();
        let committer = Arc::new(RecordingCommitter {
            interval: Duration::from_secs(3600),
            delivered: sink.out.clone(),
            commits: Mutex::default(),
        });
        let mut exec = Executor::new();
        exec.source(PartitionSource {
            values: vec!["a", "b", "c"],
            committer: committer.clone(),
        })
        .operator(Upper)
        .sink(sink.clone());
        exec.run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();

        assert_eq!(sink.out.lock().await.len(), 3);
        let commits = committer.commits.lock().await;
        assert_eq!(
            *commits,
            vec![(
                vec![Offset {
                    topic: "expedia".into(),
                    partition: 0,
                    offset: 2
                }],
                3
            )]
        );
    }

    #[tokio::test]
    async fn undelivered_offsets_are_never_committed() {
        let sink = PickySink {
            poison: "c",
            ..PickySink::default()
        };
        let committer = Arc::new(RecordingCommitter {
            interval: Duration::from_millis(1),
            delivered: sink.out.clone(),
            commits: Mutex::default(),
        });
        let mut exec = Executor::new();
        exec.source(PartitionSource {
            values: vec!["a", "b", "c", "d"],
            committer: committer.clone(),
        })
        .sink(sink.clone());
        let err = exec.run().await.unwrap_err();
        assert!(err.to_string().contains("delivery failed"));

        for (offsets, seen) in committer.commits.lock().await.iter() {
            for o in offsets {
                assert!(o.offset < 2, "offset {} committed without delivery", o.offset);
                assert!((o.offset as usize) < *seen);
            }
        }
    }

    #[tokio::test]
    async fn runs_records_through_operators_in_order() {
        let sink = CollectSink::default();
        let mut exec = Executor::new();
        exec.source(VecSource(vec![
            Record::from_value("x").with_key("k1"),
            Record::from_value("y").with_key("k2"),
        ]))
        .operator(Upper)
        .sink(sink.clone());
        exec.run().await.unwrap();

        let out = sink.out.lock().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value.as_deref(), Some("X"));
        assert_eq!(out[0].key.as_deref(), Some("k1"));
        assert_eq!(out[1].value.as_deref(), Some("Y"));
        assert!(*sink.flushed.lock().await);
    }

    #[tokio::test]
    async fn empty_operator_output_skips_sink() {
        let sink = CollectSink::default();
        let mut exec = Executor::new();
        exec.source(VecSource(vec![Record::from_value("x")]))
            .operator(DropAll)
            .operator(Upper)
            .sink(sink.clone());
        exec.run().await.unwrap();
        assert!(sink.out.lock().await.is_empty());
    }

    #[tokio::test]
    async fn run_until_stops_endless_source_and_drains() {
        let sink = CollectSink::default();
        let mut exec = Executor::new();
        exec.source(EndlessSource).operator(Upper).sink(sink.clone());
        exec.run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        let out = sink.out.lock().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].value.as_deref(), Some("B"));
        assert!(*sink.flushed.lock().await);
    }

    #[tokio::test]
    async fn sink_error_aborts_run() {
        let mut exec = Executor::new();
        exec.source(EndlessSource).sink(FailingSink);
        let err = exec.run().await.unwrap_err();
        assert!(err.to_string().contains("broker unavailable"));
    }

    #[tokio::test]
    async fn missing_sink_is_an_error() {
        let mut exec = Executor::new();
        exec.source(VecSource(vec![]));
        assert!(exec.run().await.is_err());
    }

    #[test]
    fn describe_lists_stages() {
        let mut exec = Executor::new();
        exec.source(VecSource(vec![]))
            .operator(Upper)
            .sink(CollectSink::default());
        assert_eq!(exec.describe(), "Source: VecSource --> Upper --> Sink: CollectSink");
        assert_eq!(Executor::new().describe(), "Source: <none> --> Sink: <none>");
    }
}
