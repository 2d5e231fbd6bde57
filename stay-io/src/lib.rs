//! stay-io: sources and sinks for the stay-calculate job.
//! - `FileSource`: reads JSON lines, one record value per line
//! - `FileSink`: writes record values as lines to stdout or a file
//! - `KafkaSource` / `KafkaSink` (feature `kafka`): string key/value topics

use std::path::PathBuf;

use async_trait::async_trait;
use stay_core::{Context, Record, Result, Sink, Source};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::debug;

/// Reads JSON lines from a file or stdin and emits every line, blank ones
/// included, as a keyless record. Lines are not parsed here; malformed ones
/// reach the operators as-is.
pub struct FileSource {
    pub path: Option<PathBuf>,
}
impl FileSource {
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn stdin() -> Self {
        Self { path: None }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = match &self.path {
            Some(p) => Box::new(tokio::io::BufReader::new(tokio::fs::File::open(p).await?)),
            None => Box::new(tokio::io::BufReader::new(tokio::io::stdin())),
        };
        let mut lines = reader.lines();
        let mut n = 0usize;
        while let Some(line) = lines.next_line().await? {
            ctx.collect(Record::from_value(line));
            n += 1;
        }
        debug!(source = %self.name(), records = n, "file source exhausted");
        Ok(())
    }

    fn name(&self) -> String {
        match &self.path {
            Some(p) => format!("FileSource({})", p.display()),
            None => "FileSource(stdin)".to_string(),
        }
    }
}

/// Writes each record value as a single line to stdout or appends it to a file.
/// Tombstones have no line representation and are skipped. Stdout is flushed
/// per record; write errors such as a closed pipe are returned, not panicked on.
pub struct FileSink {
    pub path: Option<PathBuf>,
    writer: Option<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
}
impl FileSink {
    pub fn stdout() -> Self {
        Self { path: None, writer: None }
    }

    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            writer: None,
        }
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn on_element(&mut self, record: Record) -> Result<()> {
        let Some(line) = record.value else {
            debug!(key = ?record.key, "skipping tombstone");
            return Ok(());
        };
        if self.writer.is_none() {
            let out: Box<dyn AsyncWrite + Send + Unpin> = match &self.path {
                Some(p) => Box::new(
                    tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(p)
                        .await?,
                ),
                None => Box::new(tokio::io::stdout()),
            };
            self.writer = Some(BufWriter::new(out));
        }
        if let Some(w) = self.writer.as_mut() {
            w.write_all(line.as_bytes()).await?;
            w.write_all(b"\n").await?;
            if self.path.is_none() {
                w.flush().await?;
            }
        }
        stay_core::metrics::BYTES_WRITTEN
            .with_label_values(&["FileSink"])
            .inc_by((line.len() + 1) as u64);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush().await?;
        }
        Ok(())
    }

    fn name(&self) -> String {
        match &self.path {
            Some(p) => format!("FileSink({})", p.display()),
            None => "FileSink(stdout)".to_string(),
        }
    }
}

#[cfg(feature = "kafka")]
mod kafka {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context as AnyhowContext;
    use futures::StreamExt;
    use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
    use rdkafka::error::KafkaResult;
    use rdkafka::message::Message;
    use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
    use rdkafka::{ClientConfig, TopicPartitionList};
    use stay_core::config::KafkaConfig;
    use stay_core::{Committer, Offset};
    use tracing::{info, warn};

    const CONSUMER_DEFAULTS: &[(&str, &str)] = &[
        ("enable.partition.eof", "false"),
        ("enable.auto.commit", "false"),
        ("session.timeout.ms", "10000"),
    ];
    const PRODUCER_DEFAULTS: &[(&str, &str)] = &[("acks", "all")];

    /// Builds a client config: brokers, then `defaults`, then the user's extra
    /// properties, so configured properties always win.
    pub fn client_config(cfg: &KafkaConfig, defaults: &[(&str, &str)]) -> ClientConfig {
        let mut cc = ClientConfig::new();
        cc.set("bootstrap.servers", &cfg.brokers);
        for (k, v) in defaults {
            cc.set(*k, *v);
        }
        for (k, v) in &cfg.properties {
            cc.set(k, v);
        }
        cc
    }

    pub(crate) fn decode(bytes: Option<&[u8]>) -> Option<String> {
        bytes.map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub(crate) fn to_record<M: Message>(m: &M) -> Record {
        Record {
            key: decode(m.key()),
            value: decode(m.payload()),
            timestamp: m.timestamp().to_millis(),
            offset: Some(Offset {
                topic: m.topic().to_string(),
                partition: m.partition(),
                offset: m.offset(),
            }),
        }
    }

    /// Kafka commits the next offset to read, one past the last delivered record.
    pub(crate) fn commit_list(offsets: &[Offset]) -> KafkaResult<TopicPartitionList> {
        let mut tpl = TopicPartitionList::new();
        for o in offsets {
            tpl.add_partition_offset(&o.topic, o.partition, rdkafka::Offset::Offset(o.offset + 1))?;
        }
        Ok(tpl)
    }

    /// Commits delivered offsets on the consumer shared with `KafkaSource`.
    /// Holding the consumer here keeps the final commit possible after the
    /// source task has been stopped.
    struct KafkaCommitter {
        consumer: Arc<StreamConsumer>,
        interval: Duration,
    }

    #[async_trait]
    impl Committer for KafkaCommitter {
        fn interval(&self) -> Duration {
            self.interval
        }

        async fn commit(&self, offsets: Vec<Offset>) -> Result<()> {
            let consumer = self.consumer.clone();
            tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                let tpl = commit_list(&offsets).context("invalid commit offsets")?;
                consumer
                    .commit(&tpl, CommitMode::Sync)
                    .context("failed to commit offsets")?;
                debug!(partitions = offsets.len(), "offsets committed");
                Ok(())
            })
            .await
            .map_err(|e| anyhow::anyhow!(e))??;
            Ok(())
        }
    }

    pub struct KafkaSource {
        pub config: KafkaConfig,
        pub group_id: String,
        pub topic: String,
        pub commit_interval: Duration,
        consumer: Option<Arc<StreamConsumer>>,
    }

    impl KafkaSource {
        pub fn new(
            config: KafkaConfig,
            group_id: impl Into<String>,
            topic: impl Into<String>,
        ) -> anyhow::Result<Self> {
            let commit_interval = config.commit_interval()?;
            Ok(Self {
                config,
                group_id: group_id.into(),
                topic: topic.into(),
                commit_interval,
                consumer: None,
            })
        }

        pub fn consumer_config(&self) -> ClientConfig {
            let mut cc = client_config(&self.config, CONSUMER_DEFAULTS);
            // group and reset policy are job identity, not tunables
            cc.set("group.id", &self.group_id)
                .set("auto.offset.reset", &self.config.auto_offset_reset);
            cc
        }

        fn consumer(&mut self) -> anyhow::Result<Arc<StreamConsumer>> {
            if let Some(c) = &self.consumer {
                return Ok(c.clone());
            }
            let consumer: StreamConsumer = self
                .consumer_config()
                .create()
                .context("failed to create kafka consumer")?;
            let consumer = Arc::new(consumer);
            self.consumer = Some(consumer.clone());
            Ok(consumer)
        }
    }

    #[async_trait]
    impl Source for KafkaSource {
        async fn run(&mut self, ctx: &mut dyn Context) -> Result<()> {
            let consumer = self.consumer()?;
            consumer
                .subscribe(&[self.topic.as_str()])
                .context("failed to subscribe to topic")?;
            info!(topic = %self.topic, group = %self.group_id, "kafka source subscribed");

            let mut stream = consumer.stream();
            while let Some(ev) = stream.next().await {
                match ev {
                    Ok(m) => ctx.collect(to_record(&m)),
                    Err(e) => {
                        // Backoff briefly on errors
                        warn!(error = %e, topic = %self.topic, "kafka consumer error");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                }
            }
            Ok(())
        }

        fn committer(&mut self) -> Result<Option<Arc<dyn Committer>>> {
            let committer = KafkaCommitter {
                consumer: self.consumer()?,
                interval: self.commit_interval,
            };
            Ok(Some(Arc::new(committer)))
        }

        fn name(&self) -> String {
            format!("KafkaSource({})", self.topic)
        }
    }

    pub struct KafkaSink {
        pub config: KafkaConfig,
        pub topic: String,
        pub delivery_timeout: Duration,
        producer: Option<FutureProducer>,
    }

    impl KafkaSink {
        pub fn new(config: KafkaConfig, topic: impl Into<String>) -> Self {
            Self {
                config,
                topic: topic.into(),
                delivery_timeout: Duration::from_secs(5),
                producer: None,
            }
        }

        pub fn producer_config(&self) -> ClientConfig {
            client_config(&self.config, PRODUCER_DEFAULTS)
        }

        fn ensure_producer(&mut self) -> anyhow::Result<()> {
            if self.producer.is_none() {
                let producer = self
                    .producer_config()
                    .create()
                    .context("failed to create kafka producer")?;
                self.producer = Some(producer);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Sink for KafkaSink {
        async fn on_element(&mut self, record: Record) -> Result<()> {
            self.ensure_producer()?;
            let producer = self
                .producer
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("kafka producer not initialised"))?;
            let mut fr: FutureRecord<'_, str, str> = FutureRecord::to(&self.topic);
            if let Some(k) = record.key.as_deref() {
                fr = fr.key(k);
            }
            if let Some(v) = record.value.as_deref() {
                fr = fr.payload(v);
            }
            if let Some(ts) = record.timestamp {
                fr = fr.timestamp(ts);
            }
            // Awaiting delivery keeps output in input order and surfaces failures per record
            producer
                .send(fr, self.delivery_timeout)
                .await
                .map_err(|(e, _)| e)
                .with_context(|| format!("failed to deliver record to {}", self.topic))?;
            let bytes = record.value.as_ref().map_or(0, |v| v.len());
            stay_core::metrics::BYTES_WRITTEN
                .with_label_values(&["KafkaSink"])
                .inc_by(bytes as u64);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            if let Some(producer) = self.producer.clone() {
                let timeout = self.delivery_timeout;
                tokio::task::spawn_blocking(move || producer.flush(timeout))
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?
                    .context("failed to flush kafka producer")?;
            }
            Ok(())
        }

        fn name(&self) -> String {
            format!("KafkaSink({})", self.topic)
        }
    }
}

#[cfg(feature = "kafka")]
pub use kafka::{client_config, KafkaSink, KafkaSource};
