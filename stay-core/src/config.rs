use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

pub const DEFAULT_APP_ID: &str = "stay-calculate-app";
pub const DEFAULT_INPUT_TOPIC: &str = "expedia";
pub const DEFAULT_OUTPUT_TOPIC: &str = "expedia_ext";
pub const DEFAULT_BROKERS: &str = "localhost:9092";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Application identifier; also used as the consumer group id.
    pub id: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { id: DEFAULT_APP_ID.into() }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: String,          // "kafka" | "file"
    pub topic: String,         // kafka
    pub path: Option<PathBuf>, // file
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: "kafka".into(),
            topic: DEFAULT_INPUT_TOPIC.into(),
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: String,          // "kafka" | "file" | "stdout"
    pub topic: String,         // kafka
    pub path: Option<PathBuf>, // file
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "kafka".into(),
            topic: DEFAULT_OUTPUT_TOPIC.into(),
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub brokers: String,
    /// Kept for deployments that front the topics with a registry; the job
    /// reads and writes plain strings and never contacts it.
    pub schema_registry_url: Option<String>,
    pub auto_offset_reset: String,
    pub commit_interval: String, // e.g. "5s"
    /// Extra librdkafka properties applied to both consumer and producer.
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: DEFAULT_BROKERS.into(),
            schema_registry_url: None,
            auto_offset_reset: "earliest".into(),
            commit_interval: "5s".into(),
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn commit_interval(&self) -> anyhow::Result<std::time::Duration> {
        let ms = parse_duration_ms(&self.commit_interval)?;
        match u64::try_from(ms) {
            Ok(ms) if ms > 0 => Ok(std::time::Duration::from_millis(ms)),
            _ => anyhow::bail!("commit interval must be positive, got {}", self.commit_interval),
        }
    }
}

/// Process-wide job configuration, built once at startup and handed to the
/// sources and sinks. The enricher itself never sees it.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub app: AppConfig,
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub kafka: KafkaConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn uses_kafka(&self) -> bool {
        self.source.kind == "kafka" || self.sink.kind == "kafka"
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app.id.trim().is_empty() {
            anyhow::bail!("app.id must not be empty");
        }
        match self.source.kind.as_str() {
            "kafka" => {
                if self.source.topic.trim().is_empty() {
                    anyhow::bail!("source.topic must be set for a kafka source");
                }
            }
            "file" => {
                if self.source.path.is_none() {
                    anyhow::bail!("source.path must be set for a file source");
                }
            }
            other => anyhow::bail!("unsupported source kind: {}", other),
        }
        match self.sink.kind.as_str() {
            "kafka" => {
                if self.sink.topic.trim().is_empty() {
                    anyhow::bail!("sink.topic must be set for a kafka sink");
                }
            }
            "file" => {
                if self.sink.path.is_none() {
                    anyhow::bail!("sink.path must be set for a file sink");
                }
            }
            "stdout" => {}
            other => anyhow::bail!("unsupported sink kind: {}", other),
        }
        if self.uses_kafka() {
            if self.kafka.brokers.trim().is_empty() {
                anyhow::bail!("kafka.brokers must be set");
            }
            match self.kafka.auto_offset_reset.as_str() {
                "earliest" | "latest" | "error" => {}
                other => anyhow::bail!("unsupported kafka.auto_offset_reset: {}", other),
            }
            self.kafka
                .commit_interval()
                .context("invalid kafka.commit_interval")?;
        }
        Ok(())
    }
}

pub fn parse_duration_ms(s: &str) -> anyhow::Result<i64> {
    // very small parser for values like "10s", "500ms", "2m"
    let s = s.trim();
    if let Some(num) = s.strip_suffix("ms") {
        return Ok(num.parse::<i64>()?);
    }
    if let Some(num) = s.strip_suffix('s') {
        return Ok(num.parse::<i64>()? * 1_000);
    }
    if let Some(num) = s.strip_suffix('m') {
        return Ok(num.parse::<i64>()? * 60_000);
    }
    if let Some(num) = s.strip_suffix('h') {
        return Ok(num.parse::<i64>()? * 3_600_000);
    }
    // default assume seconds
    Ok(s.parse::<i64>()? * 1_000)
}
