use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context as _;
use axum::{routing::get, Router};
use clap::{Args, Parser, Subcommand};
use stay_core::config::PipelineConfig;
use stay_core::Executor;
use stay_io::{FileSink, FileSource};
use stay_ops::{Map, StayEnricher};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "stay-calculate",
    version,
    about = "Enrich booking records with a length-of-stay bucket",
    disable_help_subcommand = false
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the enrichment job until the source ends or a shutdown signal arrives
    Run {
        #[command(flatten)]
        job: JobArgs,
        /// Serve /metrics on this port (0 disables)
        #[arg(long, default_value_t = 0)]
        http_port: u16,
    },
    /// Print the job topology and exit
    Describe {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Enrich JSON lines read from stdin and write them to stdout
    Enrich,
}

#[derive(Args, Debug, Default)]
struct JobArgs {
    /// Job configuration file (toml); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override kafka.brokers
    #[arg(long)]
    brokers: Option<String>,
    /// Override source.topic
    #[arg(long)]
    input_topic: Option<String>,
    /// Override sink.topic
    #[arg(long)]
    output_topic: Option<String>,
}

impl JobArgs {
    fn load(&self) -> anyhow::Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(b) = &self.brokers {
            cfg.kafka.brokers = b.clone();
        }
        if let Some(t) = &self.input_topic {
            cfg.source.topic = t.clone();
        }
        if let Some(t) = &self.output_topic {
            cfg.sink.topic = t.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn app() -> Router {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics() -> String {
    stay_core::metrics::render_prometheus()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    // stdout may carry records, keep logs on stderr
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { job, http_port } => {
            let cfg = job.load()?;
            if http_port != 0 {
                let addr = SocketAddr::from(([127, 0, 0, 1], http_port));
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind metrics listener on {}", addr))?;
                info!("serving /metrics on {}", addr);
                tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app()).await {
                        warn!(error = %e, "metrics server stopped");
                    }
                });
            }
            run_pipeline(&cfg).await
        }
        Commands::Describe { job } => {
            let cfg = job.load()?;
            println!("{}", build_executor(&cfg)?.describe());
            Ok(())
        }
        Commands::Enrich => {
            let mut exec = Executor::new();
            exec.source(FileSource::stdin())
                .operator(Map::new(StayEnricher))
                .sink(FileSink::stdout());
            exec.run().await?;
            Ok(())
        }
    }
}

async fn run_pipeline(cfg: &PipelineConfig) -> anyhow::Result<()> {
    let mut exec = build_executor(cfg)?;
    info!(app = %cfg.app.id, topology = %exec.describe(), "starting");
    if let Some(url) = &cfg.kafka.schema_registry_url {
        info!(schema_registry = %url, "values are plain strings; schema registry not consulted");
    }
    exec.run_until(shutdown_signal()).await?;
    info!(app = %cfg.app.id, "stopped");
    Ok(())
}

fn build_executor(cfg: &PipelineConfig) -> anyhow::Result<Executor> {
    let mut exec = Executor::new();
    match cfg.source.kind.as_str() {
        #[cfg(feature = "kafka")]
        "kafka" => {
            exec.source(stay_io::KafkaSource::new(
                cfg.kafka.clone(),
                cfg.app.id.clone(),
                cfg.source.topic.clone(),
            )?);
        }
        "file" => {
            let path = cfg.source.path.clone().context("source.path must be set")?;
            exec.source(FileSource::jsonl(path));
        }
        other => anyhow::bail!("source kind {} is not available in this build", other),
    }
    exec.operator(Map::new(StayEnricher));
    match cfg.sink.kind.as_str() {
        #[cfg(feature = "kafka")]
        "kafka" => {
            exec.sink(stay_io::KafkaSink::new(cfg.kafka.clone(), cfg.sink.topic.clone()));
        }
        "file" => {
            let path = cfg.sink.path.clone().context("sink.path must be set")?;
            exec.sink(FileSink::to_path(path));
        }
        "stdout" => {
            exec.sink(FileSink::stdout());
        }
        other => anyhow::bail!("sink kind {} is not available in this build", other),
    }
    Ok(exec)
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
