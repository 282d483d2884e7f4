use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tubeq_core::app::{Disposition, HandlerError, WorkerPool};
use tubeq_core::typed::{Handler, Job, TypedHandler, TypedQueue};
use tubeq_core::{BrokerBuilder, EngineConfig, JobQueue, Message, SubmitOptions};

#[derive(Parser)]
#[command(name = "tubeq", about = "Run a demo producer and worker pool on an in-memory tube")]
struct Cli {
    /// TOML config file; built-in defaults when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Jobs to submit
    #[arg(long, default_value_t = 20)]
    jobs: u32,

    /// Concurrent workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Fail the first N deliveries of every job to exercise redelivery
    #[arg(long, default_value_t = 0)]
    fail_first: u32,

    /// Jobs the handler buries instead of finishing
    #[arg(long, default_value_t = 1)]
    poison: u32,

    /// Give up waiting for the workers after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// JSON log lines instead of human-readable ones
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
    poison: bool,
}

impl Job for Hello {
    const TUBE: &'static str = "hello";
}

/// handler: 最初の `fail_first` 回は失敗し、poison は bury する
struct HelloHandler {
    fail_first: u32,
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, job: Hello, message: &Message) -> Result<Disposition, HandlerError> {
        if message.reserve_count <= self.fail_first {
            return Err(HandlerError::new(format!(
                "intentional failure (delivery {})",
                message.reserve_count
            )));
        }
        if job.poison {
            return Ok(Disposition::Bury);
        }
        info!(id = %message.id, priority = message.priority, "hello, {}", job.name);
        Ok(Disposition::Finish)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    // (A) 設定を読み込み、broker と tube を用意
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let connection = config.connection.clone();
    info!(
        host = %connection.host,
        port = connection.port,
        "connection settings loaded (unused by the in-memory engine)"
    );

    let broker = BrokerBuilder::new()
        .config(config)
        .open_tubes(&[Hello::TUBE])
        .build()
        .context("building broker")?;
    let queue: Arc<dyn JobQueue> = broker.open(&Hello::tube()?);
    queue.ping().await.context("message store health check")?;

    // (B) worker を起動
    let handler = TypedHandler::<Hello, _>::new(HelloHandler {
        fail_first: cli.fail_first,
    });
    let pool = WorkerPool::spawn(cli.workers, queue.clone(), Arc::new(handler));

    // (C) job を投入（priority は 0..3 を巡回）
    let typed = TypedQueue::<Hello>::new(queue.clone());
    let total = cli.jobs + cli.poison;
    for i in 0..total {
        let job = Hello {
            name: format!("job-{i}"),
            poison: i >= cli.jobs,
        };
        typed
            .submit(&job, SubmitOptions::new().priority(i % 3))
            .await
            .with_context(|| format!("submitting job {i}"))?;
    }
    info!(jobs = cli.jobs, poison = cli.poison, "submitted");

    // (D) 全件が finish か bury されるのを待つ（Ctrl-C でも抜ける）
    let deadline = Instant::now() + Duration::from_secs(cli.timeout_secs);
    loop {
        let stats = queue.stats().await;
        if stats.finished + stats.buried as u64 >= u64::from(total) {
            break;
        }
        if Instant::now() >= deadline {
            warn!(?stats, "timed out waiting for workers");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted");
                break;
            }
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }

    // (E) graceful shutdown と統計の出力
    pool.shutdown_and_join().await;
    let status = broker.status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    broker.shutdown().await;
    Ok(())
}
