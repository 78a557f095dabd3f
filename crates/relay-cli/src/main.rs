use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use relay_core::app::{AppBuilder, TaskContext, TaskServices, WorkerGroup, require_finished};
use relay_core::domain::{Arguments, Status, TaskError, TaskId};
use relay_core::impls::{InMemoryTaskStore, InMemoryWorkQueue, SqliteTaskStore};
use relay_core::ports::{IdGenerator, SystemClock, TaskFilter, TaskStore, UlidGenerator};
use relay_core::typed::{Handler, Task, encode, encode_tracked};
use relay_core::RelayConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Runs a small build tree through the task runner until every build is finished.
#[derive(Debug, Parser)]
#[command(name = "relay", version, about)]
struct Args {
    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// `memory` or a SQLite URL such as `sqlite://relay.db?mode=rwc`
    #[arg(long, default_value = "memory")]
    store: String,

    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value_t = 2)]
    builds: usize,

    /// Jobs per build
    #[arg(long, default_value_t = 3)]
    jobs: usize,

    /// Sub-second delays instead of the configured ones
    #[arg(long)]
    fast: bool,
}

fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("failed to install json logger")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("failed to install pretty logger")?,
    }
    Ok(())
}

async fn open_store(url: &str) -> Result<Arc<dyn TaskStore>> {
    if url == "memory" {
        return Ok(Arc::new(InMemoryTaskStore::new()));
    }
    let store = SqliteTaskStore::connect(url)
        .await
        .with_context(|| format!("failed to open task store {url}"))?;
    Ok(Arc::new(store))
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncBuild {
    jobs: usize,
}

impl Task for SyncBuild {
    const NAME: &'static str = "sync_build";
}

#[derive(Debug, Serialize, Deserialize)]
struct SyncJob {
    job_number: usize,

    /// Polls until the job reports done.
    polls: u32,
}

impl Task for SyncJob {
    const NAME: &'static str = "sync_job";
}

struct SyncBuildHandler;

#[async_trait]
impl Handler<SyncBuild> for SyncBuildHandler {
    async fn handle(&self, ctx: TaskContext, build: SyncBuild) -> Result<(), TaskError> {
        let Some(build_id) = ctx.task_id() else {
            return Err(TaskError::failed("sync_build needs a task id"));
        };

        let mut arguments: HashMap<TaskId, Arguments> = HashMap::new();
        for job_number in 0..build.jobs {
            let job = SyncJob {
                job_number,
                polls: 2 + job_number as u32,
            };
            arguments.insert(TaskId::new(format!("{build_id}-job{job_number}")), encode(&job)?);
        }
        let child_ids: Vec<TaskId> = arguments.keys().cloned().collect();

        let status = ctx
            .verify_children(
                &SyncJob::task_name(),
                &child_ids,
                |id| arguments.get(id).cloned().unwrap_or_default(),
                true,
            )
            .await?;
        info!(build_id = %build_id, %status, "build children verified");
        require_finished(status)?;

        let all = ctx.verify_all_children().await?;
        info!(build_id = %build_id, %all, "build finished");
        Ok(())
    }
}

/// Fakes a remote CI job: "still running" for a few polls, and job 0 of
/// every build fails once.
#[derive(Default)]
struct SyncJobHandler {
    polls: Mutex<HashMap<TaskId, u32>>,
}

#[async_trait]
impl Handler<SyncJob> for SyncJobHandler {
    async fn handle(&self, ctx: TaskContext, job: SyncJob) -> Result<(), TaskError> {
        let Some(job_id) = ctx.task_id() else {
            return Err(TaskError::failed("sync_job needs a task id"));
        };

        let seen = {
            let mut polls = self
                .polls
                .lock()
                .map_err(|_| TaskError::failed("poll counter poisoned"))?;
            let seen = polls.entry(job_id.clone()).or_default();
            *seen += 1;
            *seen
        };

        if job.job_number == 0 && seen == 1 {
            return Err(TaskError::failed("jenkins returned 502"));
        }
        if seen < job.polls {
            return Err(TaskError::NotFinished);
        }
        info!(job_id = %job_id, polls = seen, "job finished");
        Ok(())
    }
}

async fn all_finished(store: &dyn TaskStore, build_ids: &[TaskId]) -> Result<bool> {
    let builds = store
        .query(
            &TaskFilter::default()
                .named(&SyncBuild::task_name())
                .ids(build_ids.to_vec()),
        )
        .await?;
    Ok(builds.len() == build_ids.len() && builds.iter().all(|b| b.status == Status::Finished))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format)?;

    let config = RelayConfig::load(args.config.as_deref()).context("failed to load config")?;
    let mut policy = config.policy();
    if args.fast {
        policy.continue_delay = Duration::from_millis(200);
        policy.retry_delay = Duration::from_millis(500);
    }
    info!(?policy, workers = config.workers, store = %args.store, "starting relay");

    let store = open_store(&args.store).await?;
    let queue = Arc::new(InMemoryWorkQueue::with_history_limit(0));
    let services = TaskServices::new(
        Arc::clone(&store),
        queue.clone(),
        Arc::new(SystemClock),
        policy,
    );

    let app = AppBuilder::new(services)
        .typed::<SyncBuild, _>(SyncBuildHandler)?
        .typed::<SyncJob, _>(SyncJobHandler::default())?
        .expect_tasks(&[SyncBuild::NAME, SyncJob::NAME])
        .build()?;
    let app = Arc::new(app);

    let workers = WorkerGroup::spawn(config.workers, queue.clone(), Arc::clone(&app));

    let ids = UlidGenerator::new(SystemClock);
    let mut build_ids = Vec::with_capacity(args.builds);
    for _ in 0..args.builds {
        let build_id = ids.generate_task_id();
        let arguments = encode_tracked(&SyncBuild { jobs: args.jobs }, &build_id, None)?;
        app.delay(&SyncBuild::task_name(), arguments).await?;
        info!(build_id = %build_id, jobs = args.jobs, "build enqueued");
        build_ids.push(build_id);
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {
                if all_finished(store.as_ref(), &build_ids).await? {
                    info!(builds = build_ids.len(), "all builds finished");
                    break;
                }
            }
        }
    }

    queue.close().await;
    workers.shutdown_and_join().await;

    for record in store.query(&TaskFilter::default()).await? {
        info!(
            task_name = %record.key.task_name,
            task_id = %record.key.task_id,
            parent_id = ?record.key.parent_id.as_ref().map(TaskId::as_str),
            status = %record.status,
            result = %record.result,
            num_retries = record.num_retries,
            "task"
        );
    }
    Ok(())
}
