//! auto-pr-bot entry point.
//!
//! This binary is the composition root. It reads configuration from the
//! environment, installs the tracing subscriber (JSON or pretty output plus an
//! optional OTLP exporter), builds the concrete GitHub, OpenAI, git and store
//! adapters, and injects them into the pipeline and dispatch bridge.
//!
//! Two modes:
//!
//! - `serve` runs the HTTP intake and the worker pool that drains the
//!   dispatch queue, until Ctrl-C or SIGTERM.
//! - `run` executes one request in the foreground and prints the outcome as
//!   JSON. Useful for trying a prompt against a repository by hand.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use github::{GitHubClient, GitHubConfig};
use listener::ChannelQueue;
use llm::{OpenAiClient, OpenAiConfig};
use nodes::{
    DispatchBridge, GitCli, GitIdentity, ModelGateway, ModificationPipeline, PipelineContext,
    PipelineSettings, ProcessOutcome, RunOutcome,
};
use pipeline::{
    ChangeRequest, Clock, KeyValueStore, ProgressTracker, RateLimiter, RequestId, RequestPayload,
    SystemClock,
};
use serde_json::json;
use store::{MemoryStore, SqliteStore};
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::config::{Config, TelemetryConfig};

#[derive(Parser)]
#[command(
    name = "auto-pr-bot",
    version,
    about = "Turns natural-language change requests into pull requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP intake and process queued requests
    Serve,

    /// Run a single request in the foreground
    Run {
        /// Repository to modify, e.g. https://github.com/owner/repo
        #[arg(long)]
        repository_url: String,

        /// Description of the change
        #[arg(long)]
        prompt: String,

        /// Account to add as a collaborator on the fork
        #[arg(long)]
        github_username: Option<String>,
    },
}

/// Shared collaborators built from [`Config`].
struct Services {
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    tracker: ProgressTracker,
    pipeline: ModificationPipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = telemetry::init(&TelemetryConfig::from_env()?)?;

    let result = execute(cli.command).await;

    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "auto-pr-bot exited with an error");
    }
    telemetry.shutdown();
    result
}

async fn execute(command: Commands) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let services = build(&config).await?;
    match command {
        Commands::Serve => serve(&config, services).await,
        Commands::Run {
            repository_url,
            prompt,
            github_username,
        } => {
            let payload = RequestPayload {
                repository_url,
                modification_prompt: prompt,
                github_username,
            };
            run_once(services, payload).await
        }
    }
}

async fn build(config: &Config) -> anyhow::Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn KeyValueStore> = match &config.status_db_path {
        Some(path) => Arc::new(
            SqliteStore::open(path, &config.status_table, clock.clone())
                .await
                .with_context(|| format!("failed to open status store at {}", path.display()))?,
        ),
        None => {
            info!("STATUS_DB_PATH not set; progress records are kept in memory");
            Arc::new(MemoryStore::with_clock(clock.clone()))
        }
    };
    let tracker = ProgressTracker::new(store.clone(), clock.clone());

    let mut github = GitHubConfig::new(&config.github_token);
    github.api_base = config.github_api_base.clone();
    let vcs = GitHubClient::new(github).context("failed to build GitHub client")?;

    let mut openai = OpenAiConfig::new(&config.openai_api_key);
    openai.model = config.openai_model.clone();
    openai.api_base = config.openai_api_base.clone();
    let model = OpenAiClient::new(openai).context("failed to build OpenAI client")?;

    let git = GitCli::new(GitIdentity {
        author_name: config.git_author_name.clone(),
        author_email: config.git_author_email.clone(),
        token: config.github_token.clone(),
        web_base: config.github_web_base.clone(),
    });

    let pipeline = ModificationPipeline::new(PipelineContext {
        vcs: Arc::new(vcs),
        git: Arc::new(git),
        gateway: ModelGateway::new(Arc::new(model)),
        tracker: tracker.clone(),
        clock: clock.clone(),
        settings: PipelineSettings {
            workspace_root: config.workspace_root.clone(),
            ..PipelineSettings::default()
        },
    });

    Ok(Services {
        clock,
        store,
        tracker,
        pipeline,
    })
}

async fn serve(config: &Config, services: Services) -> anyhow::Result<()> {
    let (queue, receiver) =
        ChannelQueue::bounded(&config.dispatch_queue_name, config.dispatch_queue_capacity);
    info!(
        queue = %queue.name(),
        capacity = config.dispatch_queue_capacity,
        "dispatch queue ready"
    );
    let bridge = DispatchBridge::new(
        RateLimiter::new(services.store, services.clock),
        services.tracker,
        Arc::new(queue),
        services.pipeline,
    );

    let (stop_workers, workers_stopped) = oneshot::channel::<()>();
    let workers = tokio::spawn(listener::run_workers(
        receiver,
        bridge.clone(),
        config.worker_concurrency,
        async move {
            let _ = workers_stopped.await;
        },
    ));

    let router = listener::router(bridge);
    let served = listener::serve(config.bind_addr, router, shutdown_signal()).await;

    let _ = stop_workers.send(());
    workers.await.context("worker pool task failed")?;
    served?;
    info!("shutdown complete");
    Ok(())
}

async fn run_once(services: Services, payload: RequestPayload) -> anyhow::Result<()> {
    let request = ChangeRequest::try_from(payload)?;
    let request_id = RequestId::new_random();
    info!(request_id = %request_id, repository = %request.repository(), "running request");

    let outcome = services.pipeline.execute(request_id, &request).await;
    let record = services.tracker.get(request_id).await.ok();
    let summary = match &outcome {
        ProcessOutcome::Completed(RunOutcome::Created { pr_url, superseded }) => json!({
            "requestId": request_id,
            "result": "created",
            "prUrl": pr_url,
            "superseded": superseded,
        }),
        ProcessOutcome::Completed(RunOutcome::AlreadySatisfied { pr_url }) => json!({
            "requestId": request_id,
            "result": "already_satisfied",
            "prUrl": pr_url,
        }),
        ProcessOutcome::Rejected { reason } => json!({
            "requestId": request_id,
            "result": "rejected",
            "error": reason,
            "status": record,
        }),
        ProcessOutcome::Failed { detail } => json!({
            "requestId": request_id,
            "result": "failed",
            "error": detail,
            "status": record,
        }),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    match outcome {
        ProcessOutcome::Completed(_) => Ok(()),
        ProcessOutcome::Rejected { reason } => anyhow::bail!("request rejected: {reason}"),
        ProcessOutcome::Failed { detail } => anyhow::bail!("request failed: {detail}"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received; draining");
}
