use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::CadenceConfig;
use cadence_scheduler::{ExecutionEngine, JobRegistry, JobRunner, Notifier, ScopeProvider};
use clap::Parser;
use tracing::{error, info, warn};

mod container;
mod jobs;

use container::StaticProvider;
use jobs::Heartbeat;

/// How long Ctrl-C waits for in-flight ticks before exiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "cadence-daemon", version, about = "Run registered jobs on a fixed interval")]
struct Args {
    /// Path to cadence.toml (falls back to CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(long)]
    config: Option<String>,

    /// Discover jobs, run a single tick and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_daemon=info,cadence_scheduler=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = CadenceConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let beats = Arc::new(AtomicU64::new(0));
    let provider = StaticProvider::new().with_job(move || Heartbeat::new(Arc::clone(&beats)));
    info!(factories = provider.len(), "job container ready");
    let provider: Arc<dyn ScopeProvider> = Arc::new(provider);

    if args.once {
        return run_once(provider, &config).await;
    }

    let runner = JobRunner::new(provider, config.scheduler.clone());
    log_failures(runner.notifier());
    runner.start()?;
    info!(
        jobs = runner.job_types().len(),
        every_ms = config.scheduler.execute_interval_ms,
        "cadence-daemon running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    runner.stop();
    if !runner.wait_idle(SHUTDOWN_GRACE).await {
        warn!(
            in_flight = runner.ticks_in_flight(),
            grace_s = SHUTDOWN_GRACE.as_secs(),
            "ticks still running at shutdown"
        );
    }
    runner.release();
    Ok(())
}

async fn run_once(provider: Arc<dyn ScopeProvider>, config: &CadenceConfig) -> anyhow::Result<()> {
    let registry = JobRegistry::discover(provider.as_ref())?;
    let notifier = Arc::new(Notifier::new());
    log_failures(&notifier);

    let engine = Arc::new(ExecutionEngine::new(
        provider,
        notifier,
        config.scheduler.parallelism(),
    ));
    let report = engine.run_tick(1, registry.snapshot()).await;
    info!(
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failures.len(),
        aborted = report.aborted,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "single tick complete"
    );
    if !report.is_clean() {
        anyhow::bail!("{} of {} jobs did not succeed", report.attempted - report.succeeded, report.attempted);
    }
    Ok(())
}

fn log_failures(notifier: &Notifier) {
    notifier.on_job_failed("failure-log", |ev| {
        error!(
            job = %ev.failure.job_type(),
            stage = ev.failure.stage(),
            instance = ev.job.is_some(),
            error = %ev.failure.error(),
            "job failed"
        );
        Ok(())
    });
}
