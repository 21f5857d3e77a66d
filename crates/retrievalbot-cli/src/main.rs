use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use retrievalbot_core::app::standalone::{self, DEFAULT_PROBE_TIMEOUT};
use retrievalbot_core::app::{
    PowerLawWeighting, ReaperLoop, Scheduler, SchedulerDeps, WorkerContext, WorkerDescriptor,
    WorkerGroup, WorkerRegistry,
};
use retrievalbot_core::config::{Settings, load_env_file};
use retrievalbot_core::domain::Module;
use retrievalbot_core::impls::{
    HttpWorker, InMemoryDealStore, InMemoryResultStore, InMemoryTaskQueue, IpInfoLookup,
    JsonLinesResultStore, LotusProviderLookup, feed_from_url,
};
use retrievalbot_core::mirror::DealMirror;
use retrievalbot_core::ports::{
    Clock, DealFeed, DealStore, IdGenerator, ResultStore, SystemClock, TaskQueue, UlidGenerator,
};
use retrievalbot_core::resolver::Resolver;

#[derive(Debug, Parser)]
#[command(name = "retrievalbot", version, about = "Retrieval testing for Filecoin storage providers")]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long, short = 's', global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Mirror, scheduler, workers and reaper in one process, until ctrl-c.
    Run,

    /// One deal mirror refresh, then exit.
    Mirror,

    /// Run a worker against a static provider list and report each attempt.
    Probe {
        /// Worker descriptor (TOML).
        #[arg(long)]
        config: PathBuf,

        #[arg(long, default_value = "http")]
        module: Module,

        /// Per-attempt timeout in seconds.
        #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
        timeout_secs: u64,

        /// Print the full result for every attempt.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if load_env_file(None).context("load .env")? {
        info!("loaded environment from .env");
    }
    let settings = Settings::load(cli.settings.as_deref()).context("load settings")?;

    match cli.command {
        Command::Run => run(settings).await,
        Command::Mirror => mirror_once(settings).await,
        Command::Probe {
            config,
            module,
            timeout_secs,
            verbose,
        } => probe(config, module, Duration::from_secs(timeout_secs), verbose).await,
    }
}

fn deal_feed(settings: &Settings) -> anyhow::Result<Arc<dyn DealFeed>> {
    let feed = feed_from_url(&settings.mirror.feed_url)
        .with_context(|| format!("open deal feed {}", settings.mirror.feed_url))?;
    Ok(Arc::from(feed))
}

fn result_store(settings: &Settings) -> Arc<dyn ResultStore> {
    match &settings.stores.results_path {
        Some(path) => {
            info!(path = %path.display(), "appending results to file");
            Arc::new(JsonLinesResultStore::new(path))
        }
        None => Arc::new(InMemoryResultStore::new()),
    }
}

fn worker_registry() -> anyhow::Result<WorkerRegistry> {
    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(HttpWorker::new().context("build http client")?))?;
    Ok(registry)
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
    let deals: Arc<dyn DealStore> = Arc::new(InMemoryDealStore::new());
    let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new(
        Arc::clone(&clock),
        settings.queue_policy(),
    ));
    let results = result_store(&settings);

    let provider_lookup = Arc::new(
        LotusProviderLookup::new(&settings.resolver.lotus_url, settings.resolver.lotus_token.clone())
            .context("build lotus client")?,
    );
    let location_lookup = Arc::new(
        IpInfoLookup::with_base_url(&settings.resolver.ipinfo_url, settings.resolver.ipinfo_token.clone())
            .context("build ipinfo client")?,
    );
    let resolver = Arc::new(
        Resolver::new(
            provider_lookup,
            location_lookup,
            Arc::clone(&clock),
            settings.resolver_settings(),
        )
        .await
        .context("resolve own public address")?,
    );

    let mirror = Arc::new(DealMirror::new(
        deal_feed(&settings)?,
        Arc::clone(&deals),
        Arc::clone(&clock),
        settings.mirror_settings(),
    ));
    let scheduler = Arc::new(
        Scheduler::new(
            SchedulerDeps {
                deals: Arc::clone(&deals),
                queue: Arc::clone(&queue),
                results: Arc::clone(&results),
                resolver: Arc::clone(&resolver),
                ids: Arc::clone(&ids),
                clock: Arc::clone(&clock),
            },
            Box::new(PowerLawWeighting::new(settings.scheduler.bias)),
            settings.scheduler_settings(),
        )
        .context("build scheduler")?,
    );
    let reaper = Arc::new(ReaperLoop::new(Arc::clone(&queue), Arc::clone(&clock)));

    let registry = worker_registry()?;
    for module in registry.missing(&settings.scheduler.modules) {
        warn!(%module, "no worker registered; its tasks wait for an external worker");
    }
    let workers = WorkerGroup::spawn(
        &registry,
        WorkerContext {
            queue: Arc::clone(&queue),
            results: Arc::clone(&results),
            ids: Arc::clone(&ids),
            clock: Arc::clone(&clock),
            retriever: resolver.self_info().clone(),
            idle_poll: settings.idle_poll(),
        },
        |module| settings.concurrency(module),
    );
    info!(workers = workers.len(), "workers started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loops = vec![
        {
            let (mirror, rx, every) = (Arc::clone(&mirror), shutdown_rx.clone(), settings.mirror_interval());
            tokio::spawn(async move { mirror.run(every, rx).await })
        },
        {
            let (scheduler, rx, every) = (Arc::clone(&scheduler), shutdown_rx.clone(), settings.scheduler_interval());
            tokio::spawn(async move { scheduler.run(every, rx).await })
        },
        {
            let (reaper, rx, every) = (Arc::clone(&reaper), shutdown_rx, settings.sweep_interval());
            tokio::spawn(async move { reaper.run(every, rx).await })
        },
    ];

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutting down");

    // receivers may already be gone
    let _ = shutdown_tx.send(true);
    workers.shutdown_and_join().await;
    for join in loops {
        if let Err(e) = join.await {
            warn!(error = %e, "background loop ended abnormally");
        }
    }
    info!("stopped");
    Ok(())
}

async fn mirror_once(settings: Settings) -> anyhow::Result<()> {
    let store = Arc::new(InMemoryDealStore::new());
    let mirror = DealMirror::new(
        deal_feed(&settings)?,
        Arc::clone(&store) as Arc<dyn DealStore>,
        Arc::new(SystemClock),
        settings.mirror_settings(),
    );
    let report = mirror.refresh().await.context("refresh deal mirror")?;
    info!(
        scanned = report.scanned,
        inserted = report.inserted,
        skipped_inactive = report.skipped_inactive,
        skipped_expired = report.skipped_expired,
        skipped_filtered = report.skipped_filtered,
        deleted = report.deleted,
        clients = report.clients.len(),
        "mirror refreshed"
    );
    Ok(())
}

async fn probe(
    config: PathBuf,
    module: Module,
    timeout: Duration,
    verbose: bool,
) -> anyhow::Result<()> {
    let descriptor = WorkerDescriptor::load(&config)
        .await
        .with_context(|| format!("load worker descriptor {}", config.display()))?;

    let registry = worker_registry()?;
    let Some(worker) = registry.get(module) else {
        bail!("no {module} worker in this binary");
    };

    let clock = Arc::new(SystemClock);
    let ids = UlidGenerator::new(clock.clone());
    let tasks = descriptor.to_tasks(module, &ids, clock.now(), timeout);
    if tasks.is_empty() {
        bail!("descriptor {} yields no tasks", config.display());
    }

    let outcomes = standalone::run_probe(worker.as_ref(), tasks).await;
    let failed = outcomes.iter().filter(|(_, r)| !r.success).count();
    for (task, result) in &outcomes {
        println!("{}", standalone::describe(task, result, verbose));
    }
    if failed > 0 {
        bail!("{failed} of {} retrievals failed", outcomes.len());
    }
    Ok(())
}
