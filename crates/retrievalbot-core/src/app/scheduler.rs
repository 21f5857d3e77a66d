//! Scheduler - turns mirrored deals into a bounded batch of retrieval tasks.
//!
//! A pass only runs when the requester's backlog is fully drained, so the
//! queue never holds more than one batch for it regardless of how often the
//! pass is triggered.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::sampling::{ProviderWeighting, weighted_downsample};
use crate::domain::{
    Content, DealRecord, ErrorCode, ErrorKind, Module, Provider, RetrievalResult, StoreError, Task,
    TaskResult,
};
use crate::periodic;
use crate::ports::{Clock, DealStore, IdGenerator, ResultStore, TaskQueue};
use crate::resolver::Resolver;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no retrieval modules configured")]
    NoModules,

    #[error("batch size must be positive")]
    ZeroBatch,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::NoModules | ScheduleError::ZeroBatch => ErrorKind::Malformed,
            ScheduleError::Store(e) => e.kind(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Queue partition this scheduler fills.
    pub requester: String,
    /// Deals sampled per pass; at most half become tasks.
    pub batch_size: usize,
    /// Modules to spread tasks over.
    pub modules: Vec<Module>,
    pub task_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            requester: "filplus".to_string(),
            batch_size: 100,
            modules: vec![Module::Http],
            task_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Undrained tasks found by the backpressure check.
    pub backlog: usize,
    pub sampled: usize,
    pub selected: usize,
    pub tasks: usize,
    /// Deals answered with a failed result instead of a task.
    pub bypassed: usize,
    /// Deals dropped this pass after a transient resolution failure.
    pub skipped: usize,
    /// Expired resolver cache entries dropped at the start of the pass.
    pub purged: usize,
    pub per_country: BTreeMap<String, usize>,
    pub per_continent: BTreeMap<String, usize>,
    pub per_module: BTreeMap<Module, usize>,
}

impl ScheduleReport {
    pub fn throttled(&self) -> bool {
        self.backlog > 0
    }
}

/// Outcome of resolving one provider, shared by its deals within a pass.
#[derive(Clone)]
enum Resolution {
    Ready(Provider),
    Unreachable(ErrorCode, String),
    Skip,
}

pub struct Scheduler {
    deals: Arc<dyn DealStore>,
    queue: Arc<dyn TaskQueue>,
    results: Arc<dyn ResultStore>,
    resolver: Arc<Resolver>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    weighting: Box<dyn ProviderWeighting>,
    rng: Mutex<StdRng>,
    settings: SchedulerSettings,
}

pub struct SchedulerDeps {
    pub deals: Arc<dyn DealStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub results: Arc<dyn ResultStore>,
    pub resolver: Arc<Resolver>,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        deps: SchedulerDeps,
        weighting: Box<dyn ProviderWeighting>,
        settings: SchedulerSettings,
    ) -> Result<Self, ScheduleError> {
        Self::with_rng(deps, weighting, settings, StdRng::from_entropy())
    }

    pub fn with_rng(
        deps: SchedulerDeps,
        weighting: Box<dyn ProviderWeighting>,
        settings: SchedulerSettings,
        rng: StdRng,
    ) -> Result<Self, ScheduleError> {
        if settings.modules.is_empty() {
            return Err(ScheduleError::NoModules);
        }
        if settings.batch_size == 0 {
            return Err(ScheduleError::ZeroBatch);
        }
        Ok(Self {
            deals: deps.deals,
            queue: deps.queue,
            results: deps.results,
            resolver: deps.resolver,
            ids: deps.ids,
            clock: deps.clock,
            weighting,
            rng: Mutex::new(rng),
            settings,
        })
    }

    fn pick_module(&self) -> Module {
        let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
        self.settings
            .modules
            .choose(&mut *rng)
            .copied()
            .unwrap_or(Module::Http)
    }

    pub async fn run_once(&self) -> Result<ScheduleReport, ScheduleError> {
        let requester = self.settings.requester.as_str();
        let purged = self.resolver.purge_expired();
        if purged > 0 {
            debug!(count = purged, "purged expired resolver entries");
        }
        let mut report = ScheduleReport {
            backlog: self.queue.count(requester).await?,
            purged,
            ..ScheduleReport::default()
        };
        info!(requester, count = report.backlog, "current number of tasks in the queue");
        if report.throttled() {
            info!(requester, count = report.backlog, "task queue still has tasks, skipping");
            return Ok(report);
        }

        let now = self.clock.now();
        let sample = self
            .deals
            .sample_active_verified(self.settings.batch_size, now)
            .await?;
        report.sampled = sample.len();

        let target = sample.len() / 2;
        let selected = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            weighted_downsample(
                sample,
                target,
                |d: &DealRecord| d.provider.as_str(),
                self.weighting.as_ref(),
                &mut *rng,
            )
        };
        report.selected = selected.len();

        let mut memo: HashMap<String, Resolution> = HashMap::new();
        let mut tasks = Vec::new();
        let mut results = Vec::new();

        for deal in selected {
            let resolution = match memo.get(&deal.provider) {
                Some(r) => r.clone(),
                None => {
                    let r = self.resolve(&deal.provider).await;
                    memo.insert(deal.provider.clone(), r.clone());
                    r
                }
            };

            let mut task = Task {
                id: self.ids.task_id(),
                requester: requester.to_string(),
                module: self.pick_module(),
                provider: Provider {
                    id: deal.provider.clone(),
                    ..Provider::default()
                },
                content: Content {
                    cid: deal.content_cid().to_string(),
                },
                timeout: self.settings.task_timeout,
                created_at: now,
            };

            match resolution {
                Resolution::Ready(provider) => {
                    task.provider = provider;
                    *report
                        .per_country
                        .entry(task.provider.country.clone())
                        .or_default() += 1;
                    *report
                        .per_continent
                        .entry(task.provider.continent.clone())
                        .or_default() += 1;
                    *report.per_module.entry(task.module).or_default() += 1;
                    tasks.push(task);
                }
                Resolution::Unreachable(code, message) => {
                    results.push(TaskResult::new(
                        self.ids.result_id(),
                        &task,
                        self.resolver.self_info().clone(),
                        RetrievalResult::failure(code, message),
                        now,
                    ));
                }
                Resolution::Skip => report.skipped += 1,
            }
        }

        report.tasks = tasks.len();
        report.bypassed = results.len();

        if !tasks.is_empty() {
            self.queue.insert_many(tasks).await?;
        }
        info!(requester, count = report.tasks, "inserted tasks");

        for (country, count) in &report.per_country {
            info!(%country, count, "tasks per country");
        }
        for (continent, count) in &report.per_continent {
            info!(%continent, count, "tasks per continent");
        }
        for (module, count) in &report.per_module {
            info!(%module, count, "tasks per module");
        }

        if !results.is_empty() {
            self.results.insert_many(results).await?;
        }
        info!(requester, count = report.bypassed, "inserted results");

        Ok(report)
    }

    async fn resolve(&self, provider_id: &str) -> Resolution {
        match self.resolver.resolve_task_provider(provider_id).await {
            Ok(provider) => Resolution::Ready(provider),
            Err(e) => match e.error_code() {
                Some(code) => Resolution::Unreachable(code, e.to_string()),
                None => {
                    warn!(
                        provider = provider_id,
                        error = %e,
                        kind = ?e.kind(),
                        "provider resolution failed, skipping"
                    );
                    Resolution::Skip
                }
            },
        }
    }

    pub async fn run(&self, interval: Duration, shutdown: watch::Receiver<bool>) {
        periodic::every("scheduler", interval, shutdown, || async {
            if let Err(e) = self.run_once().await {
                warn!(error = %e, kind = ?e.kind(), "scheduling pass failed");
            }
        })
        .await;
    }
}
