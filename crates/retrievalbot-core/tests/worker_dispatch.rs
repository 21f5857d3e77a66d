mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;

use retrievalbot_core::app::{
    PowerLawWeighting, Scheduler, SchedulerDeps, SchedulerSettings, WorkerContext, WorkerGroup,
    WorkerLoop, WorkerRegistry,
};
use retrievalbot_core::domain::{Content, ErrorCode, Module, Provider, RetrievalResult, SelfInfo, Task, TaskId};
use retrievalbot_core::impls::{InMemoryDealStore, InMemoryResultStore, InMemoryTaskQueue, QueuePolicy};
use retrievalbot_core::mirror::{DealMirror, MirrorSettings};
use retrievalbot_core::ports::{Clock, FixedClock, ProtocolWorker, TaskQueue, UlidGenerator};
use retrievalbot_core::resolver::{Resolver, ResolverSettings};

use common::{ACTIVE_END, BytesFeed, CountingChain, CountingGeo, clock, deal_json, snapshot};

struct Hanging;

#[async_trait]
impl ProtocolWorker for Hanging {
    fn module(&self) -> Module {
        Module::Http
    }

    async fn attempt(&self, _task: &Task) -> RetrievalResult {
        tokio::time::sleep(Duration::from_secs(30)).await;
        RetrievalResult::success(Duration::from_secs(30), None, 0)
    }
}

#[derive(Default)]
struct AlwaysOk {
    attempts: AtomicUsize,
}

#[async_trait]
impl ProtocolWorker for AlwaysOk {
    fn module(&self) -> Module {
        Module::Http
    }

    async fn attempt(&self, _task: &Task) -> RetrievalResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        RetrievalResult::success(Duration::from_millis(3), Some(Duration::from_millis(1)), 1 << 20)
    }
}

fn context(
    clock: Arc<FixedClock>,
    queue: Arc<InMemoryTaskQueue>,
    results: Arc<InMemoryResultStore>,
    retriever: SelfInfo,
) -> WorkerContext {
    WorkerContext {
        queue,
        results,
        ids: Arc::new(UlidGenerator::new(clock.clone())),
        clock,
        retriever,
        idle_poll: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn attempt_past_its_timeout_returns_near_the_deadline() {
    let clock = clock();
    let queue = Arc::new(InMemoryTaskQueue::new(clock.clone(), QueuePolicy::default()));
    let results = Arc::new(InMemoryResultStore::new());
    let timeout = Duration::from_millis(200);
    queue
        .insert_many(vec![Task {
            id: TaskId::from_ulid(ulid::Ulid::new()),
            requester: "filplus".to_string(),
            module: Module::Http,
            provider: Provider {
                id: "f01000".to_string(),
                ..Provider::default()
            },
            content: Content {
                cid: "bafyslow".to_string(),
            },
            timeout,
            created_at: clock.now(),
        }])
        .await
        .unwrap();

    let looped = WorkerLoop::new(
        Arc::new(Hanging),
        context(clock, queue.clone(), results.clone(), SelfInfo::default()),
    );
    let started = Instant::now();
    let recorded = looped.run_one().await.unwrap().unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert!(!recorded.is_success());
    assert_eq!(recorded.result.error_code, Some(ErrorCode::Timeout));

    // the timed-out task is retired like any other failure
    assert_eq!(queue.count("filplus").await.unwrap(), 0);
    assert_eq!(results.len().await, 1);
}

#[tokio::test]
async fn mirrored_deals_flow_through_to_results() {
    let clock = clock();
    let json = snapshot(
        &(0..20u64)
            .map(|i| (i, deal_json(&format!("f0{}", i % 4), "f0client", 100, ACTIVE_END)))
            .collect::<Vec<_>>(),
    );
    let deals = Arc::new(InMemoryDealStore::with_seed(9));
    let mirror = DealMirror::new(
        Arc::new(BytesFeed::from_json(&json).await),
        deals.clone(),
        clock.clone(),
        MirrorSettings::default(),
    );
    assert_eq!(mirror.refresh().await.unwrap().inserted, 20);

    let queue = Arc::new(InMemoryTaskQueue::new(clock.clone(), QueuePolicy::default()));
    let results = Arc::new(InMemoryResultStore::new());
    let resolver = Arc::new(
        Resolver::new(
            Arc::new(CountingChain::default()),
            Arc::new(CountingGeo::default()),
            clock.clone(),
            ResolverSettings::default(),
        )
        .await
        .unwrap(),
    );
    let scheduler = Scheduler::with_rng(
        SchedulerDeps {
            deals,
            queue: queue.clone(),
            results: results.clone(),
            resolver: resolver.clone(),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock: clock.clone(),
        },
        Box::new(PowerLawWeighting::default()),
        SchedulerSettings {
            batch_size: 12,
            ..SchedulerSettings::default()
        },
        StdRng::seed_from_u64(3),
    )
    .unwrap();
    let scheduled = scheduler.run_once().await.unwrap();
    assert!(scheduled.tasks > 0);

    let worker = Arc::new(AlwaysOk::default());
    let mut registry = WorkerRegistry::new();
    registry.register(worker.clone()).unwrap();
    let group = WorkerGroup::spawn(
        &registry,
        context(clock, queue.clone(), results.clone(), resolver.self_info().clone()),
        |_| 2,
    );
    assert_eq!(group.len(), 2);

    let deadline = Instant::now() + Duration::from_secs(5);
    while queue.count("filplus").await.unwrap() > 0 {
        assert!(Instant::now() < deadline, "queue did not drain");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    group.shutdown_and_join().await;

    let recorded = results.all().await;
    assert_eq!(recorded.len(), scheduled.tasks);
    assert_eq!(worker.attempts.load(Ordering::SeqCst), scheduled.tasks);
    for result in &recorded {
        assert!(result.is_success());
        assert_eq!(result.requester, "filplus");
        assert_eq!(result.retriever.country, "US");
        assert_eq!(result.provider.continent, "EU");
    }

    // a drained queue lets the next pass through
    let next = scheduler.run_once().await.unwrap();
    assert!(!next.throttled());
}
