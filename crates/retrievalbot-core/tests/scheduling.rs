mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;

use retrievalbot_core::app::{
    PowerLawWeighting, Scheduler, SchedulerDeps, SchedulerSettings, weighted_downsample,
};
use retrievalbot_core::domain::{Content, Module, Provider, Task, TaskId};
use retrievalbot_core::impls::{InMemoryDealStore, InMemoryResultStore, InMemoryTaskQueue, QueuePolicy};
use retrievalbot_core::ports::{Clock, DealStore, FixedClock, TaskQueue, UlidGenerator};
use retrievalbot_core::resolver::{Resolver, ResolverSettings};

use common::{CountingChain, CountingGeo, clock, stored_deal};

struct Pipeline {
    clock: Arc<FixedClock>,
    deals: Arc<InMemoryDealStore>,
    queue: Arc<InMemoryTaskQueue>,
    results: Arc<InMemoryResultStore>,
    chain: Arc<CountingChain>,
    scheduler: Scheduler,
}

async fn pipeline(batch_size: usize) -> Pipeline {
    let clock = clock();
    let deals = Arc::new(InMemoryDealStore::with_seed(5));
    let queue = Arc::new(InMemoryTaskQueue::new(clock.clone(), QueuePolicy::default()));
    let results = Arc::new(InMemoryResultStore::new());
    let chain = Arc::new(CountingChain::default());
    let resolver = Resolver::new(
        chain.clone(),
        Arc::new(CountingGeo::default()),
        clock.clone(),
        ResolverSettings::default(),
    )
    .await
    .unwrap();
    let scheduler = Scheduler::with_rng(
        SchedulerDeps {
            deals: deals.clone(),
            queue: queue.clone(),
            results: results.clone(),
            resolver: Arc::new(resolver),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock: clock.clone(),
        },
        Box::new(PowerLawWeighting::default()),
        SchedulerSettings {
            batch_size,
            ..SchedulerSettings::default()
        },
        StdRng::seed_from_u64(1),
    )
    .unwrap();
    Pipeline {
        clock,
        deals,
        queue,
        results,
        chain,
        scheduler,
    }
}

fn backlog_task(clock: &FixedClock) -> Task {
    Task {
        id: TaskId::from_ulid(ulid::Ulid::new()),
        requester: "filplus".to_string(),
        module: Module::Http,
        provider: Provider::default(),
        content: Content {
            cid: "bafyold".to_string(),
        },
        timeout: Duration::from_secs(15),
        created_at: clock.now(),
    }
}

#[tokio::test]
async fn undrained_backlog_blocks_the_pass() {
    let p = pipeline(10).await;
    p.deals
        .insert_many((0..40).map(|i| stored_deal(i, &format!("f0{}", i % 7))).collect())
        .await
        .unwrap();
    p.queue
        .insert_many((0..5).map(|_| backlog_task(&p.clock)).collect())
        .await
        .unwrap();

    let report = p.scheduler.run_once().await.unwrap();
    assert!(report.throttled());
    assert_eq!(report.backlog, 5);
    assert_eq!(report.tasks, 0);
    assert_eq!(p.queue.count("filplus").await.unwrap(), 5);
    assert_eq!(p.chain.calls(), 0);
    assert!(p.results.is_empty().await);
}

#[tokio::test]
async fn empty_queue_gets_a_bounded_annotated_batch() {
    let p = pipeline(10).await;
    p.deals
        .insert_many((0..40).map(|i| stored_deal(i, &format!("f0{}", i % 7))).collect())
        .await
        .unwrap();

    let report = p.scheduler.run_once().await.unwrap();
    assert_eq!(report.backlog, 0);
    assert_eq!(report.sampled, 10);
    assert!(report.tasks > 0 && report.tasks <= 10);

    let queued = p.queue.count("filplus").await.unwrap();
    assert_eq!(queued, report.tasks);
    assert!(queued <= 10);

    let tasks = p.queue.tasks().await;
    for task in &tasks {
        assert_eq!(task.requester, "filplus");
        assert_eq!(task.provider.country, "DE");
        assert_eq!(task.provider.continent, "EU");
        assert!(!task.provider.peer_id.is_empty());
        assert!(!task.provider.multiaddrs.is_empty());
    }
    assert_eq!(report.per_continent.get("EU"), Some(&report.tasks));

    // one chain lookup per distinct provider
    let distinct: std::collections::HashSet<_> = tasks.iter().map(|t| &t.provider.id).collect();
    assert_eq!(p.chain.calls(), distinct.len());
}

#[tokio::test]
async fn repeated_passes_never_exceed_the_batch() {
    let p = pipeline(8).await;
    p.deals
        .insert_many((0..100).map(|i| stored_deal(i, &format!("f0{}", i % 13))).collect())
        .await
        .unwrap();

    for _ in 0..5 {
        p.scheduler.run_once().await.unwrap();
        assert!(p.queue.count("filplus").await.unwrap() <= 8);
    }
}

/// Share of the most frequent provider.
fn top_share(providers: &[&str]) -> f64 {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for &p in providers {
        *counts.entry(p).or_default() += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    top as f64 / providers.len() as f64
}

#[test]
fn downsampling_reduces_provider_skew() {
    // 70% of the sample from one provider, the rest spread over 30
    let mut items: Vec<String> = std::iter::repeat_n("f0big".to_string(), 70).collect();
    items.extend((0..30).map(|i| format!("f0small{i}")));
    let input_share = top_share(&items.iter().map(String::as_str).collect::<Vec<_>>());

    let weighting = PowerLawWeighting::new(1.0);
    let mut rng = StdRng::seed_from_u64(42);
    let trials = 200;
    let mut total = 0.0;
    for _ in 0..trials {
        let picked = weighted_downsample(items.clone(), 50, |s: &String| s.as_str(), &weighting, &mut rng);
        assert_eq!(picked.len(), 50);
        total += top_share(&picked.iter().map(String::as_str).collect::<Vec<_>>());
    }
    let output_share = total / trials as f64;

    assert!((input_share - 0.7).abs() < 1e-9);
    assert!(
        output_share < input_share - 0.1,
        "output share {output_share} not below input share {input_share}"
    );
}

#[test]
fn zero_bias_keeps_the_distribution() {
    let mut items: Vec<String> = std::iter::repeat_n("f0big".to_string(), 70).collect();
    items.extend((0..30).map(|i| format!("f0small{i}")));

    let weighting = PowerLawWeighting::new(0.0);
    let mut rng = StdRng::seed_from_u64(7);
    let trials = 200;
    let mut total = 0.0;
    for _ in 0..trials {
        let picked = weighted_downsample(items.clone(), 50, |s: &String| s.as_str(), &weighting, &mut rng);
        total += top_share(&picked.iter().map(String::as_str).collect::<Vec<_>>());
    }
    let output_share = total / trials as f64;
    assert!((output_share - 0.7).abs() < 0.05, "uniform share drifted to {output_share}");
}
