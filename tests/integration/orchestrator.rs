//! Fleet query behaviour under latency, failures and deadlines

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use fleet_poller::adapter::ReadingSet;
use fleet_poller::error::TargetError;
use fleet_poller::orchestrator::{FleetQuery, QueryOptions};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn power(target: &str, watts: f64) -> ReadingSet {
    ReadingSet::new(target).with_reading("power", watts)
}

fn options(workers: usize) -> QueryOptions {
    QueryOptions {
        workers,
        call_timeout: Duration::from_secs(5),
        batch_timeout: Duration::from_secs(5),
        requested_counters: None,
    }
}

#[tokio::test]
async fn test_results_follow_input_order() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script("a", Script::ok(power("a", 1.0)).after(Duration::from_millis(80)));
    adapter.script("b", Script::ok(power("b", 2.0)));
    adapter.script("c", Script::ok(power("c", 3.0)).after(Duration::from_millis(40)));

    let mut query = FleetQuery::new(adapter, options(3));
    let results = query.run(&names(&["a", "b", "c"])).await;

    let order: Vec<_> = results
        .iter()
        .map(|r| r.as_ref().unwrap().name.clone())
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failures_are_isolated() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script("a", Script::ok(power("a", 1.0)));
    adapter.script(
        "b",
        Script::fail(TargetError::Failure("connection reset".to_string())),
    );
    adapter.script("d", Script::ok(power("d", 4.0)));

    let mut query = FleetQuery::new(adapter, options(2));
    let results = query.run(&names(&["a", "b", "c", "d"])).await;

    assert_eq!(results.len(), 4);
    assert!(results[0].is_ok());
    assert_matches!(&results[1], Err(TargetError::Failure(_)));
    assert_matches!(&results[2], Err(TargetError::NotFound(name)) if name == "c");
    assert_eq!(results[3].as_ref().unwrap().get("power").unwrap().as_f64(), 4.0);
}

#[tokio::test]
async fn test_concurrency_is_bounded_by_workers() {
    let adapter = Arc::new(ScriptedAdapter::new());
    let targets: Vec<String> = (0..12).map(|i| format!("host{i}")).collect();
    for target in &targets {
        adapter.script(
            target,
            Script::ok(power(target, 1.0)).after(Duration::from_millis(30)),
        );
    }

    let mut query = FleetQuery::new(adapter.clone(), options(3));
    let results = query.run(&targets).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(adapter.fetches(), 12);
    assert!(adapter.max_in_flight() <= 3, "got {}", adapter.max_in_flight());
    assert!(adapter.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_target_count() {
    let adapter = Arc::new(ScriptedAdapter::new());
    for target in ["a", "b"] {
        adapter.script(
            target,
            Script::ok(power(target, 1.0)).after(Duration::from_millis(30)),
        );
    }

    let mut query = FleetQuery::new(adapter.clone(), options(8).sized_for(2));
    assert_eq!(query.options().workers, 2);

    query.run(&names(&["a", "b"])).await;

    assert!(adapter.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_batch_deadline_marks_stragglers() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script("fast", Script::ok(power("fast", 1.0)));
    adapter.script(
        "slow",
        Script::ok(power("slow", 2.0)).after(Duration::from_secs(3)),
    );

    let batch_timeout = Duration::from_millis(200);
    let mut query = FleetQuery::new(
        adapter,
        QueryOptions {
            batch_timeout,
            ..options(2)
        },
    );

    let started = Instant::now();
    let results = query.run(&names(&["slow", "fast"])).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_matches!(&results[0], Err(TargetError::Timeout(t)) if *t == batch_timeout);
    assert!(results[1].is_ok());
}

#[tokio::test]
async fn test_call_timeout_marks_single_target() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script("ok", Script::ok(power("ok", 1.0)));
    adapter.script(
        "hung",
        Script::ok(power("hung", 2.0)).after(Duration::from_secs(3)),
    );

    let call_timeout = Duration::from_millis(100);
    let mut query = FleetQuery::new(
        adapter,
        QueryOptions {
            call_timeout,
            ..options(2)
        },
    );

    let results = query.run(&names(&["ok", "hung"])).await;

    assert!(results[0].is_ok());
    assert_matches!(&results[1], Err(e) if e.is_timeout());
}

#[tokio::test]
async fn test_pool_is_reused_across_cycles() {
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script("a", Script::ok(power("a", 1.0)));

    let mut query = FleetQuery::new(adapter.clone(), options(1));
    for _ in 0..3 {
        let results = query.run(&names(&["a"])).await;
        assert!(results[0].is_ok());
    }

    assert_eq!(adapter.fetches(), 3);
}

#[tokio::test]
async fn test_empty_target_list() {
    let adapter = Arc::new(ScriptedAdapter::new());

    let mut query = FleetQuery::new(adapter.clone(), options(4));
    let results = query.run(&[]).await;

    assert!(results.is_empty());
    assert_eq!(adapter.fetches(), 0);
}
