//! End-to-end queue tests
//!
//! Drives the manager and scheduler with the simulated executor on a real
//! tokio runtime, observing the queue through subscriptions.

use std::sync::Arc;
use std::time::Duration;

use genqueue::config::Config;
use genqueue::domain::{QueueEvent, TaskState};
use genqueue::executor::{ErrorKind, SimulatedExecutor, SimulatedOutcome};
use genqueue::hub::Subscription;
use genqueue::manager::QueueManager;
use genqueue::scheduler::Scheduler;

fn fast_config(max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.queue.max_concurrent = max_concurrent;
    config.retry.base_delay_ms = 20;
    config.retry.cap_delay_ms = 200;
    config.scheduler.dispatch_interval_ms = 10;
    config.scheduler.retry_interval_ms = 10;
    config
}

fn setup(config: &Config) -> (Arc<QueueManager>, Arc<SimulatedExecutor>) {
    let manager = Arc::new(QueueManager::new(config).unwrap());
    let executor = Arc::new(SimulatedExecutor::instant());
    (manager, executor)
}

async fn next_event(sub: &mut Subscription) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed")
}

/// Collect events until every id in `ids` has reached a terminal event
async fn collect_until_terminal(sub: &mut Subscription, ids: &[String]) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    let mut remaining: Vec<String> = ids.to_vec();
    while !remaining.is_empty() {
        let event = next_event(sub).await;
        if event.is_terminal() {
            if let Some(id) = event.task_id() {
                remaining.retain(|r| r != id);
            }
        }
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_retry_scenario_end_to_end() {
    let mut config = fast_config(5);
    config.retry.base_delay_ms = 2000;
    config.retry.cap_delay_ms = 60000;
    let (manager, executor) = setup(&config);
    executor.script("x", [SimulatedOutcome::Fail(ErrorKind::Server), SimulatedOutcome::Succeed]);
    let mut scheduler = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler);

    let t1 = manager.submit("x").unwrap();
    assert_eq!(scheduler.dispatch_once(), 1);
    scheduler.settle().await;

    let retrying = manager.get(&t1.id).unwrap();
    assert_eq!(retrying.state, TaskState::Retrying);
    assert_eq!(retrying.retry_count, 1);
    let next_retry_at = retrying.next_retry_at.unwrap();
    let delay = (next_retry_at - retrying.started_at.unwrap()).num_milliseconds();
    assert!((1500..=2600).contains(&delay), "delay {}ms", delay);

    // Not due yet
    assert_eq!(manager.promote_due_retries(next_retry_at - chrono::TimeDelta::milliseconds(1)), 0);
    assert_eq!(manager.promote_due_retries(next_retry_at), 1);
    assert_eq!(manager.get(&t1.id).unwrap().state, TaskState::Pending);

    assert_eq!(scheduler.dispatch_once(), 1);
    scheduler.settle().await;

    let done = manager.get(&t1.id).unwrap();
    assert_eq!(done.state, TaskState::Completed);
    assert_eq!(done.progress, 100);
    assert!(done.result.is_some());
    assert!(done.error.is_none());
}

#[tokio::test]
async fn test_sixth_task_waits_for_a_free_slot() {
    let config = fast_config(5);
    let (manager, executor) = setup(&config);
    let inputs: Vec<String> = (0..6).map(|i| format!("prompt {}", i)).collect();
    for input in &inputs {
        executor.script(input, [SimulatedOutcome::SucceedAfter(Duration::from_millis(150))]);
    }

    let mut sub = manager.subscribe();
    let handle = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler).start();
    let ids: Vec<String> = inputs.iter().map(|i| manager.submit(i).unwrap().id).collect();

    let events = collect_until_terminal(&mut sub, &ids).await;
    handle.shutdown().await;

    let position = |name: &str, id: &str| {
        events
            .iter()
            .position(|e| e.name() == name && e.task_id() == Some(id))
            .unwrap()
    };
    let sixth_started = position("task_started", &ids[5]);
    let first_completion = events.iter().position(|e| e.name() == "task_completed").unwrap();

    for id in &ids[..5] {
        assert!(position("task_started", id) < first_completion);
    }
    assert!(first_completion < sixth_started);
    assert_eq!(executor.max_in_flight(), 5);
    assert_eq!(manager.stats().completed, 6);
}

#[tokio::test]
async fn test_processing_never_exceeds_cap() {
    let config = fast_config(3);
    let (manager, executor) = setup(&config);
    let inputs: Vec<String> = (0..20).map(|i| format!("job {}", i)).collect();
    for (i, input) in inputs.iter().enumerate() {
        let delay = Duration::from_millis(5 + (i as u64 % 4) * 10);
        if i % 3 == 0 {
            executor.script(
                input,
                [SimulatedOutcome::Fail(ErrorKind::RateLimited), SimulatedOutcome::SucceedAfter(delay)],
            );
        } else {
            executor.script(input, [SimulatedOutcome::SucceedAfter(delay)]);
        }
    }

    let mut sub = manager.subscribe();
    let handle = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler).start();
    let ids: Vec<String> = inputs.iter().map(|i| manager.submit(i).unwrap().id).collect();

    let events = collect_until_terminal(&mut sub, &ids).await;
    handle.shutdown().await;

    for event in &events {
        if let QueueEvent::QueueStats(stats) = event {
            assert!(stats.processing <= 3, "processing {}", stats.processing);
        }
    }
    assert!(executor.max_in_flight() <= 3);
    assert_eq!(manager.stats().completed, 20);
    assert_eq!(manager.stats().processing, 0);
}

#[tokio::test]
async fn test_snapshot_equals_list_while_running() {
    let config = fast_config(2);
    let (manager, executor) = setup(&config);
    for input in ["a", "b", "c"] {
        executor.script(input, [SimulatedOutcome::Hang]);
        manager.submit(input).unwrap();
    }
    let handle = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler).start();

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.stats().processing < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let expected = manager.list();
    let mut sub = manager.subscribe();
    match next_event(&mut sub).await {
        QueueEvent::QueueSnapshot(tasks) => assert_eq!(tasks, expected),
        other => panic!("expected snapshot first, got {}", other.name()),
    }
    assert_eq!(next_event(&mut sub).await.name(), "queue_stats");

    handle.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_task_never_referenced_again() {
    let config = fast_config(1);
    let (manager, executor) = setup(&config);
    executor.script("first", [SimulatedOutcome::SucceedAfter(Duration::from_millis(50))]);

    let first = manager.submit("first").unwrap();
    let doomed = manager.submit("doomed").unwrap();
    let last = manager.submit("last").unwrap();

    let mut sub = manager.subscribe();
    let handle = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler).start();
    manager.cancel(&doomed.id).unwrap();

    let events = collect_until_terminal(&mut sub, &[first.id.clone(), last.id.clone()]).await;
    handle.shutdown().await;

    let cancel_at = events
        .iter()
        .position(|e| *e == QueueEvent::TaskCancelled { id: doomed.id.clone() })
        .unwrap();
    assert!(events[cancel_at + 1..].iter().all(|e| e.task_id() != Some(doomed.id.as_str())));
    assert!(manager.get(&doomed.id).is_none());
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_retries_exhausted_end_in_failure() {
    let mut config = fast_config(2);
    config.retry.max_retries = 2;
    let (manager, executor) = setup(&config);
    executor.script(
        "doomed",
        [
            SimulatedOutcome::Fail(ErrorKind::Timeout),
            SimulatedOutcome::Fail(ErrorKind::Connection),
            SimulatedOutcome::Fail(ErrorKind::Server),
        ],
    );

    let mut sub = manager.subscribe();
    let handle = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler).start();
    let task = manager.submit("doomed").unwrap();

    let events = collect_until_terminal(&mut sub, &[task.id.clone()]).await;
    handle.shutdown().await;

    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::TaskRetryScheduled { retry_count, .. } => Some(*retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);

    let failed = manager.get(&task.id).unwrap();
    assert_eq!(failed.state, TaskState::Failed);
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.error.unwrap().code, "SERVER_ERROR");
    assert_eq!(executor.calls(), 3);
}

#[tokio::test]
async fn test_slow_observer_does_not_block_others() {
    let mut config = fast_config(1);
    config.hub.subscriber_buffer = 8;
    let (manager, executor) = setup(&config);
    let mut scheduler = Scheduler::new(manager.clone(), executor.clone(), &config.scheduler);

    let mut slow = manager.subscribe();
    let mut fast = manager.subscribe();
    let mut seen = Vec::new();

    for i in 0..5 {
        manager.submit(&format!("t{}", i)).unwrap();
        seen.extend(fast.drain());
    }
    while scheduler.dispatch_once() > 0 {
        scheduler.settle().await;
        seen.extend(fast.drain());
    }

    assert_eq!(seen.iter().filter(|e| e.name() == "task_completed").count(), 5);
    assert_eq!(manager.subscriber_count(), 1);

    // The slow observer keeps what fit in its buffer, then its stream ends
    assert_eq!(slow.drain().len(), 8);
    assert!(slow.recv().await.is_none());
}

#[test]
fn test_event_wire_format() {
    let event = QueueEvent::TaskProgress {
        id: "task-1-0000000a".to_string(),
        progress: 40,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"event": "task_progress", "data": {"id": "task-1-0000000a", "progress": 40}})
    );
}
