//! Shared cursor: seeding, catch-up, batching and concurrent sweepers.

use dtaskq::{ManualClock, QueueOptions, keys};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::common::{cleanup, expire, test_queue, test_queue_with, ttl, unique_taskname};

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_cursor_seeded_with_ttl() {
    let clock = Arc::new(ManualClock::new(7_001));
    let queue = test_queue(clock).await;
    let taskname = unique_taskname();

    let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
    assert_eq!(sweep.tick, 7);
    assert_eq!(sweep.matured_tick, 7);
    assert!(!sweep.advanced);

    let remaining = ttl(&queue, &keys::cursor_key(&taskname)).await;
    assert!(remaining > 0 && remaining <= 7_200, "ttl was {}", remaining);

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_catch_up_one_tick_per_empty_pull() {
    let clock = Arc::new(ManualClock::new(5_500));
    let queue = test_queue(clock.clone()).await;
    let taskname = unique_taskname();

    // Seed the cursor at tick 5, then let four more ticks mature.
    queue.pull_task(&taskname).await.expect("seed");
    queue.push_task(&taskname, 7_000, "seven").await.expect("push");
    clock.set(9_500);

    let mut observed = Vec::new();
    let mut delivered = Vec::new();
    for _ in 0..8 {
        let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
        assert_eq!(sweep.matured_tick, 9);
        observed.push((sweep.tick, sweep.advanced));
        delivered.extend(sweep.tasks);
    }

    assert_eq!(
        observed,
        vec![
            (5, true),
            (6, true),
            (7, false), // bucket 7 yields its payload, cursor holds
            (7, true),
            (8, true),
            (9, false), // reached the matured tick
            (9, false),
            (9, false),
        ]
    );
    assert_eq!(delivered, vec!["seven".to_string()]);
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(9));

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_future_ticks_stay_hidden() {
    let clock = Arc::new(ManualClock::new(5_500));
    let queue = test_queue(clock.clone()).await;
    let taskname = unique_taskname();

    queue.push_task(&taskname, 6_200, "soon").await.expect("push");

    for _ in 0..3 {
        let tasks = queue.pull_task(&taskname).await.expect("pull");
        assert!(tasks.is_empty());
    }
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(5));

    // Tick 7 matures at 7001ms.
    clock.set(7_001);
    let first = queue.sweep(&taskname, 1000).await.expect("pull");
    assert_eq!((first.tick, first.advanced), (5, true));
    let second = queue.sweep(&taskname, 1000).await.expect("pull");
    assert_eq!((second.tick, second.advanced), (6, true));
    let third = queue.sweep(&taskname, 1000).await.expect("pull");
    assert_eq!(third.tick, 7);
    assert_eq!(third.tasks, vec!["soon".to_string()]);

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_large_bucket_drains_before_advancing() {
    let clock = Arc::new(ManualClock::new(5_500));
    let options = QueueOptions {
        batch_limit: 2,
        ..Default::default()
    };
    let queue = test_queue_with(clock.clone(), options).await;
    let taskname = unique_taskname();

    queue.pull_task(&taskname).await.expect("seed");
    for i in 0..5 {
        queue
            .push_task(&taskname, 5_000, &format!("p{}", i))
            .await
            .expect("push");
    }
    clock.set(6_500);

    let mut sizes = Vec::new();
    let mut delivered = Vec::new();
    loop {
        let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
        assert_eq!(sweep.tick, 5);
        sizes.push(sweep.tasks.len());
        let advanced = sweep.advanced;
        delivered.extend(sweep.tasks);
        if advanced {
            break;
        }
    }

    assert_eq!(sizes, vec![2, 2, 1, 0]);
    assert_eq!(delivered, vec!["p0", "p1", "p2", "p3", "p4"]);
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(6));

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_concurrent_sweepers_split_without_duplicates() {
    let clock = Arc::new(ManualClock::new(20_500));
    let queue = Arc::new(test_queue(clock.clone()).await);
    let taskname = unique_taskname();

    // Payloads spread over ticks 12..=20, cursor seeded at 12.
    clock.set(12_500);
    queue.pull_task(&taskname).await.expect("seed");
    let mut expected = HashSet::new();
    for i in 0..300 {
        let tick_time = 12_000 + (i % 9) * 1000;
        let payload = format!("job-{}", i);
        queue
            .push_task(&taskname, tick_time, &payload)
            .await
            .expect("push");
        expected.insert(payload);
    }
    clock.set(20_500);

    let mut set = JoinSet::new();
    for _ in 0..6 {
        let queue = Arc::clone(&queue);
        let taskname = taskname.clone();
        set.spawn(async move {
            let mut got = Vec::new();
            let mut last_tick = i64::MIN;
            loop {
                let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
                assert!(sweep.tick >= last_tick, "cursor regressed");
                last_tick = sweep.tick;
                if sweep.is_empty() && !sweep.advanced && sweep.caught_up() {
                    break;
                }
                got.extend(sweep.tasks);
            }
            got
        });
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    while let Some(result) = set.join_next().await {
        for payload in result.expect("sweeper panicked") {
            total += 1;
            assert!(seen.insert(payload.clone()), "duplicate {}", payload);
        }
    }

    assert_eq!(total, 300);
    assert_eq!(seen, expected);
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(20));

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_cursor_ttl_refreshed_on_every_pull() {
    let clock = Arc::new(ManualClock::new(5_500));
    let options = QueueOptions {
        cursor_ttl_secs: 600,
        ..Default::default()
    };
    let queue = test_queue_with(clock.clone(), options).await;
    let taskname = unique_taskname();
    let cursor_key = keys::cursor_key(&taskname);

    queue.pull_task(&taskname).await.expect("seed");
    clock.set(7_500);

    // Advancing pull: 5 -> 6.
    expire(&queue, &cursor_key, 5).await;
    let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
    assert!(sweep.advanced);
    let remaining = ttl(&queue, &cursor_key).await;
    assert!(remaining > 5 && remaining <= 600, "ttl was {}", remaining);

    // Non-advancing pull that pops a payload at tick 6.
    queue.push_task(&taskname, 6_000, "six").await.expect("push");
    expire(&queue, &cursor_key, 5).await;
    let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
    assert!(!sweep.advanced);
    assert_eq!(sweep.tasks, vec!["six".to_string()]);
    let remaining = ttl(&queue, &cursor_key).await;
    assert!(remaining > 5 && remaining <= 600, "ttl was {}", remaining);

    cleanup(&queue, &taskname).await;
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "requires Redis (enable feature integration)"
)]
async fn test_cursor_ahead_of_matured_tick_never_regresses() {
    let clock = Arc::new(ManualClock::new(9_500));
    let queue = test_queue(clock.clone()).await;
    let taskname = unique_taskname();

    queue.pull_task(&taskname).await.expect("seed");
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(9));

    // A sweeper whose clock lags sees matured tick 5.
    clock.set(5_500);
    queue.push_task(&taskname, 9_000, "nine").await.expect("push");
    let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
    assert_eq!(sweep.matured_tick, 5);
    assert_eq!(sweep.tick, 9);
    assert_eq!(sweep.tasks, vec!["nine".to_string()]);

    let sweep = queue.sweep(&taskname, 1000).await.expect("pull");
    assert!(sweep.is_empty());
    assert!(!sweep.advanced);
    assert_eq!(queue.cursor(&taskname).await.expect("get"), Some(9));

    cleanup(&queue, &taskname).await;
}
