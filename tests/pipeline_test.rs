use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use blastwarp_api::pipeline::{BatchOutcome, BatchPipeline, BatchProgress};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn batches_are_spaced_by_the_configured_delay() {
    let pipeline = BatchPipeline::new(10, Duration::from_millis(1500));
    let started = Instant::now();
    let stamps = Arc::new(Mutex::new(Vec::new()));
    let mut reports: Vec<BatchProgress> = Vec::new();

    let outcome = pipeline
        .run(
            (0..25).collect::<Vec<usize>>(),
            |item| {
                let stamps = stamps.clone();
                async move {
                    stamps.lock().expect("lock").push((item, started.elapsed()));
                    Ok::<(), String>(())
                }
            },
            |progress| reports.push(*progress),
        )
        .await;

    assert_eq!(outcome, BatchOutcome {
        succeeded: 25,
        failed: 0,
        total: 25,
        batches: 3,
    });

    let percents: Vec<u8> = reports.iter().map(BatchProgress::percent).collect();
    assert_eq!(percents, vec![40, 80, 100]);
    assert_eq!(reports.last().map(|p| p.batch), Some(3));

    let stamps = stamps.lock().expect("lock").clone();
    for (item, at) in stamps {
        let expected = Duration::from_millis(1500 * (item / 10) as u64);
        assert!(at >= expected && at < expected + Duration::from_millis(100), "item {item} ran at {at:?}");
    }

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3100));
}

#[tokio::test(start_paused = true)]
async fn items_within_a_batch_run_concurrently() {
    let pipeline = BatchPipeline::new(5, Duration::ZERO);
    let started = Instant::now();

    let outcome = pipeline
        .run(
            (0..10).collect::<Vec<u32>>(),
            |_| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<(), String>(())
            },
            |_| {},
        )
        .await;

    assert_eq!(outcome.succeeded, 10);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn failures_are_counted_without_stopping_the_run() {
    let pipeline = BatchPipeline::new(3, Duration::from_millis(10));
    let mut last = None;

    let outcome = pipeline
        .run(
            (1..=7).collect::<Vec<u32>>(),
            |item| async move {
                if item % 2 == 0 {
                    Err(format!("item {item} rejected"))
                } else {
                    Ok(())
                }
            },
            |progress| last = Some(*progress),
        )
        .await;

    assert_eq!(outcome.succeeded, 4);
    assert_eq!(outcome.failed, 3);
    assert_eq!(outcome.batches, 3);

    let last = last.expect("progress reported");
    assert_eq!(last.processed, 7);
    assert_eq!(last.failed, 3);
    assert_eq!(last.percent(), 100);
}

#[tokio::test(start_paused = true)]
async fn empty_input_finishes_immediately() {
    let pipeline = BatchPipeline::new(10, Duration::from_secs(5));
    let started = Instant::now();
    let mut calls = 0;

    let outcome = pipeline
        .run(
            Vec::<u32>::new(),
            |_| async { Ok::<(), String>(()) },
            |_| calls += 1,
        )
        .await;

    assert_eq!(outcome, BatchOutcome::default());
    assert_eq!(calls, 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
}
