#![cfg(feature = "test-utils")]

use std::time::Duration;

use enrich::config::StartPosition;
use enrich::processor::ProcessorStatus;
use enrich::test_utils::processor::{
    TEST_NAMESPACE, create_processor, create_processor_with, seed_record, test_config,
};
use enrich::test_utils::wait::wait_until;
use enrich::types::{AnalysisState, OperationKind};
use enrich_telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn bounded_concurrency_blocks_the_third_spawn() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);
    enricher.hold_all();

    let a = seed_record(&store, AnalysisState::Pending);
    let b = seed_record(&store, AnalysisState::Pending);
    let c = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, b.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, c.clone());

    assert!(processor.start().await.success);

    // Workers for the first two events start immediately and occupy both
    // capacity units.
    wait_until("two workers running", || enricher.started_ids().len() == 2).await;

    // The third spawn stays blocked on the capacity gate.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(enricher.started_ids(), vec![a.clone(), b.clone()]);

    // Finishing the first worker frees one unit and the third spawns.
    enricher.release(&a);
    wait_until("third worker running", || enricher.started_ids().len() == 3).await;
    assert_eq!(enricher.started_ids()[2], c);

    enricher.release_all();
    wait_until("all records analyzed", || store.analyzed_count() == 3).await;

    assert!(processor.stop().await.success);
    assert_eq!(processor.status(), ProcessorStatus::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_abandons_the_pending_spawn_and_kills_live_workers() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);
    enricher.hold_all();

    let a = seed_record(&store, AnalysisState::Pending);
    let b = seed_record(&store, AnalysisState::Pending);
    let c = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, b.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, c.clone());

    assert!(processor.start().await.success);
    wait_until("two workers running", || enricher.started_ids().len() == 2).await;

    // Stop while the dispatcher is blocked acquiring capacity for the third
    // event: the pending acquire is abandoned and the two held workers are
    // force-terminated by the reaper's drain.
    let reply = processor.stop().await;
    assert!(reply.success);
    assert_eq!(reply.status, "stopped");
    assert_eq!(processor.status(), ProcessorStatus::Stopped);

    // No worker was ever spawned for the third record, and the killed workers
    // never got to mutate their records.
    assert_eq!(enricher.started_ids(), vec![a, b]);
    assert_eq!(store.analyzed_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn ineligible_records_are_loaded_but_not_mutated() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);

    let analyzed = seed_record(&store, AnalysisState::Analyzed);
    let pending = seed_record(&store, AnalysisState::Pending);
    let before = store.get_record(&analyzed).unwrap();

    feed.push(TEST_NAMESPACE, OperationKind::Update, analyzed.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, pending.clone());

    assert!(processor.start().await.success);
    wait_until("pending record analyzed", || store.analyzed_count() == 2).await;

    // The already-analyzed record was only loaded: no enrichment side effects
    // and no mutation.
    assert_eq!(enricher.started_ids(), vec![pending]);
    assert_eq!(store.get_record(&analyzed), Some(before));

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_feed_fault_resumes_from_the_cursor() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);

    let a = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());

    assert!(processor.start().await.success);
    wait_until("first record analyzed", || {
        store.get_record(&a).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    // Fault the next read, then publish another event. The dispatcher backs
    // off, reopens from its cursor, and still delivers the event exactly
    // once.
    feed.fail_next_reads(1);
    let b = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, b.clone());

    wait_until("second record analyzed", || {
        store.get_record(&b).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    assert_eq!(enricher.enriched_ids(), vec![a, b]);

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn events_outside_the_watched_scope_only_advance_the_cursor() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);

    let foreign = seed_record(&store, AnalysisState::Pending);
    let deleted = seed_record(&store, AnalysisState::Pending);
    feed.push("other_namespace", OperationKind::Insert, foreign.clone());
    let last = feed.push(TEST_NAMESPACE, OperationKind::Delete, deleted.clone());

    assert!(processor.start().await.success);
    wait_until("cursor advanced past both events", || {
        store.cursor() == Some(last.next())
    }).await;

    assert!(enricher.started_ids().is_empty());
    assert_eq!(store.analyzed_count(), 0);

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn spawn_order_follows_event_order() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(1);
    enricher.hold_all();

    let a = seed_record(&store, AnalysisState::Pending);
    let b = seed_record(&store, AnalysisState::Pending);
    let c = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, b.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, c.clone());

    assert!(processor.start().await.success);

    // With one capacity unit, workers run strictly in consumption order.
    wait_until("first worker running", || enricher.started_ids().len() == 1).await;
    enricher.release(&a);
    wait_until("second worker running", || enricher.started_ids().len() == 2).await;
    enricher.release(&b);
    wait_until("third worker running", || enricher.started_ids().len() == 3).await;
    enricher.release(&c);

    wait_until("all records analyzed", || store.analyzed_count() == 3).await;
    assert_eq!(enricher.started_ids(), vec![a, b, c]);

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_fault_releases_capacity_for_later_events() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(1);

    let faulty = seed_record(&store, AnalysisState::Pending);
    let healthy = seed_record(&store, AnalysisState::Pending);
    enricher.fail_on(&faulty);

    feed.push(TEST_NAMESPACE, OperationKind::Insert, faulty.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, healthy.clone());

    assert!(processor.start().await.success);

    // The faulted worker still gives its unit back, so the second record is
    // processed with a single unit of capacity.
    wait_until("healthy record analyzed", || {
        store.get_record(&healthy).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    assert_eq!(
        store.get_record(&faulty).unwrap().analysis_state,
        AnalysisState::Pending
    );

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_panic_is_contained_and_releases_capacity() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(1);

    let panicking = seed_record(&store, AnalysisState::Pending);
    let healthy = seed_record(&store, AnalysisState::Pending);
    enricher.panic_on(&panicking);

    feed.push(TEST_NAMESPACE, OperationKind::Insert, panicking.clone());
    feed.push(TEST_NAMESPACE, OperationKind::Insert, healthy.clone());

    assert!(processor.start().await.success);

    wait_until("healthy record analyzed", || {
        store.get_record(&healthy).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_and_stop_are_idempotent() {
    init_test_tracing();

    let (mut processor, _feed, _store, _enricher) = create_processor(2);
    assert_eq!(processor.status(), ProcessorStatus::Stopped);

    let reply = processor.start().await;
    assert!(reply.success);
    assert_eq!(reply.status, "running");
    assert_eq!(processor.status(), ProcessorStatus::Running);

    let reply = processor.start().await;
    assert!(reply.success);
    assert_eq!(reply.status, "already running");

    let reply = processor.stop().await;
    assert!(reply.success);
    assert_eq!(reply.status, "stopped");
    assert_eq!(processor.status(), ProcessorStatus::Stopped);

    let reply = processor.stop().await;
    assert!(reply.success);
    assert_eq!(reply.status, "already stopped");
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_resumes_from_the_checkpointed_cursor() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);

    let a = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());

    assert!(processor.start().await.success);
    wait_until("first record analyzed", || store.analyzed_count() == 1).await;
    assert!(processor.stop().await.success);

    // Events published while stopped are picked up after the restart, while
    // already-consumed events are not reprocessed.
    let b = seed_record(&store, AnalysisState::Pending);
    let last = feed.push(TEST_NAMESPACE, OperationKind::Insert, b.clone());

    assert!(processor.start().await.success);
    wait_until("second record analyzed", || store.analyzed_count() == 2).await;

    assert_eq!(enricher.enriched_ids(), vec![a, b]);
    assert_eq!(store.cursor(), Some(last.next()));

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn tail_start_position_ignores_older_events() {
    init_test_tracing();

    let mut config = test_config(2);
    config.start_position = StartPosition::Tail;
    let (mut processor, feed, store, enricher) = create_processor_with(config);

    let old = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, old.clone());

    assert!(processor.start().await.success);

    let new = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, new.clone());

    wait_until("new record analyzed", || {
        store.get_record(&new).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    // The event published before the start was never consumed.
    assert_eq!(enricher.started_ids(), vec![new]);
    assert_eq!(
        store.get_record(&old).unwrap().analysis_state,
        AnalysisState::Pending
    );

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn fixed_start_position_skips_earlier_events() {
    init_test_tracing();

    let (_, feed, store, _) = create_processor(2);
    let skipped = seed_record(&store, AnalysisState::Pending);
    let processed = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, skipped.clone());
    let second = feed.push(TEST_NAMESPACE, OperationKind::Insert, processed.clone());

    let mut config = test_config(2);
    config.start_position = StartPosition::Fixed(second.into_inner());
    let mut processor = enrich::processor::ChangeProcessor::new(
        config,
        feed.clone(),
        store.clone(),
        enrich::enrichment::MemoryEnricher::new(),
    );

    assert!(processor.start().await.success);
    wait_until("second record analyzed", || {
        store.get_record(&processed).unwrap().analysis_state == AnalysisState::Analyzed
    }).await;

    assert_eq!(
        store.get_record(&skipped).unwrap().analysis_state,
        AnalysisState::Pending
    );

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn sustained_feed_failure_degrades_status_until_recovery() {
    init_test_tracing();

    let (mut processor, feed, store, _enricher) = create_processor(2);

    let a = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());

    // Enough consecutive failures to trip the test config's circuit
    // threshold well before the queued event can be read.
    feed.fail_next_reads(6);

    assert!(processor.start().await.success);
    wait_until("status degraded", || {
        processor.status() == ProcessorStatus::Degraded
    }).await;

    // Once the injected failures are exhausted the event is delivered and the
    // circuit closes.
    wait_until("status running again", || {
        processor.status() == ProcessorStatus::Running
    }).await;
    wait_until("record analyzed after recovery", || {
        store.analyzed_count() == 1
    }).await;

    assert!(processor.stop().await.success);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_events_for_an_analyzed_record_do_not_reenrich() {
    init_test_tracing();

    let (mut processor, feed, store, enricher) = create_processor(2);

    let a = seed_record(&store, AnalysisState::Pending);
    feed.push(TEST_NAMESPACE, OperationKind::Insert, a.clone());

    assert!(processor.start().await.success);
    wait_until("record analyzed", || store.analyzed_count() == 1).await;

    // A second event for the now-analyzed record spawns a worker that loads
    // it, sees the marker, and returns without mutation.
    let second = feed.push(TEST_NAMESPACE, OperationKind::Update, a.clone());
    wait_until("cursor advanced past the second event", || {
        store.cursor() == Some(second.next())
    }).await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(enricher.enriched_ids(), vec![a]);

    assert!(processor.stop().await.success);
}
