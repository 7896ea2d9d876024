use chrono::Duration;
use futures::stream::StreamExt;
use serde_json::json;
use std::sync::Arc;
use streamledger_core::{
    CommitAttempt, EventStoreFacade, InMemoryBackend, InMemoryStore, Partition, PipelineHooksAware,
    StreamId, StreamLedgerError,
};
use uuid::Uuid;

fn facade(partition: Partition) -> Arc<EventStoreFacade> {
    Arc::new(EventStoreFacade::new(
        Arc::new(InMemoryBackend::new(partition)),
        PipelineHooksAware::empty(),
    ))
}

fn stamped_attempt(stream_id: &str, partition: Partition, commit_stamp: chrono::DateTime<chrono::Utc>) -> CommitAttempt {
    CommitAttempt {
        partition,
        stream_id: StreamId::new(stream_id).unwrap(),
        commit_id: Uuid::new_v4(),
        commit_sequence: 1,
        stream_revision: 1,
        starting_stream_revision: 1,
        commit_stamp,
        headers: Default::default(),
        events: vec![json!({"stamped": true})],
    }
}

/// Scenario: concurrent commit collision. Two streams built over the same
/// stream id both attempt sequence 1; exactly one wins and the loser's
/// rebase observes the winner's event.
#[tokio::test]
async fn concurrent_commit_collision_resolves_via_rebase() {
    let facade = facade(Partition::default_partition());
    let stream_id = StreamId::new("order-1").unwrap();

    let mut t1 = facade.create_stream(stream_id.clone()).unwrap();
    t1.append_event(json!({"event": "e1"}));
    let mut t2 = facade.create_stream(stream_id).unwrap();
    t2.append_event(json!({"event": "f1"}));

    t1.commit_changes(Uuid::new_v4()).await.unwrap();
    let loser_result = t2.commit_changes(Uuid::new_v4()).await;

    assert!(matches!(loser_result, Err(StreamLedgerError::Concurrency { .. })));
    assert_eq!(t2.commit_sequence(), 1);
    assert_eq!(t2.stream_revision(), 1);
    assert_eq!(t2.committed_events(), &[json!({"event": "e1"})]);
}

/// Scenario: duplicate commit. Submitting the identical attempt twice
/// succeeds once and fails the second time with DuplicateCommit; the stream
/// still holds exactly one commit with one event.
#[tokio::test]
async fn duplicate_commit_is_rejected_on_retry() {
    let facade = facade(Partition::default_partition());
    let stream_id = StreamId::new("order-2").unwrap();
    let commit_id = Uuid::new_v4();

    let attempt = |seq, rev| CommitAttempt {
        partition: Partition::default_partition(),
        stream_id: stream_id.clone(),
        commit_id,
        commit_sequence: seq,
        stream_revision: rev,
        starting_stream_revision: rev,
        commit_stamp: chrono::Utc::now(),
        headers: Default::default(),
        events: vec![json!({"event": "e1"})],
    };

    let first = facade.commit(attempt(1, 1)).await.unwrap();
    assert!(first.is_some());

    let second = facade.commit(attempt(1, 1)).await;
    assert!(matches!(second, Err(StreamLedgerError::DuplicateCommit { .. })));

    let stream = facade
        .open_stream(stream_id, 0, 0)
        .await
        .unwrap();
    assert_eq!(stream.committed_events().len(), 1);
}

/// Scenario: snapshot bookkeeping. Three commits bring unsnapshotted to 3;
/// a snapshot at revision 2 drops it to 1, changing which threshold sweeps
/// surface the stream.
#[tokio::test]
async fn snapshot_bookkeeping_tracks_unsnapshotted_lag() {
    let facade = facade(Partition::default_partition());
    let stream_id = StreamId::new("order-3").unwrap();
    let mut stream = facade.create_stream(stream_id.clone()).unwrap();

    for i in 0..3 {
        stream.append_event(json!({"n": i}));
        stream.commit_changes(Uuid::new_v4()).await.unwrap();
    }

    let persistence = facade.advanced().unwrap();
    let ok = persistence
        .add_snapshot(streamledger_core::Snapshot::new(
            Partition::default_partition(),
            stream_id,
            2,
            json!({}),
        ))
        .await;
    assert!(ok);

    assert!(persistence.get_streams_to_snapshot(2).await.unwrap().is_empty());
    assert_eq!(persistence.get_streams_to_snapshot(1).await.unwrap().len(), 1);
}

/// Scenario: undispatched sweep. Three commits land in stamp order;
/// `get_undispatched_commits` returns them in that order, and marking the
/// middle one dispatched removes only that one from the sweep.
#[tokio::test]
async fn undispatched_sweep_and_dispatch_flag() {
    let facade = facade(Partition::default_partition());
    let stream_id = StreamId::new("order-4").unwrap();
    let mut stream = facade.create_stream(stream_id.clone()).unwrap();

    for i in 0..3 {
        stream.append_event(json!({"n": i}));
        stream.commit_changes(Uuid::new_v4()).await.unwrap();
    }

    let persistence = facade.advanced().unwrap();
    use futures::stream::StreamExt;
    let mut undispatched = persistence.get_undispatched_commits().await.unwrap();
    let mut sequences = Vec::new();
    while let Some(c) = undispatched.next().await {
        sequences.push(c.unwrap().commit_sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3]);

    persistence.mark_commit_as_dispatched(&stream_id, 2).await.unwrap();

    let mut undispatched = persistence.get_undispatched_commits().await.unwrap();
    let mut remaining = Vec::new();
    while let Some(c) = undispatched.next().await {
        remaining.push(c.unwrap().commit_sequence);
    }
    assert_eq!(remaining, vec![1, 3]);
}

/// An invalid (event-empty) attempt is silently dropped by the facade: no
/// error, no persisted commit.
#[tokio::test]
async fn invalid_commit_is_silently_dropped_not_errored() {
    let facade = facade(Partition::default_partition());
    let attempt = CommitAttempt {
        partition: Partition::default_partition(),
        stream_id: StreamId::new("order-5").unwrap(),
        commit_id: Uuid::new_v4(),
        commit_sequence: 1,
        stream_revision: 1,
        starting_stream_revision: 1,
        commit_stamp: chrono::Utc::now(),
        headers: Default::default(),
        events: vec![],
    };
    let result = facade.commit(attempt).await.unwrap();
    assert!(result.is_none());
}

/// A pipeline hook can veto a commit before persistence without producing
/// an error.
#[tokio::test]
async fn pre_commit_hook_veto_silently_drops_the_attempt() {
    struct Veto;
    #[async_trait::async_trait]
    impl streamledger_core::PipelineHook for Veto {
        async fn pre_commit(&self, _attempt: &CommitAttempt) -> bool {
            false
        }
    }

    let facade = Arc::new(EventStoreFacade::new(
        Arc::new(InMemoryBackend::new(Partition::default_partition())),
        PipelineHooksAware::new(vec![Box::new(Veto)]),
    ));
    let mut stream = facade.create_stream(StreamId::new("order-6").unwrap()).unwrap();
    stream.append_event(json!({"a": 1}));

    let result = stream.commit_changes(Uuid::new_v4()).await.unwrap();
    assert!(result.is_none());
    assert_eq!(stream.stream_revision(), 0);
}

/// Scenario: time-range read. Commits land at t, t+1s, t+2s, t+3s in the
/// default partition and one lands two days later in another partition
/// sharing the same physical store. `get_from_timestamp`/`get_from_to`
/// return only the in-partition commits, ascending by `commit_stamp`.
#[tokio::test]
async fn time_range_read_orders_ascending_and_excludes_other_partitions() {
    let store = Arc::new(InMemoryStore::new());
    let home = facade_over(store.clone(), Partition::default_partition());
    let other = facade_over(store.clone(), Partition::new("other-tenant").unwrap());

    let t0 = chrono::Utc::now();
    for (i, offset) in [0i64, 1, 2, 3].iter().enumerate() {
        home.commit(stamped_attempt(
            &format!("stream-{i}"),
            Partition::default_partition(),
            t0 + Duration::seconds(*offset),
        ))
        .await
        .unwrap();
    }
    other
        .commit(stamped_attempt(
            "far-away",
            Partition::new("other-tenant").unwrap(),
            t0 + Duration::days(2),
        ))
        .await
        .unwrap();

    let persistence = home.advanced().unwrap();

    let mut since = persistence.get_from_timestamp(t0).await.unwrap();
    let mut stamps = Vec::new();
    while let Some(commit) = since.next().await {
        stamps.push(commit.unwrap().commit_stamp);
    }
    assert_eq!(stamps.len(), 4, "the other partition's commit must not appear");
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "must be ascending");

    let mut bounded = persistence
        .get_from_to(t0, t0 + Duration::seconds(2))
        .await
        .unwrap();
    let mut count = 0;
    while bounded.next().await.is_some() {
        count += 1;
    }
    assert_eq!(count, 2, "end bound is exclusive: only t0 and t0+1s qualify");
}

fn facade_over(store: Arc<InMemoryStore>, partition: Partition) -> Arc<EventStoreFacade> {
    Arc::new(EventStoreFacade::new(
        Arc::new(InMemoryBackend::with_store(store, partition)),
        PipelineHooksAware::empty(),
    ))
}
