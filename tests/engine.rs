//! Engine scenarios against the in-memory remote store.
//!
//! Covers the read path (cache hits, coalesced fetches, mget), the write
//! path (exec + queue), distribution, echo handling and the run loop.
//!
//! Run with: `cargo test --test engine`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

use archivist::codec::builtin::{JSON, TEXT, TRACKED_JSON};
use archivist::{
    index, Archivist, ArchivistConfig, ArchivistError, EchoEvent, EngineState, EventKind, GetOptions, InMemoryRemote,
    Index, ListOptions, LiveValue, Operation, RawValue, RecordKey, ServerClock, TransportError, WriteOptions,
};

// =============================================================================
// Helpers
// =============================================================================

fn key(id: &str) -> RecordKey {
    RecordKey::new("player", index([("id", id)]))
}

fn setup() -> (Archivist, Arc<InMemoryRemote>) {
    let remote = Arc::new(InMemoryRemote::new());
    let archivist = Archivist::new(ArchivistConfig::default(), remote.clone());
    (archivist, remote)
}

fn json_of(value: Option<LiveValue>) -> Option<Value> {
    match value? {
        LiveValue::Json(v) => Some(v),
        LiveValue::Tracked(doc) => Some(doc.into_inner()),
        other => panic!("expected JSON, got {:?}", other),
    }
}

fn utf8(text: &str, media_type: &str) -> RawValue {
    RawValue {
        data: Value::String(text.to_string()),
        media_type: media_type.to_string(),
        encoding: archivist::Encoding::Utf8,
    }
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_set_then_get_never_fetches() {
    let (archivist, remote) = setup();
    archivist
        .set(&key("a"), json!({"hp": 10}), WriteOptions::default())
        .unwrap();

    let value = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!({"hp": 10})));
    assert_eq!(remote.fetch_calls(), 0);
}

#[tokio::test]
async fn test_fetch_fills_the_cache() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!({"hp": 3}));

    let first = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    let second = archivist.get(&key("a"), GetOptions::default()).await.unwrap();

    assert_eq!(json_of(first), Some(json!({"hp": 3})));
    assert_eq!(json_of(second), Some(json!({"hp": 3})));
    assert_eq!(remote.get_calls(), 1);
    assert!(archivist.cache().contains(&key("a").true_name()));
}

#[tokio::test]
async fn test_never_fetched_absent_key_is_not_found() {
    let (archivist, remote) = setup();

    let record = archivist.get_value(&key("ghost"), GetOptions::default()).await.unwrap();
    assert!(record.is_none());
    assert_eq!(remote.get_calls(), 1);

    let err = archivist
        .get_value(&key("ghost"), GetOptions::required())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchivistError::RequiredValueMissing { .. }));
}

#[tokio::test]
async fn test_deleted_value_is_known_absent() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    archivist.del(&key("a"));

    let record = archivist
        .get_value(&key("a"), GetOptions::default())
        .await
        .unwrap()
        .expect("record stays cached after del");
    assert!(!record.has_value());
    assert_eq!(remote.fetch_calls(), 0);

    let err = archivist.get(&key("a"), GetOptions::required()).await.unwrap_err();
    assert!(matches!(err, ArchivistError::RequiredValueMissing { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_gets_share_one_fetch() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!({"hp": 7}));
    remote.set_delay(Duration::from_millis(50));

    let (ka1, ka2) = (key("a"), key("a"));
    let (first, second) = tokio::join!(
        archivist.get_value(&ka1, GetOptions::default()),
        archivist.get_value(&ka2, GetOptions::default()),
    );
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(remote.get_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mget_joins_fetch_started_by_get() {
    let (archivist, remote) = setup();
    for (id, hp) in [("a", 1), ("b", 2), ("c", 3)] {
        remote.put_json(key(id), &json!({"hp": hp}));
    }
    remote.set_delay(Duration::from_millis(50));

    // join! polls in order: the get leads "a" before the mget enqueues
    let ka = key("a");
    let keys = [key("a"), key("b"), key("c")];
    let (single, batch) = tokio::join!(
        archivist.get_value(&ka, GetOptions::default()),
        archivist.mget_values(&keys, GetOptions::default()),
    );
    let single = single.unwrap().unwrap();
    let batch = batch.unwrap();

    assert_eq!(remote.get_calls(), 1);
    assert_eq!(remote.mget_calls(), 1);
    let log = remote.fetch_log();
    assert!(log.contains(&vec![key("a")]));
    assert!(log.contains(&vec![key("b"), key("c")]));

    let joined = batch[0].as_ref().unwrap();
    assert!(Arc::ptr_eq(&single, joined));
    assert_eq!(json_of(joined.data()), Some(json!({"hp": 1})));
    assert_eq!(json_of(batch[2].as_ref().unwrap().data()), Some(json!({"hp": 3})));
}

#[tokio::test(start_paused = true)]
async fn test_get_joins_fetch_started_by_mget() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!({"hp": 1}));
    remote.put_json(key("b"), &json!({"hp": 2}));
    remote.set_delay(Duration::from_millis(50));

    let keys = [key("a"), key("b")];
    let ka = key("a");
    let (batch, single) = tokio::join!(
        archivist.mget_values(&keys, GetOptions::default()),
        archivist.get_value(&ka, GetOptions::default()),
    );
    let batch = batch.unwrap();
    let single = single.unwrap().unwrap();

    assert_eq!(remote.get_calls(), 0);
    assert_eq!(remote.fetch_log(), vec![vec![key("a"), key("b")]]);
    assert!(Arc::ptr_eq(batch[0].as_ref().unwrap(), &single));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_reaches_every_waiter() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!(1));
    remote.set_delay(Duration::from_millis(20));
    remote.set_failure(Some(TransportError::Timeout));

    let (ka1, ka2) = (key("a"), key("a"));
    let (first, second) = tokio::join!(
        archivist.get(&ka1, GetOptions::default()),
        archivist.get(&ka2, GetOptions::default()),
    );
    assert_eq!(first.unwrap_err(), ArchivistError::Transport(TransportError::Timeout));
    assert_eq!(second.unwrap_err(), ArchivistError::Transport(TransportError::Timeout));
    assert_eq!(remote.get_calls(), 1);
    assert!(!archivist.cache().contains(&key("a").true_name()));

    // next read tries again
    remote.set_failure(None);
    let value = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!(1)));
    assert_eq!(remote.get_calls(), 2);
}

#[tokio::test]
async fn test_max_age_refetches_old_records() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!(1));
    archivist.get(&key("a"), GetOptions::default()).await.unwrap();

    remote.put_json(key("a"), &json!(2));
    tokio::time::sleep(Duration::from_millis(20)).await;

    // no max age: the cached value is good forever
    let cached = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(cached), Some(json!(1)));

    let fresh = archivist
        .get(&key("a"), GetOptions::default().max_age(Duration::from_millis(5)))
        .await
        .unwrap();
    assert_eq!(json_of(fresh), Some(json!(2)));
    assert_eq!(remote.get_calls(), 2);
}

#[tokio::test]
async fn test_mget_keeps_order_and_batches_misses() {
    let (archivist, remote) = setup();
    archivist.set(&key("cached"), json!("c"), WriteOptions::default()).unwrap();
    remote.put_json(key("b"), &json!("b"));
    remote.put_json(key("d"), &json!("d"));

    let keys = [key("b"), key("cached"), key("missing"), key("d")];
    let values = archivist.mget(&keys, GetOptions::default()).await.unwrap();

    let values: Vec<Option<Value>> = values.into_iter().map(json_of).collect();
    assert_eq!(values, vec![Some(json!("b")), Some(json!("c")), None, Some(json!("d"))]);
    assert_eq!(remote.mget_calls(), 1);
    assert_eq!(remote.get_calls(), 0);
}

#[tokio::test]
async fn test_mget_required_fails_on_missing_key() {
    let (archivist, remote) = setup();
    remote.put_json(key("b"), &json!("b"));

    let err = archivist
        .mget(&[key("b"), key("missing")], GetOptions::required())
        .await
        .unwrap_err();
    assert!(matches!(err, ArchivistError::RequiredValueMissing { .. }));
}

#[tokio::test]
async fn test_mget_named_maps_back_to_names() {
    let (archivist, remote) = setup();
    remote.put_json(key("a"), &json!({"name": "alice"}));

    let mut queries = BTreeMap::new();
    queries.insert("me".to_string(), key("a"));
    queries.insert("nobody".to_string(), key("z"));

    let values = archivist.mget_named(&queries, GetOptions::default()).await.unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(json_of(values["me"].clone()), Some(json!({"name": "alice"})));
    assert!(values["nobody"].is_none());
}

#[tokio::test]
async fn test_exists_answers_from_cache() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    remote.put_json(key("b"), &json!(2));

    assert!(archivist.exists(&key("a"), GetOptions::default()).await.unwrap());
    assert!(archivist.exists(&key("b"), GetOptions::default()).await.unwrap());
    assert!(!archivist.exists(&key("c"), GetOptions::default()).await.unwrap());

    archivist.del(&key("a"));
    assert!(!archivist.exists(&key("a"), GetOptions::default()).await.unwrap());
    assert_eq!(remote.get_calls(), 0);
}

#[tokio::test]
async fn test_list_pages_remote_indexes() {
    let (archivist, remote) = setup();
    for id in ["a", "b", "c"] {
        remote.put_json(key(id), &json!(id));
    }
    remote.put_json(RecordKey::new("guild", index([("id", "a")])), &json!("g"));

    let all = archivist
        .list("player", &Index::new(), ListOptions::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);

    let page = archivist
        .list("player", &Index::new(), ListOptions::page(1, 1))
        .await
        .unwrap();
    assert_eq!(page, vec![index([("id", "b")])]);

    let filtered = archivist
        .list("player", &index([("id", "c")]), ListOptions::default())
        .await
        .unwrap();
    assert_eq!(filtered, vec![index([("id", "c")])]);
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_unencodable_set_is_not_queued() {
    let (archivist, _remote) = setup();
    let err = archivist
        .set(&key("a"), json!(1), WriteOptions::media_type("application/x-unknown"))
        .unwrap_err();
    // stored by the wildcard writer, but nothing can encode it for the wire
    assert_eq!(err.kind(), "no_encoder_found");
    assert!(archivist.pending_changes().is_empty());
}

#[tokio::test]
async fn test_add_on_cached_value_changes_nothing_locally() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    archivist.distribute().await.unwrap();

    let mut events = archivist.subscribe();
    let added = archivist.add(&key("a"), json!(2), WriteOptions::default()).unwrap();
    assert!(added.is_none());
    assert!(events.try_recv().is_err());

    let value = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!(1)));

    // the remote store has the final say
    let issues = archivist.distribute().await.unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].key, Some(key("a")));
    assert_eq!(remote.json(&key("a")), Some(json!(1)));
}

#[tokio::test]
async fn test_add_conflicts_with_pending_change() {
    let (archivist, _remote) = setup();
    archivist.touch(&key("a"), Some(4_000_000_000));
    let err = archivist.add(&key("a"), json!(1), WriteOptions::default()).unwrap_err();
    assert!(matches!(err, ArchivistError::ConflictingPendingChange { .. }));
}

#[tokio::test]
async fn test_touch_and_del_collapse_to_del() {
    let (archivist, _remote) = setup();
    archivist.touch(&key("a"), Some(4_000_000_000));
    archivist.del(&key("a"));
    archivist.touch(&key("b"), None);
    archivist.del(&key("b"));
    archivist.touch(&key("b"), Some(4_000_000_000));

    let pending = archivist.pending_changes();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|c| c.operation == Operation::Del));
}

#[tokio::test]
async fn test_later_set_replaces_pending_set() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!("first"), WriteOptions::default()).unwrap();
    archivist.set(&key("a"), json!("second"), WriteOptions::default()).unwrap();
    assert_eq!(archivist.pending_changes().len(), 1);

    archivist.distribute().await.unwrap();
    let sent = remote.distributed();
    assert_eq!(sent.len(), 1);
    assert_eq!(remote.json(&key("a")), Some(json!("second")));
}

#[tokio::test]
async fn test_modify_rejects_media_types_without_differ() {
    let (archivist, _remote) = setup();
    archivist.set(&key("a"), json!({"hp": 1}), WriteOptions::media_type(JSON)).unwrap();

    let mut ran = false;
    let err = archivist.modify(&key("a"), |_| ran = true).unwrap_err();
    assert!(matches!(err, ArchivistError::CannotDiffMediaType { .. }));
    assert!(!ran);

    let err = archivist.modify(&key("nothing"), |_| ()).unwrap_err();
    assert!(matches!(err, ArchivistError::CannotDiffMediaType { media_type: None, .. }));
}

// =============================================================================
// Distribution
// =============================================================================

#[tokio::test]
async fn test_distribute_with_empty_ledger_skips_remote() {
    let (archivist, remote) = setup();
    let issues = archivist.distribute().await.unwrap();
    assert!(issues.is_empty());
    assert_eq!(remote.distribute_calls(), 0);
}

#[tokio::test]
async fn test_distribute_sends_changes_in_order() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!({"hp": 1}), WriteOptions::default()).unwrap();
    archivist.set(&key("b"), "hello", WriteOptions::media_type(TEXT)).unwrap();
    archivist.del(&key("c"));

    let issues = archivist.distribute().await.unwrap();
    assert!(issues.is_empty());
    assert!(archivist.pending_changes().is_empty());

    let sent = remote.distributed();
    let order: Vec<_> = sent.iter().map(|c| (c.key(), c.operation)).collect();
    assert_eq!(
        order,
        vec![(key("a"), Operation::Set), (key("b"), Operation::Set), (key("c"), Operation::Del)]
    );
    assert_eq!(remote.json(&key("a")), Some(json!({"hp": 1})));
    assert_eq!(remote.value(&key("b")).unwrap().data, json!("hello"));
}

#[tokio::test]
async fn test_failed_distribution_drops_the_snapshot() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    remote.set_failure(Some(TransportError::Unavailable("down".into())));

    let err = archivist.distribute().await.unwrap_err();
    assert_eq!(err.kind(), "transport");
    assert!(archivist.pending_changes().is_empty());
    assert!(!archivist.is_distributing());
    assert!(remote.is_empty());
}

#[tokio::test]
async fn test_lazy_diff_reflects_state_at_distribution() {
    let (archivist, remote) = setup();
    archivist
        .set(&key("a"), json!({"hp": 10, "level": 1}), WriteOptions::media_type(TRACKED_JSON))
        .unwrap();
    archivist.distribute().await.unwrap();

    let bump = |live: &mut LiveValue| {
        if let LiveValue::Tracked(doc) = live {
            let level = doc.get()["level"].as_i64().unwrap_or(0);
            doc.get_mut()["level"] = json!(level + 1);
        }
    };
    archivist.modify(&key("a"), bump).unwrap();
    archivist.modify(&key("a"), bump).unwrap();

    let pending = archivist.pending_changes();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].has_diff);

    // edits after queuing still make it into the diff
    archivist.modify(&key("a"), bump).unwrap();
    archivist.distribute().await.unwrap();

    let sent = remote.distributed();
    let last = sent.last().unwrap();
    assert_eq!(last.operation, Operation::Set);
    assert!(last.value.is_none());
    assert_eq!(last.diff, Some(json!({"level": 4})));
    assert_eq!(remote.json(&key("a")), Some(json!({"hp": 10, "level": 4})));
}

#[tokio::test]
async fn test_public_apply_diff_is_distributed() {
    let (archivist, remote) = setup();
    archivist
        .set(&key("a"), json!({"hp": 10}), WriteOptions::media_type(TRACKED_JSON))
        .unwrap();
    archivist.distribute().await.unwrap();

    archivist.apply_diff(&key("a"), &json!({"hp": 5}), None).unwrap();
    let value = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!({"hp": 5})));

    archivist.distribute().await.unwrap();
    assert_eq!(remote.json(&key("a")), Some(json!({"hp": 5})));
}

#[tokio::test]
async fn test_apply_diff_on_plain_json_is_rejected() {
    let (archivist, _remote) = setup();
    archivist.set(&key("a"), json!({"hp": 10}), WriteOptions::default()).unwrap();
    archivist.distribute().await.unwrap();

    let err = archivist.apply_diff(&key("a"), &json!({"hp": 5}), None).unwrap_err();
    assert!(matches!(err, ArchivistError::CannotDiffMediaType { .. }));
    assert!(archivist.pending_changes().is_empty());
}

// =============================================================================
// Echoes
// =============================================================================

#[tokio::test]
async fn test_echo_updates_cache_and_notifies() {
    let (archivist, _remote) = setup();
    let mut events = archivist.subscribe_topic("player");

    let applied = archivist.handle_echo(EchoEvent::Set {
        key: key("a"),
        value: utf8("{\"hp\":2}", JSON),
        expiration_time: None,
    });
    assert!(applied);

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Set);
    assert_eq!(json_of(event.record.data()), Some(json!({"hp": 2})));
    // echoes are never queued
    assert!(archivist.pending_changes().is_empty());

    assert!(archivist.handle_echo(EchoEvent::Del { key: key("a") }));
    assert!(!archivist.cache().get(&key("a").true_name()).unwrap().has_value());
}

#[tokio::test]
async fn test_undecodable_echo_is_swallowed() {
    let (archivist, _remote) = setup();
    let applied = archivist.handle_echo(EchoEvent::Set {
        key: key("a"),
        value: utf8("{not json", JSON),
        expiration_time: None,
    });
    assert!(!applied);
    assert!(!archivist.cache().contains(&key("a").true_name()));
}

#[tokio::test(start_paused = true)]
async fn test_echoes_dropped_while_distributing() {
    let (archivist, remote) = setup();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    remote.set_delay(Duration::from_millis(100));

    let sender = archivist.clone();
    let send = tokio::spawn(async move { sender.distribute().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(archivist.is_distributing());

    let echo = EchoEvent::Set {
        key: key("b"),
        value: utf8("2", JSON),
        expiration_time: None,
    };
    assert!(!archivist.handle_echo(echo.clone()));
    assert!(!archivist.cache().contains(&key("b").true_name()));

    send.await.unwrap().unwrap();
    assert!(!archivist.is_distributing());
    assert!(archivist.handle_echo(echo));
    assert!(archivist.cache().contains(&key("b").true_name()));
}

#[tokio::test]
async fn test_own_echoes_never_overwrite_newer_writes() {
    let (archivist, remote) = setup();
    let (tx, rx) = mpsc::unbounded_channel();
    remote.set_echoes(tx);
    let _echoes = archivist.attach_echoes(rx);

    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    archivist.distribute().await.unwrap();
    let mut events = archivist.subscribe();
    archivist.set(&key("a"), json!(2), WriteOptions::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let value = archivist.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!(2)));

    // only our own set, no echo re-applied
    assert_eq!(events.try_recv().unwrap().kind, EventKind::Set);
    assert!(events.try_recv().is_err());
    assert_eq!(archivist.pending_changes().len(), 1);
}

#[tokio::test]
async fn test_empty_distribute_keeps_queued_echoes() {
    let (archivist, _remote) = setup();
    let (tx, rx) = mpsc::unbounded_channel();
    let _echoes = archivist.attach_echoes(rx);

    tx.send(EchoEvent::Set {
        key: key("b"),
        value: utf8("7", JSON),
        expiration_time: None,
    })
    .unwrap();
    assert!(archivist.distribute().await.unwrap().is_empty());
    assert!(!archivist.is_distributing());

    tokio::time::sleep(Duration::from_millis(10)).await;
    let value = archivist.get(&key("b"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!(7)));
}

#[tokio::test]
async fn test_reattached_echo_stream_replaces_the_old_one() {
    let (archivist, _remote) = setup();
    let (_old_tx, old_rx) = mpsc::unbounded_channel::<EchoEvent>();
    let old = archivist.attach_echoes(old_rx);
    tokio::task::yield_now().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let _current = archivist.attach_echoes(rx);
    tokio::time::timeout(Duration::from_secs(1), old)
        .await
        .expect("old echo task ends")
        .unwrap();

    tx.send(EchoEvent::Del { key: key("a") }).unwrap();
    archivist.set(&key("c"), json!(1), WriteOptions::default()).unwrap();
    tx.send(EchoEvent::Del { key: key("c") }).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let record = archivist.cache().get(&key("c").true_name()).unwrap();
    assert!(!record.has_value());
}

#[tokio::test]
async fn test_attached_echoes_sync_two_clients() {
    let remote = Arc::new(InMemoryRemote::new());
    let reader = Archivist::new(ArchivistConfig::default(), remote.clone());
    let writer = Archivist::new(ArchivistConfig::default(), remote.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    remote.set_echoes(tx);
    let _echoes = reader.attach_echoes(rx);

    remote.put_json(key("a"), &json!({"hp": 1}));
    reader.get(&key("a"), GetOptions::default()).await.unwrap();

    let mut events = reader.subscribe();
    writer.set(&key("a"), json!({"hp": 9}), WriteOptions::default()).unwrap();
    writer.distribute().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("echo arrives")
        .unwrap();
    assert_eq!(event.kind, EventKind::Set);

    let value = reader.get(&key("a"), GetOptions::default()).await.unwrap();
    assert_eq!(json_of(value), Some(json!({"hp": 9})));
    assert_eq!(remote.get_calls(), 1);
}

#[tokio::test]
async fn test_topic_subscription_skips_other_topics() {
    let (archivist, _remote) = setup();
    let mut guilds = archivist.subscribe_topic("guild");

    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();
    let guild = RecordKey::new("guild", index([("id", "g")]));
    archivist.set(&guild, json!(2), WriteOptions::default()).unwrap();

    let event = guilds.try_recv().unwrap();
    assert_eq!(event.record.key(), &guild);
    assert!(guilds.try_recv().is_err());
}

// =============================================================================
// Expiry and clocks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_expiry_clears_value_but_keeps_record() {
    let (archivist, _remote) = setup();
    archivist
        .set(&key("a"), json!(1), WriteOptions::default().expires_in(Duration::from_secs(5)))
        .unwrap();
    let mut events = archivist.subscribe();

    tokio::time::sleep(Duration::from_secs(7)).await;

    let record = archivist.cache().get(&key("a").true_name()).unwrap();
    assert!(!record.has_value());
    assert_eq!(record.expiration_time(), None);
    // expiry is local housekeeping, not a dispatched del
    assert!(events.try_recv().is_err());
}

struct SkewedClock {
    server_ahead_by: u64,
}

impl ServerClock for SkewedClock {
    fn server_to_client(&self, server_secs: u64) -> u64 {
        server_secs.saturating_sub(self.server_ahead_by)
    }
}

#[tokio::test]
async fn test_expirations_go_through_the_server_clock() {
    let remote = Arc::new(InMemoryRemote::new());
    let archivist = Archivist::builder(remote)
        .clock(Arc::new(SkewedClock { server_ahead_by: 100 }))
        .build();

    let record = archivist
        .set(&key("a"), json!(1), WriteOptions::default().expires_at(10_000_000_000))
        .unwrap();
    assert_eq!(record.expiration_time(), Some(9_999_999_900));

    // the queued change keeps server time
    assert_eq!(archivist.pending_changes()[0].expiration_time, Some(10_000_000_000));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_auto_distribute_and_shutdown() {
    let remote = Arc::new(InMemoryRemote::new());
    let config = ArchivistConfig {
        distribute_interval_ms: 100,
        ..Default::default()
    };
    let archivist = Archivist::new(config, remote.clone());
    assert_eq!(archivist.state(), EngineState::Created);

    let handle = archivist.spawn_auto_distribute();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(archivist.state(), EngineState::Running);
    assert_eq!(remote.json(&key("a")), Some(json!(1)));

    // pending at shutdown is flushed by shutdown itself
    archivist.set(&key("b"), json!(2), WriteOptions::default()).unwrap();
    archivist.shutdown().await.unwrap();
    handle.await.unwrap();

    assert_eq!(archivist.state(), EngineState::ShuttingDown);
    assert_eq!(remote.json(&key("b")), Some(json!(2)));
}

#[tokio::test(start_paused = true)]
async fn test_config_update_enables_auto_distribute() {
    let remote = Arc::new(InMemoryRemote::new());
    let (config_tx, config_rx) = watch::channel(ArchivistConfig::default());
    let archivist = Archivist::builder(remote.clone())
        .config_updates(config_rx)
        .build();

    let handle = archivist.spawn_auto_distribute();
    archivist.set(&key("a"), json!(1), WriteOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(remote.distribute_calls(), 0);

    config_tx
        .send(ArchivistConfig {
            distribute_interval_ms: 50,
            ..Default::default()
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(archivist.config().distribute_interval_ms, 50);
    assert_eq!(remote.json(&key("a")), Some(json!(1)));

    handle.abort();
}
