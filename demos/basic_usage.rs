// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic archivist usage example.
//!
//! Demonstrates:
//! 1. Two clients sharing one (in-memory) remote store
//! 2. Writing values and reading them back from the cache
//! 3. Batched fetches on the second client
//! 4. Editing a tracked document in place and distributing the diff
//! 5. Echoes keeping the other client's cache current
//! 6. Displaying metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use archivist::codec::builtin::TRACKED_JSON;
use archivist::{
    index, Archivist, ArchivistConfig, EngineState, GetOptions, InMemoryRemote, LiveValue, RecordKey, WriteOptions,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             archivist: Basic Usage Example                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Two clients, one remote store
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 1. Creating two clients");
    let remote = Arc::new(InMemoryRemote::new());
    let config = ArchivistConfig {
        distribute_interval_ms: 100,
        ..Default::default()
    };
    let alice = Archivist::new(config.clone(), remote.clone());
    let bob = Archivist::new(config, remote.clone());

    let (echo_tx, echo_rx) = mpsc::unbounded_channel();
    remote.set_echoes(echo_tx);
    let _echoes = bob.attach_echoes(echo_rx);

    let auto = alice.spawn_auto_distribute();
    println!("│  └─ alice auto-distributes every 100ms, bob listens for echoes");
    println!("└─ Done\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Writes land in the cache right away
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 2. Writing players");
    let players = [("p1", "Arthas", 80), ("p2", "Jaina", 75), ("p3", "Thrall", 90)];
    for (id, name, level) in players {
        let key = RecordKey::new("player", index([("id", id)]));
        alice.set(
            &key,
            json!({"name": name, "level": level}),
            WriteOptions::media_type(TRACKED_JSON),
        )?;
        println!("│  ├─ set {}", key);
    }
    let p1 = RecordKey::new("player", index([("id", "p1")]));
    let cached = alice.get(&p1, GetOptions::default()).await?;
    println!("│  └─ read back from cache: {:?}", cached.as_ref().and_then(LiveValue::as_json));
    println!("└─ {} changes pending\n", alice.pending_changes().len());

    tokio::time::sleep(Duration::from_millis(250)).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Bob reads: echoes of alice's writes may already be cached, the
    //    rest is fetched with one mget
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 3. Bob reading all players");
    let keys: Vec<RecordKey> = players
        .iter()
        .map(|(id, _, _)| RecordKey::new("player", index([("id", *id)])))
        .collect();
    let values = bob.mget(&keys, GetOptions::default()).await?;
    for (key, value) in keys.iter().zip(&values) {
        println!("│  ├─ {} = {:?}", key, value.as_ref().and_then(LiveValue::as_json));
    }
    println!("│  └─ remote fetch calls so far: {}", remote.fetch_calls());
    println!("└─ Done\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Alice levels up p1 in place; only the diff is sent
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 4. Levelling up p1");
    alice.modify(&p1, |live| {
        if let LiveValue::Tracked(doc) = live {
            doc.get_mut()["level"] = json!(81);
        }
    })?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    if let Some(change) = remote.distributed().last() {
        println!("│  └─ sent diff: {:?}", change.diff);
    }
    println!("└─ Done\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Bob's cache was updated by the echo
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 5. Bob's view of p1");
    let seen = bob.get(&p1, GetOptions::default()).await?;
    println!("│  └─ {:?}", seen.as_ref().and_then(LiveValue::as_json));
    println!("└─ Done\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics and shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("┌─ 6. Metrics");
    dump_metrics(&snapshotter);
    println!("└─ Done\n");

    alice.shutdown().await?;
    auto.await?;
    assert_eq!(alice.state(), EngineState::ShuttingDown);
    println!("Shutdown complete.");
    Ok(())
}

/// Dump all captured metrics
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, labels, value) in &counters {
        println!("│  ├─ {}{} = {}", name, labels, value);
    }
    for (name, labels, value) in &gauges {
        println!("│  ├─ {}{} = {:.0}", name, labels, value);
    }
    for (name, labels, count, sum) in &histograms {
        println!("│  ├─ {}{} count={} sum={:.4}", name, labels, count, sum);
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("│  └─ (no metrics recorded)");
    }
}
