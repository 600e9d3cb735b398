// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tagcache usage example.
//!
//! Demonstrates:
//! 1. Engine setup over the in-memory backend
//! 2. Named queries: miss, hit, and per-argument caching
//! 3. Hierarchical and exact invalidation
//! 4. Stale-while-revalidate with a short TTL
//! 5. Stampede protection under concurrent queries
//! 6. Raw primitives (get/set/del)
//! 7. Metrics dump
//!
//! Everything runs in-process; no Docker or external services needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::{json, Value};

use tagcache::{
    CacheConfig, CacheEngine, InMemoryStorage, NamedQuery, QueryOptions, TagPath,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures all metrics for the final dump)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    // Simple logging (no filter for simplicity)
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║             tagcache: Basic Usage Example                     ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure the engine
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Configuring engine (in-memory backend)...");

    let storage = Arc::new(InMemoryStorage::new().with_verification_log());
    let engine = Arc::new(CacheEngine::new(
        storage.clone(),
        CacheConfig {
            default_ttl: "30s".parse()?,
            verify_percent: 1.0,
            ..Default::default()
        },
    )?);
    println!("   └─ prefix: {:?}, verification capable: {}", engine.config().prefix, engine.verification_capable());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Named queries: miss, then hit
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Running named queries...");

    // The returned value carries a load number, so reloads are visible
    // in the data itself.
    let loads = Arc::new(AtomicUsize::new(0));
    let get_user: NamedQuery<u32, Value> = NamedQuery::new(
        "getUser",
        |id: &u32| id.to_string(),
        |id: &u32| vec![TagPath::new(["users", &id.to_string()]).unwrap()],
        {
            let loads = loads.clone();
            move |id: u32| {
                let loads = loads.clone();
                async move {
                    let n = loads.fetch_add(1, Ordering::SeqCst) + 1;
                    // Stand-in for a database read
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(json!({"id": id, "name": format!("user-{id}"), "load": n}))
                }
            }
        },
    );

    let start = std::time::Instant::now();
    let alice = engine.run(&get_user, 1).await?;
    println!("   └─ miss: {} ({:?})", alice, start.elapsed());

    let start = std::time::Instant::now();
    let alice_again = engine.run(&get_user, 1).await?;
    println!("   └─ hit:  {} ({:?}, same snapshot)", alice_again, start.elapsed());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Invalidation: hierarchical vs exact
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🏷️  Invalidating users/1...");
    engine.invalidate(&[TagPath::new(["users", "1"])?]).await?;
    let reloaded = engine.run(&get_user, 1).await?;
    println!("   └─ reload after invalidation: {reloaded}");

    println!("   Exact invalidation of the prefix does not cascade:");
    engine.invalidate_exact(&[TagPath::new(["users"])?]).await?;
    let unchanged = engine.run(&get_user, 1).await?;
    println!("   └─ still the same snapshot: {unchanged}");

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Stale-while-revalidate
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⏳ Stale-while-revalidate (ttl=200ms, grace=10s)...");

    let versions = Arc::new(AtomicUsize::new(0));
    let feed_loader = {
        let versions = versions.clone();
        move || {
            let versions = versions.clone();
            async move {
                let v = versions.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({"feed_version": v}))
            }
        }
    };
    let options = QueryOptions::new().ttl("200ms".parse::<tagcache::DurationMs>()?).grace("10s".parse::<tagcache::DurationMs>()?);

    let v1: Value = engine.query_with("feed", vec![TagPath::new(["feed"])?], feed_loader.clone(), options).await?;
    println!("   └─ cached {v1}");

    tokio::time::sleep(Duration::from_millis(250)).await;
    let stale: Value = engine.query_with("feed", vec![TagPath::new(["feed"])?], feed_loader.clone(), options).await?;
    println!("   └─ past TTL, served immediately: {stale} (refresh runs behind)");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let refreshed: Value = engine.query_with("feed", vec![TagPath::new(["feed"])?], feed_loader.clone(), options).await?;
    println!("   └─ after background refresh: {refreshed}");

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Stampede protection
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🦬 Stampede: 3 concurrent queries, slow loader...");

    let herd_loads = Arc::new(AtomicUsize::new(0));
    let herd_loader = |loads: Arc<AtomicUsize>| {
        move || {
            let loads = loads.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                let n = loads.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({"count": n}))
            }
        }
    };

    let (a, b, c): (Result<Value, _>, Result<Value, _>, Result<Value, _>) = tokio::join!(
        engine.query("expensive", vec![TagPath::new(["expensive"])?], herd_loader(herd_loads.clone())),
        engine.query("expensive", vec![TagPath::new(["expensive"])?], herd_loader(herd_loads.clone())),
        engine.query("expensive", vec![TagPath::new(["expensive"])?], herd_loader(herd_loads.clone())),
    );
    println!("   └─ results: {} / {} / {}", a?, b?, c?);
    println!("   ⚡ loader ran {} time(s)", herd_loads.load(Ordering::SeqCst));

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Raw primitives
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔧 Raw primitives...");

    engine.set("config:app", &json!({"theme": "dark"}), vec![TagPath::new(["config"])?]).await?;
    let read: Option<Value> = engine.get("config:app").await?;
    println!("   └─ set + get: {:?}", read);

    engine.del("config:app").await?;
    let gone: Option<Value> = engine.get("config:app").await?;
    println!("   └─ after del: {:?}", gone);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Verification reports and metrics
    // ─────────────────────────────────────────────────────────────────────────
    // Give outstanding background verifications a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reports = storage.verification_reports();
    println!("\n🔍 Verification reports received: {}", reports.len());
    for report in reports.iter().take(3) {
        println!("   └─ {} stale={} cached={} fresh={}", report.key, report.is_stale, report.cached_hash, report.fresh_hash);
    }

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 8. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Clearing and disconnecting...");
    engine.clear().await?;
    engine.disconnect().await?;

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_kind, key) = composite_key.into_parts();
        let name = key.name();
        let labels: Vec<_> = key
            .labels()
            .map(|l| format!("{}={}", l.key(), l.value()))
            .collect();
        let label_str = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        };

        if let DebugValue::Counter(v) = value {
            counters.push((name.to_string(), label_str, v));
        }
    }

    counters.sort_by(|a, b| (a.0.clone(), a.1.clone()).cmp(&(b.0.clone(), b.1.clone())));

    if counters.is_empty() {
        println!("   └─ (no metrics recorded)");
    } else {
        for (name, labels, value) in &counters {
            println!("   └─ {}{} = {}", name, labels, value);
        }
    }
}
