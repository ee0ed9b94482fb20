//! Offline run of the whole pipeline: scripted feed polls → persistent
//! `MemoryStore` → change-stream consumer → recorded 3D layer.
//!
//! Run with: cargo run --example offline_pipeline

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;
use tempfile::tempdir;

use flightsync_core::{
    ChangeStreamConsumer, FeedSnapshot, FlightsyncError, LayerSynchronizer, MemoryStore,
    RecordingScene, Result, RetryPolicy, SceneCall, SceneDefinition, ScriptedFeed, SyncConfig,
    SyncEngine,
};

fn poll(time: i64, states: &[(&str, &str, Option<(f64, f64)>, f32)]) -> Result<FeedSnapshot> {
    let rows: Vec<String> = states
        .iter()
        .map(|(icao, callsign, position, heading)| {
            let (lon, lat) = position
                .map(|(lon, lat)| (lon.to_string(), lat.to_string()))
                .unwrap_or_else(|| ("null".into(), "null".into()));
            format!(
                r#"["{icao}", "{callsign:<8}", "Canada", {time}, {time}, {lon}, {lat}, 3000.0, false, 220.0, {heading}, 0.0, null, 3040.0, null, false, 0]"#
            )
        })
        .collect();
    let payload = format!(r#"{{"time": {time}, "states": [{}]}}"#, rows.join(","));
    FeedSnapshot::from_json_slice(payload.as_bytes())
}

fn main() -> Result<()> {
    let dir = tempdir()?;
    let store_path = dir.path().join("aircraft.json");

    println!("=== flightsync offline pipeline ===\n");

    // ========================================
    // 1. Two recorded polls, then an upstream failure
    // ========================================
    let feed = ScriptedFeed::new()
        .then_snapshot(poll(
            1_700_000_000,
            &[
                ("c07b1a", "WJA451", Some((-114.02, 51.13)), 271.0),
                ("c05a11", "ACA101", Some((-123.18, 49.19)), 45.0),
                ("c0ffee", "", None, 0.0),
            ],
        )?)
        .then_snapshot(poll(
            1_700_000_010,
            &[
                ("c07b1a", "WJA451", Some((-113.90, 51.20)), 270.0),
                ("c0ffee", "JZA8042", Some((-122.50, 49.30)), 90.0),
            ],
        )?)
        .then_failure("upstream rate limit");

    let config = SyncConfig::builder()
        .poll_interval(Duration::from_millis(200))
        .build()?;
    let store = Arc::new(MemoryStore::open(&store_path)?);
    println!("1. Store persisted at {}", store_path.display());

    // ========================================
    // 2. Consumer thread mirrors the store into a layer
    // ========================================
    let scene = RecordingScene::with_scene(SceneDefinition::default());
    let mut sync = LayerSynchronizer::new(scene.clone());
    let consumer = ChangeStreamConsumer::new(RetryPolicy::default());
    let (consumer_stop_tx, consumer_stop_rx) = unbounded();
    let (producer_stop_tx, producer_stop_rx) = unbounded();

    let mut engine = SyncEngine::new(feed, Arc::clone(&store), config)?;

    let stats = thread::scope(|scope| {
        let consumer_handle =
            scope.spawn(|| consumer.run(store.as_ref(), &mut sync, &consumer_stop_rx));

        // ========================================
        // 3. Producer: four cycles, the third one fails to fetch
        // ========================================
        println!("2. Running producer cycles...");
        let mut seen = 0;
        let produced = engine.run(&producer_stop_rx, |report| {
            seen += 1;
            println!(
                "   cycle {}: +{} ~{} -{} (suppressed {}, malformed {}, chunks {})",
                report.cycle,
                report.to_add,
                report.to_update,
                report.to_remove,
                report.suppressed_adds,
                report.malformed_records,
                report.commit.chunks.len()
            );
            if seen == 3 {
                let _ = producer_stop_tx.send(());
            }
        });

        thread::sleep(Duration::from_millis(100));
        let _ = consumer_stop_tx.send(());
        let consumed = match consumer_handle.join() {
            Ok(result) => result,
            Err(_) => Err(FlightsyncError::Scene {
                reason: "consumer thread panicked".into(),
            }),
        };
        produced?;
        consumed
    })?;

    // ========================================
    // 4. What the scene saw
    // ========================================
    println!(
        "\n3. Consumer applied {} bursts ({} notifications)",
        stats.bursts, stats.notifications
    );
    for call in scene.calls() {
        match call {
            SceneCall::CreateLayer { layer, features } => {
                println!("   create {layer} with {features} features");
            }
            SceneCall::AttachLayer { layer } => println!("   attach {layer}"),
            SceneCall::ApplyEdits { layer, edits } => println!(
                "   edit {layer}: {} adds, {} updates, {} deletes",
                edits.adds.len(),
                edits.updates.len(),
                edits.deletes.len()
            ),
        }
    }
    if let Some(layer) = scene.attached_layers().first() {
        for feature in scene.features(*layer) {
            println!(
                "   {} {:?} at ({:?}, {:?}) rotation {:?}",
                feature.key(),
                feature.attributes.flight_number,
                feature.geometry.x,
                feature.geometry.y,
                feature.attributes.heading
            );
        }
    }
    println!("\n=== done: {} documents persisted ===", store.len());
    Ok(())
}
