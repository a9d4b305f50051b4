// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// End-to-end ingestion: YAML config -> in-memory bus -> SQLite rows and
// line protocol points.

use hdds_ingest::sink::timeseries::SharedBuffer;
use hdds_ingest::{Bridge, BridgeConfig, InMemoryBus, LineProtocolSink, SqliteSink, Sinks};
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
name: e2e
relational:
  path: ":memory:"
timeseries:
  output: "-"
items:
  - name: power
    topic: pv/plant1+plant2/power
    table: power
    topicValues: _/plant/_
    constValues:
      unit: W
    payloadValues:
      watts: value
      status: meta.status
    timestampValues: [ts]
    minValueTimeDiffMS: 60000
  - name: cells
    topic: battery/+/cells
    measurement: cell_voltage
    topicValues: _/battery
    constValues:
      cell: [1, 2, 3]
    payloadValues:
      voltage: ["cells[0]", "cells[1]", "cells[2]"]
    tagValues: [battery, cell]
"#;

fn power_rows(sqlite: &SqliteSink) -> Vec<(String, String, String, String, String)> {
    sqlite
        .with_connection(|c| {
            let mut stmt =
                c.prepare("SELECT unit, plant, watts, status, ts FROM power ORDER BY rowid")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .unwrap()
}

#[tokio::test]
async fn test_bridge_end_to_end() {
    let config = BridgeConfig::from_yaml(CONFIG).expect("valid config");
    let bridge = Bridge::new(config).expect("bridge");

    let sqlite = Arc::new(SqliteSink::new_in_memory().unwrap());
    sqlite
        .execute_batch(
            "CREATE TABLE power (unit TEXT, plant TEXT, watts TEXT, status TEXT, ts TEXT)",
        )
        .unwrap();
    let out = SharedBuffer::new();
    let lines = Arc::new(LineProtocolSink::with_writer(
        Box::new(out.clone()),
        1000,
        Duration::from_secs(60),
    ));

    let bus = Arc::new(InMemoryBus::new());
    let handle = bridge
        .run(
            bus.clone(),
            Sinks::default()
                .with_relational(sqlite.clone())
                .with_timeseries(lines),
        )
        .await
        .expect("run");

    assert_eq!(
        bus.patterns(),
        vec!["pv/plant1/power", "pv/plant2/power", "battery/+/cells"]
    );

    // plant1 twice within the throttle window, plant2 once.
    bus.publish("pv/plant1/power", r#"{"value": 510, "meta": {"status": "ok"}}"#)
        .unwrap();
    bus.publish("pv/plant1/power", r#"{"value": 999}"#).unwrap();
    bus.publish("pv/plant2/power", r#"{"value": 320}"#).unwrap();
    // Not subscribed.
    assert_eq!(bus.publish("pv/plant3/power", r#"{"value": 1}"#).unwrap(), 0);
    // Bad payload is dropped without affecting the item.
    bus.publish("battery/b1/cells", "not json").unwrap();
    bus.publish("battery/b1/cells", r#"{"cells": [3.31, 3.32, 3.3]}"#)
        .unwrap();

    handle.shutdown().await;

    let rows = power_rows(&sqlite);
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0].0, "W");
    assert_eq!(&rows[0].1, "plant1");
    assert_eq!(&rows[0].2, "510");
    assert_eq!(&rows[0].3, "ok");
    assert_eq!(&rows[1].1, "plant2");
    assert_eq!(&rows[1].2, "320");
    // Missing path keeps the literal placeholder.
    assert_eq!(&rows[1].3, "undefined");
    // SQLite datetime() output.
    assert_eq!(rows[0].4.len(), "2024-01-01 00:00:00".len());

    let points = out.lines();
    assert_eq!(points.len(), 3);
    assert!(points[0].starts_with("cell_voltage,battery=b1,cell=1 voltage=3.31 "));
    assert!(points[1].starts_with("cell_voltage,battery=b1,cell=2 voltage=3.32 "));
    assert!(points[2].starts_with("cell_voltage,battery=b1,cell=3 voltage=3.3 "));

    let stats = handle.stats();
    assert_eq!(stats.len(), 2);

    let power = &stats[0];
    assert_eq!(power.item, "power");
    assert_eq!(power.messages_received, 3);
    assert_eq!(power.messages_throttled, 1);
    assert_eq!(power.rows_written, 2);
    assert_eq!(power.write_errors, 0);

    let cells = &stats[1];
    assert_eq!(cells.messages_received, 2);
    assert_eq!(cells.extraction_errors, 1);
    assert_eq!(cells.rows_extracted, 3);
    assert_eq!(cells.rows_written, 3);
}

#[tokio::test]
async fn test_overlapping_patterns_deliver_twice() {
    let config = BridgeConfig::from_yaml(
        r#"
timeseries: {}
items:
  - topic: a/b+#
    measurement: m
    payloadValues:
      v: "@this"
"#,
    )
    .expect("valid config");
    let bridge = Bridge::new(config).unwrap();

    let out = SharedBuffer::new();
    let lines = Arc::new(LineProtocolSink::with_writer(
        Box::new(out.clone()),
        1000,
        Duration::from_secs(60),
    ));
    let bus = Arc::new(InMemoryBus::new());
    let handle = bridge
        .run(bus.clone(), Sinks::default().with_timeseries(lines))
        .await
        .unwrap();

    assert_eq!(bus.publish("a/b", "1").unwrap(), 2);
    handle.shutdown().await;

    assert_eq!(out.lines().len(), 2);
    assert_eq!(handle.stats()[0].messages_received, 2);
}

#[test]
fn test_invalid_config_names_the_rule() {
    let err = BridgeConfig::from_yaml(
        r#"
relational:
  path: ":memory:"
items:
  - topic: a/b
    table: t
    constValues:
      cell: [1, 2, 3]
    payloadValues:
      v: ["x", "y"]
"#,
    )
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("series 'v'"), "{}", message);
    assert!(message.contains("expected 3"), "{}", message);
}
