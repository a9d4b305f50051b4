// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Ingestion Bridge CLI
//!
//! Runs configured ingestion items against an in-process bus fed from
//! standard input, one `<topic> <body>` message per line.
//!
//! # Usage
//!
//! ```bash
//! # Generate an example configuration
//! hdds-ingest gen-config --output ingest.yaml
//!
//! # Check a configuration
//! hdds-ingest validate --config ingest.yaml
//!
//! # Show the subscriptions a topic pattern expands to
//! hdds-ingest expand --topic "pv/plant1+plant2/power"
//!
//! # Run
//! mosquitto_sub -v -t '#' | hdds-ingest --config ingest.yaml
//! ```

use clap::{Parser, Subcommand};
use hdds_ingest::{
    topic, Bridge, BridgeConfig, BridgeHandle, InMemoryBus, ItemSpec, ItemStatsSnapshot, Sinks,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// HDDS Ingestion Bridge
#[derive(Parser, Debug)]
#[command(name = "hdds-ingest")]
#[command(about = "HDDS Ingestion Bridge - bus topics to SQL rows and time-series points")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Statistics reporting interval (seconds, 0 to disable; overrides config)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "ingest.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Print the bus subscriptions a topic pattern expands to
    Expand {
        /// Topic pattern
        #[arg(short, long)]
        topic: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; stdout may carry line protocol.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::Expand { topic } => cmd_expand(&topic),
        };
    }

    let config_path = args
        .config
        .ok_or("Missing --config (use `gen-config` to create one)")?;
    let config = BridgeConfig::from_file(&config_path)?;
    let stats_interval = args.stats_interval.unwrap_or(config.stats_interval_secs);

    let sinks = Sinks::open(&config)?;
    let bridge = Bridge::new(config)?;

    eprintln!("HDDS Ingestion Bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("=====================================");
    eprintln!();
    for spec in bridge.items() {
        eprintln!("Item: {}", describe(spec));
    }
    eprintln!();
    eprintln!("Reading \"<topic> <body>\" lines from stdin, Ctrl+C to stop...");
    eprintln!();

    let bus = Arc::new(InMemoryBus::new());
    let handle = bridge.run(bus.clone(), sinks).await?;

    if stats_interval > 0 {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                print_stats(&stats_handle.stats());
            }
        });
    }

    let reader = tokio::spawn(feed_stdin(bus));

    let interrupted = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            eprintln!("\nShutting down...");
            true
        }
        _ = reader => {
            eprintln!("\nInput closed, shutting down...");
            false
        }
    };

    shutdown(&handle).await;

    // A blocked stdin read would keep the runtime alive.
    if interrupted {
        std::process::exit(0);
    }
    Ok(())
}

/// Publish every `<topic> <body>` line from stdin.
async fn feed_stdin(bus: Arc<InMemoryBus>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim_end();
                if line.is_empty() {
                    continue;
                }
                let (topic, body) = line.split_once(' ').unwrap_or((line, ""));
                match bus.publish(topic, body) {
                    Ok(0) => tracing::debug!("No item subscribed to {}", topic),
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Publish to {} failed: {}", topic, e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("stdin read failed: {}", e);
                break;
            }
        }
    }
}

async fn shutdown(handle: &BridgeHandle) {
    handle.shutdown().await;
    eprintln!("\nFinal Statistics:");
    print_stats(&handle.stats());
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = serde_yaml::to_string(&BridgeConfig::example())?;

    let content = format!(
        r#"# HDDS Ingestion Bridge Configuration
# Generated by hdds-ingest gen-config

{}"#,
        yaml
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match BridgeConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Bridge: {}", config.name);
            println!("Items: {}", config.items.len());
            for (i, item) in config.items.iter().enumerate() {
                let spec = ItemSpec::from_config(item)?;
                println!("  [{}] {}", i, describe(&spec));
                for pattern in spec.patterns() {
                    println!("        subscribe {}", pattern);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_expand(pattern: &str) -> Result<(), Box<dyn std::error::Error>> {
    for expanded in topic::expand(pattern) {
        println!("{}", expanded);
    }
    Ok(())
}

fn describe(spec: &ItemSpec) -> String {
    let target = match spec.target() {
        hdds_ingest::SinkTarget::Table(t) => format!("table {}", t),
        hdds_ingest::SinkTarget::Measurement(m) => format!("measurement {}", m),
    };
    let fields: Vec<&str> = spec.fields().iter().map(|f| f.name.as_str()).collect();
    let mut line = format!(
        "{} -> {} ({}), {} row(s)/msg",
        spec.topic(),
        target,
        fields.join(", "),
        spec.rows_per_message()
    );
    if let Some(interval) = spec.throttle() {
        line.push_str(&format!(", throttle {}ms", interval.as_millis()));
    }
    line
}

fn print_stats(stats: &[ItemStatsSnapshot]) {
    eprintln!("--- Item Statistics ---");
    for stat in stats {
        eprintln!(
            "  {}: {} msgs ({:.1} msg/s), {} throttled, {} bad payloads, {} rows, {} written, {} write errors",
            stat.item,
            stat.messages_received,
            stat.messages_per_second(),
            stat.messages_throttled,
            stat.extraction_errors,
            stat.rows_extracted,
            stat.rows_written,
            stat.write_errors
        );
    }
}
