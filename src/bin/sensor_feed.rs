//! Synthetic sensor feed
//!
//! Writes JSON-lines `SensorReading`s for exercising the monitoring loop:
//! a noisy baseline, an optional one-reading spike, and a sustained step
//! change from `--drop-at` onwards.
//!
//! # Usage
//! ```bash
//! sensor-feed --samples 40 --drop-at 20 --seed 42 | nexus monitor --stdin
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};
use std::time::Duration;

use nexus::types::SensorReading;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "sensor-feed")]
#[command(about = "Synthetic field sensor readings for NEXUS testing")]
#[command(version)]
struct Args {
    /// Number of readings to emit
    #[arg(short = 'n', long, default_value = "40")]
    samples: u32,

    /// Sensor identifier
    #[arg(long, default_value = "CPT-01")]
    sensor: String,

    /// Metric name; must match a baseline of the monitored design
    #[arg(long, default_value = "bearing_capacity")]
    metric: String,

    #[arg(long, default_value = "kPa")]
    unit: String,

    /// Design value the readings start around
    #[arg(long, default_value = "150.0")]
    baseline: f64,

    /// Standard deviation of the measurement noise
    #[arg(long, default_value = "1.5")]
    noise: f64,

    /// Index of the first reading after the step change
    #[arg(long)]
    drop_at: Option<u32>,

    /// Size of the step change in percent of the baseline (negative raises)
    #[arg(long, default_value = "21.0", allow_hyphen_values = true)]
    drop_percent: f64,

    /// Index of a single transient spike
    #[arg(long)]
    spike_at: Option<u32>,

    /// Reading-time spacing in seconds
    #[arg(long, default_value = "60")]
    interval_secs: i64,

    /// Real delay between readings in milliseconds (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress the log on stderr
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================================
// Feed Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Baseline,
    Spike,
    Shifted,
}

impl Phase {
    fn at(index: u32, args: &Args) -> Self {
        match (args.drop_at, args.spike_at) {
            (Some(d), _) if index >= d => Phase::Shifted,
            (_, Some(s)) if index == s => Phase::Spike,
            _ => Phase::Baseline,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Phase::Baseline => "Baseline (design conditions)",
            Phase::Spike => "Transient spike (single reading)",
            Phase::Shifted => "Sustained shift (field conditions changed)",
        }
    }

    /// Multiplier applied to the baseline before noise.
    fn level(self, drop_percent: f64) -> f64 {
        match self {
            Phase::Baseline => 1.0,
            Phase::Spike | Phase::Shifted => 1.0 - drop_percent / 100.0,
        }
    }
}

fn log(index: u32, message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[{index:>5}] {message}");
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut rng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let noise = Normal::new(0.0, args.noise)?;

    log(0, &format!("SENSOR FEED: {} {} around {:.1} {}", args.sensor, args.metric, args.baseline, args.unit), args.quiet);
    if let Some(d) = args.drop_at {
        log(0, &format!("  step of {:+.1}% from reading {d}", -args.drop_percent), args.quiet);
    }
    if let Some(s) = args.spike_at {
        log(0, &format!("  transient spike at reading {s}"), args.quiet);
    }

    let start = Utc::now();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut phase = None;
    let mut shifted = 0u32;

    for index in 0..args.samples {
        let current = Phase::at(index, &args);
        if phase != Some(current) {
            log(index, &format!(">>> PHASE: {}", current.name()), args.quiet);
            phase = Some(current);
        }
        if current == Phase::Shifted {
            shifted += 1;
        }

        let value = args.baseline * current.level(args.drop_percent) + noise.sample(&mut rng);
        let reading = SensorReading::new(
            args.sensor.clone(),
            args.metric.clone(),
            value,
            args.unit.clone(),
            start + ChronoDuration::seconds(i64::from(index) * args.interval_secs),
        );
        writeln!(out, "{}", serde_json::to_string(&reading)?)?;
        out.flush()?;

        if args.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.delay_ms));
        }
    }

    log(args.samples, &format!("COMPLETE: {} readings, {} after the shift", args.samples, shifted), args.quiet);
    Ok(())
}
