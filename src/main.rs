//! NEXUS - closed-loop structural design recalibration
//!
//! # Usage
//!
//! ```bash
//! # Risk profile of the built-in demo design
//! nexus simulate
//!
//! # Risk profile of a design file, 20 000 trials, JSON output
//! nexus simulate --design footing.toml --trials 20000 --json
//!
//! # Close the loop over a reading stream
//! sensor-feed --drop-at 20 | nexus monitor --stdin
//! nexus monitor --design footing.toml --input readings.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `NEXUS_CONFIG`: path to the TOML configuration (same as `--config`)
//! - `NEXUS_ADVISOR_API_KEY`: bearer token for the HTTP advisor (name configurable)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nexus::advisory;
use nexus::config::{self, NexusConfig};
use nexus::pipeline::{JsonLinesSource, MonitoringLoop, ReadingSource, ReplaySource};
use nexus::types::{BuiltinFormula, ParameterRole, ParameterSpec, SensorReading, VariantDraft};
use nexus::{BaselineStore, DesignVariant, RecalibrationController, SimulationEngine};

#[derive(Parser, Debug)]
#[command(name = "nexus")]
#[command(about = "Closed-loop structural design recalibration")]
#[command(version)]
struct CliArgs {
    /// Configuration file; when unset, ./nexus.toml or built-in defaults
    #[arg(long, global = true, value_name = "PATH", env = "NEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the Monte Carlo engine on a design and print its risk profile
    Simulate {
        /// Design file (TOML or JSON); the demo design when omitted
        #[arg(long)]
        design: Option<PathBuf>,
        /// Trial count (default from configuration)
        #[arg(long)]
        trials: Option<usize>,
        /// Failure threshold on the safety factor (default from configuration)
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        seed: Option<u64>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Detect deviations in a reading stream and recalibrate the design
    Monitor {
        #[arg(long)]
        design: Option<PathBuf>,
        /// JSON-lines reading file
        #[arg(long, conflicts_with = "stdin")]
        input: Option<PathBuf>,
        /// Read JSON-lines readings from stdin
        #[arg(long)]
        stdin: bool,
        /// Delay between replayed demo readings
        #[arg(long, default_value_t = config::defaults::REPLAY_DELAY_MS)]
        delay_ms: u64,
        /// Print every case as JSON when done
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print it with defaults filled in
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let nexus_config = match &args.config {
        Some(path) => NexusConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => NexusConfig::load(),
    };
    info!(
        project = %nexus_config.project.name,
        trials = nexus_config.simulation.trials,
        advisor = ?nexus_config.advisory.provider,
        "Configuration loaded"
    );
    config::init(nexus_config);
    let cfg = config::current();

    match args.command {
        Command::Simulate {
            design,
            trials,
            threshold,
            seed,
            json,
        } => {
            let variant = load_design(design.as_deref())?;
            let engine = SimulationEngine::new(cfg.simulation.clone())
                .context("Invalid simulation configuration")?;
            let trials = trials.unwrap_or(cfg.simulation.trials);
            let threshold = threshold.unwrap_or(cfg.simulation.failure_threshold);
            let seed = seed.unwrap_or(cfg.simulation.seed);

            let result = tokio::task::spawn_blocking(move || engine.simulate(&variant, trials, threshold, seed))
                .await
                .context("Simulation task failed")??;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.summary());
                println!(
                    "  SF p5/p95 = {:.3}/{:.3}  Pf CI{:.0}% = [{:.5}, {:.5}]  elapsed {} ms",
                    result.p5_safety_factor,
                    result.p95_safety_factor,
                    result.confidence_interval.level * 100.0,
                    result.confidence_interval.lower,
                    result.confidence_interval.upper,
                    result.elapsed_ms
                );
            }
        }
        Command::Monitor {
            design,
            input,
            stdin,
            delay_ms,
            json,
        } => {
            let variant = load_design(design.as_deref())?;
            let source: Box<dyn ReadingSource> = if stdin {
                info!("Input: stdin (JSON-lines readings)");
                Box::new(JsonLinesSource::from_stdin())
            } else if let Some(path) = input {
                info!(path = %path.display(), "Input: JSON-lines file");
                Box::new(JsonLinesSource::open(&path).await?)
            } else {
                info!("Input: demo readings");
                Box::new(ReplaySource::new(demo_readings(&variant), delay_ms))
            };
            run_monitor(&cfg, variant, source, json).await?;
        }
        Command::CheckConfig => {
            cfg.validate().context("Configuration is invalid")?;
            print!("{}", cfg.to_toml()?);
        }
    }

    Ok(())
}

async fn run_monitor(
    cfg: &NexusConfig,
    variant: DesignVariant,
    mut source: Box<dyn ReadingSource>,
    json: bool,
) -> Result<()> {
    let engine = SimulationEngine::new(cfg.simulation.clone()).context("Invalid simulation configuration")?;
    let advisor = advisory::from_config(&cfg.advisory).context("Cannot build advisor")?;
    let controller = RecalibrationController::spawn(engine, advisor, cfg.recalibration.clone());

    let baselines = Arc::new(BaselineStore::new(&variant));
    let variant_id = variant.id().to_string();
    controller.register(variant, Arc::clone(&baselines)).await?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down");
        shutdown_token.cancel();
    });

    let monitor = MonitoringLoop::new(
        cfg.detector.clone(),
        Arc::clone(&baselines),
        controller.clone(),
        cancel_token.clone(),
    );
    let stats = monitor.run(source.as_mut()).await;

    if !cancel_token.is_cancelled() {
        tokio::select! {
            () = cancel_token.cancelled() => warn!("Interrupted while cases were open"),
            result = controller.wait_idle() => result?,
        }
    }

    let cases = controller.list_cases().await?;
    let active = controller.active_variant(&variant_id).await?;
    controller.shutdown().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&cases)?);
    } else {
        println!(
            "{} readings, {} rejected, {} events, {} case(s)",
            stats.readings_read,
            stats.detector.rejected(),
            stats.events_forwarded,
            cases.len()
        );
        for case in &cases {
            let candidate = case.candidate().map_or("-", |c| c.id());
            println!("  {} [{}] candidate {}", case.id(), case.outcome(), candidate);
            if let (Some(before), Some(after)) = (case.before(), case.after()) {
                println!("    before: {}", before.summary());
                println!("    after:  {}", after.summary());
            }
            if let Some(brief) = case.escalation() {
                println!("    escalated: {} ({})", brief.reason, brief.detail);
                for step in &brief.instructions {
                    println!("      - {step}");
                }
            }
        }
        if let Some(active) = active {
            println!("Design in force: {} (baseline v{})", active.id(), baselines.version());
        }
    }
    Ok(())
}

fn load_design(path: Option<&Path>) -> Result<DesignVariant> {
    let Some(path) = path else {
        return demo_design();
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read design {}", path.display()))?;
    let draft: VariantDraft = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
    };
    let variant = draft
        .into_variant(None)
        .with_context(|| format!("Invalid design in {}", path.display()))?;
    info!(design = %variant.id(), parameters = variant.parameters().len(), "Design loaded");
    Ok(variant)
}

/// Shallow footing: bearing capacity against applied pressure.
fn demo_design() -> Result<DesignVariant> {
    DesignVariant::builder(
        "FOOTING-A",
        Arc::new(BuiltinFormula::CapacityDemand {
            capacity: "bearing_capacity".to_string(),
            demand: "applied_pressure".to_string(),
        }),
    )
    .parameter(ParameterSpec::normal("bearing_capacity", 150.0, 10.0, "kPa").with_role(ParameterRole::Resistance))
    .parameter(ParameterSpec::normal("applied_pressure", 100.0, 0.0, "kPa").with_role(ParameterRole::Load))
    .cost_estimate(250_000.0)
    .rationale("Pad footing sized for 150 kPa allowable bearing")
    .build()
    .context("Demo design is invalid")
}

/// A clean start, then bearing capacity settling about 21% low.
fn demo_readings(variant: &DesignVariant) -> Vec<SensorReading> {
    let metric = variant
        .parameters()
        .first()
        .map_or_else(|| "bearing_capacity".to_string(), |p| p.name.clone());
    let start = chrono::Utc::now();
    [150.4, 149.1, 151.0, 148.7, 150.2, 119.0, 118.2, 117.6, 118.9, 118.4, 117.9]
        .iter()
        .enumerate()
        .map(|(i, value)| {
            SensorReading::new(
                "CPT-01",
                metric.clone(),
                *value,
                "kPa",
                start + chrono::Duration::seconds(i as i64 * 60),
            )
        })
        .collect()
}
