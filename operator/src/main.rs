mod experiment;
mod link;
mod report;
mod stats;
mod tracker;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use crosslight_shared::{timing, topics::TopicSet, Mode};
use experiment::ExperimentCase;
use link::{OperatorConfig, OperatorLink};
use stats::{CaseResult, Thresholds};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracker::{AckRouter, CommandKind};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "operator", about = "RTT benchmark operator for Crosslight controllers")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct ConnArgs {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// MQTT username
    #[arg(long, default_value = "demo")]
    user: String,

    /// MQTT password
    #[arg(long, default_value = "demo_pass")]
    password: String,

    /// City identifier for the topic namespace
    #[arg(long, default_value = "demo")]
    city: String,

    /// Intersection identifier for the topic namespace
    #[arg(long, default_value = "001")]
    intersection: String,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a single benchmark case
    Bench(BenchArgs),
    /// Run the built-in experiment suite
    Suite(SuiteArgs),
}

#[derive(Args)]
struct BenchArgs {
    /// Number of commands to send
    #[arg(long, default_value_t = 100)]
    count: usize,

    /// Interval between commands in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Send SET_MODE with this mode (AUTO, MANUAL, BLINK, OFF)
    #[arg(long, conflicts_with = "phase")]
    mode: Option<String>,

    /// Send SET_PHASE with this phase (0-5)
    #[arg(long)]
    phase: Option<u8>,

    /// Padding bytes added to every command payload
    #[arg(long, default_value_t = 0)]
    pad_bytes: usize,

    /// Deadline for outstanding acknowledgments after the last send
    #[arg(long, default_value_t = timing::DEFAULT_WAIT_DEADLINE_MS)]
    deadline_ms: u64,

    /// Mean RTT threshold in milliseconds
    #[arg(long, default_value_t = 200.0)]
    threshold_mean_ms: f64,

    /// P95 RTT threshold in milliseconds
    #[arg(long, default_value_t = 500.0)]
    threshold_p95_ms: f64,

    /// Pass only if no acknowledgment arrives (oversize-payload cases)
    #[arg(long)]
    expect_rejection: bool,

    /// Output CSV file
    #[arg(long, default_value = "results.csv")]
    out: PathBuf,
}

#[derive(Args)]
struct SuiteArgs {
    /// Directory for per-case and summary reports
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Deadline for outstanding acknowledgments after each case
    #[arg(long, default_value_t = timing::DEFAULT_WAIT_DEADLINE_MS)]
    deadline_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let topics = TopicSet::new(&cli.conn.city, &cli.conn.intersection);

    let config = OperatorConfig {
        broker_host: cli.conn.host.clone(),
        broker_port: cli.conn.port,
        username: cli.conn.user.clone(),
        password: cli.conn.password.clone(),
        client_id: format!("operator-{}", &Uuid::new_v4().simple().to_string()[..8]),
        ..Default::default()
    };

    let router = Arc::new(AckRouter::new());
    let link = Arc::new(OperatorLink::connect(config, &topics, router.clone()).await?);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    match cli.command {
        Cmd::Bench(args) => {
            let case = bench_case(&args)?;
            let thresholds = Thresholds {
                mean_ms: args.threshold_mean_ms,
                p95_ms: args.threshold_p95_ms,
            };
            info!(
                "Running {}: count={} interval={}ms pad={}B",
                case.name, case.count, args.interval_ms, case.pad_bytes
            );

            let output = experiment::run_case(
                &case,
                link.clone(),
                &router,
                &mut stop_rx,
                Duration::from_millis(args.deadline_ms),
                &thresholds,
            )
            .await?;

            report::write_records_csv(&args.out, &output.records)?;
            print_result(&output.result);
        }
        Cmd::Suite(args) => {
            let cases = experiment::default_suite();
            let results = experiment::run_suite(
                &cases,
                link.clone(),
                &router,
                &mut stop_rx,
                Duration::from_millis(args.deadline_ms),
                &Thresholds::default(),
                &args.output_dir,
            )
            .await?;

            for result in &results {
                print_result(result);
            }
            info!("Reports written to {}", args.output_dir.display());
        }
    }

    link.disconnect().await?;
    Ok(())
}

/// Translate bench flags into an experiment case, defaulting to SET_MODE AUTO
fn bench_case(args: &BenchArgs) -> Result<ExperimentCase> {
    let kind = match (&args.mode, args.phase) {
        (Some(mode), None) => match Mode::parse(mode) {
            Some(m) => CommandKind::SetMode(m),
            None => bail!("Invalid mode: {mode} (expected AUTO, MANUAL, BLINK or OFF)"),
        },
        (None, Some(phase)) => {
            if phase > 5 {
                bail!("Invalid phase: {phase} (expected 0-5)");
            }
            CommandKind::SetPhase(phase)
        }
        (None, None) => CommandKind::SetMode(Mode::Auto),
        (Some(_), Some(_)) => bail!("--mode and --phase are mutually exclusive"),
    };

    Ok(ExperimentCase {
        name: "bench".into(),
        description: "Single benchmark case".into(),
        kind,
        pad_bytes: args.pad_bytes,
        count: args.count,
        interval: Duration::from_millis(args.interval_ms),
        expect_rejection: args.expect_rejection,
    })
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "N/A".into(), |v| format!("{v:.2}"))
}

/// Human-readable per-case summary on stdout
fn print_result(result: &CaseResult) {
    println!();
    println!("=== {} ({}) ===", result.case_name, result.description);
    println!(
        "  sent={} received={} lost={} loss_rate={:.2}%",
        result.sent, result.received, result.lost, result.loss_rate
    );
    println!(
        "  rtt ms: min={} mean={} median={} p95={} p99={} max={} std={}",
        fmt_ms(result.min_ms),
        fmt_ms(result.mean_ms),
        fmt_ms(result.median_ms),
        fmt_ms(result.p95_ms),
        fmt_ms(result.p99_ms),
        fmt_ms(result.max_ms),
        fmt_ms(result.std_ms),
    );
    println!(
        "  outliers={} mean_payload={:.0}B",
        result.outliers, result.mean_payload_bytes
    );
    if result.passed {
        println!("  verdict: PASS");
    } else {
        println!("  verdict: FAIL ({})", result.reason);
    }
}
