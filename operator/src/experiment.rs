//! Experiment orchestration
//!
//! Sequences benchmark cases with varying payload sizes: each case gets a
//! fresh tracker, a timed send loop, a bounded wait for the stragglers, then a
//! statistics pass and its reports.

use crate::report;
use crate::stats::{self, CaseResult, Thresholds};
use crate::tracker::{AckRouter, CommandKind, CommandSink, CommandSpec, CommandTracker, PendingRecord};
use anyhow::Result;
use crosslight_shared::Mode;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// One parameterized benchmark run
#[derive(Debug, Clone)]
pub struct ExperimentCase {
    pub name: String,
    pub description: String,
    pub kind: CommandKind,
    pub pad_bytes: usize,
    pub count: usize,
    pub interval: Duration,
    /// Oversize cases pass only when no acknowledgment arrives
    pub expect_rejection: bool,
}

/// The built-in payload-size ladder
pub fn default_suite() -> Vec<ExperimentCase> {
    let base = |name: &str, description: &str, pad_bytes: usize| ExperimentCase {
        name: name.into(),
        description: description.into(),
        kind: CommandKind::SetMode(Mode::Auto),
        pad_bytes,
        count: 500,
        interval: Duration::from_millis(200),
        expect_rejection: false,
    };

    vec![
        base("case1", "Baseline (no padding)", 0),
        base("case2", "Medium payload (256B padding)", 256),
        base("case3", "Large payload (1024B padding)", 1024),
        ExperimentCase {
            name: "case4".into(),
            description: "Oversize payload (16KB, dropped at the edge)".into(),
            kind: CommandKind::SetMode(Mode::Auto),
            pad_bytes: 16 * 1024,
            count: 20,
            interval: Duration::from_millis(200),
            expect_rejection: true,
        },
    ]
}

/// Everything one case produced
pub struct CaseOutput {
    pub result: CaseResult,
    pub records: Vec<PendingRecord>,
}

/// Run a single case to completion.
///
/// A transport failure aborts the case with an error; lost acknowledgments do
/// not. An externally requested stop exits before the next scheduled send.
pub async fn run_case(
    case: &ExperimentCase,
    sink: Arc<dyn CommandSink>,
    router: &AckRouter,
    stop: &mut watch::Receiver<bool>,
    deadline: Duration,
    thresholds: &Thresholds,
) -> Result<CaseOutput> {
    let tracker = Arc::new(CommandTracker::new(sink));
    router.install(tracker.clone()).await;

    let spec = CommandSpec {
        kind: case.kind.clone(),
        pad_bytes: case.pad_bytes,
        note: case.name.clone(),
    };

    for i in 0..case.count {
        if *stop.borrow() {
            warn!("Stop requested, ending {} after {} sends", case.name, i);
            break;
        }
        tracker.send(&spec).await?;

        if i + 1 < case.count {
            tokio::select! {
                _ = tokio::time::sleep(case.interval) => {}
                _ = stop.changed() => {}
            }
        }
    }

    let (sent, received) = tracker.wait_for_completion(deadline).await;
    router.clear().await;
    info!("{}: sent={} received={}", case.name, sent, received);

    let records = tracker.export().await;
    let result = stats::summarize(
        &case.name,
        &case.description,
        case.expect_rejection,
        sent,
        received,
        &records,
        thresholds,
    );

    Ok(CaseOutput { result, records })
}

/// Run every case in sequence and write per-case plus summary reports
pub async fn run_suite(
    cases: &[ExperimentCase],
    sink: Arc<dyn CommandSink>,
    router: &AckRouter,
    stop: &mut watch::Receiver<bool>,
    deadline: Duration,
    thresholds: &Thresholds,
    output_dir: &Path,
) -> Result<Vec<CaseResult>> {
    std::fs::create_dir_all(output_dir)?;
    let mut results = Vec::new();

    for (i, case) in cases.iter().enumerate() {
        if *stop.borrow() {
            warn!("Stop requested, skipping remaining cases");
            break;
        }

        info!("Running {}: {}", case.name, case.description);
        let output = run_case(case, sink.clone(), router, stop, deadline, thresholds).await?;

        let case_file = output_dir.join(format!("results_{}.csv", case.name));
        report::write_records_csv(&case_file, &output.records)?;
        results.push(output.result);

        // Let in-flight traffic drain before the next case starts
        if i + 1 < cases.len() {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    report::write_summary_csv(&output_dir.join("summary.csv"), &results)?;
    report::write_summary_md(&output_dir.join("summary.md"), &results, thresholds)?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use crosslight_shared::{codec, now_ms, Ack};

    /// Sink that acknowledges every command straight back through the router
    struct EchoSink {
        router: Arc<AckRouter>,
    }

    #[async_trait]
    impl CommandSink for EchoSink {
        async fn publish(&self, payload: Bytes) -> Result<()> {
            let cmd = codec::decode_command(&payload)?;
            if let Some(cmd_id) = cmd.cmd_id {
                let ack = Ack::success(cmd_id, now_ms());
                self.router.route(&ack, now_ms()).await;
            }
            Ok(())
        }
    }

    /// Sink that swallows everything, like a broker with no controller behind it
    struct SilentSink;

    #[async_trait]
    impl CommandSink for SilentSink {
        async fn publish(&self, _payload: Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn quick_case(name: &str, count: usize, expect_rejection: bool) -> ExperimentCase {
        ExperimentCase {
            name: name.into(),
            description: "test case".into(),
            kind: CommandKind::SetMode(Mode::Auto),
            pad_bytes: 0,
            count,
            interval: Duration::from_millis(1),
            expect_rejection,
        }
    }

    #[tokio::test]
    async fn test_case_with_full_acks_passes() {
        let router = Arc::new(AckRouter::new());
        let sink = Arc::new(EchoSink {
            router: router.clone(),
        });
        let (_stop_tx, mut stop) = watch::channel(false);

        let output = run_case(
            &quick_case("echo", 5, false),
            sink,
            &router,
            &mut stop,
            Duration::from_millis(500),
            &Thresholds::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.result.sent, 5);
        assert_eq!(output.result.received, 5);
        assert!(output.result.passed);
        assert_eq!(output.records.len(), 5);
    }

    #[tokio::test]
    async fn test_expected_rejection_passes_when_silent() {
        let router = Arc::new(AckRouter::new());
        let (_stop_tx, mut stop) = watch::channel(false);

        let output = run_case(
            &quick_case("oversize", 3, true),
            Arc::new(SilentSink),
            &router,
            &mut stop,
            Duration::from_millis(100),
            &Thresholds::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.result.received, 0);
        assert!(output.result.passed);
        assert_eq!(output.result.loss_rate, 100.0);
    }

    #[tokio::test]
    async fn test_stop_exits_before_next_send() {
        let router = Arc::new(AckRouter::new());
        let (stop_tx, mut stop) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let output = run_case(
            &quick_case("stopped", 100, false),
            Arc::new(SilentSink),
            &router,
            &mut stop,
            Duration::from_millis(10),
            &Thresholds::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.result.sent, 0);
    }

    #[test]
    fn test_default_suite_shape() {
        let suite = default_suite();
        assert_eq!(suite.len(), 4);
        assert!(suite[..3].iter().all(|c| !c.expect_rejection));
        assert!(suite[3].expect_rejection);
        assert!(suite[3].pad_bytes > suite[2].pad_bytes);
    }
}
