//! Report rendering
//!
//! Per-case record CSVs, a suite summary CSV, and a Markdown summary with the
//! threshold-validation table. Unresolved fields stay blank.

use crate::stats::{CaseResult, Thresholds};
use crate::tracker::PendingRecord;
use anyhow::Result;
use std::path::Path;
use tracing::info;

/// Write one row per command, blanks for fields that never resolved
pub fn write_records_csv(path: &Path, records: &[PendingRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Saved {} records to {}", records.len(), path.display());
    Ok(())
}

/// Write the per-case aggregate table
pub fn write_summary_csv(path: &Path, results: &[CaseResult]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    Ok(())
}

fn fmt_metric(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}"),
        None => "N/A".into(),
    }
}

fn fmt_reason(reason: &str) -> &str {
    if reason.is_empty() {
        "-"
    } else {
        reason
    }
}

/// Render the Markdown summary: results table plus threshold validation
pub fn write_summary_md(path: &Path, results: &[CaseResult], thresholds: &Thresholds) -> Result<()> {
    let mut out = String::new();
    out.push_str("# Experiment Results Summary\n\n");

    out.push_str("## Results\n\n");
    out.push_str(
        "| Case | Sent | Recv | Lost | Loss% | Min | Mean | Median | P95 | P99 | Max | Outliers | Status | Reason |\n",
    );
    out.push_str(
        "|------|------|------|------|-------|-----|------|--------|-----|-----|-----|----------|--------|--------|\n",
    );
    for r in results {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {:.2}% | {} | {} | {} | {} | {} | {} | {} | {} | {} |\n",
            r.case_name,
            r.sent,
            r.received,
            r.lost,
            r.loss_rate,
            fmt_metric(r.min_ms),
            fmt_metric(r.mean_ms),
            fmt_metric(r.median_ms),
            fmt_metric(r.p95_ms),
            fmt_metric(r.p99_ms),
            fmt_metric(r.max_ms),
            r.outliers,
            if r.passed { "PASS" } else { "FAIL" },
            fmt_reason(&r.reason),
        ));
    }

    out.push_str("\n## Threshold Validation\n\n");
    out.push_str(&format!(
        "| Case | Mean < {:.0}ms | P95 < {:.0}ms | Loss < 1% | Overall |\n",
        thresholds.mean_ms, thresholds.p95_ms
    ));
    out.push_str("|------|------|------|------|---------|\n");
    for r in results {
        let mean_ok = r.mean_ms.is_some_and(|v| v < thresholds.mean_ms);
        let p95_ok = r.p95_ms.is_some_and(|v| v < thresholds.p95_ms);
        let loss_ok = r.loss_rate < 1.0;
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            r.case_name,
            if mean_ok { "yes" } else { "no" },
            if p95_ok { "yes" } else { "no" },
            if loss_ok { "yes" } else { "no" },
            if r.passed { "PASS" } else { "FAIL" },
        ));
    }

    std::fs::write(path, out)?;
    info!("Summary written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::summarize;

    fn sample_records() -> Vec<PendingRecord> {
        vec![
            PendingRecord {
                cmd_id: "a".into(),
                t_send_ms: 100,
                t_ack_recv_ms: Some(120),
                rtt_ms: Some(20),
                mode: Some("AUTO".into()),
                phase: None,
                payload_size: 0,
                actual_payload_bytes: 90,
                note: "case1".into(),
            },
            PendingRecord {
                cmd_id: "b".into(),
                t_send_ms: 200,
                t_ack_recv_ms: None,
                rtt_ms: None,
                mode: None,
                phase: Some(3),
                payload_size: 0,
                actual_payload_bytes: 90,
                note: "case1".into(),
            },
        ]
    }

    #[test]
    fn test_records_csv_has_blanks_for_unresolved() {
        let path = std::env::temp_dir().join("crosslight_test_records.csv");
        write_records_csv(&path, &sample_records()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "cmd_id,t_send_ms,t_ack_recv_ms,rtt_ms,mode,phase,payload_size,actual_payload_bytes,note"
        );
        assert_eq!(lines.next().unwrap(), "a,100,120,20,AUTO,,0,90,case1");
        assert_eq!(lines.next().unwrap(), "b,200,,,,3,0,90,case1");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_summary_md_renders_both_tables() {
        let records = sample_records();
        let result = summarize(
            "case1",
            "baseline",
            false,
            2,
            1,
            &records,
            &Thresholds::default(),
        );

        let path = std::env::temp_dir().join("crosslight_test_summary.md");
        write_summary_md(&path, &[result], &Thresholds::default()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("## Results"));
        assert!(text.contains("## Threshold Validation"));
        assert!(text.contains("| case1 |"));
        assert!(text.contains("FAIL")); // 50% loss
        std::fs::remove_file(&path).ok();
    }
}
