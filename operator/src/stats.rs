//! Round-trip statistics
//!
//! Consumes the completed records of one experiment case and produces the
//! distribution summary and pass/fail verdict. Percentiles are nearest-rank:
//! index `floor(n * p)` into the ascending sort, clamped to the last element —
//! reproducible, no interpolation.

use crate::tracker::PendingRecord;
use serde::Serialize;

/// Caller-supplied latency limits for normal cases
#[derive(Debug, Clone)]
pub struct Thresholds {
    pub mean_ms: f64,
    pub p95_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            mean_ms: 200.0,
            p95_ms: 500.0,
        }
    }
}

/// Aggregate over one experiment case
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub case_name: String,
    pub description: String,
    pub sent: usize,
    pub received: usize,
    pub lost: usize,
    pub loss_rate: f64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub std_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p75_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub outliers: usize,
    /// Mean wire payload size over all sent commands
    pub mean_payload_bytes: f64,
    pub passed: bool,
    pub reason: String,
}

/// Nearest-rank percentile of an ascending sample
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() as f64 * p).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Standard even/odd median of an ascending sample
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0 for fewer than 2 samples
fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Outlier cutoff: samples strictly above this are counted as outliers
pub fn outlier_threshold(median: f64, std: f64, p95: f64) -> f64 {
    (p95 * 2.0).min(median + 3.0 * std)
}

/// Loss percentage; a case that sent nothing lost nothing
pub fn loss_rate(sent: usize, received: usize) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    (sent.saturating_sub(received)) as f64 / sent as f64 * 100.0
}

/// Summarize one case's completed records into a [`CaseResult`]
pub fn summarize(
    case_name: &str,
    description: &str,
    expect_rejection: bool,
    sent: usize,
    received: usize,
    records: &[PendingRecord],
    thresholds: &Thresholds,
) -> CaseResult {
    let mut rtts: Vec<f64> = records
        .iter()
        .filter_map(|r| r.rtt_ms.map(|v| v as f64))
        .collect();
    rtts.sort_by(f64::total_cmp);

    let lost = sent.saturating_sub(received);
    let loss = loss_rate(sent, received);
    let mean_payload_bytes = if records.is_empty() {
        0.0
    } else {
        records.iter().map(|r| r.actual_payload_bytes as f64).sum::<f64>() / records.len() as f64
    };

    let (summary, outliers) = if rtts.is_empty() {
        (None, 0)
    } else {
        let mean_v = mean(&rtts);
        let median_v = median(&rtts);
        let std_v = sample_std(&rtts, mean_v);
        let p95_v = percentile(&rtts, 0.95);
        let threshold = outlier_threshold(median_v, std_v, p95_v);
        let outliers = rtts.iter().filter(|&&v| v > threshold).count();
        (
            Some((mean_v, median_v, std_v, p95_v)),
            outliers,
        )
    };

    let (passed, reason) = verdict(expect_rejection, received, loss, &summary, thresholds);

    let (mean_v, median_v, std_v, p95_v) = match summary {
        Some((m, md, s, p)) => (Some(m), Some(md), Some(s), Some(p)),
        None => (None, None, None, None),
    };

    CaseResult {
        case_name: case_name.into(),
        description: description.into(),
        sent,
        received,
        lost,
        loss_rate: loss,
        min_ms: rtts.first().copied(),
        max_ms: rtts.last().copied(),
        mean_ms: mean_v,
        median_ms: median_v,
        std_ms: std_v,
        p50_ms: (!rtts.is_empty()).then(|| percentile(&rtts, 0.50)),
        p75_ms: (!rtts.is_empty()).then(|| percentile(&rtts, 0.75)),
        p90_ms: (!rtts.is_empty()).then(|| percentile(&rtts, 0.90)),
        p95_ms: p95_v,
        p99_ms: (!rtts.is_empty()).then(|| percentile(&rtts, 0.99)),
        outliers,
        mean_payload_bytes,
        passed,
        reason,
    }
}

fn verdict(
    expect_rejection: bool,
    received: usize,
    loss: f64,
    summary: &Option<(f64, f64, f64, f64)>,
    thresholds: &Thresholds,
) -> (bool, String) {
    if expect_rejection {
        return if received == 0 {
            (true, String::new())
        } else {
            (false, "Unexpected ack for oversize payload".into())
        };
    }

    match summary {
        None => (false, "Timeout/no-ack".into()),
        Some((mean_v, _, _, p95_v)) => {
            if loss >= 1.0 {
                (false, "Loss >= 1%".into())
            } else if *mean_v > thresholds.mean_ms || *p95_v > thresholds.p95_ms {
                (false, "Thresholds not met".into())
            } else {
                (true, String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rtt: Option<u64>) -> PendingRecord {
        PendingRecord {
            cmd_id: "c".into(),
            t_send_ms: 0,
            t_ack_recv_ms: rtt,
            rtt_ms: rtt,
            mode: Some("AUTO".into()),
            phase: None,
            payload_size: 0,
            actual_payload_bytes: 100,
            note: "test".into(),
        }
    }

    #[test]
    fn test_nearest_rank_percentile() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 0.50), 30.0); // floor(5 * 0.5) = 2
        assert_eq!(percentile(&sorted, 0.90), 50.0); // floor(5 * 0.9) = 4
        assert_eq!(percentile(&sorted, 0.99), 50.0); // clamped to n - 1
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
    }

    #[test]
    fn test_median_even_odd() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[5.0]), 5.0);
    }

    #[test]
    fn test_outlier_threshold_rule() {
        // median 50, std 5, p95 60: min(120, 65) = 65
        assert_eq!(outlier_threshold(50.0, 5.0, 60.0), 65.0);
        // p95 cap wins when the distribution is tight
        assert_eq!(outlier_threshold(100.0, 50.0, 40.0), 80.0);
    }

    #[test]
    fn test_loss_rate() {
        assert_eq!(loss_rate(100, 97), 3.0);
        assert_eq!(loss_rate(0, 0), 0.0);
        assert_eq!(loss_rate(10, 10), 0.0);
    }

    #[test]
    fn test_sample_std() {
        // Known sample: [2, 4, 4, 4, 5, 5, 7, 9], mean 5, sample std ~2.138
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let std = sample_std(&values, mean(&values));
        assert!((std - 2.138).abs() < 0.01);
        assert_eq!(sample_std(&[3.0], 3.0), 0.0);
    }

    #[test]
    fn test_summarize_clean_run_passes() {
        let records: Vec<_> = (1..=100).map(|i| record(Some(10 + i % 5))).collect();
        let result = summarize(
            "case1",
            "baseline",
            false,
            100,
            100,
            &records,
            &Thresholds::default(),
        );
        assert!(result.passed);
        assert_eq!(result.lost, 0);
        assert_eq!(result.loss_rate, 0.0);
        assert!(result.mean_ms.unwrap() < 20.0);
        assert_eq!(result.outliers, 0);
    }

    #[test]
    fn test_summarize_lossy_run_fails() {
        let mut records: Vec<_> = (0..97).map(|_| record(Some(10))).collect();
        records.extend((0..3).map(|_| record(None)));

        let result = summarize(
            "case1",
            "lossy",
            false,
            100,
            97,
            &records,
            &Thresholds::default(),
        );
        assert!(!result.passed);
        assert_eq!(result.reason, "Loss >= 1%");
        assert_eq!(result.loss_rate, 3.0);
    }

    #[test]
    fn test_summarize_timeout_fails() {
        let records: Vec<_> = (0..5).map(|_| record(None)).collect();
        let result = summarize(
            "case1",
            "dead",
            false,
            5,
            0,
            &records,
            &Thresholds::default(),
        );
        assert!(!result.passed);
        assert_eq!(result.reason, "Timeout/no-ack");
        assert!(result.mean_ms.is_none());
        assert_eq!(result.loss_rate, 100.0);
    }

    #[test]
    fn test_summarize_threshold_violation_fails() {
        let records: Vec<_> = (0..10).map(|_| record(Some(900))).collect();
        let result = summarize(
            "case1",
            "slow",
            false,
            10,
            10,
            &records,
            &Thresholds::default(),
        );
        assert!(!result.passed);
        assert_eq!(result.reason, "Thresholds not met");
    }

    #[test]
    fn test_expected_rejection_verdicts() {
        let result = summarize(
            "oversize",
            "should be dropped",
            true,
            20,
            0,
            &(0..20).map(|_| record(None)).collect::<Vec<_>>(),
            &Thresholds::default(),
        );
        assert!(result.passed);

        let mut records: Vec<_> = (0..19).map(|_| record(None)).collect();
        records.push(record(Some(12)));
        let result = summarize(
            "oversize",
            "should be dropped",
            true,
            20,
            1,
            &records,
            &Thresholds::default(),
        );
        assert!(!result.passed);
        assert_eq!(result.reason, "Unexpected ack for oversize payload");
    }

    #[test]
    fn test_outlier_counting_is_strict() {
        // 19 samples at 50 and one extreme: the spike is an outlier, the
        // samples at the threshold itself are not
        let mut records: Vec<_> = (0..19).map(|_| record(Some(50))).collect();
        records.push(record(Some(5000)));

        let result = summarize(
            "case1",
            "spiky",
            false,
            20,
            20,
            &records,
            &Thresholds::default(),
        );
        assert_eq!(result.outliers, 1);
    }
}
