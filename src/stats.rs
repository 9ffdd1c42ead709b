use serde::Serialize;

use crate::measure::MeasurementResult;

/// Latency summary over one measurement run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
	pub measured: usize,
	pub succeeded: usize,
	pub failed: usize,
	pub p50_ms: f64,
	pub p95_ms: f64,
	pub mean_ms: f64,
	pub stddev_ms: f64,
}

/// Calculate the p-th percentile from a sorted slice using nearest-rank method.
///
/// Args:
///   sorted_values: Pre-sorted slice of f64 values.
///   p: Percentile between 0.0 and 100.0 (e.g. 50.0 for median).
///
/// Returns:
///   None if the slice is empty, otherwise the percentile value.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
	if sorted_values.is_empty() {
		return None;
	}
	if sorted_values.len() == 1 {
		return Some(sorted_values[0]);
	}
	// Nearest-rank: rank = ceil(p/100 * N)
	let n = sorted_values.len();
	let rank = ((p / 100.0) * n as f64).ceil() as usize;
	let rank = rank.clamp(1, n);
	Some(sorted_values[rank - 1])
}

/// Calculate the arithmetic mean of a slice of values.
pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		return None;
	}
	let sum: f64 = values.iter().sum();
	Some(sum / values.len() as f64)
}

/// Calculate the population standard deviation of a slice of values.
pub fn stddev(values: &[f64]) -> Option<f64> {
	let avg = mean(values)?;
	let variance = values.iter()
		.map(|v| (v - avg).powi(2))
		.sum::<f64>() / values.len() as f64;
	Some(variance.sqrt())
}

/// Summarize a run. Latency figures cover successful measurements only.
pub fn summarize(results: &[MeasurementResult]) -> LatencySummary {
	let latencies: Vec<f64> = results.iter()
		.filter(|r| !r.failed())
		.filter_map(|r| r.elapsed_ms())
		.collect();
	let failed = results.iter().filter(|r| r.failed()).count();
	summarize_latencies(&latencies, failed)
}

/// Build a summary from successful round trips and a failure count.
pub fn summarize_latencies(latencies_ms: &[f64], failed: usize) -> LatencySummary {
	let mut sorted = latencies_ms.to_vec();
	sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

	LatencySummary {
		measured: sorted.len() + failed,
		succeeded: sorted.len(),
		failed,
		p50_ms: percentile(&sorted, 50.0).unwrap_or(0.0),
		p95_ms: percentile(&sorted, 95.0).unwrap_or(0.0),
		mean_ms: mean(&sorted).unwrap_or(0.0),
		stddev_ms: stddev(&sorted).unwrap_or(0.0),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::measure::tests::sample_results;

	#[test]
	fn test_percentile_basic() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
		assert_eq!(percentile(&values, 50.0), Some(5.0));
		assert_eq!(percentile(&values, 95.0), Some(10.0));
		assert_eq!(percentile(&values, 10.0), Some(1.0));
	}

	#[test]
	fn test_percentile_empty() {
		let values: Vec<f64> = vec![];
		assert_eq!(percentile(&values, 50.0), None);
	}

	#[test]
	fn test_percentile_single() {
		let values = vec![42.0];
		assert_eq!(percentile(&values, 50.0), Some(42.0));
		assert_eq!(percentile(&values, 95.0), Some(42.0));
	}

	#[test]
	fn test_mean() {
		let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
		assert_eq!(mean(&values), Some(3.0));
	}

	#[test]
	fn test_stddev() {
		let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
		let sd = stddev(&values).unwrap();
		// Population stddev should be 2.0
		assert!((sd - 2.0).abs() < 0.01);
	}

	#[test]
	fn test_summarize_latencies_unsorted_input() {
		let summary = summarize_latencies(&[30.0, 10.0, 20.0], 2);
		assert_eq!(summary.measured, 5);
		assert_eq!(summary.succeeded, 3);
		assert_eq!(summary.failed, 2);
		assert_eq!(summary.p50_ms, 20.0);
		assert_eq!(summary.p95_ms, 30.0);
		assert!((summary.mean_ms - 20.0).abs() < 1e-9);
	}

	#[test]
	fn test_summarize_all_failed() {
		let summary = summarize_latencies(&[], 4);
		assert_eq!(summary.measured, 4);
		assert_eq!(summary.succeeded, 0);
		assert_eq!(summary.p50_ms, 0.0);
		assert_eq!(summary.stddev_ms, 0.0);
	}

	#[test]
	fn test_summarize_ignores_failed_round_trips() {
		// The failure that still has a 5 ms round trip must not count
		let summary = summarize(&sample_results());
		assert_eq!(summary.measured, 4);
		assert_eq!(summary.succeeded, 2);
		assert_eq!(summary.failed, 2);
		assert!((summary.p50_ms - 20.0).abs() < 0.5);
		assert!((summary.p95_ms - 80.0).abs() < 0.5);
		assert!((summary.mean_ms - 50.0).abs() < 0.5);
	}
}
