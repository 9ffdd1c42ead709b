use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::cert::{certificates_from_records, select_newest, Certificate};
use crate::dns::{answer_txt_records, build_certificate_query};
use crate::resolver;
use crate::stamp::{from_hex, DnsCryptStamp, Stamp, StampProtocol};
use crate::transport::{self, NetworkError};

/// Measurement configuration
#[derive(Debug, Clone)]
pub struct MeasurementConfig {
	/// Per-query timeout, also applied to address lookup
	pub timeout: Duration,
	/// Maximum measurements in flight; 0 means unbounded
	pub max_inflight: usize,
}

impl Default for MeasurementConfig {
	fn default() -> Self {
		MeasurementConfig {
			timeout: Duration::from_millis(2000),
			max_inflight: 64,
		}
	}
}

#[derive(Debug, Error)]
pub enum MeasurementError {
	#[error("{0} stamps cannot be measured")]
	Unsupported(StampProtocol),
	#[error("address lookup failed: {0}")]
	Address(String),
	#[error("provider public key is not valid hex")]
	PublicKey,
	#[error("cannot build query: {0}")]
	Query(String),
	#[error(transparent)]
	Network(#[from] NetworkError),
	#[error("no valid certificate in {0} TXT record(s)")]
	NoCertificate(usize),
}

/// Outcome of measuring one stamp.
///
/// `failed` is set exactly when no certificate is attached.
#[derive(Debug, Clone, Serialize)]
pub struct MeasurementResult {
	stamp: Stamp,
	elapsed_ms: Option<f64>,
	failed: bool,
	certificate: Option<Certificate>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
}

impl MeasurementResult {
	fn success(stamp: Stamp, elapsed: Duration, certificate: Certificate) -> Self {
		MeasurementResult {
			stamp,
			elapsed_ms: Some(elapsed.as_secs_f64() * 1000.0),
			failed: false,
			certificate: Some(certificate),
			error: None,
		}
	}

	fn failure(stamp: Stamp, elapsed: Option<Duration>, error: MeasurementError) -> Self {
		tracing::debug!("{}: measurement failed: {}", stamp.label(), error);
		MeasurementResult {
			stamp,
			elapsed_ms: elapsed.map(|d| d.as_secs_f64() * 1000.0),
			failed: true,
			certificate: None,
			error: Some(error.to_string()),
		}
	}

	pub fn stamp(&self) -> &Stamp {
		&self.stamp
	}

	/// Query round trip in milliseconds; None when no response arrived
	pub fn elapsed_ms(&self) -> Option<f64> {
		self.elapsed_ms
	}

	pub fn failed(&self) -> bool {
		self.failed
	}

	pub fn certificate(&self) -> Option<&Certificate> {
		self.certificate.as_ref()
	}

	pub fn error(&self) -> Option<&str> {
		self.error.as_deref()
	}
}

/// Measure one DNSCrypt resolver.
///
/// Sends a TXT query for the provider name, times the round trip and keeps
/// the newest certificate that verifies under the stamp's public key.
/// Every failure is reported in the result; nothing escapes as an error.
pub async fn measure(stamp: &Stamp, config: &MeasurementConfig) -> MeasurementResult {
	let Stamp::DnsCrypt(dnscrypt) = stamp else {
		return MeasurementResult::failure(
			stamp.clone(), None, MeasurementError::Unsupported(stamp.protocol()),
		);
	};

	let Some(public_key) = from_hex(&dnscrypt.public_key) else {
		return MeasurementResult::failure(stamp.clone(), None, MeasurementError::PublicKey);
	};

	let (elapsed, records) = match fetch_certificate_records(dnscrypt, config.timeout).await {
		Ok(fetched) => fetched,
		Err(e) => return MeasurementResult::failure(stamp.clone(), None, e),
	};

	let certificates = certificates_from_records(&records, &public_key);
	match select_newest(certificates) {
		Some(certificate) => MeasurementResult::success(stamp.clone(), elapsed, certificate),
		None => MeasurementResult::failure(
			stamp.clone(), Some(elapsed), MeasurementError::NoCertificate(records.len()),
		),
	}
}

/// Query the resolver and return the round trip plus every TXT answer.
async fn fetch_certificate_records(
	stamp: &DnsCryptStamp,
	timeout: Duration,
) -> Result<(Duration, Vec<Vec<u8>>), MeasurementError> {
	let server = tokio::time::timeout(timeout, resolver::resolve(&stamp.address)).await
		.map_err(|_| MeasurementError::Address(format!("lookup of '{}' timed out", stamp.address.host)))?
		.map_err(|e| MeasurementError::Address(e.to_string()))?;

	let txid: u16 = rand::random();
	let query_bytes = build_certificate_query(&stamp.provider_name, txid)
		.map_err(|e| MeasurementError::Query(e.to_string()))?;

	let answer = transport::query(server, &query_bytes, txid, timeout).await?;
	let records = answer_txt_records(&answer.message);
	tracing::debug!(
		"{}: {} TXT record(s) in {:?}{}",
		stamp.provider_name, records.len(), answer.rtt,
		if answer.over_tcp { ", full answer over TCP" } else { "" },
	);
	Ok((answer.rtt, records))
}

/// Measure every DNSCrypt stamp concurrently.
///
/// Other protocols are dropped up front. Each stamp gets its own task and
/// socket; results are collected once all tasks finish and sorted fastest
/// first, failures last.
pub async fn measure_all(stamps: Vec<Stamp>, config: &MeasurementConfig) -> Vec<MeasurementResult> {
	let permits = if config.max_inflight == 0 {
		Semaphore::MAX_PERMITS
	} else {
		config.max_inflight
	};
	let semaphore = Arc::new(Semaphore::new(permits));

	let mut handles = Vec::new();
	for stamp in stamps {
		if stamp.protocol() != StampProtocol::DnsCrypt {
			tracing::debug!("not measuring {} stamp {}", stamp.protocol(), stamp.label());
			continue;
		}
		let sem = semaphore.clone();
		let config = config.clone();

		handles.push(tokio::spawn(async move {
			// Acquire semaphore permit for concurrency control
			let _permit = sem.acquire().await.ok();
			measure(&stamp, &config).await
		}));
	}
	tracing::info!("measuring {} DNSCrypt resolvers", handles.len());

	let mut results = Vec::with_capacity(handles.len());
	for handle in handles {
		match handle.await {
			Ok(result) => results.push(result),
			Err(e) => tracing::warn!("measurement task failed: {}", e),
		}
	}

	sort_by_elapsed(&mut results);
	results
}

/// Sort results by round trip ascending, failures after successes.
pub fn sort_by_elapsed(results: &mut [MeasurementResult]) {
	results.sort_by(|a, b| {
		a.failed.cmp(&b.failed).then_with(|| {
			let a_ms = a.elapsed_ms.unwrap_or(f64::INFINITY);
			let b_ms = b.elapsed_ms.unwrap_or(f64::INFINITY);
			a_ms.partial_cmp(&b_ms).unwrap_or(Ordering::Equal)
		})
	});
}
