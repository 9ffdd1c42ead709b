use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;
use thiserror::Error;

use crate::stamp::serialize_hex;

/// Length of a certificate payload once the TXT marker is stripped
pub const CERT_PAYLOAD_LEN: usize = 116;

/// Length of the marker that opens a certificate TXT record
pub const CERT_MARKER_LEN: usize = 9;

/// Marker of an X25519-XSalsa20Poly1305 certificate (es-version 1).
/// The leading 0x7c is the TXT character-string length, 124 bytes.
pub const CERT_MARKER_V1: [u8; CERT_MARKER_LEN] =
	[0x7c, b'D', b'N', b'S', b'C', 0x00, 0x01, 0x00, 0x00];

/// Marker of an X25519-XChacha20Poly1305 certificate (es-version 2)
pub const CERT_MARKER_V2: [u8; CERT_MARKER_LEN] =
	[0x7c, b'D', b'N', b'S', b'C', 0x00, 0x02, 0x00, 0x00];

// Payload layout
const SIGNATURE_END: usize = 64;
const RESOLVER_KEY_OFFSET: usize = 64;
const MAGIC_QUERY_OFFSET: usize = 96;
const SERIAL_OFFSET: usize = 104;
const VALID_FROM_OFFSET: usize = 108;
const VALID_UNTIL_OFFSET: usize = 112;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
	#[error("certificate payload is {0} bytes, expected 116")]
	InvalidLength(usize),
	#[error("certificate signature does not verify")]
	SignatureInvalid,
	#[error("TXT record does not carry a DNSCrypt certificate marker")]
	MagicMismatch,
	#[error("certificate timestamp out of range")]
	InvalidTimestamp,
}

/// A DNSCrypt resolver certificate.
///
/// Only built from a payload of exactly `CERT_PAYLOAD_LEN` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
	#[serde(serialize_with = "serialize_hex")]
	magic_query: [u8; 8],
	serial: i32,
	valid_from: DateTime<Utc>,
	valid_until: DateTime<Utc>,
	#[serde(serialize_with = "serialize_hex")]
	resolver_public_key: [u8; 32],
	signature_valid: bool,
}

impl Certificate {
	/// Client magic the resolver expects at the start of encrypted queries
	pub fn magic_query(&self) -> &[u8; 8] {
		&self.magic_query
	}

	pub fn serial(&self) -> i32 {
		self.serial
	}

	pub fn valid_from(&self) -> DateTime<Utc> {
		self.valid_from
	}

	pub fn valid_until(&self) -> DateTime<Utc> {
		self.valid_until
	}

	/// Short-term public key the resolver advertises for this certificate
	pub fn resolver_public_key(&self) -> &[u8; 32] {
		&self.resolver_public_key
	}

	/// A certificate is valid when its signature verified under the provider key.
	pub fn is_valid(&self) -> bool {
		self.signature_valid
	}

	/// Whether `now` falls inside the certificate's validity window.
	pub fn is_current(&self, now: DateTime<Utc>) -> bool {
		self.valid_from <= now && now <= self.valid_until
	}
}

/// Parse a certificate payload and verify its signature.
///
/// The payload must be exactly 116 bytes. Integer fields are big-endian.
/// A key that cannot be imported or a signature that does not verify yields
/// a certificate with `signature_valid == false` rather than an error.
pub fn extract(payload: &[u8], provider_public_key: &[u8]) -> Result<Certificate, CertificateError> {
	let payload: &[u8; CERT_PAYLOAD_LEN] = payload.try_into()
		.map_err(|_| CertificateError::InvalidLength(payload.len()))?;

	let mut magic_query = [0u8; 8];
	magic_query.copy_from_slice(&payload[MAGIC_QUERY_OFFSET..SERIAL_OFFSET]);
	let mut resolver_public_key = [0u8; 32];
	resolver_public_key.copy_from_slice(&payload[RESOLVER_KEY_OFFSET..MAGIC_QUERY_OFFSET]);

	let serial = i32::from_be_bytes(word_at(payload, SERIAL_OFFSET));
	let valid_from = timestamp(u32::from_be_bytes(word_at(payload, VALID_FROM_OFFSET)))?;
	let valid_until = timestamp(u32::from_be_bytes(word_at(payload, VALID_UNTIL_OFFSET)))?;

	let signature_valid = verify_signature(
		provider_public_key,
		&payload[SIGNATURE_END..],
		&payload[..SIGNATURE_END],
	);

	Ok(Certificate {
		magic_query,
		serial,
		valid_from,
		valid_until,
		resolver_public_key,
		signature_valid,
	})
}

/// Whether TXT record data opens with a recognised certificate marker.
pub fn is_certificate_marker(rdata: &[u8]) -> bool {
	match rdata.get(..CERT_MARKER_LEN) {
		Some(marker) => marker == &CERT_MARKER_V1[..] || marker == &CERT_MARKER_V2[..],
		None => false,
	}
}

/// Extract a verified certificate from wire-format TXT record data.
///
/// The record must start with a certificate marker; the certificate is the
/// rest of the record and must carry a valid signature.
pub fn extract_from_record(rdata: &[u8], provider_public_key: &[u8]) -> Result<Certificate, CertificateError> {
	if !is_certificate_marker(rdata) {
		return Err(CertificateError::MagicMismatch);
	}
	let certificate = extract(&rdata[CERT_MARKER_LEN..], provider_public_key)?;
	if !certificate.is_valid() {
		return Err(CertificateError::SignatureInvalid);
	}
	Ok(certificate)
}

/// Collect every verified certificate from a set of TXT records.
pub fn certificates_from_records<I, R>(records: I, provider_public_key: &[u8]) -> Vec<Certificate>
where
	I: IntoIterator<Item = R>,
	R: AsRef<[u8]>,
{
	let mut certificates = Vec::new();
	for record in records {
		match extract_from_record(record.as_ref(), provider_public_key) {
			Ok(certificate) => certificates.push(certificate),
			Err(e) => tracing::debug!("skipping TXT record: {}", e),
		}
	}
	certificates
}

/// Pick the valid certificate with the largest serial.
pub fn select_newest<I>(certificates: I) -> Option<Certificate>
where
	I: IntoIterator<Item = Certificate>,
{
	certificates.into_iter()
		.filter(Certificate::is_valid)
		.max_by_key(|c| c.serial)
}

fn word_at(payload: &[u8; CERT_PAYLOAD_LEN], offset: usize) -> [u8; 4] {
	let mut word = [0u8; 4];
	word.copy_from_slice(&payload[offset..offset + 4]);
	word
}

fn timestamp(secs: u32) -> Result<DateTime<Utc>, CertificateError> {
	Utc.timestamp_opt(i64::from(secs), 0)
		.single()
		.ok_or(CertificateError::InvalidTimestamp)
}

fn verify_signature(key: &[u8], message: &[u8], signature: &[u8]) -> bool {
	let Ok(key) = VerifyingKey::try_from(key) else {
		return false;
	};
	let Ok(signature) = Signature::from_slice(signature) else {
		return false;
	};
	key.verify_strict(message, &signature).is_ok()
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use ed25519_dalek::{Signer, SigningKey};

	pub(crate) const FROM: u32 = 1_700_000_000;
	pub(crate) const UNTIL: u32 = 1_700_086_400;

	pub(crate) fn provider_key() -> SigningKey {
		SigningKey::from_bytes(&[7u8; 32])
	}

	/// Build a signed certificate payload
	pub(crate) fn signed_payload(key: &SigningKey, serial: i32, from: u32, until: u32) -> Vec<u8> {
		let mut signed = Vec::with_capacity(52);
		signed.extend_from_slice(&[0x42; 32]);
		signed.extend_from_slice(b"q6MAGIC!");
		signed.extend_from_slice(&serial.to_be_bytes());
		signed.extend_from_slice(&from.to_be_bytes());
		signed.extend_from_slice(&until.to_be_bytes());

		let mut payload = key.sign(&signed).to_bytes().to_vec();
		payload.extend_from_slice(&signed);
		payload
	}

	/// Wrap a payload in TXT record data behind a marker
	pub(crate) fn record(marker: &[u8], payload: &[u8]) -> Vec<u8> {
		let mut data = marker.to_vec();
		data.extend_from_slice(payload);
		data
	}

	#[test]
	fn test_extract_fields() {
		let key = provider_key();
		let payload = signed_payload(&key, 0x0102_0304, FROM, UNTIL);
		let cert = extract(&payload, key.verifying_key().as_bytes()).unwrap();

		assert_eq!(cert.serial(), 16_909_060);
		assert_eq!(cert.magic_query(), b"q6MAGIC!");
		assert_eq!(cert.resolver_public_key(), &[0x42; 32]);
		assert_eq!(cert.valid_from().timestamp(), i64::from(FROM));
		assert_eq!(cert.valid_until().timestamp(), i64::from(UNTIL));
		assert!(cert.is_valid());
	}

	#[test]
	fn test_serial_is_signed() {
		let key = provider_key();
		let payload = signed_payload(&key, -1, FROM, UNTIL);
		let cert = extract(&payload, key.verifying_key().as_bytes()).unwrap();
		assert_eq!(cert.serial(), -1);
	}

	#[test]
	fn test_wrong_length_never_yields_certificate() {
		let key = provider_key();
		let payload = signed_payload(&key, 1, FROM, UNTIL);
		let mut longer = payload.clone();
		longer.push(0);
		for data in [&[][..], &payload[..115], &longer[..], &[0u8; 125][..]] {
			assert_eq!(
				extract(data, key.verifying_key().as_bytes()),
				Err(CertificateError::InvalidLength(data.len())),
			);
		}
	}

	#[test]
	fn test_tampered_content_fails_verification() {
		let key = provider_key();
		let mut payload = signed_payload(&key, 1, FROM, UNTIL);
		payload[SERIAL_OFFSET + 3] ^= 0x01;
		let cert = extract(&payload, key.verifying_key().as_bytes()).unwrap();
		assert!(!cert.is_valid());
	}

	#[test]
	fn test_wrong_key_fails_verification() {
		let key = provider_key();
		let other = SigningKey::from_bytes(&[9u8; 32]);
		let payload = signed_payload(&key, 1, FROM, UNTIL);
		let cert = extract(&payload, other.verifying_key().as_bytes()).unwrap();
		assert!(!cert.is_valid());
	}

	#[test]
	fn test_malformed_key_is_not_a_crash() {
		let key = provider_key();
		let payload = signed_payload(&key, 1, FROM, UNTIL);
		for bad_key in [&[][..], &[1u8; 31][..], &[1u8; 33][..]] {
			let cert = extract(&payload, bad_key).unwrap();
			assert!(!cert.is_valid());
		}
	}

	#[test]
	fn test_markers() {
		let key = provider_key();
		let payload = signed_payload(&key, 3, FROM, UNTIL);
		for marker in [CERT_MARKER_V1, CERT_MARKER_V2] {
			let cert = extract_from_record(&record(&marker, &payload), key.verifying_key().as_bytes())
				.unwrap();
			assert_eq!(cert.serial(), 3);
		}
	}

	#[test]
	fn test_signed_payload_behind_wrong_marker_is_excluded() {
		let key = provider_key();
		let payload = signed_payload(&key, 9, FROM, UNTIL);
		// The payload itself verifies
		assert!(extract(&payload, key.verifying_key().as_bytes()).unwrap().is_valid());

		let mut marker = CERT_MARKER_V1;
		marker[6] = 0x03;
		let data = record(&marker, &payload);
		assert_eq!(
			extract_from_record(&data, key.verifying_key().as_bytes()),
			Err(CertificateError::MagicMismatch),
		);
		assert!(certificates_from_records([data], key.verifying_key().as_bytes()).is_empty());
	}

	#[test]
	fn test_short_record_is_not_a_certificate() {
		let key = provider_key();
		assert_eq!(
			extract_from_record(&CERT_MARKER_V1[..4], key.verifying_key().as_bytes()),
			Err(CertificateError::MagicMismatch),
		);
		assert_eq!(
			extract_from_record(&CERT_MARKER_V1, key.verifying_key().as_bytes()),
			Err(CertificateError::InvalidLength(0)),
		);
	}

	#[test]
	fn test_record_with_bad_signature() {
		let key = provider_key();
		let mut payload = signed_payload(&key, 1, FROM, UNTIL);
		payload[0] ^= 0xff;
		assert_eq!(
			extract_from_record(&record(&CERT_MARKER_V2, &payload), key.verifying_key().as_bytes()),
			Err(CertificateError::SignatureInvalid),
		);
	}

	#[test]
	fn test_select_newest_by_serial() {
		let key = provider_key();
		let records = vec![
			record(&CERT_MARKER_V1, &signed_payload(&key, 5, FROM, UNTIL)),
			record(&CERT_MARKER_V2, &signed_payload(&key, 7, FROM, UNTIL)),
		];
		let certs = certificates_from_records(&records, key.verifying_key().as_bytes());
		assert_eq!(certs.len(), 2);
		assert_eq!(select_newest(certs).unwrap().serial(), 7);
	}

	#[test]
	fn test_select_newest_ignores_unverified() {
		let key = provider_key();
		let other = SigningKey::from_bytes(&[9u8; 32]);
		let good = extract(&signed_payload(&key, 5, FROM, UNTIL), key.verifying_key().as_bytes()).unwrap();
		let forged = extract(&signed_payload(&other, 50, FROM, UNTIL), key.verifying_key().as_bytes()).unwrap();
		assert_eq!(select_newest(vec![forged, good]).unwrap().serial(), 5);
		assert!(select_newest(Vec::new()).is_none());
	}

	#[test]
	fn test_is_current() {
		let key = provider_key();
		let cert = extract(&signed_payload(&key, 1, FROM, UNTIL), key.verifying_key().as_bytes()).unwrap();
		let inside = Utc.timestamp_opt(i64::from(FROM) + 60, 0).unwrap();
		let after = Utc.timestamp_opt(i64::from(UNTIL) + 1, 0).unwrap();
		assert!(cert.is_current(inside));
		assert!(!cert.is_current(after));
	}
}
