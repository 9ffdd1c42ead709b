use std::fmt;
use std::str::FromStr;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Serialize, Serializer};
use thiserror::Error;
use url::{Host, Url};

/// URI scheme prefix carried by every stamp string
pub const STAMP_PREFIX: &str = "sdns://";

/// Port used when the stamp names no port (or the http default, 80)
pub const DEFAULT_PORT: u16 = 443;

/// Port used when the stamp carries no address at all
pub const SYSTEM_RESOLVER_PORT: u16 = 53;

const DNSCRYPT_MIN_LEN: usize = 66;
const DOH_MIN_LEN: usize = 22;
const RELAY_MIN_LEN: usize = 13;

/// First length-prefixed field for protocols that carry a properties byte.
/// Bytes 2..9 are reserved.
const FIELDS_OFFSET: usize = 9;

/// URL-safe base64 without padding, tolerating padded input.
const STAMP_BASE64: GeneralPurpose = GeneralPurpose::new(
	&alphabet::URL_SAFE,
	NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Reasons a stamp string cannot be turned into a `Stamp`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("stamp does not start with 'sdns://'")]
	InvalidPrefix,
	#[error("stamp payload is not valid base64url")]
	InvalidEncoding,
	#[error("stamp payload is truncated")]
	Truncated,
	#[error("unknown stamp protocol tag 0x{0:02x}")]
	UnknownProtocol(u8),
	#[error("stamp text field is not valid UTF-8")]
	InvalidUtf8,
	#[error("invalid server address '{0}'")]
	InvalidAddress(String),
	#[error("relay stamp carries no address")]
	MissingAddress,
}

/// Resolver protocol selected by the stamp's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StampProtocol {
	Plain,
	DnsCrypt,
	DoH,
	Tls,
	DnsCryptRelay,
}

impl StampProtocol {
	/// Map a stamp tag byte to its protocol.
	pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
		match tag {
			0x00 => Ok(StampProtocol::Plain),
			0x01 => Ok(StampProtocol::DnsCrypt),
			0x02 => Ok(StampProtocol::DoH),
			0x03 => Ok(StampProtocol::Tls),
			0x81 => Ok(StampProtocol::DnsCryptRelay),
			other => Err(DecodeError::UnknownProtocol(other)),
		}
	}
}

impl fmt::Display for StampProtocol {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			StampProtocol::Plain => "Plain",
			StampProtocol::DnsCrypt => "DNSCrypt",
			StampProtocol::DoH => "DoH",
			StampProtocol::Tls => "TLS",
			StampProtocol::DnsCryptRelay => "DNSCrypt relay",
		};
		f.write_str(name)
	}
}

/// Informal resolver properties advertised in the stamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StampProperties {
	pub dnssec: bool,
	pub no_log: bool,
	pub no_filter: bool,
}

impl StampProperties {
	/// Decode the properties bitmask: bit 0 dnssec, bit 1 no_log, bit 2 no_filter.
	pub fn from_bits(bits: u8) -> Self {
		StampProperties {
			dnssec: bits & 0b001 != 0,
			no_log: bits & 0b010 != 0,
			no_filter: bits & 0b100 != 0,
		}
	}
}

/// Host and port of a stamp's server.
///
/// An empty host means the stamp carried no address and the provider
/// should be located through the system resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerAddress {
	pub host: String,
	pub port: u16,
}

impl ServerAddress {
	pub fn is_empty(&self) -> bool {
		self.host.is_empty()
	}
}

impl fmt::Display for ServerAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.host.contains(':') {
			write!(f, "[{}]:{}", self.host, self.port)
		} else {
			write!(f, "{}:{}", self.host, self.port)
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsCryptStamp {
	pub properties: StampProperties,
	pub address: ServerAddress,
	/// Provider public key, lowercase hex
	pub public_key: String,
	pub provider_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DohStamp {
	pub properties: StampProperties,
	pub address: ServerAddress,
	/// Certificate hash, lowercase hex
	pub hash: String,
	pub hostname: String,
	pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayStamp {
	pub address: ServerAddress,
}

/// A decoded resolver stamp.
///
/// Each variant carries exactly the fields its protocol defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "protocol")]
pub enum Stamp {
	Plain,
	DnsCrypt(DnsCryptStamp),
	DoH(DohStamp),
	Tls,
	DnsCryptRelay(RelayStamp),
}

impl Stamp {
	pub fn protocol(&self) -> StampProtocol {
		match self {
			Stamp::Plain => StampProtocol::Plain,
			Stamp::DnsCrypt(_) => StampProtocol::DnsCrypt,
			Stamp::DoH(_) => StampProtocol::DoH,
			Stamp::Tls => StampProtocol::Tls,
			Stamp::DnsCryptRelay(_) => StampProtocol::DnsCryptRelay,
		}
	}

	/// Properties bitmask, present only for DNSCrypt and DoH stamps.
	pub fn properties(&self) -> Option<StampProperties> {
		match self {
			Stamp::DnsCrypt(s) => Some(s.properties),
			Stamp::DoH(s) => Some(s.properties),
			_ => None,
		}
	}

	pub fn address(&self) -> Option<&ServerAddress> {
		match self {
			Stamp::DnsCrypt(s) => Some(&s.address),
			Stamp::DoH(s) => Some(&s.address),
			Stamp::DnsCryptRelay(s) => Some(&s.address),
			Stamp::Plain | Stamp::Tls => None,
		}
	}

	/// Short label for reports: provider name, DoH hostname, or relay address.
	pub fn label(&self) -> String {
		match self {
			Stamp::DnsCrypt(s) => s.provider_name.clone(),
			Stamp::DoH(s) => s.hostname.clone(),
			Stamp::DnsCryptRelay(s) => s.address.to_string(),
			other => other.protocol().to_string(),
		}
	}
}

impl FromStr for Stamp {
	type Err = DecodeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		decode(s)
	}
}

/// Decode an `sdns://` stamp string.
///
/// Input is untrusted: every failure is reported as a `DecodeError`,
/// no input makes this panic.
pub fn decode(input: &str) -> Result<Stamp, DecodeError> {
	let encoded = input.strip_prefix(STAMP_PREFIX)
		.ok_or(DecodeError::InvalidPrefix)?;
	let bin = STAMP_BASE64.decode(encoded)
		.map_err(|_| DecodeError::InvalidEncoding)?;
	let tag = *bin.first().ok_or(DecodeError::Truncated)?;

	match StampProtocol::from_tag(tag)? {
		StampProtocol::Plain => Ok(Stamp::Plain),
		StampProtocol::Tls => Ok(Stamp::Tls),
		StampProtocol::DnsCrypt => decode_dnscrypt(&bin),
		StampProtocol::DoH => decode_doh(&bin),
		StampProtocol::DnsCryptRelay => decode_relay(&bin),
	}
}

fn decode_dnscrypt(bin: &[u8]) -> Result<Stamp, DecodeError> {
	if bin.len() < DNSCRYPT_MIN_LEN {
		return Err(DecodeError::Truncated);
	}
	let properties = StampProperties::from_bits(bin[1]);
	let mut fields = FieldReader::new(bin, FIELDS_OFFSET);
	let address = parse_address(&fields.text()?)?;
	let public_key = fields.hex()?;
	let provider_name = fields.text()?;

	Ok(Stamp::DnsCrypt(DnsCryptStamp {
		properties,
		address,
		public_key,
		provider_name,
	}))
}

fn decode_doh(bin: &[u8]) -> Result<Stamp, DecodeError> {
	if bin.len() < DOH_MIN_LEN {
		return Err(DecodeError::Truncated);
	}
	let properties = StampProperties::from_bits(bin[1]);
	let mut fields = FieldReader::new(bin, FIELDS_OFFSET);
	let address = parse_address(&fields.text()?)?;
	let hash = fields.hex()?;
	let hostname = fields.text()?;
	let path = fields.text()?;

	Ok(Stamp::DoH(DohStamp {
		properties,
		address,
		hash,
		hostname,
		path,
	}))
}

fn decode_relay(bin: &[u8]) -> Result<Stamp, DecodeError> {
	if bin.len() < RELAY_MIN_LEN {
		return Err(DecodeError::Truncated);
	}
	// Relays have no properties byte; the address starts right after the tag
	let mut fields = FieldReader::new(bin, 1);
	let raw = fields.text()?;
	if raw.is_empty() {
		return Err(DecodeError::MissingAddress);
	}
	Ok(Stamp::DnsCryptRelay(RelayStamp {
		address: parse_address(&raw)?,
	}))
}

/// Split a stamp address field into host and port.
///
/// The field is read as a URI authority. No port or port 80 maps to 443,
/// an empty field maps to port 53 with no host.
fn parse_address(raw: &str) -> Result<ServerAddress, DecodeError> {
	if raw.is_empty() {
		return Ok(ServerAddress {
			host: String::new(),
			port: SYSTEM_RESOLVER_PORT,
		});
	}

	let invalid = || DecodeError::InvalidAddress(raw.to_string());
	let url = Url::parse(&format!("http://{}", raw)).map_err(|_| invalid())?;

	// Only a bare authority is accepted
	if url.path() != "/"
		|| url.query().is_some()
		|| url.fragment().is_some()
		|| !url.username().is_empty()
		|| url.password().is_some()
	{
		return Err(invalid());
	}

	let host = match url.host() {
		Some(Host::Domain(domain)) => domain.to_string(),
		Some(Host::Ipv4(ip)) => ip.to_string(),
		Some(Host::Ipv6(ip)) => ip.to_string(),
		None => return Err(invalid()),
	};
	let port = match url.port_or_known_default() {
		Some(80) | None => DEFAULT_PORT,
		Some(port) => port,
	};

	Ok(ServerAddress { host, port })
}

/// Bounds-checked reader over length-prefixed stamp fields
struct FieldReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> FieldReader<'a> {
	fn new(bytes: &'a [u8], pos: usize) -> Self {
		FieldReader { bytes, pos }
	}

	fn field(&mut self) -> Result<&'a [u8], DecodeError> {
		let len = *self.bytes.get(self.pos).ok_or(DecodeError::Truncated)? as usize;
		let start = self.pos + 1;
		let field = self.bytes.get(start..start + len)
			.ok_or(DecodeError::Truncated)?;
		self.pos = start + len;
		Ok(field)
	}

	fn text(&mut self) -> Result<String, DecodeError> {
		let bytes = self.field()?;
		std::str::from_utf8(bytes)
			.map(str::to_owned)
			.map_err(|_| DecodeError::InvalidUtf8)
	}

	fn hex(&mut self) -> Result<String, DecodeError> {
		Ok(to_hex(self.field()?))
	}
}

/// Lowercase hex rendering of raw bytes.
pub fn to_hex(bytes: &[u8]) -> String {
	bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a hex string back to bytes; `None` on odd length or non-hex input.
pub fn from_hex(text: &str) -> Option<Vec<u8>> {
	if text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
		return None;
	}
	(0..text.len())
		.step_by(2)
		.map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
		.collect()
}

/// Serde helper rendering byte fields as lowercase hex strings.
pub fn serialize_hex<T, S>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
where
	T: AsRef<[u8]>,
	S: Serializer,
{
	serializer.serialize_str(&to_hex(bytes.as_ref()))
}
