use anyhow::{anyhow, Result};
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::{Name, RData, Record, RecordType};

/// Build the certificate discovery query: TXT for the provider name.
///
/// Recursion desired is always set. Returns the serialized query bytes.
pub fn build_certificate_query(provider_name: &str, txid: u16) -> Result<Vec<u8>> {
	let name = Name::from_ascii(provider_name)
		.map_err(|e| anyhow!("invalid domain name '{}': {}", provider_name, e))?;

	let mut message = Message::new();
	message.set_id(txid);
	message.set_recursion_desired(true);
	message.add_query(Query::query(name, RecordType::TXT));

	let bytes = message.to_vec()
		.map_err(|e| anyhow!("failed to serialize DNS query: {}", e))?;
	Ok(bytes)
}

/// Parse a DNS response, validating the transaction ID and message type.
pub fn parse_response(bytes: &[u8], expected_txid: u16) -> Result<Message> {
	let message = Message::from_vec(bytes)
		.map_err(|e| anyhow!("failed to parse DNS response: {}", e))?;

	if message.id() != expected_txid {
		return Err(anyhow!(
			"txid mismatch: expected {}, got {}",
			expected_txid, message.id()
		));
	}

	if message.message_type() != MessageType::Response {
		return Err(anyhow!("received a query instead of a response"));
	}

	Ok(message)
}

/// Wire-format data of a TXT record.
///
/// Each character-string is re-prefixed with its length byte, so a DNSCrypt
/// certificate record comes back starting with its 9-byte marker.
/// Returns None for records that are not TXT.
pub fn txt_rdata(record: &Record) -> Option<Vec<u8>> {
	let RData::TXT(txt) = record.data() else {
		return None;
	};
	let mut data = Vec::new();
	for chunk in txt.txt_data() {
		data.push(chunk.len() as u8);
		data.extend_from_slice(chunk);
	}
	Some(data)
}

/// Wire-format data of every TXT record in the answer section.
pub fn answer_txt_records(message: &Message) -> Vec<Vec<u8>> {
	message.answers().iter()
		.filter_map(txt_rdata)
		.collect()
}
