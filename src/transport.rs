use std::net::SocketAddr;
use std::time::{Duration, Instant};

use hickory_proto::op::Message;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use crate::dns::parse_response;

/// Datagrams read before giving up on a matching response
const MAX_RECV_ATTEMPTS: usize = 3;

/// Receive buffer, large enough for EDNS-extended responses
const UDP_BUFFER_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum NetworkError {
	#[error("network error: {0}")]
	Io(#[from] std::io::Error),
	#[error("no response within {} ms", .0.as_millis())]
	Timeout(Duration),
	#[error("malformed response: {0}")]
	Malformed(String),
}

/// A validated response and the round trip that produced it
#[derive(Debug)]
pub struct Answer {
	pub message: Message,
	/// Time between sending the UDP query and receiving its response
	pub rtt: Duration,
	/// Set when the UDP answer was truncated and re-fetched over TCP
	pub over_tcp: bool,
}

/// Send a query over UDP and fall back to TCP when the answer is truncated.
///
/// The round trip reported is always the UDP one; the TCP retry only
/// recovers the full answer.
pub async fn query(
	server: SocketAddr,
	query_bytes: &[u8],
	txid: u16,
	timeout: Duration,
) -> Result<Answer, NetworkError> {
	let (message, rtt) = query_udp(server, query_bytes, txid, timeout).await?;
	if !message.truncated() {
		return Ok(Answer { message, rtt, over_tcp: false });
	}

	tracing::debug!("{}: UDP answer truncated, retrying over TCP", server);
	let message = query_tcp(server, query_bytes, txid, timeout).await?;
	Ok(Answer { message, rtt, over_tcp: true })
}

/// Send a single query over UDP and measure the round trip.
///
/// Creates a dedicated socket per query so concurrent tasks never steal
/// each other's responses. Datagrams with a foreign txid are skipped.
pub async fn query_udp(
	server: SocketAddr,
	query_bytes: &[u8],
	txid: u16,
	timeout: Duration,
) -> Result<(Message, Duration), NetworkError> {
	let bind_addr = if server.is_ipv4() {
		"0.0.0.0:0"
	} else {
		"[::]:0"
	};
	let socket = UdpSocket::bind(bind_addr).await?;

	// Timing covers send+recv only
	let start = Instant::now();
	socket.send_to(query_bytes, server).await?;

	let mut buf = vec![0u8; UDP_BUFFER_LEN];
	let mut last_error = None;
	for _ in 0..MAX_RECV_ATTEMPTS {
		let elapsed = start.elapsed();
		if elapsed >= timeout {
			break;
		}
		let remaining = timeout - elapsed;

		match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
			Ok(Ok((len, _src))) => {
				let rtt = start.elapsed();
				match parse_response(&buf[..len], txid) {
					Ok(message) => return Ok((message, rtt)),
					Err(e) => {
						// txid mismatch or parse error, keep listening
						last_error = Some(e.to_string());
						continue;
					}
				}
			}
			Ok(Err(e)) => return Err(NetworkError::Io(e)),
			Err(_) => break,
		}
	}

	Err(match last_error {
		Some(reason) => NetworkError::Malformed(reason),
		None => NetworkError::Timeout(timeout),
	})
}

/// Send a single query over TCP with the two-byte length framing.
pub async fn query_tcp(
	server: SocketAddr,
	query_bytes: &[u8],
	txid: u16,
	timeout: Duration,
) -> Result<Message, NetworkError> {
	let exchange = async {
		let len = u16::try_from(query_bytes.len())
			.map_err(|_| NetworkError::Malformed("query too large for TCP framing".to_string()))?;
		let mut framed = Vec::with_capacity(query_bytes.len() + 2);
		framed.extend_from_slice(&len.to_be_bytes());
		framed.extend_from_slice(query_bytes);

		let mut stream = TcpStream::connect(server).await?;
		stream.write_all(&framed).await?;

		let mut len_buf = [0u8; 2];
		stream.read_exact(&mut len_buf).await?;
		let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
		stream.read_exact(&mut buf).await?;

		let message = parse_response(&buf, txid)
			.map_err(|e| NetworkError::Malformed(e.to_string()))?;
		Ok::<_, NetworkError>(message)
	};

	tokio::time::timeout(timeout, exchange).await
		.map_err(|_| NetworkError::Timeout(timeout))?
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use hickory_proto::op::MessageType;
	use tokio::net::TcpListener;

	use crate::dns::build_certificate_query;

	/// Spawn a loopback UDP server answering each datagram with the
	/// datagrams `respond` returns.
	pub(crate) async fn spawn_udp_server<F>(respond: F) -> SocketAddr
	where
		F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
	{
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = socket.local_addr().unwrap();
		tokio::spawn(async move {
			let mut buf = vec![0u8; 4096];
			loop {
				let Ok((len, peer)) = socket.recv_from(&mut buf).await else { return };
				for datagram in respond(&buf[..len]) {
					let _ = socket.send_to(&datagram, peer).await;
				}
			}
		});
		addr
	}

	/// Turn raw query bytes into a response message
	pub(crate) fn echo_response(query: &[u8]) -> Message {
		let mut response = Message::from_vec(query).unwrap();
		response.set_message_type(MessageType::Response);
		response
	}

	#[tokio::test]
	async fn test_udp_round_trip() {
		let server = spawn_udp_server(|q| vec![echo_response(q).to_vec().unwrap()]).await;
		let query_bytes = build_certificate_query("example.com", 42).unwrap();
		let answer = query(server, &query_bytes, 42, Duration::from_secs(2)).await.unwrap();
		assert_eq!(answer.message.id(), 42);
		assert!(!answer.over_tcp);
		assert!(answer.rtt < Duration::from_secs(2));
	}

	#[tokio::test]
	async fn test_foreign_txid_is_skipped() {
		let server = spawn_udp_server(|q| {
			let good = echo_response(q);
			let mut stray = good.clone();
			stray.set_id(good.id().wrapping_add(1));
			vec![stray.to_vec().unwrap(), good.to_vec().unwrap()]
		}).await;
		let query_bytes = build_certificate_query("example.com", 7).unwrap();
		let (message, _) = query_udp(server, &query_bytes, 7, Duration::from_secs(2)).await.unwrap();
		assert_eq!(message.id(), 7);
	}

	#[tokio::test]
	async fn test_silent_server_times_out() {
		// Bound but never answers
		let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let server = silent.local_addr().unwrap();
		let query_bytes = build_certificate_query("example.com", 1).unwrap();
		let started = Instant::now();
		let result = query(server, &query_bytes, 1, Duration::from_millis(200)).await;
		assert!(matches!(result, Err(NetworkError::Timeout(_))));
		assert!(started.elapsed() < Duration::from_secs(2));
	}

	#[tokio::test]
	async fn test_garbage_only_is_malformed() {
		let server = spawn_udp_server(|_| vec![vec![0u8; 3]; 3]).await;
		let query_bytes = build_certificate_query("example.com", 9).unwrap();
		let result = query_udp(server, &query_bytes, 9, Duration::from_secs(2)).await;
		assert!(matches!(result, Err(NetworkError::Malformed(_))));
	}

	#[tokio::test]
	async fn test_truncated_answer_falls_back_to_tcp() {
		let server = spawn_udp_server(|q| {
			let mut response = echo_response(q);
			response.set_truncated(true);
			vec![response.to_vec().unwrap()]
		}).await;

		// TCP listener on the same port answers the retry
		let listener = TcpListener::bind(server).await.unwrap();
		tokio::spawn(async move {
			let Ok((mut stream, _)) = listener.accept().await else { return };
			let mut len_buf = [0u8; 2];
			stream.read_exact(&mut len_buf).await.unwrap();
			let mut query = vec![0u8; u16::from_be_bytes(len_buf) as usize];
			stream.read_exact(&mut query).await.unwrap();
			let response = echo_response(&query).to_vec().unwrap();
			let mut framed = (response.len() as u16).to_be_bytes().to_vec();
			framed.extend_from_slice(&response);
			stream.write_all(&framed).await.unwrap();
		});

		let query_bytes = build_certificate_query("example.com", 11).unwrap();
		let answer = query(server, &query_bytes, 11, Duration::from_secs(2)).await.unwrap();
		assert!(answer.over_tcp);
		assert!(!answer.message.truncated());
	}
}
