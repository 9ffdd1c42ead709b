use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Result};

use crate::stamp::ServerAddress;

/// Turn a stamp's server address into a socket address.
///
/// Supports:
///   IP literal host        -- used as-is with the stamp port
///   host name              -- looked up through the OS resolver
///   empty host             -- first nameserver from /etc/resolv.conf
pub async fn resolve(address: &ServerAddress) -> Result<SocketAddr> {
	if address.is_empty() {
		let ip = system_nameservers().into_iter().next()
			.ok_or_else(|| anyhow!("stamp has no address and no system resolver is configured"))?;
		return Ok(SocketAddr::new(ip, address.port));
	}

	if let Ok(ip) = address.host.parse::<IpAddr>() {
		return Ok(SocketAddr::new(ip, address.port));
	}

	let mut addrs = tokio::net::lookup_host((address.host.as_str(), address.port)).await
		.map_err(|e| anyhow!("failed to resolve '{}': {}", address.host, e))?;
	addrs.next()
		.ok_or_else(|| anyhow!("'{}' resolved to no addresses", address.host))
}

/// Read system resolvers from /etc/resolv.conf (Unix only).
///
/// Returns an empty vec on non-Unix platforms or if the file cannot be read.
pub fn system_nameservers() -> Vec<IpAddr> {
	match std::fs::read_to_string("/etc/resolv.conf") {
		Ok(content) => parse_resolv_conf(&content),
		Err(_) => Vec::new(),
	}
}

/// Extract nameserver addresses from resolv.conf content.
///
/// Comments, other directives and unparsable addresses are skipped.
pub fn parse_resolv_conf(content: &str) -> Vec<IpAddr> {
	let mut nameservers = Vec::new();
	for line in content.lines() {
		let trimmed = line.trim();
		if !trimmed.starts_with("nameserver") {
			continue;
		}
		// Extract the address after "nameserver"
		let parts: Vec<&str> = trimmed.split_whitespace().collect();
		if parts.len() >= 2 {
			// Drop a zone index such as fe80::1%eth0
			let addr = parts[1].split('%').next().unwrap_or(parts[1]);
			if let Ok(ip) = addr.parse::<IpAddr>() {
				nameservers.push(ip);
			}
		}
	}
	nameservers
}

#[cfg(test)]
mod tests {
	use super::*;

	fn address(host: &str, port: u16) -> ServerAddress {
		ServerAddress { host: host.to_string(), port }
	}

	#[tokio::test]
	async fn test_ipv4_literal() {
		let addr = resolve(&address("212.47.228.136", 443)).await.unwrap();
		assert_eq!(addr.port(), 443);
		assert_eq!(addr.ip().to_string(), "212.47.228.136");
	}

	#[tokio::test]
	async fn test_ipv6_literal() {
		let addr = resolve(&address("2001:db8::53", 5353)).await.unwrap();
		assert!(addr.is_ipv6());
		assert_eq!(addr.port(), 5353);
	}

	#[tokio::test]
	async fn test_invalid_host() {
		let result = resolve(&address("not a valid host name", 443)).await;
		assert!(result.is_err());
	}

	#[test]
	fn test_parse_resolv_conf() {
		let content = "\
# generated by NetworkManager
search example.org
nameserver 192.0.2.1
nameserver   2001:db8::1
nameserver fe80::1%eth0
nameserver not-an-ip
options edns0
";
		let servers = parse_resolv_conf(content);
		assert_eq!(servers.len(), 3);
		assert_eq!(servers[0].to_string(), "192.0.2.1");
		assert_eq!(servers[1].to_string(), "2001:db8::1");
		assert_eq!(servers[2].to_string(), "fe80::1");
	}

	#[test]
	fn test_parse_resolv_conf_empty() {
		assert!(parse_resolv_conf("").is_empty());
		assert!(parse_resolv_conf("search example.org\n").is_empty());
	}
}
