use std::net::IpAddr;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::TorConfig;
use crate::error::DialError;
use crate::policy::Decision;
use crate::pool::PoolSelector;
use crate::store::models::{Proxy, ProxyProtocol, RouteGroup};

/// A resolved egress target: a hostname (left unresolved so proxies that
/// support remote DNS, e.g. SOCKS5 domain ATYP, can resolve it themselves)
/// plus port.
#[derive(Debug, Clone)]
pub struct Target {
	pub host: String,
	pub port: u16,
}

/// Builds outbound connections for a routing decision (§4.5). Wraps the
/// pool selector and static LOCAL/TOR endpoints behind one `dial` entry
/// point so front-ends never branch on egress group themselves.
#[derive(Clone)]
pub struct Dialer {
	pool: PoolSelector,
	tor: TorConfig,
	dial_timeout: Duration,
}

impl Dialer {
	pub fn new(pool: PoolSelector, tor: TorConfig, dial_timeout: Duration) -> Dialer {
		Dialer {
			pool,
			tor,
			dial_timeout,
		}
	}

	pub async fn dial(&self, decision: &Decision, target: &Target) -> Result<TcpStream, DialError> {
		match decision.group {
			RouteGroup::Local => self.dial_direct(target).await,
			RouteGroup::Tor => {
				if !self.tor.enabled {
					return Err(DialError::MissingUpstreamProxy);
				}
				self.dial_via_socks5_addr(&self.tor.socks_address.to_string(), None, None, target)
					.await
			},
			RouteGroup::General => {
				let proxy = self
					.pool
					.select(RouteGroup::General)
					.map_err(|e| DialError::Io(std::io::Error::other(e.to_string())))?
					.ok_or(DialError::MissingUpstreamProxy)?;
				self.dial_via_proxy(&proxy, target).await
			},
			RouteGroup::Upstream => {
				let id = decision.upstream_proxy_id.ok_or(DialError::MissingUpstreamProxy)?;
				let proxy = self
					.pool
					.get(id)
					.map_err(|e| DialError::Io(std::io::Error::other(e.to_string())))?
					.ok_or(DialError::MissingUpstreamProxy)?;
				self.dial_via_proxy(&proxy, target).await
			},
		}
	}

	/// Dials a specific proxy directly, bypassing pool selection — used by
	/// the probe worker, which already knows which row to test and may want
	/// to try a protocol other than the one currently recorded for it
	/// (§4.8.1 self-correction).
	pub async fn dial_with_override(
		&self,
		_decision: &Decision,
		proxy: &Proxy,
		target: &Target,
	) -> Result<TcpStream, DialError> {
		self.dial_via_proxy(proxy, target).await
	}

	async fn dial_direct(&self, target: &Target) -> Result<TcpStream, DialError> {
		let addr = format!("{}:{}", target.host, target.port);
		timeout_connect(self.dial_timeout, &addr).await
	}

	async fn dial_via_proxy(&self, proxy: &Proxy, target: &Target) -> Result<TcpStream, DialError> {
		let proxy_addr = format!("{}:{}", proxy.host, proxy.port);
		match proxy.protocol {
			ProxyProtocol::Socks5 => {
				self.dial_via_socks5_addr(
					&proxy_addr,
					proxy.username.as_deref(),
					proxy.password.as_deref(),
					target,
				)
				.await
			},
			ProxyProtocol::Http | ProxyProtocol::Https => {
				self.dial_via_http_connect_addr(
					&proxy_addr,
					proxy.username.as_deref(),
					proxy.password.as_deref(),
					target,
				)
				.await
			},
		}
	}

	async fn dial_via_socks5_addr(
		&self,
		proxy_addr: &str,
		username: Option<&str>,
		password: Option<&str>,
		target: &Target,
	) -> Result<TcpStream, DialError> {
		let mut stream = timeout_connect(self.dial_timeout, proxy_addr).await?;
		socks5_handshake(&mut stream, username, password, target).await?;
		Ok(stream)
	}

	async fn dial_via_http_connect_addr(
		&self,
		proxy_addr: &str,
		username: Option<&str>,
		password: Option<&str>,
		target: &Target,
	) -> Result<TcpStream, DialError> {
		let mut stream = timeout_connect(self.dial_timeout, proxy_addr).await?;
		http_connect(&mut stream, username, password, target).await?;
		Ok(stream)
	}
}

async fn timeout_connect(dial_timeout: Duration, addr: &str) -> Result<TcpStream, DialError> {
	tokio::time::timeout(dial_timeout, TcpStream::connect(addr))
		.await
		.map_err(|_| DialError::Timeout)?
		.map_err(|e| match e.kind() {
			std::io::ErrorKind::ConnectionRefused => DialError::Refused,
			_ => DialError::Io(e),
		})
}

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_CMD_CONNECT: u8 = 0x01;
const SOCKS5_RSV: u8 = 0x00;
const SOCKS5_ATYP_IPV4: u8 = 0x01;
const SOCKS5_ATYP_DOMAIN: u8 = 0x03;
const SOCKS5_ATYP_IPV6: u8 = 0x04;
const SOCKS5_AUTH_NONE: u8 = 0x00;
const SOCKS5_AUTH_PASSWORD: u8 = 0x02;
const SOCKS5_AUTH_NO_ACCEPTABLE: u8 = 0xFF;

/// Byte-exact RFC 1928 (+ RFC 1929 for password auth) client handshake
/// against an upstream SOCKS5 proxy (§4.5.1):
///   1. method negotiation — offer no-auth, and password auth if
///      credentials are configured
///   2. optional username/password subnegotiation
///   3. CONNECT request with the target encoded by whichever ATYP variant
///      fits (domain name passed through unresolved, IPv4/IPv6 otherwise)
///   4. a full reply is read and its BND.ADDR/BND.PORT bytes drained even
///      though this gateway only forwards bytes and ignores the bound
///      address
async fn socks5_handshake(
	stream: &mut TcpStream,
	username: Option<&str>,
	password: Option<&str>,
	target: &Target,
) -> Result<(), DialError> {
	let want_password_auth = username.is_some() && password.is_some();

	let methods: &[u8] = if want_password_auth {
		&[SOCKS5_AUTH_NONE, SOCKS5_AUTH_PASSWORD]
	} else {
		&[SOCKS5_AUTH_NONE]
	};
	let mut greeting = Vec::with_capacity(2 + methods.len());
	greeting.push(SOCKS5_VERSION);
	greeting.push(methods.len() as u8);
	greeting.extend_from_slice(methods);
	stream.write_all(&greeting).await?;

	let mut reply = [0u8; 2];
	stream.read_exact(&mut reply).await?;
	if reply[0] != SOCKS5_VERSION {
		return Err(DialError::Socks5Handshake(format!(
			"unexpected version byte {:#x}",
			reply[0]
		)));
	}
	match reply[1] {
		SOCKS5_AUTH_NONE => {},
		SOCKS5_AUTH_PASSWORD if want_password_auth => {
			authenticate_password(stream, username.unwrap(), password.unwrap()).await?;
		},
		SOCKS5_AUTH_NO_ACCEPTABLE => {
			return Err(DialError::Socks5Handshake("no acceptable auth method".into()));
		},
		other => {
			return Err(DialError::Socks5Handshake(format!(
				"server selected unsupported method {other:#x}"
			)));
		},
	}

	let mut request = vec![SOCKS5_VERSION, SOCKS5_CMD_CONNECT, SOCKS5_RSV];
	encode_address(&mut request, &target.host, target.port);
	stream.write_all(&request).await?;

	let mut header = [0u8; 4];
	stream.read_exact(&mut header).await?;
	if header[0] != SOCKS5_VERSION {
		return Err(DialError::Socks5Handshake(format!(
			"unexpected reply version {:#x}",
			header[0]
		)));
	}
	let reply_code = header[1];
	let atyp = header[3];

	let bound_addr_len = match atyp {
		SOCKS5_ATYP_IPV4 => 4,
		SOCKS5_ATYP_IPV6 => 16,
		SOCKS5_ATYP_DOMAIN => {
			let mut len_byte = [0u8; 1];
			stream.read_exact(&mut len_byte).await?;
			len_byte[0] as usize
		},
		other => {
			return Err(DialError::Socks5Handshake(format!(
				"unsupported reply address type {other:#x}"
			)));
		},
	};
	let mut bound_addr = vec![0u8; bound_addr_len + 2];
	stream.read_exact(&mut bound_addr).await?;

	if reply_code != 0x00 {
		return Err(DialError::Socks5Handshake(format!(
			"server rejected CONNECT with reply code {reply_code:#x}"
		)));
	}
	Ok(())
}

async fn authenticate_password(
	stream: &mut TcpStream,
	username: &str,
	password: &str,
) -> Result<(), DialError> {
	if username.len() > 255 || password.len() > 255 {
		return Err(DialError::Socks5Handshake(
			"username/password exceed 255 bytes".into(),
		));
	}
	let mut req = Vec::with_capacity(3 + username.len() + password.len());
	req.push(0x01);
	req.push(username.len() as u8);
	req.extend_from_slice(username.as_bytes());
	req.push(password.len() as u8);
	req.extend_from_slice(password.as_bytes());
	stream.write_all(&req).await?;

	let mut reply = [0u8; 2];
	stream.read_exact(&mut reply).await?;
	if reply[1] != 0x00 {
		return Err(DialError::Socks5Handshake("password authentication failed".into()));
	}
	Ok(())
}

fn encode_address(buf: &mut Vec<u8>, host: &str, port: u16) {
	if let Ok(IpAddr::V4(v4)) = host.parse::<IpAddr>() {
		buf.push(SOCKS5_ATYP_IPV4);
		buf.extend_from_slice(&v4.octets());
	} else if let Ok(IpAddr::V6(v6)) = host.parse::<IpAddr>() {
		buf.push(SOCKS5_ATYP_IPV6);
		buf.extend_from_slice(&v6.octets());
	} else {
		buf.push(SOCKS5_ATYP_DOMAIN);
		buf.push(host.len() as u8);
		buf.extend_from_slice(host.as_bytes());
	}
	buf.extend_from_slice(&port.to_be_bytes());
}

/// HTTP CONNECT tunnelling against an upstream HTTP(S) proxy (§4.5.2): send
/// a `CONNECT host:port HTTP/1.1` request and read status-line-terminated
/// headers until the blank line, treating any 2xx status as success.
async fn http_connect(
	stream: &mut TcpStream,
	username: Option<&str>,
	password: Option<&str>,
	target: &Target,
) -> Result<(), DialError> {
	let auth_header = match (username, password) {
		(Some(u), Some(p)) => format!("Proxy-Authorization: {}\r\n", basic_auth_header(u, p)),
		_ => String::new(),
	};
	let request = format!(
		"CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n{auth_header}\r\n",
		host = target.host,
		port = target.port,
	);
	stream.write_all(request.as_bytes()).await?;

	let mut buf = Vec::new();
	let mut chunk = [0u8; 512];
	loop {
		let n = stream.read(&mut chunk).await?;
		if n == 0 {
			return Err(DialError::ConnectNonSuccess("connection closed before headers completed".into()));
		}
		buf.extend_from_slice(&chunk[..n]);
		if buf.windows(4).any(|w| w == b"\r\n\r\n") {
			break;
		}
		if buf.len() > 64 * 1024 {
			return Err(DialError::ConnectNonSuccess("CONNECT response headers too large".into()));
		}
	}

	let status_line = buf
		.split(|&b| b == b'\n')
		.next()
		.ok_or_else(|| DialError::ConnectNonSuccess("empty response".into()))?;
	let status_line = String::from_utf8_lossy(status_line);
	let status_code = status_line
		.split_whitespace()
		.nth(1)
		.and_then(|code| code.parse::<u16>().ok())
		.ok_or_else(|| DialError::ConnectNonSuccess(status_line.trim().to_string()))?;

	if !(200..300).contains(&status_code) {
		return Err(DialError::ConnectNonSuccess(status_line.trim().to_string()));
	}
	Ok(())
}

/// Minimal helper retained for proxies that carry literal basic-auth
/// credentials in a connection URL (not used by the SOCKS5/CONNECT paths
/// above, which authenticate per-protocol, but shared by the probe worker
/// when validating HTTP proxies that require auth headers).
pub fn basic_auth_header(username: &str, password: &str) -> String {
	format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_ipv4_target() {
		let mut buf = Vec::new();
		encode_address(&mut buf, "127.0.0.1", 443);
		assert_eq!(buf, vec![SOCKS5_ATYP_IPV4, 127, 0, 0, 1, 0x01, 0xBB]);
	}

	#[test]
	fn encodes_domain_target() {
		let mut buf = Vec::new();
		encode_address(&mut buf, "example.com", 80);
		assert_eq!(buf[0], SOCKS5_ATYP_DOMAIN);
		assert_eq!(buf[1], "example.com".len() as u8);
		assert_eq!(&buf[2..2 + 11], b"example.com");
		assert_eq!(&buf[13..], &80u16.to_be_bytes());
	}

	#[test]
	fn encodes_ipv6_target() {
		let mut buf = Vec::new();
		encode_address(&mut buf, "::1", 22);
		assert_eq!(buf[0], SOCKS5_ATYP_IPV6);
		assert_eq!(buf.len(), 1 + 16 + 2);
	}

	#[test]
	fn basic_auth_header_encodes_as_base64() {
		let header = basic_auth_header("user", "pass");
		assert_eq!(header, format!("Basic {}", BASE64.encode("user:pass")));
	}
}
