use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use gatehouse_core::copy::copy_bidirectional;
use gatehouse_core::drain::DrainWatcher;

use crate::acl::client_ip_from_headers;
use crate::context::GatewayContext;
use crate::dialer::Target;
use crate::error::GatewayError;
use crate::metrics::{ConnectionLabels, OutcomeLabels};

const FRONT_END: &str = "http";

/// Runs the HTTP/HTTPS front-end accept loop (§4.6): plain `CONNECT` tunnels
/// for HTTPS, and absolute-form request forwarding for plain HTTP.
pub async fn serve(
	listener: TcpListener,
	ctx: GatewayContext,
	mut shutdown: watch::Receiver<bool>,
	drain: DrainWatcher,
) {
	loop {
		tokio::select! {
			accepted = listener.accept() => {
				let (stream, peer) = match accepted {
					Ok(pair) => pair,
					Err(e) => {
						tracing::warn!(error = %e, "http accept failed");
						continue;
					}
				};
				let ctx = ctx.clone();
				let watcher = drain.clone();
				tokio::spawn(async move {
					let _watcher = watcher;
					handle_connection(stream, peer, ctx).await;
				});
			}
			_ = shutdown.changed() => {
				if *shutdown.borrow() {
					tracing::info!("http front-end shutting down");
					break;
				}
			}
		}
	}
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: GatewayContext) {
	if let Err(e) = serve_client(stream, &ctx, peer).await {
		tracing::debug!(%peer, error = %e, "http session ended with error");
	}
}

struct Request {
	method: String,
	target: String,
	version: String,
	header_lines: Vec<String>,
}

async fn read_request_head(reader: &mut BufReader<TcpStream>) -> Result<Option<Request>, GatewayError> {
	let mut request_line = String::new();
	let n = reader
		.read_line(&mut request_line)
		.await
		.map_err(GatewayError::Transport)?;
	if n == 0 {
		return Ok(None);
	}
	let mut parts = request_line.trim_end().splitn(3, ' ');
	let method = parts
		.next()
		.ok_or_else(|| malformed("missing method"))?
		.to_string();
	let target = parts
		.next()
		.ok_or_else(|| malformed("missing request target"))?
		.to_string();
	let version = parts.next().unwrap_or("HTTP/1.1").to_string();

	let mut header_lines = Vec::new();
	loop {
		let mut line = String::new();
		let n = reader.read_line(&mut line).await.map_err(GatewayError::Transport)?;
		if n == 0 || line.trim_end() == "" {
			break;
		}
		header_lines.push(line.trim_end().to_string());
	}

	Ok(Some(Request {
		method,
		target,
		version,
		header_lines,
	}))
}

fn malformed(msg: &str) -> GatewayError {
	GatewayError::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string()))
}

async fn serve_client(stream: TcpStream, ctx: &GatewayContext, peer: SocketAddr) -> Result<(), GatewayError> {
	let mut reader = BufReader::new(stream);
	let request = match read_request_head(&mut reader).await? {
		Some(r) => r,
		None => return Ok(()),
	};

	let client_ip = resolve_client_ip(&request, peer);

	if !ctx.acl.is_allowed(client_ip) {
		tracing::debug!(%peer, %client_ip, "http connection rejected by ACL");
		let stream = reader.get_mut();
		let _ = write_empty_status(stream, 403, "Forbidden").await;
		ctx.metrics
			.connection_outcomes
			.get_or_create(&OutcomeLabels {
				front_end: FRONT_END,
				outcome: "acl_deny",
			})
			.inc();
		return Ok(());
	}

	if request.method.eq_ignore_ascii_case("CONNECT") {
		handle_connect(reader, &request, ctx, client_ip).await
	} else {
		handle_forward(reader, &request, ctx, client_ip).await
	}
}

/// Resolves the client address used for ACL and policy decisions (§4.2):
/// `X-Forwarded-For`, else `X-Real-IP`, else the raw TCP peer address.
fn resolve_client_ip(request: &Request, peer: SocketAddr) -> std::net::IpAddr {
	let forwarded_for = find_header(&request.header_lines, "X-Forwarded-For");
	let real_ip = find_header(&request.header_lines, "X-Real-IP");
	client_ip_from_headers(forwarded_for, real_ip, peer.ip())
}

fn find_header<'a>(header_lines: &'a [String], name: &str) -> Option<&'a str> {
	header_lines.iter().find_map(|line| {
		let (key, value) = line.split_once(':')?;
		key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
	})
}

fn parse_host_port(target: &str, default_port: u16) -> Result<Target, GatewayError> {
	if let Some((host, port)) = target.rsplit_once(':') {
		if let Ok(port) = port.parse::<u16>() {
			return Ok(Target {
				host: host.to_string(),
				port,
			});
		}
	}
	Ok(Target {
		host: target.to_string(),
		port: default_port,
	})
}

fn parse_absolute_uri(target: &str) -> Result<(Target, String), GatewayError> {
	let url = url::Url::parse(target).map_err(|_| malformed("invalid absolute-form request target"))?;
	let host = url
		.host_str()
		.ok_or_else(|| malformed("request target missing host"))?
		.to_string();
	let port = url.port_or_known_default().unwrap_or(80);
	let mut path = url.path().to_string();
	if let Some(query) = url.query() {
		path.push('?');
		path.push_str(query);
	}
	Ok((Target { host, port }, path))
}

/// Resolves the forward target for one request (§4.6 step 5): an
/// absolute-form request-URI if present, otherwise a `Host:`-header-derived
/// authority for the common relative-form forward request shape.
fn parse_forward_target(request: &Request) -> Result<(Target, String), GatewayError> {
	if let Ok(parsed) = parse_absolute_uri(&request.target) {
		return Ok(parsed);
	}
	let host_header = find_header(&request.header_lines, "Host")
		.ok_or_else(|| malformed("relative-form request target requires a Host header"))?;
	let target = parse_host_port(host_header, 80)?;
	Ok((target, request.target.clone()))
}

async fn handle_connect(
	mut reader: BufReader<TcpStream>,
	request: &Request,
	ctx: &GatewayContext,
	client_ip: std::net::IpAddr,
) -> Result<(), GatewayError> {
	let target = parse_host_port(&request.target, 443)?;
	let result = route_and_dial(ctx, &target, client_ip, FRONT_END).await;
	match result {
		Ok(mut upstream) => {
			let buffered = reader.buffer().to_vec();
			let stream = reader.get_mut();
			stream
				.write_all(format!("{} 200 Connection Established\r\n\r\n", request.version).as_bytes())
				.await
				.map_err(GatewayError::Transport)?;
			if !buffered.is_empty() {
				upstream.write_all(&buffered).await.map_err(GatewayError::Transport)?;
			}
			copy_with_session_timeout(ctx, stream, &mut upstream).await?;
			Ok(())
		},
		Err(e) => {
			let stream = reader.get_mut();
			let _ = write_status(stream, status_for_error(&e), "Proxy Error").await;
			Err(e)
		},
	}
}

async fn copy_with_session_timeout(
	ctx: &GatewayContext,
	stream: &mut TcpStream,
	upstream: &mut TcpStream,
) -> Result<(), GatewayError> {
	let session_timeout = ctx.read_timeout.max(ctx.write_timeout);
	match tokio::time::timeout(session_timeout, copy_bidirectional(stream, upstream)).await {
		Ok(Ok(_)) => Ok(()),
		Ok(Err(e)) => Err(GatewayError::Transport(e)),
		Err(_) => Err(GatewayError::Transport(std::io::Error::new(
			std::io::ErrorKind::TimedOut,
			"session timeout",
		))),
	}
}

async fn handle_forward(
	mut reader: BufReader<TcpStream>,
	request: &Request,
	ctx: &GatewayContext,
	client_ip: std::net::IpAddr,
) -> Result<(), GatewayError> {
	let (target, path) = parse_forward_target(request)?;
	let result = route_and_dial(ctx, &target, client_ip, FRONT_END).await;

	let mut upstream = match result {
		Ok(upstream) => upstream,
		Err(e) => {
			let stream = reader.get_mut();
			let _ = write_status(stream, status_for_error(&e), "Proxy Error").await;
			return Err(e);
		},
	};

	let mut forwarded = format!("{} {} {}\r\n", request.method, path, request.version);
	for line in &request.header_lines {
		if line.to_ascii_lowercase().starts_with("proxy-connection:") {
			continue;
		}
		forwarded.push_str(line);
		forwarded.push_str("\r\n");
	}
	forwarded.push_str("\r\n");

	upstream
		.write_all(forwarded.as_bytes())
		.await
		.map_err(GatewayError::Transport)?;

	let buffered = reader.buffer().to_vec();
	let stream = reader.get_mut();
	if !buffered.is_empty() {
		upstream.write_all(&buffered).await.map_err(GatewayError::Transport)?;
	}

	copy_with_session_timeout(ctx, stream, &mut upstream).await?;
	Ok(())
}

async fn route_and_dial(
	ctx: &GatewayContext,
	target: &Target,
	client_ip: std::net::IpAddr,
	front_end: &'static str,
) -> Result<TcpStream, GatewayError> {
	let decision = ctx.policy.resolve(client_ip, &target.host)?;

	ctx.metrics
		.connections_total
		.get_or_create(&ConnectionLabels {
			front_end,
			group: group_label(decision.group),
		})
		.inc();

	match ctx.dialer.dial(&decision, target).await {
		Ok(stream) => {
			ctx.metrics
				.connection_outcomes
				.get_or_create(&OutcomeLabels {
					front_end,
					outcome: "dial_ok",
				})
				.inc();
			Ok(stream)
		},
		Err(e) => {
			ctx.metrics
				.connection_outcomes
				.get_or_create(&OutcomeLabels {
					front_end,
					outcome: "dial_failed",
				})
				.inc();
			Err(GatewayError::Dial(e))
		},
	}
}

async fn write_status(stream: &mut TcpStream, code: u16, reason: &str) -> std::io::Result<()> {
	let body = format!("{reason}\n");
	let response = format!(
		"HTTP/1.1 {code} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
		body.len()
	);
	stream.write_all(response.as_bytes()).await
}

/// Writes the byte-exact, bodyless status line §4.1 step 2 requires for the
/// ACL-deny path (`HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n`).
async fn write_empty_status(stream: &mut TcpStream, code: u16, reason: &str) -> std::io::Result<()> {
	let response = format!("HTTP/1.1 {code} {reason}\r\nContent-Length: 0\r\n\r\n");
	stream.write_all(response.as_bytes()).await
}

fn status_for_error(err: &GatewayError) -> u16 {
	match err {
		GatewayError::AclDeny => 403,
		GatewayError::PolicyMiss => 502,
		GatewayError::Dial(_) => 502,
		_ => 500,
	}
}

fn group_label(group: crate::store::models::RouteGroup) -> &'static str {
	use crate::store::models::RouteGroup::*;
	match group {
		Local => "local",
		General => "general",
		Tor => "tor",
		Upstream => "upstream",
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_absolute_uri() {
		let (target, path) = parse_absolute_uri("http://example.com:8080/a/b?q=1").unwrap();
		assert_eq!(target.host, "example.com");
		assert_eq!(target.port, 8080);
		assert_eq!(path, "/a/b?q=1");
	}

	#[test]
	fn parses_connect_authority() {
		let target = parse_host_port("example.com:443", 443).unwrap();
		assert_eq!(target.host, "example.com");
		assert_eq!(target.port, 443);
	}

	#[test]
	fn connect_authority_without_port_uses_default() {
		let target = parse_host_port("example.com", 443).unwrap();
		assert_eq!(target.port, 443);
	}

	#[test]
	fn relative_target_falls_back_to_host_header() {
		let request = Request {
			method: "GET".to_string(),
			target: "/a/b?q=1".to_string(),
			version: "HTTP/1.1".to_string(),
			header_lines: vec!["Host: example.com".to_string()],
		};
		let (target, path) = parse_forward_target(&request).unwrap();
		assert_eq!(target.host, "example.com");
		assert_eq!(target.port, 80);
		assert_eq!(path, "/a/b?q=1");
	}

	#[test]
	fn relative_target_without_host_header_is_rejected() {
		let request = Request {
			method: "GET".to_string(),
			target: "/a/b".to_string(),
			version: "HTTP/1.1".to_string(),
			header_lines: vec![],
		};
		assert!(parse_forward_target(&request).is_err());
	}

	#[test]
	fn resolve_client_ip_prefers_forwarded_header() {
		let peer: SocketAddr = "10.0.0.1:1234".parse().unwrap();
		let request = Request {
			method: "GET".to_string(),
			target: "/".to_string(),
			version: "HTTP/1.1".to_string(),
			header_lines: vec!["X-Forwarded-For: 203.0.113.9, 10.0.0.2".to_string()],
		};
		assert_eq!(resolve_client_ip(&request, peer), "203.0.113.9".parse::<std::net::IpAddr>().unwrap());
	}
}
