use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use gatehouse_core::copy::copy_bidirectional;
use gatehouse_core::drain::DrainWatcher;

use crate::context::GatewayContext;
use crate::dialer::Target;
use crate::error::{DialError, GatewayError};
use crate::metrics::{ConnectionLabels, OutcomeLabels};

const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const AUTH_NONE: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const REP_SUCCESS: u8 = 0x00;
const REP_GENERAL_FAILURE: u8 = 0x01;
const REP_NOT_ALLOWED: u8 = 0x02;
const REP_HOST_UNREACHABLE: u8 = 0x04;
const REP_CONNECTION_REFUSED: u8 = 0x05;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

const FRONT_END: &str = "socks5";

/// Runs the SOCKS5 front-end accept loop (§4.7) until `shutdown` flips true.
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
						tracing::warn!(error = %e, "socks5 accept failed");
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
					tracing::info!("socks5 front-end shutting down");
					break;
				}
			}
		}
	}
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: GatewayContext) {
	if let Err(e) = serve_client(&mut stream, &ctx, peer.ip()).await {
		tracing::debug!(%peer, error = %e, "socks5 session ended with error");
	}
}

/// Performs the server side of the SOCKS5 handshake (§4.5.1/§4.7), then
/// applies the ACL to the resolved client IP — refusing with reply code 2
/// (connection not allowed) rather than failing the method negotiation, so a
/// denied client still receives a well-formed SOCKS5 reply.
async fn serve_client(
	stream: &mut TcpStream,
	ctx: &GatewayContext,
	client_ip: std::net::IpAddr,
) -> Result<(), GatewayError> {
	negotiate_auth(stream).await?;
	let target = read_connect_request(stream).await?;

	if !ctx.acl.is_allowed(client_ip) {
		tracing::debug!(%client_ip, "socks5 connection rejected by ACL");
		write_reply(stream, REP_NOT_ALLOWED).await?;
		ctx.metrics
			.connection_outcomes
			.get_or_create(&OutcomeLabels {
				front_end: FRONT_END,
				outcome: "acl_deny",
			})
			.inc();
		return Err(GatewayError::AclDeny);
	}

	let decision = match ctx.policy.resolve(client_ip, &target.host) {
		Ok(d) => d,
		Err(e) => {
			write_reply(stream, REP_GENERAL_FAILURE).await?;
			return Err(e);
		},
	};

	ctx.metrics
		.connections_total
		.get_or_create(&ConnectionLabels {
			front_end: FRONT_END,
			group: group_label(decision.group),
		})
		.inc();
	let active = ctx.metrics.connections_active.get_or_create(&ConnectionLabels {
		front_end: FRONT_END,
		group: group_label(decision.group),
	});
	active.inc();

	let dial_result = ctx.dialer.dial(&decision, &target).await;
	let mut upstream = match dial_result {
		Ok(upstream) => upstream,
		Err(e) => {
			active.dec();
			write_reply(stream, reply_code_for_dial_error(&e)).await?;
			ctx.metrics
				.connection_outcomes
				.get_or_create(&OutcomeLabels {
					front_end: FRONT_END,
					outcome: "dial_failed",
				})
				.inc();
			return Err(GatewayError::Dial(e));
		},
	};

	write_reply(stream, REP_SUCCESS).await?;

	let session_timeout = ctx.read_timeout.max(ctx.write_timeout);
	let result = match tokio::time::timeout(session_timeout, copy_bidirectional(stream, &mut upstream)).await {
		Ok(r) => r,
		Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "session timeout")),
	};
	active.dec();
	ctx.metrics
		.connection_outcomes
		.get_or_create(&OutcomeLabels {
			front_end: FRONT_END,
			outcome: if result.is_ok() { "closed" } else { "io_error" },
		})
		.inc();
	result.map_err(|e| GatewayError::Transport(e)).map(|_| ())
}

async fn negotiate_auth(stream: &mut TcpStream) -> Result<(), GatewayError> {
	let mut header = [0u8; 2];
	stream.read_exact(&mut header).await.map_err(DialError::Io)?;
	if header[0] != SOCKS5_VERSION {
		return Err(GatewayError::Transport(std::io::Error::new(
			std::io::ErrorKind::InvalidData,
			"unsupported SOCKS version",
		)));
	}
	let nmethods = header[1] as usize;
	let mut methods = vec![0u8; nmethods];
	stream.read_exact(&mut methods).await.map_err(DialError::Io)?;

	if !methods.contains(&AUTH_NONE) {
		stream
			.write_all(&[SOCKS5_VERSION, AUTH_NO_ACCEPTABLE])
			.await
			.map_err(DialError::Io)?;
		return Err(GatewayError::AclDeny);
	}
	stream
		.write_all(&[SOCKS5_VERSION, AUTH_NONE])
		.await
		.map_err(DialError::Io)?;
	Ok(())
}

async fn read_connect_request(stream: &mut TcpStream) -> Result<Target, GatewayError> {
	let mut header = [0u8; 4];
	stream.read_exact(&mut header).await.map_err(DialError::Io)?;
	if header[0] != SOCKS5_VERSION {
		return Err(GatewayError::Transport(std::io::Error::new(
			std::io::ErrorKind::InvalidData,
			"unsupported SOCKS version in request",
		)));
	}
	if header[1] != CMD_CONNECT {
		write_reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
		return Err(GatewayError::Transport(std::io::Error::new(
			std::io::ErrorKind::Unsupported,
			"only CONNECT is supported",
		)));
	}

	let host = match header[3] {
		ATYP_IPV4 => {
			let mut octets = [0u8; 4];
			stream.read_exact(&mut octets).await.map_err(DialError::Io)?;
			IpAddr::V4(Ipv4Addr::from(octets)).to_string()
		},
		ATYP_IPV6 => {
			let mut octets = [0u8; 16];
			stream.read_exact(&mut octets).await.map_err(DialError::Io)?;
			IpAddr::from(octets).to_string()
		},
		ATYP_DOMAIN => {
			let mut len = [0u8; 1];
			stream.read_exact(&mut len).await.map_err(DialError::Io)?;
			let mut buf = vec![0u8; len[0] as usize];
			stream.read_exact(&mut buf).await.map_err(DialError::Io)?;
			String::from_utf8(buf)
				.map_err(|_| GatewayError::Transport(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid domain bytes")))?
		},
		other => {
			write_reply(stream, REP_COMMAND_NOT_SUPPORTED).await?;
			return Err(GatewayError::Transport(std::io::Error::new(
				std::io::ErrorKind::Unsupported,
				format!("unsupported address type {other:#x}"),
			)));
		},
	};

	let mut port_bytes = [0u8; 2];
	stream.read_exact(&mut port_bytes).await.map_err(DialError::Io)?;
	let port = u16::from_be_bytes(port_bytes);

	Ok(Target { host, port })
}

async fn write_reply(stream: &mut TcpStream, code: u8) -> Result<(), GatewayError> {
	let reply = [
		SOCKS5_VERSION,
		code,
		0x00,
		ATYP_IPV4,
		0,
		0,
		0,
		0,
		0,
		0,
	];
	stream.write_all(&reply).await.map_err(DialError::Io)?;
	Ok(())
}

fn reply_code_for_dial_error(err: &DialError) -> u8 {
	match err {
		DialError::Timeout => REP_HOST_UNREACHABLE,
		DialError::Refused => REP_CONNECTION_REFUSED,
		DialError::UnresolvableTarget => REP_HOST_UNREACHABLE,
		DialError::MissingUpstreamProxy => REP_GENERAL_FAILURE,
		DialError::Socks5Handshake(_) | DialError::ConnectNonSuccess(_) | DialError::Io(_) => {
			REP_GENERAL_FAILURE
		},
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
