use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::TorConfig;
use crate::dialer::{Dialer, Target};
use crate::error::GatewayError;
use crate::policy::Decision;
use crate::store::models::RouteGroup;

/// Dials out through the Tor SOCKS5 port to an IP-echo service and returns
/// the exit address observed, for the control API's `/tor/ip` endpoint.
pub async fn current_exit_ip(dialer: &Dialer) -> Result<String, GatewayError> {
	let decision = Decision {
		group: RouteGroup::Tor,
		upstream_proxy_id: None,
		matched_route_id: 0,
	};
	let target = Target {
		host: "icanhazip.com".to_string(),
		port: 80,
	};

	let mut stream = dialer.dial(&decision, &target).await.map_err(GatewayError::Dial)?;
	stream
		.write_all(b"GET / HTTP/1.1\r\nHost: icanhazip.com\r\nConnection: close\r\n\r\n")
		.await
		.map_err(GatewayError::Transport)?;

	let mut buf = Vec::new();
	stream.read_to_end(&mut buf).await.map_err(GatewayError::Transport)?;
	let text = String::from_utf8_lossy(&buf);
	let body = text
		.split("\r\n\r\n")
		.nth(1)
		.ok_or_else(|| GatewayError::Probe("malformed response from exit check".into()))?;
	Ok(body.trim().to_string())
}

/// Requests a new Tor circuit via the control port (`SIGNAL NEWNYM`).
/// Requires `tor.control_address` to be configured; password authentication
/// is used when `tor.control_password` is set, otherwise an empty
/// `AUTHENTICATE` is attempted (works only when the control port has no
/// authentication configured).
pub async fn new_circuit(tor: &TorConfig) -> Result<(), GatewayError> {
	let control_address = tor
		.control_address
		.ok_or_else(|| GatewayError::Config("tor.control_address is not configured".into()))?;

	let mut stream = TcpStream::connect(control_address)
		.await
		.map_err(GatewayError::Transport)?;

	let auth_command = match &tor.control_password {
		Some(password) => format!("AUTHENTICATE \"{password}\"\r\n"),
		None => "AUTHENTICATE\r\n".to_string(),
	};
	send_command(&mut stream, &auth_command).await?;

	send_command(&mut stream, "SIGNAL NEWNYM\r\n").await?;
	Ok(())
}

async fn send_command(stream: &mut TcpStream, command: &str) -> Result<(), GatewayError> {
	stream.write_all(command.as_bytes()).await.map_err(GatewayError::Transport)?;

	let mut buf = vec![0u8; 512];
	let n = stream.read(&mut buf).await.map_err(GatewayError::Transport)?;
	let response = String::from_utf8_lossy(&buf[..n]);
	if !response.starts_with("250") {
		return Err(GatewayError::Probe(format!(
			"tor control command rejected: {}",
			response.trim()
		)));
	}
	Ok(())
}
