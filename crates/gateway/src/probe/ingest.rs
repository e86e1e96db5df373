use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{SourceConfig, SourceType};
use crate::error::GatewayError;
use crate::store::Store;
use crate::store::models::{ProxyProtocol, RouteGroup};

/// A candidate proxy pulled out of an ingest source, not yet known to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
	pub host: String,
	pub port: u16,
	pub protocol: ProxyProtocol,
}

/// Fetches a single configured source and inserts any newly discovered
/// proxies into the GENERAL pool (§4.8, ingest phase). Returns the number of
/// proxies newly added (already-known entries are a no-op, per the
/// idempotent-import property).
pub async fn ingest_source(
	client: &reqwest::Client,
	store: &Store,
	source: &SourceConfig,
) -> Result<usize, GatewayError> {
	let body = client
		.get(&source.url)
		.header("User-Agent", BROWSER_USER_AGENT)
		.send()
		.await
		.map_err(|e| GatewayError::Probe(format!("{}: fetch failed: {e}", source.name)))?
		.text()
		.await
		.map_err(|e| GatewayError::Probe(format!("{}: body read failed: {e}", source.name)))?;

	let candidates = match source.source_type {
		SourceType::Raw => parse_raw_list(&body),
		SourceType::Html => parse_html_list(&body),
	};

	let mut added = 0;
	for candidate in candidates {
		if store.insert_proxy_if_absent(
			&candidate.host,
			candidate.port,
			candidate.protocol,
			RouteGroup::General,
			Some(&source.name),
		)? {
			added += 1;
		}
	}
	tracing::info!(source = %source.name, added, "ingest completed");
	Ok(added)
}

const BROWSER_USER_AGENT: &str =
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static IPV4_PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{1,3}(\.\d{1,3}){3}:\d{2,5}").unwrap());

/// Parses one candidate per line (§4.8 raw rules). Recognizes `scheme://ip:port`
/// (scheme in socks5/http/https) and bare `ip:port`, defaulting to socks5.
/// Blank lines and `#` comments are skipped.
pub fn parse_raw_list(body: &str) -> Vec<Candidate> {
	body.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.filter_map(parse_raw_line)
		.collect()
}

fn parse_raw_line(line: &str) -> Option<Candidate> {
	if let Some((scheme, rest)) = line.split_once("://") {
		let protocol = match scheme {
			"socks5" => ProxyProtocol::Socks5,
			"http" => ProxyProtocol::Http,
			"https" => ProxyProtocol::Https,
			_ => return None,
		};
		let (host, port) = parse_host_port(rest)?;
		return Some(Candidate { host, port, protocol });
	}
	let (host, port) = parse_host_port(line)?;
	Some(Candidate {
		host,
		port,
		protocol: ProxyProtocol::Socks5,
	})
}

/// Scans the body for `ip:port` tokens (§4.8 html rules). Defaults to socks5;
/// the ingest worker's validation sweep corrects the protocol if wrong.
pub fn parse_html_list(body: &str) -> Vec<Candidate> {
	IPV4_PORT_RE
		.find_iter(body)
		.filter_map(|m| parse_host_port(m.as_str()))
		.map(|(host, port)| Candidate {
			host,
			port,
			protocol: ProxyProtocol::Socks5,
		})
		.collect()
}

fn parse_host_port(text: &str) -> Option<(String, u16)> {
	let (host, port) = text.rsplit_once(':')?;
	let host = host.trim();
	let port: u16 = port.trim().parse().ok()?;
	if port == 0 || !is_valid_ipv4(host) {
		return None;
	}
	Some((host.to_string(), port))
}

fn is_valid_ipv4(host: &str) -> bool {
	let parts: Vec<&str> = host.split('.').collect();
	parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok() && (p.len() == 1 || !p.starts_with('0')))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_list_skips_comments_and_blanks() {
		let body = "# header\n1.2.3.4:8080\n\nsocks5://5.6.7.8:1080\n";
		let parsed = parse_raw_list(body);
		assert_eq!(
			parsed,
			vec![
				Candidate {
					host: "1.2.3.4".into(),
					port: 8080,
					protocol: ProxyProtocol::Socks5
				},
				Candidate {
					host: "5.6.7.8".into(),
					port: 1080,
					protocol: ProxyProtocol::Socks5
				},
			]
		);
	}

	#[test]
	fn raw_list_recognizes_scheme_prefix() {
		let body = "http://9.9.9.9:3128\nhttps://1.1.1.1:8443\n";
		let parsed = parse_raw_list(body);
		assert_eq!(parsed[0].protocol, ProxyProtocol::Http);
		assert_eq!(parsed[1].protocol, ProxyProtocol::Https);
	}

	#[test]
	fn html_list_extracts_ip_port_tokens() {
		let body = "<table><tr><td>1.2.3.4:8080</td><td>US</td></tr></table>";
		let parsed = parse_html_list(body);
		assert_eq!(
			parsed,
			vec![Candidate {
				host: "1.2.3.4".into(),
				port: 8080,
				protocol: ProxyProtocol::Socks5
			}]
		);
	}

	#[test]
	fn malformed_entries_are_skipped() {
		assert_eq!(parse_host_port("not-a-proxy"), None);
		assert_eq!(parse_host_port("host:notaport"), None);
		assert_eq!(parse_host_port("999.1.1.1:80"), None);
		assert_eq!(parse_host_port("1.2.3.4:0"), None);
	}
}
