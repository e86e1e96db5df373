use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;

use crate::error::{DialError, GatewayError};
use crate::store::Store;
use crate::store::models::{Proxy, ProxyProtocol, RouteGroup};
use crate::store::proxies::ProbeResult;

/// Plain-HTTP endpoint that echoes the caller's IP as a single line of ASCII
/// text (§4.8.1, §6). Kept as a configuration constant rather than read from
/// config because it matches the historical value this worker has always
/// used.
const PROBE_URL: &str = "http://icanhazip.com";
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(3600);

const BROWSER_USER_AGENT: &str =
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A proxy needs (re-)validation when it isn't known to work, has never been
/// tested, or was last tested over an hour ago (§4.8 validation job).
fn needs_validation(proxy: &Proxy, now: i64) -> bool {
	if !proxy.working {
		return true;
	}
	match proxy.last_tested {
		None => true,
		Some(last) => now.saturating_sub(last) as u64 > STALE_AFTER.as_secs(),
	}
}

/// Validates proxies in a group that need (re-)validation, up to
/// `concurrency` simultaneous probes (§4.8.1). Probing is concurrent, but the
/// sweep's results are written back together in a single transaction once
/// every probe has completed (§4.8: "results are written back in one
/// transaction"), so a crash mid-sweep leaves the prior sweep's data intact
/// rather than a half-updated batch.
pub async fn validate_group(
	store: &Store,
	group: RouteGroup,
	concurrency: usize,
) -> Result<(), GatewayError> {
	let now = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0);
	let proxies: Vec<Proxy> = store
		.list_proxies(Some(group))?
		.into_iter()
		.filter(|p| needs_validation(p, now))
		.collect();
	let total = proxies.len();
	let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

	let mut handles = Vec::with_capacity(total);
	for proxy in proxies {
		let semaphore = semaphore.clone();
		handles.push(tokio::spawn(async move {
			let _permit = semaphore.acquire_owned().await;
			probe_one(&proxy).await
		}));
	}

	let mut results = Vec::with_capacity(total);
	let mut working = 0usize;
	for handle in handles {
		match handle.await {
			Ok(result) => {
				if result.working {
					working += 1;
				}
				results.push(result);
				report_progress(results.len(), total, working);
			},
			Err(e) => tracing::warn!(error = %e, "probe task panicked"),
		}
	}

	store.record_probe_results(&results)?;
	Ok(())
}

/// Emits the periodic progress line §4.8.1 mandates: a textual bar,
/// current/total count, number of working, and percentage.
fn report_progress(done: usize, total: usize, working: usize) {
	if total == 0 {
		return;
	}
	let pct = (done * 100) / total;
	let filled = pct / 5;
	let bar: String = "#".repeat(filled) + &"-".repeat(20usize.saturating_sub(filled));
	tracing::info!("[{bar}] {done}/{total} working={working} ({pct}%)");
}

/// Probes a single proxy, trying its recorded protocol first and the other
/// protocol second (self-correction for misclassified proxies). Returns the
/// outcome to record — whichever protocol succeeded, or the original
/// protocol marked not-working with a stable error message if neither did.
/// Does not touch the store: the caller batches every sweep's outcomes into
/// one write.
async fn probe_one(proxy: &Proxy) -> ProbeResult {
	let attempt_order = [proxy.protocol, proxy.protocol.other()];
	let mut last_failure: Option<DialError> = None;
	for (attempt, protocol) in attempt_order.into_iter().enumerate() {
		let started = Instant::now();
		match try_probe(proxy, protocol).await {
			Ok(outcome) => {
				let latency = started.elapsed();
				if let Some(ip) = outcome.echoed_ip.as_deref() {
					tracing::debug!(proxy_id = proxy.id, echoed_ip = ip, "probe echoed caller IP");
				}
				if attempt == 1 {
					tracing::info!(
						proxy_id = proxy.id,
						from = proxy.protocol.as_str(),
						to = protocol.as_str(),
						"proxy protocol self-corrected"
					);
				}
				tracing::debug!(proxy_id = proxy.id, protocol = protocol.as_str(), latency_ms = latency.as_millis(), "proxy validated");
				return ProbeResult {
					proxy_id: proxy.id,
					working: true,
					latency_ms: Some(latency.as_millis() as u32),
					protocol,
					last_error: None,
				};
			},
			Err(e) => {
				if attempt == 0 {
					last_failure = Some(e);
				}
			},
		}
	}

	let message = last_failure.as_ref().map(stable_error_message);
	ProbeResult {
		proxy_id: proxy.id,
		working: false,
		latency_ms: None,
		protocol: proxy.protocol,
		last_error: message,
	}
}

struct ProbeOutcome {
	echoed_ip: Option<String>,
}

/// Runs step 1-2 of §4.8.1 against one protocol: builds an HTTP client bound
/// to `protocol://ip:port` and GETs the probe URL with a 10s timeout and
/// browser-like headers. A status in `[200, 500)` is success; anything else,
/// including a transport failure, is reported as a `DialError` so the caller
/// can try the alternate protocol.
async fn try_probe(proxy: &Proxy, protocol: ProxyProtocol) -> Result<ProbeOutcome, DialError> {
	let client = build_probe_client(proxy, protocol)?;

	let response = tokio::time::timeout(PROBE_TIMEOUT, client.get(PROBE_URL).send())
		.await
		.map_err(|_| DialError::Timeout)?
		.map_err(classify_reqwest_error)?;

	let status = response.status();
	if !(200..500).contains(&status.as_u16()) {
		return Err(DialError::ConnectNonSuccess(format!("probe URL returned status {status}")));
	}

	let body = response.text().await.unwrap_or_default();
	let echoed_ip = body.trim().parse::<std::net::IpAddr>().ok().map(|ip| ip.to_string());
	Ok(ProbeOutcome { echoed_ip })
}

fn build_probe_client(proxy: &Proxy, protocol: ProxyProtocol) -> Result<reqwest::Client, DialError> {
	let scheme = match protocol {
		ProxyProtocol::Socks5 => "socks5h",
		ProxyProtocol::Http | ProxyProtocol::Https => "http",
	};
	let proxy_url = format!("{scheme}://{}:{}", proxy.host, proxy.port);
	let mut reqwest_proxy =
		reqwest::Proxy::all(&proxy_url).map_err(|e| DialError::Io(std::io::Error::other(e.to_string())))?;
	if let (Some(username), Some(password)) = (proxy.username.as_deref(), proxy.password.as_deref()) {
		reqwest_proxy = reqwest_proxy.basic_auth(username, password);
	}

	reqwest::Client::builder()
		.proxy(reqwest_proxy)
		.timeout(PROBE_TIMEOUT)
		.user_agent(BROWSER_USER_AGENT)
		.build()
		.map_err(|e| DialError::Io(std::io::Error::other(e.to_string())))
}

fn classify_reqwest_error(err: reqwest::Error) -> DialError {
	if err.is_timeout() {
		return DialError::Timeout;
	}
	let text = err.to_string();
	if text.contains("refused") {
		return DialError::Refused;
	}
	if text.contains("SOCKS") || text.contains("socks") {
		return DialError::Socks5Handshake(text);
	}
	DialError::Io(std::io::Error::other(text))
}

/// Translates a dial failure into the stable human message §4.8.1 mandates,
/// so operators see the same wording regardless of which attempt failed.
fn stable_error_message(err: &DialError) -> String {
	match err {
		DialError::Timeout => format!("Connection to {PROBE_URL} timed out. (connect timeout=10)"),
		DialError::Refused => "Failed to establish a new connection: Connection refused".to_string(),
		DialError::Socks5Handshake(_) => "SOCKS5 proxy server sent invalid data".to_string(),
		DialError::ConnectNonSuccess(detail) => format!("probe request failed: {detail}"),
		DialError::MissingUpstreamProxy => "no upstream proxy configured".to_string(),
		DialError::UnresolvableTarget => "probe target could not be resolved".to_string(),
		DialError::Io(e) => e.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn proxy(working: bool, last_tested: Option<i64>) -> Proxy {
		Proxy {
			id: 1,
			host: "1.2.3.4".into(),
			port: 1080,
			protocol: ProxyProtocol::Socks5,
			username: None,
			password: None,
			group: RouteGroup::General,
			working,
			latency_ms: None,
			last_tested,
			expiry: None,
			last_error: None,
			source: None,
			created_at: 0,
		}
	}

	#[test]
	fn not_working_always_needs_validation() {
		assert!(needs_validation(&proxy(false, Some(1_000_000)), 1_000_000));
	}

	#[test]
	fn never_tested_needs_validation() {
		assert!(needs_validation(&proxy(true, None), 1_000_000));
	}

	#[test]
	fn fresh_result_does_not_need_validation() {
		assert!(!needs_validation(&proxy(true, Some(1_000_000)), 1_000_100));
	}

	#[test]
	fn stale_result_needs_validation() {
		assert!(needs_validation(&proxy(true, Some(0)), 4000));
	}

	#[test]
	fn probe_client_builds_for_each_protocol() {
		let p = proxy(true, None);
		assert!(build_probe_client(&p, ProxyProtocol::Socks5).is_ok());
		assert!(build_probe_client(&p, ProxyProtocol::Http).is_ok());
		assert!(build_probe_client(&p, ProxyProtocol::Https).is_ok());
	}
}
