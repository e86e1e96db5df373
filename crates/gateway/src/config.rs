use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

const ENV_PREFIX: &str = "GATEHOUSE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
	#[serde(default = "default_http_proxy_addr")]
	pub http_proxy: SocketAddr,
	#[serde(default = "default_socks5_proxy_addr")]
	pub socks5_proxy: SocketAddr,
	#[serde(default = "default_api_addr")]
	pub api: SocketAddr,
}

fn default_http_proxy_addr() -> SocketAddr {
	"0.0.0.0:8080".parse().unwrap()
}
fn default_socks5_proxy_addr() -> SocketAddr {
	"0.0.0.0:1080".parse().unwrap()
}
fn default_api_addr() -> SocketAddr {
	"0.0.0.0:8081".parse().unwrap()
}

impl Default for ListenConfig {
	fn default() -> Self {
		Self {
			http_proxy: default_http_proxy_addr(),
			socks5_proxy: default_socks5_proxy_addr(),
			api: default_api_addr(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
	#[serde(default = "default_dial_ms")]
	pub dial_ms: u64,
	#[serde(default = "default_read_ms")]
	pub read_ms: u64,
	#[serde(default = "default_write_ms")]
	pub write_ms: u64,
}

fn default_dial_ms() -> u64 {
	10_000
}
fn default_read_ms() -> u64 {
	60_000
}
fn default_write_ms() -> u64 {
	60_000
}

impl Default for TimeoutsConfig {
	fn default() -> Self {
		Self {
			dial_ms: default_dial_ms(),
			read_ms: default_read_ms(),
			write_ms: default_write_ms(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_tor_socks_address")]
	pub socks_address: SocketAddr,
	/// Tor control port, used only by the `/tor/new-circuit` endpoint to send
	/// `SIGNAL NEWNYM`. Left unset, that endpoint reports itself unavailable
	/// rather than silently no-op'ing.
	#[serde(default)]
	pub control_address: Option<SocketAddr>,
	#[serde(default)]
	pub control_password: Option<String>,
}

fn default_tor_socks_address() -> SocketAddr {
	"127.0.0.1:9050".parse().unwrap()
}

impl Default for TorConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			socks_address: default_tor_socks_address(),
			control_address: None,
			control_password: None,
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
	Html,
	Raw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
	pub name: String,
	pub url: String,
	#[serde(rename = "type")]
	pub source_type: SourceType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
	#[serde(default)]
	pub enable_general_sources: bool,
	#[serde(default = "default_refresh_interval_sec")]
	pub interval_sec: u64,
	#[serde(default = "default_healthcheck_concurrency")]
	pub healthcheck_concurrency: usize,
	#[serde(default)]
	pub sources: Vec<SourceConfig>,
}

fn default_refresh_interval_sec() -> u64 {
	900
}
fn default_healthcheck_concurrency() -> usize {
	20
}

impl Default for RefreshConfig {
	fn default() -> Self {
		Self {
			enable_general_sources: false,
			interval_sec: default_refresh_interval_sec(),
			healthcheck_concurrency: default_healthcheck_concurrency(),
			sources: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
	#[serde(default = "default_database_path")]
	pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
	PathBuf::from("gatehouse.db")
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		Self {
			path: default_database_path(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub listen: ListenConfig,
	#[serde(default)]
	pub timeouts: TimeoutsConfig,
	#[serde(default)]
	pub tor: TorConfig,
	#[serde(default)]
	pub refresh: RefreshConfig,
	#[serde(default)]
	pub database: DatabaseConfig,
}

impl Config {
	/// Loads configuration from an optional YAML file, then layers environment
	/// overrides on top (fixed `GATEHOUSE_` prefix, e.g. `GATEHOUSE_LISTEN_HTTP_PROXY`).
	pub fn load(path: Option<&Path>) -> Result<Config, GatewayError> {
		let mut cfg: Config = match path {
			Some(p) => {
				let contents = std::fs::read_to_string(p)
					.map_err(|e| GatewayError::Config(format!("reading {}: {e}", p.display())))?;
				serde_yaml::from_str(&contents)
					.map_err(|e| GatewayError::Config(format!("parsing {}: {e}", p.display())))?
			},
			None => Config::default(),
		};

		apply_env_overrides(&mut cfg)?;
		cfg.validate()?;
		Ok(cfg)
	}

	fn validate(&self) -> Result<(), GatewayError> {
		if self.refresh.healthcheck_concurrency == 0 {
			return Err(GatewayError::Config(
				"refresh.healthcheck_concurrency must be >= 1".into(),
			));
		}
		for source in &self.refresh.sources {
			if source.name.is_empty() || source.url.is_empty() {
				return Err(GatewayError::Config(
					"refresh.sources entries require a name and url".into(),
				));
			}
		}
		Ok(())
	}
}

fn env_var<T: FromStr>(key: &str) -> Result<Option<T>, GatewayError> {
	match env::var(format!("{ENV_PREFIX}{key}")) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|_| GatewayError::Config(format!("invalid value for {ENV_PREFIX}{key}: {val}"))),
		Err(_) => Ok(None),
	}
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), GatewayError> {
	if let Some(v) = env_var::<SocketAddr>("LISTEN_HTTP_PROXY")? {
		cfg.listen.http_proxy = v;
	}
	if let Some(v) = env_var::<SocketAddr>("LISTEN_SOCKS5_PROXY")? {
		cfg.listen.socks5_proxy = v;
	}
	if let Some(v) = env_var::<SocketAddr>("LISTEN_API")? {
		cfg.listen.api = v;
	}
	if let Some(v) = env_var::<u64>("TIMEOUTS_DIAL_MS")? {
		cfg.timeouts.dial_ms = v;
	}
	if let Some(v) = env_var::<u64>("TIMEOUTS_READ_MS")? {
		cfg.timeouts.read_ms = v;
	}
	if let Some(v) = env_var::<u64>("TIMEOUTS_WRITE_MS")? {
		cfg.timeouts.write_ms = v;
	}
	if let Some(v) = env_var::<bool>("TOR_ENABLED")? {
		cfg.tor.enabled = v;
	}
	if let Some(v) = env_var::<SocketAddr>("TOR_SOCKS_ADDRESS")? {
		cfg.tor.socks_address = v;
	}
	if let Some(v) = env_var::<SocketAddr>("TOR_CONTROL_ADDRESS")? {
		cfg.tor.control_address = Some(v);
	}
	if let Ok(v) = env::var(format!("{ENV_PREFIX}TOR_CONTROL_PASSWORD")) {
		cfg.tor.control_password = Some(v);
	}
	if let Some(v) = env_var::<bool>("REFRESH_ENABLE_GENERAL_SOURCES")? {
		cfg.refresh.enable_general_sources = v;
	}
	if let Some(v) = env_var::<u64>("REFRESH_INTERVAL_SEC")? {
		cfg.refresh.interval_sec = v;
	}
	if let Some(v) = env_var::<usize>("REFRESH_HEALTHCHECK_CONCURRENCY")? {
		cfg.refresh.healthcheck_concurrency = v;
	}
	if let Some(v) = env_var::<PathBuf>("DATABASE_PATH")? {
		cfg.database.path = v;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_valid() {
		let cfg = Config::default();
		assert!(cfg.validate().is_ok());
		assert_eq!(cfg.listen.http_proxy.port(), 8080);
		assert_eq!(cfg.listen.socks5_proxy.port(), 1080);
		assert_eq!(cfg.listen.api.port(), 8081);
	}

	#[test]
	fn zero_concurrency_is_rejected() {
		let mut cfg = Config::default();
		cfg.refresh.healthcheck_concurrency = 0;
		assert!(cfg.validate().is_err());
	}
}
