use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Egress group a proxy or route belongs to (§3 Data Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteGroup {
	Local,
	General,
	Tor,
	Upstream,
}

impl RouteGroup {
	pub fn as_str(&self) -> &'static str {
		match self {
			RouteGroup::Local => "local",
			RouteGroup::General => "general",
			RouteGroup::Tor => "tor",
			RouteGroup::Upstream => "upstream",
		}
	}
}

impl std::str::FromStr for RouteGroup {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"local" => Ok(RouteGroup::Local),
			"general" => Ok(RouteGroup::General),
			"tor" => Ok(RouteGroup::Tor),
			"upstream" => Ok(RouteGroup::Upstream),
			other => Err(format!("unknown route group: {other}")),
		}
	}
}

/// Wire protocol a pooled proxy speaks (§3: protocol ∈ {socks5, http, https}).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
	Http,
	Https,
	Socks5,
}

impl ProxyProtocol {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProxyProtocol::Http => "http",
			ProxyProtocol::Https => "https",
			ProxyProtocol::Socks5 => "socks5",
		}
	}

	/// The other protocol, used by the probe worker's self-correction pass
	/// (§4.8.1: the alternate of socks5 is http, and vice versa; https
	/// dials identically to http so it maps to the same alternate).
	pub fn other(&self) -> ProxyProtocol {
		match self {
			ProxyProtocol::Http | ProxyProtocol::Https => ProxyProtocol::Socks5,
			ProxyProtocol::Socks5 => ProxyProtocol::Http,
		}
	}
}

impl std::str::FromStr for ProxyProtocol {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"http" => Ok(ProxyProtocol::Http),
			"https" => Ok(ProxyProtocol::Https),
			"socks5" => Ok(ProxyProtocol::Socks5),
			other => Err(format!("unknown proxy protocol: {other}")),
		}
	}
}

/// A pooled egress proxy (GENERAL or UPSTREAM group member).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
	pub id: i64,
	pub host: String,
	pub port: u16,
	pub protocol: ProxyProtocol,
	pub username: Option<String>,
	pub password: Option<String>,
	pub group: RouteGroup,
	pub working: bool,
	pub latency_ms: Option<u32>,
	pub last_tested: Option<i64>,
	/// Unknown (`None`) means persistent; a `Some` value in the past makes the
	/// row ineligible for pool selection (§4.4).
	pub expiry: Option<i64>,
	pub last_error: Option<String>,
	pub source: Option<String>,
	pub created_at: i64,
}

/// A policy routing rule matching an optional client CIDR and an optional
/// host glob to an egress group (§4.3). Either constraint may be absent, in
/// which case it is treated as always-matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
	pub id: i64,
	pub host_glob: Option<String>,
	pub client_cidr: Option<String>,
	pub group: RouteGroup,
	pub upstream_proxy_id: Option<i64>,
	/// Integer priority; lower wins (§4.3, GLOSSARY).
	pub precedence: i64,
	pub enabled: bool,
}

/// An allow-listed client subnet (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclSubnet {
	pub id: i64,
	pub cidr: String,
	pub description: Option<String>,
	pub created_at: i64,
}

/// A single persisted key/value setting row (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
	pub key: String,
	pub value: String,
}

/// Client identity resolved for an inbound connection, used by the ACL and
/// audit logging.
#[derive(Debug, Clone, Copy)]
pub struct ClientId {
	pub addr: IpAddr,
}
