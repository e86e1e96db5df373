use std::net::IpAddr;

use crate::error::GatewayError;
use crate::store::Store;
use crate::store::models::{Route, RouteGroup};

/// A routing decision for one (client, target host) pair: which egress group
/// to use, and which concrete upstream proxy if the group is UPSTREAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
	pub group: RouteGroup,
	pub upstream_proxy_id: Option<i64>,
	pub matched_route_id: i64,
}

/// Evaluates enabled routes in precedence order, picking the first one whose
/// optional client CIDR contains the caller and whose optional host glob
/// matches the target (§4.3). Falls through to `PolicyMiss` when no route
/// matches, leaving the caller (front-ends) to decide the default
/// disposition.
#[derive(Clone)]
pub struct Policy {
	store: Store,
}

impl Policy {
	pub fn new(store: Store) -> Policy {
		Policy { store }
	}

	pub fn resolve(&self, client_ip: IpAddr, host: &str) -> Result<Decision, GatewayError> {
		let routes = self.store.list_enabled_routes()?;
		for route in &routes {
			let cidr_ok = match &route.client_cidr {
				None => true,
				Some(cidr) => cidr_contains(cidr, client_ip),
			};
			let host_ok = match &route.host_glob {
				None => true,
				Some(glob) => host_matches(glob, host),
			};
			if cidr_ok && host_ok {
				return Ok(Decision {
					group: route.group,
					upstream_proxy_id: route.upstream_proxy_id,
					matched_route_id: route.id,
				});
			}
		}
		Err(GatewayError::PolicyMiss)
	}

	/// Returns the ordered candidate routes without evaluating them, for the
	/// control API's route listing/debugging surface.
	pub fn routes(&self) -> Result<Vec<Route>, GatewayError> {
		self.store.list_enabled_routes()
	}
}

fn cidr_contains(cidr: &str, ip: IpAddr) -> bool {
	match cidr.parse::<ipnet::IpNet>() {
		Ok(net) => net.contains(&ip),
		Err(_) => false,
	}
}

/// Host-glob grammar (§4.3):
///   `*`            matches any host
///   `*.SUFFIX`     matches subdomains of SUFFIX only (the dot is included;
///                  the bare suffix itself does not match)
///   `PREFIX.*`     matches any single-label extension of PREFIX
///   exact           case-insensitive literal match
fn host_matches(pattern: &str, host: &str) -> bool {
	let pattern = pattern.to_ascii_lowercase();
	let host = host.to_ascii_lowercase();

	if pattern == "*" {
		return true;
	}
	if let Some(suffix) = pattern.strip_prefix("*.") {
		return host.ends_with(&format!(".{suffix}"));
	}
	if let Some(prefix) = pattern.strip_suffix(".*") {
		if let Some(rest) = host.strip_prefix(prefix) {
			return rest.starts_with('.') && rest[1..].find('.').is_none() && !rest[1..].is_empty();
		}
		return false;
	}
	pattern == host
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;
	use std::net::Ipv4Addr;

	const ANY: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));

	#[test]
	fn wildcard_matches_anything() {
		assert!(host_matches("*", "anything.example.com"));
	}

	#[test]
	fn suffix_glob_matches_subdomains_only() {
		assert!(!host_matches("*.example.com", "example.com"));
		assert!(host_matches("*.example.com", "a.example.com"));
		assert!(host_matches("*.example.com", "a.b.example.com"));
		assert!(!host_matches("*.example.com", "notexample.com"));
	}

	#[test]
	fn prefix_glob_matches_single_label_extension() {
		assert!(host_matches("printer.*", "printer.local"));
		assert!(!host_matches("printer.*", "printer.sub.local"));
		assert!(!host_matches("printer.*", "printer"));
	}

	#[test]
	fn exact_pattern_is_case_insensitive() {
		assert!(host_matches("Example.COM", "example.com"));
		assert!(!host_matches("example.com", "other.com"));
	}

	#[test]
	fn lower_precedence_route_wins_on_overlap() {
		let store = open_memory();
		store
			.insert_route(Some("*.example.com"), None, RouteGroup::General, None, 100)
			.unwrap();
		store
			.insert_route(Some("secure.example.com"), None, RouteGroup::Tor, None, 10)
			.unwrap();
		let policy = Policy::new(store);
		let decision = policy.resolve(ANY, "secure.example.com").unwrap();
		assert_eq!(decision.group, RouteGroup::Tor);
	}

	#[test]
	fn no_matching_route_is_policy_miss() {
		let store = open_memory();
		let policy = Policy::new(store);
		assert!(matches!(policy.resolve(ANY, "anything.test"), Err(GatewayError::PolicyMiss)));
	}

	#[test]
	fn client_cidr_constraint_is_enforced() {
		let store = open_memory();
		store
			.insert_route(None, Some("10.0.0.0/24"), RouteGroup::Local, None, 1)
			.unwrap();
		let policy = Policy::new(store);
		assert!(policy.resolve(ANY, "example.com").is_ok());
		let outside = IpAddr::V4(Ipv4Addr::new(10, 0, 1, 5));
		assert!(matches!(policy.resolve(outside, "example.com"), Err(GatewayError::PolicyMiss)));
	}

	#[test]
	fn glob_precedence_scenario() {
		let store = open_memory();
		store
			.insert_route(Some("*.github.com"), None, RouteGroup::Local, None, 10)
			.unwrap();
		store.insert_route(Some("*"), None, RouteGroup::General, None, 100).unwrap();
		let policy = Policy::new(store);
		assert_eq!(policy.resolve(ANY, "api.github.com").unwrap().group, RouteGroup::Local);
		assert_eq!(policy.resolve(ANY, "example.org").unwrap().group, RouteGroup::General);
	}
}
