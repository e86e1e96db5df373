use std::net::IpAddr;

use ipnet::IpNet;

use crate::store::Store;

/// Evaluates inbound-client allow/deny decisions against the persisted
/// subnet list (§4.2). An empty ACL denies everyone: the operator must
/// explicitly allow at least one subnet before any front-end accepts
/// connections from it.
#[derive(Clone)]
pub struct Acl {
	store: Store,
}

impl Acl {
	pub fn new(store: Store) -> Acl {
		Acl { store }
	}

	pub fn is_allowed(&self, addr: IpAddr) -> bool {
		match self.store.list_acl_subnets() {
			Ok(subnets) => subnets.iter().any(|s| match s.cidr.parse::<IpNet>() {
				Ok(net) => net.contains(&addr),
				Err(_) => false,
			}),
			Err(e) => {
				tracing::error!(error = %e, "failed to load ACL subnets, denying by default");
				false
			},
		}
	}
}

/// Client address resolution for the control API, preferring proxy headers
/// over the socket peer so the API is usable behind a LAN reverse proxy,
/// falling back to the raw peer address (§4.2 client identification).
pub fn client_ip_from_headers(
	forwarded_for: Option<&str>,
	real_ip: Option<&str>,
	peer: IpAddr,
) -> IpAddr {
	if let Some(xff) = forwarded_for {
		if let Some(first) = xff.split(',').next() {
			if let Ok(ip) = first.trim().parse::<IpAddr>() {
				return ip;
			}
		}
	}
	if let Some(real) = real_ip {
		if let Ok(ip) = real.trim().parse::<IpAddr>() {
			return ip;
		}
	}
	peer
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;
	use std::net::Ipv4Addr;

	#[test]
	fn empty_acl_denies_everyone() {
		let acl = Acl::new(open_memory());
		assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))));
	}

	#[test]
	fn matching_subnet_allows() {
		let store = open_memory();
		store.insert_acl_subnet("192.168.1.0/24", None).unwrap();
		let acl = Acl::new(store);
		assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5))));
		assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5))));
	}

	#[test]
	fn xff_takes_precedence_over_peer() {
		let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
		let resolved = client_ip_from_headers(Some("203.0.113.9, 10.0.0.2"), None, peer);
		assert_eq!(resolved, IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)));
	}

	#[test]
	fn falls_back_to_peer_when_headers_absent() {
		let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
		assert_eq!(client_ip_from_headers(None, None, peer), peer);
	}
}
