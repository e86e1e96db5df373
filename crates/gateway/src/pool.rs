use crate::error::GatewayError;
use crate::store::Store;
use crate::store::models::{Proxy, RouteGroup};

/// Picks a working proxy from a pool group (§4.4). Ordering: lowest
/// measured latency first, proxies with no measurement yet sorted last
/// among the working set, ties broken by most-recently tested first so a
/// freshly reconfirmed proxy is preferred over a stale one with the same
/// latency bucket.
#[derive(Clone)]
pub struct PoolSelector {
	store: Store,
}

impl PoolSelector {
	pub fn new(store: Store) -> PoolSelector {
		PoolSelector { store }
	}

	/// Looks up a specific proxy by id, used to realize UPSTREAM routes that
	/// pin a fixed proxy rather than selecting from a pool.
	pub fn get(&self, id: i64) -> Result<Option<Proxy>, GatewayError> {
		self.store.get_proxy(id)
	}

	pub fn select(&self, group: RouteGroup) -> Result<Option<Proxy>, GatewayError> {
		let mut candidates = self.store.list_working_proxies(group)?;
		candidates.sort_by(|a, b| {
			match (a.latency_ms, b.latency_ms) {
				(Some(a_lat), Some(b_lat)) => a_lat.cmp(&b_lat),
				(Some(_), None) => std::cmp::Ordering::Less,
				(None, Some(_)) => std::cmp::Ordering::Greater,
				(None, None) => std::cmp::Ordering::Equal,
			}
			.then_with(|| b.last_tested.unwrap_or(0).cmp(&a.last_tested.unwrap_or(0)))
		});
		Ok(candidates.into_iter().next())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::models::ProxyProtocol;
	use crate::store::tests::open_memory;

	#[test]
	fn prefers_lowest_latency() {
		let store = open_memory();
		store
			.insert_proxy_if_absent("a", 1, ProxyProtocol::Http, RouteGroup::General, None)
			.unwrap();
		store
			.insert_proxy_if_absent("b", 2, ProxyProtocol::Http, RouteGroup::General, None)
			.unwrap();
		let proxies = store.list_proxies(None).unwrap();
		store
			.record_probe_result(proxies[0].id, true, Some(200), ProxyProtocol::Http, None)
			.unwrap();
		store
			.record_probe_result(proxies[1].id, true, Some(50), ProxyProtocol::Http, None)
			.unwrap();

		let selector = PoolSelector::new(store);
		let best = selector.select(RouteGroup::General).unwrap().unwrap();
		assert_eq!(best.host, "b");
	}

	#[test]
	fn unknown_latency_sorts_last() {
		let store = open_memory();
		store
			.insert_proxy_if_absent("known", 1, ProxyProtocol::Http, RouteGroup::General, None)
			.unwrap();
		store
			.insert_proxy_if_absent("unknown", 2, ProxyProtocol::Http, RouteGroup::General, None)
			.unwrap();
		let proxies = store.list_proxies(None).unwrap();
		let known = proxies.iter().find(|p| p.host == "known").unwrap();
		let unknown = proxies.iter().find(|p| p.host == "unknown").unwrap();
		store
			.record_probe_result(known.id, true, Some(100), ProxyProtocol::Http, None)
			.unwrap();
		store.record_probe_result(unknown.id, true, None, ProxyProtocol::Http, None).unwrap();

		let selector = PoolSelector::new(store);
		let best = selector.select(RouteGroup::General).unwrap().unwrap();
		assert_eq!(best.host, "known");
	}

	#[test]
	fn empty_pool_yields_none() {
		let store = open_memory();
		let selector = PoolSelector::new(store);
		assert!(selector.select(RouteGroup::Upstream).unwrap().is_none());
	}
}
