use std::sync::Arc;
use std::time::Duration;

use crate::acl::Acl;
use crate::config::Config;
use crate::dialer::Dialer;
use crate::metrics::Metrics;
use crate::policy::Policy;
use crate::pool::PoolSelector;
use crate::store::Store;

/// Shared, cheaply-cloneable handle to everything a front-end or the control
/// API needs: the ACL, the policy engine, the egress dialer, and the metric
/// registry. Assembled once in `main` and cloned into every accept loop.
#[derive(Clone)]
pub struct GatewayContext {
	pub store: Store,
	pub acl: Acl,
	pub policy: Policy,
	pub dialer: Dialer,
	pub metrics: Arc<Metrics>,
	pub read_timeout: Duration,
	pub write_timeout: Duration,
}

impl GatewayContext {
	pub fn build(store: Store, config: &Config, metrics: Arc<Metrics>) -> GatewayContext {
		let acl = Acl::new(store.clone());
		let policy = Policy::new(store.clone());
		let pool = PoolSelector::new(store.clone());
		let dialer = Dialer::new(
			pool,
			config.tor.clone(),
			Duration::from_millis(config.timeouts.dial_ms),
		);

		GatewayContext {
			store,
			acl,
			policy,
			dialer,
			metrics,
			read_timeout: Duration::from_millis(config.timeouts.read_ms),
			write_timeout: Duration::from_millis(config.timeouts.write_ms),
		}
	}
}
