use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ConnectionLabels {
	pub front_end: &'static str,
	pub group: &'static str,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
	pub front_end: &'static str,
	pub outcome: &'static str,
}

/// Process-wide metric set exposed on the control API's `/metrics` endpoint,
/// mirroring the label-family pattern the proxy front-ends use for
/// connection accounting.
pub struct Metrics {
	pub connections_total: Family<ConnectionLabels, Counter>,
	pub connections_active: Family<ConnectionLabels, Gauge>,
	pub connection_outcomes: Family<OutcomeLabels, Counter>,
	pub probe_runs_total: Counter,
	pub probe_proxies_working: Gauge,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Metrics {
		let connections_total = Family::default();
		let connections_active = Family::default();
		let connection_outcomes = Family::default();
		let probe_runs_total = Counter::default();
		let probe_proxies_working = Gauge::default();

		registry.register(
			"gatehouse_connections",
			"Total inbound connections accepted by a front-end",
			connections_total.clone(),
		);
		registry.register(
			"gatehouse_connections_active",
			"Inbound connections currently being proxied",
			connections_active.clone(),
		);
		registry.register(
			"gatehouse_connection_outcomes",
			"Connection attempts grouped by terminal outcome",
			connection_outcomes.clone(),
		);
		registry.register(
			"gatehouse_probe_runs",
			"Number of probe sweeps completed",
			probe_runs_total.clone(),
		);
		registry.register(
			"gatehouse_probe_proxies_working",
			"Proxies marked working as of the last probe sweep",
			probe_proxies_working.clone(),
		);

		Metrics {
			connections_total,
			connections_active,
			connection_outcomes,
			probe_runs_total,
			probe_proxies_working,
		}
	}
}

pub fn encode_text(registry: &Registry) -> Result<String, std::fmt::Error> {
	let mut buf = String::new();
	encode(&mut buf, registry)?;
	Ok(buf)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_without_error() {
		let mut registry = Registry::default();
		let metrics = Metrics::new(&mut registry);
		metrics
			.connections_total
			.get_or_create(&ConnectionLabels {
				front_end: "http",
				group: "local",
			})
			.inc();
		let text = encode_text(&registry).unwrap();
		assert!(text.contains("gatehouse_connections"));
	}
}
