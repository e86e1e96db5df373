use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Initializes the global tracing subscriber.
///
/// Honors `RUST_LOG`, defaulting to `info` for this crate's targets and
/// `warn` for dependencies. When `json` is set the formatter emits
/// newline-delimited JSON suitable for log aggregation; otherwise a
/// human-readable format is used.
pub fn init(json: bool) -> anyhow::Result<()> {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new("info,gatehouse=debug"));

	let registry = Registry::default().with(filter);
	if json {
		registry.with(fmt::layer().json().with_target(true)).try_init()?;
	} else {
		registry
			.with(fmt::layer().with_target(true).with_thread_ids(false))
			.try_init()?;
	}
	Ok(())
}

/// Returns the current effective log filter directive string, for the admin
/// `/logging` introspection endpoint.
pub fn current_filter() -> anyhow::Result<String> {
	Ok(std::env::var("RUST_LOG").unwrap_or_else(|_| "info,gatehouse=debug".to_string()))
}
