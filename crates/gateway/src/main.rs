use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use prometheus_client::registry::Registry;
use tokio::sync::{watch, Mutex};

use gatehouse::config::Config;
use gatehouse::context::GatewayContext;
use gatehouse::control::{self, ApiState};
use gatehouse::metrics::Metrics;
use gatehouse::probe;
use gatehouse::proxy::{http, socks5};
use gatehouse::store::Store;

use gatehouse_core::drain;
use gatehouse_core::signal::Shutdown;
use gatehouse_core::telemetry;
use gatehouse_core::version::BuildInfo;

/// A LAN-facing egress gateway: HTTP/HTTPS and SOCKS5 front-ends routing
/// traffic through LOCAL, GENERAL, TOR, or UPSTREAM proxy pools by policy.
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version)]
struct Args {
	/// Path to a YAML config file. Options may also be set via GATEHOUSE_*
	/// environment variables, which take precedence over file values.
	#[arg(long, env = "GATEHOUSE_CONFIG")]
	config: Option<PathBuf>,

	/// Emit logs as newline-delimited JSON instead of human-readable text.
	#[arg(long, env = "GATEHOUSE_LOG_JSON")]
	log_json: bool,

	/// Seconds to wait for in-flight connections to drain before exiting.
	#[arg(long, default_value_t = 30, env = "GATEHOUSE_DRAIN_TIMEOUT_SECS")]
	drain_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	telemetry::init(args.log_json)?;

	let config = Config::load(args.config.as_deref())?;
	tracing::info!(listen = ?config.listen, "starting gatehouse");

	let store = Store::open(&config.database.path)?;

	let mut registry = Registry::default();
	let metrics = Arc::new(Metrics::new(&mut registry));
	let registry = Arc::new(Mutex::new(registry));

	let ctx = GatewayContext::build(store, &config, metrics.clone());

	let http_listener = tokio::net::TcpListener::bind(config.listen.http_proxy).await?;
	let socks5_listener = tokio::net::TcpListener::bind(config.listen.socks5_proxy).await?;
	let api_listener = tokio::net::TcpListener::bind(config.listen.api).await?;

	let shutdown = Shutdown::new();
	let shutdown_trigger = shutdown.trigger();
	let (stop_tx, stop_rx) = watch::channel(false);
	let (drain_trigger, drain_watcher) = drain::new();

	let api_state = ApiState {
		ctx: ctx.clone(),
		registry,
		shutdown: shutdown_trigger.clone(),
		build_info: BuildInfo::new(),
		refresh: config.refresh.clone(),
		tor: config.tor.clone(),
	};
	let api_router = control::router(api_state);

	let http_task = tokio::spawn(http::serve(http_listener, ctx.clone(), stop_rx.clone(), drain_watcher.clone()));
	let socks5_task = tokio::spawn(socks5::serve(
		socks5_listener,
		ctx.clone(),
		stop_rx.clone(),
		drain_watcher.clone(),
	));
	let probe_task = tokio::spawn(probe::run(
		ctx.clone(),
		config.refresh.clone(),
		stop_rx.clone(),
		drain_watcher.clone(),
	));
	let api_task = tokio::spawn(async move {
		if let Err(e) = axum::serve(api_listener, api_router).await {
			tracing::error!(error = %e, "control API server failed");
		}
	});

	shutdown.wait().await;
	tracing::info!("shutdown requested, draining connections");
	let _ = stop_tx.send(true);
	drop(drain_watcher);

	let drain_timeout = Duration::from_secs(args.drain_timeout_secs);
	if tokio::time::timeout(drain_timeout, drain_trigger.start_drain_and_wait())
		.await
		.is_err()
	{
		tracing::warn!(timeout_secs = args.drain_timeout_secs, "drain deadline exceeded, forcing exit");
	}

	api_task.abort();
	http_task.abort();
	socks5_task.abort();
	probe_task.abort();

	Ok(())
}
