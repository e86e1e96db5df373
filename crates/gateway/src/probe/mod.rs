pub mod ingest;
pub mod validate;

use std::time::Duration;

use tokio::sync::watch;

use gatehouse_core::drain::DrainWatcher;

use crate::config::RefreshConfig;
use crate::context::GatewayContext;

/// Runs the probe worker (§4.8, §5): two independent long-lived tasks, one
/// ticking the ingest job and one ticking the validation job, both on the
/// configured interval. Each ticker keeps its own drain permit so the worker
/// as a whole only releases drain once both have stopped.
pub async fn run(
	ctx: GatewayContext,
	refresh: RefreshConfig,
	shutdown: watch::Receiver<bool>,
	drain: DrainWatcher,
) {
	let period = Duration::from_secs(refresh.interval_sec.max(1));

	let ingest_task = {
		let ctx = ctx.clone();
		let refresh = refresh.clone();
		let mut shutdown = shutdown.clone();
		let watcher = drain.clone();
		let client = reqwest::Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("reqwest client builds with default TLS backend");
		tokio::spawn(async move {
			let _watcher = watcher;
			let mut ticker = tokio::time::interval(period);
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						run_ingest(&ctx, &refresh, &client).await;
					}
					_ = shutdown.changed() => {
						if *shutdown.borrow() {
							tracing::info!("probe ingest ticker shutting down");
							break;
						}
					}
				}
			}
		})
	};

	let validate_task = {
		let ctx = ctx.clone();
		let refresh = refresh.clone();
		let mut shutdown = shutdown.clone();
		let watcher = drain.clone();
		tokio::spawn(async move {
			let _watcher = watcher;
			let mut ticker = tokio::time::interval(period);
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						run_validate(&ctx, &refresh).await;
					}
					_ = shutdown.changed() => {
						if *shutdown.borrow() {
							tracing::info!("probe validation ticker shutting down");
							break;
						}
					}
				}
			}
		})
	};

	let _ = tokio::join!(ingest_task, validate_task);
}

async fn run_ingest(ctx: &GatewayContext, refresh: &RefreshConfig, client: &reqwest::Client) {
	if !refresh.enable_general_sources {
		return;
	}
	// All sources run concurrently; a failing source is logged and skipped,
	// never aborting its peers (§4.8).
	let fetches = refresh.sources.iter().map(|source| async move {
		if let Err(e) = ingest::ingest_source(client, &ctx.store, source).await {
			tracing::warn!(source = %source.name, error = %e, "ingest failed");
		}
	});
	futures::future::join_all(fetches).await;
}

async fn run_validate(ctx: &GatewayContext, refresh: &RefreshConfig) {
	use crate::store::models::RouteGroup;

	for group in [RouteGroup::General, RouteGroup::Upstream] {
		if let Err(e) = validate::validate_group(&ctx.store, group, refresh.healthcheck_concurrency).await {
			tracing::warn!(?group, error = %e, "validation sweep failed");
		}
		ctx.metrics.probe_runs_total.inc();
	}

	if let Ok(working) = ctx.store.list_working_proxies(RouteGroup::General) {
		ctx.metrics.probe_proxies_working.set(working.len() as i64);
	}
}
