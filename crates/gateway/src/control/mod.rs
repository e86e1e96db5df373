mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use prometheus_client::registry::Registry;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use gatehouse_core::signal::ShutdownTrigger;
use gatehouse_core::version::BuildInfo;

use crate::config::{RefreshConfig, TorConfig};
use crate::context::GatewayContext;

/// State shared by every control-API handler (§4.9).
#[derive(Clone)]
pub struct ApiState {
	pub ctx: GatewayContext,
	pub registry: Arc<Mutex<Registry>>,
	pub shutdown: ShutdownTrigger,
	pub build_info: BuildInfo,
	pub refresh: RefreshConfig,
	pub tor: TorConfig,
}

fn cors_layer() -> CorsLayer {
	CorsLayer::new()
		.allow_origin(Any)
		.allow_methods(Any)
		.allow_headers(Any)
}

pub fn router(state: ApiState) -> Router {
	Router::new()
		.route("/healthz", get(handlers::healthz))
		.route("/version", get(handlers::version))
		.route("/metrics", get(handlers::metrics))
		.route("/acl", get(handlers::list_acl).post(handlers::create_acl_subnet))
		.route("/acl/:id", axum::routing::delete(handlers::delete_acl_subnet))
		.route("/routes", get(handlers::list_routes).post(handlers::create_route))
		.route("/routes/:id", axum::routing::delete(handlers::delete_route))
		.route("/routes/:id/enabled", patch(handlers::set_route_enabled))
		.route("/proxies", get(handlers::list_proxies).post(handlers::create_upstream_proxy))
		.route("/proxies/:id", axum::routing::delete(handlers::delete_proxy))
		.route("/proxies/import", post(handlers::import_proxies))
		.route("/refresh", post(handlers::trigger_refresh))
		.route("/healthcheck", post(handlers::trigger_healthcheck))
		.route("/settings", get(handlers::list_settings).post(handlers::set_setting))
		.route("/tor/status", get(handlers::tor_status))
		.route("/tor/ip", get(handlers::tor_ip))
		.route("/tor/new-circuit", post(handlers::tor_new_circuit))
		.route("/shutdown", post(handlers::shutdown))
		.layer(cors_layer())
		.with_state(state)
}
