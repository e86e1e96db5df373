use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::store::models::{ProxyProtocol, RouteGroup};

use super::ApiState;

/// Uniform error body for every failed request (§4.9): `{error, message,
/// code}`, mirroring the disposition table in §7.
pub struct ErrorResponse(GatewayError);

impl From<GatewayError> for ErrorResponse {
	fn from(e: GatewayError) -> Self {
		ErrorResponse(e)
	}
}

impl IntoResponse for ErrorResponse {
	fn into_response(self) -> axum::response::Response {
		let (status, code) = match &self.0 {
			GatewayError::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
			GatewayError::AclDeny => (StatusCode::FORBIDDEN, "acl_deny"),
			GatewayError::PolicyMiss => (StatusCode::NOT_FOUND, "policy_miss"),
			GatewayError::Dial(_) => (StatusCode::BAD_GATEWAY, "dial_error"),
			GatewayError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport_error"),
			GatewayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
			GatewayError::Probe(_) => (StatusCode::BAD_GATEWAY, "probe_failure"),
			GatewayError::Store(_) | GatewayError::Pool(_) => {
				(StatusCode::INTERNAL_SERVER_ERROR, "store_error")
			},
			GatewayError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
		};
		let body = json!({
			"error": code,
			"message": self.0.to_string(),
			"code": status.as_u16(),
		});
		(status, Json(body)).into_response()
	}
}

type ApiResult<T> = Result<T, ErrorResponse>;

pub async fn healthz() -> &'static str {
	"ok"
}

pub async fn version(State(state): State<ApiState>) -> Json<Value> {
	Json(json!({
		"version": state.build_info.version,
		"git_revision": state.build_info.git_revision,
		"rust_version": state.build_info.rust_version,
		"build_profile": state.build_info.build_profile,
	}))
}

pub async fn metrics(State(state): State<ApiState>) -> ApiResult<String> {
	let registry = state.registry.lock().await;
	crate::metrics::encode_text(&registry)
		.map_err(|e| GatewayError::Other(anyhow::anyhow!("metrics encode failed: {e}")).into())
}

#[derive(Deserialize)]
pub struct AclCreate {
	pub cidr: String,
	pub description: Option<String>,
}

pub async fn list_acl(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	let subnets = state.ctx.store.list_acl_subnets()?;
	Ok(Json(json!(subnets)))
}

pub async fn create_acl_subnet(
	State(state): State<ApiState>,
	Json(body): Json<AclCreate>,
) -> ApiResult<Json<Value>> {
	let id = state
		.ctx
		.store
		.insert_acl_subnet(&body.cidr, body.description.as_deref())?;
	Ok(Json(json!({ "id": id })))
}

pub async fn delete_acl_subnet(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
	if state.ctx.store.delete_acl_subnet(id)? {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(GatewayError::NotFound("acl subnet").into())
	}
}

#[derive(Deserialize)]
pub struct RouteCreate {
	pub host_glob: Option<String>,
	pub client_cidr: Option<String>,
	pub group: RouteGroup,
	pub upstream_proxy_id: Option<i64>,
	#[serde(default)]
	pub precedence: i64,
}

pub async fn list_routes(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	let routes = state.ctx.store.list_routes()?;
	Ok(Json(json!(routes)))
}

pub async fn create_route(
	State(state): State<ApiState>,
	Json(body): Json<RouteCreate>,
) -> ApiResult<Json<Value>> {
	let id = state.ctx.store.insert_route(
		body.host_glob.as_deref(),
		body.client_cidr.as_deref(),
		body.group,
		body.upstream_proxy_id,
		body.precedence,
	)?;
	Ok(Json(json!({ "id": id })))
}

pub async fn delete_route(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
	if state.ctx.store.delete_route(id)? {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(GatewayError::NotFound("route").into())
	}
}

#[derive(Deserialize)]
pub struct RouteEnabledUpdate {
	pub enabled: bool,
}

pub async fn set_route_enabled(
	State(state): State<ApiState>,
	Path(id): Path<i64>,
	Json(body): Json<RouteEnabledUpdate>,
) -> ApiResult<StatusCode> {
	if state.ctx.store.set_route_enabled(id, body.enabled)? {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(GatewayError::NotFound("route").into())
	}
}

#[derive(Deserialize)]
pub struct ProxyListQuery {
	pub group: Option<RouteGroup>,
}

pub async fn list_proxies(
	State(state): State<ApiState>,
	Query(query): Query<ProxyListQuery>,
) -> ApiResult<Json<Value>> {
	let proxies = state.ctx.store.list_proxies(query.group)?;
	Ok(Json(json!(proxies)))
}

#[derive(Deserialize)]
pub struct ProxyCreate {
	pub host: String,
	pub port: u16,
	pub protocol: ProxyProtocol,
	pub username: Option<String>,
	pub password: Option<String>,
}

pub async fn create_upstream_proxy(
	State(state): State<ApiState>,
	Json(body): Json<ProxyCreate>,
) -> ApiResult<Json<Value>> {
	let id = state.ctx.store.insert_upstream_proxy(
		&body.host,
		body.port,
		body.protocol,
		body.username.as_deref(),
		body.password.as_deref(),
	)?;
	Ok(Json(json!({ "id": id })))
}

pub async fn delete_proxy(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
	if state.ctx.store.delete_proxy(id)? {
		Ok(StatusCode::NO_CONTENT)
	} else {
		Err(GatewayError::NotFound("proxy").into())
	}
}

#[derive(Deserialize)]
pub struct ImportRequest {
	pub candidates: Vec<String>,
}

/// Imports a literal list of candidate strings, parsed per §4.8 raw rules
/// (`scheme://ip:port` or bare `ip:port`, defaulting to socks5).
pub async fn import_proxies(
	State(state): State<ApiState>,
	Json(body): Json<ImportRequest>,
) -> ApiResult<Json<Value>> {
	let mut added = 0;
	for candidate in crate::probe::ingest::parse_raw_list(&body.candidates.join("\n")) {
		if state.ctx.store.insert_proxy_if_absent(
			&candidate.host,
			candidate.port,
			candidate.protocol,
			RouteGroup::General,
			Some("api-import"),
		)? {
			added += 1;
		}
	}
	Ok(Json(json!({ "added": added })))
}

/// Triggers the ingest job on demand (§4.8): fetches every configured source
/// and inserts newly discovered proxies.
pub async fn trigger_refresh(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	if !state.refresh.enable_general_sources {
		return Err(GatewayError::Config("general-pool ingestion is disabled".into()).into());
	}
	let client = reqwest::Client::new();
	let mut total_added = 0;
	for source in &state.refresh.sources {
		total_added += crate::probe::ingest::ingest_source(&client, &state.ctx.store, source).await?;
	}
	Ok(Json(json!({ "added": total_added })))
}

/// Triggers the validation job on demand (§4.8.1) for GENERAL and UPSTREAM.
pub async fn trigger_healthcheck(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	for group in [RouteGroup::General, RouteGroup::Upstream] {
		crate::probe::validate::validate_group(&state.ctx.store, group, state.refresh.healthcheck_concurrency).await?;
	}
	Ok(Json(json!({ "status": "completed" })))
}

pub async fn list_settings(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	let settings = state.ctx.store.list_settings()?;
	Ok(Json(json!(settings.into_iter().collect::<std::collections::BTreeMap<_, _>>())))
}

#[derive(Deserialize)]
pub struct SettingUpdate {
	pub key: String,
	pub value: String,
}

pub async fn set_setting(
	State(state): State<ApiState>,
	Json(body): Json<SettingUpdate>,
) -> ApiResult<StatusCode> {
	state.ctx.store.set_setting(&body.key, &body.value)?;
	Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct TorStatus {
	pub enabled: bool,
	pub control_configured: bool,
}

pub async fn tor_status(State(state): State<ApiState>) -> Json<TorStatus> {
	Json(TorStatus {
		enabled: state.tor.enabled,
		control_configured: state.tor.control_address.is_some(),
	})
}

pub async fn tor_ip(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
	if !state.tor.enabled {
		return Err(GatewayError::Config("tor egress is disabled".into()).into());
	}
	let ip = crate::tor::current_exit_ip(&state.ctx.dialer).await?;
	Ok(Json(json!({ "ip": ip })))
}

pub async fn tor_new_circuit(State(state): State<ApiState>) -> ApiResult<StatusCode> {
	crate::tor::new_circuit(&state.tor).await?;
	Ok(StatusCode::ACCEPTED)
}

pub async fn shutdown(State(state): State<ApiState>) -> StatusCode {
	let trigger = state.shutdown.clone();
	tokio::spawn(async move {
		trigger.shutdown_now().await;
	});
	StatusCode::ACCEPTED
}
