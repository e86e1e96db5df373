use thiserror::Error;

/// Failure realizing an egress connection for a route (§7 `DialError`).
#[derive(Debug, Error)]
pub enum DialError {
	#[error("connect timeout")]
	Timeout,
	#[error("connection refused")]
	Refused,
	#[error("socks5 proxy server sent invalid data")]
	Socks5Handshake(String),
	#[error("upstream CONNECT failed: {0}")]
	ConnectNonSuccess(String),
	#[error("no proxy configured for upstream route")]
	MissingUpstreamProxy,
	#[error("target host could not be resolved")]
	UnresolvableTarget,
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// The top-level error kinds enumerated in §7, with their dispositions
/// enforced by callers (front-ends map these to protocol-specific replies;
/// the control API maps them to HTTP status codes).
#[derive(Debug, Error)]
pub enum GatewayError {
	#[error("configuration error: {0}")]
	Config(String),

	#[error("client is not permitted")]
	AclDeny,

	#[error("no matching route")]
	PolicyMiss,

	#[error("egress dial failed: {0}")]
	Dial(#[from] DialError),

	#[error("transport error: {0}")]
	Transport(#[source] std::io::Error),

	#[error("{0} not found")]
	NotFound(&'static str),

	#[error("probe failed: {0}")]
	Probe(String),

	#[error("store error: {0}")]
	Store(#[from] rusqlite::Error),

	#[error("store pool error: {0}")]
	Pool(#[from] r2d2::Error),

	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
