use rusqlite::{OptionalExtension, params};

use crate::error::GatewayError;

use super::Store;
use super::models::{Proxy, ProxyProtocol, RouteGroup};

fn row_to_proxy(row: &rusqlite::Row) -> rusqlite::Result<Proxy> {
	let protocol: String = row.get("protocol")?;
	let group: String = row.get("group")?;
	Ok(Proxy {
		id: row.get("id")?,
		host: row.get("host")?,
		port: row.get::<_, i64>("port")? as u16,
		protocol: protocol.parse().unwrap_or(ProxyProtocol::Http),
		username: row.get("username")?,
		password: row.get("password")?,
		group: group.parse().unwrap_or(RouteGroup::General),
		working: row.get::<_, i64>("working")? != 0,
		latency_ms: row.get::<_, Option<i64>>("latency_ms")?.map(|v| v as u32),
		last_tested: row.get("last_tested")?,
		expiry: row.get("expiry")?,
		last_error: row.get("last_error")?,
		source: row.get("source")?,
		created_at: row.get("created_at")?,
	})
}

const SELECT_COLUMNS: &str =
	"id, host, port, protocol, username, password, \"group\", working, latency_ms, last_tested, expiry, last_error, source, created_at";

impl Store {
	pub fn list_proxies(&self, group: Option<RouteGroup>) -> Result<Vec<Proxy>, GatewayError> {
		let conn = self.pool().get()?;
		let mut rows = Vec::new();
		if let Some(group) = group {
			let mut stmt = conn.prepare(&format!(
				"SELECT {SELECT_COLUMNS} FROM proxies WHERE \"group\" = ?1 ORDER BY id"
			))?;
			let mapped = stmt.query_map(params![group.as_str()], row_to_proxy)?;
			for row in mapped {
				rows.push(row?);
			}
		} else {
			let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM proxies ORDER BY id"))?;
			let mapped = stmt.query_map([], row_to_proxy)?;
			for row in mapped {
				rows.push(row?);
			}
		}
		Ok(rows)
	}

	/// Proxies eligible for selection: working, unexpired, and tested within
	/// the last hour (or never scheduled for re-test) in the given group
	/// (§4.4 Pool Selector's source query, before the ordering pass is
	/// applied).
	pub fn list_working_proxies(&self, group: RouteGroup) -> Result<Vec<Proxy>, GatewayError> {
		let conn = self.pool().get()?;
		let mut stmt = conn.prepare(&format!(
			"SELECT {SELECT_COLUMNS} FROM proxies WHERE \"group\" = ?1 AND working = 1
			 AND (expiry IS NULL OR expiry > strftime('%s','now'))
			 AND (last_tested IS NULL OR last_tested > strftime('%s','now') - 3600) ORDER BY id"
		))?;
		let mapped = stmt.query_map(params![group.as_str()], row_to_proxy)?;
		let mut rows = Vec::new();
		for row in mapped {
			rows.push(row?);
		}
		Ok(rows)
	}

	pub fn get_proxy(&self, id: i64) -> Result<Option<Proxy>, GatewayError> {
		let conn = self.pool().get()?;
		conn.query_row(
			&format!("SELECT {SELECT_COLUMNS} FROM proxies WHERE id = ?1"),
			params![id],
			row_to_proxy,
		)
		.optional()
		.map_err(GatewayError::from)
	}

	/// Inserts a proxy if no row exists for (host, port) yet; a no-op
	/// otherwise. Used by the ingest job so repeated imports of the same
	/// source are idempotent (§8 universal property: import is a monoid).
	pub fn insert_proxy_if_absent(
		&self,
		host: &str,
		port: u16,
		protocol: ProxyProtocol,
		group: RouteGroup,
		source: Option<&str>,
	) -> Result<bool, GatewayError> {
		let conn = self.pool().get()?;
		let changed = conn.execute(
			"INSERT OR IGNORE INTO proxies (host, port, protocol, \"group\", working, source, created_at)
			 VALUES (?1, ?2, ?3, ?4, 0, ?5, strftime('%s','now'))",
			params![host, port as i64, protocol.as_str(), group.as_str(), source],
		)?;
		Ok(changed > 0)
	}

	pub fn insert_upstream_proxy(
		&self,
		host: &str,
		port: u16,
		protocol: ProxyProtocol,
		username: Option<&str>,
		password: Option<&str>,
	) -> Result<i64, GatewayError> {
		let conn = self.pool().get()?;
		conn.execute(
			"INSERT INTO proxies (host, port, protocol, username, password, \"group\", working, source, created_at)
			 VALUES (?1, ?2, ?3, ?4, ?5, 'upstream', 1, 'manual', strftime('%s','now'))
			 ON CONFLICT(host, port) DO UPDATE SET
				protocol = excluded.protocol,
				username = excluded.username,
				password = excluded.password",
			params![host, port as i64, protocol.as_str(), username, password],
		)?;
		conn.query_row(
			"SELECT id FROM proxies WHERE host = ?1 AND port = ?2",
			params![host, port as i64],
			|row| row.get(0),
		)
		.map_err(GatewayError::from)
	}

	pub fn delete_proxy(&self, id: i64) -> Result<bool, GatewayError> {
		let conn = self.pool().get()?;
		let changed = conn.execute("DELETE FROM proxies WHERE id = ?1", params![id])?;
		Ok(changed > 0)
	}

	/// Writes back a single probe result (§4.8.1): working flag, measured
	/// latency, the protocol that actually succeeded, an optional error
	/// message, and the test timestamp.
	pub fn record_probe_result(
		&self,
		id: i64,
		working: bool,
		latency_ms: Option<u32>,
		protocol: ProxyProtocol,
		last_error: Option<&str>,
	) -> Result<(), GatewayError> {
		let conn = self.pool().get()?;
		conn.execute(
			"UPDATE proxies SET working = ?1, latency_ms = ?2, protocol = ?3, last_error = ?4, last_tested = strftime('%s','now')
			 WHERE id = ?5",
			params![working as i64, latency_ms.map(|v| v as i64), protocol.as_str(), last_error, id],
		)?;
		Ok(())
	}

	/// Writes back every probe result from one validation sweep inside a
	/// single transaction (§4.8: "results are written back in one
	/// transaction"), so a crash mid-write leaves the previous sweep's data
	/// intact rather than a half-updated batch.
	pub fn record_probe_results(&self, results: &[ProbeResult]) -> Result<(), GatewayError> {
		let mut conn = self.pool().get()?;
		let tx = conn.transaction()?;
		for result in results {
			tx.execute(
				"UPDATE proxies SET working = ?1, latency_ms = ?2, protocol = ?3, last_error = ?4, last_tested = strftime('%s','now')
				 WHERE id = ?5",
				params![
					result.working as i64,
					result.latency_ms.map(|v| v as i64),
					result.protocol.as_str(),
					result.last_error.as_deref(),
					result.proxy_id
				],
			)?;
		}
		tx.commit()?;
		Ok(())
	}
}

/// One proxy's outcome from a validation sweep, batched up by the caller and
/// written back together via [`Store::record_probe_results`].
pub struct ProbeResult {
	pub proxy_id: i64,
	pub working: bool,
	pub latency_ms: Option<u32>,
	pub protocol: ProxyProtocol,
	pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;

	#[test]
	fn insert_if_absent_is_idempotent() {
		let store = open_memory();
		let first = store
			.insert_proxy_if_absent("1.2.3.4", 8080, ProxyProtocol::Http, RouteGroup::General, Some("src"))
			.unwrap();
		let second = store
			.insert_proxy_if_absent("1.2.3.4", 8080, ProxyProtocol::Http, RouteGroup::General, Some("src"))
			.unwrap();
		assert!(first);
		assert!(!second);
		assert_eq!(store.list_proxies(None).unwrap().len(), 1);
	}

	#[test]
	fn probe_result_round_trips() {
		let store = open_memory();
		store
			.insert_proxy_if_absent("5.6.7.8", 1080, ProxyProtocol::Socks5, RouteGroup::General, None)
			.unwrap();
		let proxy = store.list_proxies(None).unwrap().remove(0);
		store
			.record_probe_result(proxy.id, true, Some(42), ProxyProtocol::Socks5, None)
			.unwrap();
		let reloaded = store.get_proxy(proxy.id).unwrap().unwrap();
		assert!(reloaded.working);
		assert_eq!(reloaded.latency_ms, Some(42));
	}

	#[test]
	fn probe_failure_records_error_message() {
		let store = open_memory();
		store
			.insert_proxy_if_absent("5.6.7.9", 1080, ProxyProtocol::Socks5, RouteGroup::General, None)
			.unwrap();
		let proxy = store.list_proxies(None).unwrap().remove(0);
		store
			.record_probe_result(proxy.id, false, None, ProxyProtocol::Socks5, Some("connect timed out"))
			.unwrap();
		let reloaded = store.get_proxy(proxy.id).unwrap().unwrap();
		assert!(!reloaded.working);
		assert_eq!(reloaded.last_error.as_deref(), Some("connect timed out"));
	}

	#[test]
	fn batch_probe_results_apply_in_one_transaction() {
		let store = open_memory();
		store
			.insert_proxy_if_absent("1.1.1.1", 1080, ProxyProtocol::Socks5, RouteGroup::General, None)
			.unwrap();
		store
			.insert_proxy_if_absent("2.2.2.2", 1080, ProxyProtocol::Socks5, RouteGroup::General, None)
			.unwrap();
		let proxies = store.list_proxies(None).unwrap();
		let results = vec![
			ProbeResult {
				proxy_id: proxies[0].id,
				working: true,
				latency_ms: Some(12),
				protocol: ProxyProtocol::Socks5,
				last_error: None,
			},
			ProbeResult {
				proxy_id: proxies[1].id,
				working: false,
				latency_ms: None,
				protocol: ProxyProtocol::Socks5,
				last_error: Some("connect timed out".to_string()),
			},
		];
		store.record_probe_results(&results).unwrap();

		let first = store.get_proxy(proxies[0].id).unwrap().unwrap();
		let second = store.get_proxy(proxies[1].id).unwrap().unwrap();
		assert!(first.working);
		assert_eq!(first.latency_ms, Some(12));
		assert!(!second.working);
		assert_eq!(second.last_error.as_deref(), Some("connect timed out"));
	}
}
