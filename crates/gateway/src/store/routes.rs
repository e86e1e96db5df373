use rusqlite::{OptionalExtension, params};

use crate::error::GatewayError;

use super::Store;
use super::models::{Route, RouteGroup};

fn row_to_route(row: &rusqlite::Row) -> rusqlite::Result<Route> {
	let group: String = row.get("group")?;
	Ok(Route {
		id: row.get("id")?,
		host_glob: row.get("host_glob")?,
		client_cidr: row.get("client_cidr")?,
		group: group.parse().unwrap_or(RouteGroup::General),
		upstream_proxy_id: row.get("upstream_proxy_id")?,
		precedence: row.get("precedence")?,
		enabled: row.get::<_, i64>("enabled")? != 0,
	})
}

const SELECT_COLUMNS: &str = "id, host_glob, client_cidr, \"group\", upstream_proxy_id, precedence, enabled";

impl Store {
	/// All enabled routes, ordered by precedence ascending then id ascending
	/// (§4.3: lower precedence wins; ties broken by lower id).
	pub fn list_enabled_routes(&self) -> Result<Vec<Route>, GatewayError> {
		let conn = self.pool().get()?;
		let mut stmt = conn.prepare(&format!(
			"SELECT {SELECT_COLUMNS} FROM routes WHERE enabled = 1 ORDER BY precedence ASC, id ASC"
		))?;
		let mapped = stmt.query_map([], row_to_route)?;
		let mut rows = Vec::new();
		for row in mapped {
			rows.push(row?);
		}
		Ok(rows)
	}

	pub fn list_routes(&self) -> Result<Vec<Route>, GatewayError> {
		let conn = self.pool().get()?;
		let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM routes ORDER BY precedence ASC, id ASC"))?;
		let mapped = stmt.query_map([], row_to_route)?;
		let mut rows = Vec::new();
		for row in mapped {
			rows.push(row?);
		}
		Ok(rows)
	}

	pub fn get_route(&self, id: i64) -> Result<Option<Route>, GatewayError> {
		let conn = self.pool().get()?;
		conn.query_row(
			&format!("SELECT {SELECT_COLUMNS} FROM routes WHERE id = ?1"),
			params![id],
			row_to_route,
		)
		.optional()
		.map_err(GatewayError::from)
	}

	pub fn insert_route(
		&self,
		host_glob: Option<&str>,
		client_cidr: Option<&str>,
		group: RouteGroup,
		upstream_proxy_id: Option<i64>,
		precedence: i64,
	) -> Result<i64, GatewayError> {
		let conn = self.pool().get()?;
		conn.execute(
			"INSERT INTO routes (host_glob, client_cidr, \"group\", upstream_proxy_id, precedence, enabled)
			 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
			params![host_glob, client_cidr, group.as_str(), upstream_proxy_id, precedence],
		)?;
		Ok(conn.last_insert_rowid())
	}

	pub fn set_route_enabled(&self, id: i64, enabled: bool) -> Result<bool, GatewayError> {
		let conn = self.pool().get()?;
		let changed = conn.execute(
			"UPDATE routes SET enabled = ?1 WHERE id = ?2",
			params![enabled as i64, id],
		)?;
		Ok(changed > 0)
	}

	pub fn delete_route(&self, id: i64) -> Result<bool, GatewayError> {
		let conn = self.pool().get()?;
		let changed = conn.execute("DELETE FROM routes WHERE id = ?1", params![id])?;
		Ok(changed > 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;

	#[test]
	fn routes_order_by_precedence_then_id() {
		let store = open_memory();
		store
			.insert_route(Some("*.example.com"), None, RouteGroup::General, None, 100)
			.unwrap();
		store
			.insert_route(Some("secure.example.com"), None, RouteGroup::Tor, None, 10)
			.unwrap();
		let routes = store.list_enabled_routes().unwrap();
		assert_eq!(routes[0].host_glob.as_deref(), Some("secure.example.com"));
		assert_eq!(routes[1].host_glob.as_deref(), Some("*.example.com"));
	}

	#[test]
	fn disabled_routes_are_excluded() {
		let store = open_memory();
		let id = store
			.insert_route(Some("*.example.com"), None, RouteGroup::General, None, 0)
			.unwrap();
		store.set_route_enabled(id, false).unwrap();
		assert!(store.list_enabled_routes().unwrap().is_empty());
	}
}
