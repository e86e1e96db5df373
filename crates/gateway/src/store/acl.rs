use rusqlite::params;

use crate::error::GatewayError;

use super::Store;
use super::models::AclSubnet;

fn row_to_subnet(row: &rusqlite::Row) -> rusqlite::Result<AclSubnet> {
	Ok(AclSubnet {
		id: row.get("id")?,
		cidr: row.get("cidr")?,
		description: row.get("description")?,
		created_at: row.get("created_at")?,
	})
}

impl Store {
	pub fn list_acl_subnets(&self) -> Result<Vec<AclSubnet>, GatewayError> {
		let conn = self.pool().get()?;
		let mut stmt =
			conn.prepare("SELECT id, cidr, description, created_at FROM acl_subnets ORDER BY id")?;
		let mapped = stmt.query_map([], row_to_subnet)?;
		let mut rows = Vec::new();
		for row in mapped {
			rows.push(row?);
		}
		Ok(rows)
	}

	pub fn insert_acl_subnet(&self, cidr: &str, description: Option<&str>) -> Result<i64, GatewayError> {
		let conn = self.pool().get()?;
		conn.execute(
			"INSERT OR IGNORE INTO acl_subnets (cidr, description, created_at) VALUES (?1, ?2, strftime('%s','now'))",
			params![cidr, description],
		)?;
		conn.query_row(
			"SELECT id FROM acl_subnets WHERE cidr = ?1",
			params![cidr],
			|row| row.get(0),
		)
		.map_err(GatewayError::from)
	}

	pub fn delete_acl_subnet(&self, id: i64) -> Result<bool, GatewayError> {
		let conn = self.pool().get()?;
		let changed = conn.execute("DELETE FROM acl_subnets WHERE id = ?1", params![id])?;
		Ok(changed > 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;

	#[test]
	fn insert_is_idempotent_on_cidr() {
		let store = open_memory();
		let a = store.insert_acl_subnet("10.0.0.0/8", Some("lan")).unwrap();
		let b = store.insert_acl_subnet("10.0.0.0/8", Some("lan again")).unwrap();
		assert_eq!(a, b);
		assert_eq!(store.list_acl_subnets().unwrap().len(), 1);
	}
}
