use rusqlite::{OptionalExtension, params};

use crate::error::GatewayError;

use super::Store;

impl Store {
	pub fn get_setting(&self, key: &str) -> Result<Option<String>, GatewayError> {
		let conn = self.pool().get()?;
		conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| {
			row.get(0)
		})
		.optional()
		.map_err(GatewayError::from)
	}

	pub fn set_setting(&self, key: &str, value: &str) -> Result<(), GatewayError> {
		let conn = self.pool().get()?;
		conn.execute(
			"INSERT INTO settings (key, value) VALUES (?1, ?2)
			 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
			params![key, value],
		)?;
		Ok(())
	}

	pub fn list_settings(&self) -> Result<Vec<(String, String)>, GatewayError> {
		let conn = self.pool().get()?;
		let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
		let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
		let mut rows = Vec::new();
		for row in mapped {
			rows.push(row?);
		}
		Ok(rows)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::tests::open_memory;

	#[test]
	fn set_then_get_round_trips() {
		let store = open_memory();
		store.set_setting("general_enabled", "true").unwrap();
		assert_eq!(store.get_setting("general_enabled").unwrap().as_deref(), Some("true"));
		store.set_setting("general_enabled", "false").unwrap();
		assert_eq!(store.get_setting("general_enabled").unwrap().as_deref(), Some("false"));
	}

	#[test]
	fn missing_key_is_none() {
		let store = open_memory();
		assert_eq!(store.get_setting("nope").unwrap(), None);
	}
}
