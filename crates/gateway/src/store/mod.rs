pub mod acl;
pub mod migrations;
pub mod models;
pub mod proxies;
pub mod routes;
pub mod settings;

use std::path::Path;
use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::error::GatewayError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Handle to the persistent SQLite-backed store (§4.1). Cheap to clone:
/// internally an `Arc` around an r2d2 connection pool.
#[derive(Clone)]
pub struct Store {
	pool: Arc<DbPool>,
}

impl Store {
	pub fn open(path: &Path) -> Result<Store, GatewayError> {
		let manager = SqliteConnectionManager::file(path).with_init(|conn| {
			conn.execute_batch(
				"PRAGMA journal_mode=WAL;
				 PRAGMA synchronous=NORMAL;
				 PRAGMA busy_timeout=5000;
				 PRAGMA foreign_keys=ON;",
			)
		});
		let pool = Pool::builder()
			.max_size(8)
			.build(manager)
			.map_err(GatewayError::Pool)?;

		{
			let mut conn = pool.get().map_err(GatewayError::Pool)?;
			migrations::run(&mut conn)?;
		}

		Ok(Store {
			pool: Arc::new(pool),
		})
	}

	pub fn pool(&self) -> &DbPool {
		&self.pool
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use r2d2_sqlite::SqliteConnectionManager;

	pub(crate) fn open_memory() -> Store {
		let manager = SqliteConnectionManager::memory();
		let pool = r2d2::Pool::builder().max_size(4).build(manager).unwrap();
		{
			let mut conn = pool.get().unwrap();
			migrations::run(&mut conn).unwrap();
		}
		Store {
			pool: Arc::new(pool),
		}
	}

	#[test]
	fn opens_and_migrates() {
		let store = open_memory();
		let conn = store.pool().get().unwrap();
		let count: i64 = conn
			.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
			.unwrap();
		assert!(count >= 1);
	}
}
