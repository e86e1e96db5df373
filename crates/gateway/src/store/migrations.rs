use rusqlite::Connection;

use crate::error::GatewayError;

/// Ordered, forward-only schema migrations. Applied inside a transaction and
/// tracked in `schema_migrations` so restarts are idempotent.
const MIGRATIONS: &[(&str, &str)] = &[
	(
		"0001_init",
		r#"
		CREATE TABLE proxies (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			host TEXT NOT NULL,
			port INTEGER NOT NULL,
			protocol TEXT NOT NULL,
			username TEXT,
			password TEXT,
			"group" TEXT NOT NULL,
			working INTEGER NOT NULL DEFAULT 0,
			latency_ms INTEGER,
			last_tested INTEGER,
			expiry INTEGER,
			last_error TEXT,
			source TEXT,
			created_at INTEGER NOT NULL
		);
		CREATE UNIQUE INDEX idx_proxies_host_port ON proxies(host, port);
		CREATE INDEX idx_proxies_working ON proxies(working);
		CREATE INDEX idx_proxies_latency ON proxies(latency_ms);
		CREATE INDEX idx_proxies_last_tested ON proxies(last_tested);

		CREATE TABLE routes (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			host_glob TEXT,
			client_cidr TEXT,
			"group" TEXT NOT NULL,
			upstream_proxy_id INTEGER REFERENCES proxies(id) ON DELETE SET NULL,
			precedence INTEGER NOT NULL DEFAULT 0,
			enabled INTEGER NOT NULL DEFAULT 1
		);
		CREATE INDEX idx_routes_precedence ON routes(precedence);

		CREATE TABLE acl_subnets (
			id INTEGER PRIMARY KEY AUTOINCREMENT,
			cidr TEXT NOT NULL UNIQUE,
			description TEXT,
			created_at INTEGER NOT NULL
		);

		CREATE TABLE settings (
			key TEXT PRIMARY KEY,
			value TEXT NOT NULL
		);
		"#,
	),
];

pub fn run(conn: &mut Connection) -> Result<(), GatewayError> {
	conn.execute_batch(
		"PRAGMA journal_mode=WAL;
		 PRAGMA synchronous=NORMAL;
		 PRAGMA busy_timeout=5000;
		 PRAGMA foreign_keys=ON;",
	)?;

	conn.execute_batch(
		"CREATE TABLE IF NOT EXISTS schema_migrations (
			name TEXT PRIMARY KEY,
			applied_at INTEGER NOT NULL
		);",
	)?;

	for (name, sql) in MIGRATIONS {
		let already: bool = conn.query_row(
			"SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE name = ?1)",
			[name],
			|row| row.get(0),
		)?;
		if already {
			continue;
		}

		let tx = conn.transaction()?;
		tx.execute_batch(sql)?;
		tx.execute(
			"INSERT INTO schema_migrations (name, applied_at) VALUES (?1, strftime('%s','now'))",
			[name],
		)?;
		tx.commit()?;
		tracing::info!(migration = *name, "applied schema migration");
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn migrations_are_idempotent() {
		let mut conn = Connection::open_in_memory().unwrap();
		run(&mut conn).unwrap();
		run(&mut conn).unwrap();

		let count: i64 = conn
			.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
			.unwrap();
		assert_eq!(count, MIGRATIONS.len() as i64);
	}
}
