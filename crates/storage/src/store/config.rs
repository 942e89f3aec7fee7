#![forbid(unsafe_code)]

use rusqlite::{Connection, OptionalExtension, params};

use qc_core::config::ConfigKey;

use super::{ConfigSnapshot, SqliteStore, StoreError};

fn config_value_on(conn: &Connection, key: ConfigKey) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM config WHERE key=?1",
            params![key.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Read a key as i64, falling back to the key's default when the row is
/// missing or unparseable.
pub(super) fn config_i64_on(conn: &Connection, key: ConfigKey) -> Result<i64, StoreError> {
    let raw = config_value_on(conn, key)?;
    let fallback = || key.default_value().parse::<i64>().unwrap_or(0);
    Ok(raw
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or_else(fallback))
}

pub(super) fn config_f64_on(conn: &Connection, key: ConfigKey) -> Result<f64, StoreError> {
    let raw = config_value_on(conn, key)?;
    let fallback = || key.default_value().parse::<f64>().unwrap_or(0.0);
    Ok(raw
        .as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or_else(fallback))
}

/// Typed view of the values captured into each job row at enqueue.
pub(super) fn snapshot_on(conn: &Connection) -> Result<ConfigSnapshot, StoreError> {
    Ok(ConfigSnapshot {
        max_retries: config_i64_on(conn, ConfigKey::MaxRetries)?,
        backoff_base: config_f64_on(conn, ConfigKey::BackoffBase)?,
        job_timeout_s: config_i64_on(conn, ConfigKey::JobTimeoutS)?,
    })
}

impl SqliteStore {
    pub(super) fn seed_config_defaults(&self) -> Result<(), StoreError> {
        for key in ConfigKey::ALL {
            self.conn.execute(
                "INSERT INTO config(key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
                params![key.as_str(), key.default_value()],
            )?;
        }
        Ok(())
    }

    /// Current value for `key` (the seeded default when unset).
    pub fn config_get(&self, key: ConfigKey) -> Result<String, StoreError> {
        Ok(config_value_on(&self.conn, key)?
            .unwrap_or_else(|| key.default_value().to_string()))
    }

    /// Coerce and persist a value for a known key; returns the canonical
    /// stored form.
    pub fn config_set(&mut self, key: ConfigKey, raw: &str) -> Result<String, StoreError> {
        let canonical = key.coerce(raw)?;
        self.conn.execute(
            r#"
            INSERT INTO config(key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value=excluded.value
            "#,
            params![key.as_str(), canonical.as_str()],
        )?;
        Ok(canonical)
    }

    /// Every config pair, sorted by key.
    pub fn config_all(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn config_i64(&self, key: ConfigKey) -> Result<i64, StoreError> {
        config_i64_on(&self.conn, key)
    }

    pub fn config_f64(&self, key: ConfigKey) -> Result<f64, StoreError> {
        config_f64_on(&self.conn, key)
    }

    pub fn config_snapshot(&self) -> Result<ConfigSnapshot, StoreError> {
        snapshot_on(&self.conn)
    }
}
