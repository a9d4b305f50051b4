// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite relational sink.
//!
//! Thread-safe via internal Mutex (SQLite Connection is not Sync).
//! Tables are not created here; the bridge does no schema management.

use super::RelationalSink;
use crate::emit::SqlDialect;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params_from_iter, Connection};
use std::sync::Mutex;

/// SQLite sink.
pub struct SqliteSink {
    conn: Mutex<Connection>,
}

impl SqliteSink {
    /// Open (or create) a file-based database.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to create in-memory SQLite database")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run one or more statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_connection(|conn| conn.execute_batch(sql))
    }

    /// Run a closure against the connection.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))?;
        Ok(f(&*conn)?)
    }
}

impl RelationalSink for SqliteSink {
    fn query(&self, sql: &str, params: &[String]) -> Result<usize> {
        self.with_connection(|conn| conn.execute(sql, params_from_iter(params.iter())))
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }
}
