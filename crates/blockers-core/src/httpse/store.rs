//! Persistent HTTPS rule store.
//!
//! Keys are host patterns (`www.example.com`, `*.example.com`,
//! `www.example.*`); values are JSON ruleset payloads understood by
//! [`apply_https_rule`](super::apply_https_rule).

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::Result;

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS httpse_rules (
    host TEXT PRIMARY KEY,
    rules TEXT NOT NULL
);";

const SELECT_RULES: &str = "SELECT rules FROM httpse_rules WHERE host = ?1";

/// Key/value lookup of HTTPS rule payloads.
pub trait HttpsRuleStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
}

pub struct SqliteRuleStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteRuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRuleStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl SqliteRuleStore {
    /// Open an existing rule database. Fails if the rules table is missing.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.prepare_cached(SELECT_RULES)?;
        Ok(Self { conn })
    }

    /// Open or create a writable rule database.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn insert(&self, host: &str, rules: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO httpse_rules (host, rules) VALUES (?1, ?2)",
            params![host, rules],
        )?;
        Ok(())
    }

    /// Insert many entries in one transaction. Returns the number written.
    pub fn import<I>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt =
                tx.prepare("INSERT OR REPLACE INTO httpse_rules (host, rules) VALUES (?1, ?2)")?;
            for (host, rules) in entries {
                stmt.execute(params![host, rules])?;
                count += 1;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM httpse_rules", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl HttpsRuleStore for SqliteRuleStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(SELECT_RULES)?;
        let rules = stmt
            .query_row(params![key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(rules)
    }
}
