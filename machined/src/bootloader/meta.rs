//! Small tagged records that survive a reboot.
//!
//! The store holds one opaque blob per [`MetaTag`]. It backs staged
//! installs, the upgrade fallback marker and the state partition
//! encryption config. [`SqliteMetaStore`] is the host implementation.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use machined_shared::{MachinedError, MachinedResult};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta_tags (
    tag INTEGER PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
";

macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| MachinedError::Database(e.to_string()))
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaTag {
    /// Set by an upgrade so the bootloader can fall back; cleared once the
    /// new version boots.
    Upgrade,
    StagedInstallImageRef,
    StagedInstallOptions,
    StateEncryptionConfig,
}

impl MetaTag {
    fn code(self) -> i64 {
        match self {
            MetaTag::Upgrade => 1,
            MetaTag::StagedInstallImageRef => 2,
            MetaTag::StagedInstallOptions => 3,
            MetaTag::StateEncryptionConfig => 4,
        }
    }
}

pub trait MetaStore: Send + Sync {
    fn read_tag(&self, tag: MetaTag) -> MachinedResult<Option<Vec<u8>>>;

    fn write_tag(&self, tag: MetaTag, value: &[u8]) -> MachinedResult<()>;

    /// Returns `true` if the tag existed.
    fn delete_tag(&self, tag: MetaTag) -> MachinedResult<bool>;
}

/// SQLite metadata store.
///
/// Thread-safe via `parking_lot::Mutex`.
#[derive(Clone)]
pub struct SqliteMetaStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetaStore {
    /// Open or create the store.
    pub fn open(db_path: &Path) -> MachinedResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // Records must hit the disk before a reboot.
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA busy_timeout=10000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> MachinedResult<()> {
        db_err!(conn.execute_batch(SCHEMA))?;

        let current_version: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match current_version {
            None => {
                let now = Utc::now().to_rfc3339();
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![SCHEMA_VERSION, now],
                ))?;
                tracing::debug!("Initialized meta store schema version {}", SCHEMA_VERSION);
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(MachinedError::Database(format!(
                    "meta store schema version {} is newer than supported {}",
                    v, SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }
}

impl MetaStore for SqliteMetaStore {
    fn read_tag(&self, tag: MetaTag) -> MachinedResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        db_err!(
            conn.query_row(
                "SELECT value FROM meta_tags WHERE tag = ?1",
                [tag.code()],
                |row| row.get(0),
            )
            .optional()
        )
    }

    fn write_tag(&self, tag: MetaTag, value: &[u8]) -> MachinedResult<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        db_err!(conn.execute(
            "INSERT INTO meta_tags (tag, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(tag) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![tag.code(), value, now],
        ))?;
        Ok(())
    }

    fn delete_tag(&self, tag: MetaTag) -> MachinedResult<bool> {
        let conn = self.conn.lock();
        let removed = db_err!(conn.execute("DELETE FROM meta_tags WHERE tag = ?1", [tag.code()]))?;
        Ok(removed > 0)
    }
}
