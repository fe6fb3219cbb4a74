use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::assemble::MigrationUnit;
use crate::category::strip_category_prefix;
use crate::runtime::ensure_parent_dir;

const LEDGER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS migrated_units (
    source_title TEXT PRIMARY KEY,
    space_key TEXT NOT NULL,
    destination_title TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    is_category INTEGER NOT NULL,
    renamed INTEGER NOT NULL,
    migrated_at_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migrated_units_space ON migrated_units(space_key);
"#;

/// One unit created on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub source_title: String,
    pub space_key: String,
    pub destination_title: String,
    pub content_hash: String,
    pub is_category: bool,
    pub renamed: bool,
    pub migrated_at_unix: i64,
}

impl LedgerEntry {
    pub fn from_unit(unit: &MigrationUnit) -> Self {
        Self {
            source_title: unit.source_title.clone(),
            space_key: unit.space_key.clone(),
            destination_title: unit.title.clone(),
            content_hash: compute_hash(&unit.body),
            is_category: unit.is_category,
            renamed: unit.title != strip_category_prefix(&unit.source_title),
            migrated_at_unix: unix_timestamp(),
        }
    }
}

/// Record of what each run created, keyed by source title.
pub struct Ledger {
    connection: Connection,
}

impl Ledger {
    pub fn open(db_path: &Path) -> Result<Self> {
        ensure_parent_dir(db_path)?;
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory ledger")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(LEDGER_SCHEMA_SQL)
            .context("failed to initialize ledger schema")?;
        Ok(Self { connection })
    }

    pub fn record(&self, entry: &LedgerEntry) -> Result<()> {
        self.connection
            .execute(
                "INSERT INTO migrated_units (
                    source_title, space_key, destination_title, content_hash,
                    is_category, renamed, migrated_at_unix
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(source_title) DO UPDATE SET
                    space_key = excluded.space_key,
                    destination_title = excluded.destination_title,
                    content_hash = excluded.content_hash,
                    is_category = excluded.is_category,
                    renamed = excluded.renamed,
                    migrated_at_unix = excluded.migrated_at_unix",
                params![
                    entry.source_title,
                    entry.space_key,
                    entry.destination_title,
                    entry.content_hash,
                    i64::from(entry.is_category),
                    i64::from(entry.renamed),
                    entry.migrated_at_unix,
                ],
            )
            .with_context(|| format!("failed to record ledger entry for {}", entry.source_title))?;
        Ok(())
    }

    pub fn lookup(&self, source_title: &str) -> Result<Option<LedgerEntry>> {
        self.connection
            .query_row(
                "SELECT source_title, space_key, destination_title, content_hash,
                        is_category, renamed, migrated_at_unix
                 FROM migrated_units WHERE source_title = ?1",
                params![source_title],
                |row| {
                    Ok(LedgerEntry {
                        source_title: row.get(0)?,
                        space_key: row.get(1)?,
                        destination_title: row.get(2)?,
                        content_hash: row.get(3)?,
                        is_category: row.get::<_, i64>(4)? != 0,
                        renamed: row.get::<_, i64>(5)? != 0,
                        migrated_at_unix: row.get(6)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("failed to read ledger entry for {source_title}"))
    }

    /// Destination title recorded for `source_title`, if it was migrated.
    pub fn destination_title(&self, source_title: &str) -> Result<Option<String>> {
        Ok(self
            .lookup(source_title)?
            .map(|entry| entry.destination_title))
    }

    pub fn remove(&self, source_title: &str) -> Result<bool> {
        let removed = self
            .connection
            .execute(
                "DELETE FROM migrated_units WHERE source_title = ?1",
                params![source_title],
            )
            .with_context(|| format!("failed to remove ledger entry for {source_title}"))?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM migrated_units", [], |row| row.get(0))
            .context("failed to count ledger entries")?;
        usize::try_from(count).context("ledger count does not fit into usize")
    }
}

pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| i64::try_from(duration.as_secs()).ok())
        .unwrap_or(0)
}
