//! Catalog persistence in SQLite.
//!
//! Rows are written one batch per transaction: either the whole catalog
//! lands or nothing does. The connection is owned by a single writer thread
//! ([`StoreWriter`]); async code talks to it over a channel.

use crate::catalog::ItemRecord;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to prepare database location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store writer is not running")]
    WriterGone,
}

/// How a batch meets rows already in the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Insert every record.
    #[default]
    Append,
    /// Key by `(url, locator)`: insert only records not stored yet. Existing
    /// rows are left untouched.
    Upsert,
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "upsert" => Ok(Self::Upsert),
            other => Err(format!("unknown write mode '{other}' (expected append|upsert)")),
        }
    }
}

/// Product catalog table.
pub struct Store {
    db: Connection,
}

impl Store {
    /// Open or create the database and its `products` table.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let db = Connection::open(path)?;
        Self::bootstrap(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(db: Connection) -> Result<Self, StoreError> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS products (
                title TEXT,
                url TEXT,
                locator TEXT
            );
            CREATE INDEX IF NOT EXISTS products_url_locator ON products (url, locator);",
        )?;
        Ok(Self { db })
    }

    /// Write `records` in one transaction. Returns the number of rows inserted.
    pub fn append_batch(&mut self, records: &[ItemRecord], mode: WriteMode) -> Result<usize, StoreError> {
        let sql = match mode {
            WriteMode::Append => "INSERT INTO products (title, url, locator) VALUES (?1, ?2, ?3)",
            WriteMode::Upsert => {
                "INSERT INTO products (title, url, locator)
                 SELECT ?1, ?2, ?3
                 WHERE NOT EXISTS (SELECT 1 FROM products WHERE url = ?2 AND locator = ?3)"
            }
        };

        let tx = self.db.transaction()?;
        let mut written = 0;
        {
            let mut insert = tx.prepare_cached(sql)?;
            for record in records {
                written += insert.execute(params![record.title, record.url, record.locator])?;
            }
        }
        // Dropping `tx` on an early return rolls the whole batch back.
        tx.commit()?;
        debug!(rows = written, ?mode, "catalog batch committed");
        Ok(written)
    }

    /// Number of stored rows.
    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// All stored rows in insertion order.
    pub fn rows(&self) -> Result<Vec<ItemRecord>, StoreError> {
        let mut stmt = self
            .db
            .prepare("SELECT title, url, locator FROM products ORDER BY rowid")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ItemRecord {
                    title: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    url: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    locator: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

enum Command {
    Write {
        records: Vec<ItemRecord>,
        mode: WriteMode,
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
    Count {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
}

/// Async front for a [`Store`] owned by one dedicated writer thread.
#[derive(Clone)]
pub struct StoreWriter {
    commands: mpsc::Sender<Command>,
}

impl StoreWriter {
    /// Move `store` onto its own thread. The thread exits once every
    /// `StoreWriter` clone is dropped.
    pub fn spawn(store: Store) -> Result<Self, StoreError> {
        let (commands, mut inbox) = mpsc::channel::<Command>(16);

        std::thread::Builder::new()
            .name("pricefetch-store".into())
            .spawn(move || {
                let mut store = store;
                while let Some(command) = inbox.blocking_recv() {
                    match command {
                        Command::Write {
                            records,
                            mode,
                            reply,
                        } => {
                            let result = store.append_batch(&records, mode);
                            if let Err(e) = &result {
                                warn!("catalog batch rolled back: {e}");
                            }
                            let _ = reply.send(result);
                        }
                        Command::Count { reply } => {
                            let _ = reply.send(store.count());
                        }
                    }
                }
                debug!("store writer stopped");
            })
            .map_err(|source| StoreError::Io {
                path: PathBuf::from("<writer thread>"),
                source,
            })?;

        Ok(Self { commands })
    }

    /// Persist one batch; resolves once it is committed or rolled back.
    pub async fn write_batch(&self, records: Vec<ItemRecord>, mode: WriteMode) -> Result<usize, StoreError> {
        let count = records.len();
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Write {
                records,
                mode,
                reply,
            })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        let written = response.await.map_err(|_| StoreError::WriterGone)??;
        info!(records = count, rows = written, "catalog persisted");
        Ok(written)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Count { reply })
            .await
            .map_err(|_| StoreError::WriterGone)?;
        response.await.map_err(|_| StoreError::WriterGone)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<ItemRecord> {
        (0..n)
            .map(|i| ItemRecord::new(format!("item {i}"), format!("http://x/{i}"), "//p"))
            .collect()
    }

    #[test]
    fn test_append_writes_every_record_in_order() {
        let mut store = Store::open_in_memory().unwrap();
        let batch = vec![ItemRecord::new("Widget", "http://x/1", "//span[@class='p']")];
        assert_eq!(store.append_batch(&batch, WriteMode::Append).unwrap(), 1);
        assert_eq!(store.rows().unwrap(), batch);

        assert_eq!(store.append_batch(&records(3), WriteMode::Append).unwrap(), 3);
        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(store.rows().unwrap()[3].title, "item 2");
    }

    #[test]
    fn test_append_keeps_duplicates() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_batch(&records(2), WriteMode::Append).unwrap();
        store.append_batch(&records(2), WriteMode::Append).unwrap();
        assert_eq!(store.count().unwrap(), 4);
    }

    #[test]
    fn test_upsert_makes_resubmission_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        assert_eq!(store.append_batch(&records(3), WriteMode::Upsert).unwrap(), 3);

        let mut again = records(4);
        again[1].title = "renamed".into();
        assert_eq!(store.append_batch(&again, WriteMode::Upsert).unwrap(), 1);

        let rows = store.rows().unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].title, "item 1");
        assert_eq!(rows[3].title, "item 3");
    }

    #[test]
    fn test_upsert_never_rewrites_a_stored_row() {
        let mut store = Store::open_in_memory().unwrap();
        let old = vec![ItemRecord::new("old", "http://x/1", "//p")];
        let new = vec![ItemRecord::new("new", "http://x/1", "//p")];

        store.append_batch(&old, WriteMode::Upsert).unwrap();
        assert_eq!(store.append_batch(&new, WriteMode::Upsert).unwrap(), 0);
        assert_eq!(store.rows().unwrap(), old);
    }

    #[test]
    fn test_upsert_collapses_duplicates_within_a_batch() {
        let mut store = Store::open_in_memory().unwrap();
        let batch = vec![
            ItemRecord::new("first", "http://x/1", "//p"),
            ItemRecord::new("second", "http://x/1", "//p"),
            ItemRecord::new("other locator", "http://x/1", "//b"),
        ];
        assert_eq!(store.append_batch(&batch, WriteMode::Upsert).unwrap(), 2);
        assert_eq!(store.rows().unwrap()[0].title, "first");
    }

    #[test]
    fn test_failure_mid_batch_rolls_back() {
        let mut store = Store::open_in_memory().unwrap();
        store.append_batch(&records(1), WriteMode::Append).unwrap();
        store
            .db
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON products
                 WHEN NEW.title = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let mut batch = records(3);
        batch.push(ItemRecord::new("boom", "http://x/boom", "//p"));
        batch.extend(records(2));

        let err = store.append_batch(&batch, WriteMode::Append).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/items_info.db");
        let mut store = Store::open(&path).unwrap();
        store.append_batch(&records(2), WriteMode::Append).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_writer_serializes_concurrent_batches() {
        let writer = StoreWriter::spawn(Store::open_in_memory().unwrap()).unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.write_batch(records(5), WriteMode::Append).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 5);
        }
        assert_eq!(writer.count().await.unwrap(), 20);
    }

    #[test]
    fn test_write_mode_parsing() {
        assert_eq!("UPSERT".parse::<WriteMode>(), Ok(WriteMode::Upsert));
        assert!("merge".parse::<WriteMode>().is_err());
    }
}
