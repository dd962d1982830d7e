use super::{KvStore, ListFn, UpdateFn};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tessera_core::{Result, TesseraError};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedded store backed by a single SQLite file.
///
/// Each row carries a version that every write bumps; `update` commits with
/// a conditional `UPDATE` on the version it read.
pub struct EmbeddedKv {
    path: PathBuf,
}

impl EmbeddedKv {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = Self { path };
        let path = store.path.clone();
        blocking(move || init_schema(&path)).await?;
        tracing::debug!("embedded metadata store opened. path={}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn get_conn(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(sqlite_error)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(sqlite_error)?;
    Ok(conn)
}

fn init_schema(path: &Path) -> Result<()> {
    let conn = get_conn(path)?;
    let _mode: String = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .map_err(sqlite_error)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (
            namespace BLOB NOT NULL,
            key BLOB NOT NULL,
            value BLOB NOT NULL,
            version INTEGER NOT NULL,
            PRIMARY KEY (namespace, key)
        )",
        [],
    )
    .map_err(sqlite_error)?;
    Ok(())
}

fn read_versioned(path: &Path, namespace: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, i64)>> {
    let conn = get_conn(path)?;
    conn.query_row(
        "SELECT value, version FROM metadata WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(sqlite_error)
}

/// Runs blocking SQLite work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| TesseraError::internal("SQLITE", err))?
}

fn sqlite_error(err: rusqlite::Error) -> TesseraError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            TesseraError::Timeout
        }
        Some(rusqlite::ErrorCode::CannotOpen) => TesseraError::Unavailable,
        _ => TesseraError::internal("SQLITE", err),
    }
}

#[async_trait]
impl KvStore for EmbeddedKv {
    async fn set(&self, namespace: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path.clone();
        let (namespace, key, value) = (namespace.to_vec(), key.to_vec(), value.to_vec());
        blocking(move || {
            let conn = get_conn(&path)?;
            conn.execute(
                "INSERT INTO metadata (namespace, key, value, version) VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT (namespace, key)
                 DO UPDATE SET value = excluded.value, version = metadata.version + 1",
                params![namespace, key, value],
            )
            .map_err(sqlite_error)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, namespace: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let (namespace, key) = (namespace.to_vec(), key.to_vec());
        blocking(move || read_versioned(&path, &namespace, &key))
            .await?
            .map(|(value, _)| value)
            .ok_or(TesseraError::NotFound)
    }

    async fn delete(&self, namespace: &[u8], key: &[u8]) -> Result<()> {
        let path = self.path.clone();
        let (namespace, key) = (namespace.to_vec(), key.to_vec());
        blocking(move || {
            let conn = get_conn(&path)?;
            conn.execute(
                "DELETE FROM metadata WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )
            .map_err(sqlite_error)?;
            Ok(())
        })
        .await
    }

    async fn update(
        &self,
        namespace: &[u8],
        key: &[u8],
        callback: &mut UpdateFn<'_>,
    ) -> Result<()> {
        loop {
            let path = self.path.clone();
            let (ns, k) = (namespace.to_vec(), key.to_vec());
            let (current, version) = blocking(move || read_versioned(&path, &ns, &k))
                .await?
                .ok_or(TesseraError::NotFound)?;

            let updated = callback(&current)?;

            let path = self.path.clone();
            let (ns, k) = (namespace.to_vec(), key.to_vec());
            let changed = blocking(move || {
                let conn = get_conn(&path)?;
                conn.execute(
                    "UPDATE metadata SET value = ?1, version = version + 1
                     WHERE namespace = ?2 AND key = ?3 AND version = ?4",
                    params![updated, ns, k, version],
                )
                .map_err(sqlite_error)
            })
            .await?;

            if changed == 1 {
                return Ok(());
            }
            tracing::debug!(
                "embedded update conflict, retrying. key={} version={}",
                String::from_utf8_lossy(key),
                version
            );
        }
    }

    async fn list_keys(&self, namespace: &[u8], callback: &mut ListFn<'_>) -> Result<()> {
        let path = self.path.clone();
        let namespace = namespace.to_vec();
        let keys = blocking(move || {
            let conn = get_conn(&path)?;
            let mut stmt = conn
                .prepare("SELECT key FROM metadata WHERE namespace = ?1 ORDER BY key")
                .map_err(sqlite_error)?;
            let rows = stmt
                .query_map(params![namespace], |row| row.get::<_, Vec<u8>>(0))
                .map_err(sqlite_error)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sqlite_error)
        })
        .await?;

        for key in keys {
            callback(&key)?;
        }
        Ok(())
    }
}
