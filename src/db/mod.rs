use rusqlite::Connection;
use std::path::Path;
use tokio::task;
use crate::error::{Result, BomGraphError};

/// Database connection wrapper
///
/// Holds the path only; each access opens a fresh connection inside a
/// blocking task so resolver and batch workers never hold a connection
/// across await points.
pub struct Db {
    path: std::path::PathBuf,
}

impl Db {
    /// Create a new database connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    fn apply_pragmas(conn: &Connection) -> Result<()> {
        // WAL for concurrent readers while batch workers write checkpoints,
        // NORMAL sync for speed, foreign keys for referential integrity on
        // the item master. The BOM relation table deliberately has no FK on
        // component_code (ERP data contains dangling references).
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; \
             PRAGMA synchronous = NORMAL; \
             PRAGMA foreign_keys = ON; \
             PRAGMA temp_store = MEMORY; \
             PRAGMA cache_size = -65536;",
        )?;
        Ok(())
    }

    /// Open a new database connection with optimized pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(BomGraphError::Database)?;
        Self::apply_pragmas(&conn)?;
        Ok(conn)
    }

    /// Execute a closure with a database connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).map_err(BomGraphError::Database)?;
            Self::apply_pragmas(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| BomGraphError::Infrastructure(format!("database task panicked: {}", e)))?
    }
}

pub mod migrate;
