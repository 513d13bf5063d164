use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::error::NativeError;
use crate::native::{ConnectDescriptor, NativeConnection, NativeConnector};

use super::connection::{SqliteNativeConnection, map_sqlite_error};

/// Default time a statement waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(250);

const STATEMENT_CACHE_CAPACITY: usize = 64;

/// Options for opening `SQLite` sessions.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            wal: true,
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    #[must_use]
    pub fn build(self) -> SqliteConnector {
        SqliteConnector::new(self.finish())
    }
}

/// Opens rusqlite sessions on a database file.
///
/// The connect descriptor only selects the session label; the file comes
/// from [`SqliteOptions`].
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    opts: SqliteOptions,
}

impl SqliteConnector {
    #[must_use]
    pub fn new(opts: SqliteOptions) -> Self {
        Self { opts }
    }

    #[must_use]
    pub fn builder(db_path: String) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path)
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.opts
    }
}

#[async_trait]
impl NativeConnector for SqliteConnector {
    async fn open(
        &self,
        descriptor: &ConnectDescriptor,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        let opts = self.opts.clone();
        debug!(url = %descriptor.url, path = %opts.db_path, "opening sqlite session");
        let conn = spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&opts.db_path).map_err(map_sqlite_error)?;
            conn.busy_timeout(opts.busy_timeout)
                .map_err(map_sqlite_error)?;
            conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
            if opts.wal {
                conn.execute_batch("PRAGMA journal_mode = WAL;")
                    .map_err(map_sqlite_error)?;
            }
            Ok::<_, NativeError>(conn)
        })
        .await
        .map_err(|e| NativeError::with_code(0, format!("sqlite spawn_blocking join error: {e}")))??;
        Ok(Box::new(SqliteNativeConnection::new(Arc::new(Mutex::new(
            conn,
        )))))
    }
}
