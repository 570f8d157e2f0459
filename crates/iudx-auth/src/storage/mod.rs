//! SQLite persistence for users, grants, tokens and the revocation list.
//!
//! # Tables
//!
//! ```text
//! users           : registered people
//! roles           : (user, role, approval status)
//! resource_groups : resource groups that have at least one grant
//! access          : grants with their compiled policy
//! capability      : consumer capabilities of a grant
//! token           : issued tokens (hash only)
//! crl             : certificate revocation list
//! ```
//!
//! # Modules
//!
//! - [`users`]: users, roles and approval checks.
//! - [`grants`]: grant, capability and resource-group rows.
//! - [`tokens`]: token rows and their guarded flag updates.
//! - [`crl`]: the revocation list.
//!
//! Repository functions take a `&Connection` so callers can compose them
//! inside one transaction via [`Store::with_transaction`].

pub mod crl;
pub mod grants;
pub mod schema;
pub mod tokens;
pub mod users;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};

use crate::error::{AuthError, Result};

/// Time a writer waits for another process to release the database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to the database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (and initialize if needed) a file-backed store.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        match conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0)) {
            // In-memory databases report "memory".
            Ok(mode) if mode == "wal" || mode == "memory" => {}
            Ok(mode) => log::warn!("journal_mode is '{mode}', WAL unavailable"),
            Err(e) => log::warn!("failed to enable WAL journal mode: {e}"),
        }
        conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AuthError::StorageError("store lock poisoned".into()))
    }

    /// Run `f` against the connection outside any explicit transaction.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside `BEGIN IMMEDIATE` … `COMMIT`. Any error, including a
    /// failed commit, rolls the whole transaction back.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let value = f(&tx)?;

        tx.commit().map_err(|e| {
            log::warn!("commit failed, transaction rolled back: {e}");
            AuthError::from(e)
        })?;
        Ok(value)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
