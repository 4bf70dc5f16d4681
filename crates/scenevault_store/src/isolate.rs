//! Transaction scoping.
//!
//! Every query goes through [`Vault::conn`], which yields either a pooled
//! connection or the transaction of the enclosing [`Vault::isolate`] block.
//!
//! Isolate blocks hold the write lock from `BEGIN IMMEDIATE` on. A deferred
//! block that reads first fails with `SQLITE_BUSY` when it later tries to
//! write after another commit; taking the lock up front makes concurrent
//! blocks wait on the busy timeout instead.

use crate::error::{Result, StoreError};
use crate::Vault;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, SqliteConnection};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

pub(crate) type SharedTx = Arc<Mutex<Option<ImmediateTx>>>;

/// A pooled connection inside `BEGIN IMMEDIATE`.
pub struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl ImmediateTx {
    async fn begin(pool: &SqlitePool) -> Result<Self> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn, open: true })
    }

    async fn commit(mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.open = false;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.open = false;
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            // closing the connection discards the unfinished transaction
            self.conn.close_on_drop();
        }
    }
}

/// A connection for one or more queries.
///
/// Holding a `Conn` from inside an isolate block locks its transaction; drop
/// it before calling other vault methods.
pub enum Conn<'a> {
    Pool(PoolConnection<Sqlite>),
    Tx(MappedMutexGuard<'a, ImmediateTx>),
}

impl Deref for Conn<'_> {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            Conn::Pool(conn) => &**conn,
            Conn::Tx(tx) => &*tx.conn,
        }
    }
}

impl DerefMut for Conn<'_> {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            Conn::Pool(conn) => &mut **conn,
            Conn::Tx(tx) => &mut *tx.conn,
        }
    }
}

impl Vault {
    /// Acquire a connection bound to the current scope.
    pub async fn conn(&self) -> Result<Conn<'_>> {
        match &self.tx {
            None => Ok(Conn::Pool(self.pool.acquire().await?)),
            Some(shared) => {
                let guard = shared.lock().await;
                MutexGuard::try_map(guard, |tx| tx.as_mut())
                    .map(Conn::Tx)
                    .map_err(|_| StoreError::internal("Transaction already finished"))
            }
        }
    }

    /// True when this handle is bound to an isolate block.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Run `f` against a vault bound to a dedicated transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise and returns the
    /// error unchanged. Called on a handle that is already isolated, `f` runs
    /// in the outer transaction.
    pub async fn isolate<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Vault) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError>,
    {
        if self.tx.is_some() {
            return f(self.clone()).await;
        }

        let tx = ImmediateTx::begin(&self.pool).await?;
        let shared: SharedTx = Arc::new(Mutex::new(Some(tx)));
        let bound = Vault {
            pool: self.pool.clone(),
            blobs: self.blobs.clone(),
            tx: Some(Arc::clone(&shared)),
        };

        let outcome = f(bound).await;
        let tx = shared.lock().await.take();
        let Some(tx) = tx else {
            return Err(StoreError::internal("Transaction finished inside isolate block").into());
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                } else {
                    debug!("Isolate block rolled back");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{StoreError, Vault, VaultConfig};
    use tempfile::TempDir;

    async fn open() -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open(&VaultConfig::new(dir.path())).await.unwrap();
        (dir, vault)
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let (_dir, vault) = open().await;
        let id = vault
            .isolate(|tx| async move { tx.create_scene("committed", None).await })
            .await
            .unwrap();
        assert_eq!(vault.get_scene(id).await.unwrap().name, "committed");
    }

    #[tokio::test]
    async fn test_rollback_reraises_original_error() {
        let (_dir, vault) = open().await;
        let result: Result<(), StoreError> = vault
            .isolate(|tx| async move {
                tx.create_scene("partial", None).await?;
                Err(StoreError::bad_request("late failure"))
            })
            .await;

        match result {
            Err(StoreError::BadRequest(msg)) => assert_eq!(msg, "late failure"),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
        let err = vault.get_scene_by_name("partial").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_invisible_to_other_handles() {
        let (_dir, vault) = open().await;
        let outside = vault.clone();
        vault
            .isolate(|tx| async move {
                tx.create_scene("pending", None).await?;
                assert!(tx.get_scene_by_name("pending").await.is_ok());
                assert!(outside.get_scene_by_name("pending").await.is_err());
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();
        assert!(vault.get_scene_by_name("pending").await.is_ok());
    }

    #[tokio::test]
    async fn test_nested_isolate_reuses_outer_transaction() {
        let (_dir, vault) = open().await;
        let result: Result<(), StoreError> = vault
            .isolate(|outer| async move {
                let inner_saw_tx = outer
                    .isolate(|inner| async move {
                        inner.create_scene("nested", None).await?;
                        Ok::<_, StoreError>(inner.in_transaction())
                    })
                    .await?;
                assert!(inner_saw_tx);
                Err(StoreError::conflict("abort outer"))
            })
            .await;

        assert!(result.is_err());
        // inner write was part of the outer transaction and rolled back with it
        assert!(vault.get_scene_by_name("nested").await.is_err());
    }
}
