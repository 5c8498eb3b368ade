//! Single-writer actor for the SQLite database.
//!
//! SQLite allows one writer at a time; funneling every write through one
//! blocking thread avoids lock contention between async tasks and gives each
//! job its own immediate transaction. Jobs run in submission order.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::error;
use tokio::sync::{mpsc, oneshot};

use larkmail_core::errors::{DatabaseError, Error, Result};

use crate::db::DbPool;
use crate::errors::StorageError;

type WriteJob = Box<dyn FnOnce(&DbPool) + Send + 'static>;

/// Transaction error carrier so domain errors pass through diesel's
/// transaction machinery without losing their type.
enum TxError {
    Domain(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

/// Cloneable handle submitting write jobs to the writer thread.
#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<WriteJob>,
}

impl WriteHandle {
    /// Run `f` inside one immediate transaction on the writer thread. Any
    /// error from `f` rolls the whole job back.
    pub async fn exec<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let job: WriteJob = Box::new(move |pool| {
            let result = run_in_transaction(pool, f);
            let _ = reply_tx.send(result);
        });
        self.tx.send(job).map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Database writer has shut down".to_string(),
            ))
        })?;
        reply_rx.await.map_err(|_| {
            Error::Database(DatabaseError::Internal(
                "Database writer dropped the reply channel".to_string(),
            ))
        })?
    }
}

fn run_in_transaction<T, F>(pool: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T>,
{
    let mut conn = pool.get().map_err(StorageError::from)?;
    conn.immediate_transaction::<T, TxError, _>(|tx| f(tx).map_err(TxError::Domain))
        .map_err(|e| match e {
            TxError::Domain(err) => err,
            TxError::Diesel(err) => StorageError::Query(err).into(),
        })
}

/// Start the writer thread. The thread exits when every handle is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteJob>();
    std::thread::Builder::new()
        .name("larkmail-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                job(&pool);
            }
        })
        .unwrap_or_else(|e| {
            error!("Failed to spawn database writer thread: {e}");
            panic!("database writer thread could not start");
        });
    WriteHandle { tx }
}
