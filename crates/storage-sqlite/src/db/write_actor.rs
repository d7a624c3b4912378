//! Single-threaded writer: every write runs in its own immediate transaction,
//! one at a time, on a dedicated thread.

use diesel::SqliteConnection;
use log::error;
use tokio::sync::{mpsc, oneshot};

use safecircle_core::errors::{DatabaseError, Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send>;

const WRITER_THREAD_NAME: &str = "safecircle-db-writer";

#[derive(Clone, Debug)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<Job>,
}

fn writer_stopped() -> Error {
    Error::Database(DatabaseError::ConnectionFailed(
        "Database writer is not running".to_string(),
    ))
}

impl WriteHandle {
    /// Runs `job` inside an immediate transaction on the writer thread.
    /// Any error rolls the whole job back.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let boxed: Job = Box::new(move |conn: &mut SqliteConnection| {
            let result = conn
                .immediate_transaction::<T, StorageError, _>(|tx| {
                    job(tx).map_err(StorageError::from)
                })
                .map_err(Error::from);
            let _ = reply_tx.send(result);
        });

        self.sender.send(boxed).map_err(|_| writer_stopped())?;
        reply_rx.await.map_err(|_| writer_stopped())?
    }
}

/// Starts the writer thread. It exits once every handle is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

    let spawned = std::thread::Builder::new()
        .name(WRITER_THREAD_NAME.to_string())
        .spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut *conn),
                    // Dropping the job fails the waiting caller.
                    Err(err) => error!("[Storage] Writer could not get a connection: {}", err),
                }
            }
        });
    if let Err(err) = spawned {
        error!("[Storage] Failed to start writer thread: {}", err);
    }

    WriteHandle { sender }
}
