//! Bounded pool of S3 client handles (component C3).
//!
//! Grounded on `zarr::S3ConnectionPool` (`src/internal/s3.connection.hh`):
//! a fixed set of connections, `get_connection` blocks until one is
//! available, `return_connection` gives one back. The original guards the
//! vector with a mutex + condition variable; as with [`crate::threadpool`],
//! we use a bounded `crossbeam_channel` instead — the channel itself is the
//! vector-of-available-connections, and `recv`/`send` are the condvar
//! wait/notify. Shutdown is modeled by dropping the pool's sender half,
//! which unblocks every thread parked in `get_connection`, matching "
//! shutdown releases all waiters."

use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::Result;
use crate::s3::connection::S3Connection;

pub struct S3ConnectionPool {
    tx: Mutex<Option<Sender<Arc<S3Connection>>>>,
    rx: Receiver<Arc<S3Connection>>,
    // Keeps the background runtime (and its worker threads) alive for as
    // long as any connection built against it might still be in use.
    _runtime: tokio::runtime::Runtime,
}

impl S3ConnectionPool {
    /// Build `n_connections` identically-configured clients sharing one
    /// background Tokio runtime, and seed the pool with all of them.
    pub fn new(
        n_connections: usize,
        endpoint: &str,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        let n_connections = n_connections.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(n_connections.min(4))
            .enable_all()
            .build()
            .map_err(|e| {
                crate::error::ZarrError::InternalError(format!(
                    "failed to start S3 connection pool runtime: {e}"
                ))
            })?;
        let handle = runtime.handle().clone();

        let (tx, rx) = bounded(n_connections);
        for _ in 0..n_connections {
            let conn = Arc::new(S3Connection::new(
                handle.clone(),
                endpoint,
                access_key_id,
                secret_access_key,
            ));
            tx.send(conn).expect("pool channel has room for every seeded connection");
        }

        Ok(S3ConnectionPool {
            tx: Mutex::new(Some(tx)),
            rx,
            _runtime: runtime,
        })
    }

    /// Block until a connection is available, or `None` once the pool has
    /// been shut down and drained.
    pub fn get_connection(&self) -> Option<Arc<S3Connection>> {
        self.rx.recv().ok()
    }

    /// Return a connection borrowed via [`get_connection`]. A no-op after
    /// shutdown (the connection is simply dropped).
    pub fn return_connection(&self, conn: Arc<S3Connection>) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send(conn);
        }
    }

    /// Stop accepting returns and wake every thread blocked in
    /// `get_connection`. Idempotent.
    pub fn shutdown(&self) {
        self.tx.lock().unwrap().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pool(n: usize) -> S3ConnectionPool {
        S3ConnectionPool::new(n, "http://127.0.0.1:9000", "minioadmin", "minioadmin").unwrap()
    }

    #[test]
    fn get_and_return_round_trips() {
        let pool = test_pool(2);
        let conn = pool.get_connection().unwrap();
        pool.return_connection(conn);
        assert!(pool.get_connection().is_some());
    }

    #[test]
    fn pool_is_bounded_to_requested_size() {
        let pool = test_pool(2);
        let a = pool.get_connection().unwrap();
        let b = pool.get_connection().unwrap();
        assert!(pool.rx.try_recv().is_err(), "both connections are checked out");
        pool.return_connection(a);
        pool.return_connection(b);
        assert!(pool.get_connection().is_some());
        assert!(pool.get_connection().is_some());
    }

    #[test]
    fn shutdown_unblocks_future_returns_as_no_ops() {
        let pool = test_pool(1);
        let conn = pool.get_connection().unwrap();
        pool.shutdown();
        pool.return_connection(conn);
        assert!(pool.get_connection().is_none());
    }

    #[test]
    fn requesting_zero_connections_still_yields_one() {
        let pool = test_pool(0);
        assert!(pool.get_connection().is_some());
    }
}
