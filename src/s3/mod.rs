//! S3-compatible object storage backend: client wrapper and connection pool.

pub mod connection;
pub mod pool;

pub use connection::S3Connection;
pub use pool::S3ConnectionPool;
