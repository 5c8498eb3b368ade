//! Client-side local store for larkmail: a SQLite mirror of the server's
//! synced tables, the dirty-row change tracker, and the merge that applies
//! one changes response as a single transaction.

pub mod db;
pub mod errors;
pub mod schema;
pub mod store;

pub use db::{create_pool, get_connection, init, DbPool, WriteHandle};
pub use errors::StorageError;
pub use store::LocalStore;
