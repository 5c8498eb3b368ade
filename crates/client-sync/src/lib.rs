//! Client-side sync driver for larkmail: the changes-endpoint HTTP client,
//! the push/pull cycle state machine, and the token refresh path.

pub mod client;
pub mod driver;
pub mod error;

pub use client::ChangesApiClient;
pub use driver::{spawn_sync, SyncDriver};
pub use error::{ApiRetryClass, Result, SyncError};
