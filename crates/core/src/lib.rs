//! Core domain models and the changes-protocol contract for larkmail.

pub mod errors;
pub mod sync;

pub use errors::{Error, Result};
