//! The local store: row models plus the repository implementing the change
//! tracker and the pull merge.

mod model;
mod repository;

pub use model::*;
pub use repository::*;
