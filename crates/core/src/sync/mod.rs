//! Sync domain models, wire protocol types and merge rules.

mod model;
mod normalize;
mod protocol;

pub use model::*;
pub use normalize::*;
pub use protocol::*;
