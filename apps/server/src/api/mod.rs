use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub mod sync;
pub mod token;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", get(sync::pull).post(sync::push))
        .route("/internal/refresh-token", post(token::refresh))
        .route("/internal/revoke-token", delete(token::revoke_token))
}
