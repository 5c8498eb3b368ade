use sqlx::PgPool;

use crate::cors::CorsPolicy;

pub struct AppState {
    pub pool: PgPool,
    pub cors: CorsPolicy,
}
