//! The only module that issues SQL. Everything
//! upstream works in terms of `engine::types` structs and plain
//! parameters, never `sqlx::Row`.

pub mod hot_ops;
pub mod producer_state;
pub mod segments;
pub mod session_meta;
pub mod stream_meta;
pub mod subscriptions;

use sqlx::{PgPool, Postgres, Transaction};

/// Thin handle over the pool. Read paths borrow `&PgPool` directly; writes
/// that must commit atomically (append, rotation) go through `begin()` and
/// pass the transaction into the submodule functions, which all accept
/// `impl sqlx::PgExecutor<'_>` so either works.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub fn new(pool: PgPool) -> Self {
        Storage { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
