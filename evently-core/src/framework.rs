use sqlx::PgPool;

/// Runs single-statement queries directly on the pool.
///
/// Entity queries are expressed as `Processor<Query> for DatabaseProcessor`;
/// statements that must share a transaction are `*_tx` associated functions
/// on the entity instead.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
