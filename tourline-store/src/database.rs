use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tourline_core::CoreError;
use tracing::info;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(
        connection_string: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// SQLSTATEs that mean "lost a race, try again": serialization failure,
/// deadlock, lock timeout and a unique violation from a concurrent insert.
const CONFLICT_CODES: [&str; 4] = ["40001", "40P01", "55P03", "23505"];

pub fn db_error(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            if CONFLICT_CODES.iter().any(|c| *c == code) {
                return CoreError::ConcurrencyConflict(format!("{} ({})", db.message(), code));
            }
        }
    }
    CoreError::PersistenceError(e.to_string())
}
