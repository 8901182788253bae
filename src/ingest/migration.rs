//! Schema management for the `products` table.
//!
//! Both the HTTP service and the ingest job apply pending migrations before touching
//! the table, so either can run first against an empty database.

use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
