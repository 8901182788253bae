use rocket_db_pools::{Database, sqlx};

/// Pool for the product catalog, configured under `databases.catalog_db`.
#[derive(Database)]
#[database("catalog_db")]
pub struct CatalogDb(sqlx::PgPool);
