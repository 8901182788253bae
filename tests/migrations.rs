use product_ingest::test_support::TestDatabase;
use sqlx::migrate::Migrator;

static TEST_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn products_table_count(pool: &sqlx::PgPool) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = 'products'",
    )
    .fetch_one(pool)
    .await
    .expect("lookup succeeded")
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let test_db = match TestDatabase::new_from_env().await {
        Ok(db) => db,
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping migration revert test: {err}");
            return;
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    };

    let pool = test_db.pool_clone();

    TEST_MIGRATOR.run(&pool).await.expect("migrations run");
    assert_eq!(products_table_count(&pool).await, 1);

    TEST_MIGRATOR.undo(&pool, 0).await.expect("migrations revert");
    assert_eq!(
        products_table_count(&pool).await,
        0,
        "products should be dropped after revert"
    );

    TEST_MIGRATOR.run(&pool).await.expect("migrations rerun");
    assert_eq!(products_table_count(&pool).await, 1);

    test_db.close().await.expect("failed to drop test database");
}
