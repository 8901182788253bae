use std::io::Cursor;
use std::sync::Arc;

use product_ingest::config::IngestConfig;
use product_ingest::ingest::{BatchSink, IngestPipeline, PgBulkLoader};
use product_ingest::models::Product;
use product_ingest::store::local::LocalObjectStore;
use product_ingest::test_support::{TestDatabase, count_products, jsonl_body, sample_product};

async fn test_database(test: &str) -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(err) if err.is_unavailable() => {
            eprintln!("skipping {test}: {err}");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn config(batch_size: usize) -> IngestConfig {
    IngestConfig {
        batch_size,
        ..IngestConfig::default()
    }
}

#[tokio::test]
async fn loader_binds_every_column() {
    let Some(test_db) = test_database("loader_binds_every_column").await else {
        return;
    };
    let loader = PgBulkLoader::new(test_db.pool_clone(), 2);

    let mut odd = sample_product(11);
    odd.description = "quotes ' and \"unicode\" ✓".to_string();
    let batch = vec![sample_product(10), odd.clone(), sample_product(12)];

    let inserted = loader.insert_batch(&batch).await.expect("insert succeeds");
    assert_eq!(inserted, 3);

    let stored: Product = sqlx::query_as(
        "SELECT id, price, title, category, brand, url, description FROM products WHERE id = $1",
    )
    .bind(11_i64)
    .fetch_one(test_db.pool())
    .await
    .expect("row exists");
    assert_eq!(stored, odd);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn duplicate_ids_in_one_run_keep_one_row() {
    let Some(test_db) = test_database("duplicate_ids_in_one_run_keep_one_row").await else {
        return;
    };
    let loader = Arc::new(PgBulkLoader::new(test_db.pool_clone(), 2));
    let pipeline = IngestPipeline::new(config(2), loader).expect("valid config");

    // id 7 twice in the same batch and once more in a later batch.
    let body = jsonl_body([7, 7, 1, 7, 2]);
    let summary = pipeline
        .run_sources(vec![("dupes.jsonl".to_string(), Cursor::new(body.into_bytes()))])
        .await
        .expect("run succeeds");

    assert_eq!(summary.records_parsed, 5);
    assert_eq!(summary.rows_inserted, 3);

    let sevens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE id = 7")
        .fetch_one(test_db.pool())
        .await
        .expect("count succeeds");
    assert_eq!(sevens, 1);
    assert_eq!(count_products(test_db.pool()).await.expect("count"), 3);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn rerunning_the_same_objects_is_idempotent() {
    let Some(test_db) = test_database("rerunning_the_same_objects_is_idempotent").await else {
        return;
    };

    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("products-1.jsonl"), jsonl_body(1..=250)).expect("write");
    std::fs::write(dir.path().join("products-2.jsonl"), jsonl_body(251..=401)).expect("write");
    let store = LocalObjectStore::new(dir.path().to_path_buf());
    let keys = vec!["products-1.jsonl".to_string(), "products-2.jsonl".to_string()];

    let loader = Arc::new(PgBulkLoader::new(test_db.pool_clone(), 100));
    let pipeline = IngestPipeline::new(config(100), loader).expect("valid config");

    let first = pipeline.run(&store, &keys).await.expect("first run");
    assert_eq!(first.rows_inserted, 401);
    assert_eq!(first.batches_dispatched, 5);

    let second = pipeline.run(&store, &keys).await.expect("second run");
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.records_parsed, 401);

    assert_eq!(count_products(test_db.pool()).await.expect("count"), 401);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn missing_object_fails_before_loading() {
    let Some(test_db) = test_database("missing_object_fails_before_loading").await else {
        return;
    };

    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("products-1.jsonl"), jsonl_body(1..=10)).expect("write");
    let store = LocalObjectStore::new(dir.path().to_path_buf());
    let keys = vec!["products-1.jsonl".to_string(), "products-9.jsonl".to_string()];

    let loader = Arc::new(PgBulkLoader::new(test_db.pool_clone(), 100));
    let pipeline = IngestPipeline::new(config(100), loader).expect("valid config");

    let err = pipeline.run(&store, &keys).await.expect_err("missing key is fatal");
    assert!(err.to_string().contains("products-9.jsonl"));
    assert_eq!(count_products(test_db.pool()).await.expect("count"), 0);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn nul_in_text_is_skipped_not_fatal() {
    let Some(test_db) = test_database("nul_in_text_is_skipped_not_fatal").await else {
        return;
    };
    let loader = Arc::new(PgBulkLoader::new(test_db.pool_clone(), 2));
    let pipeline = IngestPipeline::new(config(2), loader).expect("valid config");

    let mut body = jsonl_body(1..=4);
    body.push_str("{\"id\":5,\"title\":\"a\\u0000b\"}\n");
    body.push_str(&jsonl_body(6..=9));
    let summary = pipeline
        .run_sources(vec![("products-1.jsonl".to_string(), Cursor::new(body.into_bytes()))])
        .await
        .expect("skip policy keeps going");

    assert_eq!(summary.records_skipped, 1);
    assert_eq!(summary.rejected[0].line, 5);
    assert_eq!(summary.batches_failed, 0);
    assert_eq!(summary.rows_inserted, 8);
    assert_eq!(count_products(test_db.pool()).await.expect("count"), 8);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn rows_rejected_by_postgres_are_a_data_rejection() {
    let Some(test_db) = test_database("rows_rejected_by_postgres_are_a_data_rejection").await else {
        return;
    };
    let loader = PgBulkLoader::new(test_db.pool_clone(), 2);

    let mut bad = sample_product(5);
    bad.title = "a\0b".to_string();
    let err = loader
        .insert_batch(&[sample_product(4), bad])
        .await
        .expect_err("postgres refuses NUL in text");

    assert!(err.is_data_rejection());
    assert!(!err.is_transient());
    assert_eq!(count_products(test_db.pool()).await.expect("count"), 0);

    test_db.close().await.expect("failed to drop test database");
}
