//! PostgreSQL integration tests
//!
//! Each test starts its own container with the bundled migrations applied.
//! Run with `cargo test -p salesload-ingest --test postgres_tests -- --ignored`.

mod common;

use std::sync::Arc;

use common::*;
use salesload_ingest::backend::{ConnectionProvider, PoolProvider};
use salesload_ingest::{extract, loader, pipeline, row, schema, FailureKind, Row, RunOutcome, Value};

#[tokio::test]
#[ignore] // Requires Docker
async fn test_supply_center_load_is_idempotent() {
    let pg = TestPostgres::start().await.unwrap();
    let provider = PoolProvider::new(pg.pool().clone());
    let table = schema::supply_center().unwrap();
    let rows = vec![row!["North", "Alice"], row!["South", "Bob"]];

    let mut conn = provider.acquire().await.unwrap();
    assert_eq!(loader::load(&mut conn, &table, &rows).await.unwrap(), 2);
    assert_eq!(loader::load(&mut conn, &table, &rows).await.unwrap(), 0);
    provider.release(conn).await;

    assert_eq!(pg.count("supply_center").await, 2);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_conflicting_row_does_not_overwrite() {
    let pg = TestPostgres::start().await.unwrap();
    let provider = PoolProvider::new(pg.pool().clone());
    let table = schema::supply_center().unwrap();

    let mut conn = provider.acquire().await.unwrap();
    loader::load(&mut conn, &table, &[row!["North", "Alice"]]).await.unwrap();
    let inserted = loader::load(&mut conn, &table, &[row!["North", "Zed"], row!["North", "Yan"]])
        .await
        .unwrap();
    provider.release(conn).await;

    assert_eq!(inserted, 0);
    let director: String = sqlx::query_scalar("SELECT director FROM supply_center WHERE center_name = 'North'")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(director, "Alice");
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_null_marker_text_and_empty_text_survive_copy() {
    let pg = TestPostgres::start().await.unwrap();
    let provider = PoolProvider::new(pg.pool().clone());
    let table = schema::supply_center().unwrap();
    let rows = vec![
        row!["North", "\\N"],
        row!["South", ""],
        Row::new(vec![Value::text("East"), Value::Null]),
    ];

    let mut conn = provider.acquire().await.unwrap();
    assert_eq!(loader::load(&mut conn, &table, &rows).await.unwrap(), 3);
    provider.release(conn).await;

    let directors: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT center_name, director FROM supply_center ORDER BY center_name")
            .fetch_all(pg.pool())
            .await
            .unwrap();
    assert_eq!(
        directors,
        vec![
            ("East".to_string(), None),
            ("North".to_string(), Some("\\N".to_string())),
            ("South".to_string(), Some(String::new())),
        ]
    );
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_failed_merge_leaves_no_rows() {
    let pg = TestPostgres::start().await.unwrap();
    let provider = PoolProvider::new(pg.pool().clone());

    // The client references a supply center that does not exist
    let table = schema::client().unwrap();
    let rows = vec![
        row!["Amazon", "USA", "America", "Seattle", "Internet"],
        row!["Ghost", "Nowhere", "Atlantis", "", ""],
    ];

    let mut conn = provider.acquire().await.unwrap();
    let err = loader::load(&mut conn, &table, &rows).await.unwrap_err();
    provider.release(conn).await;

    assert_eq!(err.kind(), FailureKind::MergeFailure);
    assert_eq!(pg.count("client").await, 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_sample_export_end_to_end() {
    let pg = TestPostgres::start().await.unwrap();
    let provider = Arc::new(PoolProvider::new(pg.pool().clone()));
    let plan = schema::default_layout().unwrap();
    let batches = || extract::build_batches(extract::read_records(SAMPLE_CSV.as_bytes()).unwrap()).unwrap();

    let first = pipeline::run(provider.clone(), &plan, batches(), &config(2, 4)).await.unwrap();
    assert_eq!(first.outcome, RunOutcome::Completed, "{}", first.summarize());
    assert_eq!(pg.count("client").await, 3);
    assert_eq!(pg.count("order_detail").await, 4);

    let name: String = sqlx::query_scalar("SELECT client_name FROM contract WHERE contract_number = 'CSE0000107'")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(name, "Tesla, Inc.");

    let lodged: Option<chrono::NaiveDate> =
        sqlx::query_scalar("SELECT lodgement_date FROM order_detail WHERE quantity = 1")
            .fetch_one(pg.pool())
            .await
            .unwrap();
    assert_eq!(lodged, None);

    let second = pipeline::run(provider, &plan, batches(), &config(2, 4)).await.unwrap();
    assert!(second.is_success());
    assert_eq!(second.table("client").unwrap().rows_affected, 0);
    assert_eq!(pg.count("client").await, 3);
    assert_eq!(pg.count("order_detail").await, 8);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_parallel_chunks_of_one_table_use_private_staging() {
    let pg = TestPostgres::start_with_connections(4).await.unwrap();
    let provider = Arc::new(PoolProvider::new(pg.pool().clone()));

    // Parents for the order lines
    for statement in [
        "INSERT INTO supply_center VALUES ('America', 'Alice')",
        "INSERT INTO client VALUES ('Amazon', 'USA', 'America', 'Seattle', 'Internet')",
        "INSERT INTO contract VALUES ('CSE0000106', 'Amazon', '2022-01-05')",
        "INSERT INTO product VALUES ('A50L172', 'Smart TV')",
        "INSERT INTO product_model VALUES ('A50L172', 'SmartTVH7', 250.5)",
        "INSERT INTO sales VALUES (11201121, 'Mia', 'Female', '13800000000', 30)",
    ] {
        sqlx::query(statement).execute(pg.pool()).await.unwrap();
    }

    let report = pipeline::run(
        provider,
        &schema::default_layout().unwrap(),
        vec![order_detail_batch(10_000)],
        &config(1_000, 4),
    )
    .await
    .unwrap();

    assert!(report.is_success(), "{}", report.summarize());
    assert_eq!(report.results.len(), 10);
    assert_eq!(pg.count("order_detail").await, 10_000);
}
