//! Shared fixtures for salesload integration tests
//!
//! The in-memory helpers need nothing external. [`TestPostgres`] and
//! [`TestMysql`] start a database container with the sales schema applied
//! and need Docker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use salesload_ingest::backend::memory::{MemoryDatabase, MemoryPool};
use salesload_ingest::config::LoaderConfig;
use salesload_ingest::{row, schema, RecordBatch, Row};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::{MySqlPool, PgPool};
use testcontainers::core::IntoContainerPort;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::mysql::Mysql;
use testcontainers_modules::postgres::Postgres;

const MYSQL_SCHEMA: &str = include_str!("../../../../migrations/mysql/sales_schema.sql");

/// A small but complete sales export
pub const SAMPLE_CSV: &str = "\
contract number,client enterprise,supply center,country,city,industry,product code,product name,product model,unit price,quantity,contract date,estimated delivery date,lodgement date,director,salesman,salesman number,gender,age,mobile phone
CSE0000106,Amazon,America,USA,Seattle,Internet,A50L172,Smart TV,SmartTVH7,250.50,3,2022/01/05,2022-02-01,2022-02-03,Alice,Mia,11201121,Female,30,13800000000
CSE0000106,Amazon,America,USA,Seattle,Internet,A50L173,Router,RouterX2,80,10,2022/01/05,2022-02-01,,Alice,Mia,11201121,Female,30,13800000000
CSE0000107,\"Tesla, Inc.\",America,USA,Austin,Automobile,A50L172,Smart TV,SmartTVH9,300,1,05/01/2022,,,Alice,Leo,11201122,Male,41,13900000000
CSE0000108,Huawei,Asia,China,Shenzhen,Electronics,A50L173,Router,RouterX2,80,7,20220301,2022-04-01,2022-04-02,Bob,Kai,11201123,Male,29,13700000000
";

pub fn config(chunk_size: usize, max_concurrency: usize) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.load.chunk_size = chunk_size;
    config.load.max_concurrency = Some(max_concurrency);
    config
}

/// In-memory database with every sales table created
pub fn memory_database() -> Arc<MemoryDatabase> {
    let db = MemoryDatabase::new();
    for table in schema::all_tables().expect("schema is valid") {
        db.create_table(table);
    }
    db
}

pub fn memory_pool(db: &Arc<MemoryDatabase>, max_connections: u32) -> Arc<MemoryPool> {
    Arc::new(MemoryPool::new(db.clone(), max_connections, Duration::from_secs(5)))
}

pub fn supply_center_batch(rows: &[(&str, &str)]) -> RecordBatch {
    RecordBatch::new(
        schema::supply_center().expect("descriptor is valid"),
        rows.iter().map(|(name, director)| row![*name, *director]).collect(),
    )
}

/// `n` distinct order lines for one contract
pub fn order_lines(n: usize) -> Vec<Row> {
    let date = NaiveDate::from_ymd_opt(2022, 1, 5);
    (0..n)
        .map(|i| {
            row![
                "CSE0000106",
                "A50L172",
                "SmartTVH7",
                i as i64,
                date,
                None::<NaiveDate>,
                11201121i64
            ]
        })
        .collect()
}

pub fn order_detail_batch(n: usize) -> RecordBatch {
    RecordBatch::new(schema::order_detail().expect("descriptor is valid"), order_lines(n))
}

/// PostgreSQL container with migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        Self::start_with_connections(8).await
    }

    pub async fn start_with_connections(max_connections: u32) -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;
        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        salesload_ingest::db::migrate_pg(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("count query failed")
    }
}

/// MySQL container with the sales schema applied
pub struct TestMysql {
    _container: ContainerAsync<Mysql>,
    pool: MySqlPool,
}

impl TestMysql {
    pub async fn start() -> Result<Self> {
        Self::start_with_connections(8).await
    }

    pub async fn start_with_connections(max_connections: u32) -> Result<Self> {
        let container = Mysql::default()
            .with_init_sql(MYSQL_SCHEMA.to_string().into_bytes())
            .start()
            .await
            .context("Failed to start MySQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(3306.tcp())
            .await
            .context("Failed to get container port")?;
        let connection_string = format!("mysql://root@{}:{}/test", host, port);

        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&connection_string)
            .await
            .context("Failed to connect to MySQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .expect("count query failed")
    }
}
