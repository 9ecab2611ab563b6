use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Every record lives in one key space; keys encode the record kind and ids
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log_store (
            key TEXT PRIMARY KEY,
            value JSONB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Prefix scans order by key
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_log_store_key_pattern ON log_store(key text_pattern_ops)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
