//! Postgres store
//!
//! Keeps the key space in the `log_store` table created by `db::run_migrations`.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use super::store::{KvStore, StoreResult};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PgStore {
    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO log_store (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO log_store (key, value)
            VALUES ($1, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let row = sqlx::query_as::<_, EntryRow>("SELECT key, value FROM log_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.value))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM log_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT key, value
            FROM log_store
            WHERE key LIKE $1 ESCAPE '\'
            ORDER BY key COLLATE "C"
            "#,
        )
        .bind(like_prefix(prefix))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
    }

    async fn find_by_suffix(
        &self,
        prefix: &str,
        suffix: &str,
    ) -> StoreResult<Option<(String, Value)>> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT key, value
            FROM log_store
            WHERE key LIKE $1 ESCAPE '\' AND right(key, length($2)) = $2
            LIMIT 1
            "#,
        )
        .bind(like_prefix(prefix))
        .bind(suffix)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| (r.key, r.value)))
    }
}

fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EntryRow {
    key: String,
    value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("stream-"), "stream-%");
        assert_eq!(like_prefix("a_b%c"), "a\\_b\\%c%");
    }
}
