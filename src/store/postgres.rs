use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use tracing::debug;

use super::{Store, StoreError, StorePath};

/// Postgres-backed store. Snapshots live in `current_records`, logs in
/// `history_entries`; see `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn set_current(&self, path: StorePath, data: &Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO current_records (path, data, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (path) DO UPDATE
                SET data = EXCLUDED.data, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(path.key())
        .bind(Json(data))
        .execute(&self.pool)
        .await?;

        debug!(path = %path, "Current record saved");
        Ok(())
    }

    async fn append_history(&self, path: StorePath, id: &str, data: &Value) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO history_entries (id, path, data) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(path.key())
            .bind(Json(data))
            .execute(&self.pool)
            .await?;

        debug!(path = %path, id = %id, "History entry saved");
        Ok(())
    }

    async fn latest(&self, path: StorePath) -> Result<Option<Value>, StoreError> {
        let row: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT data FROM current_records WHERE path = $1")
                .bind(path.key())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(Json(data),)| data))
    }

    async fn device_tokens(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT token FROM device_tokens ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(token,)| token).collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn insert_token(pool: &PgPool, token: &str, created_at: &str) {
        sqlx::query("INSERT INTO device_tokens (token, created_at) VALUES ($1, $2::timestamptz)")
            .bind(token)
            .bind(created_at)
            .execute(pool)
            .await
            .unwrap();
    }

    async fn history_rows(pool: &PgPool, path: StorePath) -> Vec<(String, Value)> {
        let rows: Vec<(String, Json<Value>)> =
            sqlx::query_as("SELECT id, data FROM history_entries WHERE path = $1 ORDER BY id")
                .bind(path.key())
                .fetch_all(pool)
                .await
                .unwrap();
        rows.into_iter().map(|(id, Json(data))| (id, data)).collect()
    }

    // -----------------------------------------------------------------------
    // current_records
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_is_none_before_first_write(pool: PgPool) {
        let store = PgStore::from_pool(pool);
        assert_eq!(store.latest(StorePath::CurrentSensor).await.unwrap(), None);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn current_is_last_write_wins(pool: PgPool) {
        let store = PgStore::from_pool(pool.clone());
        store.set_current(StorePath::CurrentPump, &json!({"v": 1})).await.unwrap();
        store.set_current(StorePath::CurrentPump, &json!({"v": 2})).await.unwrap();
        store.set_current(StorePath::CurrentSensor, &json!({"s": true})).await.unwrap();

        assert_eq!(store.latest(StorePath::CurrentPump).await.unwrap(), Some(json!({"v": 2})));
        assert_eq!(store.latest(StorePath::CurrentSensor).await.unwrap(), Some(json!({"s": true})));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM current_records")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 2);
    }

    // -----------------------------------------------------------------------
    // history_entries
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn history_keeps_every_entry_per_path(pool: PgPool) {
        let store = PgStore::from_pool(pool.clone());
        store
            .append_history(StorePath::PumpHistory, "1000_000", &json!({"on": true}))
            .await
            .unwrap();
        store
            .append_history(StorePath::PumpHistory, "1000_001", &json!({"on": true}))
            .await
            .unwrap();
        store
            .append_history(StorePath::GeneralMessages, "1000_002", &json!({"raw": "x"}))
            .await
            .unwrap();

        let pump = history_rows(&pool, StorePath::PumpHistory).await;
        assert_eq!(
            pump,
            vec![
                ("1000_000".to_owned(), json!({"on": true})),
                ("1000_001".to_owned(), json!({"on": true})),
            ]
        );
        assert_eq!(history_rows(&pool, StorePath::GeneralMessages).await.len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn history_never_overwrites_an_id(pool: PgPool) {
        let store = PgStore::from_pool(pool.clone());
        store
            .append_history(StorePath::SensorHistory, "1000_000", &json!({"v": 1}))
            .await
            .unwrap();

        let err = store
            .append_history(StorePath::SensorHistory, "1000_000", &json!({"v": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));

        let rows = history_rows(&pool, StorePath::SensorHistory).await;
        assert_eq!(rows, vec![("1000_000".to_owned(), json!({"v": 1}))]);
    }

    // -----------------------------------------------------------------------
    // device_tokens
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn device_tokens_in_registration_order(pool: PgPool) {
        insert_token(&pool, "late", "2026-03-02T00:00:00Z").await;
        insert_token(&pool, "early", "2026-03-01T00:00:00Z").await;

        let store = PgStore::from_pool(pool);
        assert_eq!(store.device_tokens().await.unwrap(), vec!["early", "late"]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn device_tokens_empty_table(pool: PgPool) {
        let store = PgStore::from_pool(pool);
        assert!(store.device_tokens().await.unwrap().is_empty());
    }
}
