use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, Pool, Postgres, Row as _};
use tracing::info;

use super::{DocumentStore, Filter, ListOptions, Row, SortOrder, StoreError};

/// Postgres adapter: one `entities` table, documents in a `JSONB` column, filters as `doc @> $filter`.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        info!("migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> { &self.pool }

    fn decode(r: sqlx::postgres::PgRow) -> Result<Row, StoreError> {
        let key: String = r.try_get("key")?;
        let doc: Json<Value> = r.try_get("doc")?;
        let create_time: DateTime<Utc> = r.try_get("create_time")?;
        Ok(Row { key, doc: doc.0, create_time })
    }
}

const INSERT: &str = "INSERT INTO entities (kind, key, doc, create_time) VALUES ($1,$2,$3,$4) ON CONFLICT (kind, key) DO NOTHING";

#[async_trait]
impl DocumentStore for PgStore {
    async fn add(&self, kind: &'static str, row: Row) -> Result<(), StoreError> {
        let res = sqlx::query(INSERT)
            .bind(kind).bind(&row.key).bind(Json(&row.doc)).bind(row.create_time)
            .execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { kind, key: row.key });
        }
        Ok(())
    }

    async fn add_guarded(&self, kind: &'static str, row: Row, guards: &[Filter]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        // Serialises guarded inserts of one kind until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))").bind(kind).execute(&mut *tx).await?;
        for guard in guards {
            let blocked: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM entities WHERE kind=$1 AND doc @> $2)")
                .bind(kind).bind(Json(guard.as_value()))
                .fetch_one(&mut *tx).await?;
            if blocked {
                tx.rollback().await?;
                return Err(StoreError::Conflict { kind, key: row.key });
            }
        }
        let res = sqlx::query(INSERT)
            .bind(kind).bind(&row.key).bind(Json(&row.doc)).bind(row.create_time)
            .execute(&mut *tx).await?;
        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::AlreadyExists { kind, key: row.key });
        }
        tx.commit().await?;
        Ok(())
    }

    async fn put(&self, kind: &'static str, key: &str, doc: Value) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE entities SET doc=$3 WHERE kind=$1 AND key=$2")
            .bind(kind).bind(key).bind(Json(&doc))
            .execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind, key: key.to_string() });
        }
        Ok(())
    }

    async fn get(&self, kind: &'static str, key: &str) -> Result<Row, StoreError> {
        let row = sqlx::query("SELECT key, doc, create_time FROM entities WHERE kind=$1 AND key=$2")
            .bind(kind).bind(key)
            .fetch_optional(&self.pool).await?;
        match row {
            Some(r) => Self::decode(r),
            None => Err(StoreError::NotFound { kind, key: key.to_string() }),
        }
    }

    async fn delete(&self, kind: &'static str, key: &str) -> Result<(), StoreError> {
        let res = sqlx::query("DELETE FROM entities WHERE kind=$1 AND key=$2")
            .bind(kind).bind(key)
            .execute(&self.pool).await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound { kind, key: key.to_string() });
        }
        Ok(())
    }

    async fn list(&self, kind: &'static str, filter: &Filter, opts: &ListOptions) -> Result<Vec<Row>, StoreError> {
        let order = match opts.sort {
            SortOrder::NewestFirst => "create_time DESC, seq DESC",
            SortOrder::OldestFirst => "create_time ASC, seq ASC",
        };
        let (offset, limit) = match opts.window() {
            Some((offset, limit)) => (offset as i64, Some(limit as i64)),
            None => (0, None),
        };
        let sql = format!("SELECT key, doc, create_time FROM entities WHERE kind=$1 AND doc @> $2 ORDER BY {order} LIMIT $3 OFFSET $4");
        let rows = sqlx::query(&sql)
            .bind(kind).bind(Json(filter.as_value())).bind(limit).bind(offset)
            .fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::decode).collect()
    }

    async fn count(&self, kind: &'static str, filter: &Filter) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM entities WHERE kind=$1 AND doc @> $2")
            .bind(kind).bind(Json(filter.as_value()))
            .fetch_one(&self.pool).await?;
        Ok(n.max(0) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
