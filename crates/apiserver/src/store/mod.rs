//! Keyed document store for the normalized fragments.
//!
//! Every record kind is a JSON document stored under `(kind, primary key)` together with its
//! creation time. [`DocumentStore`] is the object-safe backend seam; [`Store`] is the typed
//! facade the services use, parametrised over [`Entity`] so no caller ever downcasts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} `{key}` not found")]
    NotFound { kind: &'static str, key: String },
    #[error("{kind} `{key}` already exists")]
    AlreadyExists { kind: &'static str, key: String },
    #[error("conditional insert of {kind} `{key}` rejected by a guard")]
    Conflict { kind: &'static str, key: String },
    #[error("document codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self { Self::Backend(e.to_string()) }
}

/// One stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub doc: Value,
    pub create_time: DateTime<Utc>,
}

/// Equality match on top-level document fields. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self { Self::default() }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }

    pub fn as_value(&self) -> Value { Value::Object(self.0.clone()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Pagination is 1-based; a missing or zero `page_size` returns every match.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub sort: SortOrder,
}

impl ListOptions {
    pub fn oldest_first() -> Self { Self { sort: SortOrder::OldestFirst, ..Default::default() } }

    pub fn paged(page: usize, page_size: usize) -> Self {
        Self { page: Some(page), page_size: Some(page_size), ..Default::default() }
    }

    pub(crate) fn window(&self) -> Option<(usize, usize)> {
        match self.page_size {
            Some(size) if size > 0 => {
                let page = self.page.unwrap_or(1).max(1);
                Some(((page - 1) * size, size))
            }
            _ => None,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn add(&self, kind: &'static str, row: Row) -> Result<(), StoreError>;
    /// Insert `row` unless a row of the same kind matches any of `guards`; the check and the
    /// insert are atomic with respect to other guarded inserts.
    async fn add_guarded(&self, kind: &'static str, row: Row, guards: &[Filter]) -> Result<(), StoreError>;
    /// Replace the document of an existing row, keeping its creation time.
    async fn put(&self, kind: &'static str, key: &str, doc: Value) -> Result<(), StoreError>;
    async fn get(&self, kind: &'static str, key: &str) -> Result<Row, StoreError>;
    async fn delete(&self, kind: &'static str, key: &str) -> Result<(), StoreError>;
    async fn list(&self, kind: &'static str, filter: &Filter, opts: &ListOptions) -> Result<Vec<Row>, StoreError>;
    async fn count(&self, kind: &'static str, filter: &Filter) -> Result<u64, StoreError>;
    async fn ping(&self) -> Result<(), StoreError>;
}

pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
    fn primary_key(&self) -> String;
    fn create_time(&self) -> DateTime<Utc>;
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn DocumentStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Store") }
}

impl Store {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self { Self { inner } }

    pub fn memory() -> Self { Self::new(Arc::new(MemoryStore::default())) }

    fn row<T: Entity>(entity: &T) -> Result<Row, StoreError> {
        Ok(Row { key: entity.primary_key(), doc: serde_json::to_value(entity)?, create_time: entity.create_time() })
    }

    fn decode<T: Entity>(row: Row) -> Result<T, StoreError> { Ok(serde_json::from_value(row.doc)?) }

    pub async fn add<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.inner.add(T::KIND, Self::row(entity)?).await
    }

    pub async fn add_guarded<T: Entity>(&self, entity: &T, guards: &[Filter]) -> Result<(), StoreError> {
        self.inner.add_guarded(T::KIND, Self::row(entity)?, guards).await
    }

    pub async fn put<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        self.inner.put(T::KIND, &entity.primary_key(), serde_json::to_value(entity)?).await
    }

    /// Insert, or update when a row with the same key already exists.
    pub async fn upsert<T: Entity>(&self, entity: &T) -> Result<(), StoreError> {
        match self.add(entity).await {
            Err(StoreError::AlreadyExists { .. }) => self.put(entity).await,
            other => other,
        }
    }

    pub async fn get<T: Entity>(&self, key: &str) -> Result<T, StoreError> {
        Self::decode(self.inner.get(T::KIND, key).await?)
    }

    pub async fn find<T: Entity>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists<T: Entity>(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.find::<T>(key).await?.is_some())
    }

    pub async fn delete<T: Entity>(&self, key: &str) -> Result<(), StoreError> {
        self.inner.delete(T::KIND, key).await
    }

    pub async fn list<T: Entity>(&self, filter: &Filter, opts: &ListOptions) -> Result<Vec<T>, StoreError> {
        self.inner.list(T::KIND, filter, opts).await?.into_iter().map(Self::decode).collect()
    }

    pub async fn first<T: Entity>(&self, filter: &Filter) -> Result<Option<T>, StoreError> {
        Ok(self.list(filter, &ListOptions::paged(1, 1)).await?.into_iter().next())
    }

    pub async fn count<T: Entity>(&self, filter: &Filter) -> Result<u64, StoreError> {
        self.inner.count(T::KIND, filter).await
    }

    pub async fn ping(&self) -> Result<(), StoreError> { self.inner.ping().await }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_top_level_fields() {
        let f = Filter::new().eq("appPrimaryKey", "demo").eq("envName", "dev");
        assert!(f.matches(&json!({"appPrimaryKey": "demo", "envName": "dev", "status": "init"})));
        assert!(!f.matches(&json!({"appPrimaryKey": "demo", "envName": "prod"})));
        assert!(!f.matches(&json!({"appPrimaryKey": "demo"})));
        assert!(Filter::new().matches(&json!({})));
    }

    #[test]
    fn window_is_one_based() {
        assert_eq!(ListOptions::paged(1, 10).window(), Some((0, 10)));
        assert_eq!(ListOptions::paged(3, 5).window(), Some((10, 5)));
        assert_eq!(ListOptions::paged(0, 5).window(), Some((0, 5)));
        assert_eq!(ListOptions::default().window(), None);
    }
}
