use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{DocumentStore, Filter, ListOptions, Row, SortOrder, StoreError};

#[derive(Debug, Clone)]
struct Slot {
    row: Row,
    seq: u64,
}

#[derive(Default)]
struct Tables {
    kinds: HashMap<&'static str, BTreeMap<String, Slot>>,
    next_seq: u64,
}

impl Tables {
    fn insert(&mut self, kind: &'static str, row: Row) -> Result<(), StoreError> {
        let seq = self.next_seq;
        let table = self.kinds.entry(kind).or_default();
        if table.contains_key(&row.key) {
            return Err(StoreError::AlreadyExists { kind, key: row.key });
        }
        self.next_seq += 1;
        table.insert(row.key.clone(), Slot { row, seq });
        Ok(())
    }
}

/// Process-local store; rows live as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add(&self, kind: &'static str, row: Row) -> Result<(), StoreError> {
        self.tables.write().await.insert(kind, row)
    }

    async fn add_guarded(&self, kind: &'static str, row: Row, guards: &[Filter]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if let Some(table) = tables.kinds.get(kind) {
            let blocked = table.values().any(|s| guards.iter().any(|g| g.matches(&s.row.doc)));
            if blocked {
                return Err(StoreError::Conflict { kind, key: row.key });
            }
        }
        tables.insert(kind, row)
    }

    async fn put(&self, kind: &'static str, key: &str, doc: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.kinds.get_mut(kind).and_then(|t| t.get_mut(key)) {
            Some(slot) => {
                slot.row.doc = doc;
                Ok(())
            }
            None => Err(StoreError::NotFound { kind, key: key.to_string() }),
        }
    }

    async fn get(&self, kind: &'static str, key: &str) -> Result<Row, StoreError> {
        let tables = self.tables.read().await;
        tables
            .kinds
            .get(kind)
            .and_then(|t| t.get(key))
            .map(|s| s.row.clone())
            .ok_or_else(|| StoreError::NotFound { kind, key: key.to_string() })
    }

    async fn delete(&self, kind: &'static str, key: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.kinds.get_mut(kind).and_then(|t| t.remove(key)) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound { kind, key: key.to_string() }),
        }
    }

    async fn list(&self, kind: &'static str, filter: &Filter, opts: &ListOptions) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let mut hits: Vec<&Slot> = match tables.kinds.get(kind) {
            Some(t) => t.values().filter(|s| filter.matches(&s.row.doc)).collect(),
            None => return Ok(Vec::new()),
        };
        hits.sort_by(|a, b| (a.row.create_time, a.seq).cmp(&(b.row.create_time, b.seq)));
        if opts.sort == SortOrder::NewestFirst {
            hits.reverse();
        }
        let rows = hits.into_iter().map(|s| s.row.clone());
        Ok(match opts.window() {
            Some((offset, limit)) => rows.skip(offset).take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, kind: &'static str, filter: &Filter) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.kinds.get(kind).map_or(0, |t| t.values().filter(|s| filter.matches(&s.row.doc)).count() as u64))
    }

    async fn ping(&self) -> Result<(), StoreError> { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn row(key: &str, secs: i64, doc: Value) -> Row {
        Row { key: key.into(), doc, create_time: Utc.timestamp_opt(secs, 0).unwrap() }
    }

    #[tokio::test]
    async fn add_rejects_duplicates_and_put_requires_existing() {
        let s = MemoryStore::default();
        s.add("thing", row("a", 1, json!({"n": 1}))).await.unwrap();
        let dup = s.add("thing", row("a", 2, json!({"n": 2}))).await;
        assert!(matches!(dup, Err(StoreError::AlreadyExists { .. })));
        let missing = s.put("thing", "b", json!({})).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
        s.put("thing", "a", json!({"n": 3})).await.unwrap();
        let got = s.get("thing", "a").await.unwrap();
        assert_eq!(got.doc, json!({"n": 3}));
        assert_eq!(got.create_time, Utc.timestamp_opt(1, 0).unwrap());
    }

    #[tokio::test]
    async fn list_sorts_newest_first_with_insertion_tie_break() {
        let s = MemoryStore::default();
        s.add("rev", row("r1", 10, json!({"app": "x"}))).await.unwrap();
        s.add("rev", row("r2", 10, json!({"app": "x"}))).await.unwrap();
        s.add("rev", row("r3", 5, json!({"app": "y"}))).await.unwrap();
        let all = s.list("rev", &Filter::new(), &ListOptions::default()).await.unwrap();
        let keys: Vec<_> = all.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["r2", "r1", "r3"]);
        let x = s.list("rev", &Filter::new().eq("app", "x"), &ListOptions::paged(2, 1)).await.unwrap();
        assert_eq!(x[0].key, "r1");
        assert_eq!(s.count("rev", &Filter::new().eq("app", "x")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn guarded_insert_blocks_on_match() {
        let s = MemoryStore::default();
        s.add("rev", row("r1", 1, json!({"env": "dev", "status": "running"}))).await.unwrap();
        let guard = [Filter::new().eq("env", "dev").eq("status", "running")];
        let res = s.add_guarded("rev", row("r2", 2, json!({"env": "dev"})), &guard).await;
        assert!(matches!(res, Err(StoreError::Conflict { .. })));
        s.add_guarded("rev", row("r3", 2, json!({"env": "prod"})), &[Filter::new().eq("env", "prod")]).await.unwrap();
    }
}
