/*!
The collection registry: single-entry reads, full scans, and upserts
against the registry table, fronted by a per-process TTL cache.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use tracing::debug;

use crate::error::{Result, WarehouseError};
use crate::keys;
use crate::model::registry::{CollectionEntry, REG_ID};
use crate::store::index::{Cell, IndexStore, TableKey, TableSpec};

struct CacheState {
    entries: HashMap<String, (CollectionEntry, Instant)>,
    last_scan: Option<Instant>,
}

/// The registry handle. Entries read through the cache are clones, so a
/// caller mutating a returned entry can never corrupt cached state.
pub struct Registry {
    store: Arc<dyn IndexStore>,
    table: String,
    ttl: Duration,
    cache: Mutex<CacheState>,
}

impl Registry {
    /// Create a registry over the given table. A zero TTL disables caching.
    pub fn new(store: Arc<dyn IndexStore>, table: impl Into<String>, ttl: Duration) -> Self {
        Registry {
            store,
            table: table.into(),
            ttl,
            cache: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_scan: None,
            }),
        }
    }

    /// The key schema of a registry table.
    pub fn table_spec(name: &str) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            hash_key: REG_ID.to_string(),
            range_key: None,
            indexes: Vec::new(),
        }
    }

    /// Fetch one collection's entry. With `use_cached`, an unexpired cache
    /// entry is served without touching the store; a store read refreshes
    /// the cache. A missing entry is an operation error.
    pub async fn get(&self, database: &str, collection: &str, use_cached: bool) -> Result<CollectionEntry> {
        let id = keys::collection_id(database, collection);
        if use_cached {
            if let Some(entry) = self.cached(&id) {
                return Ok(entry);
            }
        }

        let key = TableKey::hash_only(REG_ID, Cell::string(&id));
        match self.store.get(&self.table, &key).await? {
            Some(row) => {
                let entry = CollectionEntry::decode_row(&row)?;
                self.update_cache(&entry);
                Ok(entry)
            }
            None => Err(WarehouseError::operation(format!(
                "Invalid collection '{collection}' and database '{database}'."
            ))),
        }
    }

    /// All registry entries. With `use_cached` and an unexpired previous
    /// scan, the cache is replayed; otherwise a full paginated scan runs
    /// and repopulates the cache.
    pub async fn iter_all(&self, use_cached: bool) -> Result<Vec<CollectionEntry>> {
        if use_cached {
            let cache = self.cache.lock().expect("registry cache mutex poisoned");
            let scan_valid = cache
                .last_scan
                .is_some_and(|at| at.elapsed() < self.ttl);
            if scan_valid {
                debug!("replaying registry scan from cache");
                let mut ids: Vec<&String> = cache.entries.keys().collect();
                ids.sort();
                return Ok(ids
                    .into_iter()
                    .map(|id| cache.entries[id].0.clone())
                    .collect());
            }
        }

        let rows: Vec<_> = self.store.scan(&self.table).await?.try_collect().await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(CollectionEntry::decode_row(&row)?);
        }
        let mut cache = self.cache.lock().expect("registry cache mutex poisoned");
        let now = Instant::now();
        cache.entries = entries
            .iter()
            .map(|entry| (entry.feed_id.clone(), (entry.clone(), now)))
            .collect();
        cache.last_scan = Some(now);
        Ok(entries)
    }

    /// Write a full entry and refresh the cache.
    pub async fn upsert(&self, entry: &CollectionEntry) -> Result<()> {
        self.store.put(&self.table, entry.encode_row()?).await?;
        self.update_cache(entry);
        Ok(())
    }

    fn cached(&self, id: &str) -> Option<CollectionEntry> {
        let mut cache = self.cache.lock().expect("registry cache mutex poisoned");
        let expired = match cache.entries.get(id) {
            Some((entry, stored_at)) if stored_at.elapsed() < self.ttl => {
                return Some(entry.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.entries.remove(id);
        }
        None
    }

    fn update_cache(&self, entry: &CollectionEntry) {
        let mut cache = self.cache.lock().expect("registry cache mutex poisoned");
        cache
            .entries
            .insert(entry.feed_id.clone(), (entry.clone(), Instant::now()));
    }
}
