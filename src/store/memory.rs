/*!
An in-process [IndexStore] backed by ordinary maps, mirroring the role
[object_store::memory::InMemory] plays for blobs. Used by the test suites
and by callers that want a warehouse without any backing services.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{Result, WarehouseError};
use crate::store::index::{
    Cell, IndexStore, QueryRequest, Row, SortCondition, TableKey, TableSpec,
};

struct Table {
    spec: TableSpec,
    rows: BTreeMap<String, Row>,
}

/// An in-memory, table-per-map index store.
#[derive(Default)]
pub struct MemoryIndexStore {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemoryIndexStore {
    /// An empty store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Re-declaring an existing table is rejected.
    pub fn create_table(&self, spec: TableSpec) -> Result<()> {
        let mut tables = self.tables.lock().expect("index store mutex poisoned");
        if tables.contains_key(&spec.name) {
            return Err(WarehouseError::argument(format!(
                "Table '{}' already exists.",
                spec.name
            )));
        }
        tables.insert(
            spec.name.clone(),
            Table {
                spec,
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn with_table<T>(&self, name: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.lock().expect("index store mutex poisoned");
        let table = tables
            .get_mut(name)
            .ok_or_else(|| WarehouseError::operation(format!("Unknown table '{name}'.")))?;
        f(table)
    }
}

fn storage_key_from_row(spec: &TableSpec, row: &Row) -> Result<String> {
    let hash = row.get(&spec.hash_key).ok_or_else(|| {
        WarehouseError::metadata(format!("Row is missing its hash key '{}'.", spec.hash_key))
    })?;
    let mut key = hash.as_str().to_string();
    if let Some(range_key) = &spec.range_key {
        let range = row.get(range_key).ok_or_else(|| {
            WarehouseError::metadata(format!("Row is missing its sort key '{range_key}'."))
        })?;
        key.push('\u{0}');
        key.push_str(range.as_str());
    }
    Ok(key)
}

fn storage_key(spec: &TableSpec, key: &TableKey) -> Result<String> {
    let (hash_name, hash_value) = &key.hash;
    if hash_name != &spec.hash_key {
        return Err(WarehouseError::argument(format!(
            "Key attribute '{hash_name}' does not match the table's hash key."
        )));
    }
    let mut storage = hash_value.as_str().to_string();
    match (&spec.range_key, &key.range) {
        (Some(expected), Some((name, value))) if name == expected => {
            storage.push('\u{0}');
            storage.push_str(value.as_str());
        }
        (None, None) => {}
        _ => {
            return Err(WarehouseError::argument(
                "Key shape does not match the table's key schema.",
            ))
        }
    }
    Ok(storage)
}

fn sort_condition_matches(condition: &SortCondition, row: &Row) -> bool {
    match condition {
        SortCondition::Between { field, low, high } => row.get(field).is_some_and(|cell| {
            cell.compare(low) != std::cmp::Ordering::Less
                && cell.compare(high) != std::cmp::Ordering::Greater
        }),
        SortCondition::AtMost { field, bound } => row
            .get(field)
            .is_some_and(|cell| cell.compare(bound) != std::cmp::Ordering::Greater),
    }
}

fn project(row: &Row, projection: Option<&[String]>) -> Row {
    match projection {
        None => row.clone(),
        Some(fields) => row
            .iter()
            .filter(|(name, _)| fields.iter().any(|f| f == *name))
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect(),
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn put(&self, table: &str, row: Row) -> Result<()> {
        self.with_table(table, |table| {
            let key = storage_key_from_row(&table.spec, &row)?;
            table.rows.insert(key, row);
            Ok(())
        })
    }

    async fn put_if_absent(&self, table: &str, key: &TableKey, row: Row) -> Result<()> {
        self.with_table(table, |table| {
            let storage = storage_key(&table.spec, key)?;
            if table.rows.contains_key(&storage) {
                return Err(WarehouseError::AlreadyExists(storage.replace('\u{0}', "/")));
            }
            table.rows.insert(storage, row);
            Ok(())
        })
    }

    async fn get(&self, table: &str, key: &TableKey) -> Result<Option<Row>> {
        self.with_table(table, |table| {
            let storage = storage_key(&table.spec, key)?;
            Ok(table.rows.get(&storage).cloned())
        })
    }

    async fn update(&self, table: &str, key: &TableKey, changes: Row) -> Result<()> {
        self.with_table(table, |table| {
            let storage = storage_key(&table.spec, key)?;
            let row = table.rows.get_mut(&storage).ok_or_else(|| {
                WarehouseError::operation("Cannot update an item that does not exist.")
            })?;
            for (name, cell) in changes {
                row.insert(name, cell);
            }
            Ok(())
        })
    }

    async fn delete(&self, table: &str, key: &TableKey) -> Result<()> {
        self.with_table(table, |table| {
            let storage = storage_key(&table.spec, key)?;
            table.rows.remove(&storage);
            Ok(())
        })
    }

    async fn query(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Row>>> {
        let mut matches = self.with_table(&request.table, |table| {
            // resolve the queried index's key attributes
            let (hash_attr, sort_attr) = match &request.index {
                None => (
                    table.spec.hash_key.clone(),
                    table.spec.range_key.clone(),
                ),
                Some(name) => {
                    let index = table
                        .spec
                        .indexes
                        .iter()
                        .find(|index| &index.name == name)
                        .ok_or_else(|| {
                            WarehouseError::argument(format!("Unknown index '{name}'."))
                        })?;
                    (index.hash_key.clone(), Some(index.range_key.clone()))
                }
            };
            let (request_attr, hash_value) = &request.hash;
            if request_attr != &hash_attr {
                return Err(WarehouseError::argument(format!(
                    "Attribute '{request_attr}' is not the queried index's hash key."
                )));
            }

            let rows: Vec<(Option<Cell>, Row)> = table
                .rows
                .values()
                .filter(|row| row.get(&hash_attr) == Some(hash_value))
                // secondary indexes are sparse: a row without the sort
                // attribute is not in the index
                .filter(|row| sort_attr.as_ref().map_or(true, |attr| row.contains_key(attr)))
                .filter(|row| {
                    request
                        .sort
                        .as_ref()
                        .map_or(true, |condition| sort_condition_matches(condition, row))
                })
                .filter(|row| {
                    request
                        .filter
                        .as_ref()
                        .map_or(true, |filter| filter.matches(row))
                })
                .map(|row| {
                    let sort_cell = sort_attr.as_ref().and_then(|attr| row.get(attr)).cloned();
                    (sort_cell, project(row, request.projection.as_deref()))
                })
                .collect();
            Ok(rows)
        })?;

        matches.sort_by(|(a, _), (b, _)| match (a, b) {
            (Some(a), Some(b)) => a.compare(b),
            _ => std::cmp::Ordering::Equal,
        });
        if !request.ascending {
            matches.reverse();
        }
        Ok(stream::iter(matches.into_iter().map(|(_, row)| Ok(row))).boxed())
    }

    async fn scan(&self, table: &str) -> Result<BoxStream<'static, Result<Row>>> {
        let rows = self.with_table(table, |table| {
            Ok(table.rows.values().cloned().collect::<Vec<_>>())
        })?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}
