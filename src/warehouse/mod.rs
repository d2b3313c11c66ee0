/*!
The engine: the public warehouse operations, composing the registry, the
codecs, and the two backing stores. A [Warehouse] instance is a single
logical unit; share one across workers only with external synchronization,
or give each worker its own.
*/

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use object_store::ObjectStore;

use crate::config::Settings;
use crate::error::{Result, WarehouseError};
use crate::model::codec::TypeTag;
use crate::model::metadata::{Metadata, MetadataCodec};
use crate::model::registry::{CollectionEntry, ParserSchema};
use crate::model::value::{TzInfo, Value};
use crate::registry::Registry;
use crate::store::index::IndexStore;
use crate::store::objects::ObjectClient;
use crate::store::source::SourceTable;

mod delete;
mod read;
mod write;

pub use delete::{DeferredDelete, DeleteOptions, DeleteOutcome};
pub use read::{QueryOptions, RetrieveOptions, VersionsOptions};
pub use write::{CompareSource, StoreOptions, StoreOutcome, StoreStatus};

#[derive(Default)]
struct Selection {
    database: Option<String>,
    collection: Option<String>,
}

/// The warehouse engine.
pub struct Warehouse {
    settings: Settings,
    registry: Registry,
    source_table: SourceTable,
    source_objects: ObjectClient,
    parsed_objects: ObjectClient,
    selection: Mutex<Selection>,
}

impl Warehouse {
    /// Assemble an engine from resolved settings and handles to the
    /// backing stores (the index store, plus one object store per bucket).
    pub fn new(
        settings: Settings,
        index: Arc<dyn IndexStore>,
        source_objects: Arc<dyn ObjectStore>,
        parsed_objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let registry = Registry::new(
            index.clone(),
            &settings.registry_table_name,
            Duration::from_secs(settings.cache_ttl),
        );
        let source_table = SourceTable::new(index, &settings.source_table_name);
        Warehouse {
            settings,
            registry,
            source_table,
            source_objects: ObjectClient::new(source_objects),
            parsed_objects: ObjectClient::new(parsed_objects),
            selection: Mutex::new(Selection::default()),
        }
    }

    /// The engine's resolved settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The currently selected database.
    pub fn database(&self) -> Result<String> {
        self.selection
            .lock()
            .expect("selection mutex poisoned")
            .database
            .clone()
            .ok_or_else(|| WarehouseError::operation("No database selected."))
    }

    /// The currently selected collection.
    pub fn collection(&self) -> Result<String> {
        self.selection
            .lock()
            .expect("selection mutex poisoned")
            .collection
            .clone()
            .ok_or_else(|| WarehouseError::operation("No collection selected."))
    }

    /// Select a database without selecting a collection. The database must
    /// have at least one registered collection.
    pub async fn select_database(&self, database: &str) -> Result<()> {
        let known = self
            .registry
            .iter_all(false)
            .await?
            .into_iter()
            .any(|entry| entry.database == database);
        if !known {
            return Err(WarehouseError::operation(format!(
                "Unable to select '{database}', no such database."
            )));
        }
        let mut selection = self.selection.lock().expect("selection mutex poisoned");
        selection.database = Some(database.to_string());
        selection.collection = None;
        Ok(())
    }

    /// Select a collection, and its database when given. Always bypasses
    /// the registry cache so a stale entry cannot hide a peer's update.
    pub async fn select_collection(&self, collection: &str, database: Option<&str>) -> Result<()> {
        let database = match database {
            Some(database) => database.to_string(),
            None => self.database()?,
        };
        let entry = self
            .registry
            .get(&database, collection, false)
            .await
            .map_err(|err| match err {
                WarehouseError::Operation(_) => WarehouseError::operation(format!(
                    "Unable to select {database} - {collection}, combo does not exist."
                )),
                other => other,
            })?;
        let mut selection = self.selection.lock().expect("selection mutex poisoned");
        selection.database = Some(entry.database);
        selection.collection = Some(entry.collection);
        Ok(())
    }

    /// Register a collection, or amend an existing one. Primary keys are
    /// write-once; the type map only grows or corrects entries; the
    /// required-field list is replaced wholesale when provided.
    pub async fn update_source_registry(
        &self,
        database: &str,
        collection: &str,
        primary_key_fields: Option<Vec<String>>,
        required_metadata_fields: Option<Vec<String>>,
        metadata_type_map: Option<BTreeMap<String, TypeTag>>,
    ) -> Result<()> {
        let mut entry = match self.registry.get(database, collection, false).await {
            Ok(mut entry) => {
                if let Some(fields) = &primary_key_fields {
                    if fields != &entry.primary_key_fields {
                        return Err(WarehouseError::argument(
                            "Updating the primary key fields of a collection is not allowed.",
                        ));
                    }
                }
                if let Some(map) = metadata_type_map {
                    entry.metadata_type_map.extend(map);
                }
                entry
            }
            Err(WarehouseError::Operation(_)) => {
                let (Some(fields), Some(map)) = (primary_key_fields, metadata_type_map) else {
                    return Err(WarehouseError::argument(
                        "'primary_key_fields' and 'metadata_type_map' are required when \
                         registering a new collection.",
                    ));
                };
                CollectionEntry::new(database, collection, fields, map)
            }
            Err(err) => return Err(err),
        };

        if let Some(fields) = required_metadata_fields {
            entry.required_metadata_fields = fields;
        }

        let missing: Vec<String> = entry
            .all_required_fields()
            .into_iter()
            .filter(|field| !entry.metadata_type_map.contains_key(field))
            .collect();
        if !missing.is_empty() {
            return Err(WarehouseError::argument(format!(
                "The type map is missing keys for {missing:?}."
            )));
        }

        self.registry.upsert(&entry).await
    }

    /// Register a parser on an existing collection, or amend one. The
    /// first parser of a collection becomes the default; `promote_default`
    /// moves the flag.
    pub async fn update_parsed_registry(
        &self,
        database: &str,
        collection: &str,
        parser_name: &str,
        primary_key_fields: Option<Vec<String>>,
        row_type_map: Option<BTreeMap<String, TypeTag>>,
        timezone: Option<TzInfo>,
        promote_default: bool,
    ) -> Result<()> {
        let mut entry = self.registry.get(database, collection, false).await?;

        let mut parser = match entry.parsers.get(parser_name) {
            Some(parser) => parser.clone(),
            None => {
                let (Some(fields), Some(map), Some(timezone)) =
                    (&primary_key_fields, &row_type_map, &timezone)
                else {
                    return Err(WarehouseError::argument(
                        "primary_key_fields, row_type_map, and timezone must be specified \
                         when registering a parser for the first time.",
                    ));
                };
                ParserSchema {
                    primary_key_fields: fields.clone(),
                    row_type_map: map.clone(),
                    timezone: timezone.clone(),
                    default: false,
                }
            }
        };
        if let Some(fields) = primary_key_fields {
            parser.primary_key_fields = fields;
        }
        if let Some(map) = row_type_map {
            parser.row_type_map = map;
        }
        if let Some(timezone) = timezone {
            parser.timezone = timezone;
        }

        let missing: Vec<&String> = parser
            .primary_key_fields
            .iter()
            .filter(|field| !parser.row_type_map.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(WarehouseError::argument(format!(
                "The type map is missing keys for {missing:?}."
            )));
        }

        entry.parsers.insert(parser_name.to_string(), parser);
        if entry.parsers.len() == 1 || promote_default {
            for (name, parser) in entry.parsers.iter_mut() {
                parser.default = name == parser_name;
            }
        }

        self.registry.upsert(&entry).await
    }

    /// Every registered database with its collections, both sorted.
    pub async fn list_databases_and_collections(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut results: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in self.registry.iter_all(true).await? {
            results.entry(entry.database).or_default().push(entry.collection);
        }
        for collections in results.values_mut() {
            collections.sort();
        }
        Ok(results)
    }

    /// Every registered database, sorted.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self
            .list_databases_and_collections()
            .await?
            .into_keys()
            .collect())
    }

    /// The selected database's collections, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let database = self.database()?;
        self.list_databases_and_collections()
            .await?
            .remove(&database)
            .ok_or_else(|| {
                WarehouseError::operation(format!("No collections found for '{database}'."))
            })
    }

    /// The selected collection's primary key fields.
    pub async fn primary_key_fields(&self) -> Result<Vec<String>> {
        Ok(self.current_entry().await?.primary_key_fields)
    }

    /// All required metadata fields of the selected collection, primary
    /// keys first.
    pub async fn required_metadata_fields(&self) -> Result<Vec<String>> {
        Ok(self.current_entry().await?.all_required_fields())
    }

    /// The selected collection's metadata type map.
    pub async fn metadata_type_map(&self) -> Result<BTreeMap<String, TypeTag>> {
        Ok(self.current_entry().await?.metadata_type_map)
    }

    /// The selected collection's default parser name.
    pub async fn default_parser_name(&self) -> Result<String> {
        let entry = self.current_entry().await?;
        let (name, _) = entry.default_parser()?;
        Ok(name.to_string())
    }

    /// The default parser's primary key fields.
    pub async fn default_parser_primary_key_fields(&self) -> Result<Vec<String>> {
        let entry = self.current_entry().await?;
        let (_, parser) = entry.default_parser()?;
        Ok(parser.primary_key_fields.clone())
    }

    /// The default parser's row type map.
    pub async fn default_parser_type_map(&self) -> Result<BTreeMap<String, TypeTag>> {
        let entry = self.current_entry().await?;
        let (_, parser) = entry.default_parser()?;
        Ok(parser.row_type_map.clone())
    }

    /// The default parser's timezone.
    pub async fn default_parser_timezone(&self) -> Result<TzInfo> {
        let entry = self.current_entry().await?;
        let (_, parser) = entry.default_parser()?;
        Ok(parser.timezone.clone())
    }

    /// All parsers registered on the selected collection.
    pub async fn available_parsers(&self) -> Result<BTreeMap<String, ParserSchema>> {
        Ok(self.current_entry().await?.parsers)
    }

    /// Extract the selected collection's primary key values from a
    /// metadata record.
    pub async fn get_primary_key(&self, metadata: &Metadata) -> Result<Vec<Value>> {
        self.codec().await?.primary_key(metadata)
    }

    /// Extract the version id from a metadata record.
    pub fn get_source_version(&self, metadata: &Metadata) -> Result<String> {
        MetadataCodec::source_version(metadata)
    }

    pub(crate) async fn current_entry(&self) -> Result<CollectionEntry> {
        let database = self.database()?;
        let collection = self.collection()?;
        self.registry.get(&database, &collection, true).await
    }

    pub(crate) async fn codec(&self) -> Result<MetadataCodec> {
        Ok(MetadataCodec::new(self.current_entry().await?))
    }

    pub(crate) fn source_table(&self) -> &SourceTable {
        &self.source_table
    }

    pub(crate) fn source_objects(&self) -> &ObjectClient {
        &self.source_objects
    }

    pub(crate) fn parsed_objects(&self) -> &ObjectClient {
        &self.parsed_objects
    }

    pub(crate) fn bucket_prefix(&self) -> Option<&str> {
        self.settings.bucket_prefix.as_deref()
    }

    /// Resolve a parser by name, or the default parser when no name is
    /// given. An unknown name is an argument error; asking for the default
    /// of a parser-less collection is an operation error.
    pub(crate) fn resolve_parser<'e>(
        entry: &'e CollectionEntry,
        name: Option<&str>,
    ) -> Result<(String, &'e ParserSchema)> {
        match name {
            Some(name) => entry
                .parsers
                .get(name)
                .map(|parser| (name.to_string(), parser))
                .ok_or_else(|| {
                    WarehouseError::argument(format!(
                        "Parser '{name}' is not registered with {}, {}.",
                        entry.database, entry.collection
                    ))
                }),
            None => {
                let (name, parser) = entry.default_parser()?;
                Ok((name.to_string(), parser))
            }
        }
    }
}
