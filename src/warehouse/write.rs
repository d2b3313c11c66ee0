/*!
 * The engine's write paths: `store` for source and parsed files, and
 * `update_metadata_item`.
*/

use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::{Result, WarehouseError};
use crate::file::WarehouseFile;
use crate::keys;
use crate::model::metadata::{
    Metadata, MetadataCodec, BYTES_FIELD, FEED_ID_FIELD, FILE_KEY_FIELD, LAST_MODIFIED_FIELD,
    MD5_FIELD, RETRIEVED_FIELD, S3_KEY_FIELD, VERSION_FIELD,
};
use crate::model::registry::CollectionEntry;
use crate::model::value::Value;
use crate::store::index::Row;

use super::Warehouse;

/// A caller-supplied comparison deciding whether a new source file equals
/// the latest stored one. Returning `true` suppresses the store.
pub type CompareSource<'a> = &'a (dyn Fn(&WarehouseFile, &WarehouseFile) -> bool + Sync);

/// Options for [Warehouse::store].
#[derive(Clone, Copy, Default)]
pub struct StoreOptions<'a> {
    /// Store a parsed file instead of a source file.
    pub parsed: bool,
    /// Always store a source file as a new version, skipping duplicate
    /// checks. Only relevant to source files.
    pub force_store: bool,
    /// The parser a parsed file belongs to; the default parser when unset.
    pub parser_name: Option<&'a str>,
    /// Compare the latest stored file against the new one instead of the
    /// digest and last-modified checks.
    pub compare_source: Option<CompareSource<'a>>,
}

/// Whether a store call wrote a new version or found the file already
/// present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// A new version was written.
    Success,
    /// The file was already stored; the returned version is the stored one.
    AlreadyExist,
}

/// The result of a store call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    /// The file's primary key values.
    pub primary_key: Vec<Value>,
    /// The written version, or the existing one on [StoreStatus::AlreadyExist].
    pub source_version: String,
    /// Whether a new version was written.
    pub status: StoreStatus,
    /// The parser a parsed file was stored under.
    pub parser_name: Option<String>,
}

impl Warehouse {
    /// Store a source file or a parsed file into the selected collection.
    ///
    /// Source files are versioned: without `force_store`, the file is
    /// checked against the latest stored version of the same primary key
    /// (by the caller's `compare_source` hook, or by content digest and,
    /// when the collection requires it, the last-modified field) and a
    /// duplicate reports [StoreStatus::AlreadyExist] instead of storing.
    ///
    /// Parsed files require `source_version` in their metadata, bind to a
    /// registered parser, overwrite any previous parsed file for that
    /// parser and version, and merge divergent metadata fields back into
    /// the source record.
    pub async fn store(
        &self,
        file: &WarehouseFile,
        options: StoreOptions<'_>,
    ) -> Result<StoreOutcome> {
        let entry = self.current_entry().await?;
        if options.parsed {
            self.store_parsed(entry, file, options.parser_name).await
        } else {
            self.store_source(entry, file, options).await
        }
    }

    async fn store_source(
        &self,
        entry: CollectionEntry,
        file: &WarehouseFile,
        options: StoreOptions<'_>,
    ) -> Result<StoreOutcome> {
        let codec = MetadataCodec::new(entry.clone());
        let primary_key = codec.primary_key(&file.metadata)?;
        let file_key = keys::file_key(&entry.database, &entry.collection, &primary_key)?;

        if !options.force_store {
            if let Some(stored) = self.latest_metadata(&codec, &file_key).await? {
                if self.is_duplicate(&entry, &stored, file, options.compare_source).await? {
                    let source_version = MetadataCodec::source_version(&stored)?;
                    debug!(%file_key, %source_version, "file already stored");
                    return Ok(StoreOutcome {
                        primary_key,
                        source_version,
                        status: StoreStatus::AlreadyExist,
                        parser_name: None,
                    });
                }
            }
        }

        self.insert_source(&entry, &codec, file, primary_key, file_key)
            .await
    }

    async fn latest_metadata(
        &self,
        codec: &MetadataCodec,
        file_key: &str,
    ) -> Result<Option<Metadata>> {
        let mut stream = self.source_table().query_versions(file_key, true).await?;
        let row = stream.next().await.transpose()?;
        let tz = codec.entry().decode_timezone();
        row.map(|row| codec.decode_row(&row, &tz)).transpose()
    }

    async fn is_duplicate(
        &self,
        entry: &CollectionEntry,
        stored: &Metadata,
        file: &WarehouseFile,
        compare_source: Option<CompareSource<'_>>,
    ) -> Result<bool> {
        if let Some(compare) = compare_source {
            let existing = self.fetch_source_file(stored).await?;
            return Ok(compare(&existing, file));
        }

        let stored_md5 = stored.get(MD5_FIELD).and_then(Value::as_str);
        if stored_md5 == Some(file.md5().as_str()) {
            return Ok(true);
        }
        let last_modified_required = entry
            .required_metadata_fields
            .iter()
            .any(|field| field == LAST_MODIFIED_FIELD);
        if last_modified_required {
            if let (Some(stored), Some(new)) = (
                stored.get(LAST_MODIFIED_FIELD),
                file.metadata.get(LAST_MODIFIED_FIELD),
            ) {
                return Ok(stored == new);
            }
        }
        Ok(false)
    }

    /// The unconditional store-source step: derive identifiers, validate,
    /// upload, then insert the row conditional on the version pair being
    /// absent.
    async fn insert_source(
        &self,
        entry: &CollectionEntry,
        codec: &MetadataCodec,
        file: &WarehouseFile,
        primary_key: Vec<Value>,
        file_key: String,
    ) -> Result<StoreOutcome> {
        let retrieved = file
            .metadata
            .get(RETRIEVED_FIELD)
            .and_then(Value::as_datetime)
            .ok_or_else(|| {
                WarehouseError::metadata(format!(
                    "The '{RETRIEVED_FIELD}' field is missing or not a datetime."
                ))
            })?;
        let source_version = keys::source_version(retrieved);

        let mut metadata = file.metadata.clone();
        metadata.insert(FEED_ID_FIELD.to_string(), Value::from(entry.feed_id.clone()));
        metadata.insert(FILE_KEY_FIELD.to_string(), Value::from(file_key.clone()));
        metadata.insert(VERSION_FIELD.to_string(), Value::from(source_version.clone()));
        metadata.insert(MD5_FIELD.to_string(), Value::from(file.md5()));
        metadata.insert(BYTES_FIELD.to_string(), Value::Bool(file.is_bytes()));
        codec.validate(&metadata, false)?;

        let object_key = keys::source_object_key(
            self.bucket_prefix(),
            &entry.database,
            &entry.collection,
            &source_version,
            &file_key,
        );
        self.source_objects()
            .put(&object_key, Bytes::copy_from_slice(file.content.as_bytes()))
            .await?;
        metadata.insert(S3_KEY_FIELD.to_string(), Value::from(object_key));

        self.source_table().insert(codec.encode_row(&metadata)?).await?;
        info!(%file_key, %source_version, "stored source file");

        Ok(StoreOutcome {
            primary_key,
            source_version,
            status: StoreStatus::Success,
            parser_name: None,
        })
    }

    async fn store_parsed(
        &self,
        entry: CollectionEntry,
        file: &WarehouseFile,
        parser_name: Option<&str>,
    ) -> Result<StoreOutcome> {
        let (parser_name, _) = Warehouse::resolve_parser(&entry, parser_name)?;
        let codec = MetadataCodec::new(entry.clone());
        let source_version = MetadataCodec::source_version(&file.metadata)?;
        let primary_key = codec.primary_key(&file.metadata)?;
        let file_key = keys::file_key(&entry.database, &entry.collection, &primary_key)?;

        let source_row = self
            .source_table()
            .get(&file_key, &source_version)
            .await?
            .ok_or_else(|| {
                WarehouseError::operation(format!(
                    "No source file with version '{source_version}' to attach a parsed \
                     file to."
                ))
            })?;
        codec.validate(&file.metadata, true)?;

        let object_key = keys::parsed_object_key(
            self.bucket_prefix(),
            &entry.database,
            &entry.collection,
            &parser_name,
            &source_version,
            &file_key,
        );
        self.parsed_objects()
            .put(&object_key, Bytes::copy_from_slice(file.content.as_bytes()))
            .await?;

        // fields the parse changed are merged back into the source record
        let tz = entry.decode_timezone();
        let stored = codec.decode_row(&source_row, &tz)?;
        let mut update = Metadata::new();
        for (field, value) in &file.metadata {
            if stored.get(field) != Some(value) {
                update.insert(field.clone(), value.clone());
            }
        }
        if !update.is_empty() {
            let changes = codec.encode_row(&update)?;
            if !changes.is_empty() {
                self.source_table()
                    .update(&file_key, &source_version, changes)
                    .await?;
            }
        }
        info!(%file_key, %source_version, %parser_name, "stored parsed file");

        Ok(StoreOutcome {
            primary_key,
            source_version,
            status: StoreStatus::Success,
            parser_name: Some(parser_name),
        })
    }

    /// Add or replace metadata fields of an existing source record. The
    /// primary key fields and the retrieval date are immutable.
    pub async fn update_metadata_item(
        &self,
        primary_key: &[Value],
        source_version: &str,
        update_map: &Metadata,
    ) -> Result<()> {
        let codec = self.codec().await?;
        if update_map.is_empty() {
            return Err(WarehouseError::metadata("The update map is empty."));
        }
        for field in update_map.keys() {
            let immutable = field == RETRIEVED_FIELD
                || codec.entry().primary_key_fields.iter().any(|f| f == field);
            if immutable {
                return Err(WarehouseError::metadata(format!(
                    "Updating '{field}' is not allowed."
                )));
            }
        }
        codec.check_primary_key_args(primary_key)?;
        let entry = codec.entry();
        let file_key = keys::file_key(&entry.database, &entry.collection, primary_key)?;

        let changes: Row = codec.encode_row(update_map)?;
        if changes.is_empty() {
            return Err(WarehouseError::metadata(
                "None of the update map fields are storable.",
            ));
        }
        self.source_table()
            .update(&file_key, source_version, changes)
            .await
    }
}
