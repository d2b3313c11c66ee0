/*!
 * The engine's delete path: removing a source version together with its
 * parsed objects, or handing back deferred deleters when several versions
 * match.
*/

use futures::TryStreamExt;
use tracing::{info, warn};

use crate::error::{Result, WarehouseError};
use crate::keys;
use crate::model::metadata::{Metadata, VERSION_FIELD, S3_KEY_FIELD};
use crate::model::value::Value;
use crate::store::objects::ObjectClient;
use crate::store::source::SourceTable;

use super::Warehouse;

/// Options for [Warehouse::delete].
#[derive(Clone, Copy, Default)]
pub struct DeleteOptions<'a> {
    /// The version to delete. Without one, a single stored version is
    /// deleted directly and multiple versions come back as deferred
    /// deleters.
    pub source_version: Option<&'a str>,
    /// Delete only the parsed files, keeping the source record and body.
    pub parsed_files_only: bool,
    /// Restrict parsed-file deletion to one parser; all parsers when
    /// unset.
    pub parser_name: Option<&'a str>,
}

/// What a delete call did.
pub enum DeleteOutcome {
    /// The targeted version was removed.
    Deleted,
    /// Multiple versions matched; nothing was removed. Each deferred
    /// deleter carries its version's metadata for inspection and removes
    /// that version when run.
    Deferred(Vec<DeferredDelete>),
}

#[derive(Clone)]
struct Deleter {
    source_table: SourceTable,
    source_objects: ObjectClient,
    parsed_objects: ObjectClient,
    database: String,
    collection: String,
    prefix: Option<String>,
    parser_names: Vec<String>,
}

impl Deleter {
    async fn delete_version(
        &self,
        file_key: &str,
        source_version: &str,
        parsed_only: bool,
    ) -> Result<()> {
        let row = self
            .source_table
            .get(file_key, source_version)
            .await?
            .ok_or_else(|| {
                WarehouseError::operation(format!(
                    "No file with version '{source_version}' exists for this key."
                ))
            })?;

        for parser_name in &self.parser_names {
            let object_key = keys::parsed_object_key(
                self.prefix.as_deref(),
                &self.database,
                &self.collection,
                parser_name,
                source_version,
                file_key,
            );
            self.parsed_objects.delete(&object_key).await?;
        }

        if !parsed_only {
            if let Some(cell) = row.get(S3_KEY_FIELD) {
                self.source_objects.delete(cell.as_str()).await?;
            }
            self.source_table.delete(file_key, source_version).await?;
        }
        info!(%file_key, %source_version, parsed_only, "deleted file version");
        Ok(())
    }
}

/// A held-back deletion of one source version. Inspect
/// [DeferredDelete::metadata], then [DeferredDelete::run] to delete.
pub struct DeferredDelete {
    deleter: Deleter,
    file_key: String,
    source_version: String,
    parsed_files_only: bool,
    metadata: Metadata,
}

impl DeferredDelete {
    /// The metadata of the version this deleter would remove.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The version this deleter would remove.
    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    /// Perform the deletion.
    pub async fn run(self) -> Result<()> {
        self.deleter
            .delete_version(&self.file_key, &self.source_version, self.parsed_files_only)
            .await
    }
}

impl Warehouse {
    /// Delete a file from the warehouse. Deleting a source version also
    /// removes every parsed object attached to it (all parsers, or the
    /// named one). Without an explicit version: exactly one stored version
    /// is deleted outright, several are returned as
    /// [DeleteOutcome::Deferred] so the caller can inspect each before
    /// committing.
    pub async fn delete(
        &self,
        primary_key: &[Value],
        options: DeleteOptions<'_>,
    ) -> Result<DeleteOutcome> {
        let codec = self.codec().await?;
        codec.check_primary_key_args(primary_key)?;
        let entry = codec.entry();
        let file_key = keys::file_key(&entry.database, &entry.collection, primary_key)?;

        let parser_names = match options.parser_name {
            Some(name) => {
                if !entry.parsers.contains_key(name) {
                    return Err(WarehouseError::argument(format!(
                        "Parser '{name}' is not registered with {}, {}.",
                        entry.database, entry.collection
                    )));
                }
                vec![name.to_string()]
            }
            None => entry.parsers.keys().cloned().collect(),
        };
        let deleter = Deleter {
            source_table: self.source_table().clone(),
            source_objects: self.source_objects().clone(),
            parsed_objects: self.parsed_objects().clone(),
            database: entry.database.clone(),
            collection: entry.collection.clone(),
            prefix: self.bucket_prefix().map(str::to_string),
            parser_names,
        };

        if let Some(source_version) = options.source_version {
            deleter
                .delete_version(&file_key, source_version, options.parsed_files_only)
                .await?;
            return Ok(DeleteOutcome::Deleted);
        }

        let rows: Vec<_> = self
            .source_table()
            .query_versions(&file_key, false)
            .await?
            .try_collect()
            .await?;
        match rows.len() {
            0 => Err(WarehouseError::operation(
                "No stored versions exist for this key.",
            )),
            1 => {
                let source_version = version_of(&rows[0])?;
                deleter
                    .delete_version(&file_key, &source_version, options.parsed_files_only)
                    .await?;
                Ok(DeleteOutcome::Deleted)
            }
            found => {
                warn!(%file_key, found, "multiple versions found, holding off delete");
                let tz = entry.decode_timezone();
                let mut deferred = Vec::with_capacity(found);
                for row in &rows {
                    deferred.push(DeferredDelete {
                        deleter: deleter.clone(),
                        file_key: file_key.clone(),
                        source_version: version_of(row)?,
                        parsed_files_only: options.parsed_files_only,
                        metadata: codec.decode_row(row, &tz)?,
                    });
                }
                Ok(DeleteOutcome::Deferred(deferred))
            }
        }
    }
}

fn version_of(row: &crate::store::index::Row) -> Result<String> {
    row.get(VERSION_FIELD)
        .map(|cell| cell.as_str().to_string())
        .ok_or_else(|| WarehouseError::Message("Stored row has no version field.".to_string()))
}
