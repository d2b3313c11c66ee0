/*!
 * The engine's read paths: single-file retrieval, lazy version streams,
 * and range-indexed metadata queries.
*/

use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::{Result, WarehouseError};
use crate::file::{FileContent, WarehouseFile};
use crate::keys;
use crate::model::metadata::{Metadata, MetadataCodec, BYTES_FIELD, S3_KEY_FIELD};
use crate::model::value::{DatetimeRange, Value};
use crate::store::objects::ObjectClient;
use crate::store::source::QueryIndex;

use super::Warehouse;

/// Options for [Warehouse::retrieve] and [Warehouse::retrieve_metadata].
#[derive(Clone, Copy, Default)]
pub struct RetrieveOptions<'a> {
    /// The version to fetch; the latest stored version when unset.
    pub source_version: Option<&'a str>,
    /// Fetch the parsed file instead of the source file.
    pub parsed: bool,
    /// The parser of the parsed file; the default parser when unset.
    pub parser_name: Option<&'a str>,
}

/// Options for [Warehouse::retrieve_versions] and
/// [Warehouse::retrieve_version_metadata].
#[derive(Clone, Copy)]
pub struct VersionsOptions<'a> {
    /// Fetch parsed files instead of source files.
    pub parsed: bool,
    /// The parser of the parsed files; the default parser when unset.
    pub parser_name: Option<&'a str>,
    /// Order versions newest-first (the default) or oldest-first.
    pub latest_first: bool,
}

impl Default for VersionsOptions<'_> {
    fn default() -> Self {
        VersionsOptions {
            parsed: false,
            parser_name: None,
            latest_first: true,
        }
    }
}

/// Options for [Warehouse::query_metadata_items].
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Restrict results to rows matching this range on the chosen index.
    pub query_range: Option<DatetimeRange>,
    /// The index to query. Defaults to the release index without a range
    /// (returning every row) and the content index with one.
    pub index: Option<QueryIndex>,
    /// When set, only these metadata fields are returned.
    pub fields: Option<Vec<String>>,
    /// Sort-key ordering of the results.
    pub ascending: bool,
}

impl QueryOptions {
    /// Query everything, ascending.
    pub fn all() -> Self {
        QueryOptions {
            ascending: true,
            ..QueryOptions::default()
        }
    }

    /// Query a range on the default index, ascending.
    pub fn range(query_range: DatetimeRange) -> Self {
        QueryOptions {
            query_range: Some(query_range),
            ascending: true,
            ..QueryOptions::default()
        }
    }
}

impl Warehouse {
    /// Retrieve one file: the named version, or the latest stored version
    /// of the primary key. A primary key with no stored versions is
    /// `None`; an explicitly named version that does not exist is an
    /// operation error. A source row without its parsed blob for the
    /// requested parser is `None`, not an error.
    pub async fn retrieve(
        &self,
        primary_key: &[Value],
        options: RetrieveOptions<'_>,
    ) -> Result<Option<WarehouseFile>> {
        let codec = self.codec().await?;
        let parser = self.parsed_parser(&codec, options)?;
        let Some(metadata) = self.locate(&codec, primary_key, options).await? else {
            return Ok(None);
        };

        match parser {
            Some(parser_name) => {
                let entry = codec.entry();
                let source_version = MetadataCodec::source_version(&metadata)?;
                let file_key =
                    keys::file_key(&entry.database, &entry.collection, primary_key)?;
                let object_key = keys::parsed_object_key(
                    self.bucket_prefix(),
                    &entry.database,
                    &entry.collection,
                    &parser_name,
                    &source_version,
                    &file_key,
                );
                match self.parsed_objects().get(&object_key).await? {
                    None => Ok(None),
                    Some(data) => {
                        let binary = is_binary(&metadata);
                        Ok(Some(WarehouseFile::new(
                            FileContent::from_stored(data, binary)?,
                            metadata,
                        )))
                    }
                }
            }
            None => Ok(Some(self.fetch_source_file(&metadata).await?)),
        }
    }

    /// Retrieve one file's metadata without touching the object store.
    /// Resolution of versions and parsers matches [Warehouse::retrieve].
    pub async fn retrieve_metadata(
        &self,
        primary_key: &[Value],
        options: RetrieveOptions<'_>,
    ) -> Result<Option<Metadata>> {
        let codec = self.codec().await?;
        self.parsed_parser(&codec, options)?;
        self.locate(&codec, primary_key, options).await
    }

    /// Stream every stored version of a file, newest first by default.
    /// Versions without a parsed blob are skipped when `parsed` is set.
    pub async fn retrieve_versions(
        &self,
        primary_key: &[Value],
        options: VersionsOptions<'_>,
    ) -> Result<BoxStream<'static, Result<WarehouseFile>>> {
        let codec = self.codec().await?;
        codec.check_primary_key_args(primary_key)?;
        let entry = codec.entry().clone();
        let parser = match options.parsed {
            true => Some(Warehouse::resolve_parser(&entry, options.parser_name)?.0),
            false => None,
        };
        let file_key = keys::file_key(&entry.database, &entry.collection, primary_key)?;
        let tz = entry.decode_timezone();
        let rows = self
            .source_table()
            .query_versions(&file_key, options.latest_first)
            .await?;

        let source_objects = self.source_objects().clone();
        let parsed_objects = self.parsed_objects().clone();
        let prefix = self.bucket_prefix().map(str::to_string);
        let stream = rows
            .then(move |row| {
                let codec = codec.clone();
                let tz = tz.clone();
                let entry = entry.clone();
                let parser = parser.clone();
                let file_key = file_key.clone();
                let source_objects = source_objects.clone();
                let parsed_objects = parsed_objects.clone();
                let prefix = prefix.clone();
                async move {
                    let metadata = codec.decode_row(&row?, &tz)?;
                    match parser {
                        Some(parser_name) => {
                            fetch_parsed(
                                &parsed_objects,
                                prefix.as_deref(),
                                &entry.database,
                                &entry.collection,
                                &parser_name,
                                &file_key,
                                metadata,
                            )
                            .await
                        }
                        None => fetch_source(&source_objects, metadata).await.map(Some),
                    }
                }
            })
            .filter_map(|item| async move {
                match item {
                    Ok(None) => None,
                    Ok(Some(file)) => Some(Ok(file)),
                    Err(err) => Some(Err(err)),
                }
            });
        Ok(stream.boxed())
    }

    /// Stream every stored version's metadata, newest first by default.
    pub async fn retrieve_version_metadata(
        &self,
        primary_key: &[Value],
        options: VersionsOptions<'_>,
    ) -> Result<BoxStream<'static, Result<Metadata>>> {
        let codec = self.codec().await?;
        codec.check_primary_key_args(primary_key)?;
        let entry = codec.entry();
        if options.parsed {
            Warehouse::resolve_parser(entry, options.parser_name)?;
        }
        let file_key = keys::file_key(&entry.database, &entry.collection, primary_key)?;
        let tz = entry.decode_timezone();
        let rows = self
            .source_table()
            .query_versions(&file_key, options.latest_first)
            .await?;
        Ok(rows
            .map(move |row| codec.decode_row(&row?, &tz))
            .boxed())
    }

    /// Stream the metadata of every row matching a range query, lazily
    /// decoded as pages arrive.
    pub async fn query_metadata_items(
        &self,
        options: QueryOptions,
    ) -> Result<BoxStream<'static, Result<Metadata>>> {
        let codec = self.codec().await?;
        let entry = codec.entry();
        let tz = entry.decode_timezone();
        let rows = self
            .source_table()
            .query_range(
                &entry.feed_id,
                options.query_range.as_ref(),
                options.index,
                options.fields.as_deref(),
                options.ascending,
            )
            .await?;
        Ok(rows
            .map(move |row| codec.decode_row(&row?, &tz))
            .boxed())
    }

    fn parsed_parser(
        &self,
        codec: &MetadataCodec,
        options: RetrieveOptions<'_>,
    ) -> Result<Option<String>> {
        if !options.parsed {
            return Ok(None);
        }
        Warehouse::resolve_parser(codec.entry(), options.parser_name)
            .map(|(name, _)| Some(name))
    }

    /// Find the requested row's metadata: the named version (an error when
    /// absent) or the latest one (`None` when no versions exist).
    async fn locate(
        &self,
        codec: &MetadataCodec,
        primary_key: &[Value],
        options: RetrieveOptions<'_>,
    ) -> Result<Option<Metadata>> {
        codec.check_primary_key_args(primary_key)?;
        let entry = codec.entry();
        let file_key = keys::file_key(&entry.database, &entry.collection, primary_key)?;
        let tz = entry.decode_timezone();

        match options.source_version {
            Some(version) => {
                let row = self
                    .source_table()
                    .get(&file_key, version)
                    .await?
                    .ok_or_else(|| {
                        WarehouseError::operation(format!(
                            "No file with version '{version}' exists for this key."
                        ))
                    })?;
                Ok(Some(codec.decode_row(&row, &tz)?))
            }
            None => {
                let mut stream = self.source_table().query_versions(&file_key, true).await?;
                stream
                    .next()
                    .await
                    .transpose()?
                    .map(|row| codec.decode_row(&row, &tz))
                    .transpose()
            }
        }
    }

    /// Load a stored source file's body. A record whose object is gone is
    /// an operation error (unlike a missing parsed blob).
    pub(crate) async fn fetch_source_file(&self, metadata: &Metadata) -> Result<WarehouseFile> {
        fetch_source(self.source_objects(), metadata.clone()).await
    }
}

fn is_binary(metadata: &Metadata) -> bool {
    metadata
        .get(BYTES_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

async fn fetch_source(objects: &ObjectClient, metadata: Metadata) -> Result<WarehouseFile> {
    let object_key = metadata
        .get(S3_KEY_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            WarehouseError::operation("Stored record does not reference an object key.")
        })?
        .to_string();
    let data = objects.get(&object_key).await?.ok_or_else(|| {
        WarehouseError::operation(format!("Stored object '{object_key}' is missing."))
    })?;
    let binary = is_binary(&metadata);
    Ok(WarehouseFile::new(
        FileContent::from_stored(data, binary)?,
        metadata,
    ))
}

async fn fetch_parsed(
    objects: &ObjectClient,
    prefix: Option<&str>,
    database: &str,
    collection: &str,
    parser_name: &str,
    file_key: &str,
    metadata: Metadata,
) -> Result<Option<WarehouseFile>> {
    let source_version = MetadataCodec::source_version(&metadata)?;
    let object_key = keys::parsed_object_key(
        prefix,
        database,
        collection,
        parser_name,
        &source_version,
        file_key,
    );
    match objects.get(&object_key).await? {
        None => Ok(None),
        Some(data) => {
            let binary = is_binary(&metadata);
            Ok(Some(WarehouseFile::new(
                FileContent::from_stored(data, binary)?,
                metadata,
            )))
        }
    }
}
