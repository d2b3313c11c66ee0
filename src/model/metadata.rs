/*!
Collection-aware encoding of metadata records into index-store rows.
[MetadataCodec] validates a record against the collection schema, turns it
into typed cells (datetimes and integers become numeric cells so range
queries work), and decodes rows back into [Value]s.
*/

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Result, WarehouseError};
use crate::model::codec::{decode, encode, Encoded, TypeTag};
use crate::model::registry::CollectionEntry;
use crate::model::value::{TzInfo, Value, ZonedDatetime};
use crate::store::index::{Cell, Row};

/// A file's metadata record.
pub type Metadata = BTreeMap<String, Value>;

/// When listed in a collection's required fields, this field is taken as a
/// reliable indicator of whether a new upstream release happened.
pub const LAST_MODIFIED_FIELD: &str = "last-modified";
/// The retrieval instant of a source file; feeds the version id.
pub const RETRIEVED_FIELD: &str = "retrieved_date";
/// The upstream release instant of a source file.
pub const RELEASE_FIELD: &str = "release_date";
/// Start of the content period covered by a file; required for parsed files.
pub const CONTENT_START_FIELD: &str = "content_start";
/// End (exclusive) of the content period covered by a file.
pub const CONTENT_END_FIELD: &str = "content_end";
/// Resolution of the file's content period.
pub const CONTENT_RESOLUTION_FIELD: &str = "content_resolution";
/// The generated version id of a source file.
pub const VERSION_FIELD: &str = "source_version";
/// The derived hash key of a logical source file.
pub const FILE_KEY_FIELD: &str = "file_key";
/// The collection id a row belongs to.
pub const FEED_ID_FIELD: &str = "feed_id";
/// Hex MD5 digest of the file body.
pub const MD5_FIELD: &str = "md5";
/// Whether the file body is binary (`true`) or text (`false`).
pub const BYTES_FIELD: &str = "bytes";
/// The object-store key the file body was uploaded under.
pub const S3_KEY_FIELD: &str = "s3_key";

/// Fields the engine types regardless of the collection's own map. The
/// per-collection map is consulted first and may override these.
fn builtin_tag(field: &str) -> Option<TypeTag> {
    match field {
        RETRIEVED_FIELD | RELEASE_FIELD | LAST_MODIFIED_FIELD | CONTENT_START_FIELD
        | CONTENT_END_FIELD => Some(TypeTag::Datetime),
        CONTENT_RESOLUTION_FIELD => Some(TypeTag::Timedelta),
        VERSION_FIELD | FILE_KEY_FIELD | FEED_ID_FIELD | MD5_FIELD | S3_KEY_FIELD => {
            Some(TypeTag::Str)
        }
        BYTES_FIELD => Some(TypeTag::Bool),
        _ => None,
    }
}

/// Fields that are required on every source record in addition to the
/// collection's own required fields.
const FIXED_REQUIRED: [&str; 5] = [
    RETRIEVED_FIELD,
    RELEASE_FIELD,
    FEED_ID_FIELD,
    MD5_FIELD,
    BYTES_FIELD,
];

/// A metadata encoder/decoder bound to one collection's schema.
#[derive(Debug, Clone)]
pub struct MetadataCodec {
    entry: CollectionEntry,
}

impl MetadataCodec {
    /// Bind a codec to a collection entry.
    pub fn new(entry: CollectionEntry) -> Self {
        MetadataCodec { entry }
    }

    /// The bound collection entry.
    pub fn entry(&self) -> &CollectionEntry {
        &self.entry
    }

    /// The declared tag for a field: the collection's map first, then the
    /// engine's fixed extensions.
    pub fn field_tag(&self, field: &str) -> Option<TypeTag> {
        self.entry
            .metadata_type_map
            .get(field)
            .copied()
            .or_else(|| builtin_tag(field))
    }

    fn is_required(&self, field: &str) -> bool {
        FIXED_REQUIRED.contains(&field)
            || self.entry.primary_key_fields.iter().any(|f| f == field)
            || self.entry.required_metadata_fields.iter().any(|f| f == field)
    }

    /// Check that every required field is present with a non-None value.
    /// `parsed` additionally requires [CONTENT_START_FIELD].
    pub fn validate(&self, metadata: &Metadata, parsed: bool) -> Result<()> {
        let mut required = self.entry.all_required_fields();
        for field in FIXED_REQUIRED {
            if !required.iter().any(|f| f == field) {
                required.push(field.to_string());
            }
        }
        if parsed && !required.iter().any(|f| f == CONTENT_START_FIELD) {
            required.push(CONTENT_START_FIELD.to_string());
        }

        let missing: Vec<&str> = required
            .iter()
            .filter(|field| !metadata.contains_key(field.as_str()))
            .map(|field| field.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(WarehouseError::metadata(format!(
                "Required metadata fields {missing:?} are missing."
            )));
        }
        for field in &required {
            if metadata.get(field.as_str()).is_some_and(Value::is_none) {
                return Err(WarehouseError::metadata(format!(
                    "Required metadata field '{field}' must not be None."
                )));
            }
        }
        for (field, value) in metadata {
            if value.is_none() && self.field_tag(field).is_none() {
                return Err(WarehouseError::metadata(format!(
                    "Field '{field}' is None but has no registered type."
                )));
            }
        }
        Ok(())
    }

    /// Encode one field into its cell. `None` means the field is skipped
    /// (None values and unregistered non-string fields are not stored).
    pub fn encode_field(&self, field: &str, value: &Value) -> Result<Option<Cell>> {
        let tag = match self.field_tag(field) {
            Some(tag) => tag,
            None => {
                return match value {
                    Value::Str(s) => Ok(Some(Cell::string(s))),
                    Value::None => Ok(None),
                    other => {
                        warn!(
                            field,
                            value_type = %TypeTag::of(other),
                            "dropping metadata field with no registered type",
                        );
                        Ok(None)
                    }
                }
            }
        };

        if value.is_none() {
            if self.is_required(field) {
                return Err(WarehouseError::metadata(format!(
                    "Required metadata field '{field}' must not be None."
                )));
            }
            return Ok(None);
        }
        if TypeTag::of(value) != tag {
            return Err(WarehouseError::metadata(format!(
                "Field '{field}' expects type {tag}, got {}.",
                TypeTag::of(value)
            )));
        }

        let cell = match value {
            Value::Datetime(dt) => Cell::number(dt.timestamp()),
            Value::Int(i) => Cell::number(i),
            other => Cell::string(encode(other)?.val_str),
        };
        Ok(Some(cell))
    }

    /// Encode a full metadata record into an index-store row.
    pub fn encode_row(&self, metadata: &Metadata) -> Result<Row> {
        let mut row = Row::new();
        for (field, value) in metadata {
            if let Some(cell) = self.encode_field(field, value)? {
                row.insert(field.clone(), cell);
            }
        }
        Ok(row)
    }

    /// Decode a row back into metadata. Datetimes stored as epoch cells are
    /// re-localised into `tz`; unknown fields decode as strings.
    pub fn decode_row(&self, row: &Row, tz: &TzInfo) -> Result<Metadata> {
        let mut metadata = Metadata::new();
        for (field, cell) in row {
            let value = match self.field_tag(field) {
                Some(TypeTag::Datetime) => {
                    let epoch = parse_epoch(cell).ok_or_else(|| {
                        WarehouseError::metadata(format!(
                            "Field '{field}' holds an invalid epoch cell."
                        ))
                    })?;
                    Value::Datetime(ZonedDatetime::from_timestamp(epoch, tz.clone())?)
                }
                Some(TypeTag::Int) => Value::Int(cell.as_str().parse().map_err(|_| {
                    WarehouseError::metadata(format!(
                        "Field '{field}' holds an invalid integer cell."
                    ))
                })?),
                Some(tag) => decode(&Encoded::new(cell.as_str(), tag))?,
                None => Value::Str(cell.as_str().to_string()),
            };
            metadata.insert(field.clone(), value);
        }
        Ok(metadata)
    }

    /// Extract the primary key values from a metadata record, checking
    /// presence and declared types.
    pub fn primary_key(&self, metadata: &Metadata) -> Result<Vec<Value>> {
        let missing: Vec<&str> = self
            .entry
            .primary_key_fields
            .iter()
            .filter(|field| !metadata.contains_key(*field))
            .map(|field| field.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(WarehouseError::metadata(format!(
                "Primary key fields {missing:?} are missing."
            )));
        }
        let mut values = Vec::with_capacity(self.entry.primary_key_fields.len());
        for field in &self.entry.primary_key_fields {
            let value = &metadata[field];
            if let Some(tag) = self.field_tag(field) {
                if TypeTag::of(value) != tag {
                    return Err(WarehouseError::metadata(format!(
                        "Primary key field '{field}' expects type {tag}, got {}.",
                        TypeTag::of(value)
                    )));
                }
            }
            values.push(value.clone());
        }
        Ok(values)
    }

    /// Check caller-supplied primary key values for arity and declared
    /// types. Failures are argument errors, not metadata errors.
    pub fn check_primary_key_args(&self, values: &[Value]) -> Result<()> {
        let fields = &self.entry.primary_key_fields;
        if values.len() != fields.len() {
            return Err(WarehouseError::argument(format!(
                "Expected {} primary key values, got {}.",
                fields.len(),
                values.len()
            )));
        }
        for (field, value) in fields.iter().zip(values) {
            if let Some(tag) = self.field_tag(field) {
                if TypeTag::of(value) != tag {
                    return Err(WarehouseError::argument(format!(
                        "Primary key field '{field}' expects type {tag}, got {}.",
                        TypeTag::of(value)
                    )));
                }
            }
        }
        Ok(())
    }

    /// Extract the version id from a metadata record.
    pub fn source_version(metadata: &Metadata) -> Result<String> {
        match metadata.get(VERSION_FIELD) {
            None | Some(Value::None) => Err(WarehouseError::metadata(format!(
                "The version field '{VERSION_FIELD}' is missing."
            ))),
            Some(Value::Str(version)) => Ok(version.clone()),
            Some(other) => Err(WarehouseError::metadata(format!(
                "Invalid version type {}, expected a string.",
                TypeTag::of(other)
            ))),
        }
    }
}

fn parse_epoch(cell: &Cell) -> Option<i64> {
    let text = cell.as_str();
    text.parse::<i64>()
        .ok()
        .or_else(|| text.parse::<f64>().ok().map(|f| f as i64))
}
