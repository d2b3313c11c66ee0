/*!
Deterministic key derivation: collection ids, file hash keys, source
version ids, and object-store key layout.
*/

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, WarehouseError};
use crate::model::codec::encode;
use crate::model::value::{Value, ZonedDatetime};

lazy_static! {
    static ref VERSION_ID: Regex = Regex::new(r"^(\d+)_[0-9a-f]{8}$").unwrap();
}

/// The process-global identifier of a collection: `<database>_<collection>`.
pub fn collection_id(database: &str, collection: &str) -> String {
    format!("{database}_{collection}")
}

/// Join primary-key values with `_`. Datetimes serialise as decimal epoch
/// seconds so the same instant always produces the same key; every other
/// value uses its codec string form.
pub fn serialize_primary_key(values: &[Value]) -> Result<String> {
    let parts = values
        .iter()
        .map(|value| match value {
            Value::Datetime(dt) => Ok(dt.timestamp().to_string()),
            other => Ok(encode(other)?.val_str),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("_"))
}

/// The hash key of a logical source file:
/// `<database>/<collection>/<hex(sha256(serialized_primary_key))>`.
pub fn file_key(database: &str, collection: &str, primary_key: &[Value]) -> Result<String> {
    let serialized = serialize_primary_key(primary_key)?;
    let digest = Sha256::digest(serialized.as_bytes());
    Ok(format!(
        "{database}/{collection}/{}",
        hex::encode(digest)
    ))
}

/// Generate a version id for a retrieval: the retrieval instant's epoch
/// seconds, then 8 hex chars of a random 128-bit id to break same-second
/// ties. Version ids collate by their epoch prefix.
pub fn source_version(retrieved: &ZonedDatetime) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", retrieved.timestamp(), &suffix[..8])
}

/// Extract the epoch-seconds prefix of a version id.
pub fn version_epoch(version: &str) -> Result<i64> {
    let captures = VERSION_ID
        .captures(version)
        .ok_or_else(|| WarehouseError::argument(format!("Invalid version id '{version}'.")))?;
    captures[1]
        .parse()
        .map_err(|_| WarehouseError::argument(format!("Invalid version id '{version}'.")))
}

/// The digest segment of a file key (everything after the final `/`).
fn sha_segment(file_key: &str) -> &str {
    file_key.rsplit('/').next().unwrap_or(file_key)
}

fn prefixed(prefix: Option<&str>, key: String) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}/{key}"),
        _ => key,
    }
}

/// The object-store key of a source file version.
pub fn source_object_key(
    prefix: Option<&str>,
    database: &str,
    collection: &str,
    version: &str,
    file_key: &str,
) -> String {
    prefixed(
        prefix,
        format!(
            "{database}/{collection}/{version}_{}",
            sha_segment(file_key)
        ),
    )
}

/// The object-store key of a parsed file, scoped under its parser.
pub fn parsed_object_key(
    prefix: Option<&str>,
    database: &str,
    collection: &str,
    parser_name: &str,
    version: &str,
    file_key: &str,
) -> String {
    prefixed(
        prefix,
        format!(
            "{database}/{collection}/{parser_name}/{version}_{}",
            sha_segment(file_key)
        ),
    )
}
