/*!
The registry's data model: one [CollectionEntry] per collection, carrying
the source schema and any registered [ParserSchema]s, plus the string-cell
wire codec for registry rows.
*/

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::{Result, WarehouseError};
use crate::keys;
use crate::model::codec::{decode, encode, Encoded, TypeTag};
use crate::model::value::{TzInfo, Value};
use crate::store::index::{Cell, Row};

/// Registry row attribute: the collection id, also the table's hash key.
pub const REG_ID: &str = "feed_id";
/// Registry row attribute: database name.
pub const REG_DB: &str = "database";
/// Registry row attribute: collection name.
pub const REG_COLL: &str = "collection";
/// Registry row attribute: primary key fields (JSON list).
pub const REG_PKEYS: &str = "primary_key_fields";
/// Registry row attribute: required metadata fields (JSON list).
pub const REG_RKEYS: &str = "required_metadata_fields";
/// Registry row attribute: metadata type map (JSON object).
pub const REG_TMAP: &str = "metadata_type_map";
/// Registry row attribute: parsers (JSON object).
pub const REG_PARSERS: &str = "parsers";

const PAR_PKEYS: &str = "primary_key_fields";
const PAR_TMAP: &str = "row_type_map";
const PAR_TZ: &str = "timezone";
const PAR_DEFAULT: &str = "default";

/// The schema of one registered parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserSchema {
    /// Primary key columns of the parsed rows.
    pub primary_key_fields: Vec<String>,
    /// Type map for parsed rows.
    pub row_type_map: BTreeMap<String, TypeTag>,
    /// The timezone the parser works in.
    pub timezone: TzInfo,
    /// Whether this is the collection's default parser.
    pub default: bool,
}

/// One collection's registry entry: identity, source schema, and parsers.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEntry {
    /// The collection id, `<database>_<collection>`.
    pub feed_id: String,
    /// The database name.
    pub database: String,
    /// The collection name.
    pub collection: String,
    /// Source file primary key fields, immutable after creation.
    pub primary_key_fields: Vec<String>,
    /// Additional required metadata fields beyond the primary keys.
    pub required_metadata_fields: Vec<String>,
    /// Field name to type tag for source metadata.
    pub metadata_type_map: BTreeMap<String, TypeTag>,
    /// Registered parsers by name.
    pub parsers: BTreeMap<String, ParserSchema>,
}

impl CollectionEntry {
    /// A fresh entry with no required fields and no parsers.
    pub fn new(
        database: &str,
        collection: &str,
        primary_key_fields: Vec<String>,
        metadata_type_map: BTreeMap<String, TypeTag>,
    ) -> Self {
        CollectionEntry {
            feed_id: keys::collection_id(database, collection),
            database: database.to_string(),
            collection: collection.to_string(),
            primary_key_fields,
            required_metadata_fields: Vec::new(),
            metadata_type_map,
            parsers: BTreeMap::new(),
        }
    }

    /// All required fields: the primary keys followed by the other required
    /// fields, order-preserving and without duplicates.
    pub fn all_required_fields(&self) -> Vec<String> {
        let mut fields = self.primary_key_fields.clone();
        for field in &self.required_metadata_fields {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        fields
    }

    /// The collection's default parser.
    ///
    /// Fails with an operation error when the collection has no parsers.
    /// Parsers without any default flag set should be unreachable, but the
    /// check stays.
    pub fn default_parser(&self) -> Result<(&str, &ParserSchema)> {
        if self.parsers.is_empty() {
            return Err(WarehouseError::operation(format!(
                "There are no parsers for {}, {}.",
                self.database, self.collection
            )));
        }
        self.parsers
            .iter()
            .find(|(_, parser)| parser.default)
            .map(|(name, parser)| (name.as_str(), parser))
            .ok_or_else(|| {
                WarehouseError::Message(format!(
                    "None of the parsers in {}, {} are default.",
                    self.database, self.collection
                ))
            })
    }

    /// The timezone that datetimes of this collection decode into: the
    /// default parser's zone, or UTC when no parser is registered.
    pub fn decode_timezone(&self) -> TzInfo {
        self.default_parser()
            .map(|(_, parser)| parser.timezone.clone())
            .unwrap_or_else(|_| TzInfo::utc())
    }

    /// Encode into a registry row of string cells.
    pub fn encode_row(&self) -> Result<Row> {
        let mut parsers = serde_json::Map::new();
        for (name, parser) in &self.parsers {
            parsers.insert(
                name.clone(),
                json!({
                    PAR_PKEYS: encode_keys(&parser.primary_key_fields)?,
                    PAR_TMAP: encode_type_map(&parser.row_type_map)?,
                    PAR_TZ: encode(&Value::Tz(parser.timezone.clone()))?.serialize()?,
                    PAR_DEFAULT: encode(&Value::Bool(parser.default))?.serialize()?,
                }),
            );
        }

        let mut row = Row::new();
        row.insert(REG_ID.to_string(), Cell::string(&self.feed_id));
        row.insert(REG_DB.to_string(), Cell::string(&self.database));
        row.insert(REG_COLL.to_string(), Cell::string(&self.collection));
        row.insert(
            REG_PKEYS.to_string(),
            Cell::string(encode_keys(&self.primary_key_fields)?),
        );
        row.insert(
            REG_RKEYS.to_string(),
            Cell::string(encode_keys(&self.required_metadata_fields)?),
        );
        row.insert(
            REG_TMAP.to_string(),
            Cell::string(encode_type_map(&self.metadata_type_map)?),
        );
        row.insert(
            REG_PARSERS.to_string(),
            Cell::string(serde_json::to_string(&serde_json::Value::Object(parsers))?),
        );
        Ok(row)
    }

    /// Decode a registry row.
    pub fn decode_row(row: &Row) -> Result<CollectionEntry> {
        let parsers_text = get_string(row, REG_PARSERS)?;
        let parsers_json: BTreeMap<String, BTreeMap<String, String>> =
            serde_json::from_str(&parsers_text)?;
        let mut parsers = BTreeMap::new();
        for (name, fields) in parsers_json {
            let missing =
                |field: &str| WarehouseError::Message(format!("Parser entry missing '{field}'."));
            let timezone = match decode(&Encoded::deserialize(
                fields.get(PAR_TZ).ok_or_else(|| missing(PAR_TZ))?,
            )?)? {
                Value::Tz(tz) => tz,
                other => {
                    return Err(WarehouseError::Message(format!(
                        "Parser timezone has invalid type {}.",
                        TypeTag::of(&other)
                    )))
                }
            };
            let default = match decode(&Encoded::deserialize(
                fields.get(PAR_DEFAULT).ok_or_else(|| missing(PAR_DEFAULT))?,
            )?)? {
                Value::Bool(b) => b,
                other => {
                    return Err(WarehouseError::Message(format!(
                        "Parser default flag has invalid type {}.",
                        TypeTag::of(&other)
                    )))
                }
            };
            parsers.insert(
                name,
                ParserSchema {
                    primary_key_fields: decode_keys(
                        fields.get(PAR_PKEYS).ok_or_else(|| missing(PAR_PKEYS))?,
                    )?,
                    row_type_map: decode_type_map(
                        fields.get(PAR_TMAP).ok_or_else(|| missing(PAR_TMAP))?,
                    )?,
                    timezone,
                    default,
                },
            );
        }

        Ok(CollectionEntry {
            feed_id: get_string(row, REG_ID)?,
            database: get_string(row, REG_DB)?,
            collection: get_string(row, REG_COLL)?,
            primary_key_fields: decode_keys(&get_string(row, REG_PKEYS)?)?,
            required_metadata_fields: decode_keys(&get_string(row, REG_RKEYS)?)?,
            metadata_type_map: decode_type_map(&get_string(row, REG_TMAP)?)?,
            parsers,
        })
    }
}

fn get_string(row: &Row, field: &str) -> Result<String> {
    row.get(field)
        .map(|cell| cell.as_str().to_string())
        .ok_or_else(|| WarehouseError::Message(format!("Registry row is missing '{field}'.")))
}

fn encode_keys(keys: &[String]) -> Result<String> {
    Ok(serde_json::to_string(keys)?)
}

fn decode_keys(text: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(text)?)
}

fn encode_type_map(map: &BTreeMap<String, TypeTag>) -> Result<String> {
    let named: BTreeMap<&str, &str> = map
        .iter()
        .map(|(field, tag)| (field.as_str(), tag.name()))
        .collect();
    Ok(serde_json::to_string(&named)?)
}

fn decode_type_map(text: &str) -> Result<BTreeMap<String, TypeTag>> {
    let named: BTreeMap<String, String> = serde_json::from_str(text)?;
    named
        .into_iter()
        .map(|(field, name)| Ok((field, TypeTag::from_name(&name)?)))
        .collect()
}
