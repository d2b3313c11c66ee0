//! Shared backend setup for the end-to-end suites: in-process stores, a
//! warehouse session factory, and the test collections every suite
//! registers.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use object_store::memory::InMemory;

use warehouse_rs::config::Settings;
use warehouse_rs::file::WarehouseFile;
use warehouse_rs::model::codec::TypeTag;
use warehouse_rs::model::metadata::Metadata;
use warehouse_rs::model::value::{TzInfo, Value, ZonedDatetime};
use warehouse_rs::registry::Registry;
use warehouse_rs::store::index::IndexStore;
use warehouse_rs::store::memory::MemoryIndexStore;
use warehouse_rs::store::source::SourceTable;
use warehouse_rs::warehouse::Warehouse;

pub const REGION: &str = "us-east-1";
pub const SOURCE_BUCKET: &str = "source-bucket";
pub const PARSED_BUCKET: &str = "parsed-bucket";
pub const REGISTRY_TABLE: &str = "registry-table";
pub const SOURCE_TABLE: &str = "source-table";

/// The in-process backing services one test shares across sessions.
pub struct Backend {
    pub index: Arc<MemoryIndexStore>,
    pub source_bucket: Arc<InMemory>,
    pub parsed_bucket: Arc<InMemory>,
}

pub fn setup_resources() -> Backend {
    let index = Arc::new(MemoryIndexStore::new());
    index.create_table(Registry::table_spec(REGISTRY_TABLE)).unwrap();
    index.create_table(SourceTable::table_spec(SOURCE_TABLE)).unwrap();
    Backend {
        index,
        source_bucket: Arc::new(InMemory::new()),
        parsed_bucket: Arc::new(InMemory::new()),
    }
}

fn settings(ttl: Option<u64>, prefix: Option<&str>) -> Settings {
    Settings {
        region_name: REGION.to_string(),
        registry_table_name: REGISTRY_TABLE.to_string(),
        source_table_name: SOURCE_TABLE.to_string(),
        source_bucket_name: SOURCE_BUCKET.to_string(),
        parsed_bucket_name: PARSED_BUCKET.to_string(),
        bucket_prefix: prefix.map(str::to_string),
        role_arn: None,
        sesh_duration: None,
        cache_ttl: ttl.unwrap_or(300),
    }
}

/// A fresh warehouse session over the shared backend.
pub fn get_warehouse_sesh(backend: &Backend) -> Warehouse {
    get_warehouse_sesh_with(backend, None, None)
}

pub fn get_warehouse_sesh_with(
    backend: &Backend,
    ttl: Option<u64>,
    prefix: Option<&str>,
) -> Warehouse {
    let index: Arc<dyn IndexStore> = backend.index.clone();
    Warehouse::new(
        settings(ttl, prefix),
        index,
        backend.source_bucket.clone(),
        backend.parsed_bucket.clone(),
    )
}

pub fn utc(y: i32, m: u32, d: u32) -> ZonedDatetime {
    utc_hms(y, m, d, 0, 0, 0)
}

pub fn utc_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> ZonedDatetime {
    ZonedDatetime::aware(
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap(),
        TzInfo::utc(),
    )
}

pub fn metadata(pairs: Vec<(&str, Value)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

pub fn type_map(pairs: Vec<(&str, TypeTag)>) -> BTreeMap<String, TypeTag> {
    pairs
        .into_iter()
        .map(|(key, tag)| (key.to_string(), tag))
        .collect()
}

pub fn names(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|field| field.to_string()).collect()
}

/// Registers the collections the suites work against.
pub async fn register_test_collections(wh: &Warehouse) {
    // pkey: "url" - rkey: "filename"
    wh.update_source_registry(
        "test_database",
        "test_collection",
        Some(names(&["url"])),
        Some(names(&["filename"])),
        Some(type_map(vec![
            ("url", TypeTag::Str),
            ("filename", TypeTag::Str),
        ])),
    )
    .await
    .unwrap();
    // two parsers; the first registered one starts as the default
    wh.update_parsed_registry(
        "test_database",
        "test_collection",
        "parser_a",
        Some(names(&["key1"])),
        Some(type_map(vec![
            ("key1", TypeTag::Datetime),
            ("key2", TypeTag::Int),
        ])),
        Some(TzInfo::named("America/New_York").unwrap()),
        false,
    )
    .await
    .unwrap();
    wh.update_parsed_registry(
        "test_database",
        "test_collection",
        "parser_b",
        Some(names(&["key1", "key2"])),
        Some(type_map(vec![
            ("key1", TypeTag::Int),
            ("key2", TypeTag::Str),
        ])),
        Some(TzInfo::named("America/Chicago").unwrap()),
        false,
    )
    .await
    .unwrap();

    // pkey: "url" - rkey: "last-modified"
    wh.update_source_registry(
        "test_database",
        "test_last_modified",
        Some(names(&["url"])),
        Some(names(&["last-modified"])),
        Some(type_map(vec![
            ("url", TypeTag::Str),
            ("last-modified", TypeTag::Datetime),
        ])),
    )
    .await
    .unwrap();

    // pkey: "url", a free-form "key1" column
    wh.update_source_registry(
        "test_database",
        "test_query",
        Some(names(&["url"])),
        None,
        Some(type_map(vec![
            ("url", TypeTag::Str),
            ("key1", TypeTag::Str),
        ])),
    )
    .await
    .unwrap();

    // single-field pkey with an extra typed column
    wh.update_source_registry(
        "ercot",
        "load_forecast",
        Some(names(&["key13"])),
        None,
        Some(type_map(vec![
            ("key13", TypeTag::Str),
            ("key0", TypeTag::Int),
        ])),
    )
    .await
    .unwrap();

    // 2-field pkey
    wh.update_source_registry(
        "caiso",
        "realtime_price",
        Some(names(&["key1", "key2"])),
        None,
        Some(type_map(vec![
            ("key1", TypeTag::Datetime),
            ("key2", TypeTag::Int),
        ])),
    )
    .await
    .unwrap();
    wh.update_parsed_registry(
        "caiso",
        "realtime_price",
        "price_parser",
        Some(names(&["key1"])),
        Some(type_map(vec![("key1", TypeTag::Datetime)])),
        Some(TzInfo::named("America/Los_Angeles").unwrap()),
        false,
    )
    .await
    .unwrap();
}

/// Four versions of one logical file in `test_database/test_collection`,
/// earliest retrieval first, each with unique content.
pub fn load_file_versions() -> (Vec<Value>, Vec<WarehouseFile>) {
    let file_key = vec![Value::from("http://url-1")];
    let files = (0..4u32)
        .map(|i| {
            let retrieved = utc(2020, 1 + i, 2);
            WarehouseFile::new(
                format!("file content number {i}"),
                metadata(vec![
                    ("url", Value::from("http://url-1")),
                    ("filename", Value::from("hello_world.txt")),
                    ("retrieved_date", Value::Datetime(retrieved.clone())),
                    ("release_date", Value::Datetime(retrieved)),
                ]),
            )
        })
        .collect();
    (file_key, files)
}

/// 300 deterministic pseudo-random timestamps inside 2020.
pub fn timestamps_2020() -> Vec<i64> {
    let year_start = utc(2020, 1, 1).timestamp();
    let year_seconds: i64 = 366 * 24 * 60 * 60;
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..300)
        .map(|_| {
            // xorshift*
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let sample = (state.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 1) as i64;
            year_start + sample % year_seconds
        })
        .collect()
}
