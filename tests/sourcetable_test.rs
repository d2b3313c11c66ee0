//! Range-indexed metadata queries and metadata updates against the source
//! table's secondary indexes.

mod common;

use std::collections::HashSet;

use futures::TryStreamExt;

use common::*;
use warehouse_rs::error::WarehouseError;
use warehouse_rs::file::WarehouseFile;
use warehouse_rs::model::metadata::Metadata;
use warehouse_rs::model::value::{DatetimeRange, Value, ZonedDatetime};
use warehouse_rs::store::source::QueryIndex;
use warehouse_rs::warehouse::{QueryOptions, RetrieveOptions, StoreOptions, StoreStatus, Warehouse};

async fn warehouse() -> (Backend, Warehouse) {
    let backend = setup_resources();
    let wh = get_warehouse_sesh(&backend);
    register_test_collections(&wh).await;
    wh.select_collection("test_query", Some("test_database"))
        .await
        .unwrap();
    (backend, wh)
}

const DAY: i64 = 24 * 60 * 60;

/// Store 300 files with day-long content ranges spread over 2020. Every
/// other file carries `content_start`; every 8th misses `content_end`.
async fn store_random_files_2020(wh: &Warehouse) -> Vec<(String, String)> {
    let mut file_ids = Vec::new();
    for (i, ts) in timestamps_2020().into_iter().enumerate() {
        let floored = ts - ts.rem_euclid(DAY);
        let start = ZonedDatetime::from_timestamp(floored, common_tz()).unwrap();
        let end = ZonedDatetime::from_timestamp(floored + DAY, common_tz()).unwrap();

        let content = format!("{} -> {}", start.isoformat(), end.isoformat());
        let mut md = metadata(vec![
            ("url", Value::from(content.as_str())),
            ("retrieved_date", Value::Datetime(start.clone())),
            ("release_date", Value::Datetime(start.clone())),
        ]);
        if i % 2 == 0 {
            md.insert("content_start".to_string(), Value::Datetime(start));
        }
        if i % 8 != 0 {
            md.insert("content_end".to_string(), Value::Datetime(end));
        }

        let file = WarehouseFile::new(content, md);
        let response = wh
            .store(
                &file,
                StoreOptions {
                    force_store: true,
                    ..StoreOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(response.status, StoreStatus::Success);
        let url = response.primary_key[0].as_str().unwrap().to_string();
        file_ids.push((url, response.source_version));
    }
    assert_eq!(
        file_ids.iter().collect::<HashSet<_>>().len(),
        file_ids.len()
    );
    assert_eq!(file_ids.len(), 300);
    file_ids
}

fn common_tz() -> warehouse_rs::model::value::TzInfo {
    warehouse_rs::model::value::TzInfo::utc()
}

async fn row_id(wh: &Warehouse, row: &Metadata) -> (String, String) {
    let primary_key = wh.get_primary_key(row).await.unwrap();
    (
        primary_key[0].as_str().unwrap().to_string(),
        wh.get_source_version(row).unwrap(),
    )
}

fn ts_of(row: &Metadata, field: &str) -> i64 {
    row[field].as_datetime().unwrap().timestamp()
}

#[tokio::test]
async fn test_query_content() {
    let (_backend, wh) = warehouse().await;
    let file_ids: HashSet<_> = store_random_files_2020(&wh).await.into_iter().collect();

    // the content index only holds entries with a content_start
    let content_results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            index: Some(QueryIndex::Content),
            ..QueryOptions::all()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(content_results.len() < file_ids.len());

    // with no index at all, every entry comes back
    let all_results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions::all())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(all_results.len(), file_ids.len());

    // query a specific range
    let start = utc(2020, 3, 3);
    let end = utc(2020, 9, 6);
    let query_range = DatetimeRange::new(start.clone(), end.clone()).unwrap();
    let query_results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions::range(query_range.clone()))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut query_result_ids = HashSet::new();
    for row in &query_results {
        query_result_ids.insert(row_id(&wh, row).await);
    }
    assert!(!query_results.is_empty());
    assert!(query_results.len() < file_ids.len());
    assert!(query_result_ids.is_subset(&file_ids));

    // the queried content overlaps the range
    let mut have_end = 0;
    for row in &query_results {
        assert!(ts_of(row, "content_start") <= end.timestamp());
        if row.contains_key("content_end") {
            assert!(start.timestamp() < ts_of(row, "content_end"));
            have_end += 1;
        }
    }
    // rows with a missing content_end are matched as well
    assert!(0 < have_end && have_end < query_results.len());

    // and the inverse holds for everything not returned
    for row in &all_results {
        let id = row_id(&wh, row).await;
        if !query_result_ids.contains(&id) && row.contains_key("content_start") {
            let excluded = ts_of(row, "content_start") > end.timestamp()
                || (row.contains_key("content_end")
                    && ts_of(row, "content_end") <= start.timestamp());
            assert!(excluded);
        }
    }

    // results sort by content_start
    for pair in query_results.windows(2) {
        assert!(ts_of(&pair[0], "content_start") <= ts_of(&pair[1], "content_start"));
    }

    // a reverse query returns the same rows, reversed
    let query_results_2: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(query_range.clone()),
            ascending: false,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(query_results_2.len(), query_results.len());
    for pair in query_results_2.windows(2) {
        assert!(ts_of(&pair[0], "content_start") >= ts_of(&pair[1], "content_start"));
    }

    // filter for specific fields
    let fields = names(&["url", "retrieved_date"]);
    let query_results_3: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(query_range),
            fields: Some(fields.clone()),
            ascending: true,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(query_results_3.len(), query_results.len());
    for row in &query_results_3 {
        assert!(row.keys().all(|key| fields.contains(key)));
    }

    // an empty range matches nothing
    let empty_range = DatetimeRange::new(utc(2010, 1, 1), utc(2015, 1, 1)).unwrap();
    let results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(empty_range),
            ascending: false,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(results.is_empty());
}

async fn query_between_range(wh: &Warehouse, index: QueryIndex, date_key: &str) {
    let file_ids: HashSet<_> = store_random_files_2020(wh).await.into_iter().collect();

    let all_results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            index: Some(index),
            ..QueryOptions::all()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    match index {
        // every generated file has a release date
        QueryIndex::Release => assert_eq!(all_results.len(), file_ids.len()),
        // half of the generated files carry a content_start
        QueryIndex::Start => assert_eq!(all_results.len(), file_ids.len() / 2),
        QueryIndex::Content => unreachable!(),
    }

    let start = utc(2020, 3, 3);
    let end = utc(2020, 9, 6);
    let query_range = DatetimeRange::new(start.clone(), end.clone()).unwrap();
    let query_results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(query_range.clone()),
            index: Some(index),
            ascending: true,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut query_result_ids = HashSet::new();
    for row in &query_results {
        query_result_ids.insert(row_id(wh, row).await);
    }
    assert!(!query_results.is_empty());
    assert!(query_results.len() < file_ids.len());
    assert!(query_result_ids.is_subset(&file_ids));

    // both bounds are inclusive
    for row in &query_results {
        let ts = ts_of(row, date_key);
        assert!(start.timestamp() <= ts && ts <= end.timestamp());
    }
    // everything outside the bounds is excluded
    for row in &all_results {
        let id = row_id(wh, row).await;
        if !query_result_ids.contains(&id) {
            let ts = ts_of(row, date_key);
            assert!(ts < start.timestamp() || ts > end.timestamp());
        }
    }

    // sorted ascending, and descending on request
    for pair in query_results.windows(2) {
        assert!(ts_of(&pair[0], date_key) <= ts_of(&pair[1], date_key));
    }
    let reversed: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(query_range.clone()),
            index: Some(index),
            ascending: false,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(reversed.len(), query_results.len());
    for pair in reversed.windows(2) {
        assert!(ts_of(&pair[0], date_key) >= ts_of(&pair[1], date_key));
    }

    // projections apply on secondary-index queries too
    let fields = names(&["url", "retrieved_date"]);
    let projected: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(query_range),
            index: Some(index),
            fields: Some(fields.clone()),
            ascending: true,
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(projected.len(), query_results.len());
    for row in &projected {
        assert!(row.keys().all(|key| fields.contains(key)));
    }

    // an empty range matches nothing
    let empty_range = DatetimeRange::new(utc(2010, 1, 1), utc(2015, 1, 1)).unwrap();
    let results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(empty_range),
            index: Some(index),
            ascending: false,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_query_release() {
    let (_backend, wh) = warehouse().await;
    query_between_range(&wh, QueryIndex::Release, "release_date").await;
}

#[tokio::test]
async fn test_query_start() {
    let (_backend, wh) = warehouse().await;
    query_between_range(&wh, QueryIndex::Start, "content_start").await;
}

#[tokio::test]
async fn test_query_inclusive_bounds() {
    let (_backend, wh) = warehouse().await;

    // four day-long files; query for the middle two by content range
    for day in [utc(2020, 2, 1), utc(2020, 3, 3), utc(2020, 9, 6), utc(2020, 11, 1)] {
        let end = ZonedDatetime::from_timestamp(day.timestamp() + DAY, common_tz()).unwrap();
        let file = WarehouseFile::new(
            day.isoformat(),
            metadata(vec![
                ("url", Value::from(day.isoformat().as_str())),
                ("retrieved_date", Value::Datetime(day.clone())),
                ("release_date", Value::Datetime(day.clone())),
                ("content_start", Value::Datetime(day)),
                ("content_end", Value::Datetime(end)),
            ]),
        );
        let response = wh.store(&file, StoreOptions::default()).await.unwrap();
        assert_eq!(response.status, StoreStatus::Success);
    }

    let range = DatetimeRange::new(utc(2020, 3, 3), utc(2020, 9, 6)).unwrap();
    let results: Vec<Metadata> = wh
        .query_metadata_items(QueryOptions {
            query_range: Some(range),
            index: Some(QueryIndex::Content),
            ascending: true,
            ..QueryOptions::default()
        })
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(ts_of(&results[0], "content_start"), utc(2020, 3, 3).timestamp());
    assert_eq!(ts_of(&results[1], "content_start"), utc(2020, 9, 6).timestamp());
}

#[tokio::test]
async fn test_update_item() {
    let (_backend, wh) = warehouse().await;

    let dt = utc_hms(2020, 1, 2, 3, 0, 0);
    let file = WarehouseFile::new(
        "some-content",
        metadata(vec![
            ("url", Value::from("content-url")),
            ("retrieved_date", Value::Datetime(dt.clone())),
            ("release_date", Value::Datetime(dt.clone())),
            ("key1", Value::from("name")),
        ]),
    );
    let response = wh
        .store(
            &file,
            StoreOptions {
                force_store: true,
                ..StoreOptions::default()
            },
        )
        .await
        .unwrap();
    let file_key = response.primary_key;
    let file_version = response.source_version;

    let new_dt = utc_hms(3030, 3, 2, 1, 0, 0);
    let update_map = metadata(vec![
        ("release_date", Value::Datetime(new_dt.clone())),
        ("content_start", Value::Datetime(new_dt.clone())),
        ("content_end", Value::Datetime(new_dt.clone())),
        ("key1", Value::from("new_name")),
    ]);
    wh.update_metadata_item(&file_key, &file_version, &update_map)
        .await
        .unwrap();

    // updating a non-existent item fails
    let truncated = &file_version[..file_version.len() - 1];
    assert!(matches!(
        wh.update_metadata_item(&file_key, truncated, &update_map).await,
        Err(WarehouseError::Operation(_))
    ));

    // verify the update
    let stored = wh
        .retrieve_metadata(
            &file_key,
            RetrieveOptions {
                source_version: Some(&file_version),
                ..RetrieveOptions::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    for (key, value) in &update_map {
        assert_eq!(stored[key], *value, "{key}");
    }

    // updating retrieved_date is not allowed
    let bad = metadata(vec![("retrieved_date", Value::Datetime(new_dt.clone()))]);
    assert!(matches!(
        wh.update_metadata_item(&file_key, &file_version, &bad).await,
        Err(WarehouseError::Metadata(_))
    ));

    // updating a primary key field is not allowed
    let bad = metadata(vec![("url", Value::from("new_url"))]);
    assert!(matches!(
        wh.update_metadata_item(&file_key, &file_version, &bad).await,
        Err(WarehouseError::Metadata(_))
    ));

    // an empty update map is rejected
    assert!(matches!(
        wh.update_metadata_item(&file_key, &file_version, &Metadata::new()).await,
        Err(WarehouseError::Metadata(_))
    ));
}
