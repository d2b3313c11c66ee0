/*!
Typed access to the source file table: conditional inserts keyed by
`(file_key, source_version)`, guarded updates, version queries, and the
range-query planner over the table's two secondary indexes.
*/

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::{Result, WarehouseError};
use crate::model::metadata::{
    CONTENT_END_FIELD, CONTENT_START_FIELD, FEED_ID_FIELD, FILE_KEY_FIELD, RELEASE_FIELD,
    RETRIEVED_FIELD, VERSION_FIELD,
};
use crate::model::value::DatetimeRange;
use crate::store::index::{
    Cell, IndexSpec, IndexStore, PostFilter, QueryRequest, Row, SortCondition, TableKey, TableSpec,
};

/// Name of the content-period secondary index.
pub const CONTENT_START_INDEX: &str = "ContentStartIndex";
/// Name of the release-date secondary index.
pub const RELEASE_DATE_INDEX: &str = "ReleaseDateIndex";

/// The index a metadata query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIndex {
    /// Rows whose content period overlaps the query range; sorted by
    /// `content_start`. Only rows that carry a `content_start` appear.
    Content,
    /// Rows whose `content_start` falls inside the query range.
    Start,
    /// Rows whose `release_date` falls inside the query range. Every source
    /// row has a release date, so an unbounded query returns everything.
    Release,
}

/// The source-table handle.
#[derive(Clone)]
pub struct SourceTable {
    store: Arc<dyn IndexStore>,
    table: String,
}

fn row_key(file_key: &str, version: &str) -> TableKey {
    TableKey::with_range(
        FILE_KEY_FIELD,
        Cell::string(file_key),
        VERSION_FIELD,
        Cell::string(version),
    )
}

impl SourceTable {
    /// Create a handle over the given table.
    pub fn new(store: Arc<dyn IndexStore>, table: impl Into<String>) -> Self {
        SourceTable {
            store,
            table: table.into(),
        }
    }

    /// The key schema of a source table, including both secondary indexes.
    pub fn table_spec(name: &str) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            hash_key: FILE_KEY_FIELD.to_string(),
            range_key: Some(VERSION_FIELD.to_string()),
            indexes: vec![
                IndexSpec {
                    name: CONTENT_START_INDEX.to_string(),
                    hash_key: FEED_ID_FIELD.to_string(),
                    range_key: CONTENT_START_FIELD.to_string(),
                },
                IndexSpec {
                    name: RELEASE_DATE_INDEX.to_string(),
                    hash_key: FEED_ID_FIELD.to_string(),
                    range_key: RELEASE_FIELD.to_string(),
                },
            ],
        }
    }

    /// Insert a row, conditional on `(file_key, source_version)` being
    /// absent. Exactly one of two racing writers wins; the loser sees
    /// [WarehouseError::AlreadyExists].
    pub async fn insert(&self, row: Row) -> Result<()> {
        let file_key = cell_text(&row, FILE_KEY_FIELD)?;
        let version = cell_text(&row, VERSION_FIELD)?;
        let key = row_key(&file_key, &version);
        self.store.put_if_absent(&self.table, &key, row).await
    }

    /// Fetch one version's row.
    pub async fn get(&self, file_key: &str, version: &str) -> Result<Option<Row>> {
        self.store
            .get(&self.table, &row_key(file_key, version))
            .await
    }

    /// Merge changes into an existing row. The key attributes and the
    /// retrieval date are immutable.
    pub async fn update(&self, file_key: &str, version: &str, changes: Row) -> Result<()> {
        for field in [FILE_KEY_FIELD, VERSION_FIELD, RETRIEVED_FIELD] {
            if changes.contains_key(field) {
                return Err(WarehouseError::metadata(format!(
                    "Updating '{field}' is not allowed."
                )));
            }
        }
        if changes.is_empty() {
            return Err(WarehouseError::metadata("The update map is empty."));
        }
        self.store
            .update(&self.table, &row_key(file_key, version), changes)
            .await
    }

    /// Remove one version's row.
    pub async fn delete(&self, file_key: &str, version: &str) -> Result<()> {
        self.store
            .delete(&self.table, &row_key(file_key, version))
            .await
    }

    /// All rows of one logical file, ordered by version id.
    pub async fn query_versions(
        &self,
        file_key: &str,
        latest_first: bool,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        self.store
            .query(QueryRequest {
                table: self.table.clone(),
                index: None,
                hash: (FILE_KEY_FIELD.to_string(), Cell::string(file_key)),
                sort: None,
                filter: None,
                projection: None,
                ascending: !latest_first,
            })
            .await
    }

    /// Run a planned range query for one collection.
    pub async fn query_range(
        &self,
        feed_id: &str,
        query_range: Option<&DatetimeRange>,
        index: Option<QueryIndex>,
        fields: Option<&[String]>,
        ascending: bool,
    ) -> Result<BoxStream<'static, Result<Row>>> {
        let request = self.plan(feed_id, query_range, index, fields, ascending);
        self.store.query(request).await
    }

    /// Build the store request for a metadata query.
    ///
    /// With neither a range nor an index, the release-date index is used
    /// (every row has a release date, so this means "all rows"); otherwise
    /// the index defaults to [QueryIndex::Content]. Content queries match
    /// rows whose period overlaps the range: `content_start` at most the
    /// range end, and `content_end` (upper-exclusive, possibly absent)
    /// past the range start.
    pub fn plan(
        &self,
        feed_id: &str,
        query_range: Option<&DatetimeRange>,
        index: Option<QueryIndex>,
        fields: Option<&[String]>,
        ascending: bool,
    ) -> QueryRequest {
        let index = match (index, query_range) {
            (Some(index), _) => index,
            (None, None) => QueryIndex::Release,
            (None, Some(_)) => QueryIndex::Content,
        };

        let (index_name, sort, filter) = match index {
            QueryIndex::Content => (
                CONTENT_START_INDEX,
                query_range.map(|range| SortCondition::AtMost {
                    field: CONTENT_START_FIELD.to_string(),
                    bound: Cell::number(range.end().timestamp()),
                }),
                query_range.map(|range| PostFilter::AfterOrAbsent {
                    field: CONTENT_END_FIELD.to_string(),
                    bound: Cell::number(range.start().timestamp()),
                }),
            ),
            QueryIndex::Start => (
                CONTENT_START_INDEX,
                query_range.map(|range| SortCondition::Between {
                    field: CONTENT_START_FIELD.to_string(),
                    low: Cell::number(range.start().timestamp()),
                    high: Cell::number(range.end().timestamp()),
                }),
                None,
            ),
            QueryIndex::Release => (
                RELEASE_DATE_INDEX,
                query_range.map(|range| SortCondition::Between {
                    field: RELEASE_FIELD.to_string(),
                    low: Cell::number(range.start().timestamp()),
                    high: Cell::number(range.end().timestamp()),
                }),
                None,
            ),
        };

        QueryRequest {
            table: self.table.clone(),
            index: Some(index_name.to_string()),
            hash: (FEED_ID_FIELD.to_string(), Cell::string(feed_id)),
            sort,
            filter,
            projection: fields.map(<[String]>::to_vec),
            ascending,
        }
    }
}

fn cell_text(row: &Row, field: &str) -> Result<String> {
    row.get(field)
        .map(|cell| cell.as_str().to_string())
        .ok_or_else(|| WarehouseError::metadata(format!("Row is missing '{field}'.")))
}
