/*!
Defines the [IndexStore] trait for the backing key-value store: schemaless
rows of typed cells, keyed by a hash key and an optional sort key, with
secondary-index range queries.
*/

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// A single stored cell. The store distinguishes string cells from numeric
/// cells; numeric cells carry their decimal form and compare numerically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// A string cell.
    S(String),
    /// A numeric cell, held as its decimal string.
    N(String),
}

impl Cell {
    /// A string cell.
    pub fn string(value: impl Into<String>) -> Self {
        Cell::S(value.into())
    }

    /// A numeric cell.
    pub fn number(value: impl ToString) -> Self {
        Cell::N(value.to_string())
    }

    /// The raw payload, regardless of cell type.
    pub fn as_str(&self) -> &str {
        match self {
            Cell::S(s) | Cell::N(s) => s,
        }
    }

    /// Whether this is a numeric cell.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::N(_))
    }

    /// The numeric payload, when this is a numeric cell.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Cell::N(s) => s.parse().ok(),
            Cell::S(_) => None,
        }
    }

    /// Ordering used by sort keys and range conditions: numeric cells
    /// compare numerically, string cells lexicographically.
    pub fn compare(&self, other: &Cell) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => self.as_str().cmp(other.as_str()),
        }
    }
}

/// A stored row: attribute name to cell.
pub type Row = BTreeMap<String, Cell>;

/// The primary key of a row: the hash cell plus the sort cell for tables
/// that declare one.
#[derive(Debug, Clone, PartialEq)]
pub struct TableKey {
    /// Hash-key attribute name and value.
    pub hash: (String, Cell),
    /// Sort-key attribute name and value, for composite-key tables.
    pub range: Option<(String, Cell)>,
}

impl TableKey {
    /// A hash-only key.
    pub fn hash_only(name: impl Into<String>, value: Cell) -> Self {
        TableKey {
            hash: (name.into(), value),
            range: None,
        }
    }

    /// A composite hash + sort key.
    pub fn with_range(
        hash_name: impl Into<String>,
        hash_value: Cell,
        range_name: impl Into<String>,
        range_value: Cell,
    ) -> Self {
        TableKey {
            hash: (hash_name.into(), hash_value),
            range: Some((range_name.into(), range_value)),
        }
    }
}

/// A key condition on the sort attribute of the queried index.
#[derive(Debug, Clone)]
pub enum SortCondition {
    /// `low <= field <= high`, both bounds inclusive.
    Between {
        /// Sort attribute name.
        field: String,
        /// Inclusive lower bound.
        low: Cell,
        /// Inclusive upper bound.
        high: Cell,
    },
    /// `field <= bound`.
    AtMost {
        /// Sort attribute name.
        field: String,
        /// Inclusive upper bound.
        bound: Cell,
    },
}

/// A post-filter applied to rows after the key condition.
#[derive(Debug, Clone)]
pub enum PostFilter {
    /// Keep rows where `field > bound` or `field` is absent.
    AfterOrAbsent {
        /// Filtered attribute name.
        field: String,
        /// Exclusive lower bound.
        bound: Cell,
    },
}

impl PostFilter {
    /// Whether a row passes the filter.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            PostFilter::AfterOrAbsent { field, bound } => row
                .get(field)
                .map_or(true, |cell| cell.compare(bound) == Ordering::Greater),
        }
    }
}

/// A range query against a table or one of its secondary indexes.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Target table name.
    pub table: String,
    /// Secondary index name; `None` queries the primary index.
    pub index: Option<String>,
    /// Equality condition on the index's hash attribute.
    pub hash: (String, Cell),
    /// Optional condition on the index's sort attribute.
    pub sort: Option<SortCondition>,
    /// Optional post-filter.
    pub filter: Option<PostFilter>,
    /// When set, only these attributes are returned.
    pub projection: Option<Vec<String>>,
    /// Sort-key ordering of the results.
    pub ascending: bool,
}

/// A secondary index declaration.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Hash attribute of the index.
    pub hash_key: String,
    /// Sort attribute of the index. Rows lacking it do not appear in the
    /// index.
    pub range_key: String,
}

/// A table declaration: key schema plus secondary indexes.
#[derive(Debug, Clone)]
pub struct TableSpec {
    /// Table name.
    pub name: String,
    /// Hash-key attribute.
    pub hash_key: String,
    /// Sort-key attribute, for composite-key tables.
    pub range_key: Option<String>,
    /// Declared secondary indexes.
    pub indexes: Vec<IndexSpec>,
}

/// The backing key-value store. Queries and scans are paginated by the
/// implementation and surfaced as lazy streams; dropping a stream early
/// releases its pagination state.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Unconditionally write a full row, replacing any previous row with
    /// the same key.
    async fn put(&self, table: &str, row: Row) -> Result<()>;

    /// Insert a row only when no row with the same key exists. Fails with
    /// [crate::error::WarehouseError::AlreadyExists] otherwise.
    async fn put_if_absent(&self, table: &str, key: &TableKey, row: Row) -> Result<()>;

    /// Fetch a single row by key.
    async fn get(&self, table: &str, key: &TableKey) -> Result<Option<Row>>;

    /// Merge attribute changes into an existing row; fails with an
    /// operation error when the row does not exist.
    async fn update(&self, table: &str, key: &TableKey, changes: Row) -> Result<()>;

    /// Remove a row. Removing an absent row is not an error.
    async fn delete(&self, table: &str, key: &TableKey) -> Result<()>;

    /// Run a range query.
    async fn query(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Row>>>;

    /// Stream every row of a table.
    async fn scan(&self, table: &str) -> Result<BoxStream<'static, Result<Row>>>;
}
