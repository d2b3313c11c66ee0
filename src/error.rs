/*!
 * defines the [WarehouseError] and [Result] types.
*/

use thiserror::Error;

/// Warehouse error type
#[derive(Error, Debug)]
pub enum WarehouseError {
    /// Caller-supplied inputs are internally inconsistent, e.g. changing the
    /// primary keys of a collection or naming an unregistered parser.
    #[error("{0}")]
    Argument(String),
    /// A file's metadata fails the collection schema.
    #[error("{0}")]
    Metadata(String),
    /// The requested state precondition is unmet, e.g. no collection selected
    /// or no such row.
    #[error("{0}")]
    Operation(String),
    /// A conditional insert lost the race on `(file_key, source_version)`.
    #[error("item already exists: {0}")]
    AlreadyExists(String),
    /// General error that does not need to be handled and displays a message.
    #[error("{0}")]
    Message(String),
    /// Errors surfaced by the backing object store.
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    /// JSON (de)serialization failures in wire codecs.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Settings file parse failures.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    /// Filesystem errors while reading or writing settings.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WarehouseError {
    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        WarehouseError::Argument(msg.into())
    }

    pub(crate) fn metadata(msg: impl Into<String>) -> Self {
        WarehouseError::Metadata(msg.into())
    }

    pub(crate) fn operation(msg: impl Into<String>) -> Self {
        WarehouseError::Operation(msg.into())
    }
}

/// Warehouse result type
pub type Result<T> = std::result::Result<T, WarehouseError>;
