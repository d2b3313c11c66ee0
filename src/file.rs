/*!
 * The [WarehouseFile] handed to and returned by the engine: a text or
 * binary body plus its metadata record.
*/

use bytes::Bytes;

use crate::error::{Result, WarehouseError};
use crate::model::metadata::Metadata;

/// A file body. The engine records whether a body is text or binary in the
/// metadata row and restores the same variant on retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// A unicode body.
    Text(String),
    /// A binary body.
    Bytes(Vec<u8>),
}

impl FileContent {
    /// The raw bytes of the body.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Bytes(b) => b,
        }
    }

    /// Whether the body is binary.
    pub fn is_bytes(&self) -> bool {
        matches!(self, FileContent::Bytes(_))
    }

    /// Body length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// Rebuild a body fetched from the object store, honouring the stored
    /// text/binary flag.
    pub fn from_stored(data: Bytes, binary: bool) -> Result<Self> {
        if binary {
            Ok(FileContent::Bytes(data.to_vec()))
        } else {
            String::from_utf8(data.to_vec())
                .map(FileContent::Text)
                .map_err(|_| {
                    WarehouseError::operation(
                        "Stored object is flagged as text but is not valid UTF-8.",
                    )
                })
        }
    }
}

impl From<String> for FileContent {
    fn from(value: String) -> Self {
        FileContent::Text(value)
    }
}

impl From<&str> for FileContent {
    fn from(value: &str) -> Self {
        FileContent::Text(value.to_string())
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(value: Vec<u8>) -> Self {
        FileContent::Bytes(value)
    }
}

impl From<&[u8]> for FileContent {
    fn from(value: &[u8]) -> Self {
        FileContent::Bytes(value.to_vec())
    }
}

/// A file plus its metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct WarehouseFile {
    /// The file body.
    pub content: FileContent,
    /// The file's metadata.
    pub metadata: Metadata,
}

impl WarehouseFile {
    /// Create a file from any body type and a metadata record.
    pub fn new(content: impl Into<FileContent>, metadata: Metadata) -> Self {
        WarehouseFile {
            content: content.into(),
            metadata,
        }
    }

    /// Hex MD5 digest of the body.
    pub fn md5(&self) -> String {
        format!("{:x}", md5::compute(self.content.as_bytes()))
    }

    /// Whether the body is binary.
    pub fn is_bytes(&self) -> bool {
        self.content.is_bytes()
    }
}
