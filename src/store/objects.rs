/*!
 * Thin adapter over [ObjectStore] for file bodies, one per bucket.
*/

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};

use crate::error::Result;

/// A handle to one bucket of the backing object store.
#[derive(Clone)]
pub struct ObjectClient {
    store: Arc<dyn ObjectStore>,
}

impl ObjectClient {
    /// Wrap an object store handle.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        ObjectClient { store }
    }

    /// Upload a file body under the given key, replacing any previous body.
    pub async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let path = Path::from(key);
        self.store.put(&path, PutPayload::from(body)).await?;
        Ok(())
    }

    /// Fetch a file body. A missing object is `None`, not an error.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let path = Path::from(key);
        match self.store.get(&path).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove a file body. Removing an absent object is not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = Path::from(key);
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
