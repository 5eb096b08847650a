//! Opaque document storage used by arrival attachments.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use medstock_core::{BlobId, DomainError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
    #[error("blob {0} not found")]
    NotFound(BlobId),
}

impl From<BlobError> for DomainError {
    fn from(value: BlobError) -> Self {
        match value {
            BlobError::NotFound(id) => DomainError::not_found(format!("blob {id}")),
            other => DomainError::external(other.to_string()),
        }
    }
}

/// Stored document bytes and their media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Blob storage. The engine never inspects contents.
pub trait BlobStore: Send + Sync {
    fn put(&self, content_type: &str, bytes: &[u8]) -> Result<BlobId, BlobError>;

    fn get(&self, id: BlobId) -> Result<Blob, BlobError>;
}

/// In-memory blob store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<BlobId, Blob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, content_type: &str, bytes: &[u8]) -> Result<BlobId, BlobError> {
        let id = BlobId::new();
        self.blobs
            .write()
            .map_err(|_| BlobError::Unavailable("lock poisoned".into()))?
            .insert(
                id,
                Blob {
                    content_type: content_type.to_string(),
                    bytes: bytes.to_vec(),
                },
            );
        Ok(id)
    }

    fn get(&self, id: BlobId) -> Result<Blob, BlobError> {
        self.blobs
            .read()
            .map_err(|_| BlobError::Unavailable("lock poisoned".into()))?
            .get(&id)
            .cloned()
            .ok_or(BlobError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_core::ErrorKind;

    #[test]
    fn put_then_get() {
        let store = InMemoryBlobStore::new();
        let id = store.put("application/pdf", b"%PDF-1.7").unwrap();
        assert_eq!(store.get(id).unwrap().bytes, b"%PDF-1.7");
    }

    #[test]
    fn unavailable_maps_to_external() {
        let err: DomainError = BlobError::Unavailable("down".into()).into();
        assert_eq!(err.kind(), ErrorKind::External);
    }
}
