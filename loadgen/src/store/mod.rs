//! The object storage the generator writes to.
//!
//! [`Store`] abstracts over the four calls an upload needs: a single-shot put, and the open /
//! upload part / complete sequence of a multipart upload. [`S3Store`] talks to an S3-compatible
//! service, while [`InMemoryStore`] keeps everything in memory for dry runs and tests.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::Payload;
use crate::task::Attributes;

mod in_memory;
mod s3;

pub use in_memory::{InMemoryStore, StoredObject};
pub use s3::{S3Store, S3StoreConfig};

/// A shared, type-erased [`Store`] instance.
pub type SharedStore = Arc<dyn Store>;

/// Identifies an open multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartSession {
    /// Container the object is written to.
    pub container: String,
    /// Key of the object being assembled.
    pub key: String,
    /// Upload identifier assigned by the store.
    pub upload_id: String,
}

/// A part the store has accepted, referenced again when completing the upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub number: u32,
    /// Integrity tag returned by the store, usually an ETag.
    pub tag: String,
}

/// Storage capability used by the upload workers.
#[async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// The store name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Writes a whole object in a single request.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<()>;

    /// Starts a multipart upload and returns its session.
    async fn open_multipart(&self, container: &str, key: &str) -> StoreResult<MultipartSession>;

    /// Uploads one part of a multipart upload and returns its integrity tag.
    async fn upload_part(
        &self,
        session: &MultipartSession,
        part_number: u32,
        body: Payload,
        attributes: &Attributes,
    ) -> StoreResult<String>;

    /// Assembles the object from the given parts, ordered by part number.
    async fn complete_multipart(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> StoreResult<()>;
}

/// Errors returned by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO errors while materializing a request body.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The request to the storage service failed, either on the network or in the service.
    #[error("request failed: {context}")]
    Request {
        /// The operation that failed.
        context: String,
        /// The underlying client error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The service answered, but without a field the protocol requires.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    /// The referenced multipart upload does not exist.
    #[error("unknown multipart upload `{0}`")]
    UnknownSession(String),

    /// The parts passed to completion do not match the uploaded parts.
    #[error("invalid part list: {0}")]
    InvalidParts(String),

    /// A failure injected by a test double.
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
