//! # contract: data model and the two seams of the relay
//!
//! This module defines the plain data carried through a transfer and the two
//! traits the engine is generic over:
//!
//! - [`ByteSource`]: resolves an opaque [`SourceRef`] and yields its bytes as a
//!   produce-once [`SourceBody`] (a [`ByteStream`] plus its length when known).
//! - [`ArtifactRepository`]: the release store (bucket lookup/creation, asset
//!   upload, listing and deletion).
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`; with the `test-export-mocks`
//!   feature (default) `MockByteSource` and `MockArtifactRepository` are
//!   exported for integration tests of dependent crates.
//!
//! ## Stream contract
//! A [`ByteStream`] is finite and cannot be restarted. Once a publish attempt
//! has pulled from it, the stream is spent; a retry must call
//! [`ByteSource::open`] again.

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use mockall::automock;
use serde::Serialize;

use crate::error::{ErrorKind, RelayError};

/// Lazy, produce-once sequence of byte blocks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, RelayError>> + Send>>;

/// An opened source: the body stream and, when the source announced it, its
/// total length in bytes. Sinks may send the length up front instead of
/// streaming with chunked transfer encoding.
pub struct SourceBody {
    pub stream: ByteStream,
    pub content_length: Option<u64>,
}

impl SourceBody {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            content_length: None,
        }
    }

    pub fn with_content_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }
}

impl From<ByteStream> for SourceBody {
    fn from(stream: ByteStream) -> Self {
        SourceBody::new(stream)
    }
}

impl std::fmt::Debug for SourceBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl Stream for SourceBody {
    type Item = Result<Bytes, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}

/// Opaque identifier the source uses to locate content (e.g. a Telegram `file_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef(pub String);

impl SourceRef {
    pub fn new(value: impl Into<String>) -> Self {
        SourceRef(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One inbound item to relay. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source_ref: SourceRef,
    /// Asset name inside the bucket.
    pub target_name: String,
    /// Logical key of the release the asset belongs to.
    pub bucket_tag: String,
}

/// A resolved release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub tag: String,
    pub id: u64,
    /// Upload URL, possibly still carrying a `{?name,label}` template suffix.
    pub publish_endpoint: String,
    pub browse_url: String,
}

/// Sink-side confirmation of a stored asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObjectDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub download_url: String,
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub id: u64,
    pub name: String,
    pub size_bytes: u64,
}

/// Terminal result of a [`TransferRequest`]; reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransferOutcome {
    Success(StoredObjectDescriptor),
    Failure { kind: ErrorKind, message: String },
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success(_))
    }
}

impl From<RelayError> for TransferOutcome {
    fn from(e: RelayError) -> Self {
        TransferOutcome::Failure {
            kind: e.kind(),
            message: e.message().to_string(),
        }
    }
}

/// Something that can turn a [`SourceRef`] into a stream of its bytes.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Perform the handshake and return the not-yet-consumed body.
    ///
    /// Fails with [`RelayError::SourceUnavailable`] when the reference cannot be
    /// resolved. Errors while reading travel inside the stream as
    /// [`RelayError::SourceInterrupted`].
    async fn open(&self, source_ref: &SourceRef) -> Result<SourceBody, RelayError>;
}

/// The release store.
///
/// Implemented by the GitHub client, by test fakes and by mocks.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Look a bucket up by tag. `Ok(None)` means "does not exist".
    async fn find_bucket(&self, tag: &str) -> Result<Option<Bucket>, RelayError>;

    /// Create a published (non-draft, non-prerelease) bucket labelled with its tag.
    ///
    /// Returns [`RelayError::NameConflict`] if the tag already exists.
    async fn create_bucket(&self, tag: &str) -> Result<Bucket, RelayError>;

    /// Send `body` as a single streaming request stored under `name`.
    ///
    /// Returns [`RelayError::NameConflict`] if `name` is already taken in the bucket.
    async fn upload_asset(
        &self,
        bucket: &Bucket,
        name: &str,
        body: SourceBody,
    ) -> Result<StoredObjectDescriptor, RelayError>;

    async fn list_assets(&self, bucket: &Bucket) -> Result<Vec<AssetEntry>, RelayError>;

    async fn delete_asset(&self, bucket: &Bucket, asset_id: u64) -> Result<(), RelayError>;
}
