#![doc = "release-relay-core: streaming transfer engine for release-relay."]

//! This crate relays a binary object from a [`contract::ByteSource`] into a
//! tagged bucket of a [`contract::ArtifactRepository`] without holding the
//! object in memory, and without creating duplicate buckets or assets when
//! retried. It knows nothing about concrete messengers or release hosts.
//!
//! # Usage
//! Build a [`transfer::TransferCoordinator`] from a source and a repository
//! client, then call [`transfer::TransferCoordinator::transfer`] once per
//! [`contract::TransferRequest`].

pub mod conflict;
pub mod contract;
pub mod error;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod stream;
pub mod transfer;

pub use contract::{
    ArtifactRepository, AssetEntry, Bucket, ByteSource, ByteStream, SourceBody, SourceRef,
    StoredObjectDescriptor, TransferOutcome, TransferRequest,
};
pub use error::{ErrorKind, RelayError};
pub use retry::RetryPolicy;
pub use transfer::{TransferCoordinator, TransferReport, TransferState};
