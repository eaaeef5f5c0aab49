//! Trait seams for the reconciler's two external collaborators.
//!
//! The reconciler is written against these traits rather than the concrete
//! clients so that the candidate-set algorithm and the per-item state machine
//! can be exercised with in-memory fakes. Production wiring uses
//! [`crate::bucket::BucketClient`] and [`crate::neighbor::NeighborClient`].

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::SourceObject;

/// Enumerates and reads the objects awaiting ingestion.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// List currently available objects, sorted ascending by creation time.
    /// An empty vector is the explicit "nothing to do" signal.
    async fn list(&self) -> Result<Vec<SourceObject>>;

    /// Read the full content of one object as UTF-8 text.
    async fn fetch(&self, name: &str) -> Result<String>;
}

/// The ingestion target: reports what it already holds and accepts one
/// sequence per submission.
#[async_trait]
pub trait SequenceServer: Send + Sync {
    /// The complete set of identities the server currently holds.
    async fn identities(&self) -> Result<HashSet<String>>;

    /// Submit one identity/sequence pair. Returns the raw HTTP status code
    /// whenever the server answered, including rejections and 5xx; `Err` is
    /// reserved for transport failures where no response was received.
    async fn submit(&self, identity: &str, sequence: &str) -> Result<u16>;
}
