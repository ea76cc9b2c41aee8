//! Indexer collaborator
//!
//! The backend is opaque: it accepts compiled descriptors, streams change
//! notifications for live registrations and answers one-shot fetches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{BackendError, QueryDescriptor, RawPayload};

/// Backend-assigned identifier of a live registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendSubscriptionId(pub u64);

impl std::fmt::Display for BackendSubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Data changed for a registered descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Descriptor the change was matched against
    pub descriptor: QueryDescriptor,
    /// Current rows for that descriptor
    pub payload: RawPayload,
}

/// A live registration and the stream of its change events
///
/// The stream ends when the backend tears the registration down.
#[derive(Debug)]
pub struct BackendSubscription {
    pub id: BackendSubscriptionId,
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Remote indexing service
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Register a live query
    async fn subscribe(&self, descriptor: QueryDescriptor) -> Result<BackendSubscription, BackendError>;

    /// Cancel a registration (best-effort)
    async fn unsubscribe(&self, id: BackendSubscriptionId) -> Result<(), BackendError>;

    /// Run a query once
    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<RawPayload, BackendError>;
}
