//! Subscription Manager
//!
//! Spawns one task per subscription, tracks live subscriptions by id and
//! releases backend registrations when they close.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::{Callback, SubscriptionHandle, SubscriptionId, SubscriptionState};
use crate::{Backend, BackendSubscriptionId, QueryDescriptor, ResultDecoder, SdkError};

/// Default bound on the background backend unsubscribe
pub const DEFAULT_UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Subscription Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Owner of all live subscriptions against one backend
pub struct SubscriptionManager {
    backend: Arc<dyn Backend>,
    decoder: ResultDecoder,
    /// Live subscriptions indexed by id; tasks remove themselves on exit
    subscriptions: Arc<DashMap<SubscriptionId, SubscriptionHandle>>,
    unsubscribe_timeout: Duration,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn Backend>, decoder: ResultDecoder) -> Self {
        Self {
            backend,
            decoder,
            subscriptions: Arc::new(DashMap::new()),
            unsubscribe_timeout: DEFAULT_UNSUBSCRIBE_TIMEOUT,
        }
    }

    /// Set the bound on background backend unsubscribes
    pub fn with_unsubscribe_timeout(mut self, timeout: Duration) -> Self {
        self.unsubscribe_timeout = timeout;
        self
    }

    /// Register a compiled descriptor and start delivering to `callback`
    ///
    /// Returns immediately with a `Pending` handle; registration happens on
    /// the subscription's task. Must be called from within a tokio runtime.
    pub fn subscribe(&self, descriptor: QueryDescriptor, callback: Callback) -> SubscriptionHandle {
        let id = SubscriptionId::new();
        let handle = SubscriptionHandle::new(id, descriptor, callback);
        self.subscriptions.insert(id, handle.clone());

        let task = SubscriptionTask {
            handle: handle.clone(),
            backend: Arc::clone(&self.backend),
            decoder: self.decoder.clone(),
            registry: Arc::clone(&self.subscriptions),
            unsubscribe_timeout: self.unsubscribe_timeout,
        };
        tokio::spawn(task.run());

        tracing::debug!(subscription_id = %id, "Subscription requested");
        handle
    }

    /// Get a subscription handle by id
    pub fn get(&self, id: SubscriptionId) -> Option<SubscriptionHandle> {
        self.subscriptions.get(&id).map(|entry| entry.value().clone())
    }

    /// Close a subscription by id
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.get(id).is_some_and(|handle| handle.unsubscribe())
    }

    /// Close every subscription and wait for their tasks to drain
    ///
    /// Returns the number of subscriptions that were closed by this call.
    pub async fn shutdown_all(&self) -> usize {
        tracing::info!(count = self.subscriptions.len(), "Closing all subscriptions");

        let handles: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let closed = handles.iter().filter(|h| h.unsubscribe()).count();

        let drained = tokio::time::timeout(self.unsubscribe_timeout, async {
            while !self.subscriptions.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                remaining = self.subscriptions.len(),
                "Some subscriptions did not release within timeout"
            );
        }
        closed
    }

    /// List all tracked subscriptions
    pub fn list(&self) -> Vec<(SubscriptionId, SubscriptionState)> {
        self.subscriptions
            .iter()
            .map(|entry| (*entry.key(), entry.value().state()))
            .collect()
    }

    /// Get the number of tracked subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check if there are no tracked subscriptions
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &self.subscriptions.len())
            .field("unsubscribe_timeout", &self.unsubscribe_timeout)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription Task
// ─────────────────────────────────────────────────────────────────────────────

struct SubscriptionTask {
    handle: SubscriptionHandle,
    backend: Arc<dyn Backend>,
    decoder: ResultDecoder,
    registry: Arc<DashMap<SubscriptionId, SubscriptionHandle>>,
    unsubscribe_timeout: Duration,
}

impl SubscriptionTask {
    async fn run(self) {
        let id = self.handle.id();
        let shared = Arc::clone(&self.handle.shared);
        let mut state_rx = shared.watch();

        let mut registration = match self.backend.subscribe(self.handle.descriptor().clone()).await {
            Ok(registration) => registration,
            Err(e) => {
                tracing::error!(subscription_id = %id, error = %e, "Subscription registration failed");
                self.registry.remove(&id);
                shared.fail(SdkError::Backend(e));
                return;
            }
        };
        let backend_id = registration.id;

        if !shared.activate() {
            tracing::debug!(subscription_id = %id, "Cancelled before registration completed");
            self.release(backend_id).await;
            return;
        }
        tracing::info!(subscription_id = %id, backend_id = %backend_id, "Subscription active");

        loop {
            tokio::select! {
                biased;

                changed = state_rx.changed() => {
                    if changed.is_err() || state_rx.borrow_and_update().is_terminal() {
                        break;
                    }
                }

                event = registration.events.recv() => {
                    let Some(event) = event else {
                        if shared.close() {
                            tracing::info!(subscription_id = %id, "Backend closed the event stream");
                        }
                        break;
                    };

                    if event.descriptor != *self.handle.descriptor() {
                        tracing::debug!(subscription_id = %id, "Ignoring event for another descriptor");
                        continue;
                    }

                    let result = self
                        .decoder
                        .decode(self.handle.descriptor(), &event.payload)
                        .map_err(|e| {
                            tracing::warn!(subscription_id = %id, error = %e, "Failed to decode change event");
                            SdkError::Decode(e)
                        });

                    tracing::debug!(subscription_id = %id, ok = result.is_ok(), "Delivering change event");
                    if !shared.deliver(result) {
                        break;
                    }
                }
            }
        }

        self.release(backend_id).await;
    }

    /// Best-effort backend unsubscribe, then drop out of the registry
    async fn release(&self, backend_id: BackendSubscriptionId) {
        let id = self.handle.id();
        match tokio::time::timeout(self.unsubscribe_timeout, self.backend.unsubscribe(backend_id)).await {
            Ok(Ok(())) => {
                tracing::debug!(subscription_id = %id, backend_id = %backend_id, "Backend registration released");
            }
            Ok(Err(e)) => {
                tracing::warn!(subscription_id = %id, error = %e, "Backend unsubscribe failed");
            }
            Err(_) => {
                tracing::warn!(subscription_id = %id, "Backend unsubscribe timed out");
            }
        }
        self.registry.remove(&id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
