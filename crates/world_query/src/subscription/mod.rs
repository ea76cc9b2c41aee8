//! Live Subscriptions
//!
//! Every `subscribe` call gets its own backend registration and its own task
//! draining that registration's change events. Decoded results reach the
//! caller through a callback.
//!
//! # Lifecycle
//!
//! - `Pending`: registration sent, no callbacks yet
//! - `Active`: each change event is decoded and delivered
//! - `Error`: registration failed; the callback receives the error once
//! - `Closed`: terminal; no further callbacks

mod handle;
mod manager;

pub use handle::*;
pub use manager::*;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{QueryResult, SdkResult};

// ─────────────────────────────────────────────────────────────────────────────
// Subscription State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Registration in flight
    Pending,
    /// Delivering change events
    Active,
    /// Registration failed
    Error,
    /// No longer delivering
    Closed,
}

impl SubscriptionState {
    /// Check if no more callbacks can happen
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionState::Error | SubscriptionState::Closed)
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionState::Pending => write!(f, "pending"),
            SubscriptionState::Active => write!(f, "active"),
            SubscriptionState::Error => write!(f, "error"),
            SubscriptionState::Closed => write!(f, "closed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription Id
// ─────────────────────────────────────────────────────────────────────────────

/// Client-side identifier of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Receives every delivery of a subscription
///
/// Invoked from the subscription's task. It must not block for long: a
/// concurrent `unsubscribe()` waits for an in-flight delivery to finish.
pub type Callback = Arc<dyn Fn(SdkResult<QueryResult>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SubscriptionState::Pending.is_terminal());
        assert!(!SubscriptionState::Active.is_terminal());
        assert!(SubscriptionState::Error.is_terminal());
        assert!(SubscriptionState::Closed.is_terminal());
        assert_eq!(SubscriptionState::Active.to_string(), "active");
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(SubscriptionId::new(), SubscriptionId::new());
    }
}
