//! Subscription Handle
//!
//! A handle to observe and cancel a live subscription.

use std::cell::Cell;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{Callback, SubscriptionId, SubscriptionState};
use crate::{QueryDescriptor, QueryResult, SdkError, SdkResult};

// ─────────────────────────────────────────────────────────────────────────────
// Shared State
// ─────────────────────────────────────────────────────────────────────────────

thread_local! {
    /// Depth of callback invocations running on this thread
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as running a callback
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERING.with(|depth| depth.set(depth.get() + 1));
        DeliveryScope
    }

    fn active() -> bool {
        DELIVERING.with(|depth| depth.get() > 0)
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|depth| depth.set(depth.get() - 1));
    }
}

/// State shared between a handle and the subscription task
///
/// Phase transitions are compare-and-swap updates of the watch value and
/// never wait on a callback. A callback runs while `delivery` is held and
/// only after re-checking the phase under it. `close()` called outside of
/// any callback waits for an in-flight invocation to finish, so no callback
/// starts or runs after it returns. Called from inside a callback it never
/// waits, which keeps cross-unsubscribing callbacks from blocking each other.
pub(crate) struct Shared {
    state: watch::Sender<SubscriptionState>,
    delivery: Mutex<()>,
    callback: Callback,
}

impl Shared {
    pub(crate) fn new(callback: Callback) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Pending);
        Self {
            state,
            delivery: Mutex::new(()),
            callback,
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Move to `to` if the current phase satisfies `from`
    fn transition(&self, from: impl Fn(SubscriptionState) -> bool, to: SubscriptionState) -> bool {
        self.state.send_if_modified(|state| {
            if from(*state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// `Pending → Active`; false if the subscription was cancelled meanwhile
    pub(crate) fn activate(&self) -> bool {
        self.transition(|s| s == SubscriptionState::Pending, SubscriptionState::Active)
    }

    /// `Pending → Error → Closed`, delivering the error exactly once
    pub(crate) fn fail(&self, error: SdkError) {
        let _delivery = self.delivery.lock();
        if !self.transition(|s| s == SubscriptionState::Pending, SubscriptionState::Error) {
            return;
        }
        {
            let _scope = DeliveryScope::enter();
            (self.callback)(Err(error));
        }
        self.transition(|s| s != SubscriptionState::Closed, SubscriptionState::Closed);
    }

    /// Deliver a result; false once the subscription is no longer active
    pub(crate) fn deliver(&self, result: SdkResult<QueryResult>) -> bool {
        let _delivery = self.delivery.lock();
        if self.state() != SubscriptionState::Active {
            return false;
        }
        let _scope = DeliveryScope::enter();
        (self.callback)(result);
        true
    }

    /// Move to `Closed`; false if it already was
    pub(crate) fn close(&self) -> bool {
        if !self.transition(|s| s != SubscriptionState::Closed, SubscriptionState::Closed) {
            return false;
        }
        if !DeliveryScope::active() {
            drop(self.delivery.lock());
        }
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a live subscription
///
/// Cloneable; all clones observe and control the same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    descriptor: Arc<QueryDescriptor>,
    pub(crate) shared: Arc<Shared>,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: SubscriptionId, descriptor: QueryDescriptor, callback: Callback) -> Self {
        Self {
            id,
            descriptor: Arc::new(descriptor),
            shared: Arc::new(Shared::new(callback)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The compiled descriptor this subscription is registered with
    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.descriptor
    }

    /// Get the current state
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// Check if change events are being delivered
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Check if the subscription has stopped delivering
    pub fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Wait until registration has settled, returning the resulting state
    pub async fn ready(&self) -> SubscriptionState {
        self.wait_for(|s| *s != SubscriptionState::Pending).await
    }

    /// Wait until the subscription is closed
    pub async fn closed(&self) {
        self.wait_for(|s| *s == SubscriptionState::Closed).await;
    }

    async fn wait_for(&self, done: impl FnMut(&SubscriptionState) -> bool) -> SubscriptionState {
        let mut rx = self.shared.watch();
        // The sender lives in `shared`, which this handle keeps alive
        match rx.wait_for(done).await {
            Ok(state) => *state,
            Err(_) => SubscriptionState::Closed,
        }
    }

    /// Stop delivering
    ///
    /// Once this returns, the callback is not invoked again. From outside a
    /// callback this waits for an invocation already in progress; from inside
    /// one it returns immediately. The backend registration is released in
    /// the background. Returns false if the subscription was already closed.
    pub fn unsubscribe(&self) -> bool {
        let closed = self.shared.close();
        if closed {
            tracing::info!(subscription_id = %self.id, "Subscription closed by caller");
        }
        closed
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
