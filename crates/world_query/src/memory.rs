//! In-process collaborators
//!
//! `MemoryBackend` keeps rows per model, evaluates descriptors (predicate
//! trees included) and pushes a change event to every affected registration
//! on each write. `RecordingAccount` records submitted calls. Both back the
//! test suite and the demo binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue};
use tokio::sync::mpsc;
use world_types::{model_key, Schema};

use crate::{
    Account, Backend, BackendError, BackendSubscription, BackendSubscriptionId, Call, ChangeEvent,
    Clause, QueryDescriptor, RawPayload, RawRow, ResultDecoder, TransactionResult,
};

/// Capacity of each registration's event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

type Table = BTreeMap<String, Map<String, JsonValue>>;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Backend
// ─────────────────────────────────────────────────────────────────────────────

struct Registration {
    descriptor: QueryDescriptor,
    events: mpsc::Sender<ChangeEvent>,
}

struct Inner {
    decoder: ResultDecoder,
    /// model key → entity id → raw fields
    tables: RwLock<BTreeMap<String, Table>>,
    registrations: DashMap<BackendSubscriptionId, Registration>,
    next_id: AtomicU64,
    subscribe_failure: Mutex<Option<BackendError>>,
}

/// Indexer kept entirely in memory
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend for a schema
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            inner: Arc::new(Inner {
                decoder: ResultDecoder::new(schema),
                tables: RwLock::new(BTreeMap::new()),
                registrations: DashMap::new(),
                next_id: AtomicU64::new(1),
                subscribe_failure: Mutex::new(None),
            }),
        }
    }

    /// Insert or replace the fields of one entity and notify registrations
    pub async fn set(
        &self,
        namespace: &str,
        model: &str,
        entity_id: &str,
        fields: Map<String, JsonValue>,
    ) {
        let key = model_key(namespace, model);
        self.inner
            .tables
            .write()
            .entry(key.clone())
            .or_default()
            .insert(entity_id.to_string(), fields);
        tracing::debug!(model = %key, entity_id, "Entity updated");
        self.notify(&key, entity_id).await;
    }

    /// Remove one entity from a model and notify registrations
    pub async fn delete(&self, namespace: &str, model: &str, entity_id: &str) -> bool {
        let key = model_key(namespace, model);
        let removed = self
            .inner
            .tables
            .write()
            .get_mut(&key)
            .and_then(|table| table.remove(entity_id))
            .is_some();
        if removed {
            self.notify(&key, entity_id).await;
        }
        removed
    }

    /// Make subsequent registrations fail (`None` restores normal behavior)
    pub fn fail_subscriptions(&self, error: Option<BackendError>) {
        *self.inner.subscribe_failure.lock() = error;
    }

    /// Drop every registration, ending their event streams
    pub fn disconnect(&self) {
        self.inner.registrations.clear();
    }

    /// Number of live registrations
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registrations.len()
    }

    async fn notify(&self, key: &str, entity_id: &str) {
        // Snapshot outside of any lock held across an await
        let pending: Vec<_> = self
            .inner
            .registrations
            .iter()
            .filter(|entry| affects(&entry.descriptor, key, entity_id))
            .map(|entry| {
                let event = ChangeEvent {
                    descriptor: entry.descriptor.clone(),
                    payload: self.evaluate(&entry.descriptor),
                };
                (*entry.key(), entry.events.clone(), event)
            })
            .collect();

        for (id, events, event) in pending {
            if events.send(event).await.is_err() {
                tracing::debug!(backend_id = %id, "Dropping registration with closed receiver");
                self.inner.registrations.remove(&id);
            }
        }
    }

    fn evaluate(&self, descriptor: &QueryDescriptor) -> RawPayload {
        let tables = self.inner.tables.read();
        let mut payload = RawPayload::new();

        match descriptor {
            QueryDescriptor::Structured { models } => {
                for selected in models {
                    let key = selected.key();
                    let Some(table) = tables.get(&key) else {
                        continue;
                    };
                    let rows = table
                        .values()
                        .filter(|fields| self.matches(&key, selected.clause.as_ref(), fields))
                        .map(|fields| RawRow::new(fields.clone()))
                        .collect();
                    payload.insert(key, rows);
                }
            }
            QueryDescriptor::Keys { entity_ids } => {
                for id in entity_ids {
                    for (key, table) in tables.iter() {
                        if let Some(fields) = table.get(id) {
                            payload.push(id.clone(), RawRow::for_model(key.clone(), fields.clone()));
                        }
                    }
                }
            }
        }
        payload
    }

    fn matches(&self, key: &str, clause: Option<&Clause>, fields: &Map<String, JsonValue>) -> bool {
        let Some(clause) = clause else {
            return true;
        };
        // Rows that do not decode cannot satisfy a predicate
        match self.inner.decoder.decode_model_row(key, fields) {
            Some(Ok(record)) => clause.matches(record.fields()),
            _ => false,
        }
    }
}

fn affects(descriptor: &QueryDescriptor, key: &str, entity_id: &str) -> bool {
    match descriptor {
        QueryDescriptor::Structured { models } => models.iter().any(|m| m.key() == key),
        QueryDescriptor::Keys { entity_ids } => entity_ids.iter().any(|id| id == entity_id),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn subscribe(&self, descriptor: QueryDescriptor) -> Result<BackendSubscription, BackendError> {
        if let Some(error) = self.inner.subscribe_failure.lock().clone() {
            return Err(error);
        }

        let id = BackendSubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.inner.registrations.insert(
            id,
            Registration {
                descriptor,
                events: tx,
            },
        );
        tracing::debug!(backend_id = %id, "Registered live query");
        Ok(BackendSubscription { id, events: rx })
    }

    async fn unsubscribe(&self, id: BackendSubscriptionId) -> Result<(), BackendError> {
        self.inner
            .registrations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| BackendError::Rejected(format!("unknown subscription {id}")))
    }

    async fn fetch(&self, descriptor: &QueryDescriptor) -> Result<RawPayload, BackendError> {
        Ok(self.evaluate(descriptor))
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("models", &self.inner.tables.read().len())
            .field("registrations", &self.inner.registrations.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recording Account
// ─────────────────────────────────────────────────────────────────────────────

/// Account that records every call and answers with a sequential hash
#[derive(Debug, Default)]
pub struct RecordingAccount {
    calls: Mutex<Vec<Call>>,
    nonce: AtomicU64,
    failure: Mutex<Option<BackendError>>,
}

impl RecordingAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls submitted so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Make subsequent calls fail (`None` restores normal behavior)
    pub fn fail_with(&self, error: Option<BackendError>) {
        *self.failure.lock() = error;
    }
}

#[async_trait]
impl Account for RecordingAccount {
    async fn submit_call(&self, call: Call) -> Result<TransactionResult, BackendError> {
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;
        self.calls.lock().push(call);
        Ok(TransactionResult {
            transaction_hash: format!("0x{nonce:064x}"),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldFilter, QueryCompiler, Selection, WhereClause};
    use serde_json::json;
    use world_types::{FieldDef, FieldType, ModelDef};

    fn schema() -> Arc<Schema> {
        let todos = ModelDef::new(vec![
            FieldDef::required("id", FieldType::String),
            FieldDef::required("done", FieldType::Bool),
        ]);
        Arc::new(Schema::new().with_model("world", "todos", todos).unwrap())
    }

    fn fields(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn pending_todos() -> QueryDescriptor {
        let selection = Selection::new().model_where(
            "world",
            "todos",
            WhereClause::new().field("done", FieldFilter::new().eq(false)),
        );
        QueryCompiler::new(schema()).compile(&selection.into()).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_filters_rows() {
        let backend = MemoryBackend::new(schema());
        backend.set("world", "todos", "1", fields(json!({"id": "1", "done": false}))).await;
        backend.set("world", "todos", "2", fields(json!({"id": "2", "done": true}))).await;

        let payload = backend.fetch(&pending_todos()).await.unwrap();
        let rows = payload.get("world::todos").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["id"], json!("1"));
    }

    #[tokio::test]
    async fn test_fetch_by_entity_id() {
        let backend = MemoryBackend::new(schema());
        backend.set("world", "todos", "1", fields(json!({"id": "1", "done": false}))).await;

        let descriptor = QueryDescriptor::Keys {
            entity_ids: vec!["1".to_string(), "123".to_string()],
        };
        let payload = backend.fetch(&descriptor).await.unwrap();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload.get("1").unwrap()[0].model.as_deref(), Some("world::todos"));
    }

    #[tokio::test]
    async fn test_set_notifies_registrations() {
        let backend = MemoryBackend::new(schema());
        let mut sub = backend.subscribe(pending_todos()).await.unwrap();
        assert_eq!(backend.active_subscriptions(), 1);

        backend.set("world", "todos", "1", fields(json!({"id": "1", "done": false}))).await;
        let event = sub.events.recv().await.unwrap();
        assert_eq!(event.descriptor, pending_todos());
        assert_eq!(event.payload.get("world::todos").unwrap().len(), 1);

        backend.unsubscribe(sub.id).await.unwrap();
        assert!(sub.events.recv().await.is_none());
        assert!(backend.unsubscribe(sub.id).await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_failure_and_disconnect() {
        let backend = MemoryBackend::new(schema());
        backend.fail_subscriptions(Some(BackendError::Connection("down".into())));
        assert!(backend.subscribe(pending_todos()).await.is_err());

        backend.fail_subscriptions(None);
        let mut sub = backend.subscribe(pending_todos()).await.unwrap();
        backend.disconnect();
        assert!(sub.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recording_account() {
        let account = RecordingAccount::new();
        let call = Call {
            contract_address: "0x1".to_string(),
            function_name: "spawn".to_string(),
            args: Map::new(),
        };

        let result = account.submit_call(call.clone()).await.unwrap();
        assert_eq!(result.transaction_hash, format!("0x{:064x}", 1));
        assert_eq!(account.calls(), vec![call.clone()]);

        account.fail_with(Some(BackendError::Execution("reverted".into())));
        assert_eq!(
            account.submit_call(call).await,
            Err(BackendError::Execution("reverted".into()))
        );
        assert_eq!(account.calls().len(), 1);
    }
}
