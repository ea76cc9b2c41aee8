//! Demo World
//!
//! A todo list world with one `actions` contract, run against the in-memory
//! backend and a recording account.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{info, warn};
use world_query::{
    Callback, FieldFilter, MemoryBackend, Query, QueryResult, RecordingAccount, SdkError,
    SdkResult, Selection, WhereClause,
};
use world_types::{AbiError, Model, Schema, SchemaError, ValueError};

use crate::config::ClientConfig;
use crate::loader::{LoadError, WorldLoader};
use crate::{Connect, WorldSdk};

/// World address used when none is configured
pub const DEMO_WORLD_ADDRESS: &str = "0x1";

/// Deployment manifest of the demo world
pub const ACTIONS_MANIFEST: &str = r#"{
    "contracts": [
        {
            "kind": "DojoContract",
            "address": "0x25d128c5fe89696e7e15390ea58927bbed4290ae46b538b28cfc7c2190e378b",
            "abi": [
                {
                    "type": "function",
                    "name": "spawn",
                    "inputs": [],
                    "outputs": [],
                    "state_mutability": "external"
                },
                {
                    "type": "function",
                    "name": "move",
                    "inputs": [{"name": "direction", "type": "dojo_starter::models::Direction"}],
                    "outputs": [],
                    "state_mutability": "external"
                }
            ],
            "systems": ["spawn", "move"],
            "tag": "actions"
        }
    ]
}"#;

/// A todo item
#[derive(Debug, Clone, PartialEq, Model)]
#[model(namespace = "world", name = "todos")]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub done: bool,
    /// Creation time in milliseconds since the epoch
    #[model(rename = "createdAt")]
    pub created_at: u64,
}

/// A goal, shaped like a todo
#[derive(Debug, Clone, PartialEq, Model)]
#[model(namespace = "world", name = "goals")]
pub struct Goal {
    pub id: String,
    pub text: String,
    pub done: bool,
    #[model(rename = "createdAt")]
    pub created_at: u64,
}

/// Error type for the demo run
#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Creation-time cutoff used by the date filters (2023-01-01, in ms)
pub const SINCE_2023: u64 = 1_672_531_200_000;

/// What a demo run observed
#[derive(Debug, Clone, Default)]
pub struct DemoReport {
    /// Hashes of the submitted system calls, in order
    pub transactions: Vec<String>,
    /// Open todos
    pub pending: Vec<Todo>,
    /// Done todos
    pub completed: Vec<Todo>,
    /// Todos created after the cutoff
    pub recent: Vec<Todo>,
    /// Open todos created after the cutoff
    pub recent_open: Vec<Todo>,
    /// Done todos mentioning "important"
    pub important_done: Vec<Todo>,
    /// Callback invocations across all subscriptions
    pub deliveries: usize,
}

/// Schema of the demo world
pub fn schema() -> Result<Schema, SchemaError> {
    let mut schema = Schema::new();
    schema.register::<Todo>()?;
    schema.register::<Goal>()?;
    Ok(schema)
}

fn todo_row(id: &str, text: &str, done: bool, created_at: u64) -> Map<String, JsonValue> {
    let mut row = Map::new();
    row.insert("id".to_string(), JsonValue::from(id));
    row.insert("text".to_string(), JsonValue::from(text));
    row.insert("done".to_string(), JsonValue::from(done));
    row.insert("createdAt".to_string(), JsonValue::from(created_at));
    row
}

fn todos_where(clause: WhereClause) -> Query {
    Query::from(Selection::new().model_where("world", "todos", clause))
}

fn open_todos() -> WhereClause {
    WhereClause::new().field("done", FieldFilter::new().eq(false))
}

fn done_todos() -> WhereClause {
    WhereClause::new().field("done", FieldFilter::new().eq(true))
}

fn recent_todos() -> WhereClause {
    WhereClause::new().field("createdAt", FieldFilter::new().gt(SINCE_2023))
}

fn recent_open_todos() -> WhereClause {
    open_todos().field("createdAt", FieldFilter::new().gt(SINCE_2023))
}

fn important_done_todos() -> WhereClause {
    done_todos().field("text", FieldFilter::new().contains("important"))
}

fn logging_callback(label: &'static str, deliveries: Arc<AtomicUsize>) -> Callback {
    Arc::new(move |result: SdkResult<QueryResult>| {
        deliveries.fetch_add(1, Ordering::SeqCst);
        match result {
            Ok(result) => {
                let todos = result.models::<Todo>().map(|t| t.len()).unwrap_or_default();
                let goals = result.models::<Goal>().map(|g| g.len()).unwrap_or_default();
                info!(subscription = label, todos, goals, "Received update");
            }
            Err(e) => warn!(subscription = label, error = %e, "Subscription error"),
        }
    })
}

async fn fetch_todos(sdk: &WorldSdk, label: &'static str, clause: WhereClause) -> Result<Vec<Todo>, DemoError> {
    let result = sdk
        .get_entities(&todos_where(clause), |result| match result {
            Ok(result) => {
                let count = result.models::<Todo>().map(|t| t.len()).unwrap_or_default();
                info!(query = label, count, "Fetched todos");
            }
            Err(e) => warn!(query = label, error = %e, "Fetch failed"),
        })
        .await?;
    Ok(result.models::<Todo>()?)
}

/// Run the demo flow
///
/// Submits `actions.spawn` and `actions.move`, opens the live queries,
/// seeds a few rows and fetches todos through the filtered queries.
pub async fn run_demo(config: ClientConfig) -> Result<DemoReport, DemoError> {
    let schema = Arc::new(schema()?);
    let contracts = WorldLoader::parse_contracts(ACTIONS_MANIFEST)?;
    let backend = MemoryBackend::connect(&config, Arc::clone(&schema))
        .await
        .map_err(SdkError::from)?;
    let account = Arc::new(RecordingAccount::new());

    let sdk = WorldSdk::with_backend(
        config,
        schema,
        Arc::new(backend.clone()),
        &contracts,
        account,
    )?;

    let mut report = DemoReport::default();
    let proxy = sdk.world_proxy();
    let spawn = proxy.call("actions", "spawn", Map::new()).await?;
    info!(tx = %spawn.transaction_hash, "Spawned");
    let moved = proxy.call("actions", "move", move_args("Left")).await?;
    info!(tx = %moved.transaction_hash, "Moved");
    report.transactions = vec![spawn.transaction_hash, moved.transaction_hash];

    let deliveries = Arc::new(AtomicUsize::new(0));
    let queries = [
        (
            "open-todos-and-goals",
            Query::from(
                Selection::new()
                    .model_where("world", "todos", open_todos())
                    .model("world", "goals"),
            ),
        ),
        (
            "todo-123",
            todos_where(WhereClause::new().field("id", FieldFilter::new().eq("123"))),
        ),
        ("entity-123", Query::entity_ids(["123"])),
        ("completed-todos", todos_where(done_todos())),
        ("recent-todos", todos_where(recent_todos())),
        ("recent-open-todos", todos_where(recent_open_todos())),
    ];

    let mut handles = Vec::with_capacity(queries.len());
    for (label, query) in &queries {
        let handle = sdk.subscribe_query(query, logging_callback(*label, Arc::clone(&deliveries)))?;
        let state = handle.ready().await;
        info!(subscription = *label, %state, "Subscribed");
        handles.push(handle);
    }

    let todos = [
        ("1", "Write the docs", false, SINCE_2023),
        ("2", "Ship the important release", true, SINCE_2023 + 86_400_000),
        ("3", "Plan the important review", false, SINCE_2023 + 2 * 86_400_000),
        ("4", "Tidy the desk", true, SINCE_2023 + 3 * 86_400_000),
    ];
    for (id, text, done, created_at) in todos {
        backend.set("world", "todos", id, todo_row(id, text, done, created_at)).await;
    }
    backend.set("world", "goals", "1", todo_row("1", "Finish the list", false, SINCE_2023)).await;

    report.pending = fetch_todos(&sdk, "open", open_todos()).await?;
    report.completed = fetch_todos(&sdk, "completed", done_todos()).await?;
    report.recent = fetch_todos(&sdk, "recent", recent_todos()).await?;
    report.recent_open = fetch_todos(&sdk, "recent-open", recent_open_todos()).await?;
    report.important_done = fetch_todos(&sdk, "important-done", important_done_todos()).await?;

    for handle in &handles {
        handle.unsubscribe();
    }
    sdk.shutdown().await;
    report.deliveries = deliveries.load(Ordering::SeqCst);

    info!(
        pending = report.pending.len(),
        completed = report.completed.len(),
        important_done = report.important_done.len(),
        deliveries = report.deliveries,
        "Demo finished"
    );
    Ok(report)
}

fn move_args(direction: &str) -> Map<String, JsonValue> {
    let mut args = Map::new();
    args.insert("direction".to_string(), JsonValue::from(direction));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_schema() {
        let schema = schema().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(Todo::NAME, "todos");
        assert!(schema.model("world", "goals").unwrap().get_field("createdAt").is_some());
    }

    #[test]
    fn test_manifest_parses() {
        let contracts = WorldLoader::parse_contracts(ACTIONS_MANIFEST).unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].systems, ["spawn", "move"]);
    }

    #[tokio::test]
    async fn test_run_demo() {
        let config = ClientConfig::default().with_world_address("0x1");
        let report = run_demo(config).await.unwrap();

        let ids = |todos: &[Todo]| todos.iter().map(|t| t.id.clone()).collect::<Vec<_>>();

        assert_eq!(report.transactions.len(), 2);
        assert_eq!(ids(&report.pending), ["1", "3"]);
        assert_eq!(ids(&report.completed), ["2", "4"]);
        assert_eq!(ids(&report.recent), ["2", "3", "4"]);
        assert_eq!(ids(&report.recent_open), ["3"]);
        assert_eq!(ids(&report.important_done), ["2"]);
        assert_eq!(report.important_done[0].text, "Ship the important release");
    }
}
