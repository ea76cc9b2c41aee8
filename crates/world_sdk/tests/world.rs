//! End-to-end tests of the world client

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tempfile::TempDir;
use tokio::sync::mpsc;
use world_query::{
    BackendError, Callback, MemoryBackend, Query, QueryResult, RecordingAccount, SdkError,
    SdkResult, SubscriptionState,
};
use world_sdk::config::ClientConfig;
use world_sdk::demo::{self, Todo, ACTIONS_MANIFEST, SINCE_2023};
use world_sdk::loader::WorldLoader;
use world_sdk::{init, Connect, WorldSdk};

struct World {
    sdk: WorldSdk,
    backend: MemoryBackend,
    account: Arc<RecordingAccount>,
}

async fn world() -> World {
    let config = ClientConfig::default().with_world_address("0x1");
    let schema = Arc::new(demo::schema().unwrap());
    let contracts = WorldLoader::parse_contracts(ACTIONS_MANIFEST).unwrap();
    let backend = MemoryBackend::connect(&config, Arc::clone(&schema)).await.unwrap();
    let account = Arc::new(RecordingAccount::new());

    let sdk = WorldSdk::with_backend(
        config,
        schema,
        Arc::new(backend.clone()),
        &contracts,
        account.clone(),
    )
    .unwrap();
    World { sdk, backend, account }
}

fn todo(id: &str, done: bool) -> Map<String, JsonValue> {
    json!({"id": id, "text": format!("todo {id}"), "done": done, "createdAt": 1_672_531_200_000u64})
        .as_object()
        .cloned()
        .unwrap()
}

fn todo_with(id: &str, text: &str, done: bool, created_at: u64) -> Map<String, JsonValue> {
    json!({"id": id, "text": text, "done": done, "createdAt": created_at})
        .as_object()
        .cloned()
        .unwrap()
}

fn ids(todos: &[Todo]) -> Vec<&str> {
    todos.iter().map(|t| t.id.as_str()).collect()
}

fn channel_callback() -> (Callback, mpsc::UnboundedReceiver<SdkResult<QueryResult>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: Callback = Arc::new(move |result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<SdkResult<QueryResult>>) -> SdkResult<QueryResult> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("callback channel closed")
}

#[tokio::test]
async fn test_init_with_memory_backend() {
    let contracts = WorldLoader::parse_contracts(ACTIONS_MANIFEST).unwrap();
    let sdk = init::<MemoryBackend>(
        ClientConfig::default().with_world_address("0x1"),
        demo::schema().unwrap(),
        &contracts,
        Arc::new(RecordingAccount::new()),
    )
    .await
    .unwrap();

    assert_eq!(sdk.schema().len(), 2);
    assert_eq!(sdk.world_proxy().tags().collect::<Vec<_>>(), ["actions"]);

    let result = sdk
        .get_entities(&Query::entity_ids(["123"]), |_| {})
        .await
        .unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_move_forwards_exactly_one_call() {
    #[derive(Serialize)]
    struct Move {
        direction: &'static str,
    }

    let world = world().await;
    let actions = world.sdk.world_proxy().contract("actions").unwrap();
    assert_eq!(actions.names().collect::<Vec<_>>(), ["move", "spawn"]);

    let move_ = actions.get("move").unwrap();
    let tx = move_.call_with(&Move { direction: "Left" }).await.unwrap();
    assert!(tx.transaction_hash.starts_with("0x"));

    let err = move_.call(Map::new()).await.unwrap_err();
    assert!(matches!(err, SdkError::ArgumentMismatch { .. }));

    let calls = world.account.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].function_name, "move");
    assert_eq!(calls[0].args.get("direction"), Some(&json!("Left")));
    assert_eq!(
        calls[0].contract_address,
        "0x25d128c5fe89696e7e15390ea58927bbed4290ae46b538b28cfc7c2190e378b"
    );
}

#[tokio::test]
async fn test_account_failure_is_forwarded() {
    let world = world().await;
    world
        .account
        .fail_with(Some(BackendError::Rejected("nonce too low".into())));

    let err = world
        .sdk
        .world_proxy()
        .call("actions", "spawn", Map::new())
        .await
        .unwrap_err();
    assert_eq!(err, SdkError::Backend(BackendError::Rejected("nonce too low".into())));
}

#[tokio::test]
async fn test_live_todos_from_json_query() {
    let world = world().await;
    let query = Query::from_json(&json!({
        "world": {"todos": {"$": {"where": {"done": {"$eq": false}}}}}
    }))
    .unwrap();

    let (callback, mut rx) = channel_callback();
    let handle = world.sdk.subscribe_query(&query, callback).unwrap();
    assert_eq!(handle.ready().await, SubscriptionState::Active);

    world.backend.set("world", "todos", "1", todo("1", false)).await;
    let todos = next(&mut rx).await.unwrap().models::<Todo>().unwrap();
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].created_at, 1_672_531_200_000);

    world.backend.set("world", "todos", "2", todo("2", true)).await;
    let todos = next(&mut rx).await.unwrap().models::<Todo>().unwrap();
    assert_eq!(todos.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), ["1"]);

    assert_eq!(world.sdk.shutdown().await, 1);
    assert!(handle.is_closed());
    assert!(world.sdk.subscriptions().is_empty());
}

#[tokio::test]
async fn test_load_manifest_then_call() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("manifest.json");
    tokio::fs::write(&path, ACTIONS_MANIFEST).await.unwrap();

    let contracts = WorldLoader::load_contracts(&path).await.unwrap();
    let account = Arc::new(RecordingAccount::new());
    let sdk = init::<MemoryBackend>(
        ClientConfig::default().with_world_address("0x1"),
        demo::schema().unwrap(),
        &contracts,
        account.clone(),
    )
    .await
    .unwrap();

    sdk.world_proxy()
        .call("actions", "spawn", Map::new())
        .await
        .unwrap();
    let err = sdk
        .world_proxy()
        .call("actions", "teleport", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SdkError::UnknownSystem { .. }));
    assert_eq!(account.calls().len(), 1);
}

#[tokio::test]
async fn test_get_entities_done_and_contains() {
    let world = world().await;
    let rows = [
        ("1", "important: renew passport", true),
        ("2", "water the plants", true),
        ("3", "important: call the bank", false),
        ("4", "the most important task", true),
    ];
    for (id, text, done) in rows {
        world.backend.set("world", "todos", id, todo_with(id, text, done, SINCE_2023)).await;
    }

    let query = Query::from_json(&json!({
        "world": {"todos": {"$": {"where": {
            "done": {"$eq": true},
            "text": {"$contains": "important"}
        }}}}
    }))
    .unwrap();

    let mut seen = None;
    let result = world
        .sdk
        .get_entities(&query, |r| seen = Some(r))
        .await
        .unwrap();
    let todos = result.models::<Todo>().unwrap();

    assert_eq!(ids(&todos), ["1", "4"]);
    assert!(todos.iter().all(|t| t.done && t.text.contains("important")));
    assert_eq!(seen, Some(Ok(result)));
}

#[tokio::test]
async fn test_live_todos_created_after_cutoff() {
    let world = world().await;
    let query = Query::from_json(&json!({
        "world": {"todos": {"$": {"where": {
            "done": {"$eq": false},
            "createdAt": {"$gt": SINCE_2023}
        }}}}
    }))
    .unwrap();

    let (callback, mut rx) = channel_callback();
    let handle = world.sdk.subscribe_query(&query, callback).unwrap();
    assert_eq!(handle.ready().await, SubscriptionState::Active);

    world
        .backend
        .set("world", "todos", "1", todo_with("1", "on the cutoff", false, SINCE_2023))
        .await;
    let todos = next(&mut rx).await.unwrap().models::<Todo>().unwrap();
    assert!(todos.is_empty());

    world
        .backend
        .set("world", "todos", "2", todo_with("2", "after the cutoff", false, SINCE_2023 + 1))
        .await;
    world
        .backend
        .set("world", "todos", "3", todo_with("3", "after but done", true, SINCE_2023 + 2))
        .await;
    let _ = next(&mut rx).await.unwrap();
    let todos = next(&mut rx).await.unwrap().models::<Todo>().unwrap();
    assert_eq!(ids(&todos), ["2"]);

    assert!(handle.unsubscribe());
}
