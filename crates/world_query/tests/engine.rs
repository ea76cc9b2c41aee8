//! End-to-end tests of the query engine against the in-memory backend

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value as JsonValue};
use tokio::sync::mpsc;
use world_query::{
    Backend, Callback, MemoryBackend, Query, QueryCompiler, QueryResult, ResultDecoder, SdkError,
    SdkResult, SubscriptionManager, SubscriptionState,
};
use world_types::{FromValue, Model, Schema, Value, ValueError};

#[derive(Debug, Clone, PartialEq, world_types::Model)]
#[model(namespace = "world", name = "todos")]
struct Todo {
    id: String,
    text: String,
    done: bool,
    #[model(rename = "createdAt")]
    created_at: u64,
}

struct Engine {
    backend: MemoryBackend,
    compiler: QueryCompiler,
    decoder: ResultDecoder,
    manager: SubscriptionManager,
}

fn engine() -> Engine {
    let mut schema = Schema::new();
    schema.register::<Todo>().unwrap();
    let schema = Arc::new(schema);

    let backend = MemoryBackend::new(Arc::clone(&schema));
    let decoder = ResultDecoder::new(Arc::clone(&schema));
    let manager = SubscriptionManager::new(Arc::new(backend.clone()), decoder.clone())
        .with_unsubscribe_timeout(Duration::from_millis(200));

    Engine {
        backend,
        compiler: QueryCompiler::new(schema),
        decoder,
        manager,
    }
}

fn todo(id: &str, done: JsonValue) -> Map<String, JsonValue> {
    json!({"id": id, "text": format!("todo {id}"), "done": done, "createdAt": "1672531200000"})
        .as_object()
        .cloned()
        .unwrap()
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

async fn fetch(engine: &Engine, query: &Query) -> SdkResult<QueryResult> {
    let descriptor = engine.compiler.compile(query)?;
    let payload = engine.backend.fetch(&descriptor).await?;
    Ok(engine.decoder.decode(&descriptor, &payload)?)
}

#[tokio::test]
async fn test_pending_todos_scenario() {
    let engine = engine();
    engine.backend.set("world", "todos", "1", todo("1", json!(false))).await;
    engine.backend.set("world", "todos", "2", todo("2", json!(true))).await;

    let query = Query::from_json(&json!({
        "world": {"todos": {"$": {"where": {"done": {"$eq": false}}}}}
    }))
    .unwrap();
    let result = fetch(&engine, &query).await.unwrap();

    let todos: Vec<Todo> = result.models().unwrap();
    assert_eq!(
        todos,
        vec![Todo {
            id: "1".to_string(),
            text: "todo 1".to_string(),
            done: false,
            created_at: 1_672_531_200_000,
        }]
    );
}

#[tokio::test]
async fn test_unknown_entity_id_is_empty_result() {
    let engine = engine();
    engine.backend.set("world", "todos", "1", todo("1", json!(false))).await;

    let query = Query::from_json(&json!({"entityIds": ["123"]})).unwrap();
    let result = fetch(&engine, &query).await.unwrap();
    assert!(result.is_empty());
    assert!(result.entity("123").is_none());
}

#[tokio::test]
async fn test_entity_id_query() {
    let engine = engine();
    engine.backend.set("world", "todos", "1", todo("1", json!(false))).await;

    let result = fetch(&engine, &Query::entity_ids(["1"])).await.unwrap();
    let models = result.entity("1").unwrap();
    let todo = models["world::todos"].to_model::<Todo>().unwrap();
    assert_eq!(todo.id, "1");
}

#[tokio::test]
async fn test_empty_query_always_empty() {
    let engine = engine();
    engine.backend.set("world", "todos", "1", todo("1", json!(false))).await;

    let result = fetch(&engine, &Query::from_json(&json!({})).unwrap()).await.unwrap();
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_compile_errors_precede_backend() {
    let engine = engine();
    let contains_on_number = Query::from_json(&json!({
        "world": {"todos": {"$": {"where": {"createdAt": {"$contains": "1"}}}}}
    }))
    .unwrap();

    assert!(matches!(
        fetch(&engine, &contains_on_number).await,
        Err(SdkError::TypeMismatch { .. })
    ));
    assert!(matches!(
        Query::from_json(&json!({"entityIds": ["1"], "world": {}})),
        Err(SdkError::InvalidQueryShape(_))
    ));
}

#[tokio::test]
async fn test_live_updates_and_decode_errors() {
    let engine = engine();
    let descriptor = engine
        .compiler
        .compile(&Query::from_json(&json!({"world": {"todos": {}}})).unwrap())
        .unwrap();
    let (callback, mut rx) = channel_callback();

    let handle = engine.manager.subscribe(descriptor, callback);
    assert_eq!(handle.ready().await, SubscriptionState::Active);

    // Malformed row, then the same entity overwritten with a valid one
    engine.backend.set("world", "todos", "1", todo("1", json!("maybe"))).await;
    engine.backend.set("world", "todos", "1", todo("1", json!(true))).await;

    assert!(matches!(next(&mut rx).await, Err(SdkError::Decode(_))));
    let todos: Vec<Todo> = next(&mut rx).await.unwrap().models().unwrap();
    assert_eq!(todos.len(), 1);
    assert!(todos[0].done);
    assert_eq!(handle.state(), SubscriptionState::Active);

    handle.unsubscribe();
    engine.backend.set("world", "todos", "2", todo("2", json!(false))).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.backend.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_registration_failure_then_closed() {
    let engine = engine();
    engine
        .backend
        .fail_subscriptions(Some(world_query::BackendError::Connection("torii down".into())));
    let descriptor = engine.compiler.compile(&Query::entity_ids(["1"])).unwrap();
    let (callback, mut rx) = channel_callback();

    let handle = engine.manager.subscribe(descriptor, callback);
    handle.closed().await;

    assert!(matches!(next(&mut rx).await, Err(SdkError::Backend(_))));
    assert!(rx.try_recv().is_err());
    assert!(engine.manager.is_empty());
}

#[tokio::test]
async fn test_disconnect_closes_subscriptions() {
    let engine = engine();
    let descriptor = engine.compiler.compile(&Query::entity_ids(["1"])).unwrap();
    let (callback, _rx) = channel_callback();

    let handle = engine.manager.subscribe(descriptor, callback);
    handle.ready().await;
    engine.backend.disconnect();

    tokio::time::timeout(Duration::from_secs(1), handle.closed())
        .await
        .unwrap();
}

#[test]
fn test_typed_extraction_errors() {
    let record: std::collections::BTreeMap<String, Value> =
        [("id".to_string(), Value::from("1"))].into_iter().collect();
    assert_eq!(
        Todo::from_fields(&record),
        Err(ValueError::MissingField("text".to_string()))
    );
    assert!(Todo::from_value(&Value::Bool(true)).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callbacks_cross_unsubscribe() {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use world_query::SubscriptionHandle;

    let engine = engine();
    let descriptor = engine
        .compiler
        .compile(&Query::from_json(&json!({"world": {"todos": {}}})).unwrap())
        .unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let slots: [Arc<Mutex<Option<SubscriptionHandle>>>; 2] = Default::default();

    let mut handles = Vec::new();
    for i in 0..2 {
        let running = Arc::clone(&running);
        let completed = Arc::clone(&completed);
        let other = Arc::clone(&slots[1 - i]);
        let callback: Callback = Arc::new(move |_| {
            running.fetch_add(1, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(1);
            while running.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                std::thread::yield_now();
            }
            let other = other.lock().clone();
            if let Some(handle) = other {
                handle.unsubscribe();
            }
            completed.fetch_add(1, Ordering::SeqCst);
        });
        let handle = engine.manager.subscribe(descriptor.clone(), callback);
        assert_eq!(handle.ready().await, SubscriptionState::Active);
        handles.push(handle);
    }
    for (slot, handle) in slots.iter().zip(&handles) {
        *slot.lock() = Some(handle.clone());
    }

    engine.backend.set("world", "todos", "1", todo("1", json!(false))).await;

    let settled = tokio::time::timeout(Duration::from_secs(3), async {
        while completed.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "callbacks blocked cancelling each other");

    for handle in &handles {
        tokio::time::timeout(Duration::from_secs(1), handle.closed()).await.unwrap();
    }
    for slot in &slots {
        slot.lock().take();
    }
}
