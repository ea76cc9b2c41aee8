//! Contract Proxy Builder
//!
//! Contract definitions are data: the proxy is built at runtime with one
//! namespace per contract tag and one callable per external function. All
//! callables share a single argument validation routine, parameterized by the
//! function's declared inputs, and forward to one shared account.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use world_types::{AbiError, AbiParam, ContractDefinition, FunctionAbi};

use crate::{Account, BackendError, Call, SdkError, SdkResult, TransactionResult};

/// Submits one call with already validated arguments
type Invoke = Arc<
    dyn Fn(Map<String, JsonValue>) -> BoxFuture<'static, Result<TransactionResult, BackendError>>
        + Send
        + Sync,
>;

// ─────────────────────────────────────────────────────────────────────────────
// Argument Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Check that `args` has exactly the declared input keys
pub fn validate_args(function: &FunctionAbi, args: &Map<String, JsonValue>) -> SdkResult<()> {
    let declared: BTreeSet<&str> = function.input_names().collect();

    let missing: Vec<String> = function
        .input_names()
        .filter(|name| !args.contains_key(*name))
        .map(str::to_string)
        .collect();
    let unexpected: Vec<String> = args
        .keys()
        .filter(|key| !declared.contains(key.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(SdkError::ArgumentMismatch {
            function: function.name.clone(),
            missing,
            unexpected,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// System Call
// ─────────────────────────────────────────────────────────────────────────────

/// Callable bound to one external contract function
#[derive(Clone)]
pub struct SystemCall {
    tag: Arc<str>,
    function: Arc<FunctionAbi>,
    invoke: Invoke,
}

impl SystemCall {
    fn new(tag: Arc<str>, address: Arc<str>, function: FunctionAbi, account: Arc<dyn Account>) -> Self {
        let function_name: Arc<str> = Arc::from(function.name.as_str());
        let invoke: Invoke = Arc::new(move |args: Map<String, JsonValue>| {
            let account = Arc::clone(&account);
            let call = Call {
                contract_address: address.to_string(),
                function_name: function_name.to_string(),
                args,
            };
            async move { account.submit_call(call).await }.boxed()
        });

        Self {
            tag,
            function: Arc::new(function),
            invoke,
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Declared inputs, in order
    pub fn inputs(&self) -> &[AbiParam] {
        &self.function.inputs
    }

    pub fn abi(&self) -> &FunctionAbi {
        &self.function
    }

    /// Validate the arguments and submit the call through the account
    ///
    /// Account failures are forwarded as they are; nothing is retried.
    pub async fn call(&self, args: Map<String, JsonValue>) -> SdkResult<TransactionResult> {
        validate_args(&self.function, &args)?;
        tracing::debug!(tag = %self.tag, function = %self.function.name, "Submitting call");

        let result = (self.invoke)(args).await;
        if let Err(e) = &result {
            tracing::warn!(tag = %self.tag, function = %self.function.name, error = %e, "Call failed");
        }
        Ok(result?)
    }

    /// Call with a typed argument struct that serializes to an object
    pub async fn call_with<T: Serialize + ?Sized>(&self, args: &T) -> SdkResult<TransactionResult> {
        match serde_json::to_value(args) {
            Ok(JsonValue::Object(map)) => self.call(map).await,
            Ok(other) => Err(SdkError::mismatch(
                &self.function.name,
                format!("arguments must serialize to an object, got {other}"),
            )),
            Err(e) => Err(SdkError::mismatch(&self.function.name, e)),
        }
    }
}

impl std::fmt::Debug for SystemCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemCall")
            .field("tag", &self.tag)
            .field("function", &self.function.name)
            .field("inputs", &self.function.inputs)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Contract Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// The callable systems of one contract
#[derive(Debug, Clone)]
pub struct ContractProxy {
    tag: String,
    address: String,
    systems: BTreeMap<String, SystemCall>,
}

impl ContractProxy {
    fn build(def: &ContractDefinition, account: &Arc<dyn Account>) -> Self {
        let tag: Arc<str> = Arc::from(def.tag.as_str());
        let address: Arc<str> = Arc::from(def.address.as_str());

        let systems = def
            .functions()
            .into_iter()
            .filter(|f| f.is_callable())
            .map(|f| {
                let call = SystemCall::new(
                    Arc::clone(&tag),
                    Arc::clone(&address),
                    f.clone(),
                    Arc::clone(account),
                );
                (f.name.clone(), call)
            })
            .collect();

        Self {
            tag: def.tag.clone(),
            address: def.address.clone(),
            systems,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get a callable by function name
    pub fn get(&self, function: &str) -> Option<&SystemCall> {
        self.systems.get(function)
    }

    /// Invoke a function by name
    pub async fn call(&self, function: &str, args: Map<String, JsonValue>) -> SdkResult<TransactionResult> {
        let system = self.get(function).ok_or_else(|| SdkError::UnknownSystem {
            tag: self.tag.clone(),
            function: function.to_string(),
        })?;
        system.call(args).await
    }

    /// Names of the callable functions
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.systems.keys().map(String::as_str)
    }

    pub fn systems(&self) -> impl Iterator<Item = &SystemCall> {
        self.systems.values()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// World Proxy
// ─────────────────────────────────────────────────────────────────────────────

/// Every contract of a world, by tag
#[derive(Debug, Clone, Default)]
pub struct WorldProxy {
    contracts: BTreeMap<String, ContractProxy>,
}

impl WorldProxy {
    /// Build the proxy from contract definitions
    ///
    /// View functions are not exposed. Fails on duplicate tags or duplicate
    /// function names within one ABI.
    pub fn build(definitions: &[ContractDefinition], account: Arc<dyn Account>) -> Result<Self, AbiError> {
        let mut contracts = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            if contracts.contains_key(&def.tag) {
                return Err(AbiError::DuplicateTag(def.tag.clone()));
            }
            let proxy = ContractProxy::build(def, &account);
            tracing::debug!(tag = %def.tag, systems = proxy.len(), "Built contract proxy");
            contracts.insert(def.tag.clone(), proxy);
        }
        Ok(Self { contracts })
    }

    /// Get a contract by tag
    pub fn contract(&self, tag: &str) -> Option<&ContractProxy> {
        self.contracts.get(tag)
    }

    /// Invoke `tag.function(args)`
    pub async fn call(
        &self,
        tag: &str,
        function: &str,
        args: Map<String, JsonValue>,
    ) -> SdkResult<TransactionResult> {
        let contract = self.contract(tag).ok_or_else(|| SdkError::UnknownSystem {
            tag: tag.to_string(),
            function: function.to_string(),
        })?;
        contract.call(function, args).await
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    pub fn contracts(&self) -> impl Iterator<Item = &ContractProxy> {
        self.contracts.values()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingAccount;
    use serde_json::json;

    fn actions() -> ContractDefinition {
        ContractDefinition::new("actions", "0x25d1")
            .with_function(FunctionAbi::external("spawn", vec![]))
            .with_function(FunctionAbi::external(
                "move",
                vec![AbiParam::new("direction", "dojo_starter::models::Direction")],
            ))
            .with_function(FunctionAbi::view("position", vec![AbiParam::new("player", "felt252")]))
    }

    fn args(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn build() -> (WorldProxy, Arc<RecordingAccount>) {
        let account = Arc::new(RecordingAccount::new());
        let proxy = WorldProxy::build(&[actions()], account.clone()).unwrap();
        (proxy, account)
    }

    #[test]
    fn test_validate_args() {
        let function = FunctionAbi::external("move", vec![AbiParam::new("direction", "Direction")]);

        tokio_test::assert_ok!(validate_args(&function, &args(json!({"direction": "Left"}))));
        assert_eq!(
            validate_args(&function, &args(json!({"dir": "Left"}))),
            Err(SdkError::ArgumentMismatch {
                function: "move".to_string(),
                missing: vec!["direction".to_string()],
                unexpected: vec!["dir".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_move_forwards_exact_call() {
        let (proxy, account) = build();

        let result = proxy
            .call("actions", "move", args(json!({"direction": "Left"})))
            .await
            .unwrap();
        assert!(result.transaction_hash.starts_with("0x"));

        assert_eq!(
            account.calls(),
            vec![Call {
                contract_address: "0x25d1".to_string(),
                function_name: "move".to_string(),
                args: args(json!({"direction": "Left"})),
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_argument_never_reaches_account() {
        let (proxy, account) = build();

        let err = proxy.call("actions", "move", Map::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SdkError::ArgumentMismatch { ref missing, .. } if missing == &vec!["direction".to_string()]
        ));
        assert!(account.calls().is_empty());
    }

    #[tokio::test]
    async fn test_view_functions_not_exposed() {
        let (proxy, _) = build();
        let actions = proxy.contract("actions").unwrap();
        assert_eq!(actions.names().collect::<Vec<_>>(), vec!["move", "spawn"]);

        let err = proxy
            .call("actions", "position", args(json!({"player": "0x1"})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SdkError::UnknownSystem {
                tag: "actions".to_string(),
                function: "position".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_tag() {
        let (proxy, _) = build();
        assert!(matches!(
            proxy.call("lobby", "spawn", Map::new()).await,
            Err(SdkError::UnknownSystem { .. })
        ));
    }

    #[tokio::test]
    async fn test_account_error_forwarded() {
        let (proxy, account) = build();
        account.fail_with(Some(BackendError::Execution("out of moves".into())));

        let err = proxy.call("actions", "spawn", Map::new()).await.unwrap_err();
        assert_eq!(err, SdkError::Backend(BackendError::Execution("out of moves".into())));
    }

    #[tokio::test]
    async fn test_call_with_struct() {
        #[derive(Serialize)]
        struct Move {
            direction: &'static str,
        }

        let (proxy, account) = build();
        let system = proxy.contract("actions").unwrap().get("move").unwrap();
        system.call_with(&Move { direction: "Up" }).await.unwrap();
        assert_eq!(account.calls()[0].args, args(json!({"direction": "Up"})));

        assert!(matches!(
            system.call_with(&"Up").await,
            Err(SdkError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let (proxy, account) = build();
        let spawn = proxy.contract("actions").unwrap().get("spawn").unwrap().clone();

        let calls = (0..8).map(|_| {
            let spawn = spawn.clone();
            tokio::spawn(async move { spawn.call(Map::new()).await })
        });
        for handle in calls.collect::<Vec<_>>() {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(account.calls().len(), 8);
    }

    #[test]
    fn test_duplicate_tag_rejected() {
        let account: Arc<dyn Account> = Arc::new(RecordingAccount::new());
        let result = WorldProxy::build(&[actions(), actions()], account);
        assert!(matches!(result, Err(AbiError::DuplicateTag(tag)) if tag == "actions"));
    }
}
