//! Account collaborator
//!
//! Signing and submission are opaque to the SDK: the proxy hands the account
//! a named call and forwards whatever comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::BackendError;

/// A contract function invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub contract_address: String,
    pub function_name: String,
    /// Arguments keyed by declared input name
    pub args: Map<String, JsonValue>,
}

/// Outcome of a submitted call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub transaction_hash: String,
}

/// Something able to submit contract calls
#[async_trait]
pub trait Account: Send + Sync + 'static {
    async fn submit_call(&self, call: Call) -> Result<TransactionResult, BackendError>;
}
