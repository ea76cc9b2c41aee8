//! World Query - Typed query compilation, live subscriptions and contract calls
//!
//! This crate contains the engine that sits between a caller and the remote
//! collaborators:
//!
//! - `filter` / `query`: schema-shaped queries compiled into descriptors
//! - `decode`: raw backend rows turned back into schema-typed results
//! - `subscription`: one live backend registration per subscribe call
//! - `proxy`: one callable per external contract function
//!
//! The indexer and the account are reached through the `Backend` and
//! `Account` traits; `memory` provides in-process implementations of both.

pub use world_types;

mod account;
mod backend;
mod decode;
mod error;
mod filter;
mod memory;
mod proxy;
mod query;
pub mod subscription;

pub use account::*;
pub use backend::*;
pub use decode::*;
pub use error::*;
pub use filter::*;
pub use memory::*;
pub use proxy::*;
pub use query::*;
pub use subscription::{
    Callback, SubscriptionHandle, SubscriptionId, SubscriptionManager, SubscriptionState,
};
