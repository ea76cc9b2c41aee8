//! World Types - Data definitions shared by the query engine and the SDK
//!
//! This crate contains the pure data structures that describe a world: the
//! values that flow between the indexer and the caller, the schema of
//! namespaced models, and the ABI of deployed contracts.
//!
//! Models can be described as data (`Schema` loaded from TOML/JSON) or at
//! compile time with `#[derive(Model)]`.

// Lets the derive macro refer to `::world_types` from inside this crate's tests.
extern crate self as world_types;

mod abi;
mod model;
mod schema;
mod value;

pub use abi::*;
pub use model::*;
pub use schema::*;
pub use value::*;

pub use world_macros::Model;
