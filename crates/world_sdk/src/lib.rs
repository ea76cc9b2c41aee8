//! World SDK - Typed queries, live subscriptions and contract calls
//!
//! This crate provides the caller-facing entry point:
//! - `init` / `WorldSdk`: one client bundling queries, subscriptions and the
//!   contract proxy
//! - Layered client configuration via `figment`
//! - Schema and deployment manifest loading

// Re-export core crates
pub use world_query;
pub use world_types;

// Client configuration
pub mod config;

// Schema and manifest loading
pub mod loader;

// SDK entry point
mod client;
pub use client::*;

// In-memory demo world
pub mod demo;
