// crates/enrun-core/src/lib.rs

//! Shared data model, configuration, and HTTP plumbing for the
//! enrichment pipeline runner.
//!
//! This crate has no opinion about *how* a pipeline run is driven — that
//! is `enrun-engine`'s job. It only defines the wire types every
//! internal endpoint exchanges, the environment-driven runtime
//! configuration, the accumulating run `Context`, and a small
//! `InternalApi` client abstraction so the engine can be tested against
//! a fake transport.

pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod types;

pub use context::Context;
pub use error::Result;
