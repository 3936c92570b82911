/// Core library for the Storyloom serialized-novel generation backplane.
///
/// This crate contains all business logic: configuration management,
/// typed errors, the LLM gateway, the SQLite store adapter, the
/// three-pass chapter pipeline, and the durable per-story orchestrator
/// used by the CLI binary.
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
pub mod story;

pub use error::*;

/// Returns the version of the storyloom-core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
