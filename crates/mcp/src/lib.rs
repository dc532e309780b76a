//! Workflow definition stores and the MCP tool server for Stepwise.
//!
//! The store layer loads workflow definitions from memory or a directory and
//! can be wrapped with TTL caching and validation. The server layer exposes the
//! stateless engine operations as MCP tools over stdio.

pub mod config;
pub mod server;
pub mod store;

pub use config::ServerConfig;
pub use server::{StepwiseServer, serve_stdio};
pub use store::{CacheStats, CachingStore, FileStore, InMemoryStore, StoreError, ValidatingStore, WorkflowStore, build_store};
