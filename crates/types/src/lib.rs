//! Shared workflow definition types for Stepwise.
//!
//! The engine, the definition stores, and the MCP server all speak in terms of
//! these types; nothing here performs resolution.

pub mod workflow;

pub use workflow::validation::{ReferenceProblem, ValidationIssue, ValidationReport};
pub use workflow::{
    LoopBody, LoopConfig, LoopCount, LoopKind, LoopStep, PlainStep, WorkflowDefinition, WorkflowStep, WorkflowSummary,
};
