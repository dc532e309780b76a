//! Workflow interpretation.
//!
//! Submodules cover the full per-call pipeline: reading definitions
//! ([`document`]), recovering caller-carried loop state ([`state`]), loop
//! activity decisions ([`loop_state`]), next-step resolution ([`resolver`]),
//! prompt composition ([`prompt`]), and the response facade ([`runtime`]).

pub mod document;
pub mod loop_state;
pub mod prompt;
pub mod resolver;
pub mod runtime;
pub mod state;
