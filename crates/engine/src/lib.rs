//! # Stepwise Engine
//!
//! The Stepwise engine answers one question per call: given a workflow
//! definition, the steps a caller has completed, and the caller's context,
//! what is the next step? It keeps no state between calls; loop progress is
//! carried by the caller inside the context and re-derived on every call.
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::Map;
//! use stepwise_engine::{parse_definition_str, resolve_next, DefinitionFormat};
//!
//! let definition = parse_definition_str(
//!     r#"{ "id": "hello", "name": "Hello", "steps": [{ "id": "greet", "title": "Greet", "prompt": "Say hello" }] }"#,
//!     DefinitionFormat::Json,
//! )?;
//!
//! let response = resolve_next(&definition, &[], &Map::new())?;
//! assert_eq!(response.step.map(|step| step.id).as_deref(), Some("greet"));
//!
//! let response = resolve_next(&definition, &["greet".to_string()], &Map::new())?;
//! assert!(response.done);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`condition`**: closed condition grammar, fail-closed evaluation, strict validation
//! - **`workflow`**: document parsing, carried loop state, loop decisions, resolver, response facade
//! - **`output_validation`**: step output checks against `validationCriteria`

pub mod condition;
pub mod error;
pub mod output_validation;
pub mod workflow;

pub use condition::{Condition, ConditionError, evaluate_condition, validate_condition};
pub use error::ResolveError;
pub use output_validation::{OutputValidation, validate_step_output};
pub use workflow::document::{
    DefinitionFormat, parse_definition_file, parse_definition_str, validate_definition, validate_definition_json,
};
pub use workflow::resolver::{LoopFrame, NextAction, Resolution, check_consistency, resolve};
pub use workflow::runtime::{LoopEcho, NextStepResponse, StepGuidance, StepView, resolve_next};
pub use workflow::state::{CURRENT_LOOP_KEY, CarriedState, LOOP_STATE_KEY};
