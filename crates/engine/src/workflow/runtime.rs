//! Per-call runtime facade.
//!
//! [`resolve_next`] is the entry point invoked for every `workflow_next`
//! request. It normalizes the completion history, recovers the carried loop
//! state, runs the resolver, and assembles the outward response, including the
//! context the caller must send back on its next call.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_types::{PlainStep, WorkflowDefinition};
use tracing::{debug, info};

use crate::error::ResolveError;
use crate::workflow::prompt::{COMPLETE_PROMPT, compose_step_prompt};
use crate::workflow::resolver::{LoopFrame, NextAction, resolve};
use crate::workflow::state::{CURRENT_LOOP_KEY, CarriedState, CurrentLoopMarker, LOOP_STATE_KEY, LoopIterationState, strip_engine_keys};

/// Display fields of the presented step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub guidance: Vec<String>,
    #[serde(default)]
    pub ask_for_files: bool,
    #[serde(default)]
    pub require_confirmation: bool,
}

impl From<&PlainStep> for StepView {
    fn from(step: &PlainStep) -> Self {
        Self {
            id: step.id.clone(),
            title: step.title.clone(),
            prompt: step.prompt.clone(),
            agent_role: step.agent_role.clone(),
            guidance: step.guidance.clone(),
            ask_for_files: step.ask_for_files,
            require_confirmation: step.require_confirmation,
        }
    }
}

/// Minimal loop echo for the innermost active loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopEcho {
    pub id: String,
    pub step_index: usize,
    pub step_iteration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepGuidance {
    pub prompt: String,
}

/// Response returned for every resolution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepResponse {
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepView>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_echo: Option<LoopEcho>,
    pub guidance: StepGuidance,
    /// Loops that terminated during this call; callers append them to their history.
    #[serde(default)]
    pub completed_loops: Vec<String>,
    /// Context to send back on the next call.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Computes the next step for a definition, completion history, and caller context.
pub fn resolve_next(
    definition: &WorkflowDefinition,
    completed: &[String],
    context: &Map<String, Value>,
) -> Result<NextStepResponse, ResolveError> {
    if definition.steps.is_empty() {
        return Err(ResolveError::invalid_definition(
            &definition.id,
            "workflow must declare at least one step",
        ));
    }

    let carried = CarriedState::from_context(context);
    let mut notes = carried.notes.clone();

    let known: HashSet<&str> = definition.flattened_step_ids().into_iter().collect();
    let mut completed_set: HashSet<&str> = HashSet::new();
    for step_id in completed {
        if known.contains(step_id.as_str()) {
            completed_set.insert(step_id.as_str());
        } else {
            debug!(workflow_id = %definition.id, step_id = %step_id, "ignoring unknown completed step");
            notes.push(format!("ignored unknown completed step '{step_id}'"));
        }
    }

    let loop_variables: Vec<&str> = definition
        .loop_configs()
        .into_iter()
        .flat_map(|control| control.injected_variables())
        .collect();
    let base_context = strip_engine_keys(context, &loop_variables);

    let resolution = resolve(definition, &completed_set, &base_context, &carried)?;
    notes.extend(resolution.notes);

    let mut response_context = base_context;
    let response = match resolution.action {
        NextAction::Complete => {
            info!(workflow_id = %definition.id, "workflow complete");
            NextStepResponse {
                done: true,
                step: None,
                loop_echo: None,
                guidance: StepGuidance {
                    prompt: COMPLETE_PROMPT.to_string(),
                },
                completed_loops: resolution.completed_loops,
                context: response_context,
                notes,
            }
        }
        NextAction::Advance(step) => {
            info!(workflow_id = %definition.id, step_id = %step.id, "next step resolved");
            NextStepResponse {
                done: false,
                step: Some(StepView::from(step)),
                loop_echo: None,
                guidance: StepGuidance {
                    prompt: compose_step_prompt(step, None),
                },
                completed_loops: resolution.completed_loops,
                context: response_context,
                notes,
            }
        }
        NextAction::LoopAdvance { step, frames } => {
            let innermost = frames.last();
            info!(
                workflow_id = %definition.id,
                step_id = %step.id,
                loop_id = innermost.map(|frame| frame.loop_id.as_str()).unwrap_or_default(),
                iteration = innermost.map(|frame| frame.iteration).unwrap_or_default(),
                "next loop step resolved"
            );
            write_loop_state(&mut response_context, &frames);
            NextStepResponse {
                done: false,
                step: Some(StepView::from(step)),
                loop_echo: innermost.map(|frame| LoopEcho {
                    id: frame.loop_id.clone(),
                    step_index: frame.step_index,
                    step_iteration: frame.iteration,
                }),
                guidance: StepGuidance {
                    prompt: compose_step_prompt(step, innermost),
                },
                completed_loops: resolution.completed_loops,
                context: response_context,
                notes,
            }
        }
    };

    Ok(response)
}

fn write_loop_state(context: &mut Map<String, Value>, frames: &[LoopFrame]) {
    let mut loop_state = Map::new();
    for frame in frames {
        let entry = LoopIterationState {
            iteration: frame.iteration,
            index: frame.index,
            step_index: frame.step_index,
            current_step: frame.current_step.clone(),
        };
        if let Ok(value) = serde_json::to_value(entry) {
            loop_state.insert(frame.loop_id.clone(), value);
        }
        context.extend(frame.variables.clone());
    }

    if let Some(innermost) = frames.last() {
        let marker = CurrentLoopMarker {
            loop_id: innermost.loop_id.clone(),
            depth: innermost.depth,
        };
        if let Ok(value) = serde_json::to_value(marker) {
            context.insert(CURRENT_LOOP_KEY.to_string(), value);
        }
    }
    context.insert(LOOP_STATE_KEY.to_string(), Value::Object(loop_state));
}
