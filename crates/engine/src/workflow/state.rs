//! Caller-carried loop state.
//!
//! The engine keeps nothing between calls. Loop progress travels inside the
//! caller's context under two reserved keys:
//!
//! - `_currentLoop`: `{ "loopId", "depth" }` for the innermost active loop.
//! - `_loopState`: `{ "<loopId>": { "iteration", "index"?, "stepIndex", "currentStep" } }`
//!   for every active loop on the path to the presented step.
//!
//! Parsing is lenient. Garbled entries are dropped with a note so that the
//! resolver falls back to reconstruction instead of failing the call.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_types::WorkflowStep;

pub const CURRENT_LOOP_KEY: &str = "_currentLoop";
pub const LOOP_STATE_KEY: &str = "_loopState";

/// Innermost active loop and its nesting depth (0 for a top-level loop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLoopMarker {
    pub loop_id: String,
    pub depth: usize,
}

/// Position of one active loop as echoed by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopIterationState {
    /// 0-based iteration number.
    pub iteration: u32,
    /// Collection cursor for `forEach` loops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Body position presented for this loop in this iteration.
    pub step_index: usize,
    /// Id of the body step at `step_index`.
    pub current_step: String,
}

impl LoopIterationState {
    /// Whether the echoed position still matches the loop body.
    pub fn matches_body(&self, body: &[WorkflowStep]) -> bool {
        let index_consistent = self.index.is_none_or(|index| index == self.iteration);
        index_consistent && body.get(self.step_index).is_some_and(|step| step.id() == self.current_step)
    }
}

/// Loop state recovered from a caller context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarriedState {
    pub current_loop: Option<CurrentLoopMarker>,
    pub loops: IndexMap<String, LoopIterationState>,
    /// Non-fatal problems found while reading the reserved keys.
    pub notes: Vec<String>,
}

impl CarriedState {
    pub fn from_context(context: &Map<String, Value>) -> Self {
        let mut state = CarriedState::default();

        if let Some(raw_marker) = context.get(CURRENT_LOOP_KEY) {
            match serde_json::from_value::<CurrentLoopMarker>(raw_marker.clone()) {
                Ok(marker) => state.current_loop = Some(marker),
                Err(error) => state
                    .notes
                    .push(format!("ignored malformed {CURRENT_LOOP_KEY}: {error}")),
            }
        }

        match context.get(LOOP_STATE_KEY) {
            None => {}
            Some(Value::Object(entries)) => {
                for (loop_id, raw_entry) in entries {
                    match serde_json::from_value::<LoopIterationState>(raw_entry.clone()) {
                        Ok(entry) => {
                            state.loops.insert(loop_id.clone(), entry);
                        }
                        Err(error) => state
                            .notes
                            .push(format!("ignored malformed {LOOP_STATE_KEY} entry for loop '{loop_id}': {error}")),
                    }
                }
            }
            Some(_) => state
                .notes
                .push(format!("ignored {LOOP_STATE_KEY}: expected an object keyed by loop id")),
        }

        if let Some(marker) = &state.current_loop
            && !state.loops.contains_key(&marker.loop_id)
        {
            state.notes.push(format!(
                "{CURRENT_LOOP_KEY} names loop '{}' without matching {LOOP_STATE_KEY}",
                marker.loop_id
            ));
        }

        state
    }

    pub fn loop_state(&self, loop_id: &str) -> Option<&LoopIterationState> {
        self.loops.get(loop_id)
    }
}

/// Copies the caller context without the reserved keys and the given loop variables.
pub fn strip_engine_keys(context: &Map<String, Value>, loop_variables: &[&str]) -> Map<String, Value> {
    context
        .iter()
        .filter(|(key, _)| {
            key.as_str() != CURRENT_LOOP_KEY && key.as_str() != LOOP_STATE_KEY && !loop_variables.contains(&key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Vec<WorkflowStep> {
        serde_json::from_value(json!([
            { "id": "draft", "title": "Draft", "prompt": "p" },
            { "id": "review", "title": "Review", "prompt": "p" }
        ]))
        .expect("parse body")
    }

    #[test]
    fn reads_well_formed_state() {
        let context = json!({
            "_currentLoop": { "loopId": "outer", "depth": 0 },
            "_loopState": { "outer": { "iteration": 2, "stepIndex": 1, "currentStep": "review" } }
        });
        let state = CarriedState::from_context(context.as_object().expect("object"));

        assert!(state.notes.is_empty());
        let entry = state.loop_state("outer").expect("outer state");
        assert_eq!(entry.iteration, 2);
        assert!(entry.matches_body(&body()));
    }

    #[test]
    fn garbled_entries_are_dropped_with_notes() {
        let context = json!({
            "_currentLoop": "outer",
            "_loopState": { "outer": { "iteration": "two" }, "inner": { "iteration": 0, "stepIndex": 0, "currentStep": "draft" } }
        });
        let state = CarriedState::from_context(context.as_object().expect("object"));

        assert!(state.current_loop.is_none());
        assert!(state.loop_state("outer").is_none());
        assert!(state.loop_state("inner").is_some());
        assert_eq!(state.notes.len(), 2);
    }

    #[test]
    fn mismatching_position_is_rejected() {
        let entry = LoopIterationState {
            iteration: 1,
            index: None,
            step_index: 1,
            current_step: "draft".into(),
        };
        assert!(!entry.matches_body(&body()));

        let out_of_range = LoopIterationState {
            step_index: 5,
            current_step: "review".into(),
            ..entry
        };
        assert!(!out_of_range.matches_body(&body()));
    }

    #[test]
    fn strips_reserved_keys_and_loop_variables() {
        let context = json!({
            "_currentLoop": { "loopId": "l", "depth": 0 },
            "_loopState": {},
            "currentIteration": 3,
            "keep": true
        });
        let stripped = strip_engine_keys(context.as_object().expect("object"), &["currentIteration"]);

        assert_eq!(Value::Object(stripped), json!({ "keep": true }));
    }
}
