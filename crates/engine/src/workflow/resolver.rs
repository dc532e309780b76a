//! Next-step resolution over plain and loop steps.
//!
//! Resolution is a single depth-first, left-to-right pass. Top-level steps
//! honor the completion history directly. Inside a loop body the history is
//! honored according to the caller's echoed position for that loop:
//!
//! - no trusted position: every body completion counts (reconstruction).
//! - trusted position `k`: positions before `k` are done, position `k` is done
//!   iff its id is completed, later positions are stale.
//! - a fresh iteration started during this call: no body completion counts.
//!
//! A nested loop sitting at the echoed position with its own matching state is
//! resumed even when its id is in the history from an earlier iteration.
//!
//! A body pass that finds nothing actionable finishes the iteration, so the
//! resolver moves to the next one within the same call.

use std::collections::HashSet;

use serde_json::{Map, Value};
use stepwise_types::workflow::validation::{duplicate_step_ids, reference_problems};
use stepwise_types::{LoopBody, LoopStep, PlainStep, WorkflowDefinition, WorkflowStep};
use tracing::{debug, info};

use crate::condition::evaluate_condition;
use crate::error::ResolveError;
use crate::workflow::loop_state::{LoopDecision, Termination, decide_iteration};
use crate::workflow::state::CarriedState;

/// Position and variables of one active loop on the path to the resolved step.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopFrame {
    pub loop_id: String,
    /// Nesting depth; 0 for a loop in the top-level sequence.
    pub depth: usize,
    pub iteration: u32,
    pub index: Option<u32>,
    pub total_items: Option<usize>,
    /// Body position of the child that leads to the resolved step.
    pub step_index: usize,
    pub current_step: String,
    pub variables: Map<String, Value>,
}

/// Outcome of a resolution pass.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction<'a> {
    /// Present a step outside any loop.
    Advance(&'a PlainStep),
    /// Present a step inside active loops, outermost frame first.
    LoopAdvance { step: &'a PlainStep, frames: Vec<LoopFrame> },
    /// Every step has been completed or skipped.
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<'a> {
    pub action: NextAction<'a>,
    /// Loops that terminated during this call, in termination order.
    pub completed_loops: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Honor {
    All,
    From(usize),
    Nothing,
}

impl Honor {
    fn is_done(self, position: usize, step_id: &str, completed: &HashSet<&str>) -> bool {
        match self {
            Honor::All => completed.contains(step_id),
            Honor::From(trusted) => position == trusted && completed.contains(step_id),
            Honor::Nothing => false,
        }
    }

    fn trusts_nested_state(self, position: usize) -> bool {
        match self {
            Honor::All => true,
            Honor::From(trusted) => position == trusted,
            Honor::Nothing => false,
        }
    }

    /// The echoed position itself; a nested loop here with live state is still running.
    fn resumes_at(self, position: usize) -> bool {
        self == Honor::From(position)
    }

    /// How a nested loop without usable state treats body completions.
    fn fallback_for_nested(self, position: usize) -> Honor {
        if self.trusts_nested_state(position) { Honor::All } else { Honor::Nothing }
    }
}

struct Found<'a> {
    step: &'a PlainStep,
    position: usize,
    frames: Vec<LoopFrame>,
}

/// Checks the invariants resolution depends on: unique ids and an acyclic, resolvable loop-body graph.
pub fn check_consistency(definition: &WorkflowDefinition) -> Result<(), ResolveError> {
    let duplicates = duplicate_step_ids(definition);
    if !duplicates.is_empty() {
        return Err(ResolveError::consistency(
            &definition.id,
            format!("duplicate step ids: {}", duplicates.join(", ")),
        ));
    }
    if let Some(problem) = reference_problems(definition).into_iter().next() {
        return Err(ResolveError::consistency(&definition.id, problem.to_string()));
    }
    Ok(())
}

/// Resolves the next action for a definition, completion history, and context.
///
/// `context` must already be stripped of reserved keys and loop variables;
/// `state` carries the loop positions read from the original context.
pub fn resolve<'a>(
    definition: &'a WorkflowDefinition,
    completed: &HashSet<&str>,
    context: &Map<String, Value>,
    state: &CarriedState,
) -> Result<Resolution<'a>, ResolveError> {
    check_consistency(definition)?;

    let mut resolver = StepResolver {
        definition,
        completed,
        state,
        hidden: definition.referenced_body_ids().into_iter().collect(),
        completed_loops: Vec::new(),
        notes: Vec::new(),
    };

    let found = resolver.resolve_sequence(&definition.steps, 0, Honor::All, context, 0, true)?;
    let action = match found {
        None => NextAction::Complete,
        Some(found) if found.frames.is_empty() => NextAction::Advance(found.step),
        Some(found) => NextAction::LoopAdvance {
            step: found.step,
            frames: found.frames,
        },
    };

    Ok(Resolution {
        action,
        completed_loops: resolver.completed_loops,
        notes: resolver.notes,
    })
}

struct StepResolver<'a, 'r> {
    definition: &'a WorkflowDefinition,
    completed: &'r HashSet<&'r str>,
    state: &'r CarriedState,
    hidden: HashSet<&'a str>,
    completed_loops: Vec<String>,
    notes: Vec<String>,
}

impl<'a, 'r> StepResolver<'a, 'r> {
    fn resolve_sequence(
        &mut self,
        steps: &'a [WorkflowStep],
        start: usize,
        honor: Honor,
        context: &Map<String, Value>,
        depth: usize,
        top_level: bool,
    ) -> Result<Option<Found<'a>>, ResolveError> {
        for (position, step) in steps.iter().enumerate().skip(start) {
            let step_id = step.id();
            if top_level && self.hidden.contains(step_id) {
                continue;
            }
            let resuming_loop = match step {
                WorkflowStep::Loop(loop_step) if honor.resumes_at(position) => self.has_live_state(loop_step)?,
                _ => false,
            };
            if !resuming_loop && honor.is_done(position, step_id, self.completed) {
                continue;
            }
            if !evaluate_condition(step.condition(), context) {
                debug!(step_id, "step skipped by condition");
                continue;
            }

            match step {
                WorkflowStep::Plain(plain) => {
                    return Ok(Some(Found {
                        step: plain,
                        position,
                        frames: Vec::new(),
                    }));
                }
                WorkflowStep::Loop(loop_step) => {
                    let trusted = honor.trusts_nested_state(position);
                    let fallback = honor.fallback_for_nested(position);
                    if let Some(mut found) = self.resolve_loop(loop_step, context, depth, trusted, fallback)? {
                        found.position = position;
                        return Ok(Some(found));
                    }
                }
            }
        }
        Ok(None)
    }

    fn resolve_loop(
        &mut self,
        loop_step: &'a LoopStep,
        context: &Map<String, Value>,
        depth: usize,
        trusted: bool,
        fallback: Honor,
    ) -> Result<Option<Found<'a>>, ResolveError> {
        let body = self.loop_body(loop_step)?;

        let state = self.state;
        let echoed = if trusted { state.loop_state(&loop_step.id) } else { None };
        let position = match echoed {
            Some(entry) if entry.matches_body(body) => Some((entry.iteration, entry.step_index)),
            Some(entry) => {
                self.notes.push(format!(
                    "loop '{}' state points at '{}' (index {}) which does not match the body; restarting the loop",
                    loop_step.id, entry.current_step, entry.step_index
                ));
                None
            }
            None => None,
        };
        let (mut iteration, mut start, mut honor) = match position {
            Some((iteration, step_index)) => (iteration, step_index, Honor::From(step_index)),
            None => (0, 0, fallback),
        };

        loop {
            let scope = match decide_iteration(loop_step, iteration, context, &mut self.notes) {
                LoopDecision::Continue(scope) => scope,
                LoopDecision::Terminate(reason) => {
                    info!(
                        loop_id = %loop_step.id,
                        iteration,
                        max_iterations_reached = reason == Termination::MaxIterations,
                        "loop terminated"
                    );
                    if reason == Termination::MaxIterations {
                        self.notes
                            .push(format!("loop '{}' stopped after reaching maxIterations", loop_step.id));
                    }
                    self.completed_loops.push(loop_step.id.clone());
                    return Ok(None);
                }
            };

            let mut scoped_context = context.clone();
            scoped_context.extend(scope.variables.clone());

            if let Some(mut found) = self.resolve_sequence(body, start, honor, &scoped_context, depth + 1, false)? {
                debug!(loop_id = %loop_step.id, iteration, step_id = %found.step.id, "loop body step resolved");
                let frame = LoopFrame {
                    loop_id: loop_step.id.clone(),
                    depth,
                    iteration: scope.iteration,
                    index: scope.index,
                    total_items: scope.total_items,
                    step_index: found.position,
                    current_step: body[found.position].id().to_string(),
                    variables: scope.variables,
                };
                found.frames.insert(0, frame);
                return Ok(Some(found));
            }

            iteration += 1;
            start = 0;
            honor = Honor::Nothing;
        }
    }

    fn has_live_state(&self, loop_step: &'a LoopStep) -> Result<bool, ResolveError> {
        let body = self.loop_body(loop_step)?;
        Ok(self
            .state
            .loop_state(&loop_step.id)
            .is_some_and(|entry| entry.matches_body(body)))
    }

    fn loop_body(&self, loop_step: &'a LoopStep) -> Result<&'a [WorkflowStep], ResolveError> {
        match &loop_step.body {
            LoopBody::Inline(body) => Ok(body.as_slice()),
            LoopBody::Reference(target) => self
                .definition
                .top_level_step(target)
                .map(std::slice::from_ref)
                .ok_or_else(|| {
                    ResolveError::consistency(
                        &self.definition.id,
                        format!("loop '{}' references unknown step '{target}'", loop_step.id),
                    )
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(document: Value) -> WorkflowDefinition {
        serde_json::from_value(document).expect("parse definition")
    }

    fn resolve_with<'a>(
        definition: &'a WorkflowDefinition,
        completed: &[&str],
        context: Value,
    ) -> Resolution<'a> {
        let completed: HashSet<&str> = completed.iter().copied().collect();
        let context = context.as_object().cloned().expect("object context");
        let state = CarriedState::from_context(&context);
        resolve(definition, &completed, &context, &state).expect("resolution succeeds")
    }

    fn step_id<'a>(action: &NextAction<'a>) -> Option<&'a str> {
        match action {
            NextAction::Advance(step) | NextAction::LoopAdvance { step, .. } => Some(step.id.as_str()),
            NextAction::Complete => None,
        }
    }

    #[test]
    fn skips_completed_and_conditionally_false_steps() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [
                { "id": "a", "title": "A", "prompt": "p" },
                { "id": "b", "title": "B", "prompt": "p", "condition": { "var": "mode", "equals": "deep" } },
                { "id": "c", "title": "C", "prompt": "p" }
            ]
        }));

        let resolution = resolve_with(&workflow, &["a"], json!({ "mode": "quick" }));
        assert_eq!(step_id(&resolution.action), Some("c"));

        let resolution = resolve_with(&workflow, &["a", "c"], json!({}));
        assert_eq!(resolution.action, NextAction::Complete);
    }

    #[test]
    fn trusted_state_advances_iteration_after_final_body_step() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [{
                "id": "repeat", "type": "loop", "title": "Repeat",
                "loop": { "type": "for", "count": 3 },
                "body": [
                    { "id": "x", "title": "X", "prompt": "p" },
                    { "id": "y", "title": "Y", "prompt": "p" }
                ]
            }]
        }));

        let resolution = resolve_with(
            &workflow,
            &["x", "y"],
            json!({ "_loopState": { "repeat": { "iteration": 0, "stepIndex": 1, "currentStep": "y" } } }),
        );

        let NextAction::LoopAdvance { step, frames } = resolution.action else {
            panic!("expected loop advance");
        };
        assert_eq!(step.id, "x");
        assert_eq!(frames[0].iteration, 1);
        assert_eq!(frames[0].step_index, 0);
    }

    #[test]
    fn stale_completions_after_echoed_position_are_ignored() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [{
                "id": "repeat", "type": "loop", "title": "Repeat",
                "loop": { "type": "for", "count": 3 },
                "body": [
                    { "id": "x", "title": "X", "prompt": "p" },
                    { "id": "y", "title": "Y", "prompt": "p" }
                ]
            }]
        }));

        let resolution = resolve_with(
            &workflow,
            &["x", "y"],
            json!({ "_loopState": { "repeat": { "iteration": 1, "stepIndex": 0, "currentStep": "x" } } }),
        );

        let NextAction::LoopAdvance { step, frames } = resolution.action else {
            panic!("expected loop advance");
        };
        assert_eq!(step.id, "y");
        assert_eq!(frames[0].iteration, 1);
    }

    #[test]
    fn mismatching_state_restarts_loop_with_note() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [{
                "id": "repeat", "type": "loop", "title": "Repeat",
                "loop": { "type": "for", "count": 2 },
                "body": [{ "id": "x", "title": "X", "prompt": "p" }]
            }]
        }));

        let resolution = resolve_with(
            &workflow,
            &[],
            json!({ "_loopState": { "repeat": { "iteration": 1, "stepIndex": 0, "currentStep": "renamed" } } }),
        );

        let NextAction::LoopAdvance { frames, .. } = resolution.action else {
            panic!("expected loop advance");
        };
        assert_eq!(frames[0].iteration, 0);
        assert_eq!(resolution.notes.len(), 1);
    }

    #[test]
    fn nested_loops_report_outermost_frame_first() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [{
                "id": "outer", "type": "loop", "title": "Outer",
                "loop": { "type": "for", "count": 2 },
                "body": [{
                    "id": "inner", "type": "loop", "title": "Inner",
                    "loop": { "type": "forEach", "items": "files" },
                    "body": [{ "id": "edit", "title": "Edit", "prompt": "p" }]
                }]
            }]
        }));

        let resolution = resolve_with(&workflow, &[], json!({ "files": ["a", "b"] }));
        let NextAction::LoopAdvance { step, frames } = resolution.action else {
            panic!("expected loop advance");
        };
        assert_eq!(step.id, "edit");
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].loop_id.as_str(), frames[0].depth), ("outer", 0));
        assert_eq!((frames[1].loop_id.as_str(), frames[1].depth), ("inner", 1));
        assert_eq!(frames[0].current_step, "inner");
        assert_eq!(frames[1].variables.get("currentItem"), Some(&json!("a")));
    }

    #[test]
    fn referenced_body_is_hidden_from_top_level() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [
                { "id": "retry", "type": "loop", "title": "Retry", "loop": { "type": "for", "count": 1 }, "body": "attempt" },
                { "id": "attempt", "title": "Attempt", "prompt": "p" },
                { "id": "wrap", "title": "Wrap", "prompt": "p" }
            ]
        }));

        let resolution = resolve_with(
            &workflow,
            &["attempt"],
            json!({ "_loopState": { "retry": { "iteration": 0, "stepIndex": 0, "currentStep": "attempt" } } }),
        );

        assert_eq!(step_id(&resolution.action), Some("wrap"));
        assert_eq!(resolution.completed_loops, vec!["retry".to_string()]);
    }

    #[test]
    fn duplicate_ids_are_a_consistency_error() {
        let workflow = definition(json!({
            "id": "wf", "name": "Wf",
            "steps": [
                { "id": "a", "title": "A", "prompt": "p" },
                { "id": "l", "type": "loop", "title": "L", "loop": { "type": "for", "count": 1 }, "body": [{ "id": "a", "title": "A", "prompt": "p" }] }
            ]
        }));

        let error = resolve(&workflow, &HashSet::new(), &Map::new(), &CarriedState::default()).expect_err("duplicate ids");
        assert!(matches!(error, ResolveError::Consistency { .. }));
    }
}
