//! Loop activity decisions.
//!
//! Given a loop step, the iteration about to start, and the pre-iteration
//! context, decide whether the loop runs another iteration and which loop
//! variables that iteration exposes. The decision is pure; the resolver owns
//! the walk over the body.

use serde_json::{Map, Value};
use stepwise_types::workflow::MAX_ITERATIONS_LIMIT;
use stepwise_types::{LoopCount, LoopKind, LoopStep};
use tracing::warn;

use crate::condition::evaluate_condition;

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `maxIterations` reached before the loop's own predicate turned false.
    MaxIterations,
    /// The kind-specific predicate turned false.
    Exhausted,
}

/// Variables and bookkeeping for one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationScope {
    /// 0-based iteration number.
    pub iteration: u32,
    /// Collection cursor for `forEach` loops.
    pub index: Option<u32>,
    /// Collection length for `forEach` loops.
    pub total_items: Option<usize>,
    /// Loop variables injected for this iteration.
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopDecision {
    Continue(IterationScope),
    Terminate(Termination),
}

/// Effective iteration bound, clamped to the authoring limits.
pub fn iteration_bound(loop_step: &LoopStep) -> u32 {
    loop_step.control.max_iterations.clamp(1, MAX_ITERATIONS_LIMIT)
}

/// Decides whether `iteration` runs, checking the bound before the loop predicate.
pub fn decide_iteration(loop_step: &LoopStep, iteration: u32, context: &Map<String, Value>, notes: &mut Vec<String>) -> LoopDecision {
    let control = &loop_step.control;
    let bound = iteration_bound(loop_step);
    if iteration >= bound {
        warn!(loop_id = %loop_step.id, iteration, max_iterations = bound, "loop stopped at max iterations");
        return LoopDecision::Terminate(Termination::MaxIterations);
    }

    let mut variables = Map::new();
    variables.insert(control.iteration_var().to_string(), Value::from(iteration + 1));

    match control.kind {
        LoopKind::While => {
            if !evaluate_condition(control.condition.as_ref(), context) {
                return LoopDecision::Terminate(Termination::Exhausted);
            }
        }
        LoopKind::Until => {
            if evaluate_condition(control.condition.as_ref(), context) {
                return LoopDecision::Terminate(Termination::Exhausted);
            }
        }
        LoopKind::For => {
            let count = resolve_count(loop_step, context, notes);
            if u64::from(iteration) >= count {
                return LoopDecision::Terminate(Termination::Exhausted);
            }
        }
        LoopKind::ForEach => {
            let items = resolve_items(loop_step, context, notes);
            let Some(item) = items.get(iteration as usize) else {
                return LoopDecision::Terminate(Termination::Exhausted);
            };
            variables.insert(control.item_var().to_string(), item.clone());
            variables.insert(control.index_var().to_string(), Value::from(iteration));
            return LoopDecision::Continue(IterationScope {
                iteration,
                index: Some(iteration),
                total_items: Some(items.len()),
                variables,
            });
        }
    }

    LoopDecision::Continue(IterationScope {
        iteration,
        index: None,
        total_items: None,
        variables,
    })
}

fn resolve_count(loop_step: &LoopStep, context: &Map<String, Value>, notes: &mut Vec<String>) -> u64 {
    match &loop_step.control.count {
        Some(LoopCount::Fixed(count)) => *count,
        Some(LoopCount::Variable(name)) => match context.get(name).and_then(Value::as_f64) {
            Some(count) if count >= 0.0 => count.floor() as u64,
            Some(_) | None => {
                notes.push(format!(
                    "loop '{}' count variable '{name}' is missing or not a non-negative number; running zero iterations",
                    loop_step.id
                ));
                0
            }
        },
        None => {
            notes.push(format!("loop '{}' has no count; running zero iterations", loop_step.id));
            0
        }
    }
}

fn resolve_items<'c>(loop_step: &LoopStep, context: &'c Map<String, Value>, notes: &mut Vec<String>) -> &'c [Value] {
    let Some(name) = loop_step.control.items.as_deref() else {
        notes.push(format!("loop '{}' has no items variable; running zero iterations", loop_step.id));
        return &[];
    };
    match context.get(name) {
        None | Some(Value::Null) => &[],
        Some(Value::Array(items)) => items,
        Some(_) => {
            notes.push(format!(
                "loop '{}' items variable '{name}' is not an array; running zero iterations",
                loop_step.id
            ));
            &[]
        }
    }
}
