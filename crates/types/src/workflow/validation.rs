//! Structural validation shared across workflow consumers.
//!
//! These routines check the shape of a definition before it is accepted by a
//! store or resolved by the engine: identifiers, required display fields,
//! loop control completeness, and the referenced-body graph. Condition syntax
//! is checked by the engine, which owns the condition grammar.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{LoopBody, LoopCount, LoopKind, LoopStep, MAX_ITERATIONS_LIMIT, WorkflowDefinition, WorkflowStep};

fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '-' || character == '_')
}

/// A single authoring problem found in a definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Location of the problem, e.g. `steps[1].loop.count`.
    pub path: String,
    /// Stable machine-readable code.
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Aggregated outcome of definition validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

/// Problem in the graph formed by referenced loop bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceProblem {
    /// A loop body names a step that is not in the top-level sequence.
    Unknown { loop_id: String, target: String },
    /// Several loops name the same top-level step as their body.
    Shared { target: String, loop_ids: Vec<String> },
    /// Following loop bodies from `chain[0]` leads back to it.
    Cycle { chain: Vec<String> },
}

impl std::fmt::Display for ReferenceProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceProblem::Unknown { loop_id, target } => {
                write!(f, "loop '{loop_id}' references unknown top-level step '{target}'")
            }
            ReferenceProblem::Shared { target, loop_ids } => {
                write!(f, "step '{target}' is the body of several loops: {}", loop_ids.join(", "))
            }
            ReferenceProblem::Cycle { chain } => write!(f, "loop body cycle: {}", chain.join(" -> ")),
        }
    }
}

/// Step ids that occur more than once in the flattened traversal order, in first-seen order.
pub fn duplicate_step_ids(definition: &WorkflowDefinition) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for identifier in definition.flattened_step_ids() {
        if !seen.insert(identifier) && !duplicates.iter().any(|existing: &String| existing == identifier) {
            duplicates.push(identifier.to_string());
        }
    }
    duplicates
}

/// Unknown referenced bodies and cycles among loops.
///
/// Edges run from a loop to the target of its referenced body and to every
/// loop nested in its inline body, so a cycle means resolution would recurse
/// without bound.
pub fn reference_problems(definition: &WorkflowDefinition) -> Vec<ReferenceProblem> {
    let top_level: HashSet<&str> = definition.steps.iter().map(WorkflowStep::id).collect();
    let mut problems = Vec::new();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    collect_loop_edges(&definition.steps, &top_level, &mut edges, &mut problems);

    let mut referrers: HashMap<&str, Vec<&str>> = HashMap::new();
    collect_body_referrers(&definition.steps, &mut referrers);
    let mut shared: Vec<(&str, Vec<&str>)> = referrers.into_iter().filter(|(_, loops)| loops.len() > 1).collect();
    shared.sort_unstable();
    for (target, loop_ids) in shared {
        problems.push(ReferenceProblem::Shared {
            target: target.to_string(),
            loop_ids: loop_ids.into_iter().map(str::to_string).collect(),
        });
    }

    let mut loop_ids: Vec<&str> = edges.keys().copied().collect();
    loop_ids.sort_unstable();
    let mut finished = HashSet::new();
    for loop_id in loop_ids {
        let mut chain = Vec::new();
        if let Some(cycle) = find_cycle(loop_id, &edges, &mut chain, &mut finished) {
            finished.extend(chain.iter().copied());
            problems.push(ReferenceProblem::Cycle { chain: cycle });
        }
    }
    problems
}

fn collect_loop_edges<'a>(
    steps: &'a [WorkflowStep],
    top_level: &HashSet<&str>,
    edges: &mut HashMap<&'a str, Vec<&'a str>>,
    problems: &mut Vec<ReferenceProblem>,
) {
    for step in steps {
        let WorkflowStep::Loop(loop_step) = step else {
            continue;
        };
        let targets = edges.entry(loop_step.id.as_str()).or_default();
        match &loop_step.body {
            LoopBody::Reference(target) => {
                if top_level.contains(target.as_str()) {
                    targets.push(target.as_str());
                } else {
                    problems.push(ReferenceProblem::Unknown {
                        loop_id: loop_step.id.clone(),
                        target: target.clone(),
                    });
                }
            }
            LoopBody::Inline(body) => {
                let mut nested = Vec::new();
                nested_loop_ids(body, &mut nested);
                targets.extend(nested);
                collect_loop_edges(body, top_level, edges, problems);
            }
        }
    }
}

fn collect_body_referrers<'a>(steps: &'a [WorkflowStep], referrers: &mut HashMap<&'a str, Vec<&'a str>>) {
    for step in steps {
        let WorkflowStep::Loop(loop_step) = step else {
            continue;
        };
        match &loop_step.body {
            LoopBody::Reference(target) => referrers.entry(target.as_str()).or_default().push(loop_step.id.as_str()),
            LoopBody::Inline(body) => collect_body_referrers(body, referrers),
        }
    }
}

fn nested_loop_ids<'a>(steps: &'a [WorkflowStep], identifiers: &mut Vec<&'a str>) {
    for step in steps {
        if let WorkflowStep::Loop(loop_step) = step {
            identifiers.push(loop_step.id.as_str());
        }
    }
}

fn find_cycle<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    chain: &mut Vec<&'a str>,
    finished: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    if let Some(position) = chain.iter().position(|entry| *entry == node) {
        let mut cycle: Vec<String> = chain[position..].iter().map(|entry| entry.to_string()).collect();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if finished.contains(node) {
        return None;
    }
    chain.push(node);
    if let Some(targets) = edges.get(node) {
        for target in targets {
            if let Some(cycle) = find_cycle(target, edges, chain, finished) {
                return Some(cycle);
            }
        }
    }
    chain.pop();
    finished.insert(node);
    None
}

/// Every condition in the tree together with its location.
pub fn collect_conditions(definition: &WorkflowDefinition) -> Vec<(String, &Value)> {
    let mut conditions = Vec::new();
    collect_sequence_conditions(&definition.steps, "steps", &mut conditions);
    conditions
}

fn collect_sequence_conditions<'a>(steps: &'a [WorkflowStep], prefix: &str, conditions: &mut Vec<(String, &'a Value)>) {
    for (index, step) in steps.iter().enumerate() {
        let path = format!("{prefix}[{index}]");
        if let Some(condition) = step.condition() {
            conditions.push((format!("{path}.condition"), condition));
        }
        if let WorkflowStep::Loop(loop_step) = step {
            if let Some(condition) = &loop_step.control.condition {
                conditions.push((format!("{path}.loop.condition"), condition));
            }
            if let LoopBody::Inline(body) = &loop_step.body {
                collect_sequence_conditions(body, &format!("{path}.body"), conditions);
            }
        }
    }
}

/// Runs every structural check and returns the issues found.
pub fn validate_structure(definition: &WorkflowDefinition) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if definition.id.trim().is_empty() {
        issues.push(ValidationIssue::new("id", "missing_id", "workflow id must not be empty"));
    } else if !is_valid_identifier(&definition.id) {
        issues.push(ValidationIssue::new(
            "id",
            "invalid_id",
            format!("workflow id '{}' may only contain letters, digits, '-' and '_'", definition.id),
        ));
    }
    if definition.name.trim().is_empty() {
        issues.push(ValidationIssue::new("name", "missing_name", "workflow name must not be empty"));
    }
    if definition.steps.is_empty() {
        issues.push(ValidationIssue::new("steps", "empty_steps", "workflow must declare at least one step"));
    }

    validate_sequence(&definition.steps, "steps", &mut issues);

    for duplicate in duplicate_step_ids(definition) {
        issues.push(ValidationIssue::new(
            "steps",
            "duplicate_id",
            format!("step id '{duplicate}' is declared more than once"),
        ));
    }
    for problem in reference_problems(definition) {
        let code = match problem {
            ReferenceProblem::Unknown { .. } => "unknown_body_reference",
            ReferenceProblem::Shared { .. } => "shared_body_reference",
            ReferenceProblem::Cycle { .. } => "body_reference_cycle",
        };
        issues.push(ValidationIssue::new("steps", code, problem.to_string()));
    }

    issues
}

fn validate_sequence(steps: &[WorkflowStep], prefix: &str, issues: &mut Vec<ValidationIssue>) {
    for (index, step) in steps.iter().enumerate() {
        let path = format!("{prefix}[{index}]");
        let identifier = step.id();
        if identifier.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("{path}.id"), "missing_id", "step id must not be empty"));
        } else if !is_valid_identifier(identifier) {
            issues.push(ValidationIssue::new(
                format!("{path}.id"),
                "invalid_id",
                format!("step id '{identifier}' may only contain letters, digits, '-' and '_'"),
            ));
        }
        if step.title().trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("{path}.title"),
                "missing_title",
                format!("step '{identifier}' must have a title"),
            ));
        }

        match step {
            WorkflowStep::Plain(plain) => {
                if plain.prompt.trim().is_empty() {
                    issues.push(ValidationIssue::new(
                        format!("{path}.prompt"),
                        "missing_prompt",
                        format!("step '{identifier}' must have a prompt"),
                    ));
                }
            }
            WorkflowStep::Loop(loop_step) => validate_loop(loop_step, &path, issues),
        }
    }
}

fn validate_loop(loop_step: &LoopStep, path: &str, issues: &mut Vec<ValidationIssue>) {
    let control = &loop_step.control;
    let control_path = format!("{path}.loop");

    match control.kind {
        LoopKind::While | LoopKind::Until => {
            if control.condition.is_none() {
                issues.push(ValidationIssue::new(
                    format!("{control_path}.condition"),
                    "missing_loop_condition",
                    format!("{} loop '{}' requires a condition", control.kind.as_str(), loop_step.id),
                ));
            }
        }
        LoopKind::For => match &control.count {
            None => issues.push(ValidationIssue::new(
                format!("{control_path}.count"),
                "missing_loop_count",
                format!("for loop '{}' requires a count", loop_step.id),
            )),
            Some(LoopCount::Variable(name)) if name.trim().is_empty() => issues.push(ValidationIssue::new(
                format!("{control_path}.count"),
                "missing_loop_count",
                format!("for loop '{}' names an empty count variable", loop_step.id),
            )),
            Some(_) => {}
        },
        LoopKind::ForEach => {
            if control.items.as_deref().is_none_or(|items| items.trim().is_empty()) {
                issues.push(ValidationIssue::new(
                    format!("{control_path}.items"),
                    "missing_loop_items",
                    format!("forEach loop '{}' requires an items variable", loop_step.id),
                ));
            }
        }
    }

    if control.max_iterations == 0 || control.max_iterations > MAX_ITERATIONS_LIMIT {
        issues.push(ValidationIssue::new(
            format!("{control_path}.maxIterations"),
            "max_iterations_out_of_range",
            format!(
                "loop '{}' maxIterations must be between 1 and {MAX_ITERATIONS_LIMIT}, got {}",
                loop_step.id, control.max_iterations
            ),
        ));
    }

    match &loop_step.body {
        LoopBody::Inline(body) if body.is_empty() => issues.push(ValidationIssue::new(
            format!("{path}.body"),
            "empty_loop_body",
            format!("loop '{}' must declare at least one body step", loop_step.id),
        )),
        LoopBody::Inline(body) => validate_sequence(body, &format!("{path}.body"), issues),
        LoopBody::Reference(target) if target.trim().is_empty() => issues.push(ValidationIssue::new(
            format!("{path}.body"),
            "empty_loop_body",
            format!("loop '{}' references an empty step id", loop_step.id),
        )),
        LoopBody::Reference(_) => {}
    }
}
