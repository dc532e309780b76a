//! Strongly typed workflow definition schema shared by the engine, the stores, and the MCP server.
//!
//! Definitions are authored as JSON or YAML documents with camelCase keys. A definition is an
//! ordered list of steps; each step is either a plain step (one unit of guidance presented to
//! the caller) or a loop step whose body is repeated until its loop control says otherwise.
//! Conditions are kept as raw JSON so the engine can evaluate arbitrary, possibly malformed,
//! expressions without failing deserialization.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

/// Default safety bound applied to loops that do not declare `maxIterations`.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;
/// Largest `maxIterations` accepted at authoring time.
pub const MAX_ITERATIONS_LIMIT: u32 = 1000;
/// Default name of the 1-based iteration counter injected into the context.
pub const DEFAULT_ITERATION_VAR: &str = "currentIteration";
/// Default name of the current collection element injected for `forEach` loops.
pub const DEFAULT_ITEM_VAR: &str = "currentItem";
/// Default name of the 0-based collection cursor injected for `forEach` loops.
pub const DEFAULT_INDEX_VAR: &str = "currentIndex";

/// Describes an authored workflow: metadata plus an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Canonical workflow identifier used for lookups.
    pub id: String,
    /// Human-readable name shown in listings.
    #[serde(default)]
    pub name: String,
    /// Descriptive copy surfaced by `workflow_list`.
    #[serde(default)]
    pub description: String,
    /// Optional authoring version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Conditions the caller should confirm before starting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preconditions: Vec<String>,
    /// Questions the caller should ask the user before starting.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_prompts: Vec<String>,
    /// Workflow-wide guidance applied to every step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta_guidance: Vec<String>,
    /// Ordered steps; order is the default execution order.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

/// A single step node: either a plain step or a loop.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum WorkflowStep {
    /// Repeats a body of steps under loop control.
    Loop(LoopStep),
    /// One unit of guidance presented to the caller.
    Plain(PlainStep),
}

impl WorkflowStep {
    /// Identifier of the step regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            WorkflowStep::Loop(step) => &step.id,
            WorkflowStep::Plain(step) => &step.id,
        }
    }

    /// Eligibility guard, when present.
    pub fn condition(&self) -> Option<&JsonValue> {
        match self {
            WorkflowStep::Loop(step) => step.condition.as_ref(),
            WorkflowStep::Plain(step) => step.condition.as_ref(),
        }
    }

    /// Display title regardless of variant.
    pub fn title(&self) -> &str {
        match self {
            WorkflowStep::Loop(step) => &step.title,
            WorkflowStep::Plain(step) => &step.title,
        }
    }

    pub fn as_loop(&self) -> Option<&LoopStep> {
        match self {
            WorkflowStep::Loop(step) => Some(step),
            WorkflowStep::Plain(_) => None,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, WorkflowStep::Loop(_))
    }
}

impl<'de> Deserialize<'de> for WorkflowStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Dispatch on the `type` marker so loop documents report loop-specific errors
        // instead of silently degrading into plain steps.
        let document = JsonValue::deserialize(deserializer)?;
        let is_loop = document.get("type").and_then(JsonValue::as_str) == Some("loop");
        if is_loop {
            serde_json::from_value::<LoopStep>(document)
                .map(WorkflowStep::Loop)
                .map_err(serde::de::Error::custom)
        } else {
            serde_json::from_value::<PlainStep>(document)
                .map(WorkflowStep::Plain)
                .map_err(serde::de::Error::custom)
        }
    }
}

/// A plain step presented to the caller as the next action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlainStep {
    /// Step identifier, unique across the workflow.
    pub id: String,
    /// Short display title.
    #[serde(default)]
    pub title: String,
    /// Opaque instruction text shown to the caller.
    #[serde(default)]
    pub prompt: String,
    /// Eligibility guard evaluated against the caller context.
    #[serde(default, alias = "runCondition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<JsonValue>,
    /// Role description prepended to the composed prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    /// Bullet-point guidance rendered above the prompt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guidance: Vec<String>,
    /// Hints that the caller should request files from the user.
    #[serde(default)]
    pub ask_for_files: bool,
    /// Hints that the caller should confirm with the user before moving on.
    #[serde(default)]
    pub require_confirmation: bool,
    /// Criteria used by step output validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_criteria: Option<JsonValue>,
}

/// Marker for the `type: loop` discriminator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopMarker {
    #[default]
    Loop,
}

/// A step that repeats its body under loop control.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopStep {
    /// Step identifier, unique across the workflow.
    pub id: String,
    #[serde(rename = "type")]
    pub marker: LoopMarker,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub prompt: String,
    /// Eligibility guard; when false the whole loop is skipped.
    #[serde(default, alias = "runCondition", skip_serializing_if = "Option::is_none")]
    pub condition: Option<JsonValue>,
    /// Iteration control.
    #[serde(rename = "loop")]
    pub control: LoopConfig,
    /// Steps repeated on each iteration.
    pub body: LoopBody,
}

/// Body of a loop: inline steps, or the id of a top-level step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LoopBody {
    /// Reference to a top-level step that only runs inside this loop.
    Reference(String),
    /// Inline ordered steps.
    Inline(Vec<WorkflowStep>),
}

/// Supported loop control strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LoopKind {
    /// Active while the condition is true.
    While,
    /// Active while the exit condition is false.
    Until,
    /// Active for a fixed number of iterations.
    For,
    /// Active once per element of a context collection.
    ForEach,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::While => "while",
            LoopKind::Until => "until",
            LoopKind::For => "for",
            LoopKind::ForEach => "forEach",
        }
    }
}

/// Iteration count for `for` loops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LoopCount {
    /// Count fixed in the definition.
    Fixed(u64),
    /// Name of a numeric context variable holding the count.
    Variable(String),
}

/// Loop control metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoopConfig {
    #[serde(rename = "type")]
    pub kind: LoopKind,
    /// Continuation (`while`) or exit (`until`) condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<JsonValue>,
    /// Iteration count for `for` loops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<LoopCount>,
    /// Context variable holding the collection for `forEach` loops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
    /// Hard bound on iterations for every loop kind.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_var: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,
}

impl LoopConfig {
    /// Name of the context variable receiving the 1-based iteration number.
    pub fn iteration_var(&self) -> &str {
        self.iteration_var.as_deref().unwrap_or(DEFAULT_ITERATION_VAR)
    }

    /// Name of the context variable receiving the current collection element.
    pub fn item_var(&self) -> &str {
        self.item_var.as_deref().unwrap_or(DEFAULT_ITEM_VAR)
    }

    /// Name of the context variable receiving the 0-based collection cursor.
    pub fn index_var(&self) -> &str {
        self.index_var.as_deref().unwrap_or(DEFAULT_INDEX_VAR)
    }

    /// Every context variable this loop writes while active.
    pub fn injected_variables(&self) -> Vec<&str> {
        match self.kind {
            LoopKind::ForEach => vec![self.iteration_var(), self.item_var(), self.index_var()],
            _ => vec![self.iteration_var()],
        }
    }
}

/// Lightweight listing entry for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl WorkflowDefinition {
    /// Builds the listing entry for this definition.
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            version: self.version.clone(),
        }
    }

    /// Finds a top-level step by id.
    pub fn top_level_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|step| step.id() == step_id)
    }

    /// Ids of top-level steps named by some loop's referenced body.
    pub fn referenced_body_ids(&self) -> Vec<&str> {
        let mut referenced = Vec::new();
        collect_referenced_bodies(&self.steps, &mut referenced);
        referenced
    }

    /// Finds a step anywhere in the tree, including inline loop bodies.
    pub fn find_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        find_in_sequence(&self.steps, step_id)
    }

    /// Every step id in flattened traversal order; referenced bodies are visited once.
    pub fn flattened_step_ids(&self) -> Vec<&str> {
        let mut identifiers = Vec::new();
        flatten_sequence(&self.steps, &mut identifiers);
        identifiers
    }

    /// Every loop config in the tree.
    pub fn loop_configs(&self) -> Vec<&LoopConfig> {
        let mut configs = Vec::new();
        collect_loop_configs(&self.steps, &mut configs);
        configs
    }
}

fn collect_referenced_bodies<'a>(steps: &'a [WorkflowStep], referenced: &mut Vec<&'a str>) {
    for step in steps {
        if let WorkflowStep::Loop(loop_step) = step {
            match &loop_step.body {
                LoopBody::Reference(identifier) => referenced.push(identifier.as_str()),
                LoopBody::Inline(body) => collect_referenced_bodies(body, referenced),
            }
        }
    }
}

fn find_in_sequence<'a>(steps: &'a [WorkflowStep], step_id: &str) -> Option<&'a WorkflowStep> {
    for step in steps {
        if step.id() == step_id {
            return Some(step);
        }
        if let WorkflowStep::Loop(loop_step) = step
            && let LoopBody::Inline(body) = &loop_step.body
            && let Some(found) = find_in_sequence(body, step_id)
        {
            return Some(found);
        }
    }
    None
}

fn flatten_sequence<'a>(steps: &'a [WorkflowStep], identifiers: &mut Vec<&'a str>) {
    for step in steps {
        identifiers.push(step.id());
        if let WorkflowStep::Loop(loop_step) = step
            && let LoopBody::Inline(body) = &loop_step.body
        {
            flatten_sequence(body, identifiers);
        }
    }
}

fn collect_loop_configs<'a>(steps: &'a [WorkflowStep], configs: &mut Vec<&'a LoopConfig>) {
    for step in steps {
        if let WorkflowStep::Loop(loop_step) = step {
            configs.push(&loop_step.control);
            if let LoopBody::Inline(body) = &loop_step.body {
                collect_loop_configs(body, configs);
            }
        }
    }
}

const fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
