//! Step output validation against `validationCriteria`.
//!
//! Criteria are either an array of rules, all of which apply, or a composition
//! using `and`, `or` and `not` over rules and nested compositions. Supported
//! rule types are `contains`, `regex` and `length`. A rule carrying a
//! `condition` that evaluates to false is skipped and counts as satisfied.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stepwise_types::{WorkflowDefinition, WorkflowStep};
use tracing::debug;

use crate::condition::evaluate_condition;
use crate::error::ResolveError;

const REVIEW_SUGGESTION: &str = "Review validation criteria and adjust output accordingly.";
const EMPTY_OUTPUT_ISSUE: &str = "Output is empty or invalid.";
const EMPTY_OUTPUT_SUGGESTION: &str = "Provide valid output content.";
const COMPOSITION_FAILED_ISSUE: &str = "Validation composition failed";

/// Outcome of validating one step output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputValidation {
    pub valid: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl OutputValidation {
    fn from_issues(issues: Vec<String>, suggestion: &str) -> Self {
        let valid = issues.is_empty();
        Self {
            valid,
            issues,
            suggestions: if valid { Vec::new() } else { vec![suggestion.to_string()] },
        }
    }
}

#[derive(Debug, Clone)]
enum RuleKind {
    Contains(String),
    Regex { pattern: String, regex: Regex },
    Length { min: Option<usize>, max: Option<usize> },
}

#[derive(Debug, Clone)]
struct Rule {
    kind: RuleKind,
    message: Option<String>,
    condition: Option<Value>,
}

#[derive(Debug, Clone)]
enum Criterion {
    Rule(Rule),
    And(Vec<Criterion>),
    Or(Vec<Criterion>),
    Not(Box<Criterion>),
    /// `{}`: always satisfied.
    Empty,
}

/// Parsed validation criteria.
#[derive(Debug, Clone)]
pub struct Criteria {
    root: CriteriaRoot,
}

#[derive(Debug, Clone)]
enum CriteriaRoot {
    Rules(Vec<Rule>),
    Composition(Criterion),
}

impl Criteria {
    /// Parses raw `validationCriteria`, rejecting unknown rule types and invalid patterns.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let root = match raw {
            Value::Array(rules) => CriteriaRoot::Rules(rules.iter().map(parse_rule).collect::<Result<_, _>>()?),
            Value::Object(map) if map.contains_key("type") => {
                return Err("top-level criteria must be an array of rules or an and/or/not composition".into());
            }
            Value::Object(_) => CriteriaRoot::Composition(parse_criterion(raw)?),
            other => return Err(format!("criteria must be an array or an object, found {other}")),
        };
        Ok(Self { root })
    }

    /// Every rule condition, for authoring-time condition validation.
    pub fn conditions(&self) -> Vec<&Value> {
        let mut conditions = Vec::new();
        match &self.root {
            CriteriaRoot::Rules(rules) => conditions.extend(rules.iter().filter_map(|rule| rule.condition.as_ref())),
            CriteriaRoot::Composition(criterion) => collect_conditions(criterion, &mut conditions),
        }
        conditions
    }

    /// Validates an output under the given context.
    pub fn evaluate(&self, output: &str, context: &Map<String, Value>) -> OutputValidation {
        match &self.root {
            CriteriaRoot::Rules(rules) if rules.is_empty() => validate_non_blank(output),
            CriteriaRoot::Rules(rules) => {
                let mut issues = Vec::new();
                for rule in rules {
                    if !rule_applies(rule, context) {
                        continue;
                    }
                    rule_issues(rule, output, &mut issues);
                }
                OutputValidation::from_issues(issues, REVIEW_SUGGESTION)
            }
            CriteriaRoot::Composition(criterion) => {
                let issues = if criterion_holds(criterion, output, context) {
                    Vec::new()
                } else {
                    vec![COMPOSITION_FAILED_ISSUE.to_string()]
                };
                OutputValidation::from_issues(issues, REVIEW_SUGGESTION)
            }
        }
    }
}

/// Validates the output a caller produced for a step.
pub fn validate_step_output(
    definition: &WorkflowDefinition,
    step_id: &str,
    output: &str,
    context: &Map<String, Value>,
) -> Result<OutputValidation, ResolveError> {
    let step = definition
        .find_step(step_id)
        .ok_or_else(|| ResolveError::step_not_found(&definition.id, step_id))?;

    let raw_criteria = match step {
        WorkflowStep::Plain(plain) => plain.validation_criteria.as_ref(),
        WorkflowStep::Loop(_) => None,
    };
    let Some(raw_criteria) = raw_criteria.filter(|raw| !raw.is_null()) else {
        return Ok(validate_non_blank(output));
    };

    let criteria = Criteria::parse(raw_criteria).map_err(|reason| ResolveError::invalid_criteria(step_id, reason))?;
    let result = criteria.evaluate(output, context);
    debug!(workflow_id = %definition.id, step_id, valid = result.valid, "step output validated");
    Ok(result)
}

fn validate_non_blank(output: &str) -> OutputValidation {
    let issues = if output.trim().is_empty() {
        vec![EMPTY_OUTPUT_ISSUE.to_string()]
    } else {
        Vec::new()
    };
    OutputValidation::from_issues(issues, EMPTY_OUTPUT_SUGGESTION)
}

fn parse_criterion(raw: &Value) -> Result<Criterion, String> {
    let Value::Object(map) = raw else {
        return Err(format!("criterion must be an object, found {raw}"));
    };
    if map.contains_key("type") {
        return parse_rule(raw).map(Criterion::Rule);
    }
    if map.is_empty() {
        return Ok(Criterion::Empty);
    }
    if map.len() != 1 {
        return Err("composition must use exactly one of 'and', 'or', 'not'".into());
    }
    if let Some(children) = map.get("and") {
        return parse_children("and", children).map(Criterion::And);
    }
    if let Some(children) = map.get("or") {
        return parse_children("or", children).map(Criterion::Or);
    }
    if let Some(child) = map.get("not") {
        return parse_criterion(child).map(|parsed| Criterion::Not(Box::new(parsed)));
    }
    Err(format!(
        "unknown composition operator '{}'",
        map.keys().next().map(String::as_str).unwrap_or_default()
    ))
}

fn parse_children(operator: &str, raw: &Value) -> Result<Vec<Criterion>, String> {
    let Value::Array(children) = raw else {
        return Err(format!("'{operator}' requires an array"));
    };
    children.iter().map(parse_criterion).collect()
}

fn parse_rule(raw: &Value) -> Result<Rule, String> {
    let Value::Object(map) = raw else {
        return Err(format!("rule must be an object, found {raw}"));
    };
    let rule_type = map.get("type").and_then(Value::as_str).unwrap_or_default();
    let message = map.get("message").and_then(Value::as_str).map(str::to_string);
    let condition = map.get("condition").filter(|condition| !condition.is_null()).cloned();

    let kind = match rule_type {
        "contains" => {
            let value = map
                .get("value")
                .and_then(Value::as_str)
                .ok_or("contains rule requires a string 'value'")?;
            RuleKind::Contains(value.to_string())
        }
        "regex" => {
            let pattern = map
                .get("pattern")
                .and_then(Value::as_str)
                .ok_or("regex rule requires a string 'pattern'")?;
            let flags = map.get("flags").and_then(Value::as_str).unwrap_or_default();
            RuleKind::Regex {
                pattern: pattern.to_string(),
                regex: build_regex(pattern, flags)?,
            }
        }
        "length" => RuleKind::Length {
            min: parse_bound(map, "min")?,
            max: parse_bound(map, "max")?,
        },
        "schema" => return Err("schema rules are not supported".into()),
        "" => return Err("rule requires a 'type'".into()),
        other => return Err(format!("unknown rule type '{other}'")),
    };

    Ok(Rule { kind, message, condition })
}

fn parse_bound(map: &Map<String, Value>, key: &str) -> Result<Option<usize>, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|bound| Some(bound as usize))
            .ok_or_else(|| format!("length '{key}' must be a non-negative integer")),
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, String> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(format!("unsupported regex flag '{other}'")),
        };
    }
    builder
        .build()
        .map_err(|error| format!("invalid regex pattern '{pattern}': {error}"))
}

fn rule_applies(rule: &Rule, context: &Map<String, Value>) -> bool {
    evaluate_condition(rule.condition.as_ref(), context)
}

fn rule_issues(rule: &Rule, output: &str, issues: &mut Vec<String>) {
    let mut fail = |default: String| issues.push(rule.message.clone().unwrap_or(default));
    match &rule.kind {
        RuleKind::Contains(value) => {
            if !output.contains(value.as_str()) {
                fail(format!("Output must include \"{value}\""));
            }
        }
        RuleKind::Regex { pattern, regex } => {
            if !regex.is_match(output) {
                fail(format!("Pattern mismatch: {pattern}"));
            }
        }
        RuleKind::Length { min, max } => {
            let length = output.chars().count();
            if let Some(min) = min
                && length < *min
            {
                fail(format!("Output shorter than minimum length {min}"));
            }
            if let Some(max) = max
                && length > *max
            {
                fail(format!("Output exceeds maximum length {max}"));
            }
        }
    }
}

fn criterion_holds(criterion: &Criterion, output: &str, context: &Map<String, Value>) -> bool {
    match criterion {
        Criterion::Empty => true,
        Criterion::Rule(rule) => {
            if !rule_applies(rule, context) {
                return true;
            }
            let mut issues = Vec::new();
            rule_issues(rule, output, &mut issues);
            issues.is_empty()
        }
        Criterion::And(children) => children.iter().all(|child| criterion_holds(child, output, context)),
        Criterion::Or(children) => children.iter().any(|child| criterion_holds(child, output, context)),
        Criterion::Not(child) => !criterion_holds(child, output, context),
    }
}

fn collect_conditions<'a>(criterion: &'a Criterion, conditions: &mut Vec<&'a Value>) {
    match criterion {
        Criterion::Empty => {}
        Criterion::Rule(rule) => conditions.extend(rule.condition.as_ref()),
        Criterion::And(children) | Criterion::Or(children) => {
            children.iter().for_each(|child| collect_conditions(child, conditions));
        }
        Criterion::Not(child) => collect_conditions(child, conditions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(criteria: Value) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "id": "wf", "name": "Wf",
            "steps": [
                { "id": "write", "title": "Write", "prompt": "Write it", "validationCriteria": criteria },
                { "id": "free", "title": "Free", "prompt": "Anything" }
            ]
        }))
        .expect("parse definition")
    }

    #[test]
    fn missing_criteria_require_non_blank_output() {
        let definition = workflow(Value::Null);

        let blank = validate_step_output(&definition, "free", "   ", &Map::new()).expect("validate");
        assert!(!blank.valid);
        assert_eq!(blank.issues, vec![EMPTY_OUTPUT_ISSUE.to_string()]);
        assert_eq!(blank.suggestions, vec![EMPTY_OUTPUT_SUGGESTION.to_string()]);

        assert!(validate_step_output(&definition, "write", "done", &Map::new()).expect("validate").valid);
    }

    #[test]
    fn rule_array_collects_every_failure() {
        let definition = workflow(json!([
            { "type": "contains", "value": "Summary" },
            { "type": "regex", "pattern": "^result:", "flags": "im", "message": "Start with a result line" },
            { "type": "length", "min": 10, "max": 40 }
        ]));

        let result = validate_step_output(&definition, "write", "short", &Map::new()).expect("validate");
        assert!(!result.valid);
        assert_eq!(
            result.issues,
            vec![
                "Output must include \"Summary\"".to_string(),
                "Start with a result line".to_string(),
                "Output shorter than minimum length 10".to_string(),
            ]
        );
        assert_eq!(result.suggestions, vec![REVIEW_SUGGESTION.to_string()]);

        let result = validate_step_output(&definition, "write", "notes\nRESULT: ok. Summary", &Map::new()).expect("validate");
        assert!(result.valid, "{:?}", result.issues);
    }

    #[test]
    fn conditional_rules_are_skipped_when_false() {
        let definition = workflow(json!([
            { "type": "contains", "value": "tests", "condition": { "var": "strict" } }
        ]));

        let relaxed = json!({ "strict": false }).as_object().cloned().expect("object");
        assert!(validate_step_output(&definition, "write", "done", &relaxed).expect("validate").valid);

        let strict = json!({ "strict": true }).as_object().cloned().expect("object");
        assert!(!validate_step_output(&definition, "write", "done", &strict).expect("validate").valid);
    }

    #[test]
    fn compositions_combine_rules() {
        let definition = workflow(json!({
            "or": [
                { "type": "contains", "value": "approved" },
                { "and": [{ "type": "contains", "value": "rejected" }, { "not": { "type": "length", "max": 8 } }] }
            ]
        }));

        assert!(validate_step_output(&definition, "write", "approved", &Map::new()).expect("validate").valid);
        assert!(validate_step_output(&definition, "write", "rejected: missing tests", &Map::new()).expect("validate").valid);
        let failed = validate_step_output(&definition, "write", "rejected", &Map::new()).expect("validate");
        assert_eq!(failed.issues, vec![COMPOSITION_FAILED_ISSUE.to_string()]);
    }

    #[test]
    fn invalid_pattern_and_unknown_step_are_distinct_errors() {
        let definition = workflow(json!([{ "type": "regex", "pattern": "(unclosed" }]));

        let error = validate_step_output(&definition, "write", "x", &Map::new()).expect_err("invalid regex");
        assert!(matches!(error, ResolveError::InvalidCriteria { .. }));

        let error = validate_step_output(&definition, "ghost", "x", &Map::new()).expect_err("unknown step");
        assert!(matches!(error, ResolveError::StepNotFound { .. }));
    }
}
