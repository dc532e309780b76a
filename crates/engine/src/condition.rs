//! Condition grammar, evaluation, and authoring-time validation.
//!
//! Step guards and `while`/`until` loop controls share one small JSON grammar:
//!
//! - leaf: `{ "var": name }` tests truthiness; adding exactly one of `equals`,
//!   `not_equals`, `gt`, `gte`, `lt`, `lte` compares the variable instead.
//! - composites: `{ "and": [..] }`, `{ "or": [..] }`, `{ "not": expr }`.
//!
//! Evaluation is total: any shape outside the grammar evaluates to `false`, and a
//! variable missing from the context fails every comparison. Strict rejection
//! happens only through [`validate_condition`], which authoring tools call when
//! a definition is loaded.

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Keys accepted anywhere in a condition tree.
pub const SUPPORTED_OPERATORS: [&str; 10] = ["var", "equals", "not_equals", "gt", "gte", "lt", "lte", "and", "or", "not"];

/// Authoring-time condition problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// Keys outside [`SUPPORTED_OPERATORS`], collected across the whole tree.
    #[error("Unsupported condition operators: {}", .0.join(", "))]
    UnsupportedOperators(Vec<String>),
    /// Supported keys arranged in a shape the grammar does not accept.
    #[error("Malformed condition: {0}")]
    Malformed(String),
}

impl ConditionError {
    fn malformed(message: impl Into<String>) -> Self {
        ConditionError::Malformed(message.into())
    }
}

/// Comparison applied to a leaf variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "equals" => Some(Comparator::Equals),
            "not_equals" => Some(Comparator::NotEquals),
            "gt" => Some(Comparator::Gt),
            "gte" => Some(Comparator::Gte),
            "lt" => Some(Comparator::Lt),
            "lte" => Some(Comparator::Lte),
            _ => None,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Comparator::Gt | Comparator::Gte | Comparator::Lt | Comparator::Lte)
    }
}

/// Parsed condition over the closed grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Top-level absent or empty guard.
    Always,
    Truthy { var: String },
    Compare { var: String, comparator: Comparator, operand: Value },
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    /// Parses a top-level guard. `null`, `{}` and `[]` mean "no guard".
    pub fn parse(expression: &Value) -> Result<Self, ConditionError> {
        if is_empty_guard(expression) {
            return Ok(Condition::Always);
        }
        parse_node(expression)
    }

    /// Evaluates the condition against the context.
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Truthy { var } => context.get(var).is_some_and(is_truthy),
            Condition::Compare { var, comparator, operand } => match context.get(var) {
                Some(value) => compare(value, *comparator, operand),
                None => false,
            },
            Condition::All(children) => children.iter().all(|child| child.evaluate(context)),
            Condition::Any(children) => children.iter().any(|child| child.evaluate(context)),
            Condition::Not(child) => !child.evaluate(context),
        }
    }
}

/// Evaluates an optional guard, treating every malformed shape as `false`.
pub fn evaluate_condition(expression: Option<&Value>, context: &Map<String, Value>) -> bool {
    let Some(expression) = expression else {
        return true;
    };
    match Condition::parse(expression) {
        Ok(condition) => condition.evaluate(context),
        Err(error) => {
            debug!(%error, "condition evaluated to false");
            false
        }
    }
}

/// Strict authoring-time check.
///
/// Reports every unsupported key found anywhere in the tree; when all keys are
/// supported, reports the first shape problem instead.
pub fn validate_condition(expression: &Value) -> Result<(), ConditionError> {
    let mut unsupported = Vec::new();
    collect_unsupported_keys(expression, &mut unsupported);
    if !unsupported.is_empty() {
        return Err(ConditionError::UnsupportedOperators(unsupported));
    }
    Condition::parse(expression).map(|_| ())
}

/// Truthiness: absent, `null`, `false`, `0` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|float| float != 0.0 && !float.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_empty_guard(expression: &Value) -> bool {
    match expression {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn parse_node(expression: &Value) -> Result<Condition, ConditionError> {
    let Value::Object(map) = expression else {
        return Err(ConditionError::malformed(format!("expected an object, found {expression}")));
    };
    if map.is_empty() {
        return Err(ConditionError::malformed("nested condition cannot be empty"));
    }
    if let Some(unknown) = map.keys().find(|key| !SUPPORTED_OPERATORS.contains(&key.as_str())) {
        return Err(ConditionError::malformed(format!("unknown key '{unknown}'")));
    }

    if let Some(variable) = map.get("var") {
        return parse_leaf(variable, map);
    }

    if map.len() != 1 {
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        return Err(ConditionError::malformed(format!(
            "logical condition must use exactly one operator, found {}",
            keys.join(", ")
        )));
    }

    if let Some(children) = map.get("and") {
        return parse_children("and", children).map(Condition::All);
    }
    if let Some(children) = map.get("or") {
        return parse_children("or", children).map(Condition::Any);
    }
    if let Some(child) = map.get("not") {
        return parse_node(child).map(|parsed| Condition::Not(Box::new(parsed)));
    }

    Err(ConditionError::malformed("comparison operator requires 'var'"))
}

fn parse_leaf(variable: &Value, map: &Map<String, Value>) -> Result<Condition, ConditionError> {
    let Value::String(var) = variable else {
        return Err(ConditionError::malformed("'var' must be a string"));
    };

    let mut comparison: Option<(Comparator, &Value)> = None;
    for (key, operand) in map {
        if key == "var" {
            continue;
        }
        let Some(comparator) = Comparator::from_key(key) else {
            return Err(ConditionError::malformed(format!("'{key}' cannot be combined with 'var'")));
        };
        if comparison.is_some() {
            return Err(ConditionError::malformed(format!("'{var}' uses more than one comparison")));
        }
        if comparator.is_numeric() && !operand.is_number() {
            return Err(ConditionError::malformed(format!("'{key}' requires a numeric operand")));
        }
        comparison = Some((comparator, operand));
    }

    Ok(match comparison {
        Some((comparator, operand)) => Condition::Compare {
            var: var.clone(),
            comparator,
            operand: operand.clone(),
        },
        None => Condition::Truthy { var: var.clone() },
    })
}

fn parse_children(operator: &str, children: &Value) -> Result<Vec<Condition>, ConditionError> {
    let Value::Array(items) = children else {
        return Err(ConditionError::malformed(format!("'{operator}' requires an array")));
    };
    items.iter().map(parse_node).collect()
}

fn compare(value: &Value, comparator: Comparator, operand: &Value) -> bool {
    match comparator {
        Comparator::Equals => values_equal(value, operand),
        Comparator::NotEquals => !values_equal(value, operand),
        numeric => {
            let (Some(left), Some(right)) = (value.as_f64(), operand.as_f64()) else {
                return false;
            };
            match numeric {
                Comparator::Gt => left > right,
                Comparator::Gte => left >= right,
                Comparator::Lt => left < right,
                Comparator::Lte => left <= right,
                Comparator::Equals | Comparator::NotEquals => false,
            }
        }
    }
}

/// Deep equality where numbers compare by value (`1` equals `1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => match (left.as_f64(), right.as_f64()) {
            (Some(left), Some(right)) => left == right,
            _ => left == right,
        },
        (Value::Array(left), Value::Array(right)) => {
            left.len() == right.len() && left.iter().zip(right).all(|(left, right)| values_equal(left, right))
        }
        (Value::Object(left), Value::Object(right)) => {
            left.len() == right.len()
                && left
                    .iter()
                    .all(|(key, value)| right.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}

fn collect_unsupported_keys(expression: &Value, unsupported: &mut Vec<String>) {
    let Value::Object(map) = expression else {
        return;
    };
    for (key, value) in map {
        if !SUPPORTED_OPERATORS.contains(&key.as_str()) {
            if !unsupported.contains(key) {
                unsupported.push(key.clone());
            }
            continue;
        }
        match key.as_str() {
            "and" | "or" => {
                if let Value::Array(children) = value {
                    children
                        .iter()
                        .for_each(|child| collect_unsupported_keys(child, unsupported));
                }
            }
            "not" => collect_unsupported_keys(value, unsupported),
            _ => {}
        }
    }
}
