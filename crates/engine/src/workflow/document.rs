//! Workflow document parsing and authoring-time validation.
//!
//! Definitions are authored as JSON or YAML. Parsing only checks that the
//! document deserializes; [`validate_definition`] layers structural checks,
//! condition syntax, and validation-criteria checks into one report.

use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use stepwise_types::workflow::validation::{collect_conditions, validate_structure};
use stepwise_types::{LoopBody, ValidationIssue, ValidationReport, WorkflowDefinition, WorkflowStep};

use crate::condition::validate_condition;
use crate::output_validation::Criteria;

/// Serialization format of a workflow document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Json,
    Yaml,
}

impl DefinitionFormat {
    /// Detects the format from a file extension (`json`, `yaml`, `yml`).
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(DefinitionFormat::Json),
            "yaml" | "yml" => Some(DefinitionFormat::Yaml),
            _ => None,
        }
    }
}

/// Parses a definition from text in the given format.
pub fn parse_definition_str(content: &str, format: DefinitionFormat) -> Result<WorkflowDefinition> {
    let definition = match format {
        DefinitionFormat::Json => serde_json::from_str(content).context("failed to parse workflow JSON")?,
        DefinitionFormat::Yaml => serde_yaml::from_str(content).context("failed to parse workflow YAML")?,
    };
    Ok(definition)
}

/// Reads and parses a definition file, detecting the format from its extension.
pub fn parse_definition_file(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let path = path.as_ref();
    let Some(format) = DefinitionFormat::from_path(path) else {
        bail!(
            "unsupported workflow file extension for {}; expected .json, .yaml or .yml",
            path.display()
        );
    };
    let content = fs::read_to_string(path).with_context(|| format!("failed to read workflow file {}", path.display()))?;
    parse_definition_str(&content, format).with_context(|| format!("invalid workflow file {}", path.display()))
}

/// Runs every authoring-time check and returns a report.
pub fn validate_definition(definition: &WorkflowDefinition) -> ValidationReport {
    let mut issues = validate_structure(definition);

    for (path, condition) in collect_conditions(definition) {
        if let Err(error) = validate_condition(condition) {
            issues.push(ValidationIssue::new(path, "invalid_condition", error.to_string()));
        }
    }

    validate_criteria_in(&definition.steps, "steps", &mut issues);

    ValidationReport::from_issues(issues)
}

/// Parses a JSON document and validates it; parse failures become an invalid report.
pub fn validate_definition_json(document: &str) -> ValidationReport {
    match parse_definition_str(document, DefinitionFormat::Json) {
        Ok(definition) => validate_definition(&definition),
        Err(error) => ValidationReport::from_issues(vec![ValidationIssue::new(
            "$",
            "parse_error",
            format!("{error:#}"),
        )]),
    }
}

fn validate_criteria_in(steps: &[WorkflowStep], prefix: &str, issues: &mut Vec<ValidationIssue>) {
    for (index, step) in steps.iter().enumerate() {
        let path = format!("{prefix}[{index}]");
        match step {
            WorkflowStep::Plain(plain) => {
                let Some(raw) = plain.validation_criteria.as_ref().filter(|raw| !raw.is_null()) else {
                    continue;
                };
                let criteria_path = format!("{path}.validationCriteria");
                match Criteria::parse(raw) {
                    Ok(criteria) => {
                        for condition in criteria.conditions() {
                            if let Err(error) = validate_condition(condition) {
                                issues.push(ValidationIssue::new(&criteria_path, "invalid_condition", error.to_string()));
                            }
                        }
                    }
                    Err(reason) => issues.push(ValidationIssue::new(criteria_path, "invalid_criteria", reason)),
                }
            }
            WorkflowStep::Loop(loop_step) => {
                if let LoopBody::Inline(body) = &loop_step.body {
                    validate_criteria_in(body, &format!("{path}.body"), issues);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codes(report: &ValidationReport) -> Vec<&str> {
        report.issues.iter().map(|issue| issue.code.as_str()).collect()
    }

    #[test]
    fn parses_yaml_file_by_extension() {
        let temp_dir = tempfile::tempdir().expect("tempdir");
        let path = temp_dir.path().join("review.yml");
        fs::write(
            &path,
            "id: review\nname: Review\nsteps:\n  - id: read\n    title: Read\n    prompt: Read the diff\n",
        )
        .expect("write workflow");

        let definition = parse_definition_file(&path).expect("parse workflow file");
        assert_eq!(definition.id, "review");
        assert!(validate_definition(&definition).valid);
    }

    #[test]
    fn rejects_unknown_extension() {
        let error = parse_definition_file("workflow.toml").expect_err("unsupported extension");
        assert!(error.to_string().contains("unsupported workflow file extension"));
    }

    #[test]
    fn report_includes_condition_and_criteria_problems() {
        let document = json!({
            "id": "wf",
            "name": "Wf",
            "steps": [{
                "id": "a", "title": "A", "prompt": "p",
                "condition": { "var": "x", "contains": "y" },
                "validationCriteria": [
                    { "type": "regex", "pattern": "(" },
                    { "type": "contains", "value": "ok", "condition": { "var": "y", "between": [1, 2] } }
                ]
            }]
        });
        let definition: WorkflowDefinition = serde_json::from_value(document).expect("parse definition");

        let report = validate_definition(&definition);
        assert!(!report.valid);
        assert_eq!(codes(&report), vec!["invalid_condition", "invalid_criteria"]);
        assert_eq!(report.issues[0].message, "Unsupported condition operators: contains");
    }

    #[test]
    fn json_parse_errors_become_invalid_reports() {
        let report = validate_definition_json("{ not json");
        assert!(!report.valid);
        assert_eq!(codes(&report), vec!["parse_error"]);
    }
}
