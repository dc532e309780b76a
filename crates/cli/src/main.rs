use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde_json::{Map, Value};
use stepwise_engine::{parse_definition_file, resolve_next, validate_definition, validate_step_output};
use stepwise_mcp::{ServerConfig, StepwiseServer, WorkflowStore, build_store, serve_stdio};
use stepwise_types::WorkflowDefinition;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = build_cli().get_matches();
    let Some((name, sub)) = matches.subcommand() else {
        bail!("expected a subcommand; run with --help");
    };
    let config = resolve_config(sub);

    match name {
        "serve" => {
            info!(path = %config.workflows_path.display(), "serving workflows");
            let store = build_store(&config);
            serve_stdio(StepwiseServer::new(store)).await
        }
        "list" => {
            let summaries = build_store(&config).summaries()?;
            print_json(&summaries)
        }
        "next" => run_next(&config, sub),
        "output" => run_output(&config, sub),
        "validate" => run_validate(sub),
        other => bail!("unknown subcommand '{other}'"),
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    Command::new("stepwise")
        .about("Stateless workflow step resolution")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("workflows")
                .long("workflows")
                .short('w')
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .help("Directory of workflow definitions (overrides STEPWISE_WORKFLOWS_PATH)"),
        )
        .arg(
            Arg::new("cache-ttl-ms")
                .long("cache-ttl-ms")
                .global(true)
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64))
                .help("Definition cache TTL in milliseconds; 0 disables caching"),
        )
        .arg(
            Arg::new("no-validate")
                .long("no-validate")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Serve definitions even when validation reports problems"),
        )
        .subcommand(Command::new("serve").about("Run the MCP server on stdio"))
        .subcommand(Command::new("list").about("List available workflows"))
        .subcommand(
            Command::new("next")
                .about("Resolve the next step of a workflow")
                .arg(Arg::new("workflow").required(true).help("Workflow id"))
                .arg(
                    Arg::new("completed")
                        .long("completed")
                        .short('c')
                        .action(ArgAction::Append)
                        .value_delimiter(',')
                        .help("Completed step ids, comma separated"),
                )
                .arg(
                    Arg::new("context")
                        .long("context")
                        .action(ArgAction::Set)
                        .help("Context JSON object, or @path to a JSON file"),
                ),
        )
        .subcommand(
            Command::new("output")
                .about("Check a step's output against its validation criteria")
                .arg(Arg::new("workflow").required(true).help("Workflow id"))
                .arg(Arg::new("step").required(true).help("Step id"))
                .arg(
                    Arg::new("file")
                        .long("file")
                        .short('f')
                        .action(ArgAction::Set)
                        .value_parser(value_parser!(PathBuf))
                        .help("Read the output from a file instead of --text"),
                )
                .arg(Arg::new("text").long("text").action(ArgAction::Set).help("Output text"))
                .arg(
                    Arg::new("context")
                        .long("context")
                        .action(ArgAction::Set)
                        .help("Context JSON object, or @path to a JSON file"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate a workflow definition file (.json, .yaml, .yml)")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Path to the workflow definition"),
                ),
        )
}

fn resolve_config(matches: &ArgMatches) -> ServerConfig {
    let mut config = ServerConfig::from_env();
    if let Some(path) = matches.get_one::<PathBuf>("workflows") {
        config.workflows_path = path.clone();
    }
    if let Some(ttl) = matches.get_one::<u64>("cache-ttl-ms") {
        config.cache_ttl = Duration::from_millis(*ttl);
    }
    if matches.get_flag("no-validate") {
        config.validate_on_load = false;
    }
    config
}

fn run_next(config: &ServerConfig, matches: &ArgMatches) -> Result<()> {
    let definition = load_workflow(config, matches)?;
    let completed: Vec<String> = matches
        .get_many::<String>("completed")
        .map(|values| values.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()).collect())
        .unwrap_or_default();
    let context = parse_context(matches.get_one::<String>("context"))?;

    let response = resolve_next(&definition, &completed, &context)?;
    print_json(&response)
}

fn run_output(config: &ServerConfig, matches: &ArgMatches) -> Result<()> {
    let definition = load_workflow(config, matches)?;
    let step_id = matches.get_one::<String>("step").context("missing step id")?;
    let output = match (matches.get_one::<PathBuf>("file"), matches.get_one::<String>("text")) {
        (Some(path), _) => fs::read_to_string(path).with_context(|| format!("failed to read output file {}", path.display()))?,
        (None, Some(text)) => text.clone(),
        (None, None) => bail!("pass the step output with --text or --file"),
    };
    let context = parse_context(matches.get_one::<String>("context"))?;

    let result = validate_step_output(&definition, step_id, &output, &context)?;
    print_json(&result)?;
    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn run_validate(matches: &ArgMatches) -> Result<()> {
    let path = matches.get_one::<PathBuf>("file").context("missing workflow file")?;
    let definition = parse_definition_file(path)?;
    let report = validate_definition(&definition);
    print_json(&report)?;
    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn load_workflow(config: &ServerConfig, matches: &ArgMatches) -> Result<Arc<WorkflowDefinition>> {
    let workflow_id = matches.get_one::<String>("workflow").context("missing workflow id")?;
    build_store(config)
        .get(workflow_id)?
        .with_context(|| format!("workflow '{workflow_id}' was not found in {}", config.workflows_path.display()))
}

fn parse_context(raw: Option<&String>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("failed to read context file {path}"))?,
        None => raw.clone(),
    };
    match serde_json::from_str::<Value>(&text).context("context must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("context must be a JSON object, got {other}"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
