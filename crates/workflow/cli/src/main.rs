//! wfctl - workflow engine command-line interface
//!
//! This CLI lets authors work with workflow definitions locally:
//! - Validate a definition and report the first problem
//! - Print the graph a pattern compiles to
//! - Run a definition against echoing agents and tools
//! - Inspect or recover executions persisted under a state directory

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow_engine::{EngineConfig, PatternCompiler, StorageConfig, WorkflowEngine};
use workflow_types::{
    AgentId, ExecutionId, ExecutionStatus, RoleId, StepKind, StepStatus, WorkflowDefinition,
};

mod echo;
mod output;

use echo::{EchoAgent, EchoTool};
use output::OutputFormat;

/// wfctl CLI application
#[derive(Parser)]
#[command(name = "wfctl")]
#[command(about = "Workflow engine - validate, compile and run workflow definitions", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WORKFLOW_CONFIG")]
    config: Option<String>,

    /// Output format (text, json, yaml)
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log level
    #[arg(long, env = "WORKFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WORKFLOW_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Check a definition without running it
    Validate {
        /// Definition file (YAML or JSON)
        file: PathBuf,
    },

    /// Print the graph a definition compiles to
    Compile {
        /// Definition file (YAML or JSON)
        file: PathBuf,
    },

    /// Run a definition to completion with echoing collaborators
    Run {
        /// Definition file (YAML or JSON)
        file: PathBuf,

        /// Variable binding, value parsed as JSON when possible
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Explicit role binding
        #[arg(long = "bind", value_name = "ROLE=AGENT")]
        bindings: Vec<String>,

        /// Register an agent with comma-separated capabilities
        #[arg(long = "agent", value_name = "AGENT=CAP,CAP")]
        agents: Vec<String>,

        /// Persist checkpoints as JSON files under this directory
        #[arg(long, env = "WORKFLOW_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },

    /// Show the latest persisted status of an execution
    Status {
        execution: String,

        #[arg(long, env = "WORKFLOW_STATE_DIR")]
        state_dir: PathBuf,
    },

    /// Resume an execution from its latest checkpoint
    Recover {
        /// Definition file the execution was started from
        file: PathBuf,

        execution: String,

        #[arg(long, env = "WORKFLOW_STATE_DIR")]
        state_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    match cli.command {
        Commands::Validate { file } => {
            let definition = load_definition(&file)?;
            let graph = PatternCompiler::compile(&definition)
                .with_context(|| format!("{} is not a valid workflow", file.display()))?;
            println!(
                "✓ {} ({} pattern): {} steps, {} edges",
                definition.name,
                definition.pattern,
                graph.step_count(),
                graph.edge_count()
            );
            Ok(())
        }
        Commands::Compile { file } => {
            let definition = load_definition(&file)?;
            let graph = PatternCompiler::compile(&definition)?;
            output::print_single(&graph, cli.output)
        }
        Commands::Run {
            file,
            vars,
            bindings,
            agents,
            state_dir,
        } => {
            let definition = load_definition(&file)?;
            if let Some(dir) = state_dir {
                config.storage = StorageConfig::File { path: dir };
            }
            let engine = build_engine(config, &definition, &agents)?;

            let vars = parse_vars(&vars)?;
            let bindings = parse_bindings(&bindings)?;
            let def_id = engine.register_definition(definition).await?;
            let execution = engine.submit(&def_id, vars, bindings).await?;
            eprintln!("execution {}", execution);

            let status = drive(&engine, &execution).await?;
            output::print_status(&status, cli.output)
        }
        Commands::Status {
            execution,
            state_dir,
        } => {
            config.storage = StorageConfig::File { path: state_dir };
            let engine = WorkflowEngine::builder().with_config(config).build();
            let status = engine.status(&ExecutionId::new(execution)).await?;
            output::print_status(&status, cli.output)
        }
        Commands::Recover {
            file,
            execution,
            state_dir,
        } => {
            let definition = load_definition(&file)?;
            config.storage = StorageConfig::File { path: state_dir };
            let engine = build_engine(config, &definition, &[])?;
            engine.register_definition(definition).await?;

            let execution = ExecutionId::new(execution);
            engine.recover(&execution).await?;
            let status = drive(&engine, &execution).await?;
            output::print_status(&status, cli.output)
        }
    }
}

/// Read a definition from YAML or JSON, chosen by file extension
fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let definition = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => serde_yaml::from_str(&text)?,
    };
    Ok(definition)
}

/// Engine wired to echo collaborators
///
/// Without explicit `--agent` registrations a single `echo` agent is
/// registered with every capability the definition's roles require.
fn build_engine(
    config: EngineConfig,
    definition: &WorkflowDefinition,
    agents: &[String],
) -> Result<WorkflowEngine> {
    let engine = WorkflowEngine::builder()
        .with_config(config)
        .with_agent_executor(Arc::new(EchoAgent))
        .with_tool_invoker(Arc::new(EchoTool))
        .build();

    if agents.is_empty() {
        let capabilities: BTreeSet<String> = definition
            .roles
            .iter()
            .flat_map(|role| role.capabilities.iter().cloned())
            .collect();
        engine
            .capabilities()
            .register(AgentId::new("echo"), capabilities);
    }
    for spec in agents {
        let (agent, caps) = split_pair(spec)?;
        engine.capabilities().register(
            AgentId::new(agent),
            caps.split(',').map(str::trim).filter(|c| !c.is_empty()),
        );
    }
    Ok(engine)
}

/// Wait for a terminal status, prompting on stdin for human input
async fn drive(engine: &WorkflowEngine, execution: &ExecutionId) -> Result<ExecutionStatus> {
    let graph = engine
        .graph(&engine.status(execution).await?.definition_id)
        .await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let status = engine.status(execution).await?;
        if status.is_terminal() {
            return Ok(status);
        }

        let waiting = status
            .steps
            .iter()
            .find(|(id, s)| s.status == StepStatus::Waiting && engine.is_waiting_for_input(execution, id))
            .map(|(id, _)| id.clone());

        let Some(step) = waiting else {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        };

        let prompt = match graph.step(&step).map(|s| &s.kind) {
            Some(StepKind::HumanInput { prompt }) => prompt.clone(),
            _ => format!("Input for step '{}'", step),
        };
        eprint!("{} > ", prompt);
        let line = stdin
            .next_line()
            .await?
            .ok_or_else(|| anyhow!("stdin closed while step '{}' waits for input", step))?;
        engine.supply_human_input(execution, &step, parse_value(&line))?;
    }
}

fn split_pair(spec: &str) -> Result<(&str, &str)> {
    match spec.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => bail!("expected KEY=VALUE, got '{}'", spec),
    }
}

/// JSON when it parses, otherwise the raw string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()))
}

fn parse_vars(specs: &[String]) -> Result<Map<String, Value>> {
    specs
        .iter()
        .map(|spec| split_pair(spec).map(|(k, v)| (k.to_string(), parse_value(v))))
        .collect()
}

fn parse_bindings(specs: &[String]) -> Result<BTreeMap<RoleId, AgentId>> {
    specs
        .iter()
        .map(|spec| split_pair(spec).map(|(role, agent)| (RoleId::new(role), AgentId::new(agent))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_vars() {
        let vars = parse_vars(&["n=3".into(), "name=alice".into(), "obj={\"a\":1}".into()]).unwrap();
        assert_eq!(vars["n"], json!(3));
        assert_eq!(vars["name"], json!("alice"));
        assert_eq!(vars["obj"], json!({"a": 1}));
        assert!(parse_vars(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_parse_bindings() {
        let bindings = parse_bindings(&["writer = agent-7".into()]).unwrap();
        assert_eq!(bindings[&RoleId::new("writer")], AgentId::new("agent-7"));
        assert!(parse_bindings(&["=agent".into()]).is_err());
    }

    #[test]
    fn test_load_yaml_definition() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
name: greet
pattern:
  type: sequential
roles:
  - role: writer
    capabilities: [text]
steps:
  - id: draft
    kind:
      type: agent_task
      role: writer
      task: write a greeting
  - id: shout
    kind:
      type: data_transform
      transform:
        op: expression
        expression: upper(input.task)
"#
        )
        .unwrap();

        let definition = load_definition(file.path()).unwrap();
        assert_eq!(definition.name, "greet");
        assert_eq!(definition.steps.len(), 2);
        let graph = PatternCompiler::compile(&definition).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_run_with_echo_agent() {
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "echo",
            "pattern": {"type": "sequential"},
            "roles": [{"role": "writer", "capabilities": ["text"]}],
            "steps": [
                {"id": "draft", "kind": {"type": "agent_task", "role": "writer", "task": "draft"}},
                {"id": "pick", "kind": {"type": "data_transform",
                    "transform": {"op": "expression", "expression": "input.agent"}}}
            ]
        }))
        .unwrap();

        let engine = build_engine(EngineConfig::testing(), &definition, &[]).unwrap();
        let def_id = engine.register_definition(definition).await.unwrap();
        let execution = engine
            .submit(&def_id, Map::new(), BTreeMap::new())
            .await
            .unwrap();
        let status = drive(&engine, &execution).await.unwrap();
        assert_eq!(status.output, Some(json!("echo")));
    }
}
