//! Output formatting utilities

use anyhow::Result;
use serde::Serialize;
use workflow_types::{ExecutionState, ExecutionStatus};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Short human-readable summary
    #[default]
    Text,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print a single item as JSON or YAML; text falls back to JSON
pub fn print_single<T: Serialize>(data: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(data)?);
        }
    }
    Ok(())
}

/// Print an execution status
pub fn print_status(status: &ExecutionStatus, format: OutputFormat) -> Result<()> {
    if !matches!(format, OutputFormat::Text) {
        return print_single(status, format);
    }

    let marker = match status.state {
        ExecutionState::Completed => "✓",
        ExecutionState::Running => "…",
        ExecutionState::Failed | ExecutionState::Cancelled => "✗",
    };
    println!("{} execution {} {}", marker, status.execution_id, status.state);
    for (id, step) in &status.steps {
        match &step.error {
            Some(error) => println!("  {:<24} {:<10} attempts={} {}", id, step.status, step.attempts, error),
            None => println!("  {:<24} {:<10} attempts={}", id, step.status, step.attempts),
        }
    }
    if let Some(failure) = &status.failure {
        println!("failure: {} {}", failure.kind, failure.message);
    }
    if let Some(output) = &status.output {
        println!("output: {}", serde_json::to_string_pretty(output)?);
    }
    Ok(())
}
