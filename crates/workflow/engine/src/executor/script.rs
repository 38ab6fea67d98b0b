//! Local process executor
//!
//! The step input is written to the child's stdin as JSON. Stdout is
//! parsed as JSON, falling back to the trimmed text. A non-zero exit is an
//! executor error carrying the tail of stderr. The child is killed if the
//! attempt is dropped by a timeout or cancellation.

use super::{StepContext, StepOutcome};
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use workflow_types::StepError;

const STDERR_TAIL: usize = 512;

pub async fn run(command: &str, args: &[String], ctx: &StepContext) -> StepOutcome {
    let mut child = Command::new(command)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StepError::executor(format!("failed to spawn '{}': {}", command, e)))?;

    let body = serde_json::to_vec(&ctx.input)
        .map_err(|e| StepError::executor(format!("failed to encode input: {}", e)))?;
    if let Some(mut stdin) = child.stdin.take() {
        // a child that never reads stdin closes the pipe early; that is not an error
        let _ = stdin.write_all(&body).await;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| StepError::executor(format!("'{}' did not complete: {}", command, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let start = (stderr.len().saturating_sub(STDERR_TAIL)..stderr.len())
            .find(|i| stderr.is_char_boundary(*i))
            .unwrap_or(stderr.len());
        let tail = &stderr[start..];
        return Err(StepError::executor(format!(
            "'{}' exited with {}: {}",
            command, output.status, tail
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
}
