//! External command execution
//!
//! Every CLI the workflow drives goes through [`CommandRunner`] so the
//! orchestration can be exercised in tests without docker or kind installed.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Runs external programs.
///
/// A non-zero exit is reported through [`CommandOutput::success`]; `Err` is
/// reserved for failing to start the program at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>)
        -> Result<CommandOutput>;
}

/// Runs commands for real with `tokio::process`
#[derive(Debug, Default, Clone)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput> {
        debug!(program, args = %args.join(" "), "Executing");

        let mut command = Command::new(program);
        command
            .args(args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command.spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Dropping the handle closes stdin so `--config -` readers see EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(CommandOutput::from(output))
    }
}

/// Convert a borrowed argument list into owned strings
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Run a command and treat a non-zero exit as fatal
pub async fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput> {
    let output = runner.run(program, args, stdin).await?;
    if !output.success {
        return Err(Error::command_failed(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            output.stderr.trim()
        )));
    }
    Ok(output)
}

/// Whether `tool` resolves on PATH
pub async fn tool_available<R: CommandRunner + ?Sized>(runner: &R, tool: &str) -> Result<bool> {
    let output = runner.run("which", &[tool.to_string()], None).await?;
    Ok(output.success)
}
