//! Named build tasks that shell out to the Rust toolchain.
//!
//! Every task is a fixed list of invocations of one tool binary (normally
//! `cargo`, overridable through the `CARGO` environment variable). Composite
//! tasks run their parts in order and stop at the first failure.

use std::fmt;
use std::process::{Command, Stdio};

use clap::ValueEnum;
use thiserror::Error;

/// Environment variable selecting the tool binary.
pub const TOOL_ENV: &str = "CARGO";
pub const DEFAULT_TOOL: &str = "cargo";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Task {
    /// Resolve and download all dependencies
    Install,
    /// Check formatting and run clippy
    Lint,
    /// Type-check every target
    Typecheck,
    /// Run the test suite
    Test,
    /// Lint, typecheck, then test
    Verify,
    /// Start the hub
    RunHub,
    /// Start a node service
    RunNode,
}

/// One external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

impl Task {
    /// The commands this task runs, in order.
    pub fn invocations(self, tool: &str) -> Vec<Invocation> {
        match self {
            Task::Install => vec![Invocation::new(tool, &["fetch"])],
            Task::Lint => vec![
                Invocation::new(tool, &["fmt", "--all", "--", "--check"]),
                Invocation::new(tool, &["clippy", "--all-targets", "--", "-D", "warnings"]),
            ],
            Task::Typecheck => vec![Invocation::new(tool, &["check", "--all-targets"])],
            Task::Test => vec![Invocation::new(tool, &["test"])],
            Task::Verify => [Task::Lint, Task::Typecheck, Task::Test]
                .into_iter()
                .flat_map(|task| task.invocations(tool))
                .collect(),
            Task::RunHub => vec![Invocation::new(tool, &["run", "--bin", "echotrace-hub"])],
            Task::RunNode => vec![Invocation::new(tool, &["run", "--bin", "echotrace-node"])],
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("`{command}` exited with status {code}")]
    Failed { command: String, code: i32 },

    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl TaskError {
    /// Exit code the runner should terminate with.
    pub fn exit_code(&self) -> i32 {
        match self {
            TaskError::Failed { code, .. } if *code != 0 => *code,
            TaskError::Failed { .. } => 1,
            TaskError::Spawn { .. } => 127,
        }
    }
}

/// Runs a single invocation and reports its exit code.
pub trait CommandExecutor {
    fn execute(&self, invocation: &Invocation) -> std::io::Result<i32>;
}

/// Executes commands as child processes sharing this process's stdio.
#[derive(Debug, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, invocation: &Invocation) -> std::io::Result<i32> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        // Killed by a signal: no code
        Ok(status.code().unwrap_or(-1))
    }
}

/// Run every invocation of `task`, halting on the first failure.
pub fn run_task(task: Task, tool: &str, executor: &dyn CommandExecutor) -> Result<(), TaskError> {
    for invocation in task.invocations(tool) {
        let command = invocation.to_string();
        tracing::info!("$ {}", command);
        let code = executor
            .execute(&invocation)
            .map_err(|source| TaskError::Spawn {
                command: command.clone(),
                source,
            })?;
        if code != 0 {
            return Err(TaskError::Failed { command, code });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records commands; fails any command whose text contains `fail_on`.
    #[derive(Default)]
    struct RecordingExecutor {
        ran: RefCell<Vec<String>>,
        fail_on: Option<&'static str>,
        spawn_error: bool,
    }

    impl CommandExecutor for RecordingExecutor {
        fn execute(&self, invocation: &Invocation) -> std::io::Result<i32> {
            if self.spawn_error {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such tool"));
            }
            let command = invocation.to_string();
            let code = match self.fail_on {
                Some(pattern) if command.contains(pattern) => 2,
                _ => 0,
            };
            self.ran.borrow_mut().push(command);
            Ok(code)
        }
    }

    #[test]
    fn test_verify_runs_lint_typecheck_test_in_order() {
        let executor = RecordingExecutor::default();
        run_task(Task::Verify, "cargo", &executor).unwrap();
        assert_eq!(
            *executor.ran.borrow(),
            vec![
                "cargo fmt --all -- --check",
                "cargo clippy --all-targets -- -D warnings",
                "cargo check --all-targets",
                "cargo test",
            ]
        );
    }

    #[test]
    fn test_verify_halts_on_first_failure() {
        let executor = RecordingExecutor {
            fail_on: Some("clippy"),
            ..Default::default()
        };
        let err = run_task(Task::Verify, "cargo", &executor).unwrap_err();
        assert!(matches!(
            err,
            TaskError::Failed { ref command, code: 2 } if command.starts_with("cargo clippy")
        ));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(executor.ran.borrow().len(), 2);
    }

    #[test]
    fn test_run_tasks_select_binary_only() {
        assert_eq!(
            Task::RunHub.invocations("cargo"),
            vec![Invocation::new("cargo", &["run", "--bin", "echotrace-hub"])]
        );
        assert_eq!(
            Task::RunNode.invocations("cargo"),
            vec![Invocation::new("cargo", &["run", "--bin", "echotrace-node"])]
        );
    }

    #[test]
    fn test_tool_override_applies_to_every_invocation() {
        let invocations = Task::Verify.invocations("/opt/rust/bin/cargo");
        assert!(invocations
            .iter()
            .all(|invocation| invocation.program == "/opt/rust/bin/cargo"));
        assert_eq!(Task::Install.invocations("cargo")[0].to_string(), "cargo fetch");
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let executor = RecordingExecutor {
            spawn_error: true,
            ..Default::default()
        };
        let err = run_task(Task::Test, "cargo", &executor).unwrap_err();
        assert!(matches!(err, TaskError::Spawn { .. }));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_task_names_parse_from_cli() {
        assert_eq!(Task::from_str("run-hub", false), Ok(Task::RunHub));
        assert_eq!(Task::from_str("typecheck", false), Ok(Task::Typecheck));
        assert!(Task::from_str("deploy", false).is_err());
    }
}
