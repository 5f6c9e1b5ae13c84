//! Post-deployment action collection and execution.
//!
//! Deployment targets emit an optional action command line. Actions are
//! collected across the whole run in a set, so the same command configured
//! on several targets (or several domain groups) runs exactly once. Each
//! action executes in a command shell; a failing action is reported and
//! the remaining actions still run.

use std::collections::BTreeSet;
use std::process::Command;

use tracing::{debug, error, info};

use crate::error::ActionError;

/// Capability for running one action command line.
pub trait ActionRunner {
    /// Run the exact command string once, in a shell, and report its
    /// combined output.
    fn run(&self, command: &str) -> Result<String, ActionError>;
}

/// Runs actions through `sh -c`, capturing combined output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl ActionRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<String, ActionError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|source| ActionError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(ActionError::NonZeroExit {
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                output: combined,
            })
        }
    }
}

/// Collects distinct action identifiers during deployment and executes
/// them once each at the end of the run.
#[derive(Debug, Default)]
pub struct ActionScheduler {
    actions: BTreeSet<String>,
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an action for later execution. Duplicates collapse; absent
    /// actions are ignored.
    pub fn schedule(&mut self, action: Option<&str>) {
        if let Some(action) = action {
            if !action.is_empty() {
                self.actions.insert(action.to_string());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Execute every scheduled action exactly once, isolating failures
    /// per action. Returns the number of failed actions.
    pub fn run_all(&self, runner: &dyn ActionRunner) -> usize {
        let mut failures = 0;
        for action in &self.actions {
            debug!(action = %action, "Executing post-deployment action");
            match runner.run(action) {
                Ok(output) => {
                    info!(action = %action, output = %output.trim_end(), "Action executed");
                }
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "Post-deployment action failed");
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl ActionRunner for RecordingRunner {
        fn run(&self, command: &str) -> Result<String, ActionError> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.fail_on.as_deref() == Some(command) {
                return Err(ActionError::NonZeroExit {
                    command: command.to_string(),
                    status: 1,
                    output: String::new(),
                });
            }
            Ok(String::new())
        }
    }

    #[test]
    fn test_duplicate_actions_collapse() {
        let mut scheduler = ActionScheduler::new();
        scheduler.schedule(Some("systemctl reload nginx"));
        scheduler.schedule(Some("systemctl reload nginx"));
        scheduler.schedule(Some("systemctl reload postfix"));
        scheduler.schedule(None);
        scheduler.schedule(Some(""));

        assert_eq!(scheduler.len(), 2);

        let runner = RecordingRunner::default();
        scheduler.run_all(&runner);
        assert_eq!(runner.commands.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failing_action_does_not_block_others() {
        let mut scheduler = ActionScheduler::new();
        scheduler.schedule(Some("a"));
        scheduler.schedule(Some("b"));
        scheduler.schedule(Some("c"));

        let runner = RecordingRunner {
            fail_on: Some("b".to_string()),
            ..Default::default()
        };
        let failures = scheduler.run_all(&runner);
        assert_eq!(failures, 1);
        assert_eq!(runner.commands.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_shell_runner_captures_output() {
        let runner = ShellRunner;
        let output = runner.run("echo hello").unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn test_shell_runner_reports_exit_status() {
        let runner = ShellRunner;
        let err = runner.run("exit 3").unwrap_err();
        assert!(matches!(err, ActionError::NonZeroExit { status: 3, .. }));
    }
}
