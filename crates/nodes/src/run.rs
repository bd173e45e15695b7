//! The `run` plugin: execute a shell command and capture its result.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use pipeline::{ActionFailure, ActionSettings};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, warn};

/// Registered plugin name.
pub const RUN_PLUGIN: &str = "run";

#[derive(Debug, Deserialize)]
struct RunSettings {
    command: Option<String>,
    #[serde(rename = "_")]
    shorthand: Option<String>,
    #[serde(rename = "as")]
    run_as: Option<String>,
    cwd: Option<PathBuf>,
    timeout: Option<u64>,
}

/// Runs `sh -c <command>`, optionally as another user and in another
/// directory.
///
/// A non-zero exit code fails the action; the captured exit code and streams
/// are attached to the failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAction {
    command: String,
    run_as: Option<String>,
    cwd: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl RunAction {
    /// Creates an action for `command` with no user switch, directory
    /// override or timeout.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            run_as: None,
            cwd: None,
            timeout: None,
        }
    }

    /// Builds the action from merged settings.
    ///
    /// `command` (or the shorthand value) is required; `as`, `cwd` and
    /// `timeout` (whole seconds) are optional.
    pub fn from_settings(settings: ActionSettings) -> Result<Self, String> {
        let parsed: RunSettings =
            serde_json::from_value(Value::Object(settings)).map_err(|e| e.to_string())?;

        let command = parsed
            .command
            .or(parsed.shorthand)
            .ok_or("Missing command in run instruction.")?;

        Ok(Self {
            command,
            run_as: parsed.run_as,
            cwd: parsed.cwd,
            timeout: parsed.timeout.map(Duration::from_secs),
        })
    }

    /// Switches to `user` through `sudo -H -u`.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    /// Runs the command in `dir`.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Kills the spawned process if it runs longer than `timeout`.
    ///
    /// Only the direct child is killed. With [`RunAction::with_user`] that is
    /// `sudo`, and the command it started may outlive it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments that will be executed.
    pub fn argv(&self) -> Vec<&str> {
        let mut argv = Vec::with_capacity(7);
        if let Some(user) = &self.run_as {
            argv.extend(["sudo", "-H", "-u", user.as_str()]);
        }
        argv.extend(["sh", "-c", self.command.as_str()]);
        argv
    }

    /// Executes the command. The payload is not consulted.
    pub async fn execute(&self, _payload: &Value) -> Result<Value, ActionFailure> {
        let argv = self.argv();
        let mut command = Command::new(argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }

        debug!(command = %self.command, user = ?self.run_as, cwd = ?self.cwd, "running command");

        let finished = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(command = %self.command, timeout_secs = limit.as_secs(), "command timed out, killed");
                    return Err(ActionFailure::new(format!(
                        "Command timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => command.output().await,
        };

        let output = finished
            .map_err(|e| ActionFailure::new(format!("Failed to start command: {e}")))?;

        // Terminated by a signal: no exit code.
        let code = output.status.code().unwrap_or(-1);

        let mut captured = Map::new();
        captured.insert("code".into(), Value::from(code));
        if !output.stdout.is_empty() {
            captured.insert(
                "stdout".into(),
                Value::from(String::from_utf8_lossy(&output.stdout).into_owned()),
            );
        }
        if !output.stderr.is_empty() {
            captured.insert(
                "stderr".into(),
                Value::from(String::from_utf8_lossy(&output.stderr).into_owned()),
            );
        }
        let captured = Value::Object(captured);

        if code == 0 {
            Ok(captured)
        } else {
            Err(ActionFailure::with_output(
                format!("Non-zero exit code ({code})"),
                captured,
            ))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(v: Value) -> ActionSettings {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_from_settings() {
        let action = RunAction::from_settings(settings(json!({
            "command": "make deploy",
            "as": "www-data",
            "cwd": "/srv/app",
            "timeout": 30,
            "branch": "ignored"
        })))
        .unwrap();

        assert_eq!(
            action,
            RunAction::new("make deploy")
                .with_user("www-data")
                .with_cwd("/srv/app")
                .with_timeout(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_shorthand_command() {
        let action = RunAction::from_settings(settings(json!({"_": "make"}))).unwrap();
        assert_eq!(action, RunAction::new("make"));
    }

    #[test]
    fn test_missing_command() {
        let err = RunAction::from_settings(settings(json!({"cwd": "/tmp"}))).unwrap_err();
        assert_eq!(err, "Missing command in run instruction.");
    }

    #[test]
    fn test_argv_with_user_switch() {
        let action = RunAction::new("id -un").with_user("deploy");
        assert_eq!(action.argv(), vec!["sudo", "-H", "-u", "deploy", "sh", "-c", "id -un"]);
        assert_eq!(RunAction::new("ls").argv(), vec!["sh", "-c", "ls"]);
    }

    #[tokio::test]
    async fn test_successful_command_captures_stdout() {
        let output = RunAction::new("echo hello").execute(&Value::Null).await.unwrap();
        assert_eq!(output, json!({"code": 0, "stdout": "hello\n"}));
    }

    #[tokio::test]
    async fn test_silent_command_reports_code_only() {
        let output = RunAction::new("true").execute(&Value::Null).await.unwrap();
        assert_eq!(output, json!({"code": 0}));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_output() {
        let failure = RunAction::new("echo oops >&2; exit 3")
            .execute(&Value::Null)
            .await
            .unwrap_err();

        assert_eq!(failure.message, "Non-zero exit code (3)");
        assert_eq!(failure.output, Some(json!({"code": 3, "stderr": "oops\n"})));
    }

    #[tokio::test]
    async fn test_signal_termination_reports_minus_one() {
        let failure = RunAction::new("kill -9 $$")
            .execute(&Value::Null)
            .await
            .unwrap_err();

        assert_eq!(failure.message, "Non-zero exit code (-1)");
        assert_eq!(failure.output, Some(json!({"code": -1})));
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().canonicalize().unwrap();

        let output = RunAction::new("pwd -P")
            .with_cwd(dir.path())
            .execute(&Value::Null)
            .await
            .unwrap();

        assert_eq!(output["stdout"], json!(format!("{}\n", expected.display())));
    }

    #[tokio::test]
    async fn test_missing_working_directory_fails_to_start() {
        let failure = RunAction::new("true")
            .with_cwd("/definitely/not/here")
            .execute(&Value::Null)
            .await
            .unwrap_err();

        assert!(failure.message.starts_with("Failed to start command"));
        assert!(failure.output.is_none());
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let failure = RunAction::new("sleep 5")
            .with_timeout(Duration::from_secs(1))
            .execute(&Value::Null)
            .await
            .unwrap_err();

        assert_eq!(failure.message, "Command timed out after 1s");
    }
}
