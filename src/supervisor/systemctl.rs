use super::{ProcessSupervisor, UnitState};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Output;
use tracing::debug;

/// `systemctl is-active` exit code for a unit that is not active.
const IS_ACTIVE_INACTIVE: i32 = 3;

/// Runs `systemctl` for every supervisor call.
#[derive(Debug, Clone)]
pub struct SystemctlSupervisor {
    program: String,
    leading_args: Vec<String>,
}

impl SystemctlSupervisor {
    pub fn new() -> Self {
        Self::with_program("systemctl")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self::with_command(program, Vec::<String>::new())
    }

    /// Run `program leading_args... <verb> ...` instead of `systemctl`, e.g.
    /// `sh wrapper.sh`.
    pub fn with_command<I, S>(program: impl Into<String>, leading_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(program = %self.program, ?args, "Running supervisor command");
        tokio::process::Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                Error::Supervisor(format!(
                    "Failed to execute '{} {}': {}",
                    self.program,
                    args.join(" "),
                    e
                ))
            })
    }

    fn describe_failure(&self, args: &[&str], output: &Output) -> String {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            format!("'{} {}' exited with {}", self.program, args.join(" "), output.status)
        } else {
            stderr.to_string()
        }
    }
}

impl Default for SystemctlSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSupervisor for SystemctlSupervisor {
    async fn start(&self, unit: &str) -> Result<()> {
        let args = ["start", unit];
        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::ServiceStartFailed(
            unit.to_string(),
            self.describe_failure(&args, &output),
        ))
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        let args = ["stop", unit];
        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(Error::Supervisor(self.describe_failure(&args, &output)))
    }

    async fn is_active(&self, unit: &str) -> Result<bool> {
        let args = ["is-active", "--quiet", unit];
        let output = self.run(&args).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(IS_ACTIVE_INACTIVE) => Ok(false),
            _ => Err(Error::Supervisor(self.describe_failure(&args, &output))),
        }
    }

    async fn unit_state(&self, unit: &str) -> Result<UnitState> {
        let args = ["show", "-p", "ActiveState", "-p", "SubState", unit];
        let output = self.run(&args).await?;
        if !output.status.success() {
            return Err(Error::Supervisor(self.describe_failure(&args, &output)));
        }
        parse_show_output(unit, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `systemctl show -p ActiveState -p SubState` output.
fn parse_show_output(unit: &str, stdout: &str) -> Result<UnitState> {
    let mut active_state = None;
    let mut sub_state = None;
    for line in stdout.lines() {
        match line.split_once('=') {
            Some(("ActiveState", value)) => active_state = Some(value.trim().to_string()),
            Some(("SubState", value)) => sub_state = Some(value.trim().to_string()),
            _ => {}
        }
    }
    match (active_state, sub_state) {
        (Some(active_state), Some(sub_state)) => Ok(UnitState {
            active_state,
            sub_state,
        }),
        _ => Err(Error::Supervisor(format!(
            "Unexpected 'systemctl show' output for {}: {:?}",
            unit, stdout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_show_output() {
        let state = parse_show_output("tor@default.service", "ActiveState=active\nSubState=running\n")
            .unwrap();
        assert_eq!(state, UnitState::new("active", "running"));
    }

    #[test]
    fn test_parse_show_output_ignores_order_and_noise() {
        let state = parse_show_output("x.service", "SubState=dead\nFoo=bar\nActiveState=inactive")
            .unwrap();
        assert_eq!(state, UnitState::new("inactive", "dead"));
    }

    #[test]
    fn test_parse_show_output_missing_field() {
        assert!(parse_show_output("x.service", "ActiveState=active\n").is_err());
    }

    /// A supervisor running `sh <script>` in place of `systemctl`.
    fn fake_systemctl(dir: &TempDir, script: &str) -> SystemctlSupervisor {
        let path = dir.path().join("systemctl.sh");
        std::fs::write(&path, format!("{}\n", script)).unwrap();
        SystemctlSupervisor::with_command("sh", [path.to_string_lossy().into_owned()])
    }

    #[tokio::test]
    async fn test_is_active_exit_codes() {
        let dir = TempDir::new().unwrap();
        let supervisor = fake_systemctl(
            &dir,
            r#"case "$3" in up.service) exit 0;; down.service) exit 3;; *) exit 4;; esac"#,
        );

        assert!(supervisor.is_active("up.service").await.unwrap());
        assert!(!supervisor.is_active("down.service").await.unwrap());
        assert!(supervisor.is_active("missing.service").await.is_err());
    }

    #[tokio::test]
    async fn test_start_failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let supervisor = fake_systemctl(&dir, "echo 'Job failed' >&2; exit 1");

        let err = supervisor.start("mumble-server.service").await.unwrap_err();
        match err {
            Error::ServiceStartFailed(unit, reason) => {
                assert_eq!(unit, "mumble-server.service");
                assert_eq!(reason, "Job failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unit_state_via_show() {
        let dir = TempDir::new().unwrap();
        let supervisor = fake_systemctl(&dir, "printf 'ActiveState=failed\\nSubState=failed\\n'");

        let state = supervisor.unit_state("gobby.service").await.unwrap();
        assert_eq!(state, UnitState::new("failed", "failed"));
    }
}
