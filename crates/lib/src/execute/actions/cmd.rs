//! Running local processes.
//!
//! Jobs reach the outside world through two entry points: [`execute_program`] for an
//! argument vector (terraform, uploaded scripts) and [`execute_cmd`] for a command line
//! handed to a shell. Both inherit the caller's environment, add the given variables and
//! return trimmed stdout. A timeout kills the child.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::execute::types::ExecuteError;

/// Run `program` with `args` in `cwd`.
pub async fn execute_program(
  program: &str,
  args: &[String],
  env: &BTreeMap<String, String>,
  cwd: &Path,
  timeout: Option<Duration>,
) -> Result<String, ExecuteError> {
  let cmdline = std::iter::once(program.to_string())
    .chain(args.iter().cloned())
    .collect::<Vec<_>>()
    .join(" ");
  info!(cmd = %cmdline, cwd = %cwd.display(), "executing program");

  let mut command = Command::new(program);
  command.args(args).current_dir(cwd).envs(env).kill_on_drop(true);

  let output = wait(command, &cmdline, timeout).await?;
  finish(output, cmdline)
}

/// Run `cmd` through a shell in `cwd`.
///
/// # Arguments
///
/// * `cmd` - The command line to execute
/// * `env` - Extra environment variables
/// * `cwd` - Working directory
/// * `shell` - Shell override (defaults to /bin/sh on Unix, powershell.exe on Windows)
/// * `timeout` - Kill the command after this long
pub async fn execute_cmd(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: &Path,
  shell: Option<&str>,
  timeout: Option<Duration>,
) -> Result<String, ExecuteError> {
  info!(cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);
  let mut command = Command::new(&shell_cmd);
  command
    .args(&shell_args)
    .arg(cmd)
    .current_dir(cwd)
    .envs(env)
    .kill_on_drop(true);

  debug!(shell = %shell_cmd, working_dir = ?cwd, "spawning process");
  let output = wait(command, cmd, timeout).await?;
  finish(output, cmd.to_string())
}

async fn wait(mut command: Command, cmdline: &str, timeout: Option<Duration>) -> Result<Output, ExecuteError> {
  match timeout {
    Some(after) => tokio::time::timeout(after, command.output())
      .await
      .map_err(|_| ExecuteError::Timeout {
        cmd: cmdline.to_string(),
        after,
      })?
      .map_err(ExecuteError::from),
    None => Ok(command.output().await?),
  }
}

fn finish(output: Output, cmd: String) -> Result<String, ExecuteError> {
  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(ExecuteError::CmdFailed {
      cmd,
      code: output.status.code(),
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }
  Ok(stdout)
}

/// Get the shell command and argument for the current platform.
///
/// Returns `(shell, args)` where `args` go before the command line, e.g. `-c` for sh.
/// An override is inspected to pick the right flag for powershell and cmd.
pub(crate) fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::{echo_msg, shell_cmd};
  use tempfile::TempDir;

  #[cfg(unix)]
  fn echo_env(var: &str) -> String {
    format!("echo ${}", var)
  }

  #[cfg(windows)]
  fn echo_env(var: &str) -> String {
    format!("Write-Output $env:{}", var)
  }

  #[tokio::test]
  async fn execute_simple_command() {
    let temp_dir = TempDir::new().unwrap();
    let result = execute_cmd("echo hello", &BTreeMap::new(), temp_dir.path(), None, None)
      .await
      .unwrap();
    assert_eq!(result, "hello");
  }

  #[tokio::test]
  async fn execute_command_with_env() {
    let temp_dir = TempDir::new().unwrap();
    let env = BTreeMap::from([("MY_VAR".to_string(), "my_value".to_string())]);

    let result = execute_cmd(&echo_env("MY_VAR"), &env, temp_dir.path(), None, None)
      .await
      .unwrap();
    assert_eq!(result, "my_value");
  }

  #[tokio::test]
  async fn execute_command_failure() {
    let temp_dir = TempDir::new().unwrap();
    let result = execute_cmd("exit 1", &BTreeMap::new(), temp_dir.path(), None, None).await;
    assert!(matches!(result, Err(ExecuteError::CmdFailed { code: Some(1), .. })));
  }

  #[tokio::test]
  async fn execute_program_passes_args() {
    let temp_dir = TempDir::new().unwrap();
    let (program, args) = echo_msg("from program");
    let result = execute_program(program, &args, &BTreeMap::new(), temp_dir.path(), None)
      .await
      .unwrap();
    assert_eq!(result, "from program");
  }

  #[tokio::test]
  async fn execute_program_runs_in_cwd() {
    let temp_dir = TempDir::new().unwrap();
    let sub_dir = temp_dir.path().join("subdir");
    tokio::fs::create_dir(&sub_dir).await.unwrap();

    let (program, args) = shell_cmd("echo marker > cwd_marker");
    execute_program(program, &args, &BTreeMap::new(), &sub_dir, None)
      .await
      .unwrap();
    assert!(sub_dir.join("cwd_marker").exists());
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn execute_command_times_out() {
    let temp_dir = TempDir::new().unwrap();
    let result = execute_cmd(
      "sleep 5",
      &BTreeMap::new(),
      temp_dir.path(),
      None,
      Some(Duration::from_millis(100)),
    )
    .await;
    assert!(matches!(result, Err(ExecuteError::Timeout { .. })));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn execute_multiline_command() {
    let temp_dir = TempDir::new().unwrap();
    let cmd = r#"
      x=1
      y=2
      echo $((x + y))
    "#;
    let result = execute_cmd(cmd, &BTreeMap::new(), temp_dir.path(), None, None)
      .await
      .unwrap();
    assert_eq!(result, "3");
  }

  #[test]
  fn get_shell_with_override() {
    let (shell, arg) = get_shell(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(arg, vec!["-c"]);
  }

  #[test]
  fn get_shell_with_powershell_override() {
    let (shell, args) = get_shell(Some("pwsh"));
    assert_eq!(shell, "pwsh");
    assert_eq!(args, vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"]);
  }

  #[test]
  fn get_shell_with_cmd_override() {
    let (shell, args) = get_shell(Some("cmd.exe"));
    assert_eq!(shell, "cmd.exe");
    assert_eq!(args, vec!["/C"]);
  }

  #[test]
  fn get_shell_default() {
    let (shell, args) = get_shell(None);
    #[cfg(unix)]
    {
      assert_eq!(shell, "/bin/sh");
      assert_eq!(args, vec!["-c"]);
    }
    #[cfg(windows)]
    {
      assert_eq!(shell, "powershell.exe");
      assert_eq!(args, vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"]);
    }
  }
}
