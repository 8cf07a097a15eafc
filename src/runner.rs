//! Process execution with a hard timeout
//!
//! Every device command goes through here so a wedged `adb` or `uiautomator`
//! can never block the monitor loop.

use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run `program` with `args`, killing it once `timeout` elapses
pub fn run_command_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so a timeout can take down the whole pipeline
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::CommandFailed(format!("failed to spawn {}: {}", program, e)))?;

    // Drain both pipes in parallel, a chatty child blocks once the pipe buffer fills
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::CommandFailed("failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::CommandFailed("failed to capture stderr".to_string()))?;

    let stdout_handle = drain(stdout);
    let stderr_handle = drain(stderr);

    let start = Instant::now();
    let exit_code = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => {
                if start.elapsed() > timeout {
                    // Anything that left the group may still hold the pipes,
                    // so the drain threads are left to finish on their own
                    kill_process_group(&mut child);
                    return Err(Error::Timeout(timeout));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = stdout_handle.join();
                let _ = stderr_handle.join();
                return Err(Error::CommandFailed(format!("failed to poll {}: {}", program, e)));
            }
        }
    };

    let stdout_bytes = stdout_handle.join().unwrap_or_default();
    let stderr_bytes = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
        exit_code,
    })
}

/// Kill the child and everything else in its process group
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", child.id())])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain(mut reader: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        buffer
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_captures_stdout_and_exit_code() {
        let output = run_command_with_timeout("sh", &sh("echo hello; exit 3"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn test_large_stdout_does_not_deadlock() {
        // A child that fills the pipe buffer must not run into the timeout
        let script = "i=0; while [ $i -lt 100000 ]; do echo 1234567890; i=$((i+1)); done";
        let output = run_command_with_timeout("sh", &sh(script), Duration::from_secs(20)).unwrap();

        assert!(output.success());
        assert!(output.stdout.len() >= 1_000_000);
    }

    #[test]
    fn test_timeout_kills_child() {
        let start = Instant::now();
        let result = run_command_with_timeout("sh", &sh("exec sleep 5"), Duration::from_millis(200));
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    /// Linux process state from `/proc`, `None` once the pid is gone
    #[cfg(target_os = "linux")]
    fn process_state(pid: u32) -> Option<char> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        let (_, rest) = stat.rsplit_once(") ")?;
        rest.chars().next()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_whole_pipeline() {
        let temp = tempfile::TempDir::new().unwrap();
        let pid_file = temp.path().join("sleep.pid");
        let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());

        let result = run_command_with_timeout("sh", &sh(&script), Duration::from_millis(300));
        assert!(matches!(result, Err(Error::Timeout(_))));

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();

        // Killed processes may linger briefly as zombies
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut alive = true;
        while Instant::now() < deadline {
            alive = !matches!(process_state(pid), None | Some('Z') | Some('X'));
            if !alive {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(!alive, "background sleep {} survived the timeout", pid);
    }

    #[test]
    fn test_missing_program() {
        let result = run_command_with_timeout(
            "definitely-not-a-real-binary-12345",
            &[],
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(Error::CommandFailed(_))));
    }
}
