//! Process execution for npmship.
//!
//! Runs external binaries (the package manager, git) with an explicit working
//! directory, an environment overlay and an optional timeout, capturing both
//! output streams.
//!
//! # Example
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use std::path::Path;
//!
//! let out = npmship_process::run_command_with_timeout(
//!     "npm",
//!     &["--version"],
//!     Path::new("."),
//!     &BTreeMap::new(),
//!     None,
//! )
//! .expect("run");
//! assert!(out.success());
//! ```

use std::collections::BTreeMap;
use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Captured result of a finished (or killed) command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, `-1` when killed or terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Last non-empty stdout line.
    pub fn last_stdout_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Run `program` in `working_dir` with `env` layered over the inherited
/// environment.
///
/// With a timeout the child is killed once the deadline passes and the
/// output carries `timed_out = true` plus a note on stderr.
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    env: &BTreeMap<String, String>,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn {program}"))?;

    // Drain both pipes while waiting so a chatty child cannot block on a
    // full pipe buffer.
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let (exit_code, timed_out) = wait(&mut child, timeout)?;

    let stdout = join_output(stdout);
    let mut stderr = join_output(stderr);
    if timed_out && let Some(limit) = timeout {
        stderr.push_str(&format!(
            "\ncommand timed out after {}",
            humantime::format_duration(limit)
        ));
    }

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration: start.elapsed(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            bytes
        })
    })
}

fn join_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<(i32, bool)> {
    let Some(limit) = timeout else {
        let status = child.wait().context("failed to wait for command")?;
        return Ok((status.code().unwrap_or(-1), false));
    };

    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().context("failed to poll command")? {
            return Ok((status.code().unwrap_or(-1), false));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok((-1, true));
        }
        thread::sleep(Duration::from_millis(50));
    }
}

/// Binary to run for a tool: the override variable from `env`, then from the
/// process environment, then `default`.
pub fn program_override(var: &str, default: &str, env: &BTreeMap<String, String>) -> String {
    env.get(var)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .or_else(|| env::var(var).ok().filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// Check if a command exists in PATH
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Get the full path to a command
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}
