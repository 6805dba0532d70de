// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Blocking execution of external tools.

use std::io::{ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{QuotaError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a program to completion and returns its output
///
/// Implementations return `Err` for spawn failures, timeouts and non-zero exits.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// [`CommandRunner`] spawning real processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
    use_sudo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the tool and fail with [`QuotaError::Timeout`] after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix invocations with `sudo -n` when not running as root
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    fn command_line(&self, program: &str, args: &[String]) -> (String, Vec<String>) {
        if self.use_sudo && !nix::unistd::geteuid().is_root() {
            let mut full_args = Vec::with_capacity(args.len() + 2);
            full_args.push("-n".to_string());
            full_args.push(program.to_string());
            full_args.extend(args.iter().cloned());
            ("sudo".to_string(), full_args)
        } else {
            (program.to_string(), args.to_vec())
        }
    }

    fn wait(&self, program: &str, child: &mut Child) -> Result<std::process::ExitStatus> {
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(|e| invocation_error(program, e.to_string()));
        };

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    warn!(operation = "run_command", program = %program, timeout_secs = %timeout.as_secs(), "Command timed out, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(QuotaError::Timeout {
                        program: program.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(invocation_error(program, e.to_string())),
            }
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let (program, args) = self.command_line(program, args);
        debug!(operation = "run_command", program = %program, args = ?args, "Running command");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => invocation_error(&program, "command not found".to_string()),
                ErrorKind::PermissionDenied => {
                    QuotaError::PermissionDenied(format!("cannot execute {}: {}", program, e))
                }
                _ => invocation_error(&program, format!("failed to execute: {}", e)),
            })?;

        // Readers run alongside the wait so a chatty tool cannot fill the pipe and stall
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let status = self.wait(&program, &mut child)?;
        let output = CommandOutput {
            stdout: join_reader(stdout_reader),
            stderr: join_reader(stderr_reader),
        };

        if status.success() {
            return Ok(output);
        }

        let stderr = output.stderr.trim();
        debug!(operation = "run_command", program = %program, status = ?status.code(), stderr = %stderr, "Command failed");
        if stderr.contains("Permission denied") || stderr.contains("Operation not permitted") {
            return Err(QuotaError::PermissionDenied(format!("{}: {}", program, stderr)));
        }

        let reason = match status.code() {
            Some(code) if stderr.is_empty() => format!("exited with status {}", code),
            Some(code) => format!("exited with status {}: {}", code, stderr),
            None => format!("terminated by signal: {}", stderr),
        };
        Err(invocation_error(&program, reason))
    }
}

fn invocation_error(program: &str, reason: String) -> QuotaError {
    QuotaError::ToolInvocation {
        program: program.to_string(),
        reason,
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(reader: Option<thread::JoinHandle<String>>) -> String {
    reader.and_then(|handle| handle.join().ok()).unwrap_or_default()
}
