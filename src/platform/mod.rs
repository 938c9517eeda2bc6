// src/platform/mod.rs

pub mod windows;

use std::io;
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process ended without an exit code.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best diagnostic text for a failed command. netsh reports most of its
    /// errors on stdout, so fall back to it when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated without exit code".to_string(),
        }
    }
}

/// Seam between the rule controller and the operating system.
#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Runs `program` to completion and captures its output.
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;

    /// Starts `program` without waiting for it.
    fn spawn_detached(&self, program: &str, args: &[String]) -> io::Result<()>;
}

/// Runs real processes, hiding console windows on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        debug!(program, ?args, "running command");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        windows::hide_console(&mut command);

        let output = command.output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_detached(&self, program: &str, args: &[String]) -> io::Result<()> {
        debug!(program, ?args, "spawning detached command");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        windows::hide_console(&mut command);

        // The child is intentionally not waited on.
        let _child = command.spawn()?;
        Ok(())
    }
}
