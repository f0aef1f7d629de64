//! Process Runner - Shell Invocation with Captured Streams

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::diagnostics::DiagnosticLog;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Cannot launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },

    #[error("Lost contact with `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// A command line to hand to the shell, plus where to run it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub line: String,
    pub working_dir: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    /// First word of the line, used to name the tool in messages.
    pub fn program(&self) -> &str {
        self.line.split_whitespace().next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes external commands. The pipeline only talks to this trait, so
/// tests can script tool behaviour without a TeX installation.
pub trait CommandRunner {
    fn run(&self, command: &ShellCommand, log: &DiagnosticLog) -> Result<CommandOutput, RunError>;
}

/// Runs command lines through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn shell(line: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(line);
            cmd
        }
    }

    fn wait(&self, command: &ShellCommand, mut child: Child) -> Result<CommandOutput, RunError> {
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            Some(timeout) => wait_with_deadline(&mut child, timeout).map_err(|e| match e {
                WaitFailure::Expired => RunError::TimedOut {
                    command: command.line.clone(),
                    timeout,
                },
                WaitFailure::Io(source) => RunError::Wait {
                    command: command.line.clone(),
                    source,
                },
            })?,
            None => child.wait().map_err(|source| RunError::Wait {
                command: command.line.clone(),
                source,
            })?,
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: strip_blank_lines(&collect(stdout)),
            stderr: strip_blank_lines(&collect(stderr)),
        })
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &ShellCommand, log: &DiagnosticLog) -> Result<CommandOutput, RunError> {
        let mut cmd = Self::shell(&command.line);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        log::debug!("running `{}`", command.line);
        let child = cmd.spawn().map_err(|source| RunError::Spawn {
            command: command.line.clone(),
            source,
        })?;

        let result = self.wait(command, child);
        match &result {
            Ok(output) => record_output(log, &command.line, output),
            Err(e) => log.record(format!("{}\n{}", command.line, e)),
        }
        result
    }
}

/// Append the command, its exit code and both streams to the trace.
pub fn record_output(log: &DiagnosticLog, line: &str, output: &CommandOutput) {
    if !log.is_enabled() {
        return;
    }
    let code = output
        .exit_code
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    log.record(line);
    log.record(format!("returncode: {}", code));
    log.record(format!("stderr:\n{}", output.stderr));
    log.record(format!("stdout:\n{}", output.stdout));
}

/// Drop empty lines; lines holding only spaces or `\r` are kept.
pub fn strip_blank_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn drain<R: Read + Send + 'static>(mut stream: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

enum WaitFailure {
    Expired,
    Io(io::Error),
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, WaitFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(WaitFailure::Io)? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WaitFailure::Expired);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
