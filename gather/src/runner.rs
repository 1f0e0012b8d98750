//! Command execution against the device under test.
//!
//! Every fact gatherer talks to the device through a [`CommandRunner`]. Two
//! runners are provided: [`SshRunner`] for a remote switch and
//! [`LocalRunner`] for running on the switch itself. Both capture stdout and
//! stderr on background threads and kill the child once the configured
//! timeout elapses. Files reach the device through
//! [`CommandRunner::upload`]: `scp` for ssh, a plain copy when local.
//!
//! # Example
//!
//! ```no_run
//! use dut_facts_gather::runner::{CommandRunner, SshRunner};
//!
//! let runner = SshRunner::new("dut-1.lab").with_user("admin");
//! let stdout = runner.run_checked("show version").unwrap();
//! println!("{stdout}");
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Typed error for command execution.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The process could not be started.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not finish in time and was killed.
    #[error("'{command}' timed out after {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// Waiting on the process failed.
    #[error("failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited unsuccessfully.
    #[error("'{command}' exited with {}: {output}", exit_label(.rc))]
    NonZeroExit {
        command: String,
        rc: Option<i32>,
        /// Captured stdout followed by stderr.
        output: String,
    },

    /// Copying a file to its destination failed.
    #[error("failed to copy {} to '{dest}': {source}", .local.display())]
    Copy {
        local: PathBuf,
        dest: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(rc: &Option<i32>) -> String {
    match rc {
        Some(rc) => format!("rc={rc}"),
        None => "signal".to_string(),
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub rc: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.rc == Some(0)
    }

    /// Returns stdout, or [`RunError::NonZeroExit`] carrying stdout and
    /// stderr when the command failed.
    pub fn into_checked(self, command: &str) -> Result<String, RunError> {
        if self.success() {
            return Ok(self.stdout);
        }
        Err(RunError::NonZeroExit {
            command: command.to_string(),
            rc: self.rc,
            output: format!("{}{}", self.stdout, self.stderr),
        })
    }
}

/// Runs shell commands on one device.
pub trait CommandRunner: Send + Sync {
    /// Host name used in logs and reports.
    fn host(&self) -> &str;

    /// Runs `command` and captures its output regardless of exit status.
    fn run(&self, command: &str) -> Result<CommandOutput, RunError>;

    /// Runs `command` and returns stdout, failing on a non-zero exit.
    fn run_checked(&self, command: &str) -> Result<String, RunError> {
        self.run(command)?.into_checked(command)
    }

    /// Copies the local file `local` to the device path `dest`.
    ///
    /// A relative `dest` resolves against the directory commands run in.
    fn upload(&self, local: &Path, dest: &str) -> Result<(), RunError>;
}

/// Quotes `arg` for a POSIX shell when it holds anything beyond plain path
/// characters.
///
/// ```
/// use dut_facts_gather::runner::shell_quote;
///
/// assert_eq!(shell_quote("/tmp/BIOS/a.rom"), "/tmp/BIOS/a.rom");
/// assert_eq!(shell_quote("/srv/fw images/a.rom"), "'/srv/fw images/a.rom'");
/// assert_eq!(shell_quote("it's"), r"'it'\''s'");
/// ```
pub fn shell_quote(arg: &str) -> Cow<'_, str> {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@,+%".contains(c));
    if plain {
        Cow::Borrowed(arg)
    } else {
        Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
    }
}

/// Runs commands through `sh -c` on the local machine.
///
/// The host name defaults to `localhost`; set it with
/// [`with_host`](Self::with_host) when the machine is a configured device.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    host: String,
    timeout: Duration,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandRunner for LocalRunner {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput, RunError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        execute(cmd, command, self.timeout)
    }

    fn upload(&self, local: &Path, dest: &str) -> Result<(), RunError> {
        std::fs::copy(local, dest).map_err(|source| RunError::Copy {
            local: local.to_path_buf(),
            dest: dest.to_string(),
            source,
        })?;
        debug!(host = %self.host, local = %local.display(), dest, "copied file");
        Ok(())
    }
}

/// Runs commands on a remote device through the system `ssh` client.
///
/// The client runs in batch mode, so authentication must not prompt: use an
/// agent or an identity file.
#[derive(Debug, Clone)]
pub struct SshRunner {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    identity_file: Option<PathBuf>,
    timeout: Duration,
}

impl SshRunner {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// Arguments passed to `ssh`, without the program name.
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = self.common_args("-p");
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    /// Arguments passed to `scp` to copy `local` to `dest` on the device.
    pub fn scp_args(&self, local: &Path, dest: &str) -> Vec<String> {
        let mut args = self.common_args("-P");
        args.push(local.display().to_string());
        args.push(format!("{}:{dest}", self.destination()));
        args
    }
}

impl CommandRunner for SshRunner {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput, RunError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args(command));
        execute(cmd, command, self.timeout)
    }

    fn upload(&self, local: &Path, dest: &str) -> Result<(), RunError> {
        let label = format!("scp {} {dest}", local.display());
        let mut cmd = Command::new("scp");
        cmd.args(self.scp_args(local, dest));
        execute(cmd, &label, self.timeout)?.into_checked(&label)?;
        Ok(())
    }
}

/// Replays canned outputs instead of touching a device.
///
/// Commands without a registered response exit with rc 127. Every command is
/// recorded so callers can assert on what was run; uploads are recorded as
/// `upload <local> <dest>` and always succeed.
///
/// ```
/// use dut_facts_gather::runner::{CommandRunner, ScriptedRunner};
///
/// let runner = ScriptedRunner::new("dut-1").respond("uptime", "up 3 days\n");
/// assert_eq!(runner.run_checked("uptime").unwrap(), "up 3 days\n");
/// assert!(runner.run_checked("reboot").is_err());
/// assert_eq!(runner.calls(), vec!["uptime", "reboot"]);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    host: String,
    responses: HashMap<String, CommandOutput>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Registers a successful response.
    pub fn respond(self, command: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.respond_with(
            command,
            CommandOutput {
                rc: Some(0),
                stdout: stdout.into(),
                stderr: String::new(),
            },
        )
    }

    /// Registers an arbitrary response, including failures.
    pub fn respond_with(mut self, command: impl Into<String>, output: CommandOutput) -> Self {
        self.responses.insert(command.into(), output);
        self
    }

    /// Commands run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput, RunError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.to_string());
        }
        Ok(self
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput {
                rc: Some(127),
                stdout: String::new(),
                stderr: format!("{command}: command not found\n"),
            }))
    }

    fn upload(&self, local: &Path, dest: &str) -> Result<(), RunError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("upload {} {dest}", local.display()));
        }
        Ok(())
    }
}

fn execute(mut cmd: Command, label: &str, timeout: Duration) -> Result<CommandOutput, RunError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
        command: label.to_string(),
        source,
    })?;

    // Drain both pipes in the background so a chatty child cannot block on
    // a full pipe buffer before it exits.
    let stdout_thread = child.stdout.take().map(drain);
    let stderr_thread = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            debug!(
                command = label,
                timeout_ms = timeout.as_millis() as u64,
                "command timed out, killing process"
            );
            kill(&mut child);
            return Err(RunError::Timeout {
                command: label.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Err(source) => {
            kill(&mut child);
            return Err(RunError::Wait {
                command: label.to_string(),
                source,
            });
        }
    };

    let stdout = collect(stdout_thread, label, "stdout");
    let stderr = collect(stderr_thread, label, "stderr");
    debug!(command = label, rc = ?status.code(), "command finished");

    Ok(CommandOutput {
        rc: status.code(),
        stdout,
        stderr,
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<Vec<u8>>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(
    handle: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    label: &str,
    stream: &str,
) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match handle.join() {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        Ok(Err(e)) => {
            debug!(command = label, stream, error = %e, "failed to read output");
            String::new()
        }
        Err(_) => String::new(),
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        if e.kind() != ErrorKind::InvalidInput {
            debug!(error = %e, "failed to kill child");
        }
    }
    let _ = child.wait();
}
