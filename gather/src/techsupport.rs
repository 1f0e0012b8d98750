//! Tech-support dump loop and the configuration it runs under.
//!
//! `show techsupport` is run repeatedly to make sure the dump keeps working
//! while ACL rules or a mirror session are configured. A
//! [`TechsupportSetup`] describes that configuration; [`run_with_setup`]
//! applies it, drives the loop, and tears it down again.

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TechsupportConfig;
use crate::error::{GatherError, Result};
use crate::runner::{CommandRunner, shell_quote};

/// Device directory that rules files are copied into.
pub const SETUP_DIR: &str = "tmp/techsupport";

/// `show techsupport` limited to logs from the last `since_minutes`.
pub fn techsupport_command(since_minutes: u32) -> String {
    format!("show techsupport --since='{since_minutes} minute ago'")
}

/// A log window between 1 and 60 minutes, varying from run to run.
pub fn pick_since_minutes() -> u32 {
    Utc::now().nanosecond() % 60 + 1
}

/// Applies an ACL rules file already present on the device.
pub fn acl_update_command(rules_file: &str) -> String {
    format!("config acl update full {}", shell_quote(rules_file))
}

/// Loads an ACL rules file through `acl-loader`, binding mirroring rules to
/// `session` when given.
pub fn acl_loader_command(rules_file: &str, session: Option<&str>) -> String {
    let mut command = format!("acl-loader update full {}", shell_quote(rules_file));
    if let Some(session) = session {
        command.push_str(&format!(" --session_name={}", shell_quote(session)));
    }
    command
}

/// An ERSPAN mirror session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorSession {
    pub name: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub dscp: u8,
    pub ttl: u8,
    /// GRE protocol type, e.g. `0x6558`.
    pub gre_type: String,
    pub queue: u8,
}

impl Default for MirrorSession {
    fn default() -> Self {
        Self {
            name: "test_session_1".to_string(),
            src_ip: "1.1.1.1".to_string(),
            dst_ip: "2.2.2.2".to_string(),
            dscp: 8,
            ttl: 1,
            gre_type: "0x6558".to_string(),
            queue: 0,
        }
    }
}

impl MirrorSession {
    pub fn add_command(&self) -> String {
        format!(
            "config mirror_session add {} {} {} {} {} {} {}",
            shell_quote(&self.name),
            shell_quote(&self.src_ip),
            shell_quote(&self.dst_ip),
            self.dscp,
            self.ttl,
            shell_quote(&self.gre_type),
            self.queue
        )
    }

    pub fn remove_command(&self) -> String {
        format!("config mirror_session remove {}", shell_quote(&self.name))
    }
}

/// Kind of configuration the dump loop runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum SetupKind {
    #[default]
    None,
    Acl,
    Mirroring,
}

/// Configuration applied around the dump loop.
///
/// Rules files are local paths; they are copied to [`SETUP_DIR`] on the
/// device before use. `remove_file` holds the rules that clear what
/// `rules_file` installed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TechsupportSetup {
    #[default]
    None,
    Acl {
        rules_file: PathBuf,
        remove_file: PathBuf,
    },
    Mirroring {
        session: MirrorSession,
        rules_file: PathBuf,
        remove_file: PathBuf,
    },
}

impl TechsupportSetup {
    /// Builds the setup for `kind`, which needs both rules files unless it
    /// is [`SetupKind::None`].
    pub fn new(
        kind: SetupKind,
        rules_file: Option<PathBuf>,
        remove_file: Option<PathBuf>,
    ) -> Result<Self> {
        if kind == SetupKind::None {
            return Ok(Self::None);
        }
        let (Some(rules_file), Some(remove_file)) = (rules_file, remove_file) else {
            return Err(GatherError::Config(format!(
                "{kind} setup needs a rules file and a remove-rules file"
            )));
        };
        Ok(match kind {
            SetupKind::Acl => Self::Acl {
                rules_file,
                remove_file,
            },
            _ => Self::Mirroring {
                session: MirrorSession::default(),
                rules_file,
                remove_file,
            },
        })
    }

    pub fn kind(&self) -> SetupKind {
        match self {
            Self::None => SetupKind::None,
            Self::Acl { .. } => SetupKind::Acl,
            Self::Mirroring { .. } => SetupKind::Mirroring,
        }
    }

    /// Configures the device.
    pub fn apply(&self, runner: &dyn CommandRunner) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Acl { rules_file, .. } => {
                runner.run_checked(&format!("mkdir -p {SETUP_DIR}"))?;
                let staged = stage_rules(runner, rules_file)?;
                runner.run_checked(&acl_update_command(&staged))?;
                Ok(())
            }
            Self::Mirroring {
                session,
                rules_file,
                ..
            } => {
                runner.run_checked(&format!("mkdir -p {SETUP_DIR}"))?;
                let staged = stage_rules(runner, rules_file)?;
                runner.run_checked(&session.add_command())?;
                runner.run_checked(&acl_loader_command(&staged, Some(&session.name)))?;
                Ok(())
            }
        }
    }

    /// Removes what [`apply`](Self::apply) configured. Every step is
    /// attempted; the first failure is returned.
    pub fn teardown(&self, runner: &dyn CommandRunner) -> Result<()> {
        let mut first_err = None;
        let mut step = |result: Result<()>| {
            if let Err(err) = result {
                warn!(host = runner.host(), error = %err, "techsupport teardown step failed");
                first_err.get_or_insert(err);
            }
        };
        match self {
            Self::None => {}
            Self::Acl { remove_file, .. } => {
                step(stage_rules(runner, remove_file).and_then(|staged| {
                    run_step(runner, &acl_update_command(&staged))
                }));
                step(run_step(runner, &format!("rm -rf {SETUP_DIR}")));
            }
            Self::Mirroring {
                session,
                remove_file,
                ..
            } => {
                step(stage_rules(runner, remove_file).and_then(|staged| {
                    run_step(runner, &acl_loader_command(&staged, None))
                }));
                step(run_step(runner, &session.remove_command()));
                step(run_step(runner, &format!("rm -rf {SETUP_DIR}")));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl fmt::Display for SetupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Acl => write!(f, "acl"),
            Self::Mirroring => write!(f, "mirroring"),
        }
    }
}

fn run_step(runner: &dyn CommandRunner, command: &str) -> Result<()> {
    runner.run_checked(command)?;
    Ok(())
}

/// Copies a local rules file into [`SETUP_DIR`] and returns its device path.
fn stage_rules(runner: &dyn CommandRunner, local: &Path) -> Result<String> {
    let name = local.file_name().ok_or_else(|| {
        GatherError::Config(format!("rules file {} has no file name", local.display()))
    })?;
    let dest = format!("{SETUP_DIR}/{}", name.to_string_lossy());
    runner.upload(local, &dest)?;
    Ok(dest)
}

/// Timing of one completed dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechsupportRun {
    pub iteration: usize,
    pub elapsed_ms: u64,
}

impl fmt::Display for TechsupportRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {}: {} ms", self.iteration, self.elapsed_ms)
    }
}

/// Runs `show techsupport` `loop_count` times, pausing `loop_delay_secs`
/// between runs. Stops at the first failed run.
pub fn run_loop(
    runner: &dyn CommandRunner,
    config: &TechsupportConfig,
) -> Result<Vec<TechsupportRun>> {
    let since = config.since_minutes.unwrap_or_else(pick_since_minutes);
    let command = techsupport_command(since);
    let delay = Duration::from_secs(config.loop_delay_secs);
    info!(
        host = runner.host(),
        loops = config.loop_count,
        delay_secs = config.loop_delay_secs,
        since,
        "starting techsupport loop"
    );

    let mut runs = Vec::with_capacity(config.loop_count);
    for iteration in 1..=config.loop_count {
        let started = Instant::now();
        runner.run_checked(&command)?;
        let run = TechsupportRun {
            iteration,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        debug!(host = runner.host(), %run, "techsupport finished");
        runs.push(run);
        if iteration < config.loop_count && !delay.is_zero() {
            thread::sleep(delay);
        }
    }
    Ok(runs)
}

/// Applies `setup`, runs the dump loop, and tears the setup down.
///
/// Teardown runs even when the loop or the setup itself fails; the first
/// error wins.
pub fn run_with_setup(
    runner: &dyn CommandRunner,
    setup: &TechsupportSetup,
    config: &TechsupportConfig,
) -> Result<Vec<TechsupportRun>> {
    info!(host = runner.host(), setup = %setup.kind(), "applying techsupport setup");
    let result = setup.apply(runner).and_then(|()| run_loop(runner, config));
    let teardown = setup.teardown(runner);
    let runs = result?;
    teardown?;
    Ok(runs)
}
