//! Firmware status and update checks through `fwutil`.
//!
//! `fwutil show status` prints one row per component. The chassis and module
//! names appear only on the first row of each group, so the table is parsed
//! with [`IndentedLines::FillDown`].
//!
//! Update images live in a local binaries tree laid out per component:
//!
//! ```text
//! <binaries>/bios/<platform>_latest -> releases/0ACLH004_02.02.008_960x/image
//! <binaries>/bios/<platform>_other  -> releases/0ACLH003_02.02.007_960x/image
//! <binaries>/cpld/<platform>_latest -> FW_CPLD_REV05_REV03_REV02.vme
//! ```
//!
//! Each supported [`ComponentKind`] has a [`FirmwareHandler`] that knows how
//! to read versions from that tree, how to check an installed version, and
//! what the device needs after an install to activate it.
//!
//! Images are read from that tree on the test host, so [`execute_plan`]
//! copies each one into a staging directory on the device
//! (`tmp/<COMPONENT>/`) before installing it from there.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dut_facts_core::{IndentedLines, LookupError, Record, TableParser};

use crate::error::{GatherError, Result};
use crate::runner::{CommandRunner, shell_quote};

pub const FWUTIL_STATUS: &str = "fwutil show status";

/// Device directory, relative to the login directory, that images are
/// staged under.
pub const STAGING_ROOT: &str = "tmp";

static REVISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"REV_?(\d{1,2})").expect("static regex must compile"));

static INVALID_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Invalid value for "<component_name>""#).expect("static regex must compile")
});

static INVALID_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Error: Invalid value for "fw_path""#).expect("static regex must compile")
});

static UNREACHABLE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error: Did not receive a response from remote machine\. Aborting")
        .expect("static regex must compile")
});

/// One row of `fwutil show status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    pub chassis: String,
    pub module: String,
    pub component: String,
    pub version: String,
    pub description: String,
}

impl FirmwareEntry {
    fn from_record(record: &Record) -> std::result::Result<Self, LookupError> {
        Ok(Self {
            chassis: record.field("Chassis")?.to_string(),
            module: record.get("Module").unwrap_or_default().to_string(),
            component: record.field("Component")?.to_string(),
            version: record.field("Version")?.to_string(),
            description: record.get("Description").unwrap_or_default().to_string(),
        })
    }
}

/// Parsed firmware status, in device order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FirmwareStatus {
    entries: Vec<FirmwareEntry>,
}

impl FirmwareStatus {
    pub fn from_records(records: &[Record]) -> std::result::Result<Self, LookupError> {
        let entries = records
            .iter()
            .map(FirmwareEntry::from_record)
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FirmwareEntry] {
        &self.entries
    }

    /// Looks up a component by name.
    pub fn get(&self, component: &str) -> Option<&FirmwareEntry> {
        self.entries.iter().find(|e| e.component == component)
    }

    /// Fails with the first of `components` the status does not list.
    pub fn require_components<S: AsRef<str>>(&self, components: &[S]) -> Result<()> {
        for name in components {
            let name = name.as_ref();
            if self.get(name).is_none() {
                return Err(GatherError::MissingComponent(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Parses the text of `fwutil show status`.
pub fn parse_status(text: &str) -> Result<FirmwareStatus> {
    let records = TableParser::new()
        .with_indented_lines(IndentedLines::FillDown)
        .parse(text)
        .map_err(|e| GatherError::parse(FWUTIL_STATUS, e))?;
    Ok(FirmwareStatus::from_records(&records)?)
}

/// Runs `fwutil show status` and parses the result.
pub fn gather_status(runner: &dyn CommandRunner) -> Result<FirmwareStatus> {
    let stdout = runner.run_checked(FWUTIL_STATUS)?;
    let status = parse_status(&stdout)?;
    debug!(
        host = runner.host(),
        components = status.entries().len(),
        "gathered firmware status"
    );
    Ok(status)
}

/// Firmware components with update support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ComponentKind {
    Bios,
    Cpld,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 2] = [ComponentKind::Bios, ComponentKind::Cpld];

    /// Name as printed by `fwutil`.
    pub fn name(self) -> &'static str {
        match self {
            Self::Bios => "BIOS",
            Self::Cpld => "CPLD",
        }
    }

    /// Subdirectory of the binaries tree holding this component's images.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Bios => "bios",
            Self::Cpld => "cpld",
        }
    }

    pub fn handler(self) -> &'static dyn FirmwareHandler {
        match self {
            Self::Bios => &BiosHandler,
            Self::Cpld => &CpldHandler,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ComponentKind {
    type Err = GatherError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GatherError::UnsupportedComponent(s.to_string()))
    }
}

/// What the device needs after an install before the new image runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    ColdReboot,
    PowerCycle { off_secs: u64 },
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColdReboot => write!(f, "cold reboot"),
            Self::PowerCycle { off_secs } => write!(f, "power cycle ({off_secs} s off)"),
        }
    }
}

/// An update image found in the binaries tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareImage {
    pub version: String,
    pub path: PathBuf,
}

impl FirmwareImage {
    /// Device path the image is copied to when staged for `kind`.
    pub fn staged_path(&self, kind: ComponentKind) -> Result<String> {
        let name = self.path.file_name().ok_or_else(|| {
            GatherError::Config(format!(
                "firmware image path {} has no file name",
                self.path.display()
            ))
        })?;
        Ok(format!("{}/{}", staging_dir(kind), name.to_string_lossy()))
    }
}

/// Staging directory for `kind` on the device.
pub fn staging_dir(kind: ComponentKind) -> String {
    format!("{STAGING_ROOT}/{}", kind.name())
}

/// Images available for one component and whether the latest one runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableVersions {
    pub latest: Option<FirmwareImage>,
    pub other: Option<FirmwareImage>,
    pub latest_installed: bool,
}

/// Per-component update behavior.
pub trait FirmwareHandler: Send + Sync {
    fn kind(&self) -> ComponentKind;

    /// Reads images for `platform` from the component directory and compares
    /// the latest with `running_version`.
    fn available_versions(
        &self,
        dir: &Path,
        platform: &str,
        running_version: &str,
    ) -> Result<AvailableVersions>;

    /// Whether `entry` shows `expected` installed.
    fn check_version(&self, expected: &str, entry: &FirmwareEntry) -> bool;

    fn completion(&self) -> Completion;
}

/// BIOS images are release directories holding one `.rom` file. The version
/// is the name of the directory above the release, with its last `x`
/// standing for `0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiosHandler;

impl FirmwareHandler for BiosHandler {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Bios
    }

    fn available_versions(
        &self,
        dir: &Path,
        platform: &str,
        running_version: &str,
    ) -> Result<AvailableVersions> {
        let latest = first_entry(dir, &format!("{platform}_latest"))?
            .map(|entry| bios_image(&entry))
            .transpose()?;
        let other = first_entry(dir, &format!("{platform}_other"))?
            .map(|entry| bios_image(&entry))
            .transpose()?;
        let latest_installed = latest
            .as_ref()
            .is_some_and(|image| running_version.starts_with(&image.version));
        Ok(AvailableVersions {
            latest,
            other,
            latest_installed,
        })
    }

    fn check_version(&self, expected: &str, entry: &FirmwareEntry) -> bool {
        entry.version.starts_with(expected)
    }

    fn completion(&self) -> Completion {
        Completion::ColdReboot
    }
}

/// CPLD images are single files whose names carry `REV<nn>` tokens, one per
/// CPLD on the board. Their order is not known, so versions compare as
/// multisets of revisions. There is no "other" image.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpldHandler;

impl FirmwareHandler for CpldHandler {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Cpld
    }

    fn available_versions(
        &self,
        dir: &Path,
        platform: &str,
        running_version: &str,
    ) -> Result<AvailableVersions> {
        let Some(entry) = first_entry(dir, &format!("{platform}_latest"))? else {
            return Ok(AvailableVersions::default());
        };
        let resolved = fs::canonicalize(&entry)?;
        let file_name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let revisions = cpld_revisions(&file_name);
        let latest_installed = running_cpld_revisions(running_version)
            .is_some_and(|running| revision_counts(&running) == revision_counts(&revisions));
        let version = revisions
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Ok(AvailableVersions {
            latest: Some(FirmwareImage {
                version,
                path: entry,
            }),
            other: None,
            latest_installed,
        })
    }

    // Revisions are not reported in a stable order, so a finished install
    // is all that is checked.
    fn check_version(&self, _expected: &str, _entry: &FirmwareEntry) -> bool {
        true
    }

    fn completion(&self) -> Completion {
        Completion::PowerCycle { off_secs: 30 }
    }
}

/// Replaces the last `x` of a release directory name with `0`.
///
/// ```
/// use dut_facts_gather::firmware::release_version;
///
/// assert_eq!(release_version("0ACLH00x_02.02.008"), "0ACLH000_02.02.008");
/// assert_eq!(release_version("2.02.008"), "2.02.008");
/// ```
pub fn release_version(dir_name: &str) -> String {
    let mut version = dir_name.to_string();
    if let Some(pos) = version.rfind('x') {
        version.replace_range(pos..pos + 1, "0");
    }
    version
}

/// Revisions named in a CPLD image file name, in file order.
///
/// ```
/// use dut_facts_gather::firmware::cpld_revisions;
///
/// assert_eq!(cpld_revisions("FW_CPLD_rev05_REV_03_REV02.vme"), vec![5, 3, 2]);
/// ```
pub fn cpld_revisions(file_name: &str) -> Vec<u32> {
    REVISION_RE
        .captures_iter(&file_name.to_uppercase())
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

/// Revisions of a running CPLD version such as `5.3.2`; `None` when a part
/// is not numeric.
pub fn running_cpld_revisions(version: &str) -> Option<Vec<u32>> {
    version
        .split('.')
        .map(|part| part.trim().parse().ok())
        .collect()
}

fn revision_counts(revisions: &[u32]) -> BTreeMap<u32, usize> {
    let mut counts = BTreeMap::new();
    for rev in revisions {
        *counts.entry(*rev).or_insert(0) += 1;
    }
    counts
}

/// First directory entry (by name) starting with `prefix`.
fn first_entry(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(prefix))
        .collect();
    names.sort();
    Ok(names.into_iter().next().map(|name| dir.join(name)))
}

fn bios_image(entry: &Path) -> Result<FirmwareImage> {
    let release = fs::canonicalize(entry)?;
    let version = release
        .parent()
        .and_then(Path::file_name)
        .map(|name| release_version(&name.to_string_lossy()))
        .ok_or_else(|| {
            GatherError::Config(format!(
                "cannot derive BIOS version from {}",
                release.display()
            ))
        })?;

    let mut roms: Vec<PathBuf> = fs::read_dir(entry)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "rom"))
        .collect();
    roms.sort();
    let path = roms.into_iter().next().ok_or_else(|| GatherError::MissingImage {
        component: ComponentKind::Bios.to_string(),
        which: "rom",
    })?;

    Ok(FirmwareImage { version, path })
}

/// Reads the images available for `kind` under `binaries`, compared with
/// the version `status` reports.
pub fn available_versions(
    kind: ComponentKind,
    binaries: &Path,
    platform: &str,
    status: &FirmwareStatus,
) -> Result<AvailableVersions> {
    let running = status
        .get(kind.name())
        .ok_or_else(|| GatherError::MissingComponent(kind.to_string()))?;
    let versions =
        kind.handler()
            .available_versions(&binaries.join(kind.dir_name()), platform, &running.version)?;
    debug!(
        component = %kind,
        running = %running.version,
        latest = ?versions.latest.as_ref().map(|i| &i.version),
        latest_installed = versions.latest_installed,
        "resolved firmware versions"
    );
    Ok(versions)
}

/// Which image to install, and what to put back afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallPlan {
    pub component: ComponentKind,
    pub install: FirmwareImage,
    /// Image to reinstall once the test install is verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<FirmwareImage>,
}

impl InstallPlan {
    /// Installs "other" and restores "latest" when the latest image already
    /// runs; installs "latest" otherwise.
    pub fn select(component: ComponentKind, versions: &AvailableVersions) -> Result<Self> {
        let missing = |which| GatherError::MissingImage {
            component: component.to_string(),
            which,
        };
        if versions.latest_installed {
            let install = versions.other.clone().ok_or_else(|| missing("other"))?;
            Ok(Self {
                component,
                install,
                restore: versions.latest.clone(),
            })
        } else {
            let install = versions.latest.clone().ok_or_else(|| missing("latest"))?;
            Ok(Self {
                component,
                install,
                restore: None,
            })
        }
    }

    /// Install command for the planned image once staged on the device.
    pub fn install_command(&self) -> Result<String> {
        let path = self.install.staged_path(self.component)?;
        Ok(install_command(self.component.name(), &path))
    }
}

/// Command line that installs `path` as `component`.
pub fn install_command(component: &str, path: &str) -> String {
    format!(
        "fwutil install chassis component {} fw -y {}",
        shell_quote(component),
        shell_quote(path)
    )
}

/// Copies `image` into the staging directory for `kind` and returns its
/// device path.
pub fn stage_image(
    runner: &dyn CommandRunner,
    kind: ComponentKind,
    image: &FirmwareImage,
) -> Result<String> {
    let dest = image.staged_path(kind)?;
    runner.run_checked(&format!("mkdir -p {}", shell_quote(&staging_dir(kind))))?;
    runner.upload(&image.path, &dest)?;
    debug!(host = runner.host(), component = %kind, dest, "staged firmware image");
    Ok(dest)
}

/// Removes the staging directory for `kind` from the device.
pub fn clear_staging(runner: &dyn CommandRunner, kind: ComponentKind) -> Result<()> {
    runner.run_checked(&format!("rm -rf {}", shell_quote(&staging_dir(kind))))?;
    Ok(())
}

/// Installs an image and returns what the device needs to activate it.
///
/// `path` must be readable by the device; see [`stage_image`].
pub fn install(runner: &dyn CommandRunner, kind: ComponentKind, path: &str) -> Result<Completion> {
    let command = install_command(kind.name(), path);
    info!(host = runner.host(), component = %kind, path, "installing firmware");
    runner.run_checked(&command)?;
    Ok(kind.handler().completion())
}

/// Re-reads the status after an install and checks the component version.
pub fn verify_install(
    runner: &dyn CommandRunner,
    kind: ComponentKind,
    expected_version: &str,
) -> Result<FirmwareEntry> {
    let status = gather_status(runner)?;
    let entry = status
        .get(kind.name())
        .cloned()
        .ok_or_else(|| GatherError::MissingComponent(kind.to_string()))?;
    if entry.version.is_empty() {
        return Err(GatherError::UnexpectedOutput {
            command: FWUTIL_STATUS.to_string(),
            detail: format!("{kind} reports no version after install"),
        });
    }
    if !kind.handler().check_version(expected_version, &entry) {
        return Err(GatherError::UnexpectedOutput {
            command: FWUTIL_STATUS.to_string(),
            detail: format!(
                "{kind} version is {}, expected {expected_version}",
                entry.version
            ),
        });
    }
    Ok(entry)
}

/// Installed versions after [`execute_plan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOutcome {
    /// Status of the component after the planned install.
    pub installed: FirmwareEntry,
    /// Status after the latest image was put back, when the plan restores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored: Option<FirmwareEntry>,
}

/// Runs an [`InstallPlan`] end to end.
///
/// For the planned image, and then for the restore image if any: stage it
/// on the device, install it, hand the [`Completion`] to `complete`, and
/// verify the reported version. `complete` must return once the device has
/// come back from the reboot or power cycle. The staging directory is
/// cleared between the two installs and removed at the end, including
/// when a step fails.
pub fn execute_plan<F>(
    runner: &dyn CommandRunner,
    plan: &InstallPlan,
    mut complete: F,
) -> Result<InstallOutcome>
where
    F: FnMut(Completion) -> Result<()>,
{
    let kind = plan.component;
    let outcome = run_plan(runner, plan, &mut complete);
    let cleanup = clear_staging(runner, kind);
    match (outcome, cleanup) {
        (Ok(outcome), Ok(())) => {
            info!(host = runner.host(), component = %kind, "firmware plan completed");
            Ok(outcome)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), cleanup) => {
            if let Err(cleanup) = cleanup {
                warn!(
                    host = runner.host(),
                    component = %kind,
                    error = %cleanup,
                    "failed to clear staging directory"
                );
            }
            Err(err)
        }
    }
}

fn run_plan<F>(
    runner: &dyn CommandRunner,
    plan: &InstallPlan,
    complete: &mut F,
) -> Result<InstallOutcome>
where
    F: FnMut(Completion) -> Result<()>,
{
    let kind = plan.component;
    let installed = install_staged(runner, kind, &plan.install, complete)?;
    let restored = match &plan.restore {
        Some(image) => {
            clear_staging(runner, kind)?;
            Some(install_staged(runner, kind, image, complete)?)
        }
        None => None,
    };
    Ok(InstallOutcome {
        installed,
        restored,
    })
}

fn install_staged<F>(
    runner: &dyn CommandRunner,
    kind: ComponentKind,
    image: &FirmwareImage,
    complete: &mut F,
) -> Result<FirmwareEntry>
where
    F: FnMut(Completion) -> Result<()>,
{
    let path = stage_image(runner, kind, image)?;
    let completion = install(runner, kind, &path)?;
    complete(completion)?;
    verify_install(runner, kind, &image.version)
}

/// Ways `fwutil install` must refuse bad input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallRejection {
    InvalidComponentName,
    InvalidPath,
    UnreachableUrl,
}

impl InstallRejection {
    pub const ALL: [InstallRejection; 3] = [
        InstallRejection::InvalidComponentName,
        InstallRejection::InvalidPath,
        InstallRejection::UnreachableUrl,
    ];

    fn pattern(self) -> &'static Regex {
        match self {
            Self::InvalidComponentName => &INVALID_NAME_RE,
            Self::InvalidPath => &INVALID_PATH_RE,
            Self::UnreachableUrl => &UNREACHABLE_URL_RE,
        }
    }

    /// Whether `text` carries this rejection's message.
    pub fn is_reported_in(self, text: &str) -> bool {
        self.pattern().is_match(text)
    }

    /// Identifies the rejection reported in `text`, if any.
    pub fn classify(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.is_reported_in(text))
    }

    /// Component and path arguments that provoke this rejection, starting
    /// from a valid component and image.
    pub fn bad_arguments(self, component: &str, image: &str) -> (String, String) {
        match self {
            Self::InvalidComponentName => ("INVALID_FW_NAME".to_string(), image.to_string()),
            Self::InvalidPath => (component.to_string(), "/this/is/invalid/url".to_string()),
            Self::UnreachableUrl => (component.to_string(), "http://not/valid/url".to_string()),
        }
    }
}

impl fmt::Display for InstallRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidComponentName => write!(f, "invalid_component_name"),
            Self::InvalidPath => write!(f, "invalid_path"),
            Self::UnreachableUrl => write!(f, "unreachable_url"),
        }
    }
}

/// Runs an install that must fail and checks it failed for `expected`.
pub fn expect_rejection(
    runner: &dyn CommandRunner,
    component: &str,
    path: &str,
    expected: InstallRejection,
) -> Result<()> {
    let command = install_command(component, path);
    let output = runner.run(&command)?;
    if output.success() {
        return Err(GatherError::UnexpectedOutput {
            command,
            detail: format!("install succeeded, expected {expected}"),
        });
    }
    if !expected.is_reported_in(&output.stderr) && !expected.is_reported_in(&output.stdout) {
        return Err(GatherError::UnexpectedOutput {
            command,
            detail: format!("no {expected} message in output"),
        });
    }
    debug!(host = runner.host(), rejection = %expected, "install rejected as expected");
    Ok(())
}

/// Checks every [`InstallRejection`] against a valid component and image.
pub fn check_rejections(runner: &dyn CommandRunner, component: &str, image: &str) -> Result<()> {
    for rejection in InstallRejection::ALL {
        let (bad_component, bad_path) = rejection.bad_arguments(component, image);
        expect_rejection(runner, &bad_component, &bad_path, rejection)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, ScriptedRunner};

    const PLATFORM: &str = "x86_64-mlnx_msn2410-r0";

    const STATUS: &str = "\
Chassis        Module  Component  Version                  Description
-------------  ------  ---------  -----------------------  ----------------------------------------
MSN2410        N/A     BIOS       0ACLH003_02.02.007_9600  BIOS - Basic Input/Output System
                       CPLD       5.3.2                    CPLD - Complex Programmable Logic Device
";

    fn status() -> FirmwareStatus {
        parse_status(STATUS).unwrap()
    }

    #[test]
    fn test_parse_status_fills_chassis() {
        let status = status();
        assert_eq!(status.entries().len(), 2);
        let cpld = status.get("CPLD").unwrap();
        assert_eq!(cpld.chassis, "MSN2410");
        assert_eq!(cpld.module, "N/A");
        assert_eq!(cpld.version, "5.3.2");
    }

    #[test]
    fn test_require_components() {
        let status = status();
        assert!(status.require_components(&["BIOS", "CPLD"]).is_ok());
        let err = status.require_components(&["BIOS", "ONIE"]).unwrap_err();
        assert!(matches!(err, GatherError::MissingComponent(ref c) if c == "ONIE"));
    }

    #[test]
    fn test_component_kind_from_str() {
        assert_eq!("bios".parse::<ComponentKind>().unwrap(), ComponentKind::Bios);
        assert_eq!(" CPLD".parse::<ComponentKind>().unwrap(), ComponentKind::Cpld);
        assert!(matches!(
            "ONIE".parse::<ComponentKind>(),
            Err(GatherError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn test_release_version_replaces_last_x() {
        assert_eq!(release_version("0ACLHx0x_02.02.007"), "0ACLHx00_02.02.007");
    }

    #[test]
    fn test_cpld_revisions_variants() {
        assert_eq!(cpld_revisions("fw_cpld_REV_05_REV3.vme"), vec![5, 3]);
        assert!(cpld_revisions("fw_cpld.vme").is_empty());
        assert_eq!(running_cpld_revisions("5.3.2"), Some(vec![5, 3, 2]));
        assert_eq!(running_cpld_revisions("5.x"), None);
    }

    #[test]
    fn test_completion_per_component() {
        assert_eq!(
            ComponentKind::Bios.handler().completion(),
            Completion::ColdReboot
        );
        assert_eq!(
            ComponentKind::Cpld.handler().completion(),
            Completion::PowerCycle { off_secs: 30 }
        );
        assert_eq!(ComponentKind::Cpld.handler().kind(), ComponentKind::Cpld);
    }

    #[test]
    fn test_bios_check_version_is_prefix_match() {
        let entry = status().get("BIOS").cloned().unwrap();
        let bios = ComponentKind::Bios.handler();
        assert!(bios.check_version("0ACLH003_02.02.007", &entry));
        assert!(!bios.check_version("0ACLH004_02.02.008", &entry));
        assert!(ComponentKind::Cpld.handler().check_version("anything", &entry));
    }

    #[cfg(unix)]
    fn binaries_tree() -> tempfile::TempDir {
        use std::os::unix::fs::symlink;

        let root = tempfile::tempdir().unwrap();
        let bios = root.path().join("bios");
        let releases = root.path().join("releases");
        for (release, rom) in [
            ("0ACLH003_02.02.007_960x", "a.rom"),
            ("0ACLH004_02.02.008_960x", "b.rom"),
        ] {
            let image = releases.join(release).join("image");
            fs::create_dir_all(&image).unwrap();
            fs::write(image.join(rom), b"rom").unwrap();
            fs::write(image.join("notes.txt"), b"").unwrap();
        }
        fs::create_dir_all(&bios).unwrap();
        symlink(
            releases.join("0ACLH003_02.02.007_960x").join("image"),
            bios.join(format!("{PLATFORM}_latest")),
        )
        .unwrap();
        symlink(
            releases.join("0ACLH004_02.02.008_960x").join("image"),
            bios.join(format!("{PLATFORM}_other")),
        )
        .unwrap();

        let cpld = root.path().join("cpld");
        fs::create_dir_all(&cpld).unwrap();
        let vme = root.path().join("FW_MSN2410_CPLD_REV02_REV05_rev03.vme");
        fs::write(&vme, b"vme").unwrap();
        symlink(&vme, cpld.join(format!("{PLATFORM}_latest"))).unwrap();

        root
    }

    #[cfg(unix)]
    #[test]
    fn test_bios_versions_from_tree() {
        let root = binaries_tree();
        let versions =
            available_versions(ComponentKind::Bios, root.path(), PLATFORM, &status()).unwrap();

        let latest = versions.latest.clone().unwrap();
        assert_eq!(latest.version, "0ACLH003_02.02.007_9600");
        assert!(latest.path.ends_with("a.rom"));
        assert_eq!(
            versions.other.as_ref().unwrap().version,
            "0ACLH004_02.02.008_9600"
        );
        assert!(versions.latest_installed);

        let plan = InstallPlan::select(ComponentKind::Bios, &versions).unwrap();
        assert_eq!(plan.install.version, "0ACLH004_02.02.008_9600");
        assert_eq!(plan.restore.unwrap().version, "0ACLH003_02.02.007_9600");
    }

    #[cfg(unix)]
    #[test]
    fn test_cpld_versions_compare_as_multiset() {
        let root = binaries_tree();
        let versions =
            available_versions(ComponentKind::Cpld, root.path(), PLATFORM, &status()).unwrap();
        let latest = versions.latest.clone().unwrap();
        assert_eq!(latest.version, "2.5.3");
        assert!(versions.latest_installed);
        assert!(versions.other.is_none());

        let err = InstallPlan::select(ComponentKind::Cpld, &versions).unwrap_err();
        assert!(matches!(err, GatherError::MissingImage { which: "other", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_versions_for_unknown_platform_are_empty() {
        let root = binaries_tree();
        let versions =
            available_versions(ComponentKind::Cpld, root.path(), "x86_64-other", &status())
                .unwrap();
        assert_eq!(versions, AvailableVersions::default());
    }

    #[test]
    fn test_plan_installs_latest_when_not_running() {
        let versions = AvailableVersions {
            latest: Some(FirmwareImage {
                version: "2".into(),
                path: "/fw/latest.rom".into(),
            }),
            other: None,
            latest_installed: false,
        };
        let plan = InstallPlan::select(ComponentKind::Bios, &versions).unwrap();
        assert_eq!(plan.install.version, "2");
        assert!(plan.restore.is_none());

        let err = InstallPlan::select(ComponentKind::Bios, &AvailableVersions::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "no latest firmware image for BIOS");
    }

    #[test]
    fn test_install_command() {
        assert_eq!(
            install_command("BIOS", "/tmp/BIOS/a.rom"),
            "fwutil install chassis component BIOS fw -y /tmp/BIOS/a.rom"
        );
    }

    #[test]
    fn test_install_command_quotes_paths() {
        assert_eq!(
            install_command("BIOS", "tmp/BIOS/bios image.rom"),
            "fwutil install chassis component BIOS fw -y 'tmp/BIOS/bios image.rom'"
        );
    }

    #[test]
    fn test_plan_install_command_uses_staged_path() {
        let plan = InstallPlan {
            component: ComponentKind::Bios,
            install: FirmwareImage {
                version: "0ACLH004_02.02.008_9600".into(),
                path: "/srv/firmware/releases/0ACLH004_02.02.008_960x/image/b.rom".into(),
            },
            restore: None,
        };
        assert_eq!(
            plan.install_command().unwrap(),
            "fwutil install chassis component BIOS fw -y tmp/BIOS/b.rom"
        );
    }

    fn fw_image(version: &str, path: &str) -> FirmwareImage {
        FirmwareImage {
            version: version.into(),
            path: path.into(),
        }
    }

    #[test]
    fn test_execute_plan_stages_installs_and_restores() {
        let runner = ScriptedRunner::new("dut")
            .respond("mkdir -p tmp/CPLD", "")
            .respond("rm -rf tmp/CPLD", "")
            .respond(install_command("CPLD", "tmp/CPLD/old.vme"), "")
            .respond(install_command("CPLD", "tmp/CPLD/new.vme"), "")
            .respond(FWUTIL_STATUS, STATUS);
        let plan = InstallPlan {
            component: ComponentKind::Cpld,
            install: fw_image("5.3.1", "/srv/fw/cpld/old.vme"),
            restore: Some(fw_image("5.3.2", "/srv/fw/cpld/new.vme")),
        };

        let mut completed_after = Vec::new();
        let outcome = execute_plan(&runner, &plan, |completion| {
            assert_eq!(completion, Completion::PowerCycle { off_secs: 30 });
            completed_after.push(runner.calls().len());
            Ok(())
        })
        .unwrap();

        assert_eq!(outcome.installed.component, "CPLD");
        assert!(outcome.restored.is_some());
        assert_eq!(
            runner.calls(),
            vec![
                "mkdir -p tmp/CPLD",
                "upload /srv/fw/cpld/old.vme tmp/CPLD/old.vme",
                "fwutil install chassis component CPLD fw -y tmp/CPLD/old.vme",
                "fwutil show status",
                "rm -rf tmp/CPLD",
                "mkdir -p tmp/CPLD",
                "upload /srv/fw/cpld/new.vme tmp/CPLD/new.vme",
                "fwutil install chassis component CPLD fw -y tmp/CPLD/new.vme",
                "fwutil show status",
                "rm -rf tmp/CPLD",
            ]
        );
        // Completion runs right after each install, before its status check.
        assert_eq!(completed_after, vec![3, 8]);
    }

    #[test]
    fn test_execute_plan_clears_staging_on_failure() {
        let runner = ScriptedRunner::new("dut")
            .respond("mkdir -p tmp/BIOS", "")
            .respond("rm -rf tmp/BIOS", "")
            .respond(install_command("BIOS", "tmp/BIOS/b.rom"), "")
            .respond(FWUTIL_STATUS, STATUS);
        let plan = InstallPlan {
            component: ComponentKind::Bios,
            install: fw_image("0ACLH004_02.02.008", "/srv/fw/b.rom"),
            restore: None,
        };

        let err = execute_plan(&runner, &plan, |_| Ok(())).unwrap_err();
        assert!(matches!(err, GatherError::UnexpectedOutput { .. }));
        assert_eq!(runner.calls().last().map(String::as_str), Some("rm -rf tmp/BIOS"));
    }

    #[test]
    fn test_execute_plan_stops_when_completion_fails() {
        let runner = ScriptedRunner::new("dut")
            .respond("mkdir -p tmp/BIOS", "")
            .respond("rm -rf tmp/BIOS", "")
            .respond(install_command("BIOS", "tmp/BIOS/a.rom"), "");
        let plan = InstallPlan {
            component: ComponentKind::Bios,
            install: fw_image("0ACLH003", "/srv/fw/a.rom"),
            restore: None,
        };

        let err = execute_plan(&runner, &plan, |_| {
            Err(GatherError::Config("power controller unreachable".into()))
        })
        .unwrap_err();
        assert!(matches!(err, GatherError::Config(_)));
        assert!(!runner.calls().iter().any(|c| c == FWUTIL_STATUS));
        assert_eq!(runner.calls().last().map(String::as_str), Some("rm -rf tmp/BIOS"));
    }

    #[test]
    fn test_install_and_verify() {
        let runner = ScriptedRunner::new("dut")
            .respond(install_command("BIOS", "/tmp/a.rom"), "Firmware install ended\n")
            .respond(FWUTIL_STATUS, STATUS);
        let completion = install(&runner, ComponentKind::Bios, "/tmp/a.rom").unwrap();
        assert_eq!(completion, Completion::ColdReboot);

        let entry = verify_install(&runner, ComponentKind::Bios, "0ACLH003").unwrap();
        assert_eq!(entry.component, "BIOS");
        assert!(verify_install(&runner, ComponentKind::Bios, "0ACLH004").is_err());
    }

    #[test]
    fn test_classify_rejections() {
        assert_eq!(
            InstallRejection::classify(r#"Error: Invalid value for "<component_name>": invalid choice: X"#),
            Some(InstallRejection::InvalidComponentName)
        );
        assert_eq!(
            InstallRejection::classify(r#"Error: Invalid value for "fw_path": Path does not exist"#),
            Some(InstallRejection::InvalidPath)
        );
        assert_eq!(
            InstallRejection::classify(
                "Error: Did not receive a response from remote machine. Aborting..."
            ),
            Some(InstallRejection::UnreachableUrl)
        );
        assert_eq!(InstallRejection::classify("all good"), None);
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            rc: Some(2),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_check_rejections() {
        let image = "/tmp/BIOS/a.rom";
        let runner = ScriptedRunner::new("dut")
            .respond_with(
                install_command("INVALID_FW_NAME", image),
                failed(r#"Error: Invalid value for "<component_name>": invalid choice"#),
            )
            .respond_with(
                install_command("BIOS", "/this/is/invalid/url"),
                failed(r#"Error: Invalid value for "fw_path": Path does not exist"#),
            )
            .respond_with(
                install_command("BIOS", "http://not/valid/url"),
                failed("Error: Did not receive a response from remote machine. Aborting..."),
            );
        check_rejections(&runner, "BIOS", image).unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_rejection_must_fail_with_expected_message() {
        let path = "/this/is/invalid/url";
        let command = install_command("BIOS", path);

        let runner = ScriptedRunner::new("dut").respond(command.clone(), "");
        let err =
            expect_rejection(&runner, "BIOS", path, InstallRejection::InvalidPath).unwrap_err();
        assert!(err.to_string().contains("install succeeded"));

        let runner = ScriptedRunner::new("dut").respond_with(command, failed("Aborted!"));
        let err =
            expect_rejection(&runner, "BIOS", path, InstallRejection::InvalidPath).unwrap_err();
        assert!(err.to_string().contains("no invalid_path message"));
    }
}
