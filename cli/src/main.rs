use std::fs;
use std::io::{BufRead, Read};
use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dut_facts_core::{HeaderRule, IndentedLines, TableParser};
use dut_facts_gather::config::{DutConfig, Inventory};
use dut_facts_gather::features::gather_features;
use dut_facts_gather::firmware::{self, ComponentKind, InstallPlan, gather_status};
use dut_facts_gather::output::{
    OutputFormat, format_reports, format_table, format_value, render_markdown, render_table,
};
use dut_facts_gather::platform::gather_platform;
use dut_facts_gather::report::failure_code_summary;
use dut_facts_gather::sfp::check_ports;
use dut_facts_gather::techsupport::{SetupKind, TechsupportSetup, run_with_setup};
use dut_facts_gather::wjh::{self, ExpectedPacket, SHOW_WJH, WjhContext};
use dut_facts_gather::{CommandRunner, GatherError, gather_facts, gather_inventory};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dut-facts")]
#[command(about = "Parse switch show-command tables and gather facts from a device under test")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a table from stdin without contacting a device.
    ParseStdin(ParseStdinArgs),
    /// Parse a table from a file without contacting a device.
    ParseFile(ParseFileArgs),
    /// Show feature states.
    Features(QueryArgs),
    /// Show the platform string.
    Platform(TargetArgs),
    /// Show firmware component versions.
    FwStatus(QueryArgs),
    /// Plan a firmware install from the binaries tree.
    FwPlan(FwPlanArgs),
    /// Stage, install and verify the planned firmware image, then restore the latest one.
    FwInstall(FwPlanArgs),
    /// Show the What-Just-Happened drops table.
    Wjh(QueryArgs),
    /// Check that a packet appears in the What-Just-Happened drops table.
    WjhVerify(WjhVerifyArgs),
    /// Read SFP EEPROMs.
    Sfp(SfpArgs),
    /// Gather every fact from one device or an inventory.
    Gather(GatherArgs),
    /// Run the tech-support dump loop.
    Techsupport(TechsupportArgs),
}

#[derive(Debug, Args)]
struct ParserArgs {
    /// Header continuation label merged into the column above (repeatable).
    #[arg(long = "header-rule")]
    header_rules: Vec<String>,
    /// Treat indented lines as new records that repeat the previous row's leading cells.
    #[arg(long)]
    fill_down: bool,
    /// Separator line character.
    #[arg(long, default_value_t = dut_facts_core::DEFAULT_MARKER)]
    marker: char,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct ParseStdinArgs {
    #[command(flatten)]
    parser: ParserArgs,
}

#[derive(Debug, Args)]
struct ParseFileArgs {
    /// Path to a file holding captured command output.
    #[arg(long)]
    input: PathBuf,
    #[command(flatten)]
    parser: ParserArgs,
}

#[derive(Debug, Args)]
struct TargetArgs {
    /// Device configuration YAML.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Device host name or address.
    #[arg(long)]
    host: Option<String>,
    /// SSH user.
    #[arg(long)]
    user: Option<String>,
    /// SSH port.
    #[arg(long)]
    port: Option<u16>,
    /// SSH identity file.
    #[arg(long)]
    identity_file: Option<PathBuf>,
    /// Run commands on this machine instead of over ssh.
    #[arg(long)]
    local: bool,
    /// Per-command timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Output format.
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct FwPlanArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Component to plan for.
    #[arg(long, value_enum)]
    component: ComponentKind,
    /// Directory holding `bios/` and `cpld/` image trees (overrides the config).
    #[arg(long)]
    binaries: Option<PathBuf>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct WjhVerifyArgs {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long)]
    src_mac: String,
    #[arg(long)]
    dst_mac: String,
    #[arg(long)]
    src_ip: IpAddr,
    #[arg(long)]
    dst_ip: IpAddr,
    /// IP protocol number (6 tcp, 17 udp, 2 igmp, 4 ipencap).
    #[arg(long)]
    proto: u8,
    /// TCP source port; requires --dport.
    #[arg(long, requires = "dport")]
    sport: Option<u16>,
    /// TCP destination port; requires --sport.
    #[arg(long, requires = "sport")]
    dport: Option<u16>,
}

#[derive(Debug, Args)]
struct SfpArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Port to check (repeatable, default: every port).
    #[arg(long = "port")]
    ports: Vec<String>,
    /// Output format.
    #[arg(long, default_value = "table")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct GatherArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Inventory YAML listing several devices.
    #[arg(long, conflicts_with_all = ["config", "host", "local"])]
    inventory: Option<PathBuf>,
    /// Number of devices gathered in parallel (default: number of CPUs).
    #[arg(long)]
    jobs: Option<usize>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct TechsupportArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// Number of dumps (overrides the config).
    #[arg(long)]
    loops: Option<usize>,
    /// Seconds between dumps (overrides the config).
    #[arg(long)]
    delay: Option<u64>,
    /// Log window in minutes (default: varies per run).
    #[arg(long)]
    since: Option<u32>,
    /// Configuration to run the dumps under.
    #[arg(long, value_enum, default_value = "none")]
    setup: SetupKind,
    /// Local rules file applied by --setup acl or mirroring.
    #[arg(long)]
    rules_file: Option<PathBuf>,
    /// Local rules file that removes what --rules-file added.
    #[arg(long)]
    remove_rules_file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::ParseStdin(args) => run_parse_stdin(args),
        Command::ParseFile(args) => run_parse_file(args),
        Command::Features(args) => run_features(args),
        Command::Platform(args) => run_platform(args),
        Command::FwStatus(args) => run_fw_status(args),
        Command::FwPlan(args) => run_fw_plan(args),
        Command::FwInstall(args) => run_fw_install(args),
        Command::Wjh(args) => run_wjh(args),
        Command::WjhVerify(args) => run_wjh_verify(args),
        Command::Sfp(args) => run_sfp(args),
        Command::Gather(args) => run_gather(args),
        Command::Techsupport(args) => run_techsupport(args),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// offline parsing
// ---------------------------------------------------------------------------

fn run_parse_stdin(args: ParseStdinArgs) -> Result<(), String> {
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|err| format!("Failed to read stdin: {err}"))?;
    run_parse_text(&args.parser, &text)
}

fn run_parse_file(args: ParseFileArgs) -> Result<(), String> {
    let text = fs::read_to_string(&args.input)
        .map_err(|err| format!("Failed to read '{}': {err}", args.input.display()))?;
    run_parse_text(&args.parser, &text)
}

fn run_parse_text(args: &ParserArgs, text: &str) -> Result<(), String> {
    let table = build_parser(args)
        .parse_table(text)
        .map_err(|err| format!("Failed to parse table: {err}"))?;
    debug!(columns = table.columns.len(), records = table.len(), "parsed table");
    print!("{}", terminated(format_table(&table, args.format)?));
    Ok(())
}

fn build_parser(args: &ParserArgs) -> TableParser {
    let mut parser = TableParser::new().with_marker(args.marker);
    for label in &args.header_rules {
        parser = parser.with_header_rule(HeaderRule::new(label.as_str()));
    }
    if args.fill_down {
        parser = parser.with_indented_lines(IndentedLines::FillDown);
    }
    parser
}

// ---------------------------------------------------------------------------
// device queries
// ---------------------------------------------------------------------------

impl TargetArgs {
    /// Builds the device configuration from `--config` and the overrides.
    fn resolve(&self) -> Result<DutConfig, String> {
        let mut config = match &self.config {
            Some(path) => DutConfig::load(path)
                .map_err(|err| format!("Failed to load '{}': {err}", path.display()))?,
            None => match (&self.host, self.local) {
                (Some(host), _) => DutConfig::new(host.as_str()),
                (None, true) => DutConfig::new("localhost"),
                (None, false) => {
                    return Err(
                        "Specify a device: --config, --host, or --local".to_string(),
                    );
                }
            },
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if self.user.is_some() {
            config.user = self.user.clone();
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if self.identity_file.is_some() {
            config.identity_file = self.identity_file.clone();
        }
        if self.local {
            config.local = true;
        }
        if let Some(timeout) = self.timeout {
            config.command_timeout_secs = timeout;
        }
        Ok(config)
    }

    fn connect(&self) -> Result<(DutConfig, Box<dyn CommandRunner>), String> {
        let config = self.resolve()?;
        let runner = config.runner();
        debug!(host = runner.host(), local = config.local, "connected runner");
        Ok((config, runner))
    }
}

fn run_features(args: QueryArgs) -> Result<(), String> {
    let (_, runner) = args.target.connect()?;
    let features = gather_features(runner.as_ref()).map_err(|e| e.to_string())?;
    let rows = features
        .iter()
        .map(|(name, status)| vec![name.to_string(), status.to_string()])
        .collect();
    print!(
        "{}",
        terminated(format_rows(&features, &["Feature", "Status"], rows, args.format)?)
    );
    Ok(())
}

fn run_platform(args: TargetArgs) -> Result<(), String> {
    let (_, runner) = args.connect()?;
    let platform = gather_platform(runner.as_ref()).map_err(|e| e.to_string())?;
    println!("{platform}");
    Ok(())
}

fn run_fw_status(args: QueryArgs) -> Result<(), String> {
    let (_, runner) = args.target.connect()?;
    let status = gather_status(runner.as_ref()).map_err(|e| e.to_string())?;
    let rows = status
        .entries()
        .iter()
        .map(|entry| {
            vec![
                entry.chassis.clone(),
                entry.module.clone(),
                entry.component.clone(),
                entry.version.clone(),
                entry.description.clone(),
            ]
        })
        .collect();
    let headers = ["Chassis", "Module", "Component", "Version", "Description"];
    print!(
        "{}",
        terminated(format_rows(&status, &headers, rows, args.format)?)
    );
    Ok(())
}

/// Connects and selects the install plan for `args.component`.
fn plan_install(
    args: &FwPlanArgs,
) -> Result<(Box<dyn CommandRunner>, String, InstallPlan), String> {
    let (config, runner) = args.target.connect()?;
    let binaries = args
        .binaries
        .clone()
        .or(config.firmware.binaries_path)
        .ok_or_else(|| {
            "No binaries directory: pass --binaries or set firmware.binaries_path".to_string()
        })?;

    let platform = gather_platform(runner.as_ref()).map_err(|e| e.to_string())?;
    let status = gather_status(runner.as_ref()).map_err(|e| e.to_string())?;
    let versions = firmware::available_versions(args.component, &binaries, &platform, &status)
        .map_err(|e| e.to_string())?;
    let plan = InstallPlan::select(args.component, &versions).map_err(|e| e.to_string())?;
    Ok((runner, platform, plan))
}

fn run_fw_plan(args: FwPlanArgs) -> Result<(), String> {
    let (_, platform, plan) = plan_install(&args)?;

    #[derive(Serialize)]
    struct PlanOutput<'a> {
        platform: &'a str,
        plan: &'a InstallPlan,
        install_command: String,
        completion: String,
    }

    let handler = args.component.handler();
    let output = PlanOutput {
        platform: &platform,
        plan: &plan,
        install_command: plan.install_command().map_err(|e| e.to_string())?,
        completion: handler.completion().to_string(),
    };
    print!("{}", terminated(format_value(&output, args.format)?));
    Ok(())
}

fn run_fw_install(args: FwPlanArgs) -> Result<(), String> {
    let (runner, _, plan) = plan_install(&args)?;
    let host = runner.host().to_string();
    let outcome = firmware::execute_plan(runner.as_ref(), &plan, |completion| {
        eprintln!("{host}: {} installed, {completion} required.", plan.component);
        eprintln!("Press Enter once the device is back up.");
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(GatherError::Io)?;
        Ok(())
    })
    .map_err(|e| e.to_string())?;
    print!("{}", terminated(format_value(&outcome, args.format)?));
    Ok(())
}

fn load_wjh(runner: &dyn CommandRunner) -> Result<WjhContext, String> {
    let features = gather_features(runner).map_err(|e| e.to_string())?;
    WjhContext::load(runner, &features).map_err(|e| e.to_string())
}

fn run_wjh(args: QueryArgs) -> Result<(), String> {
    let (_, runner) = args.target.connect()?;
    let context = load_wjh(runner.as_ref())?;
    if !context.enabled {
        return Err(format!("{} is not enabled", wjh::WJH_FEATURE));
    }
    let text = runner.run_checked(SHOW_WJH).map_err(|e| e.to_string())?;
    let table = wjh::wjh_parser()
        .parse_table(&text)
        .map_err(|err| format!("Failed to parse '{SHOW_WJH}': {err}"))?;
    print!("{}", terminated(format_table(&table, args.format)?));
    Ok(())
}

fn run_wjh_verify(args: WjhVerifyArgs) -> Result<(), String> {
    let (_, runner) = args.target.connect()?;
    let context = load_wjh(runner.as_ref())?;
    let mut packet = ExpectedPacket::new(
        &args.src_mac,
        &args.dst_mac,
        args.src_ip,
        args.dst_ip,
        args.proto,
    );
    if let (Some(sport), Some(dport)) = (args.sport, args.dport) {
        packet = packet.with_tcp_ports(sport, dport);
    }
    let found = wjh::verify_drop(runner.as_ref(), &context, &packet).map_err(|e| e.to_string())?;
    if !found {
        return Err(format!(
            "no drop entry for {} -> {} on {}",
            args.src_ip,
            args.dst_ip,
            runner.host()
        ));
    }
    println!("drop entry found for {} -> {}", args.src_ip, args.dst_ip);
    Ok(())
}

fn run_sfp(args: SfpArgs) -> Result<(), String> {
    let (_, runner) = args.target.connect()?;
    let checks = check_ports(runner.as_ref(), &args.ports).map_err(|e| e.to_string())?;
    let rows = checks
        .iter()
        .map(|check| {
            vec![
                check.port.clone(),
                check.sfp.to_string(),
                if check.ok { "OK" } else { "FAIL" }.to_string(),
                check.detail.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print!(
        "{}",
        terminated(format_rows(
            &checks,
            &["Port", "SFP", "Result", "Detail"],
            rows,
            args.format
        )?)
    );

    let failed: Vec<&str> = checks
        .iter()
        .filter(|check| !check.ok)
        .map(|check| check.port.as_str())
        .collect();
    if !failed.is_empty() {
        return Err(format!(
            "{} port(s) failed the EEPROM check: {}",
            failed.len(),
            failed.join(", ")
        ));
    }
    Ok(())
}

fn run_gather(args: GatherArgs) -> Result<(), String> {
    let reports = match &args.inventory {
        Some(path) => {
            let inventory = Inventory::load(path)
                .map_err(|err| format!("Failed to load '{}': {err}", path.display()))?;
            gather_inventory(&inventory, args.jobs).map_err(|e| e.to_string())?
        }
        None => {
            let (config, runner) = args.target.connect()?;
            vec![gather_facts(runner.as_ref(), &config)]
        }
    };
    print!("{}", terminated(format_reports(&reports, args.format)?));

    let failures: usize = reports.iter().map(|report| report.failures.len()).sum();
    if failures > 0 {
        let breakdown: Vec<String> = failure_code_summary(&reports)
            .iter()
            .map(|(code, count)| format!("{count} {code}"))
            .collect();
        let failed_hosts = reports.iter().filter(|report| !report.success).count();
        return Err(format!(
            "{failures} fact(s) failed on {failed_hosts} device(s) ({})",
            breakdown.join(", ")
        ));
    }
    Ok(())
}

fn run_techsupport(args: TechsupportArgs) -> Result<(), String> {
    let (config, runner) = args.target.connect()?;
    let mut techsupport = config.techsupport;
    if let Some(loops) = args.loops {
        techsupport.loop_count = loops;
    }
    if let Some(delay) = args.delay {
        techsupport.loop_delay_secs = delay;
    }
    if args.since.is_some() {
        techsupport.since_minutes = args.since;
    }
    let setup = TechsupportSetup::new(args.setup, args.rules_file, args.remove_rules_file)
        .map_err(|e| e.to_string())?;

    let runs =
        run_with_setup(runner.as_ref(), &setup, &techsupport).map_err(|e| e.to_string())?;
    for run in &runs {
        println!("{run}");
    }
    println!("Completed {} tech-support dump(s).", runs.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Formats typed rows: tables for `table`/`markdown`, serde otherwise.
fn format_rows<T: Serialize + ?Sized>(
    value: &T,
    headers: &[&str],
    rows: Vec<Vec<String>>,
    format: OutputFormat,
) -> Result<String, String> {
    match format {
        OutputFormat::Table => Ok(render_table(headers, &rows)),
        OutputFormat::Markdown => Ok(render_markdown(headers, &rows)),
        OutputFormat::Json | OutputFormat::Yaml => format_value(value, format),
    }
}

fn terminated(mut output: String) -> String {
    if !output.ends_with('\n') {
        output.push('\n');
    }
    output
}
