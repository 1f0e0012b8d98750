//! Fact collection for one device or a whole inventory.
//!
//! A failing fact never aborts collection: it is recorded in the report and
//! the remaining facts are still gathered. Devices are independent, so an
//! inventory is gathered on a rayon pool.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::{DutConfig, Inventory};
use crate::error::Result;
use crate::features::gather_features;
use crate::firmware::gather_status;
use crate::platform::gather_platform;
use crate::report::GatherReport;
use crate::runner::CommandRunner;
use crate::wjh::WjhContext;

/// Collects platform, feature, firmware and WJH facts from one device.
pub fn gather_facts(runner: &dyn CommandRunner, config: &DutConfig) -> GatherReport {
    let mut report = GatherReport::new(runner.host(), Utc::now().to_rfc3339());
    info!(host = runner.host(), "gathering facts");

    let platform = keep(&mut report, "platform", gather_platform(runner));
    let features = keep(&mut report, "features", gather_features(runner));

    if let Some(status) = keep(&mut report, "firmware", gather_status(runner)) {
        if let Some(platform) = platform.as_deref() {
            if config.firmware.components.contains_key(platform) {
                let checked = config
                    .firmware
                    .components_for(platform)
                    .and_then(|names| status.require_components(&names));
                keep(&mut report, "firmware", checked);
            } else {
                debug!(host = runner.host(), platform, "no firmware components configured");
            }
        }
        report.firmware = Some(status);
    }

    if let Some(features) = &features {
        let wjh = keep(&mut report, "wjh", WjhContext::load(runner, features));
        report.wjh = wjh;
    }

    report.platform = platform;
    report.features = features;
    info!(
        host = runner.host(),
        success = report.success,
        failures = report.failures.len(),
        "finished gathering facts"
    );
    report
}

fn keep<T>(report: &mut GatherReport, fact: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(host = %report.host, fact, error = %err, "fact collection failed");
            report.record_failure(fact, &err);
            None
        }
    }
}

/// Gathers every device in `inventory` through its configured runner.
///
/// Reports are sorted by host.
pub fn gather_inventory(inventory: &Inventory, jobs: Option<usize>) -> Result<Vec<GatherReport>> {
    gather_inventory_with(inventory, jobs, DutConfig::runner)
}

/// Like [`gather_inventory`] with a caller-supplied runner per device.
pub fn gather_inventory_with<F>(
    inventory: &Inventory,
    jobs: Option<usize>,
    make_runner: F,
) -> Result<Vec<GatherReport>>
where
    F: Fn(&DutConfig) -> Box<dyn CommandRunner> + Sync,
{
    use rayon::prelude::*;

    let jobs = jobs
        .filter(|jobs| *jobs > 0)
        .unwrap_or_else(|| default_parallel_jobs(inventory.duts.len()));
    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    debug!(jobs, duts = inventory.duts.len(), "gathering inventory");

    let mut reports: Vec<GatherReport> = pool.install(|| {
        inventory
            .duts
            .par_iter()
            .map(|dut| {
                let runner = make_runner(dut);
                gather_facts(runner.as_ref(), dut)
            })
            .collect()
    });
    reports.sort_by(|a, b| a.host.cmp(&b.host));
    Ok(reports)
}

fn default_parallel_jobs(dut_count: usize) -> usize {
    let cpu_count = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(4);
    cpu_count.min(16).max(1).min(dut_count.max(1))
}
