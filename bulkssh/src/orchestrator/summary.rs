//! Aggregated results of a run.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::Serialize;

use crate::engine::{DeviceReport, FailureReason, Outcome};

/// One report per device, in the order the devices were given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub devices: IndexMap<String, DeviceReport>,
}

impl RunSummary {
    /// Order `reports` by `hosts`.
    ///
    /// A host without a report is recorded as failed; a report for a host
    /// not in `hosts` is dropped.
    pub fn collect<I>(hosts: &[String], reports: I) -> Self
    where
        I: IntoIterator<Item = DeviceReport>,
    {
        let mut by_host: IndexMap<String, DeviceReport> = reports
            .into_iter()
            .map(|report| (report.host.clone(), report))
            .collect();

        let devices: IndexMap<String, DeviceReport> = hosts
            .iter()
            .map(|host| {
                let report = by_host
                    .swap_remove(host)
                    .unwrap_or_else(|| missing_report(host));
                (host.clone(), report)
            })
            .collect();

        let succeeded = devices.values().filter(|r| r.is_success()).count();
        Self {
            succeeded,
            failed: devices.len() - succeeded,
            devices,
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&DeviceReport> {
        self.devices.get(host)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceReport> {
        self.devices.values()
    }

    /// Reports of devices that did not complete.
    pub fn failures(&self) -> impl Iterator<Item = &DeviceReport> {
        self.iter().filter(|r| !r.is_success())
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

fn missing_report(host: &str) -> DeviceReport {
    DeviceReport {
        host: host.to_string(),
        device: host.to_uppercase(),
        outcome: Outcome::Failed {
            reason: FailureReason::Other {
                message: "worker stopped before reporting".to_string(),
            },
        },
        commands_completed: 0,
        confirmations: 0,
        elapsed: Default::default(),
    }
}
