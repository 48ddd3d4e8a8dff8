//! Device orchestrator.
//!
//! Runs one [`SessionEngine`] per device on a fixed pool of worker tasks.
//! Workers pull devices from a shared queue one at a time, so at most
//! `threads` sessions are open at once and the rest wait their turn. A
//! device failing never affects the others.

mod summary;

pub use summary::RunSummary;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use indexmap::IndexSet;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::{EngineConfig, RunConfig};
use crate::credential::Credential;
use crate::engine::{DeviceContext, DeviceReport, SessionEngine, SessionPatterns};
use crate::error::{ConfigError, Result};
use crate::output::{ConsoleSink, FileSink, OutputMultiplexer, SinkId, expand_template};
use crate::transport::Connector;

/// Everything a worker needs, shared read-only across the pool.
struct Shared<C> {
    credential: Arc<Credential>,
    commands: Arc<[String]>,
    engine: Arc<EngineConfig>,
    patterns: Arc<SessionPatterns>,
    hide_output: bool,
    output_file_template: Option<String>,
    connector: Arc<C>,
}

/// Runs the command list on every device with bounded parallelism.
pub struct Orchestrator<C: Connector> {
    devices: Vec<String>,
    threads: usize,
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Orchestrator<C> {
    /// Validate inputs and compile the session patterns.
    ///
    /// Repeated hosts are run once, in the order first seen.
    pub fn new<I>(
        devices: I,
        credential: Credential,
        commands: Vec<String>,
        config: RunConfig,
        connector: C,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        config.validate()?;

        let mut given = 0;
        let unique: IndexSet<String> = devices.into_iter().inspect(|_| given += 1).collect();
        if unique.len() < given {
            debug!("Dropped {} repeated device(s)", given - unique.len());
        }
        let devices: Vec<String> = unique.into_iter().collect();
        if devices.is_empty() {
            return Err(ConfigError::NoDevices.into());
        }
        if commands.is_empty() {
            return Err(ConfigError::NoCommands.into());
        }

        let patterns = SessionPatterns::compile(&config.engine.patterns)?;

        Ok(Self {
            threads: config.threads,
            devices,
            shared: Arc::new(Shared {
                credential: Arc::new(credential),
                commands: commands.into(),
                engine: Arc::new(config.engine),
                patterns: Arc::new(patterns),
                hide_output: config.hide_output,
                output_file_template: config.output_file_template,
                connector: Arc::new(connector),
            }),
        })
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    /// Number of workers [`start`](Self::start) will use.
    pub fn workers(&self) -> usize {
        self.threads.min(self.devices.len()).max(1)
    }

    /// Run every device to a terminal state and collect the reports.
    ///
    /// Returns only once all devices are done; per-device failures are in
    /// the summary, never an error.
    pub async fn start(&self) -> RunSummary {
        let workers = self.workers();
        info!(
            "Running {} command(s) on {} device(s) with {} worker(s)",
            self.shared.commands.len(),
            self.devices.len(),
            workers
        );

        let queue: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(self.devices.iter().cloned().collect()));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let shared = Arc::clone(&self.shared);
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(host) = next_device(&queue) {
                        debug!("worker {} picked {}", worker, host);
                        let report = run_device(&shared, host).await;
                        if tx.send(report).is_err() {
                            break;
                        }
                    }
                    debug!("worker {} finished", worker);
                })
            })
            .collect();
        drop(tx);

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        let mut reports = Vec::with_capacity(self.devices.len());
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }

        let summary = RunSummary::collect(&self.devices, reports);
        info!(
            "Finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        );
        summary
    }
}

impl<C: Connector> fmt::Debug for Orchestrator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("devices", &self.devices)
            .field("threads", &self.threads)
            .field("commands", &self.shared.commands)
            .finish_non_exhaustive()
    }
}

fn next_device(queue: &Mutex<VecDeque<String>>) -> Option<String> {
    queue.lock().ok()?.pop_front()
}

/// Build the device's sinks, run its engine and close the file sink.
async fn run_device<C: Connector>(shared: &Shared<C>, host: String) -> DeviceReport {
    let ctx = DeviceContext::new(host);
    let (mut output, file_sink) = open_output(shared, &ctx);

    let engine = SessionEngine::new(
        ctx,
        Arc::clone(&shared.credential),
        Arc::clone(&shared.commands),
        Arc::clone(&shared.engine),
        Arc::clone(&shared.patterns),
    );
    let report = engine.run(shared.connector.as_ref(), &mut output).await;

    if let Some(id) = file_sink {
        if let Some(mut sink) = output.remove(id) {
            if let Err(e) = sink.flush() {
                warn!("{} Failed to flush output file: {}", engine.context(), e);
            }
        }
    }

    report
}

fn open_output<C>(shared: &Shared<C>, ctx: &DeviceContext) -> (OutputMultiplexer, Option<SinkId>) {
    let mut output = OutputMultiplexer::new();
    if !shared.hide_output {
        output.add(ConsoleSink);
    }

    let Some(template) = shared.output_file_template.as_deref() else {
        return (output, None);
    };

    let path = expand_template(template, ctx.label());
    match FileSink::append(&path) {
        Ok(sink) => {
            debug!("{} Writing output to {}", ctx, path.display());
            let id = output.add(sink);
            (output, Some(id))
        }
        Err(e) => {
            error!("{} Unable to open {}: {}", ctx, path.display(), e);
            (output, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedConnector;
    use crate::transport::scripted::ios_device;

    fn orchestrator(template: Option<String>) -> Orchestrator<ScriptedConnector> {
        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device("R1", "pw", &[("show version", "IOS")]),
        );
        let config = RunConfig {
            hide_output: true,
            output_file_template: template,
            ..Default::default()
        };
        Orchestrator::new(
            vec!["r1".to_string()],
            Credential::new("admin", "pw"),
            vec!["show version".to_string()],
            config,
            connector,
        )
        .unwrap()
    }

    #[test]
    fn test_hidden_output_has_no_sinks() {
        let orch = orchestrator(None);
        let (output, file) = open_output(&orch.shared, &DeviceContext::new("r1"));
        assert!(output.is_empty());
        assert!(file.is_none());
    }

    #[test]
    fn test_unopenable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("missing").join("%h.log");
        let orch = orchestrator(Some(template.to_string_lossy().into_owned()));

        let (output, file) = open_output(&orch.shared, &DeviceContext::new("r1"));
        assert!(output.is_empty());
        assert!(file.is_none());
    }

    #[tokio::test]
    async fn test_run_continues_without_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("missing").join("%h.log");
        let summary = orchestrator(Some(template.to_string_lossy().into_owned()))
            .start()
            .await;
        assert_eq!(summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_repeated_host_runs_once() {
        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device("R1", "pw", &[("show version", "IOS")]),
        );
        let config = RunConfig {
            threads: 2,
            hide_output: true,
            ..Default::default()
        };
        let orch = Orchestrator::new(
            vec!["r1".to_string(), "r2".to_string(), "r1".to_string()],
            Credential::new("admin", "pw"),
            vec!["show version".to_string()],
            config,
            connector,
        )
        .unwrap();
        assert_eq!(orch.devices(), ["r1".to_string(), "r2".to_string()]);

        let summary = orch.start().await;
        assert_eq!(summary.len(), 2);
        assert!(summary.get("r1").unwrap().is_success());
        assert!(!summary.get("r2").unwrap().is_success());
        assert_eq!((summary.succeeded, summary.failed), (1, 1));
    }

    #[test]
    fn test_workers_capped_by_devices() {
        let orch = orchestrator(None);
        assert_eq!(orch.workers(), 1);
        assert_eq!(orch.devices(), ["r1".to_string()]);
    }
}
