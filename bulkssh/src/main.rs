//! bulkssh: run a list of commands on many devices over SSH.
//!
//! # Usage
//!
//! ```bash
//! bulkssh -c "show version;show clock" -m 4 -s "~/logs/%h-%d-%t.log" r1 r2 hosts.txt
//! ```
//!
//! Hosts are given directly or through files with one host per line.
//! Commands come from `-c`, `-f` or stdin. The password is read from
//! `~/.pass` when it exists, otherwise prompted for.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use log::{info, warn};

use bulkssh::error::ConfigError;
use bulkssh::inventory::{collect_devices, expand_home, read_commands, split_commands};
use bulkssh::{
    Connector, Credential, Orchestrator, ProcessConnector, RunConfig, RunSummary, SshConnector,
    TransportKind,
};

/// Run commands on many network devices over interactive SSH sessions
#[derive(Parser)]
#[command(name = "bulkssh", version, about)]
struct Cli {
    /// Hostnames, or files with one hostname per line
    #[arg(required = true)]
    devices: Vec<String>,

    /// Commands separated by ';'
    #[arg(short, long, conflicts_with = "command_file")]
    commands: Option<String>,

    /// File with one command per line
    #[arg(short = 'f', long)]
    command_file: Option<PathBuf>,

    /// Number of devices processed at the same time
    #[arg(short, long)]
    max_threads: Option<usize>,

    /// Do not print device output to the console
    #[arg(short, long)]
    no_output: bool,

    /// Only show output from the first prompt after login
    #[arg(short = 'p', long)]
    start_at_prompt: bool,

    /// Save output per device; %h host, %d date, %t time
    #[arg(short, long, value_name = "TEMPLATE")]
    save_output: Option<String>,

    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Session transport
    #[arg(short, long, value_enum)]
    transport: Option<TransportArg>,

    /// Write a JSON report of per-device results
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    /// System ssh client in a pty
    Process,
    /// Built-in SSH client
    Native,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Process => TransportKind::Process,
            TransportArg::Native => TransportKind::Native,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    apply_flags(&cli, &mut config);
    config.validate()?;

    let devices = collect_devices(&cli.devices)?;
    let commands = load_commands(&cli)?;
    if commands.is_empty() {
        return Err(ConfigError::NoCommands.into());
    }
    let credential = load_credential()?;

    let devices: Vec<String> = devices.into_iter().collect();
    let summary = match config.transport.kind {
        TransportKind::Process => {
            let connector = ProcessConnector::new(&config.transport);
            run(devices, credential, commands, config, connector).await?
        }
        TransportKind::Native => {
            let connector = SshConnector::new(&config.transport);
            run(devices, credential, commands, config, connector).await?
        }
    };

    for report in summary.failures() {
        warn!("[{}] {}", report.device, report.outcome);
    }
    info!(
        "{} device(s): {} succeeded, {} failed",
        summary.len(),
        summary.succeeded,
        summary.failed
    );

    if let Some(path) = &cli.report {
        summary.write_json(path)?;
        info!("Report written to {}", path.display());
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn apply_flags(cli: &Cli, config: &mut RunConfig) {
    if let Some(threads) = cli.max_threads {
        config.threads = threads;
    }
    if cli.no_output {
        config.hide_output = true;
    }
    if let Some(template) = &cli.save_output {
        config.output_file_template = Some(template.clone());
    }
    if cli.start_at_prompt {
        config.engine.start_at_prompt = true;
    }
    if let Some(transport) = cli.transport {
        config.transport.kind = transport.into();
    }
}

fn load_commands(cli: &Cli) -> bulkssh::Result<Vec<String>> {
    if let Some(commands) = &cli.commands {
        return Ok(split_commands(commands));
    }

    if let Some(path) = &cli.command_file {
        let path = expand_home(&path.to_string_lossy());
        let file = std::fs::File::open(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        return read_commands(io::BufReader::new(file));
    }

    println!("Enter commands, end with CTRL+D");
    read_commands(io::stdin().lock())
}

fn load_credential() -> Result<Credential, Box<dyn std::error::Error>> {
    let pass_file = expand_home("~/.pass");
    if let Some(credential) = Credential::from_pass_file(&pass_file)? {
        return Ok(credential);
    }

    let username: String = dialoguer::Input::new()
        .with_prompt("Username")
        .default(bulkssh::credential::current_user())
        .interact_text()?;
    let password = dialoguer::Password::new()
        .with_prompt("Password")
        .interact()?;
    Ok(Credential::new(username, password))
}

async fn run<C: Connector>(
    devices: Vec<String>,
    credential: Credential,
    commands: Vec<String>,
    config: RunConfig,
    connector: C,
) -> bulkssh::Result<RunSummary> {
    let orchestrator = Orchestrator::new(devices, credential, commands, config, connector)?;
    Ok(orchestrator.start().await)
}
