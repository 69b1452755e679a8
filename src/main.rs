// src/main.rs
mod activate;
mod app;
mod config;
mod error;
mod kubeconfig;
mod remote;
mod types;
mod utils;

use app::{probe_only, AcquirePipeline, AcquireReport};
use config::{default_config_path, AcquireConfig};
use error::{AcquireError, Result};
use utils::logging::{FileLogger, Logger, MultiLogger, TracingLogger};

use activate::KubectlProbe;
use clap::{Parser, Subcommand, ValueEnum};
use remote::SshTransport;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "kubeconfig-acquire",
    version,
    about = "Fetch a k3s kubeconfig over SSH and merge it into the local kubeconfig"
)]
pub struct Cli {
    /// JSON config file (defaults to the user config dir if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Local kubeconfig to merge into (defaults to $KUBECONFIG or ~/.kube/config)
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,
    /// Append debug lines to the log file
    #[arg(short, long, global = true)]
    pub debug: bool,
    /// Verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch, rewrite, merge, activate and probe (default)
    Acquire(AcquireArgs),
    /// Re-run only the connectivity check against the saved kubeconfig
    Probe {
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List kubeconfig backups, newest first
    Backups,
    /// Write a config file with defaults and the given overrides
    InitConfig {
        #[command(flatten)]
        acquire: AcquireArgs,
        /// Where to write (defaults to the user config dir)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(clap::Args, Default, Clone)]
pub struct AcquireArgs {
    /// K3s master host or IP
    #[arg(long)]
    pub host: Option<String>,
    /// SSH user on the master
    #[arg(long)]
    pub user: Option<String>,
    /// SSH port
    #[arg(long)]
    pub ssh_port: Option<u16>,
    /// API server port written into the kubeconfig
    #[arg(long)]
    pub port: Option<u16>,
    /// Name of the context to create and select
    #[arg(long)]
    pub context: Option<String>,
    /// SSH identity file
    #[arg(long)]
    pub identity: Option<String>,
    /// Path of the kubeconfig on the master
    #[arg(long)]
    pub remote_path: Option<String>,
    /// Show the merged kubeconfig without writing or probing
    #[arg(long)]
    pub dry_run: bool,
    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl AcquireArgs {
    fn apply_to(&self, config: &mut AcquireConfig) {
        if let Some(host) = &self.host {
            config.master_host = host.clone();
        }
        if let Some(user) = &self.user {
            config.ssh_user = user.clone();
        }
        if let Some(port) = self.ssh_port {
            config.ssh_port = port;
        }
        if let Some(port) = self.port {
            config.api_port = port;
        }
        if let Some(context) = &self.context {
            config.context_name = context.clone();
        }
        if let Some(identity) = &self.identity {
            config.ssh_key_path = Some(identity.clone());
        }
        if let Some(path) = &self.remote_path {
            config.remote_kubeconfig_path = path.clone();
        }
    }
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "kubeconfig_acquire=info",
        1 => "kubeconfig_acquire=debug",
        _ => "kubeconfig_acquire=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init(),
    }
}

fn load_config(cli: &Cli) -> Result<AcquireConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));
    let mut config = match path {
        Some(path) => AcquireConfig::load_from_file(&path).map_err(|e| {
            AcquireError::config(format!("cannot read {}: {}", path.display(), e))
        })?,
        None => AcquireConfig::default(),
    };
    if let Some(kubeconfig) = &cli.kubeconfig {
        config.kubeconfig_path = Some(kubeconfig.clone());
    }
    Ok(config)
}

fn build_logger(cli: &Cli, config: &AcquireConfig) -> Box<dyn Logger> {
    let mut logger = MultiLogger::new().with(Box::new(TracingLogger));
    if let Some(log_file) = &config.log_file {
        let path = shellexpand::tilde(log_file).to_string();
        match FileLogger::new(&path, cli.debug) {
            Ok(file_logger) => logger = logger.with(Box::new(file_logger)),
            Err(e) => tracing::warn!("Log file {} unavailable: {}", path, e),
        }
    }
    Box::new(logger)
}

/// Asks for the master host when neither flags nor config supplied one.
fn prompt_missing(config: &mut AcquireConfig) -> Result<()> {
    if !config.master_host.trim().is_empty() || !io::stdin().is_terminal() {
        return Ok(());
    }
    let ask = |label: &str, default: &str| -> io::Result<String> {
        if default.is_empty() {
            print!("{}: ", label);
        } else {
            print!("{} [{}]: ", label, default);
        }
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        let answer = line.trim();
        Ok(if answer.is_empty() {
            default.to_string()
        } else {
            answer.to_string()
        })
    };
    let io_err = |e: io::Error| AcquireError::config(format!("cannot read answer: {}", e));

    config.master_host = ask("K3s master host", "").map_err(io_err)?;
    config.ssh_user = ask("SSH user", &config.ssh_user).map_err(io_err)?;
    config.context_name = ask("Context name", &config.context_name).map_err(io_err)?;
    Ok(())
}

fn print_report(report: &AcquireReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => tracing::error!("Cannot render report: {}", e),
        }
        return;
    }
    if let Some(preview) = &report.preview {
        println!("{}", preview);
        println!("# context '{}': {} (dry run)", report.context, report.decision);
        return;
    }
    println!(
        "Context '{}' is active in {} ({} node(s): {})",
        report.context,
        report.store_path.display(),
        report.nodes.len(),
        report.nodes.join(", ")
    );
    if let Some(backup) = &report.backup {
        println!("Previous kubeconfig saved as {}", backup.display());
    }
}

async fn run(mut cli: Cli) -> Result<()> {
    let mut config = load_config(&cli)?;
    let command = cli
        .command
        .take()
        .unwrap_or_else(|| Command::Acquire(AcquireArgs::default()));

    match command {
        Command::Acquire(args) => {
            args.apply_to(&mut config);
            prompt_missing(&mut config)?;
            let logger = build_logger(&cli, &config);
            let transport = SshTransport::new(config.ssh_key_path(), config.fetch_timeout_secs)
                .with_program(config.ssh_binary.clone());
            let probe = KubectlProbe::with_binary(config.kubectl_binary.clone());
            let mut pipeline = AcquirePipeline::new(&config, &transport, &probe, logger);
            let report = pipeline.run(args.dry_run).await?;
            print_report(&report, args.json);
            Ok(())
        }
        Command::Probe { context, timeout } => {
            if let Some(context) = context {
                config.context_name = context;
            }
            if let Some(timeout) = timeout {
                config.probe_timeout_secs = timeout.max(1);
            }
            let mut logger = build_logger(&cli, &config);
            let nodes = probe_only(
                &config,
                &KubectlProbe::with_binary(config.kubectl_binary.clone()),
                logger.as_mut(),
            ).await?;
            println!("Context '{}' reachable: {}", config.context_name, nodes.join(", "));
            Ok(())
        }
        Command::Backups => {
            let store = config.store_path()?;
            let backups = kubeconfig::list_backups(&store)?;
            if backups.is_empty() {
                println!("No backups of {}", store.display());
            }
            for backup in backups {
                println!("{}", backup.display());
            }
            Ok(())
        }
        Command::InitConfig { acquire, path } => {
            acquire.apply_to(&mut config);
            let path = path
                .or_else(default_config_path)
                .ok_or_else(|| AcquireError::config("cannot determine config directory"))?;
            config
                .save_to_file(&path)
                .map_err(|e| AcquireError::io(error::Stage::Config, &path, e))?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.store_committed() {
                eprintln!("The kubeconfig was saved; only the connectivity check failed.");
            } else {
                eprintln!("The local kubeconfig was left as it was.");
            }
            ExitCode::from(e.exit_code())
        }
    }
}
