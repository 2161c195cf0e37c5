use clap::Parser;
use std::error::Error;
use std::path::PathBuf;

use maintmode::{MaintError, MaintResult, MaintenanceRunner, RunOptions, Settings};

#[derive(Parser)]
#[command(name = "maintmode")]
#[command(about = "Keeps Proxmox VE HA groups in line with a per-node placement policy", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Management API host (overrides PROXMOX_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Management API port (overrides PROXMOX_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log the planned changes without applying them
    #[arg(long)]
    dry_run: bool,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// Log the node and group tables before reconciling
    #[arg(long)]
    show_inventory: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.api.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.api.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.to_lowercase();
        }
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            show_inventory: self.show_inventory,
        }
    }
}

fn init_tracing(level: &str) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    // An invalid level is reported by validation; keep the default filter until then
    for target in ["maintmode", "maintmode_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Error message followed by its sources
fn describe(err: &MaintError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

async fn run(cli: &Cli, settings: MaintResult<Settings>) -> MaintResult<()> {
    let settings = settings?;
    settings.validate()?;

    if cli.dry_run {
        tracing::info!("Dry run, no changes will be made");
    }

    let runner = MaintenanceRunner::connect(&settings, cli.options()).await?;
    let report = runner.run().await?;

    if !report.remaining_drift.is_empty() {
        tracing::warn!(
            "Groups still drifting after the run: {}",
            report.remaining_drift.join(", ")
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).map(|mut settings| {
        cli.apply_overrides(&mut settings);
        settings
    });

    let level = match &settings {
        Ok(settings) => settings.logging.level.clone(),
        Err(_) => cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
    };
    init_tracing(&level);

    tracing::info!("Starting maintenance mode manager");

    if let Err(e) = run(&cli, settings).await {
        tracing::error!("{}", describe(&e));
        std::process::exit(e.exit_code());
    }
}
