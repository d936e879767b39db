use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pulse_approval::{assess_risk_level, command_hash};
use pulse_config::{ControlLevel, PulseConfig};
use pulse_exec::{Core, Executor, Providers};
use pulse_safety::{classify, classify_risk};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    version,
    about = "Operator tools for the Pulse assistant's execution core"
)]
struct Cli {
    /// Config file to read.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Classify a shell command the way the read tool would.
    Classify {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Print every tool's input schema.
    Tools {
        /// Show the listing as it would appear at this control level.
        #[arg(long)]
        control_level: Option<ControlLevel>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Inspect how an approval would be bound and graded.
    Approvals {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration, env overrides applied.
    Show,
    /// Write the default configuration.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ApprovalCommands {
    /// Hash and risk level an approval for this command would carry.
    Inspect {
        /// `host`, `container`, `vm`, `docker` or `kubernetes`.
        #[arg(long, default_value = "host")]
        target_type: String,
        #[arg(long, default_value = "")]
        target_id: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Show approval timeouts and limits.
    Limits,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = PulseConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    debug!(config = %cli.config.display(), level = %config.control.control_level, "configuration loaded");

    match cli.command {
        Commands::Classify { command } => print_json(&classify_report(&command.join(" ")))?,
        Commands::Tools { control_level } => {
            let level = control_level.unwrap_or(config.control.control_level);
            print_json(&tool_schemas(&config, level))?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => print!("{}", toml::to_string_pretty(&config)?),
            ConfigCommands::Init { force } => init_config(&cli.config, force)?,
        },
        Commands::Approvals { command } => match command {
            ApprovalCommands::Inspect {
                target_type,
                target_id,
                command,
            } => print_json(&approval_report(&command.join(" "), &target_type, &target_id))?,
            ApprovalCommands::Limits => {
                let a = &config.approval;
                print_json(&json!({
                    "timeout_secs": a.timeout_secs,
                    "max_pending": a.max_pending,
                    "retention_secs": a.retention_secs,
                    "control_level": config.control.control_level.as_str(),
                }))?;
            }
        },
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn classify_report(command: &str) -> Value {
    let intent = classify(command);
    json!({
        "command": command,
        "intent": intent.kind,
        "tag": intent.tag(),
        "reason": intent.reason,
        "risk": classify_risk(command).as_str(),
    })
}

fn approval_report(command: &str, target_type: &str, target_id: &str) -> Value {
    json!({
        "command": command,
        "target_type": target_type,
        "target_id": target_id,
        "command_hash": command_hash(command, target_type, target_id),
        "risk_level": assess_risk_level(command, target_type).as_str(),
    })
}

/// Schemas of all twelve tools.  At `read_only` the control tools are left
/// out, matching what the model would be offered.
fn tool_schemas(config: &PulseConfig, level: ControlLevel) -> Value {
    let executor = Executor::new(Core::new(config, Providers::default()));
    let tools: Vec<Value> = executor
        .all_tools()
        .into_iter()
        .filter(|spec| level.allows_writes() || !spec.metadata.require_control)
        .map(|spec| spec.to_tool_json())
        .collect();
    json!({"control_level": level.as_str(), "tools": tools})
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    PulseConfig::default().save_to(path)?;
    println!("wrote {}", path.display());
    Ok(())
}
