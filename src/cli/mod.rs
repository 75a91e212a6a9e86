use crate::config::Config;
use crate::global;
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "roomsync")]
#[command(about = "Real-time room chat and captions with replicated state", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the HTTP and WebSocket server (default)
    Serve(ServeArgs),
    /// Print version information
    Version,
    /// Inspect the effective configuration
    Config(ConfigCliArgs),
}

#[derive(ClapArgs, Debug, Default)]
pub struct ServeArgs {
    /// Override the bind address
    #[arg(long)]
    pub host: Option<String>,
    /// Override the listen port
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the configuration after environment overrides, secrets masked
    Show,
    /// Print the config file location
    Path,
}

/// Resolves the config file and applies environment overrides.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env_overrides();
    Ok(config)
}

pub fn handle_config_command(args: ConfigCliArgs, path: Option<&PathBuf>) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = match path {
                Some(path) => path.clone(),
                None => global::config_file()?,
            };
            println!("{}", path.display());
        }
        ConfigCommand::Show => {
            let mut config = load_config(path)?;
            mask_secrets(&mut config);
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn mask_secrets(config: &mut Config) {
    fn mask(value: &mut Option<String>) {
        if value.as_deref().is_some_and(|v| !v.is_empty()) {
            *value = Some("********".to_string());
        }
    }
    mask(&mut config.livekit.api_secret);
    mask(&mut config.calls.auth_token);
}
