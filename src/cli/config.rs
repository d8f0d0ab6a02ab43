//! `openclaw-memory config <subcommand>`: inspect and edit `config.toml`.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key, e.g. embedding.provider
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Config key, e.g. embedding.provider
        key: String,

        /// Value to set
        value: String,
    },

    /// Show the config file path
    Path,

    /// Initialize a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(&format),
        ConfigCommands::Get { key } => get_config(&key),
        ConfigCommands::Set { key, value } => set_config(&key, &value),
        ConfigCommands::Path => show_path(),
        ConfigCommands::Init { force } => init_config(force),
    }
}

fn show_config(format: &str) -> Result<()> {
    let config = Config::load(None)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", toml::to_string_pretty(&config)?),
    }

    Ok(())
}

fn get_config(key: &str) -> Result<()> {
    let config = Config::load(None)?;
    println!("{}", config.get_value(key)?);
    Ok(())
}

fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load(None)?;
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn show_path() -> Result<()> {
    println!("{}", Config::config_path()?.display());
    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let path = Config::config_path()?;

    if path.exists() && !force {
        anyhow::bail!("Config file already exists at {}. Use --force to overwrite.", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, DEFAULT_CONFIG_TEMPLATE)?;
    println!("Created config file at {}", path.display());
    Ok(())
}

const DEFAULT_CONFIG_TEMPLATE: &str = r#"# OpenClaw Memory configuration

[embedding]
# "local" (fastembed, default, no API key needed), "openai", or "ollama"
provider = "local"
model = "all-MiniLM-L6-v2"
dimension = 384
# api_key = "${OPENAI_API_KEY}"
# base_url = "http://localhost:11434"
timeout_secs = 30

[privacy]
enabled = true
# Replaces the built-in default pattern list when non-empty.
patterns = []

[search]
default_max_tokens = 1500
recency_half_life_days = 30.0
default_top_k = 10

[project]
# name = "my-project"
# description = "what this project is"

[logging]
level = "info"

[server]
enabled = true
port = 31427
bind = "127.0.0.1"
"#;
