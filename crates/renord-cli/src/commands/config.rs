//! Config command - inspect and initialize the configuration file.

use std::fs;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use renord_core::models::config::RenordConfig;

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as JSON
    Show,

    /// Write a fresh configuration file with default values
    Init {
        /// Where to write the file (defaults to the standard location)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration file location and whether it exists
    Path,
}

pub async fn run(args: ConfigArgs) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let path = default_config_path();
            let config = if path.exists() {
                RenordConfig::from_file(&path)?
            } else {
                eprintln!(
                    "{} {} does not exist; these are the built-in defaults.",
                    style("ℹ").blue(),
                    path.display()
                );
                RenordConfig::default()
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigCommand::Init { output, force } => {
            let target = output.unwrap_or_else(default_config_path);
            if target.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to replace it",
                    target.display()
                );
            }
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            RenordConfig::default().save(&target)?;
            println!("{} Wrote {}", style("✓").green(), target.display());
        }
        ConfigCommand::Path => {
            let path = default_config_path();
            if path.exists() {
                println!("{} ({})", path.display(), style("exists").green());
            } else {
                println!("{} ({})", path.display(), style("not created").yellow());
                println!("Run 'renord config init' to create it.");
            }
        }
    }

    Ok(())
}

/// `<config dir>/renord/config.json`, falling back to the working
/// directory when the platform reports no config dir.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("renord")
        .join("config.json")
}
