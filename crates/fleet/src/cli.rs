use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleetctl", version, about = "Fleet script dispatch console")]
pub(crate) struct Args {
    #[arg(long, default_value = "config/fleet.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Register a target; an existing target with the same name is replaced.
    Add {
        name: String,
        address: String,
        principal: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        install_path: String,
    },
    /// Remove a registered target by name.
    Remove { name: String },
    /// List registered targets (credentials are not shown).
    List,
    /// Run a named script on a target ("local" runs on this machine).
    Run {
        target: String,
        script: String,
        #[arg(long)]
        timeout_secs: Option<u64>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Probe every registered target and stream the results.
    Status,
    /// Show or update operator settings.
    Settings {
        #[arg(long)]
        admin_user: Option<String>,
        #[arg(long)]
        admin_pass: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        install_path: Option<String>,
    },
}
