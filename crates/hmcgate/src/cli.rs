//! Clap derive structures for the `hmcgate` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// hmcgate -- HTTP gateway for management console quick status
#[derive(Debug, Parser)]
#[command(
    name = "hmcgate",
    version,
    about = "Serve managed system quick status from an HMC as JSON",
    long_about = "Keeps one authenticated session to a management console and serves\n\
        aggregated managed system status over HTTP.\n\n\
        Endpoints:\n  \
        GET /health                     health check (public)\n  \
        GET /status                     gateway status (public)\n  \
        GET|POST /getManagementConsole  raw console document\n  \
        GET|POST /quickManagedSystem    quick status of all managed systems",
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    /// Defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to a TOML configuration file
    #[arg(long, short = 'c', env = "HMCGATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Address to listen on
    #[arg(long, global = true)]
    pub srv_addr: Option<String>,

    /// Port to listen on
    #[arg(long, global = true)]
    pub srv_port: Option<u16>,

    /// Display name of the console, e.g. HMC1
    #[arg(long, global = true)]
    pub hmc_name: Option<String>,

    /// Console host name (API port 12443)
    #[arg(long, global = true)]
    pub hmc_hostname: Option<String>,

    /// Full console API root, overrides --hmc-hostname
    #[arg(long, global = true)]
    pub hmc_url: Option<String>,

    /// Console user
    #[arg(long, global = true)]
    pub hmc_user: Option<String>,

    /// Accept self-signed console certificates
    #[arg(long, short = 'k', global = true)]
    pub tls_skip_verify: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP gateway
    Serve,

    /// Fetch one quick status report and print it as JSON
    Report,

    /// Inspect configuration and store credentials
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration with passwords redacted
    Show,

    /// Print the default config file location
    Path,

    /// Read the console password from stdin and store it in the system keyring
    SetPassword,
}
