//! Command-line argument parsing.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use mpgeo::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RPS, DEFAULT_RETRIES, DEFAULT_URL, OutputFormat};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser, Debug)]
#[command(
    name = "mpgeo-export",
    version,
    about = "Export Matterport sweeps, tags and notes with geocoordinates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch model data, geocode it and write it out.
    Export {
        /// What to export.
        #[arg(value_enum)]
        what: ExportKind,

        #[command(flatten)]
        args: ExportArgs,
    },
}

/// The exportable entity kinds.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// One record per pano of every sweep location.
    Sweeps,
    /// Mattertags.
    Tags,
    /// Notes.
    Notes,
    /// The model-level georeference.
    Georef,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct ExportArgs {
    /// Matterport model id.
    #[arg(short, long, env = "MP_MODEL_ID")]
    pub model_id: Option<String>,

    /// Output file; `-` or omitted writes to stdout.
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Attach the six skybox image URLs to each sweep, skipping incomplete panos.
    #[arg(long)]
    pub include_skybox: bool,

    /// Skip geocoding and export model-space positions only.
    #[arg(long)]
    pub local_only: bool,

    /// Keep points that fail to geocode instead of aborting the export.
    #[arg(long)]
    pub keep_going: bool,

    /// Concurrent geocode requests.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Maximum requests per second; 0 disables the limit.
    #[arg(long, default_value_t = DEFAULT_MAX_RPS)]
    pub max_rps: f64,

    /// Retries per request after the first failure.
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    pub retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// API key (the credential store and environment take precedence).
    #[arg(long)]
    pub api_key: Option<String>,

    /// API secret (the credential store and environment take precedence).
    #[arg(long)]
    pub api_secret: Option<String>,

    /// GraphQL endpoint.
    #[arg(long, env = "MATTERPORT_API_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Do not save prompted credentials to the OS keyring.
    #[arg(long)]
    pub no_save_to_keyring: bool,

    /// Pretty-print JSON output (default when stdout is a terminal).
    #[arg(long, overrides_with = "no_pretty")]
    pub pretty: bool,

    /// Compact JSON output.
    #[arg(long, overrides_with = "pretty")]
    pub no_pretty: bool,
}

impl ExportArgs {
    /// Resolve `--pretty` / `--no-pretty`, falling back to whether stdout is a terminal.
    pub fn pretty(&self) -> bool {
        resolve_pretty(self.pretty, self.no_pretty, std::io::stdout().is_terminal())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The model id, if one was given and is not blank.
    pub fn model_id(&self) -> Option<&str> {
        self.model_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

fn resolve_pretty(pretty: bool, no_pretty: bool, is_terminal: bool) -> bool {
    if pretty {
        true
    } else if no_pretty {
        false
    } else {
        is_terminal
    }
}
