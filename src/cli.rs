use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::LineFilter;
use crate::formats::SourceLayout;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert a legacy link dump into a JSON source document.
    Convert(ConvertArgs),
    /// Add image metadata and OCR text to a map catalog.
    Enrich(EnrichArgs),
    /// Validate the links of source documents and record their status.
    CheckLinks(CheckLinksArgs),
    /// Run every stage from a project config.
    Run(RunArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Platform {
    Youtube,
    Web,
}

impl Platform {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Youtube => "YouTube",
            Self::Web => "Web",
        }
    }
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Legacy text file, one URL per line.
    #[arg(short, long)]
    pub input: String,

    /// Output JSON file (replaced atomically).
    #[arg(short, long)]
    pub out: String,

    /// Platform the links belong to.
    #[arg(short = 't', long = "type", value_enum)]
    pub platform: Platform,

    /// Which lines count as links.
    #[arg(long, value_enum, default_value_t = LineFilter::NonEmpty)]
    pub filter: LineFilter,

    /// Output document shape.
    #[arg(long, value_enum, default_value_t = SourceLayout::Records)]
    pub layout: SourceLayout,
}

#[derive(Debug, Args)]
pub struct EnrichArgs {
    /// Map catalog (`{"maps": [...]}`), rewritten in place.
    #[arg(long)]
    pub catalog: String,

    /// Directory that `new_location` paths are relative to.
    #[arg(long)]
    pub maps_dir: String,

    /// Project config to take OCR settings from.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Args)]
pub struct CheckLinksArgs {
    /// Source documents to check (rewritten in place).
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Platform for documents in the legacy videos layout.
    #[arg(long, default_value = "YouTube")]
    pub platform: String,

    /// Per-request timeout.
    #[arg(long, default_value_t = 10)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Project config (YAML).
    #[arg(long, default_value = "config/project_settings.yaml")]
    pub config: String,

    /// Directory relative paths in the config resolve against (default: current dir).
    #[arg(long)]
    pub root: Option<String>,
}
