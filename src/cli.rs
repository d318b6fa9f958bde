//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use mango_core::convert::OutputFormat;
use mango_core::ranges;

/// Download manga chapters and pack them into CBZ files.
///
/// Chapters come from a MangaDex series URL or from a JSON manifest listing
/// the series title and, for every chapter, its number, language and page
/// image URLs.
#[derive(Parser, Debug)]
#[command(name = "mango")]
#[command(author, version, about)]
pub struct Args {
    /// MangaDex series URL or path to a chapter manifest (JSON)
    #[arg(value_name = "MANIFEST_OR_URL")]
    pub source: String,

    /// Directory the CBZ files are written to [default: current directory]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent page downloads per chapter (1-100) [default: 5]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retry attempts for transient page failures (0-10) [default: 0]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Chapters to download, e.g. "1-5,7,10.5" [default: all]
    #[arg(long, value_parser = parse_selection)]
    pub chapters: Option<String>,

    /// Only download chapters in this language (e.g. "en")
    #[arg(short = 'l', long)]
    pub language: Option<String>,

    /// Pack all selected chapters into a single CBZ
    #[arg(short = 'b', long)]
    pub bundle: bool,

    /// Convert the CBZ files to this format (azw3, mobi, epub, pdf)
    #[arg(short = 'f', long)]
    pub format: Option<OutputFormat>,

    /// Keep the CBZ files after conversion
    #[arg(long)]
    pub keep_source: bool,

    /// Minimum delay between chapter lookups in milliseconds (0 to disable, max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Config file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

fn parse_selection(value: &str) -> Result<String, String> {
    ranges::parse(value)
        .map(|_| value.to_string())
        .map_err(|e| e.to_string())
}
