//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mango_core::MangadexCatalog;
use mango_core::convert::OutputFormat;
use mango_core::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, REQUEST_TIMEOUT_SECS,
};
use mango_core::ranges::{self, Range};

use crate::cli::Args;

/// TOML-backed file configuration for mango defaults.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    /// Default output directory for CBZ files.
    pub output_dir: Option<PathBuf>,
    /// Default page concurrency per chapter (same range as CLI).
    pub concurrency: Option<u8>,
    /// Default retry count for transient page failures.
    pub max_retries: Option<u8>,
    /// Page client connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Page client whole-request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Preferred chapter language.
    pub language: Option<String>,
    /// Bundle selected chapters into one CBZ.
    pub bundle: Option<bool>,
    /// Conversion target format.
    pub format: Option<OutputFormat>,
    /// Keep CBZ files after conversion.
    pub keep_source: Option<bool>,
    /// Minimum delay between chapter lookups in milliseconds.
    pub catalog_rate_limit_ms: Option<u64>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }

        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }

        if let Some(rate_limit) = self.catalog_rate_limit_ms
            && rate_limit > 60_000
        {
            bail!(
                "Invalid config value for `catalog_rate_limit_ms`: {rate_limit}. Expected range: 0..=60000"
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;

        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerbositySetting {
    #[default]
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// Returns the tracing filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn filter_directive(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
    /// Indicates whether configuration was loaded from disk.
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mango/config.toml`
/// 2. `$HOME/.config/mango/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("mango").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mango")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit` if given (it must exist), otherwise from the
/// default path if present.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        let config = load_file_config(path)?;
        return Ok(LoadedConfig {
            path: Some(path.to_path_buf()),
            config: Some(config),
            loaded_from_file: true,
        });
    }

    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    };

    if !path_ref.exists() {
        return Ok(LoadedConfig {
            path,
            config: None,
            loaded_from_file: false,
        });
    }

    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
        loaded_from_file: true,
    })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let line_number = line_index + 1;
        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_number}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(context)?,
                ));
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_u8(value).with_context(context)?);
            }
            "max_retries" => {
                cfg.max_retries = Some(parse_integer_u8(value).with_context(context)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "request_timeout_secs" => {
                cfg.request_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "language" => {
                cfg.language = Some(parse_string_literal(value).with_context(context)?);
            }
            "bundle" => {
                cfg.bundle = Some(parse_boolean(value).with_context(context)?);
            }
            "format" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.format = Some(
                    parsed
                        .parse::<OutputFormat>()
                        .with_context(|| format!("Invalid `format` value '{parsed}' on line {line_number}"))?,
                );
            }
            "keep_source" => {
                cfg.keep_source = Some(parse_boolean(value).with_context(context)?);
            }
            "catalog_rate_limit_ms" => {
                cfg.catalog_rate_limit_ms = Some(parse_integer_u64(value).with_context(context)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_number}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_number}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

/// Where the chapters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// JSON manifest on disk.
    Manifest(PathBuf),
    /// MangaDex series URL.
    Mangadex(String),
}

impl Source {
    /// MangaDex URLs select the API catalog; anything else is a manifest path.
    pub fn from_input(input: &str) -> Self {
        if MangadexCatalog::is_mangadex_url(input) {
            Self::Mangadex(input.to_string())
        } else {
            Self::Manifest(PathBuf::from(input))
        }
    }
}

/// Effective settings after merging CLI flags, config file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: Source,
    pub output_dir: PathBuf,
    pub concurrency: usize,
    pub max_retries: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub selection: Vec<Range>,
    pub language: Option<String>,
    pub bundle: bool,
    pub format: Option<OutputFormat>,
    pub keep_source: bool,
    /// `None` means the built-in catalog budget.
    pub catalog_rate_limit_ms: Option<u64>,
    pub verbosity: VerbositySetting,
}

impl Settings {
    /// Merges with precedence CLI flag > config file > built-in default.
    pub fn resolve(args: &Args, file: Option<&FileConfig>) -> Result<Self> {
        let file = file.cloned().unwrap_or_default();

        let selection = match &args.chapters {
            Some(raw) => ranges::parse(raw).with_context(|| format!("Invalid --chapters '{raw}'"))?,
            None => Vec::new(),
        };

        let verbosity = if args.quiet {
            VerbositySetting::Quiet
        } else {
            match args.verbose {
                0 => file.verbosity.unwrap_or_default(),
                1 => VerbositySetting::Verbose,
                _ => VerbositySetting::Debug,
            }
        };

        Ok(Self {
            source: Source::from_input(&args.source),
            output_dir: args
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            concurrency: args
                .concurrency
                .or(file.concurrency)
                .map_or(DEFAULT_CONCURRENCY, usize::from),
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .map_or(DEFAULT_MAX_RETRIES, u32::from),
            connect_timeout_secs: file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            request_timeout_secs: file.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS),
            selection,
            language: args.language.clone().or(file.language),
            bundle: args.bundle || file.bundle.unwrap_or(false),
            format: args.format.or(file.format),
            keep_source: args.keep_source || file.keep_source.unwrap_or(false),
            catalog_rate_limit_ms: args.rate_limit.or(file.catalog_rate_limit_ms),
            verbosity,
        })
    }
}
