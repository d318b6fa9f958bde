//! Converting CBZ containers to e-reader formats.
//!
//! Conversion shells out to Calibre's `ebook-convert`, which must be on
//! `PATH` (or configured explicitly with [`Converter::with_program`]).
//!
//! # Example
//!
//! ```no_run
//! use mango_core::convert::{Converter, OutputFormat};
//!
//! # async fn example() -> Result<(), mango_core::convert::ConvertError> {
//! let converter = Converter::new("out").with_delete_source(false);
//! let result = converter.convert("out/One Piece - Chapter 1.cbz", "epub".parse()?).await?;
//! println!("wrote {} ({} bytes)", result.output.display(), result.bytes_written);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Default conversion tool.
pub const DEFAULT_PROGRAM: &str = "ebook-convert";

/// Default number of conversions run at once; the tool is CPU heavy.
pub const DEFAULT_MAX_CONCURRENCY: usize = 1;

/// Target formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Kindle AZW3.
    Azw3,
    /// Kindle MOBI.
    Mobi,
    /// EPUB.
    Epub,
    /// PDF.
    Pdf,
}

impl OutputFormat {
    /// Every supported format.
    pub const ALL: [Self; 4] = [Self::Azw3, Self::Mobi, Self::Epub, Self::Pdf];

    /// File extension, without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Azw3 => "azw3",
            Self::Mobi => "mobi",
            Self::Epub => "epub",
            Self::Pdf => "pdf",
        }
    }

    fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(|format| format!(".{}", format.extension()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = ConvertError;

    /// Accepts `epub`, `.EPUB` and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_start_matches('.');
        Self::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConvertError::UnsupportedFormat {
                format: s.to_string(),
            })
    }
}

/// Conversion errors.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The requested format is not supported.
    #[error("unsupported format: {format}. Supported formats: {}", OutputFormat::supported_list())]
    UnsupportedFormat {
        /// The rejected format string.
        format: String,
    },

    /// The conversion tool is not installed.
    #[error("{program} not found. Please install Calibre: https://calibre-ebook.com/download")]
    ToolNotFound {
        /// Program that was looked up.
        program: String,
    },

    /// No input files were given.
    #[error("no input files provided")]
    NoInputs,

    /// No target formats were given.
    #[error("no output formats specified")]
    NoFormats,

    /// The input file does not exist.
    #[error("input file does not exist: {}", path.display())]
    MissingInput {
        /// Missing input.
        path: PathBuf,
    },

    /// The output directory could not be created.
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("{program} to {format} failed ({status})\nOutput: {output}")]
    ToolFailed {
        /// Program that failed.
        program: String,
        /// Target format.
        format: OutputFormat,
        /// Exit status description.
        status: String,
        /// Combined stdout and stderr.
        output: String,
    },

    /// The tool succeeded but produced no file.
    #[error("output file was not created: {}", path.display())]
    MissingOutput {
        /// Expected output.
        path: PathBuf,
    },

    /// A conversion task panicked.
    #[error("conversion task failed: {reason}")]
    TaskFailed {
        /// Join error description.
        reason: String,
    },
}

/// Outcome of one successful conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    /// Source container.
    pub input: PathBuf,
    /// Converted file.
    pub output: PathBuf,
    /// Target format.
    pub format: OutputFormat,
    /// Size of the converted file.
    pub bytes_written: u64,
    /// Whether the source was removed afterwards.
    pub source_deleted: bool,
    /// Non-fatal problem, e.g. the source could not be deleted.
    pub warning: Option<String>,
}

/// One finished conversion, as seen by batch progress callbacks.
#[derive(Debug)]
pub struct ConversionProgress<'a> {
    /// Conversions finished so far, including this one.
    pub done: usize,
    /// Conversions in the batch.
    pub total: usize,
    /// This conversion's outcome.
    pub result: &'a Result<ConversionResult, ConvertError>,
}

/// Runs `ebook-convert` on CBZ containers.
#[derive(Debug, Clone)]
pub struct Converter {
    max_concurrency: usize,
    delete_source: bool,
    output_dir: PathBuf,
    program: PathBuf,
}

impl Converter {
    /// Creates a converter writing into `output_dir`, one conversion at a
    /// time, deleting sources after success.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            delete_source: true,
            output_dir: output_dir.into(),
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }

    /// Sets how many conversions may run at once (at least 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Sets whether sources are deleted after a successful conversion.
    #[must_use]
    pub fn with_delete_source(mut self, delete_source: bool) -> Self {
        self.delete_source = delete_source;
        self
    }

    /// Uses another conversion program (a name on `PATH` or a path).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns whether the conversion program can be found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.resolve_program().is_ok()
    }

    /// `<output_dir>/<input stem>.<format>`.
    #[must_use]
    pub fn output_path(&self, input: &Path, format: OutputFormat) -> PathBuf {
        let stem = input.file_stem().unwrap_or(input.as_os_str());
        let mut name = stem.to_os_string();
        name.push(".");
        name.push(format.extension());
        self.output_dir.join(name)
    }

    fn resolve_program(&self) -> Result<PathBuf, ConvertError> {
        which::which(&self.program).map_err(|_| ConvertError::ToolNotFound {
            program: self.program.display().to_string(),
        })
    }

    /// Converts one container, deleting it afterwards if configured.
    ///
    /// # Errors
    ///
    /// Returns a [`ConvertError`] if the tool is missing, the input does not
    /// exist, the tool fails or produces nothing. A failed source deletion
    /// only sets [`ConversionResult::warning`].
    #[instrument(skip(self, input), fields(input = %input.as_ref().display(), %format))]
    pub async fn convert(
        &self,
        input: impl AsRef<Path>,
        format: OutputFormat,
    ) -> Result<ConversionResult, ConvertError> {
        let program = self.resolve_program()?;
        let mut result = self.run_tool(&program, input.as_ref(), format).await?;
        if self.delete_source {
            delete_source(&mut [&mut result]).await;
        }
        Ok(result)
    }

    /// Converts several containers to one format, up to `max_concurrency`
    /// at a time. Results are returned in input order.
    ///
    /// # Errors
    ///
    /// Fails before doing any work if `inputs` is empty or the tool is
    /// missing. Per-file failures are returned in the result list.
    #[instrument(skip(self, inputs, on_progress), fields(inputs = inputs.len(), %format))]
    pub async fn convert_many<F>(
        &self,
        inputs: &[PathBuf],
        format: OutputFormat,
        on_progress: F,
    ) -> Result<Vec<Result<ConversionResult, ConvertError>>, ConvertError>
    where
        F: FnMut(ConversionProgress<'_>),
    {
        if inputs.is_empty() {
            return Err(ConvertError::NoInputs);
        }
        let program = self.resolve_program()?;

        let jobs = inputs.iter().map(|input| (input.clone(), format)).collect();
        Ok(self
            .run_jobs(program, jobs, self.delete_source, on_progress)
            .await)
    }

    /// Converts one container to several formats, up to `max_concurrency`
    /// at a time. Results are returned in `formats` order.
    ///
    /// The source is deleted (if configured) only once every format has
    /// been converted successfully.
    ///
    /// # Errors
    ///
    /// Fails before doing any work if `formats` is empty or the tool is
    /// missing.
    #[instrument(skip(self, input, on_progress), fields(input = %input.as_ref().display(), formats = formats.len()))]
    pub async fn convert_to_formats<F>(
        &self,
        input: impl AsRef<Path>,
        formats: &[OutputFormat],
        on_progress: F,
    ) -> Result<Vec<Result<ConversionResult, ConvertError>>, ConvertError>
    where
        F: FnMut(ConversionProgress<'_>),
    {
        if formats.is_empty() {
            return Err(ConvertError::NoFormats);
        }
        let program = self.resolve_program()?;

        let input = input.as_ref().to_path_buf();
        let jobs = formats
            .iter()
            .map(|format| (input.clone(), *format))
            .collect();
        let mut results = self.run_jobs(program, jobs, false, on_progress).await;

        if self.delete_source && results.iter().all(Result::is_ok) {
            let mut converted: Vec<&mut ConversionResult> =
                results.iter_mut().filter_map(|r| r.as_mut().ok()).collect();
            delete_source(&mut converted).await;
        }
        Ok(results)
    }

    async fn run_jobs<F>(
        &self,
        program: PathBuf,
        jobs: Vec<(PathBuf, OutputFormat)>,
        delete_each: bool,
        mut on_progress: F,
    ) -> Vec<Result<ConversionResult, ConvertError>>
    where
        F: FnMut(ConversionProgress<'_>),
    {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let program = Arc::new(program);
        let mut tasks = JoinSet::new();

        for (index, (input, format)) in jobs.into_iter().enumerate() {
            let converter = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let program = Arc::clone(&program);
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let mut result = converter.run_tool(&program, &input, format).await;
                        if delete_each && let Ok(converted) = result.as_mut() {
                            delete_source(&mut [converted]).await;
                        }
                        result
                    }
                    Err(_) => Err(ConvertError::TaskFailed {
                        reason: "conversion semaphore closed".to_string(),
                    }),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<ConversionResult, ConvertError>>> =
            (0..total).map(|_| None).collect();
        let mut done = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    done += 1;
                    on_progress(ConversionProgress {
                        done,
                        total,
                        result: &result,
                    });
                    slots[index] = Some(result);
                }
                Err(join_error) => {
                    warn!(error = %join_error, "conversion task did not complete");
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(ConvertError::TaskFailed {
                        reason: "conversion task did not complete".to_string(),
                    })
                })
            })
            .collect()
    }

    async fn run_tool(
        &self,
        program: &Path,
        input: &Path,
        format: OutputFormat,
    ) -> Result<ConversionResult, ConvertError> {
        if !tokio::fs::try_exists(input).await.unwrap_or(false) {
            return Err(ConvertError::MissingInput {
                path: input.to_path_buf(),
            });
        }

        let output_path = self.output_path(input, format);
        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ConvertError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        debug!(program = %program.display(), output = %output_path.display(), "running converter");
        let output = Command::new(program)
            .arg(input)
            .arg(&output_path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConvertError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ConvertError::ToolFailed {
                program: program.display().to_string(),
                format,
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        let metadata = tokio::fs::metadata(&output_path)
            .await
            .map_err(|_| ConvertError::MissingOutput {
                path: output_path.clone(),
            })?;

        info!(output = %output_path.display(), bytes = metadata.len(), "conversion finished");
        Ok(ConversionResult {
            input: input.to_path_buf(),
            output: output_path,
            format,
            bytes_written: metadata.len(),
            source_deleted: false,
            warning: None,
        })
    }
}

/// Removes the shared source of `results`, recording the outcome on each.
async fn delete_source(results: &mut [&mut ConversionResult]) {
    let Some(input) = results.first().map(|r| r.input.clone()) else {
        return;
    };

    match tokio::fs::remove_file(&input).await {
        Ok(()) => {
            debug!(path = %input.display(), "source deleted");
            for result in results.iter_mut() {
                result.source_deleted = true;
            }
        }
        Err(error) => {
            warn!(path = %input.display(), error = %error, "conversion succeeded but source could not be deleted");
            let warning = format!("conversion successful but failed to delete source file: {error}");
            for result in results.iter_mut() {
                result.warning = Some(warning.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parse_format_accepts_dot_and_any_case() {
        assert_eq!("azw3".parse::<OutputFormat>().unwrap(), OutputFormat::Azw3);
        assert_eq!(".EPUB".parse::<OutputFormat>().unwrap(), OutputFormat::Epub);
        assert_eq!("Pdf".parse::<OutputFormat>().unwrap(), OutputFormat::Pdf);
        assert_eq!(".mobi".parse::<OutputFormat>().unwrap(), OutputFormat::Mobi);
    }

    #[test]
    fn test_parse_format_rejects_unknown() {
        let error = "docx".parse::<OutputFormat>().unwrap_err();
        let msg = error.to_string();
        assert!(msg.contains("unsupported format: docx"), "{msg}");
        assert!(msg.contains(".azw3, .mobi, .epub, .pdf"), "{msg}");
    }

    #[test]
    fn test_output_path_uses_stem_and_output_dir() {
        let converter = Converter::new("/out");
        assert_eq!(
            converter.output_path(Path::new("/in/Series - Chapter 1.cbz"), OutputFormat::Epub),
            PathBuf::from("/out/Series - Chapter 1.epub")
        );
        assert_eq!(
            converter.output_path(Path::new("v1.5.cbz"), OutputFormat::Pdf),
            PathBuf::from("/out/v1.5.pdf")
        );
    }

    #[tokio::test]
    async fn test_missing_tool_fails_before_any_work() {
        let dir = TempDir::new().unwrap();
        let converter =
            Converter::new(dir.path()).with_program(dir.path().join("no-such-converter"));

        assert!(!converter.is_available());
        assert!(matches!(
            converter.convert_many(&[dir.path().join("a.cbz")], OutputFormat::Epub, |_| {}).await,
            Err(ConvertError::ToolNotFound { .. })
        ));
        assert!(matches!(
            converter.convert(dir.path().join("a.cbz"), OutputFormat::Epub).await,
            Err(ConvertError::ToolNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_batches_are_rejected() {
        let converter = Converter::new(".");
        assert!(matches!(
            converter.convert_many(&[], OutputFormat::Epub, |_| {}).await,
            Err(ConvertError::NoInputs)
        ));
        assert!(matches!(
            converter.convert_to_formats("a.cbz", &[], |_| {}).await,
            Err(ConvertError::NoFormats)
        ));
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use std::os::unix::fs::PermissionsExt;

        use super::*;

        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-convert");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn copying_tool(dir: &Path) -> PathBuf {
            fake_tool(dir, r#"cp "$1" "$2""#)
        }

        #[tokio::test]
        async fn test_convert_writes_output_and_deletes_source() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("Series - Chapter 1.cbz");
            std::fs::write(&input, b"cbz-bytes").unwrap();
            let converter = Converter::new(dir.path().join("converted"))
                .with_program(copying_tool(dir.path()));

            let result = converter.convert(&input, OutputFormat::Epub).await.unwrap();

            assert_eq!(result.output, dir.path().join("converted/Series - Chapter 1.epub"));
            assert_eq!(result.bytes_written, 9);
            assert!(result.source_deleted);
            assert!(result.warning.is_none());
            assert!(!input.exists());
        }

        #[tokio::test]
        async fn test_convert_keeps_source_when_asked() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("a.cbz");
            std::fs::write(&input, b"x").unwrap();
            let converter = Converter::new(dir.path())
                .with_program(copying_tool(dir.path()))
                .with_delete_source(false);

            let result = converter.convert(&input, OutputFormat::Pdf).await.unwrap();

            assert!(!result.source_deleted);
            assert!(input.exists());
        }

        #[tokio::test]
        async fn test_tool_failure_carries_output() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("a.cbz");
            std::fs::write(&input, b"x").unwrap();
            let converter = Converter::new(dir.path())
                .with_program(fake_tool(dir.path(), "echo boom >&2; exit 3"));

            let error = converter.convert(&input, OutputFormat::Azw3).await.unwrap_err();

            match error {
                ConvertError::ToolFailed { output, format, .. } => {
                    assert_eq!(output, "boom");
                    assert_eq!(format, OutputFormat::Azw3);
                }
                other => panic!("expected tool failure, got {other:?}"),
            }
            assert!(input.exists());
        }

        #[tokio::test]
        async fn test_tool_success_without_output_is_an_error() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("a.cbz");
            std::fs::write(&input, b"x").unwrap();
            let converter =
                Converter::new(dir.path()).with_program(fake_tool(dir.path(), "exit 0"));

            assert!(matches!(
                converter.convert(&input, OutputFormat::Epub).await,
                Err(ConvertError::MissingOutput { .. })
            ));
        }

        #[tokio::test]
        async fn test_missing_input_is_reported() {
            let dir = TempDir::new().unwrap();
            let converter = Converter::new(dir.path()).with_program(copying_tool(dir.path()));

            assert!(matches!(
                converter.convert(dir.path().join("gone.cbz"), OutputFormat::Epub).await,
                Err(ConvertError::MissingInput { .. })
            ));
        }

        #[tokio::test]
        async fn test_convert_many_keeps_input_order_and_reports_each() {
            let dir = TempDir::new().unwrap();
            let inputs: Vec<PathBuf> = ["a", "b", "c"]
                .iter()
                .map(|name| {
                    let path = dir.path().join(format!("{name}.cbz"));
                    std::fs::write(&path, name.as_bytes()).unwrap();
                    path
                })
                .collect();
            let mut all = inputs.clone();
            all.insert(1, dir.path().join("missing.cbz"));

            let converter = Converter::new(dir.path().join("out"))
                .with_program(copying_tool(dir.path()))
                .with_max_concurrency(2);

            let mut seen = Vec::new();
            let results = converter
                .convert_many(&all, OutputFormat::Mobi, |p| seen.push((p.done, p.total)))
                .await
                .unwrap();

            assert_eq!(results.len(), 4);
            assert_eq!(results[0].as_ref().unwrap().output, dir.path().join("out/a.mobi"));
            assert!(matches!(results[1], Err(ConvertError::MissingInput { .. })));
            assert_eq!(results[3].as_ref().unwrap().output, dir.path().join("out/c.mobi"));
            assert_eq!(seen.len(), 4);
            assert_eq!(seen.last(), Some(&(4, 4)));
            assert!(inputs.iter().all(|input| !input.exists()));
        }

        #[tokio::test]
        async fn test_convert_to_formats_deletes_source_once_all_finished() {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("a.cbz");
            std::fs::write(&input, b"x").unwrap();
            let converter = Converter::new(dir.path())
                .with_program(copying_tool(dir.path()))
                .with_max_concurrency(2);

            let results = converter
                .convert_to_formats(&input, &[OutputFormat::Epub, OutputFormat::Pdf], |_| {})
                .await
                .unwrap();

            assert!(results.iter().all(|r| r.as_ref().unwrap().source_deleted));
            assert!(dir.path().join("a.epub").exists());
            assert!(dir.path().join("a.pdf").exists());
            assert!(!input.exists());
        }
    }
}
