//! Progress UI (per-chapter page bar) for batch runs.

use std::io::{self, IsTerminal};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mango_core::PipelineEvent;
use tracing::{info, warn};

/// Returns true when a live progress bar should be drawn on stderr.
pub(crate) fn should_use_progress_bar(stderr_is_terminal: bool, quiet: bool, dumb: bool) -> bool {
    stderr_is_terminal && !quiet && !dumb
}

fn is_dumb_terminal() -> bool {
    std::env::var("TERM").is_ok_and(|term| term == "dumb")
}

/// Renders pipeline events, either as a progress bar or as log lines.
pub(crate) struct BatchProgress {
    enabled: bool,
    bar: Option<ProgressBar>,
}

impl BatchProgress {
    pub(crate) fn new(quiet: bool) -> Self {
        Self {
            enabled: should_use_progress_bar(io::stderr().is_terminal(), quiet, is_dumb_terminal()),
            bar: None,
        }
    }

    pub(crate) fn handle(&mut self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::ChapterStarted { number, pages } => {
                info!(chapter = number, pages, "downloading chapter");
                if self.enabled {
                    let bar = ProgressBar::new(pages as u64);
                    bar.set_style(
                        ProgressStyle::with_template(
                            "{spinner} {msg} [{bar:30}] {pos}/{len} pages",
                        )
                        .unwrap_or_else(|_| ProgressStyle::default_bar()),
                    );
                    bar.set_message(format!("Chapter {number}"));
                    bar.enable_steady_tick(Duration::from_millis(100));
                    self.bar = Some(bar);
                }
            }
            PipelineEvent::Page(progress) => {
                if let Some(bar) = &self.bar {
                    bar.inc(progress.completed as u64);
                }
                if let Some(error) = progress.error {
                    warn!(page = progress.page, error = %error, "page failed");
                }
            }
            PipelineEvent::ChapterDone { number } => {
                self.finish();
                info!(chapter = number, "chapter done");
            }
            PipelineEvent::ChapterFailed { number, error } => {
                self.finish();
                warn!(chapter = number, error = %error, "chapter skipped");
            }
            PipelineEvent::Converted(progress) => match progress.result {
                Ok(result) => info!(
                    done = progress.done,
                    total = progress.total,
                    output = %result.output.display(),
                    "converted"
                ),
                Err(error) => warn!(
                    done = progress.done,
                    total = progress.total,
                    error = %error,
                    "conversion failed"
                ),
            },
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_requires_interactive_non_quiet_terminal() {
        assert!(should_use_progress_bar(true, false, false));
        assert!(!should_use_progress_bar(false, false, false));
        assert!(!should_use_progress_bar(true, true, false));
        assert!(!should_use_progress_bar(true, false, true));
    }

    #[test]
    fn disabled_progress_never_creates_bar() {
        let mut progress = BatchProgress {
            enabled: false,
            bar: None,
        };
        progress.handle(PipelineEvent::ChapterStarted {
            number: 1.0,
            pages: 3,
        });
        assert!(progress.bar.is_none());
        progress.handle(PipelineEvent::ChapterDone { number: 1.0 });
        assert!(progress.bar.is_none());
    }

    #[test]
    fn enabled_progress_clears_bar_when_chapter_ends() {
        let mut progress = BatchProgress {
            enabled: true,
            bar: None,
        };
        progress.handle(PipelineEvent::ChapterStarted {
            number: 2.5,
            pages: 4,
        });
        assert!(progress.bar.is_some());
        progress.handle(PipelineEvent::ChapterDone { number: 2.5 });
        assert!(progress.bar.is_none());
    }
}
