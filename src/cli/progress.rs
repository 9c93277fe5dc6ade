//! Terminal progress bar for a run.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use takeout_merge::pipeline::{FileReport, Progress};

pub struct Bar(ProgressBar);

impl Bar {
    /// A bar on stderr, or a hidden one when `visible` is false.
    pub fn new(visible: bool) -> Result<Self> {
        let bar = if visible {
            ProgressBar::new(0)
        } else {
            ProgressBar::hidden()
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("Processing media {pos}/{len} [{wide_bar}] {msg}")?
                .progress_chars("=> "),
        );
        Ok(Self(bar))
    }

    pub fn finish(&self) {
        self.0.finish_and_clear();
    }
}

impl Progress for Bar {
    fn start(&self, total: usize) {
        self.0.set_length(total as u64);
    }

    fn file_done(&self, report: &FileReport) {
        if let Some(name) = report.source.file_name() {
            self.0.set_message(name.to_string_lossy().into_owned());
        }
        self.0.inc(1);
    }
}
