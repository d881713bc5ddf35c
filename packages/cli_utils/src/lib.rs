#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `collision_digest` binary.
//!
//! [`FetchProgress`] follows the paged Socrata download, [`JobProgress`]
//! tracks the named steps of a run, and [`init_logger`] routes `log`
//! output through `indicatif-log-bridge` so log lines print above the bars.

use std::time::Duration;

use collision_digest_source::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg}";
const RECORDS_TEMPLATE: &str =
    "  {msg} {wide_bar:.cyan/dim} {human_pos}/{human_len} records ({per_sec})";
const JOB_TEMPLATE: &str = "{msg:32} {bar:20.green/dim} [{elapsed_precise}]";

/// HTTP stack modules that are chatty at `info`/`debug`. They are held at
/// `warn` unless `RUST_LOG` says otherwise.
const QUIET_MODULES: &[&str] = &["hyper", "hyper_util", "reqwest", "rustls"];

fn style(template: &str, fallback: fn() -> ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| fallback())
}

/// Progress of one collision download.
///
/// Spins while the first page is requested and becomes a record counter
/// once the source reports how many records it will fetch at most.
pub struct FetchProgress {
    bar: ProgressBar,
}

impl FetchProgress {
    #[must_use]
    pub fn new(multi: &MultiProgress, source_name: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(style(SPINNER_TEMPLATE, ProgressStyle::default_spinner));
        bar.set_message(format!("Fetching {source_name}"));
        Self { bar }
    }
}

impl ProgressCallback for FetchProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(
            style(RECORDS_TEMPLATE, ProgressStyle::default_bar).progress_chars("##-"),
        );
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Step counter for a full run (`[2/5] Assigning districts`).
pub struct JobProgress {
    bar: ProgressBar,
}

impl JobProgress {
    #[must_use]
    pub fn new(multi: &MultiProgress, steps: u64) -> Self {
        let bar = multi.add(ProgressBar::new(steps));
        bar.set_style(style(JOB_TEMPLATE, ProgressStyle::default_bar).progress_chars("##-"));
        Self { bar }
    }

    /// Shows `step` as the one in progress.
    pub fn begin(&self, step: &str) {
        let total = self.bar.length().unwrap_or_default();
        self.bar.set_message(step_label(self.bar.position(), total, step));
    }

    /// Marks the step in progress as done.
    pub fn complete(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self, msg: impl Into<String>) {
        self.bar.finish_with_message(msg.into());
    }
}

fn step_label(done: u64, total: u64, step: &str) -> String {
    format!("[{}/{total}] {step}", done + 1)
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge`.
///
/// The level defaults to `info` with the HTTP stack held at `warn`;
/// `RUST_LOG` overrides both. Returns the [`MultiProgress`] every bar must
/// be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(log::LevelFilter::Info);
    for module in QUIET_MODULES {
        builder.filter_module(module, log::LevelFilter::Warn);
    }
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let logger = builder.build();
    let level = logger.filter();

    // Already set when a second binary or test installed one first.
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}
