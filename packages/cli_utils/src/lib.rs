#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal feedback for the bysykkel binary.
//!
//! [`init_logger`] routes `log` output through `indicatif-log-bridge` so
//! log lines never tear a progress bar. [`RowCounter`] shows the trip
//! loader's progress and [`StageBar`] tracks the pipeline stages.

use std::time::Duration;

use bysykkel_loader::progress::LoadProgress;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;

pub use indicatif::MultiProgress;

/// Spinner counting trip rows as they are read.
pub struct RowCounter {
    bar: ProgressBar,
}

impl RowCounter {
    /// Adds a row spinner labelled `label` to `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress, label: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {msg} {human_pos} rows ({per_sec}) [{elapsed}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(label.to_string());
        Self { bar }
    }
}

impl LoadProgress for RowCounter {
    fn rows_read(&self, rows: u64) {
        self.bar.inc(rows);
    }

    fn finished(&self, loaded: usize, rejected: usize) {
        let message = if rejected == 0 {
            format!("{loaded} trips")
        } else {
            format!("{loaded} trips, {rejected} rows skipped")
        };
        self.bar.finish_with_message(message);
    }
}

/// Bar advancing through a fixed list of named pipeline stages.
pub struct StageBar {
    bar: ProgressBar,
    stages: Vec<String>,
}

impl StageBar {
    /// Adds a bar for `stages` to `multi`.
    #[must_use]
    pub fn new(multi: &MultiProgress, stages: &[&str]) -> Self {
        let bar = multi.add(ProgressBar::new(stages.len() as u64));
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:.bold} {wide_bar:.green/dim} {pos}/{len} {msg} [{elapsed_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar.set_prefix("pipeline");
        Self {
            bar,
            stages: stages.iter().map(ToString::to_string).collect(),
        }
    }

    /// Marks stage `index` as running and every earlier stage as done.
    pub fn begin(&self, index: usize) {
        self.bar.set_position(index.min(self.stages.len()) as u64);
        if let Some(name) = self.stages.get(index) {
            log::debug!("Stage {}/{}: {name}", index + 1, self.stages.len());
            self.bar.set_message(name.clone());
        }
    }

    /// Marks every stage as done.
    pub fn finish(&self, elapsed: Duration) {
        self.bar.set_position(self.stages.len() as u64);
        self.bar
            .finish_with_message(format!("done in {:.1}s", elapsed.as_secs_f64()));
    }
}

/// Initializes the global logger behind `indicatif-log-bridge` and returns
/// the [`MultiProgress`] every bar must be added to.
///
/// The level defaults to `info`; `RUST_LOG` overrides it with the usual
/// `env_logger` filter syntax.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    let logger = builder.build();
    let level = logger.filter();

    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_err()
    {
        log::debug!("Logger already installed");
    }
    log::set_max_level(level);

    multi
}
