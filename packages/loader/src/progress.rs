//! Row-count reporting while a trip file is read.
//!
//! The loader stays independent of any terminal UI; the binary plugs in
//! an `indicatif` counter and tests use [`Silent`].

/// Receives row counts from the trip loader.
pub trait LoadProgress: Send + Sync {
    /// `rows` more rows were read.
    fn rows_read(&self, rows: u64);

    /// Reading ended with `loaded` trips kept and `rejected` rows skipped.
    fn finished(&self, loaded: usize, rejected: usize);
}

/// Ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl LoadProgress for Silent {
    fn rows_read(&self, _rows: u64) {}
    fn finished(&self, _loaded: usize, _rejected: usize) {}
}
