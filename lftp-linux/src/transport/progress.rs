//! Best-effort transfer progress. Never part of the protocol.

use indicatif::{ProgressBar, ProgressStyle};

pub trait Progress: Send {
    fn advance(&mut self, done: u64, total: u64);
    fn finish(&mut self) {}
}

/// Reports nothing. Used by the server, which logs outcomes instead.
pub struct Silent;

impl Progress for Silent {
    fn advance(&mut self, _done: u64, _total: u64) {}
}

const TEMPLATE: &str =
    "Progress: {percent:>3}% [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})";

/// Progress bar on stderr, created on the first update once the size is known.
#[derive(Default)]
pub struct Console {
    bar: Option<ProgressBar>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transfer_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    bar.set_style(style);
    bar
}

impl Progress for Console {
    fn advance(&mut self, done: u64, total: u64) {
        let bar = self.bar.get_or_insert_with(|| transfer_bar(total));
        bar.set_length(total);
        bar.set_position(done);
    }

    fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish();
        }
    }
}
