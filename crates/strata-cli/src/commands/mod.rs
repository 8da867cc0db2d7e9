pub mod bundle;
pub mod clone;
pub mod completions;
pub mod destroy;
pub mod export;
pub mod import;
pub mod snapshot;
pub mod supervise;

use indicatif::{ProgressBar, ProgressStyle};
use strata_remote::{NoProgress, ProgressSink};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Byte progress on a terminal bar, one bar reused per transfer.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            style("{msg:20} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, label: &str, total: Option<u64>) {
        self.bar.reset();
        self.bar.set_length(total.unwrap_or(0));
        self.bar.set_message(label.to_owned());
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn advance(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// A terminal bar for interactive runs, nothing for JSON output.
pub fn progress(json: bool) -> Box<dyn ProgressSink> {
    if json {
        Box::new(NoProgress)
    } else {
        Box::new(BarProgress::new())
    }
}

pub fn ok_line(msg: &str) -> String {
    format!("{} {msg}", console::style("✓").green())
}

pub fn bold(text: &str) -> String {
    console::style(text).bold().to_string()
}
