//! Best-effort progress scraping from engine output.
//!
//! Nothing here affects how a job ends: a chunk without a marker simply
//! yields no progress value.

use regex::Regex;
use std::sync::LazyLock;

const MAX_PERCENT: f64 = 100.0;

static PERCENT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("percent marker regex is valid"));

/// Highest percentage (0..=100) found in a chunk, truncated to a whole number.
pub fn extract_percent(chunk: &str) -> Option<u8> {
    PERCENT_MARKER
        .captures_iter(chunk)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .filter(|value| (0.0..=MAX_PERCENT).contains(value))
        .map(|value| value.floor() as u8)
        .max()
}

/// Emits only strictly increasing percentages.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, chunk: &str) -> Option<u8> {
        let percent = extract_percent(chunk)?;
        match self.last {
            Some(last) if percent <= last => {
                log::trace!("[engine::progress] suppressed: percent={} last={}", percent, last);
                None
            }
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
