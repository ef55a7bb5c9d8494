use anyhow::{Context, Result};
use regex::Regex;

use crate::constants::PERCENT_100;
use crate::worker_pool::constants::DEFAULT_PROGRESS_PATTERN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: u64,
}

impl Progress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f32 / self.total as f32 * PERCENT_100).min(PERCENT_100)
    }
}

/// Turns one line of a tool's console output into a progress reading.
///
/// The output format belongs to the external tool, so the pool only ever
/// sees it through this trait.
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<Progress>;
}

/// Matches "N/total" style counters, e.g. `Processing spectrum 120/4000`.
#[derive(Debug, Clone)]
pub struct RatioProgressParser {
    pattern: Regex,
}

impl RatioProgressParser {
    /// `pattern` must contain two capture groups: completed, then total.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Invalid progress pattern: {}", pattern))?;

        // captures_len counts the implicit whole-match group
        if pattern.captures_len() < 3 {
            return Err(anyhow::anyhow!(
                "Progress pattern needs two capture groups (completed, total): {}",
                pattern.as_str()
            ));
        }

        Ok(Self { pattern })
    }

    /// Parser for the built-in `N/total` pattern.
    pub fn standard() -> Result<Self> {
        Self::new(DEFAULT_PROGRESS_PATTERN)
    }
}

impl ProgressParser for RatioProgressParser {
    fn parse(&self, line: &str) -> Option<Progress> {
        // Last match wins: tools often prefix lines with other ratios
        let caps = self.pattern.captures_iter(line).last()?;
        let completed = caps.get(1)?.as_str().parse().ok()?;
        let total = caps.get(2)?.as_str().parse().ok()?;
        Some(Progress { completed, total })
    }
}

/// For tools that never report progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressParser for NoProgress {
    fn parse(&self, _line: &str) -> Option<Progress> {
        None
    }
}

impl<F> ProgressParser for F
where
    F: Fn(&str) -> Option<Progress> + Send + Sync,
{
    fn parse(&self, line: &str) -> Option<Progress> {
        self(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parser_reads_ratio() {
        let parser = RatioProgressParser::standard().unwrap();
        let progress = parser.parse("Processing spectrum 120/4000").unwrap();
        assert_eq!(progress, Progress { completed: 120, total: 4000 });
        assert_eq!(progress.percent(), 3.0);
    }

    #[test]
    fn test_last_ratio_on_line_wins() {
        let parser = RatioProgressParser::standard().unwrap();
        let progress = parser.parse("[1/2] scan 30 / 60").unwrap();
        assert_eq!(progress.completed, 30);
        assert_eq!(progress.total, 60);
    }

    #[test]
    fn test_lines_without_ratio() {
        let parser = RatioProgressParser::standard().unwrap();
        assert!(parser.parse("Loading database").is_none());
        assert!(NoProgress.parse("10/20").is_none());
    }

    #[test]
    fn test_percent_edge_cases() {
        assert_eq!(Progress { completed: 5, total: 0 }.percent(), 0.0);
        assert_eq!(Progress { completed: 12, total: 10 }.percent(), 100.0);
    }

    #[test]
    fn test_custom_pattern_needs_two_groups() {
        assert!(RatioProgressParser::new(r"(\d+)%").is_err());
        assert!(RatioProgressParser::new(r"([").is_err());

        let parser = RatioProgressParser::new(r"Spectrum (\d+) of (\d+)").unwrap();
        assert_eq!(parser.parse("Spectrum 3 of 12").unwrap().percent(), 25.0);
    }

    #[test]
    fn test_closure_parser() {
        let parser = |line: &str| {
            line.strip_suffix('%')
                .and_then(|n| n.trim().parse().ok())
                .map(|completed| Progress { completed, total: 100 })
        };
        assert_eq!(parser.parse("45%").unwrap().percent(), 45.0);
    }
}
