//! Deterministic prose scanner.
//!
//! Rejects a chapter that leans on a closed set of overused constructions.
//! The scan is purely local and side-effect-free: same text in, same
//! verdict out, no LLM involved. Limits come from `[scanner]` config.

use crate::config::ScannerConfig;
use regex::Regex;
use std::sync::OnceLock;

fn not_but_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bnot\s+(?:just\s+|only\s+|merely\s+)?[^,.;\n]{1,40}?,?\s+but\b")
            .expect("not-but regex must compile")
    })
}

fn something_in_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bsomething\s+in\s+(?:the|his|her|their|its|my|your)\b")
            .expect("something-in regex must compile")
    })
}

fn kind_of_that_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bthe\s+kind\s+of\s+\w+\s+that\b")
            .expect("kind-of-that regex must compile")
    })
}

/// One exceeded pattern limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanViolation {
    /// Which pattern was exceeded.
    pub pattern: &'static str,
    /// How many occurrences were found.
    pub count: u32,
    /// The configured limit.
    pub limit: u32,
}

impl std::fmt::Display for ScanViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} appears {} times (limit {})",
            self.pattern, self.count, self.limit
        )
    }
}

/// Result of scanning one chapter.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// All exceeded limits; empty means PASS.
    pub violations: Vec<ScanViolation>,
}

impl ScanReport {
    /// Whether the chapter passes the scan.
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human-readable failure summary for regeneration prompts.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The scanner itself. Cheap to construct; holds only the limits.
#[derive(Debug, Clone)]
pub struct ProseScanner {
    limits: ScannerConfig,
}

impl ProseScanner {
    /// Create a scanner with the given limits.
    pub fn new(limits: ScannerConfig) -> Self {
        Self { limits }
    }

    /// Scan a chapter. Deterministic: identical text produces an identical
    /// report.
    pub fn scan(&self, text: &str) -> ScanReport {
        let mut violations = Vec::new();

        let checks: [(&'static str, u32, u32); 4] = [
            (
                "em-dash",
                text.matches('\u{2014}').count() as u32,
                self.limits.em_dash_max,
            ),
            (
                "'not X, but Y' construction",
                not_but_re().find_iter(text).count() as u32,
                self.limits.not_but_max,
            ),
            (
                "'something in X' construction",
                something_in_re().find_iter(text).count() as u32,
                self.limits.something_in_max,
            ),
            (
                "'the kind of X that Y' construction",
                kind_of_that_re().find_iter(text).count() as u32,
                self.limits.kind_of_that_max,
            ),
        ];

        for (pattern, count, limit) in checks {
            if count > limit {
                violations.push(ScanViolation {
                    pattern,
                    count,
                    limit,
                });
            }
        }

        ScanReport { violations }
    }
}
