//! Deterministic red-flag scanner for user transcripts.
//!
//! Two ordered, case-insensitive substring lists. The first critical match
//! wins; otherwise the first high match; otherwise no verdict. Matching is
//! deliberately naive — English substrings, no tokenization — so the outcome
//! for a given transcript is fully reproducible.
//!
//! The scanner runs on user transcripts only, and only from the transcript
//! source that is currently authoritative for the session.

use serde::Serialize;

/// Verdict severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Outcome of a scan that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub severity: Severity,
    pub banner: String,
    /// Whether assistant audio should be interrupted immediately.
    pub interrupt: bool,
}

/// Phrases that indicate a potential emergency in progress.
const CRITICAL_PHRASES: &[&str] = &[
    "difficulty breathing",
    "can't breathe",
    "cannot breathe",
    "not breathing",
    "stopped breathing",
    "chest pain",
    "unconscious",
    "unresponsive",
    "anaphylaxis",
    "severe allergic reaction",
    "severe bleeding",
    "won't stop bleeding",
    "turning blue",
    "blue lips",
    "seizure",
    "convulsions",
    "choking",
    "overdose",
    "suicidal",
    "suicide",
];

/// Keywords that signal urgency without a specific emergency phrase.
const HIGH_KEYWORDS: &[&str] = &[
    "severe",
    "emergency",
    "urgent",
    "immediate",
    "life threatening",
    "getting worse fast",
    "extreme pain",
];

const CRITICAL_BANNER: &str =
    "This may be an emergency. Call your local emergency number or go to the nearest emergency department now.";

const HIGH_BANNER: &str =
    "These symptoms may need prompt attention. Please seek urgent care or contact your doctor right away.";

/// Scan one user transcript. Returns the verdict for the first match, if any.
#[must_use]
pub fn scan_transcript(text: &str) -> Option<SafetyVerdict> {
    let lowered = text.to_lowercase();

    if let Some(phrase) = CRITICAL_PHRASES.iter().find(|p| lowered.contains(*p)) {
        tracing::debug!(matched = phrase, severity = "critical", "Red flag matched");
        return Some(SafetyVerdict {
            severity: Severity::Critical,
            banner: CRITICAL_BANNER.to_string(),
            interrupt: true,
        });
    }

    if let Some(keyword) = HIGH_KEYWORDS.iter().find(|k| lowered.contains(*k)) {
        tracing::debug!(matched = keyword, severity = "high", "Red flag matched");
        return Some(SafetyVerdict {
            severity: Severity::High,
            banner: HIGH_BANNER.to_string(),
            interrupt: false,
        });
    }

    None
}
