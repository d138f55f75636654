//! Error classification and message normalization
//!
//! Classification is a pure function of the message text: ordered,
//! case-insensitive rules where the first match wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Validation,
    ExternalService,
    RateLimit,
    Auth,
    NotFound,
    Conflict,
    Internal,
    Unknown,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Timeout,
        ErrorCategory::Validation,
        ErrorCategory::ExternalService,
        ErrorCategory::RateLimit,
        ErrorCategory::Auth,
        ErrorCategory::NotFound,
        ErrorCategory::Conflict,
        ErrorCategory::Internal,
        ErrorCategory::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
            ErrorCategory::ExternalService => "external_service",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Auth => "auth",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Internal => "internal",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Transient categories that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout | ErrorCategory::RateLimit | ErrorCategory::ExternalService
        )
    }

    /// Operator-facing hint attached to error patterns
    pub fn suggested_fix(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "Increase the tier timeout or split the job into smaller units",
            ErrorCategory::Validation => "Fix the payload at the producer; retrying will fail the same way",
            ErrorCategory::ExternalService => "Check the upstream service status and retry once it recovers",
            ErrorCategory::RateLimit => "Reduce tier concurrency or add delay between submissions",
            ErrorCategory::Auth => "Rotate or refresh the credentials used by the handler",
            ErrorCategory::NotFound => "Verify the referenced resource still exists before retrying",
            ErrorCategory::Conflict => "The work was likely already done; discard the job",
            ErrorCategory::Internal => "Inspect handler logs for a bug and deploy a fix before retrying",
            ErrorCategory::Unknown => "Inspect the error manually and add a classification rule",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = crate::error::QueueError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        ErrorCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::error::QueueError::not_found(format!("Unknown error category: {}", s)))
    }
}

/// What an operator should do with a dead job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    RetryWithDelay,
    ManualIntervention,
    Escalate,
    Discard,
}

impl SuggestedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestedAction::RetryWithDelay => "retry_with_delay",
            SuggestedAction::ManualIntervention => "manual_intervention",
            SuggestedAction::Escalate => "escalate",
            SuggestedAction::Discard => "discard",
        }
    }
}

/// Action for a category; internal errors escalate only on critical job types
pub fn suggested_action(category: ErrorCategory, is_critical_job: bool) -> SuggestedAction {
    match category {
        ErrorCategory::Timeout | ErrorCategory::RateLimit | ErrorCategory::ExternalService => {
            SuggestedAction::RetryWithDelay
        }
        ErrorCategory::Validation | ErrorCategory::NotFound => SuggestedAction::ManualIntervention,
        ErrorCategory::Auth => SuggestedAction::Escalate,
        ErrorCategory::Internal if is_critical_job => SuggestedAction::Escalate,
        ErrorCategory::Conflict => SuggestedAction::Discard,
        ErrorCategory::Internal | ErrorCategory::Unknown => SuggestedAction::ManualIntervention,
    }
}

fn rule(category: ErrorCategory, pattern: &str) -> (ErrorCategory, Regex) {
    // Patterns are compile-time constants covered by tests
    (category, Regex::new(&format!("(?i){}", pattern)).expect("invalid classification pattern"))
}

// Order matters: auth before validation so "invalid token" is an auth error,
// timeout first so "gateway timeout" is not an external service error.
static RULES: Lazy<Vec<(ErrorCategory, Regex)>> = Lazy::new(|| {
    vec![
        rule(ErrorCategory::Timeout, r"timed? ?out|timeout|etimedout|deadline exceeded|\b408\b|\b504\b"),
        rule(ErrorCategory::RateLimit, r"rate.?limit|too many requests|\b429\b|quota exceeded|throttl"),
        rule(
            ErrorCategory::Auth,
            r"unauthori[sz]ed|forbidden|\b401\b|\b403\b|authenticat|invalid (api )?(token|key|credentials)|api key|permission denied|access denied|expired token|token expired",
        ),
        rule(
            ErrorCategory::Validation,
            r"validat|invalid|required|missing field|malformed|schema|bad request|\b400\b|\b422\b|unprocessable",
        ),
        rule(ErrorCategory::NotFound, r"not found|\b404\b|does not exist|no such|unknown (user|account|resource)"),
        rule(ErrorCategory::Conflict, r"conflict|\b409\b|already exists|duplicate|already processed"),
        rule(
            ErrorCategory::ExternalService,
            r"econnrefused|econnreset|connection (refused|reset|closed)|\b502\b|\b503\b|bad gateway|service unavailable|network|socket hang up|upstream|dns|enotfound|tls|ssl",
        ),
        rule(ErrorCategory::Internal, r"internal|\b500\b|panic|null|undefined|no handler|unexpected"),
    ]
});

/// Classify an error message
pub fn classify_error(message: &str) -> ErrorCategory {
    RULES
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
        .expect("invalid uuid pattern")
});

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?")
        .expect("invalid timestamp pattern")
});

static IP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d{1,3}(\.\d{1,3}){3}(:\d+)?\b").expect("invalid ip pattern")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w.+-]+@[\w-]+(\.[\w-]+)+").expect("invalid email pattern")
});

static HEX_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{16,}\b").expect("invalid hex pattern")
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("invalid number pattern"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("invalid whitespace pattern"));

/// Maximum length of a normalized pattern
const MAX_PATTERN_LEN: usize = 200;

/// Strip identifiers, timestamps and numbers so repeated failures group together
pub fn normalize_error_message(message: &str) -> String {
    let normalized = UUID_RE.replace_all(message, "<uuid>");
    let normalized = TIMESTAMP_RE.replace_all(&normalized, "<timestamp>");
    let normalized = IP_RE.replace_all(&normalized, "<ip>");
    let normalized = EMAIL_RE.replace_all(&normalized, "<email>");
    let normalized = HEX_ID_RE.replace_all(&normalized, "<id>");
    let normalized = NUMBER_RE.replace_all(&normalized, "<n>");
    let normalized = WHITESPACE_RE.replace_all(normalized.trim(), " ");
    normalized.chars().take(MAX_PATTERN_LEN).collect()
}
