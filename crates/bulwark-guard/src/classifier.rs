//! Error classification
//!
//! Maps an error to an [`ErrorType`], a [`Severity`], and a retriable verdict
//! using `std::io::Error` kinds found in the source chain first, then keyword
//! heuristics on the rendered message chain, then the error's type name.
//!
//! VALIDATION and FILESYSTEM errors are never retried, including transient
//! filesystem failures.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::io;

/// Error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Connectivity, timeouts, remote endpoints
    Network,
    /// Database engines and queries
    Database,
    /// Files, directories, permissions
    Filesystem,
    /// Allocation failures
    Memory,
    /// Bad input
    Validation,
    /// Missing or failing external dependency
    Dependency,
    /// Locks, contention, races
    Concurrency,
    /// Anything else
    Unknown,
}

impl ErrorType {
    /// Severity assigned to this category
    #[inline]
    #[must_use]
    pub fn severity(self) -> Severity {
        match self {
            Self::Memory | Self::Database => Severity::Critical,
            Self::Network | Self::Dependency => Severity::High,
            Self::Filesystem | Self::Concurrency | Self::Unknown => Severity::Medium,
            Self::Validation => Severity::Low,
        }
    }

    /// Whether errors of this category may be retried at all
    #[inline]
    #[must_use]
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Validation | Self::Filesystem)
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "NETWORK",
            Self::Database => "DATABASE",
            Self::Filesystem => "FILESYSTEM",
            Self::Memory => "MEMORY",
            Self::Validation => "VALIDATION",
            Self::Dependency => "DEPENDENCY",
            Self::Concurrency => "CONCURRENCY",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Error severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Expected, caller-correctable
    Low,
    /// Degrades a single operation
    Medium,
    /// Degrades a dependency
    High,
    /// Threatens the process
    Critical,
}

/// Classification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Category
    pub error_type: ErrorType,
    /// Severity derived from the category
    pub severity: Severity,
    /// Whether retrying could help
    pub retriable: bool,
}

impl Classification {
    fn new(error_type: ErrorType, non_retriable_hint: bool) -> Self {
        Self {
            error_type,
            severity: error_type.severity(),
            retriable: error_type.is_retriable() && !non_retriable_hint,
        }
    }
}

/// Keyword patterns in match order
const PATTERNS: &[(ErrorType, &str)] = &[
    (
        ErrorType::Memory,
        r"(?i)out of memory|\boom\b|heap (limit|out|exhausted)|allocation failed|cannot allocate|memory (limit|exhausted)",
    ),
    (
        ErrorType::Database,
        r"(?i)database|\bsql|sqlite|postgres|mysql|mongo|query failed|transaction|constraint violation",
    ),
    (
        ErrorType::Network,
        r"(?i)network|timed? ?out|timeout|econnrefused|econnreset|enotfound|etimedout|socket|connection (refused|reset|closed|aborted)|\bdns\b|\bhttp|fetch|unreachable|rate limit",
    ),
    (
        ErrorType::Filesystem,
        r"(?i)\benoent\b|\beacces\b|\beperm\b|\beisdir\b|\benotdir\b|no such file|permission denied|file ?system|directory|\bfile\b",
    ),
    (
        ErrorType::Validation,
        r"(?i)validation|invalid|malformed|schema|parse|required field|must be",
    ),
    (
        ErrorType::Dependency,
        r"(?i)dependency|module not found|cannot find module|import|package|provider|upstream|service unavailable",
    ),
    (
        ErrorType::Concurrency,
        r"(?i)deadlock|\block|race condition|concurren|\bbusy\b|contention|poisoned",
    ),
];

/// Errors carrying these phrases are never retried regardless of category
const NON_RETRIABLE: &str =
    r"(?i)unauthori[sz]ed|forbidden|authentication failed|invalid api key|non-?retriable|not retriable|permanent";

static COMPILED: Lazy<Vec<(ErrorType, Regex)>> = Lazy::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(error_type, pattern)| Regex::new(pattern).ok().map(|re| (*error_type, re)))
        .collect()
});

static NON_RETRIABLE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(NON_RETRIABLE).ok());

/// Classify an error
#[must_use]
pub fn classify<E: Error + 'static>(error: &E) -> Classification {
    let root: &(dyn Error + 'static) = error;

    let mut message = String::new();
    let mut io_type = None;
    let mut current = Some(root);
    while let Some(err) = current {
        if !message.is_empty() {
            message.push_str(": ");
        }
        message.push_str(&err.to_string());
        if io_type.is_none() {
            io_type = err.downcast_ref::<io::Error>().and_then(|e| io_kind_type(e.kind()));
        }
        current = err.source();
    }

    let type_name = short_type_name(std::any::type_name::<E>());
    let non_retriable = NON_RETRIABLE_RE
        .as_ref()
        .is_some_and(|re| re.is_match(&message));

    let error_type = io_type
        .or_else(|| match_keywords(&message))
        .or_else(|| match_keywords(type_name))
        .unwrap_or(ErrorType::Unknown);

    Classification::new(error_type, non_retriable)
}

/// Classify from a bare error name and message
#[must_use]
pub fn classify_message(name: &str, message: &str) -> Classification {
    let non_retriable = NON_RETRIABLE_RE
        .as_ref()
        .is_some_and(|re| re.is_match(message));
    let error_type = match_keywords(message)
        .or_else(|| match_keywords(name))
        .unwrap_or(ErrorType::Unknown);
    Classification::new(error_type, non_retriable)
}

fn match_keywords(text: &str) -> Option<ErrorType> {
    COMPILED
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(error_type, _)| *error_type)
}

fn io_kind_type(kind: io::ErrorKind) -> Option<ErrorType> {
    use io::ErrorKind as K;
    match kind {
        K::PermissionDenied | K::NotFound | K::AlreadyExists => Some(ErrorType::Filesystem),
        K::TimedOut
        | K::ConnectionRefused
        | K::ConnectionReset
        | K::ConnectionAborted
        | K::NotConnected
        | K::AddrInUse
        | K::AddrNotAvailable
        | K::BrokenPipe => Some(ErrorType::Network),
        K::OutOfMemory => Some(ErrorType::Memory),
        K::InvalidInput | K::InvalidData => Some(ErrorType::Validation),
        K::WouldBlock => Some(ErrorType::Concurrency),
        _ => None,
    }
}

/// Last path segment, without generic arguments
fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("{0}")]
    struct Msg(&'static str);

    #[derive(Debug, thiserror::Error)]
    #[error("request failed")]
    struct Wrapped(#[source] io::Error);

    #[derive(Debug, thiserror::Error)]
    #[error("something odd happened")]
    struct ValidationError;

    #[test]
    fn all_patterns_compile() {
        assert_eq!(COMPILED.len(), PATTERNS.len());
        assert!(NON_RETRIABLE_RE.is_some());
    }

    #[test]
    fn keyword_classification() {
        let cases = [
            ("JavaScript heap out of memory", ErrorType::Memory),
            ("database connection lost", ErrorType::Database),
            ("ENOENT: no such file or directory", ErrorType::Filesystem),
            ("connect ECONNREFUSED 127.0.0.1:5432", ErrorType::Network),
            ("request timed out after 30s", ErrorType::Network),
            ("invalid email address", ErrorType::Validation),
            ("Cannot find module 'left-pad'", ErrorType::Dependency),
            ("deadlock detected", ErrorType::Concurrency),
            ("in-memory cache timeout", ErrorType::Network),
            ("failed to fetch file", ErrorType::Network),
            ("memory limit exceeded", ErrorType::Memory),
            ("the flux capacitor broke", ErrorType::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(classify(&Msg(message)).error_type, expected, "{message}");
        }
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(ErrorType::Memory.severity(), Severity::Critical);
        assert_eq!(ErrorType::Database.severity(), Severity::Critical);
        assert_eq!(ErrorType::Network.severity(), Severity::High);
        assert_eq!(ErrorType::Dependency.severity(), Severity::High);
        assert_eq!(ErrorType::Filesystem.severity(), Severity::Medium);
        assert_eq!(ErrorType::Concurrency.severity(), Severity::Medium);
        assert_eq!(ErrorType::Unknown.severity(), Severity::Medium);
        assert_eq!(ErrorType::Validation.severity(), Severity::Low);
    }

    #[test]
    fn retriability() {
        assert!(classify(&Msg("network unreachable")).retriable);
        assert!(classify(&Msg("failed to fetch file")).retriable);
        assert!(!classify(&Msg("invalid payload")).retriable);
        assert!(!classify(&Msg("permission denied")).retriable);
        assert!(!classify(&Msg("upstream returned 401 unauthorized")).retriable);
        assert!(classify(&Msg("something else")).retriable);
    }

    #[test]
    fn io_kind_in_source_chain_wins() {
        let err = Wrapped(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let class = classify(&err);
        assert_eq!(class.error_type, ErrorType::Network);
        assert!(class.retriable);

        let err = Wrapped(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert_eq!(classify(&err).error_type, ErrorType::Filesystem);
    }

    #[test]
    fn type_name_fallback() {
        assert_eq!(classify(&ValidationError).error_type, ErrorType::Validation);
    }

    #[test]
    fn classify_by_name_and_message() {
        let class = classify_message("TimeoutError", "took too long");
        assert_eq!(class.error_type, ErrorType::Network);
        assert_eq!(class.severity, Severity::High);
    }

    #[test]
    fn short_names() {
        assert_eq!(short_type_name("a::b::ValidationError"), "ValidationError");
        assert_eq!(short_type_name("a::Wrapper<b::Inner>"), "Wrapper");
    }
}
