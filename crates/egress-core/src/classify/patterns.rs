//! The error taxonomy and its ordered pattern table.

use crate::error::{Error, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed taxonomy of failure kinds seen by flaky network tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Generic timeout
    Timeout,
    /// A page navigation did not complete in time
    NavigationTimeout,
    /// Network-level failure (DNS, reset, `net::ERR_*`)
    NetworkError,
    /// The remote end refused the connection
    ConnectionRefused,
    /// An expected element never appeared
    ElementNotFound,
    /// Script evaluation failed
    JavascriptError,
    /// Credentials rejected (401/403, login failure)
    AuthenticationError,
    /// Throttled by the remote service (429)
    RateLimit,
    /// Remote service temporarily unavailable (502/503/504)
    TemporaryFailure,
    /// Nothing matched
    Unknown,
}

impl ErrorClass {
    /// Every class, in declaration order.
    pub const ALL: [ErrorClass; 10] = [
        ErrorClass::Timeout,
        ErrorClass::NavigationTimeout,
        ErrorClass::NetworkError,
        ErrorClass::ConnectionRefused,
        ErrorClass::ElementNotFound,
        ErrorClass::JavascriptError,
        ErrorClass::AuthenticationError,
        ErrorClass::RateLimit,
        ErrorClass::TemporaryFailure,
        ErrorClass::Unknown,
    ];

    /// Snake-case tag used in logs and metric keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::NavigationTimeout => "navigation_timeout",
            ErrorClass::NetworkError => "network_error",
            ErrorClass::ConnectionRefused => "connection_refused",
            ErrorClass::ElementNotFound => "element_not_found",
            ErrorClass::JavascriptError => "javascript_error",
            ErrorClass::AuthenticationError => "authentication_error",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::TemporaryFailure => "temporary_failure",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ErrorClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| Error::InvalidConfig {
                key: "error_class".to_string(),
                message: format!("unknown error class '{}'", s),
            })
    }
}

/// One row of the table: a class and the patterns that select it.
#[derive(Debug, Clone)]
pub struct PatternRule {
    class: ErrorClass,
    patterns: Vec<Regex>,
}

impl PatternRule {
    /// Compile a rule from case-insensitive pattern sources.
    pub fn new<I, S>(class: ErrorClass, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| Error::InvalidPattern {
                        pattern: p.as_ref().to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { class, patterns })
    }

    /// The class this rule selects.
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Whether any pattern matches `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Ordered classification table. The first rule with a matching pattern wins.
///
/// The table is plain data: callers can build their own with
/// [`PatternTable::from_rules`] and hand it to
/// [`ErrorClassifier::with_table`](super::ErrorClassifier::with_table).
#[derive(Debug, Clone)]
pub struct PatternTable {
    rules: Vec<PatternRule>,
}

impl PatternTable {
    /// Build a table from already compiled rules, preserving their order.
    pub fn from_rules(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Build a table from `(class, patterns)` source pairs.
    pub fn from_sources<'a, I>(sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ErrorClass, &'a [&'a str])>,
    {
        let rules = sources
            .into_iter()
            .map(|(class, patterns)| PatternRule::new(class, patterns.iter()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Class of the first rule matching `text`.
    pub fn first_match(&self, text: &str) -> Option<ErrorClass> {
        self.rules
            .iter()
            .find(|rule| rule.matches(text))
            .map(PatternRule::class)
    }
}

// More specific classes come before the generic ones that would shadow them
// ("Navigation timeout" must not fall into `timeout`, ECONNREFUSED must not
// fall into `network_error`).
const DEFAULT_SOURCES: &[(ErrorClass, &[&str])] = &[
    (
        ErrorClass::NavigationTimeout,
        &[
            r"navigation timeout",
            r"page\.goto.*timeout",
            r"waitfornavigation.*timeout",
        ],
    ),
    (
        ErrorClass::ElementNotFound,
        &[
            r"no element found",
            r"waitforselector.*timeout",
            r"element.*not.*found",
        ],
    ),
    (
        ErrorClass::Timeout,
        &[r"timeout", r"timed out", r"timeouterror"],
    ),
    (
        ErrorClass::ConnectionRefused,
        &[r"econnrefused", r"connection refused"],
    ),
    (
        ErrorClass::NetworkError,
        &[
            r"net::err",
            r"enotfound",
            r"econnreset",
            r"network.*error",
            r"connection reset",
            r"dns error",
        ],
    ),
    (
        ErrorClass::JavascriptError,
        &[
            r"evaluation failed",
            r"javascript.*error",
            r"referenceerror",
            r"typeerror",
        ],
    ),
    (
        ErrorClass::AuthenticationError,
        &[
            r"authentication.*failed",
            r"login.*failed",
            r"\b401\b",
            r"\b403\b",
        ],
    ),
    (
        ErrorClass::RateLimit,
        &[r"rate limit", r"too many requests", r"\b429\b"],
    ),
    (
        ErrorClass::TemporaryFailure,
        &[
            r"temporary.*failure",
            r"service.*unavailable",
            r"\b502\b",
            r"\b503\b",
            r"\b504\b",
        ],
    ),
];

impl Default for PatternTable {
    fn default() -> Self {
        let rules = DEFAULT_SOURCES
            .iter()
            .filter_map(|(class, patterns)| PatternRule::new(*class, patterns.iter()).ok())
            .collect();
        Self { rules }
    }
}
