//! Error classification.
//!
//! Maps any `std::error::Error` onto one [`ErrorClass`] using an ordered,
//! swappable [`PatternTable`]. Classification is pure: the same error text
//! always yields the same class, and nothing is recorded.
//!
//! # Examples
//!
//! ```rust
//! use egress_core::classify::{ErrorClass, ErrorClassifier};
//!
//! let classifier = ErrorClassifier::new();
//! let err = std::io::Error::other("connect ECONNREFUSED 127.0.0.1:1080");
//! assert_eq!(classifier.classify(&err), ErrorClass::ConnectionRefused);
//! ```

mod patterns;

pub use patterns::{ErrorClass, PatternRule, PatternTable};

use std::collections::BTreeMap;
use std::error::Error;

/// Classifies errors against a [`PatternTable`].
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    table: PatternTable,
}

impl ErrorClassifier {
    /// Classifier using the built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier using a caller-supplied table.
    pub fn with_table(table: PatternTable) -> Self {
        Self { table }
    }

    /// The table in use.
    pub fn table(&self) -> &PatternTable {
        &self.table
    }

    /// Classify an error.
    ///
    /// The message (the error's `Display` text followed by its `source()`
    /// chain) is matched first. If nothing matches, the error's name, the
    /// leading identifier of its `Debug` form, is checked for `timeout`,
    /// `navigation` and `network`.
    pub fn classify(&self, error: &(dyn Error + 'static)) -> ErrorClass {
        let message = message_chain(error);
        let debug = format!("{:?}", error);
        self.classify_parts(&message, Some(error_name(&debug)))
    }

    /// Classify from a raw message and optional error name.
    pub fn classify_parts(&self, message: &str, name: Option<&str>) -> ErrorClass {
        if !message.is_empty()
            && let Some(class) = self.table.first_match(message)
        {
            return class;
        }

        if let Some(name) = name {
            let name = name.to_lowercase();
            if name.contains("timeout") {
                return ErrorClass::Timeout;
            }
            if name.contains("navigation") {
                return ErrorClass::NavigationTimeout;
            }
            if name.contains("network") {
                return ErrorClass::NetworkError;
            }
        }

        ErrorClass::Unknown
    }

    /// Count errors per class.
    pub fn error_stats<'a, I>(&self, errors: I) -> BTreeMap<ErrorClass, usize>
    where
        I: IntoIterator<Item = &'a (dyn Error + 'static)>,
    {
        let mut stats = BTreeMap::new();
        for error in errors {
            *stats.entry(self.classify(error)).or_insert(0) += 1;
        }
        stats
    }
}

fn message_chain(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn error_name(debug: &str) -> &str {
    let end = debug
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(debug.len());
    &debug[..end]
}
