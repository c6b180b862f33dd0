//! Formatting of scheduler directives.
//!
//! A directive is a `#SBATCH --key=value` comment line near the top of a job
//! script. Directives are kept in insertion order because the scheduler
//! applies the last occurrence of a repeated option.

use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// The marker that begins every directive line.
pub const DIRECTIVE_MARKER: &str = "#SBATCH";

/// The directive key that redirects the job's standard output.
pub const OUTPUT_DIRECTIVE: &str = "output";

/// An ordered set of scheduler directives.
///
/// Inserting an existing key replaces its value but keeps its original
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectiveSet(IndexMap<String, String>);

impl DirectiveSet {
    /// Creates an empty directive set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a directive, returning the previous value if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> Option<String> {
        self.0.insert(key.into(), value.to_string())
    }

    /// Gets the value of a directive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Extends this set with the directives of another, in order.
    pub fn merge(&mut self, other: &DirectiveSet) {
        for (key, value) in other.iter() {
            self.insert(key, value);
        }
    }

    /// Iterates over the directives in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The number of directives in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Formats each directive as a script line, in insertion order.
    ///
    /// No validation of keys or values is performed; the scheduler reports
    /// illegal directives when the script is submitted.
    pub fn lines(&self) -> Vec<String> {
        self.iter()
            .map(|(key, value)| Directive { key, value }.to_string())
            .collect()
    }
}

impl<K, V> FromIterator<(K, V)> for DirectiveSet
where
    K: Into<String>,
    V: ToString,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (key, value) in iter {
            set.insert(key, value);
        }
        set
    }
}

/// A single directive, borrowed from a [`DirectiveSet`].
struct Directive<'a> {
    /// The option name, without leading dashes.
    key: &'a str,
    /// The option value.
    value: &'a str,
}

impl fmt::Display for Directive<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DIRECTIVE_MARKER} --{key}={value}", key = self.key, value = self.value)
    }
}

/// Whether a script line is a directive line.
pub fn is_directive(line: &str) -> bool {
    line.starts_with(DIRECTIVE_MARKER)
}
