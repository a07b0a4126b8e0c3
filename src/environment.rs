use eyre::eyre;
use std::collections::HashMap;

use crate::Result;

/// Environment variable overrides applied on top of the ambient process
/// environment when an instrumented binary is launched.
///
/// Uses a `set` method instead of `insert` to emphasize the intent of
/// overriding a variable for the child.
#[derive(Debug, Clone, Default)]
pub struct Environment(HashMap<String, String>);

impl Environment {
    /// Creates a new empty set of overrides.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Parses a `KEY=VALUE` assignment into its key and value.
    ///
    /// Only the first `=` separates; the value may itself contain `=`.
    ///
    /// # Examples
    /// ```
    /// use bincover::Environment;
    ///
    /// let (key, value) = Environment::parse_assignment("OPTS=a=b").unwrap();
    /// assert_eq!(key, "OPTS");
    /// assert_eq!(value, "a=b");
    /// ```
    pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
        match assignment.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(eyre!(
                "Invalid environment assignment '{}': expected KEY=VALUE",
                assignment
            )),
        }
    }

    /// Sets an environment variable, replacing any previous value for `key`.
    ///
    /// # Examples
    /// ```
    /// use bincover::Environment;
    ///
    /// let mut env = Environment::new();
    /// env.set("ECHO_ARG_COVER_MODE", "set");
    /// assert_eq!(env.get("ECHO_ARG_COVER_MODE").map(String::as_str), Some("set"));
    /// ```
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Extends this environment with variables from another environment.
    ///
    /// Variables in `other` overwrite variables with the same name here.
    pub fn extend(&mut self, other: Environment) {
        self.0.extend(other.0);
    }

    /// Consumes this Environment and returns the underlying map.
    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<HashMap<String, String>> for Environment {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}
