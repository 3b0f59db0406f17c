//! Captured process-environment snapshot.

use std::collections::BTreeMap;

/// An immutable snapshot of the process environment.
///
/// The snapshot is captured once at startup and shared for the lifetime of
/// the process, so everything that consults configuration afterwards is a
/// pure lookup. Tests build snapshots from pairs instead of mutating the
/// process environment.
#[derive(Debug, Clone, Default)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    /// Capture the current process environment.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Look up a variable. Empty values count as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Whether a flag variable is enabled (`1` or `true`).
    pub fn is_enabled(&self, name: &str) -> bool {
        matches!(self.get(name), Some("1") | Some("true"))
    }
}

impl<K, V> FromIterator<(K, V)> for Env
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
