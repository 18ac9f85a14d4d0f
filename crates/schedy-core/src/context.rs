//! Correlation ids for events and service calls

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Tags everything caused by one stimulus with a shared ULID
///
/// Rooms attach a fresh context to the calls of one transaction, so the
/// state changes those calls produce can be traced back in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Context {
    pub id: String,
}

impl Context {
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contexts_are_unique() {
        let a = Context::new();
        let b = Context::default();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 26);
    }
}
