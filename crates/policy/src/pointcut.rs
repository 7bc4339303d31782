//! Pointcuts - Per-event applicability of a policy

use crate::chain::PolicyEvent;
use glob::Pattern;
use shared::{DeploymentError, Result};
use std::fmt;

/// Decides whether a policy applies to an event
pub trait PolicyPointcut: Send + Sync + fmt::Debug {
    fn matches(&self, event: &PolicyEvent) -> bool;
}

/// Applies to every event
#[derive(Debug, Clone, Default)]
pub struct AlwaysPointcut;

impl PolicyPointcut for AlwaysPointcut {
    fn matches(&self, _event: &PolicyEvent) -> bool {
        true
    }
}

/// Applies to events whose path matches a glob pattern, optionally
/// restricted to some methods
#[derive(Debug, Clone)]
pub struct PathPointcut {
    pattern: Pattern,
    methods: Vec<String>,
}

impl PathPointcut {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Pattern::new(pattern)
            .map_err(|e| DeploymentError::Config(format!("invalid pointcut pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            pattern,
            methods: Vec::new(),
        })
    }

    /// Builder: restrict to the given methods (case-insensitive)
    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.methods = methods.iter().map(|m| m.to_ascii_uppercase()).collect();
        self
    }
}

impl PolicyPointcut for PathPointcut {
    fn matches(&self, event: &PolicyEvent) -> bool {
        let method_ok = self.methods.is_empty() || self.methods.iter().any(|m| m.eq_ignore_ascii_case(&event.method));
        method_ok && self.pattern.matches(&event.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_pointcut() {
        let pointcut = PathPointcut::new("/api/*").unwrap().with_methods(&["get"]);
        assert!(pointcut.matches(&PolicyEvent::new("GET", "/api/orders")));
        assert!(!pointcut.matches(&PolicyEvent::new("POST", "/api/orders")));
        assert!(!pointcut.matches(&PolicyEvent::new("GET", "/health")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(PathPointcut::new("/api/[").is_err());
    }
}
