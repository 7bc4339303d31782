//! PolicyChain - Applied policies in execution order

use crate::parametrization::PolicyParametrization;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// An event flowing through the chain into the application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEvent {
    pub method: String,
    pub path: String,
    pub attributes: BTreeMap<String, String>,
    /// Ids of the policies the event went through, in order
    pub trail: Vec<String>,
}

impl PolicyEvent {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }
}

/// A policy rejected or failed to process an event
#[derive(Debug, Clone, Error)]
#[error("Policy '{policy}' rejected the event: {reason}")]
pub struct ProcessingError {
    pub policy: String,
    pub reason: String,
}

pub type ProcessingResult = std::result::Result<PolicyEvent, ProcessingError>;

/// Policy logic; call `next` to continue down the chain
pub trait PolicyHandler: Send + Sync {
    fn handle(&self, event: PolicyEvent, next: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult;
}

#[derive(Clone)]
struct AppliedPolicy {
    parametrization: PolicyParametrization,
    handler: Arc<dyn PolicyHandler>,
    sequence: u64,
}

/// Policies sorted by order, ties broken by registration sequence
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<AppliedPolicy>,
    next_sequence: u64,
}

impl PolicyChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, parametrization: PolicyParametrization, handler: Arc<dyn PolicyHandler>) {
        let applied = AppliedPolicy {
            parametrization,
            handler,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let position = self
            .policies
            .iter()
            .position(|p| (p.parametrization.order, p.sequence) > (applied.parametrization.order, applied.sequence))
            .unwrap_or(self.policies.len());
        self.policies.insert(position, applied);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.policies.len();
        self.policies.retain(|p| p.parametrization.id != id);
        self.policies.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.policies.iter().any(|p| p.parametrization.id == id)
    }

    /// Policy ids in execution order
    pub fn ids(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.parametrization.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Run `event` through every matching policy, then through `flow`
    pub fn process(&self, event: PolicyEvent, flow: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult {
        self.run_from(0, event, flow)
    }

    fn run_from(&self, start: usize, event: PolicyEvent, flow: &dyn Fn(PolicyEvent) -> ProcessingResult) -> ProcessingResult {
        let matching = self.policies[start.min(self.policies.len())..]
            .iter()
            .position(|p| p.parametrization.pointcut.matches(&event))
            .map(|offset| start + offset);

        match matching {
            Some(index) => {
                let policy = &self.policies[index];
                let mut event = event;
                event.trail.push(policy.parametrization.id.clone());
                policy
                    .handler
                    .handle(event, &|e| self.run_from(index + 1, e, flow))
            }
            None => flow(event),
        }
    }
}
