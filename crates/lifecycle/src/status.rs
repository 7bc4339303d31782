//! ArtifactStatus - Lifecycle state machine

use serde::{Deserialize, Serialize};
use shared::{DeploymentError, Result};
use std::fmt;

/// Lifecycle status of an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    New,
    Deploying,
    Started,
    DeploymentFailed,
    Stopped,
    Destroyed,
}

impl ArtifactStatus {
    /// Whether `self -> next` is a legal move
    pub fn can_transition_to(self, next: ArtifactStatus) -> bool {
        use ArtifactStatus::*;
        matches!(
            (self, next),
            (New, Deploying)
                | (New, DeploymentFailed)
                | (New, Destroyed)
                | (Deploying, Started)
                | (Deploying, DeploymentFailed)
                | (Started, Stopped)
                | (DeploymentFailed, Stopped)
                | (DeploymentFailed, Destroyed)
                | (Stopped, Started)
                | (Stopped, Destroyed)
        )
    }

    /// Move to `next`, or fail with `InvalidTransition`
    pub fn transition(self, artifact: &str, next: ArtifactStatus) -> Result<ArtifactStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(DeploymentError::InvalidTransition {
                artifact: artifact.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_running(self) -> bool {
        self == ArtifactStatus::Started
    }

    pub fn is_terminal(self) -> bool {
        self == ArtifactStatus::Destroyed
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactStatus::New => "NEW",
            ArtifactStatus::Deploying => "DEPLOYING",
            ArtifactStatus::Started => "STARTED",
            ArtifactStatus::DeploymentFailed => "DEPLOYMENT_FAILED",
            ArtifactStatus::Stopped => "STOPPED",
            ArtifactStatus::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}
