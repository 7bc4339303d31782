//! Bundle coordinates (group:artifact:version[:classifier])

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classifier used by plugin bundles
pub const PLUGIN_CLASSIFIER: &str = "plugin";

/// Identifies a bundle in the dependency repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BundleCoordinate {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Version,
    pub classifier: Option<String>,
}

impl BundleCoordinate {
    /// Create a coordinate without classifier
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>, version: Version) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version,
            classifier: None,
        }
    }

    /// Builder: set classifier
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// `group:artifact`, the version-less identity of a bundle
    pub fn key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }

    /// Whether two coordinates name the same bundle, ignoring version
    pub fn same_bundle(&self, other: &BundleCoordinate) -> bool {
        self.group_id == other.group_id && self.artifact_id == other.artifact_id
    }

    pub fn is_plugin(&self) -> bool {
        self.classifier.as_deref() == Some(PLUGIN_CLASSIFIER)
    }
}

/// Whether `provided` satisfies a requirement for `required`.
///
/// Same major version and not older; on `0.x` the minor must match too.
pub fn is_compatible_version(required: &Version, provided: &Version) -> bool {
    if required.major != provided.major {
        return false;
    }
    if required.major == 0 && required.minor != provided.minor {
        return false;
    }
    provided >= required
}

impl fmt::Display for BundleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        Ok(())
    }
}

/// Error parsing a coordinate string
#[derive(Debug, Clone, thiserror::Error)]
#[error("Invalid bundle coordinate '{input}': {reason}")]
pub struct CoordinateParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for BundleCoordinate {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| CoordinateParseError {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(err("expected group:artifact:version[:classifier]"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(err("empty segment"));
        }

        let version = Version::parse(parts[2]).map_err(|e| err(&e.to_string()))?;
        let mut coordinate = BundleCoordinate::new(parts[0], parts[1], version);
        if let Some(classifier) = parts.get(3) {
            coordinate.classifier = Some((*classifier).to_string());
        }
        Ok(coordinate)
    }
}

impl TryFrom<String> for BundleCoordinate {
    type Error = CoordinateParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BundleCoordinate> for String {
    fn from(value: BundleCoordinate) -> Self {
        value.to_string()
    }
}
