//! Artifact records and registration payloads.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Kinds of artifact a job can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Model,
    Plot,
    Report,
    Log,
    Metrics,
    Data,
    Config,
    Other,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Plot => "plot",
            Self::Report => "report",
            Self::Log => "log",
            Self::Metrics => "metrics",
            Self::Data => "data",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model" => Ok(Self::Model),
            "plot" => Ok(Self::Plot),
            "report" => Ok(Self::Report),
            "log" => Ok(Self::Log),
            "metrics" => Ok(Self::Metrics),
            "data" => Ok(Self::Data),
            "config" => Ok(Self::Config),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown artifact type '{other}'")),
        }
    }
}

/// Request to register an artifact.
///
/// Required fields default to empty so that a missing `name`, `type` or
/// `storage_location` reaches the registry and is reported as a validation
/// failure instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactRegistration {
    /// Producer-assigned id; generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub artifact_type: Option<ArtifactType>,
    #[serde(default)]
    pub storage_location: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<Uuid>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Ids of artifacts this one was derived from. Not required to exist yet.
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
}

impl ArtifactRegistration {
    pub fn new(
        name: impl Into<String>,
        artifact_type: ArtifactType,
        storage_location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_type: Some(artifact_type),
            storage_location: storage_location.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_service(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_dependency(mut self, artifact_id: Uuid) -> Self {
        self.dependencies.push(artifact_id);
        self
    }
}

/// A registered artifact. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub description: Option<String>,
    pub storage_location: String,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    /// Producing job (provenance, not ownership).
    pub job_id: Option<Uuid>,
    /// Producing handler or service.
    pub service_id: Option<String>,
    pub dependencies: BTreeSet<Uuid>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

/// Conjunctive filter for artifact listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactFilter {
    pub job_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub artifact_type: Option<ArtifactType>,
    pub tag: Option<String>,
    pub service_id: Option<String>,
    pub limit: Option<usize>,
}

impl ArtifactFilter {
    pub fn matches(&self, artifact: &Artifact) -> bool {
        self.job_id.is_none_or(|id| artifact.job_id == Some(id))
            && self
                .artifact_type
                .is_none_or(|kind| artifact.artifact_type == kind)
            && self
                .tag
                .as_ref()
                .is_none_or(|tag| artifact.tags.iter().any(|t| t == tag))
            && self
                .service_id
                .as_ref()
                .is_none_or(|svc| artifact.service_id.as_ref() == Some(svc))
    }
}

/// Result of a dependency query.
///
/// Ids that point at registered artifacts land in `resolved`; ids that do
/// not (yet) exist land in `missing`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    pub artifact_id: Uuid,
    pub transitive: bool,
    pub resolved: Vec<Uuid>,
    pub missing: Vec<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registration_tolerates_missing_required_fields() {
        let reg: ArtifactRegistration = serde_json::from_value(json!({"description": "x"})).unwrap();
        assert!(reg.name.is_empty());
        assert!(reg.artifact_type.is_none());
        assert!(reg.storage_location.is_empty());
    }

    #[test]
    fn registration_parses_wire_entry() {
        let dep = Uuid::new_v4();
        let reg: ArtifactRegistration = serde_json::from_value(json!({
            "name": "report.html",
            "type": "report",
            "storage_location": "s3://x",
            "service_id": "svc-1",
            "size_bytes": 42,
            "tags": ["q3"],
            "dependencies": [dep],
            "unexpected": true
        }))
        .unwrap();
        assert_eq!(reg.artifact_type, Some(ArtifactType::Report));
        assert_eq!(reg.service_id.as_deref(), Some("svc-1"));
        assert_eq!(reg.dependencies, vec![dep]);
    }

    #[test]
    fn unknown_artifact_type_is_rejected() {
        let result: Result<ArtifactRegistration, _> =
            serde_json::from_value(json!({"name": "a", "type": "video", "storage_location": "x"}));
        assert!(result.is_err());
        assert!("video".parse::<ArtifactType>().is_err());
        assert_eq!("plot".parse::<ArtifactType>().unwrap(), ArtifactType::Plot);
    }

    #[test]
    fn filter_is_conjunctive() {
        let job_id = Uuid::new_v4();
        let artifact = Artifact {
            id: Uuid::new_v4(),
            name: "m".into(),
            artifact_type: ArtifactType::Model,
            description: None,
            storage_location: "file:///m".into(),
            size_bytes: None,
            checksum: None,
            job_id: Some(job_id),
            service_id: Some("trainer".into()),
            dependencies: BTreeSet::new(),
            tags: vec!["prod".into()],
            metadata: Map::new(),
            created_at: Utc::now(),
        };

        assert!(ArtifactFilter::default().matches(&artifact));
        let filter = ArtifactFilter {
            job_id: Some(job_id),
            artifact_type: Some(ArtifactType::Model),
            tag: Some("prod".into()),
            ..Default::default()
        };
        assert!(filter.matches(&artifact));

        let wrong_tag = ArtifactFilter {
            tag: Some("dev".into()),
            ..filter.clone()
        };
        assert!(!wrong_tag.matches(&artifact));
        let wrong_type = ArtifactFilter {
            artifact_type: Some(ArtifactType::Plot),
            ..filter
        };
        assert!(!wrong_type.matches(&artifact));
    }
}
