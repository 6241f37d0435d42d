//! Artifact registry with provenance and dependency traversal.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{Artifact, ArtifactFilter, ArtifactRegistration, DependencyReport};
use crate::error::ArtifactError;

#[derive(Default)]
struct Index {
    records: HashMap<Uuid, Arc<Artifact>>,
    /// Registration order.
    order: Vec<Uuid>,
    by_job: HashMap<Uuid, Vec<Uuid>>,
}

/// Central registry of artifacts produced by jobs.
///
/// Records are immutable once registered and handed out as `Arc` snapshots,
/// so the index lock is only held for map lookups and inserts.
#[derive(Default)]
pub struct ArtifactRegistry {
    index: RwLock<Index>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact and return its id.
    ///
    /// Dependency ids are not checked for existence; artifacts may arrive
    /// before the artifacts they were derived from.
    pub async fn register(&self, registration: ArtifactRegistration) -> Result<Uuid, ArtifactError> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(ArtifactError::Validation("name is required".into()));
        }
        let artifact_type = registration
            .artifact_type
            .ok_or_else(|| ArtifactError::Validation("type is required".into()))?;
        if registration.storage_location.trim().is_empty() {
            return Err(ArtifactError::Validation("storage_location is required".into()));
        }

        let artifact = Artifact {
            id: registration.id.unwrap_or_else(Uuid::new_v4),
            name: name.to_string(),
            artifact_type,
            description: registration.description,
            storage_location: registration.storage_location,
            size_bytes: registration.size_bytes,
            checksum: registration.checksum,
            job_id: registration.job_id,
            service_id: registration.service_id,
            dependencies: registration.dependencies.into_iter().collect::<BTreeSet<_>>(),
            tags: registration.tags,
            metadata: registration.metadata,
            created_at: Utc::now(),
        };
        let id = artifact.id;

        let mut index = self.index.write().await;
        if index.records.contains_key(&id) {
            return Err(ArtifactError::Validation(format!("artifact {id} already exists")));
        }
        if let Some(job_id) = artifact.job_id {
            index.by_job.entry(job_id).or_default().push(id);
        }
        tracing::info!(
            artifact_id = %id,
            name = %artifact.name,
            artifact_type = %artifact.artifact_type,
            job_id = ?artifact.job_id,
            "Registered artifact"
        );
        index.records.insert(id, Arc::new(artifact));
        index.order.push(id);

        Ok(id)
    }

    /// Get an artifact by id.
    pub async fn get(&self, id: Uuid) -> Result<Arc<Artifact>, ArtifactError> {
        self.index
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(ArtifactError::NotFound { id })
    }

    /// List artifacts in registration order.
    pub async fn list(&self, filter: &ArtifactFilter) -> Vec<Arc<Artifact>> {
        let index = self.index.read().await;
        // A job filter can start from the job index instead of a full scan.
        let candidates: Box<dyn Iterator<Item = &Uuid>> = match filter.job_id {
            Some(job_id) => Box::new(index.by_job.get(&job_id).into_iter().flatten()),
            None => Box::new(index.order.iter()),
        };

        candidates
            .filter_map(|id| index.records.get(id))
            .filter(|artifact| filter.matches(artifact))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Delete an artifact. Jobs and other artifacts that reference it are
    /// left untouched; references to it become missing dependencies.
    pub async fn delete(&self, id: Uuid) -> Result<Arc<Artifact>, ArtifactError> {
        let mut index = self.index.write().await;
        let artifact = index
            .records
            .remove(&id)
            .ok_or(ArtifactError::NotFound { id })?;
        index.order.retain(|existing| *existing != id);
        if let Some(job_id) = artifact.job_id
            && let Some(ids) = index.by_job.get_mut(&job_id)
        {
            ids.retain(|existing| *existing != id);
        }
        tracing::info!(artifact_id = %id, "Deleted artifact");
        Ok(artifact)
    }

    /// Dependencies of an artifact, direct or transitive.
    ///
    /// The transitive walk is breadth-first over a visited set, so it
    /// terminates on cyclic graphs and reports each id once. The queried
    /// artifact itself is reported only when a cycle leads back to it.
    pub async fn get_dependencies(
        &self,
        id: Uuid,
        transitive: bool,
    ) -> Result<DependencyReport, ArtifactError> {
        let index = self.index.read().await;
        let root = index.records.get(&id).ok_or(ArtifactError::NotFound { id })?;

        let mut report = DependencyReport {
            artifact_id: id,
            transitive,
            ..Default::default()
        };

        if !transitive {
            for dep in &root.dependencies {
                if index.records.contains_key(dep) {
                    report.resolved.push(*dep);
                } else {
                    report.missing.push(*dep);
                }
            }
            return Ok(report);
        }

        let mut visited = HashSet::new();
        let mut queue: VecDeque<Uuid> = root.dependencies.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            match index.records.get(&current) {
                Some(artifact) => {
                    report.resolved.push(current);
                    queue.extend(
                        artifact
                            .dependencies
                            .iter()
                            .filter(|dep| !visited.contains(*dep)),
                    );
                }
                None => report.missing.push(current),
            }
        }

        if !report.missing.is_empty() {
            tracing::debug!(
                artifact_id = %id,
                missing = report.missing.len(),
                "Dependency walk found unregistered artifacts"
            );
        }
        Ok(report)
    }

    /// Artifacts that list `id` as a direct dependency.
    pub async fn get_dependents(&self, id: Uuid) -> Result<Vec<Arc<Artifact>>, ArtifactError> {
        let index = self.index.read().await;
        if !index.records.contains_key(&id) {
            return Err(ArtifactError::NotFound { id });
        }
        Ok(index
            .order
            .iter()
            .filter_map(|other| index.records.get(other))
            .filter(|artifact| artifact.dependencies.contains(&id))
            .cloned()
            .collect())
    }

    /// Number of registered artifacts.
    pub async fn count(&self) -> usize {
        self.index.read().await.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::model::ArtifactType;

    fn reg(name: &str) -> ArtifactRegistration {
        ArtifactRegistration::new(name, ArtifactType::Data, format!("s3://bucket/{name}"))
    }

    #[tokio::test]
    async fn register_and_get() {
        let registry = ArtifactRegistry::new();
        let job_id = Uuid::new_v4();
        let id = registry
            .register(reg("features.parquet").with_job(job_id).with_service("etl"))
            .await
            .unwrap();

        let artifact = registry.get(id).await.unwrap();
        assert_eq!(artifact.name, "features.parquet");
        assert_eq!(artifact.job_id, Some(job_id));
        assert_eq!(artifact.service_id.as_deref(), Some("etl"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn register_requires_name_type_and_location() {
        let registry = ArtifactRegistry::new();

        let mut missing_name = reg("x");
        missing_name.name = "  ".into();
        assert!(matches!(
            registry.register(missing_name).await,
            Err(ArtifactError::Validation(msg)) if msg.contains("name")
        ));

        let mut missing_type = reg("x");
        missing_type.artifact_type = None;
        assert!(matches!(
            registry.register(missing_type).await,
            Err(ArtifactError::Validation(msg)) if msg.contains("type")
        ));

        let mut missing_location = reg("x");
        missing_location.storage_location.clear();
        assert!(matches!(
            registry.register(missing_location).await,
            Err(ArtifactError::Validation(msg)) if msg.contains("storage_location")
        ));

        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn register_accepts_unknown_dependencies() {
        let registry = ArtifactRegistry::new();
        let ghost = Uuid::new_v4();
        let id = registry.register(reg("late").with_dependency(ghost)).await.unwrap();

        let report = registry.get_dependencies(id, false).await.unwrap();
        assert!(report.resolved.is_empty());
        assert_eq!(report.missing, vec![ghost]);
    }

    #[tokio::test]
    async fn direct_dependencies_only() {
        let registry = ArtifactRegistry::new();
        let raw = registry.register(reg("raw")).await.unwrap();
        let clean = registry.register(reg("clean").with_dependency(raw)).await.unwrap();
        let model = registry.register(reg("model").with_dependency(clean)).await.unwrap();

        let report = registry.get_dependencies(model, false).await.unwrap();
        assert_eq!(report.resolved, vec![clean]);
        assert!(!report.transitive);

        let report = registry.get_dependencies(model, true).await.unwrap();
        assert_eq!(report.resolved, vec![clean, raw]);
        assert!(report.missing.is_empty());
    }

    #[tokio::test]
    async fn transitive_walk_terminates_on_cycle() {
        let registry = ArtifactRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(reg("a").with_id(a).with_dependency(b)).await.unwrap();
        registry.register(reg("b").with_id(b).with_dependency(a)).await.unwrap();

        let report = registry.get_dependencies(a, true).await.unwrap();
        assert_eq!(report.resolved, vec![b, a]);
        assert!(report.missing.is_empty());

        let report = registry.get_dependencies(b, true).await.unwrap();
        let resolved: HashSet<_> = report.resolved.iter().copied().collect();
        assert_eq!(resolved, HashSet::from([a, b]));
        assert_eq!(report.resolved.len(), 2);
    }

    #[tokio::test]
    async fn self_dependency_is_reported_once() {
        let registry = ArtifactRegistry::new();
        let id = Uuid::new_v4();
        registry.register(reg("loop").with_id(id).with_dependency(id)).await.unwrap();

        let report = registry.get_dependencies(id, true).await.unwrap();
        assert_eq!(report.resolved, vec![id]);
    }

    #[tokio::test]
    async fn duplicate_producer_id_is_rejected() {
        let registry = ArtifactRegistry::new();
        let id = Uuid::new_v4();
        registry.register(reg("first").with_id(id)).await.unwrap();
        assert!(matches!(
            registry.register(reg("second").with_id(id)).await,
            Err(ArtifactError::Validation(_))
        ));
        assert_eq!(registry.get(id).await.unwrap().name, "first");
    }

    #[tokio::test]
    async fn diamond_is_not_double_counted() {
        let registry = ArtifactRegistry::new();
        let base = registry.register(reg("base")).await.unwrap();
        let left = registry.register(reg("left").with_dependency(base)).await.unwrap();
        let right = registry.register(reg("right").with_dependency(base)).await.unwrap();
        let top = registry
            .register(reg("top").with_dependency(left).with_dependency(right))
            .await
            .unwrap();

        let report = registry.get_dependencies(top, true).await.unwrap();
        assert_eq!(report.resolved.len(), 3);
        assert_eq!(report.resolved.iter().filter(|id| **id == base).count(), 1);
    }

    #[tokio::test]
    async fn dependencies_of_unknown_artifact() {
        let registry = ArtifactRegistry::new();
        assert!(matches!(
            registry.get_dependencies(Uuid::new_v4(), true).await,
            Err(ArtifactError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_filters_by_job_type_and_tag() {
        let registry = ArtifactRegistry::new();
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        registry.register(reg("a1").with_job(job_a).with_tag("gold")).await.unwrap();
        registry
            .register(
                ArtifactRegistration::new("a2", ArtifactType::Plot, "file:///a2.png").with_job(job_a),
            )
            .await
            .unwrap();
        registry.register(reg("b1").with_job(job_b).with_tag("gold")).await.unwrap();

        let by_job = registry
            .list(&ArtifactFilter {
                job_id: Some(job_a),
                ..Default::default()
            })
            .await;
        assert_eq!(
            by_job.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            vec!["a1", "a2"]
        );

        let gold = registry
            .list(&ArtifactFilter {
                tag: Some("gold".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(gold.len(), 2);

        let plots_for_b = registry
            .list(&ArtifactFilter {
                job_id: Some(job_b),
                artifact_type: Some(ArtifactType::Plot),
                ..Default::default()
            })
            .await;
        assert!(plots_for_b.is_empty());

        let limited = registry
            .list(&ArtifactFilter {
                limit: Some(1),
                ..Default::default()
            })
            .await;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].name, "a1");
    }

    #[tokio::test]
    async fn delete_leaves_dangling_reference_as_missing() {
        let registry = ArtifactRegistry::new();
        let job_id = Uuid::new_v4();
        let raw = registry.register(reg("raw").with_job(job_id)).await.unwrap();
        let derived = registry.register(reg("derived").with_dependency(raw)).await.unwrap();

        registry.delete(raw).await.unwrap();
        assert!(registry.get(raw).await.is_err());
        assert!(
            registry
                .list(&ArtifactFilter {
                    job_id: Some(job_id),
                    ..Default::default()
                })
                .await
                .is_empty()
        );

        let report = registry.get_dependencies(derived, true).await.unwrap();
        assert_eq!(report.missing, vec![raw]);
    }

    #[tokio::test]
    async fn dependents_are_reverse_edges() {
        let registry = ArtifactRegistry::new();
        let raw = registry.register(reg("raw")).await.unwrap();
        let one = registry.register(reg("one").with_dependency(raw)).await.unwrap();
        let two = registry.register(reg("two").with_dependency(raw)).await.unwrap();
        registry.register(reg("unrelated")).await.unwrap();

        let dependents = registry.get_dependents(raw).await.unwrap();
        let ids: Vec<_> = dependents.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![one, two]);
    }
}
