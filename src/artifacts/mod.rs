//! Artifact records and their dependency graph.

pub mod model;
pub mod registry;

pub use model::{Artifact, ArtifactFilter, ArtifactRegistration, ArtifactType, DependencyReport};
pub use registry::ArtifactRegistry;
