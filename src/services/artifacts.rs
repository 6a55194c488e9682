//! Artifact reference manager.
//!
//! Large outputs live in object storage, on disk, or behind external URLs;
//! only a validated pointer plus metadata is recorded here. The referenced
//! bytes never pass through the store.

use tracing::{debug, info};
use url::Url;

use crate::db::{self, DbPool};
use crate::error::{Error, Result};
use crate::models::{
    new_id, now, ArtifactPointer, ArtifactReference, ARTIFACT_INLINE_THRESHOLD_BYTES,
};

/// Input for registering an artifact reference.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub project_id: String,
    pub artifact_type: String,
    pub name: String,
    pub pointer: ArtifactPointer,
    pub size_bytes: i64,
}

/// Service managing artifact references.
#[derive(Clone)]
pub struct ArtifactService {
    pool: DbPool,
}

impl ArtifactService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// True when content of this size should be registered as an artifact
    /// pointer instead of written inline into a record body.
    pub fn requires_pointer(size_bytes: i64) -> bool {
        size_bytes > ARTIFACT_INLINE_THRESHOLD_BYTES
    }

    /// Register an artifact reference. Validates the pointer and metadata
    /// before persisting.
    pub async fn register(&self, input: NewArtifact) -> Result<ArtifactReference> {
        if input.name.trim().is_empty() {
            return Err(Error::Validation("Artifact name is required".to_string()));
        }
        if input.artifact_type.trim().is_empty() {
            return Err(Error::Validation("Artifact type is required".to_string()));
        }
        if input.size_bytes < 0 {
            return Err(Error::Validation(format!(
                "Artifact size must be non-negative, got {}",
                input.size_bytes
            )));
        }
        validate_pointer(&input.pointer)?;

        let artifact = ArtifactReference {
            id: new_id(),
            project_id: input.project_id,
            artifact_type: input.artifact_type,
            name: input.name,
            pointer_kind: input.pointer.kind().to_string(),
            pointer: input.pointer.value().to_string(),
            size_bytes: input.size_bytes,
            created_at: now(),
        };

        db::save_artifact(&self.pool, &artifact).await?;

        info!(
            artifact_id = %artifact.id,
            project_id = %artifact.project_id,
            kind = %artifact.pointer_kind,
            size_bytes = artifact.size_bytes,
            "Registered artifact reference"
        );

        Ok(artifact)
    }

    /// Get an artifact reference by id.
    pub async fn get(&self, id: &str) -> Result<ArtifactReference> {
        db::get_artifact(&self.pool, id).await
    }

    /// List a project's artifact references, newest first.
    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<ArtifactReference>> {
        db::query_artifacts(&self.pool, project_id).await
    }

    /// Resolve an artifact reference to a fetchable URL.
    pub async fn resolve_url(&self, id: &str) -> Result<String> {
        let artifact = db::get_artifact(&self.pool, id).await?;
        let url = pointer_url(&artifact.artifact_pointer()?);

        debug!(artifact_id = %id, url = %url, "Resolved artifact URL");

        Ok(url)
    }
}

fn validate_pointer(pointer: &ArtifactPointer) -> Result<()> {
    let value = pointer.value();
    if value.trim().is_empty() {
        return Err(Error::Validation(
            "Artifact pointer value is required".to_string(),
        ));
    }

    match pointer {
        ArtifactPointer::ExternalUrl(url) => {
            let parsed = Url::parse(url)
                .map_err(|e| Error::Validation(format!("Invalid artifact URL: {}", e)))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(Error::Validation(format!(
                    "Artifact URL must be http or https, got {}",
                    parsed.scheme()
                )));
            }
        }
        ArtifactPointer::LocalPath(path) => {
            if !path.starts_with('/') {
                return Err(Error::Validation(
                    "Artifact local path must be absolute".to_string(),
                ));
            }
        }
        ArtifactPointer::ObjectStore(_) => {}
    }

    Ok(())
}

fn pointer_url(pointer: &ArtifactPointer) -> String {
    match pointer {
        ArtifactPointer::ObjectStore(path) => format!("s3://{}", path),
        ArtifactPointer::LocalPath(path) => format!("file://{}", path),
        ArtifactPointer::ExternalUrl(url) => url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, initialize_schema};

    async fn setup_service() -> ArtifactService {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        ArtifactService::new(pool)
    }

    fn report(pointer: ArtifactPointer, size_bytes: i64) -> NewArtifact {
        NewArtifact {
            project_id: "proj-1".to_string(),
            artifact_type: "report".to_string(),
            name: "q1-report.pdf".to_string(),
            pointer,
            size_bytes,
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve_object_store() {
        let service = setup_service().await;

        let artifact = service
            .register(report(
                ArtifactPointer::ObjectStore("bucket/reports/q1.pdf".into()),
                52_000,
            ))
            .await
            .unwrap();

        let url = service.resolve_url(&artifact.id).await.unwrap();
        assert_eq!(url, "s3://bucket/reports/q1.pdf");
    }

    #[rstest::rstest]
    #[case("not a url", false)]
    #[case("ftp://example.com/x", false)]
    #[case("file:///etc/passwd", false)]
    #[case("https://example.com/report.pdf", true)]
    #[case("http://internal.host/report.pdf", true)]
    #[tokio::test]
    async fn test_external_url_validated(#[case] url: &str, #[case] accepted: bool) {
        let service = setup_service().await;

        let result = service
            .register(report(ArtifactPointer::ExternalUrl(url.into()), 5))
            .await;

        if accepted {
            let artifact = result.unwrap();
            assert_eq!(service.resolve_url(&artifact.id).await.unwrap(), url);
        } else {
            assert!(matches!(result, Err(Error::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_relative_local_path_rejected() {
        let service = setup_service().await;
        let result = service
            .register(report(ArtifactPointer::LocalPath("tmp/out.log".into()), 10))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let service = setup_service().await;
        let mut input = report(ArtifactPointer::ObjectStore("bucket/x".into()), 10);
        input.name = "  ".to_string();
        assert!(matches!(
            service.register(input).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_for_project() {
        let service = setup_service().await;
        service
            .register(report(
                ArtifactPointer::ObjectStore("bucket/reports/q1.pdf".into()),
                52_000,
            ))
            .await
            .unwrap();

        let listed = service.list_for_project("proj-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(service.list_for_project("proj-2").await.unwrap().is_empty());
    }

    #[test]
    fn test_inline_threshold() {
        assert!(!ArtifactService::requires_pointer(10_000));
        assert!(ArtifactService::requires_pointer(10_001));
    }
}
