use crate::error::ProtocolError;
use crate::model::{Deployment, DeploymentFilter, Id};
use crate::store::traits::Store;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 200;

/// Read-only queries over the append-only deployment log.
pub struct DeploymentHistory;

impl DeploymentHistory {
    /// List past deployments for a project, newest first. `status` is an
    /// exact match, `limit` caps the result count; there is no cursor.
    pub async fn list<S: Store>(
        store: &S,
        project_id: &Id,
        filter: DeploymentFilter,
    ) -> Result<Vec<Deployment>, ProtocolError> {
        if store.get_project(project_id).await?.is_none() {
            return Err(ProtocolError::not_found(format!("project '{}'", project_id)));
        }
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT);
        let deployments = store
            .list_deployments(
                project_id,
                DeploymentFilter {
                    status: filter.status,
                    limit: Some(limit),
                },
            )
            .await?;
        Ok(deployments)
    }

    pub async fn get<S: Store>(
        store: &S,
        project_id: &Id,
        deployment_id: i64,
    ) -> Result<Deployment, ProtocolError> {
        store
            .get_deployment(project_id, deployment_id)
            .await?
            .ok_or_else(|| {
                ProtocolError::not_found(format!("deployment '{}'", deployment_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeploymentStatus, NewDeployment, Project};
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{DeploymentStore, ProjectStore};

    async fn seed_history(store: &MemoryStore, statuses: &[DeploymentStatus]) -> Id {
        let project = Project::new("cartnudge".to_string(), None);
        let project_id = project.id.clone();
        store.upsert_project(project).await.unwrap();
        for status in statuses {
            store
                .insert_deployment(NewDeployment {
                    project_id: project_id.clone(),
                    status: *status,
                    items_total: 1,
                    items_succeeded: i32::from(*status == DeploymentStatus::Success),
                    items_failed: i32::from(*status != DeploymentStatus::Success),
                    errors: Vec::new(),
                    deployed_datablocks: Vec::new(),
                    deployed_pipelines: Vec::new(),
                    deployed_features: Vec::new(),
                    duration_ms: 2,
                })
                .await
                .unwrap();
        }
        project_id
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = MemoryStore::new();
        let project_id = seed_history(
            &store,
            &[
                DeploymentStatus::Success,
                DeploymentStatus::Failed,
                DeploymentStatus::Success,
            ],
        )
        .await;

        let records = DeploymentHistory::list(&store, &project_id, DeploymentFilter::default())
            .await
            .unwrap();
        let ids: Vec<i64> = records.iter().map(|d| d.deployment_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn status_filter_is_exact_match() {
        let store = MemoryStore::new();
        let project_id = seed_history(
            &store,
            &[
                DeploymentStatus::Success,
                DeploymentStatus::Partial,
                DeploymentStatus::Success,
            ],
        )
        .await;

        let records = DeploymentHistory::list(
            &store,
            &project_id,
            DeploymentFilter {
                status: Some(DeploymentStatus::Partial),
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].deployment_id, 2);
    }

    #[tokio::test]
    async fn limit_caps_the_result_count() {
        let store = MemoryStore::new();
        let project_id = seed_history(&store, &[DeploymentStatus::Success; 5]).await;

        let records = DeploymentHistory::list(
            &store,
            &project_id,
            DeploymentFilter {
                status: None,
                limit: Some(2),
            },
        )
        .await
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].deployment_id, 5);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let store = MemoryStore::new();
        let err = DeploymentHistory::list(
            &store,
            &"nope".to_string(),
            DeploymentFilter::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProtocolError::NotFound(_)));
    }
}
