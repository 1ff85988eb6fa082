use std::time::{Duration, Instant};

use crate::error::ProtocolError;
use crate::model::{
    BucketStatus, ComponentType, Deployment, DeploymentError, DeploymentStatus, Id, NewDeployment,
};
use crate::store::traits::Store;

/// Default bound on a single item's apply step. A timed-out apply counts as
/// that item's failure, preserving the partial-completion model.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies all items of an active bucket in order, tallying per-item success
/// and failure without aborting on partial failure. Exactly one caller wins
/// the `active -> deployed` transition; everyone else observes a lost race,
/// which clients treat as "bucket already resolved" and refresh.
#[derive(Debug, Clone)]
pub struct DeploymentExecutor {
    item_timeout: Duration,
}

impl Default for DeploymentExecutor {
    fn default() -> Self {
        Self {
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }
}

impl DeploymentExecutor {
    pub fn new(item_timeout: Duration) -> Self {
        Self { item_timeout }
    }

    pub async fn deploy<S: Store>(
        &self,
        store: &S,
        project_id: &Id,
        bucket_id: &Id,
    ) -> Result<Deployment, ProtocolError> {
        let bucket = store
            .get_bucket(project_id, bucket_id)
            .await?
            .ok_or_else(|| ProtocolError::not_found(format!("bucket '{}'", bucket_id)))?;
        if !bucket.is_active() {
            return Err(ProtocolError::RaceLost);
        }

        // Claim the bucket before touching production. Losing the swap means
        // another deploy or a discard got there first.
        let claimed = store
            .transition_bucket(
                project_id,
                bucket_id,
                BucketStatus::Active,
                BucketStatus::Deployed,
            )
            .await?;
        if !claimed {
            return Err(ProtocolError::RaceLost);
        }

        let started = Instant::now();
        let mut items_succeeded: i32 = 0;
        let mut errors: Vec<DeploymentError> = Vec::new();
        let mut deployed_datablocks: Vec<Id> = Vec::new();
        let mut deployed_pipelines: Vec<Id> = Vec::new();
        let mut deployed_features: Vec<Id> = Vec::new();

        for item in &bucket.items {
            let applied =
                tokio::time::timeout(self.item_timeout, store.apply_change(project_id, item))
                    .await;
            match applied {
                Ok(Ok(())) => {
                    items_succeeded += 1;
                    let target = match item.component.component_type {
                        ComponentType::Datablock => &mut deployed_datablocks,
                        ComponentType::Pipeline => &mut deployed_pipelines,
                        ComponentType::Feature => &mut deployed_features,
                    };
                    target.push(item.component.component_id.clone());
                }
                Ok(Err(err)) => {
                    log::warn!(
                        "apply failed for {} '{}': {}",
                        item.component.component_type,
                        item.component.component_name,
                        err
                    );
                    errors.push(DeploymentError {
                        component_name: item.component.component_name.clone(),
                        message: err.to_string(),
                    });
                }
                Err(_) => {
                    log::warn!(
                        "apply timed out for {} '{}'",
                        item.component.component_type,
                        item.component.component_name
                    );
                    errors.push(DeploymentError {
                        component_name: item.component.component_name.clone(),
                        message: format!(
                            "apply timed out after {}s",
                            self.item_timeout.as_secs()
                        ),
                    });
                }
            }
        }

        let items_total = bucket.item_count;
        let items_failed = items_total - items_succeeded;
        let status = if items_failed == 0 {
            DeploymentStatus::Success
        } else if items_succeeded == 0 {
            DeploymentStatus::Failed
        } else {
            DeploymentStatus::Partial
        };

        let deployment = store
            .insert_deployment(NewDeployment {
                project_id: project_id.clone(),
                status,
                items_total,
                items_succeeded,
                items_failed,
                errors,
                deployed_datablocks,
                deployed_pipelines,
                deployed_features,
                duration_ms: started.elapsed().as_millis() as i64,
            })
            .await?;

        log::info!(
            "deployment {} for project {}: {} ({}/{} items applied)",
            deployment.deployment_id,
            project_id,
            deployment.status.as_str(),
            items_succeeded,
            items_total
        );
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::staging::BucketOperations;
    use crate::model::{
        ChangeItem, ChangeType, ComponentPayload, ComponentRef, DatablockKind, DeploymentBucket,
        DeploymentFilter, FeatureDataType, NewChangeItem, PipelineTrigger, Project,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{
        BucketStore, ComponentWriter, DeploymentStore, ProjectStore, Store,
    };

    async fn seed_project(store: &MemoryStore) -> Id {
        let project = Project::new("cartnudge".to_string(), None);
        let id = project.id.clone();
        store.upsert_project(project).await.unwrap();
        id
    }

    fn create_datablock(id: &str, name: &str) -> NewChangeItem {
        NewChangeItem {
            change_type: ChangeType::Create,
            component: ComponentRef::new(
                crate::model::ComponentType::Datablock,
                id.to_string(),
                name.to_string(),
            ),
            payload: Some(ComponentPayload::Datablock {
                kind: DatablockKind::Direct,
                source: "events".to_string(),
                key_columns: vec!["user_id".to_string()],
                window_seconds: None,
                label_column: None,
            }),
            change_summary: format!("create datablock {}", name),
        }
    }

    fn update_feature(id: &str, name: &str) -> NewChangeItem {
        NewChangeItem {
            change_type: ChangeType::Update,
            component: ComponentRef::new(
                crate::model::ComponentType::Feature,
                id.to_string(),
                name.to_string(),
            ),
            payload: Some(ComponentPayload::Feature {
                datablock_id: "db-1".to_string(),
                expression: "sum(total)".to_string(),
                data_type: FeatureDataType::Number,
            }),
            change_summary: format!("update feature {}", name),
        }
    }

    fn create_pipeline(id: &str, name: &str) -> NewChangeItem {
        NewChangeItem {
            change_type: ChangeType::Create,
            component: ComponentRef::new(
                crate::model::ComponentType::Pipeline,
                id.to_string(),
                name.to_string(),
            ),
            payload: Some(ComponentPayload::Pipeline {
                trigger: PipelineTrigger::Manual,
                datablock_ids: vec!["db-1".to_string()],
                schedule: None,
            }),
            change_summary: format!("create pipeline {}", name),
        }
    }

    #[tokio::test]
    async fn full_success_produces_success_record() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
            .await
            .unwrap();
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_pipeline("pipe-1", "etl"))
                .await
                .unwrap();

        let deployment = DeploymentExecutor::default()
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();

        assert_eq!(deployment.status, DeploymentStatus::Success);
        assert_eq!(deployment.deployment_id, 1);
        assert_eq!(deployment.items_total, 2);
        assert_eq!(deployment.items_succeeded, 2);
        assert_eq!(deployment.items_failed, 0);
        assert_eq!(deployment.deployed_datablocks, vec!["db-1".to_string()]);
        assert_eq!(deployment.deployed_pipelines, vec!["pipe-1".to_string()]);
        assert!(deployment.errors.is_empty());

        let stored = store
            .get_bucket(&project_id, &bucket.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BucketStatus::Deployed);
        assert!(store.get_active_bucket(&project_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn partial_failure_is_tallied_per_item() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        // Item 2 updates a feature that was never created and fails server-side
        BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
            .await
            .unwrap();
        BucketOperations::stage_change(&store, &project_id, update_feature("feat-1", "cart_total"))
            .await
            .unwrap();
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_pipeline("pipe-1", "etl"))
                .await
                .unwrap();

        let deployment = DeploymentExecutor::default()
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();

        assert_eq!(deployment.status, DeploymentStatus::Partial);
        assert_eq!(deployment.items_total, 3);
        assert_eq!(deployment.items_succeeded, 2);
        assert_eq!(deployment.items_failed, 1);
        assert_eq!(deployment.errors.len(), 1);
        assert_eq!(deployment.errors[0].component_name, "cart_total");
        // Failed applies are not recorded as touching production
        assert!(deployment.deployed_features.is_empty());

        let stored = store
            .get_bucket(&project_id, &bucket.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, BucketStatus::Deployed);
    }

    #[tokio::test]
    async fn zero_successes_produce_failed_record() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        let bucket = BucketOperations::stage_change(
            &store,
            &project_id,
            update_feature("feat-1", "cart_total"),
        )
        .await
        .unwrap();

        let deployment = DeploymentExecutor::default()
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(deployment.items_succeeded, 0);
        assert_eq!(deployment.items_failed, 1);
    }

    #[tokio::test]
    async fn second_deploy_of_same_bucket_loses_the_race() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
                .await
                .unwrap();

        let executor = DeploymentExecutor::default();
        executor.deploy(&store, &project_id, &bucket.id).await.unwrap();
        let err = executor
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RaceLost));
    }

    #[tokio::test]
    async fn deployment_ids_increase_monotonically() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        let executor = DeploymentExecutor::default();

        for n in 1..=3 {
            let bucket = BucketOperations::stage_change(
                &store,
                &project_id,
                create_datablock(&format!("db-{}", n), &format!("block_{}", n)),
            )
            .await
            .unwrap();
            let deployment = executor
                .deploy(&store, &project_id, &bucket.id)
                .await
                .unwrap();
            assert_eq!(deployment.deployment_id, n);
        }
        assert_eq!(store.current_deployment_id(&project_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn next_bucket_bases_on_the_new_deployment() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
                .await
                .unwrap();
        DeploymentExecutor::default()
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();

        let next =
            BucketOperations::stage_change(&store, &project_id, create_datablock("db-2", "users"))
                .await
                .unwrap();
        assert_ne!(next.id, bucket.id);
        assert_eq!(next.base_deployment_id, 1);
    }

    /// Memory store whose applies stall, for exercising the per-item bound
    struct SlowApplyStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl ProjectStore for SlowApplyStore {
        async fn get_project(&self, id: &Id) -> anyhow::Result<Option<Project>> {
            self.inner.get_project(id).await
        }
        async fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
            self.inner.list_projects().await
        }
        async fn upsert_project(&self, project: Project) -> anyhow::Result<()> {
            self.inner.upsert_project(project).await
        }
        async fn delete_project(&self, id: &Id) -> anyhow::Result<bool> {
            self.inner.delete_project(id).await
        }
    }

    #[async_trait::async_trait]
    impl BucketStore for SlowApplyStore {
        async fn get_bucket(
            &self,
            project_id: &Id,
            bucket_id: &Id,
        ) -> anyhow::Result<Option<DeploymentBucket>> {
            self.inner.get_bucket(project_id, bucket_id).await
        }
        async fn get_active_bucket(
            &self,
            project_id: &Id,
        ) -> anyhow::Result<Option<DeploymentBucket>> {
            self.inner.get_active_bucket(project_id).await
        }
        async fn insert_bucket(&self, bucket: DeploymentBucket) -> anyhow::Result<()> {
            self.inner.insert_bucket(bucket).await
        }
        async fn append_item(
            &self,
            project_id: &Id,
            bucket_id: &Id,
            item: ChangeItem,
        ) -> anyhow::Result<Option<DeploymentBucket>> {
            self.inner.append_item(project_id, bucket_id, item).await
        }
        async fn remove_item(
            &self,
            project_id: &Id,
            bucket_id: &Id,
            item_id: &Id,
        ) -> anyhow::Result<Option<DeploymentBucket>> {
            self.inner.remove_item(project_id, bucket_id, item_id).await
        }
        async fn transition_bucket(
            &self,
            project_id: &Id,
            bucket_id: &Id,
            from: BucketStatus,
            to: BucketStatus,
        ) -> anyhow::Result<bool> {
            self.inner
                .transition_bucket(project_id, bucket_id, from, to)
                .await
        }
    }

    #[async_trait::async_trait]
    impl DeploymentStore for SlowApplyStore {
        async fn current_deployment_id(&self, project_id: &Id) -> anyhow::Result<i64> {
            self.inner.current_deployment_id(project_id).await
        }
        async fn insert_deployment(
            &self,
            deployment: NewDeployment,
        ) -> anyhow::Result<Deployment> {
            self.inner.insert_deployment(deployment).await
        }
        async fn get_deployment(
            &self,
            project_id: &Id,
            deployment_id: i64,
        ) -> anyhow::Result<Option<Deployment>> {
            self.inner.get_deployment(project_id, deployment_id).await
        }
        async fn list_deployments(
            &self,
            project_id: &Id,
            filter: DeploymentFilter,
        ) -> anyhow::Result<Vec<Deployment>> {
            self.inner.list_deployments(project_id, filter).await
        }
        async fn list_deployments_between(
            &self,
            project_id: &Id,
            after: i64,
            up_to: i64,
        ) -> anyhow::Result<Vec<Deployment>> {
            self.inner
                .list_deployments_between(project_id, after, up_to)
                .await
        }
    }

    #[async_trait::async_trait]
    impl ComponentWriter for SlowApplyStore {
        async fn apply_change(&self, project_id: &Id, item: &ChangeItem) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.apply_change(project_id, item).await
        }
    }

    impl Store for SlowApplyStore {}

    #[tokio::test]
    async fn timed_out_apply_is_tallied_as_failure() {
        let store = SlowApplyStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(200),
        };
        let project = Project::new("cartnudge".to_string(), None);
        let project_id = project.id.clone();
        store.upsert_project(project).await.unwrap();
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
                .await
                .unwrap();

        let deployment = DeploymentExecutor::new(Duration::from_millis(10))
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();

        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert_eq!(deployment.items_succeeded, 0);
        assert_eq!(deployment.items_failed, 1);
        assert!(deployment.errors[0].message.contains("timed out"));
        // A timed-out apply never touched production
        assert!(deployment.deployed_datablocks.is_empty());
    }

    #[tokio::test]
    async fn tallies_always_sum_to_total() {
        let store = MemoryStore::new();
        let project_id = seed_project(&store).await;
        BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
            .await
            .unwrap();
        // Duplicate create of db-1 fails on apply
        let bucket =
            BucketOperations::stage_change(&store, &project_id, create_datablock("db-1", "orders"))
                .await
                .unwrap();

        let deployment = DeploymentExecutor::default()
            .deploy(&store, &project_id, &bucket.id)
            .await
            .unwrap();
        assert_eq!(
            deployment.items_succeeded + deployment.items_failed,
            deployment.items_total
        );
        assert_eq!(deployment.status, DeploymentStatus::Partial);
    }
}
