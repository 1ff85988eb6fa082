use crate::model::{
    BucketStatus, ChangeItem, Deployment, DeploymentBucket, DeploymentFilter, Id, NewDeployment,
    Project,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn upsert_project(&self, project: Project) -> Result<()>;
    async fn delete_project(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait BucketStore: Send + Sync {
    /// Get a bucket by id, any status
    async fn get_bucket(&self, project_id: &Id, bucket_id: &Id)
        -> Result<Option<DeploymentBucket>>;
    /// Get the single active bucket for a project, if one exists
    async fn get_active_bucket(&self, project_id: &Id) -> Result<Option<DeploymentBucket>>;
    /// Insert a freshly created bucket. Fails when the project already has an
    /// active bucket (uniqueness is enforced here, not by callers).
    async fn insert_bucket(&self, bucket: DeploymentBucket) -> Result<()>;
    /// Atomically append a staged item, returning the updated bucket. `None`
    /// when the bucket has left `active` (or does not exist); a resolved
    /// bucket never takes late writes and its status is never overwritten.
    async fn append_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item: ChangeItem,
    ) -> Result<Option<DeploymentBucket>>;
    /// Atomically remove a staged item by id, returning the updated bucket.
    /// `None` when the bucket has left `active`; removing an id that is no
    /// longer present is a no-op.
    async fn remove_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item_id: &Id,
    ) -> Result<Option<DeploymentBucket>>;
    /// Compare-and-swap status transition. Returns false when the bucket was
    /// no longer in `from`, which is how deploy/discard races are detected.
    async fn transition_bucket(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        from: BucketStatus,
        to: BucketStatus,
    ) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Current production deployment id for a project, 0 when none exists
    async fn current_deployment_id(&self, project_id: &Id) -> Result<i64>;
    /// Append a record to the project's history, allocating the next id
    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment>;
    async fn get_deployment(&self, project_id: &Id, deployment_id: i64)
        -> Result<Option<Deployment>>;
    /// History newest first, optionally filtered by status, capped by limit
    async fn list_deployments(
        &self,
        project_id: &Id,
        filter: DeploymentFilter,
    ) -> Result<Vec<Deployment>>;
    /// Records with `after < deployment_id <= up_to`, ascending. Used by the
    /// conflict checker to inspect what landed since a bucket's base.
    async fn list_deployments_between(
        &self,
        project_id: &Id,
        after: i64,
        up_to: i64,
    ) -> Result<Vec<Deployment>>;
}

/// Applies staged changes against production component state.
///
/// Create fails when the component already exists, update and delete fail
/// when it does not; the executor records either as that item's failure.
#[async_trait::async_trait]
pub trait ComponentWriter: Send + Sync {
    async fn apply_change(&self, project_id: &Id, item: &ChangeItem) -> Result<()>;
}

pub trait Store:
    ProjectStore + BucketStore + DeploymentStore + ComponentWriter + Send + Sync
{
}
