use std::collections::HashMap;

use anyhow::{bail, Result};
use itertools::Itertools;
use parking_lot::RwLock;

use crate::model::{
    BucketStatus, ChangeItem, ChangeType, ComponentType, Deployment, DeploymentBucket,
    DeploymentFilter, Id, NewDeployment, Project,
};
use crate::store::traits::{BucketStore, ComponentWriter, DeploymentStore, ProjectStore, Store};

/// Production registry entry for one configuration component. The memory
/// store tracks existence and display metadata; full payloads only matter
/// to the durable store.
#[derive(Debug, Clone)]
struct ComponentRecord {
    component_name: String,
    updated_at: String,
}

#[derive(Default)]
struct MemoryInner {
    projects: HashMap<Id, Project>,
    buckets: HashMap<Id, DeploymentBucket>,
    /// Per-project history, ascending by deployment_id
    deployments: HashMap<Id, Vec<Deployment>>,
    /// Production components keyed by (project, type, id)
    components: HashMap<Id, HashMap<(ComponentType, Id), ComponentRecord>>,
}

/// In-memory store used by tests and for local development without Postgres.
/// All methods take the lock briefly and never hold it across an await.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        Ok(self.inner.read().projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let inner = self.inner.read();
        Ok(inner
            .projects
            .values()
            .cloned()
            .sorted_by(|a, b| a.created_at.cmp(&b.created_at))
            .collect())
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        self.inner
            .write()
            .projects
            .insert(project.id.clone(), project);
        Ok(())
    }

    async fn delete_project(&self, id: &Id) -> Result<bool> {
        let mut inner = self.inner.write();
        let existed = inner.projects.remove(id).is_some();
        if existed {
            inner.buckets.retain(|_, b| &b.project_id != id);
            inner.deployments.remove(id);
            inner.components.remove(id);
        }
        Ok(existed)
    }
}

#[async_trait::async_trait]
impl BucketStore for MemoryStore {
    async fn get_bucket(
        &self,
        project_id: &Id,
        bucket_id: &Id,
    ) -> Result<Option<DeploymentBucket>> {
        let inner = self.inner.read();
        Ok(inner
            .buckets
            .get(bucket_id)
            .filter(|b| &b.project_id == project_id)
            .cloned())
    }

    async fn get_active_bucket(&self, project_id: &Id) -> Result<Option<DeploymentBucket>> {
        let inner = self.inner.read();
        Ok(inner
            .buckets
            .values()
            .find(|b| &b.project_id == project_id && b.status == BucketStatus::Active)
            .cloned())
    }

    async fn insert_bucket(&self, bucket: DeploymentBucket) -> Result<()> {
        let mut inner = self.inner.write();
        let has_active = inner
            .buckets
            .values()
            .any(|b| b.project_id == bucket.project_id && b.status == BucketStatus::Active);
        if has_active {
            bail!(
                "project '{}' already has an active bucket",
                bucket.project_id
            );
        }
        inner.buckets.insert(bucket.id.clone(), bucket);
        Ok(())
    }

    async fn append_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item: ChangeItem,
    ) -> Result<Option<DeploymentBucket>> {
        let mut inner = self.inner.write();
        match inner.buckets.get_mut(bucket_id) {
            Some(bucket)
                if &bucket.project_id == project_id && bucket.status == BucketStatus::Active =>
            {
                bucket.items.push(item);
                bucket.item_count = bucket.items.len() as i32;
                bucket.touch();
                Ok(Some(bucket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn remove_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item_id: &Id,
    ) -> Result<Option<DeploymentBucket>> {
        let mut inner = self.inner.write();
        match inner.buckets.get_mut(bucket_id) {
            Some(bucket)
                if &bucket.project_id == project_id && bucket.status == BucketStatus::Active =>
            {
                if let Some(position) = bucket.items.iter().position(|i| &i.id == item_id) {
                    bucket.items.remove(position);
                    bucket.item_count = bucket.items.len() as i32;
                    bucket.touch();
                }
                Ok(Some(bucket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition_bucket(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        from: BucketStatus,
        to: BucketStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.buckets.get_mut(bucket_id) {
            Some(bucket) if &bucket.project_id == project_id && bucket.status == from => {
                bucket.status = to;
                bucket.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl DeploymentStore for MemoryStore {
    async fn current_deployment_id(&self, project_id: &Id) -> Result<i64> {
        let inner = self.inner.read();
        Ok(inner
            .deployments
            .get(project_id)
            .and_then(|records| records.last())
            .map(|d| d.deployment_id)
            .unwrap_or(0))
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment> {
        let mut inner = self.inner.write();
        let records = inner
            .deployments
            .entry(deployment.project_id.clone())
            .or_default();
        let next_id = records.last().map(|d| d.deployment_id + 1).unwrap_or(1);
        let record = deployment.into_deployment(next_id);
        records.push(record.clone());
        Ok(record)
    }

    async fn get_deployment(
        &self,
        project_id: &Id,
        deployment_id: i64,
    ) -> Result<Option<Deployment>> {
        let inner = self.inner.read();
        Ok(inner
            .deployments
            .get(project_id)
            .and_then(|records| records.iter().find(|d| d.deployment_id == deployment_id))
            .cloned())
    }

    async fn list_deployments(
        &self,
        project_id: &Id,
        filter: DeploymentFilter,
    ) -> Result<Vec<Deployment>> {
        let inner = self.inner.read();
        let records = inner
            .deployments
            .get(project_id)
            .map(|r| r.as_slice())
            .unwrap_or_default();
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .rev() // stored ascending, history reads newest first
            .filter(|d| filter.status.map_or(true, |s| d.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_deployments_between(
        &self,
        project_id: &Id,
        after: i64,
        up_to: i64,
    ) -> Result<Vec<Deployment>> {
        let inner = self.inner.read();
        let records = inner
            .deployments
            .get(project_id)
            .map(|r| r.as_slice())
            .unwrap_or_default();
        Ok(records
            .iter()
            .filter(|d| d.deployment_id > after && d.deployment_id <= up_to)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ComponentWriter for MemoryStore {
    async fn apply_change(&self, project_id: &Id, item: &ChangeItem) -> Result<()> {
        let mut inner = self.inner.write();
        let components = inner.components.entry(project_id.clone()).or_default();
        let key = (
            item.component.component_type,
            item.component.component_id.clone(),
        );
        match item.change_type {
            ChangeType::Create => {
                if let Some(existing) = components.get(&key) {
                    bail!(
                        "{} '{}' already exists in production as '{}' (last deployed {})",
                        item.component.component_type,
                        item.component.component_name,
                        existing.component_name,
                        existing.updated_at
                    );
                }
                components.insert(
                    key,
                    ComponentRecord {
                        component_name: item.component.component_name.clone(),
                        updated_at: chrono::Utc::now().to_rfc3339(),
                    },
                );
            }
            ChangeType::Update => {
                let record = components.get_mut(&key).ok_or_else(|| {
                    anyhow::anyhow!(
                        "{} '{}' does not exist in production",
                        item.component.component_type,
                        item.component.component_name
                    )
                })?;
                record.component_name = item.component.component_name.clone();
                record.updated_at = chrono::Utc::now().to_rfc3339();
            }
            ChangeType::Delete => {
                if components.remove(&key).is_none() {
                    bail!(
                        "{} '{}' does not exist in production",
                        item.component.component_type,
                        item.component.component_name
                    );
                }
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {}
