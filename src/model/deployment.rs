use serde::{Deserialize, Serialize};

use crate::model::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Every item applied
    Success,
    /// No item applied
    Failed,
    /// Some items applied, some failed
    Partial,
    /// Reverted after the fact by an operator
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Partial => "partial",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(DeploymentStatus::Success),
            "failed" => Some(DeploymentStatus::Failed),
            "partial" => Some(DeploymentStatus::Partial),
            "rolled_back" => Some(DeploymentStatus::RolledBack),
            _ => None,
        }
    }
}

/// Per-item failure detail, keyed by component name for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentError {
    pub component_name: String,
    pub message: String,
}

/// Immutable record of one promotion of a bucket's changes to production.
/// `deployment_id` is a per-project monotonically increasing integer; its
/// ordering defines the production version sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub deployment_id: i64,
    pub project_id: Id,
    pub status: DeploymentStatus,
    pub items_total: i32,
    pub items_succeeded: i32,
    pub items_failed: i32,
    pub errors: Vec<DeploymentError>,
    /// Ids of components whose apply succeeded, per type. Failed applies did
    /// not change production and are not listed.
    pub deployed_datablocks: Vec<Id>,
    pub deployed_pipelines: Vec<Id>,
    pub deployed_features: Vec<Id>,
    pub duration_ms: i64,
    pub created_at: String, // ISO 8601 timestamp
}

/// A deployment record before the store has allocated its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDeployment {
    pub project_id: Id,
    pub status: DeploymentStatus,
    pub items_total: i32,
    pub items_succeeded: i32,
    pub items_failed: i32,
    pub errors: Vec<DeploymentError>,
    pub deployed_datablocks: Vec<Id>,
    pub deployed_pipelines: Vec<Id>,
    pub deployed_features: Vec<Id>,
    pub duration_ms: i64,
}

impl NewDeployment {
    pub fn into_deployment(self, deployment_id: i64) -> Deployment {
        Deployment {
            deployment_id,
            project_id: self.project_id,
            status: self.status,
            items_total: self.items_total,
            items_succeeded: self.items_succeeded,
            items_failed: self.items_failed,
            errors: self.errors,
            deployed_datablocks: self.deployed_datablocks,
            deployed_pipelines: self.deployed_pipelines,
            deployed_features: self.deployed_features,
            duration_ms: self.duration_ms,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One conflicting staged item, keyed by component name for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub component_name: String,
    pub message: String,
}

/// Ephemeral result of a staleness check. Never persisted and never written
/// back to the bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCheckResult {
    pub has_conflicts: bool,
    pub current_deployment_id: i64,
    pub bucket_base_deployment_id: i64,
    pub conflicts: Vec<ConflictDetail>,
}

impl ConflictCheckResult {
    pub fn clean(deployment_id: i64) -> Self {
        Self {
            has_conflicts: false,
            current_deployment_id: deployment_id,
            bucket_base_deployment_id: deployment_id,
            conflicts: Vec::new(),
        }
    }
}

/// Query parameters accepted by the deployment history listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentFilter {
    pub status: Option<DeploymentStatus>,
    pub limit: Option<usize>,
}
