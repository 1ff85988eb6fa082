use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::{generate_id, ComponentPayload, ComponentRef, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeItemStatus {
    Pending,
    Conflict,
}

/// A single staged edit referencing one component. Belongs to exactly one
/// bucket; removed from storage when the bucket is discarded or deployed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    pub id: Id,
    pub change_type: ChangeType,
    pub component: ComponentRef,
    /// New component definition. None for deletes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ComponentPayload>,
    pub change_summary: String,
    pub status: ChangeItemStatus,
    pub created_at: String, // ISO 8601 timestamp
}

impl ChangeItem {
    pub fn new(
        change_type: ChangeType,
        component: ComponentRef,
        payload: Option<ComponentPayload>,
        change_summary: String,
    ) -> Self {
        Self {
            id: generate_id(),
            change_type,
            component,
            payload,
            change_summary,
            status: ChangeItemStatus::Pending,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Request body for staging a change into a project's bucket
#[derive(Debug, Clone, Deserialize)]
pub struct NewChangeItem {
    pub change_type: ChangeType,
    pub component: ComponentRef,
    #[serde(default)]
    pub payload: Option<ComponentPayload>,
    pub change_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStatus {
    /// Accumulating staged changes
    Active,
    /// Promoted to production; terminal
    Deployed,
    /// Explicitly abandoned; terminal
    Discarded,
}

impl BucketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketStatus::Active => "active",
            BucketStatus::Deployed => "deployed",
            BucketStatus::Discarded => "discarded",
        }
    }
}

/// Staging area for a project's not-yet-deployed configuration changes.
///
/// At most one bucket per project is `active` at a time; the store layer
/// enforces that with a uniqueness constraint. `base_deployment_id` is fixed
/// at creation to the production deployment id of that moment and never
/// changes while the bucket is active. Terminal states are final, a bucket
/// is never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBucket {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub status: BucketStatus,
    pub base_deployment_id: i64,
    pub items: Vec<ChangeItem>,
    /// Derived at read time from the current production deployment id;
    /// the stored value is only a snapshot.
    pub has_conflicts: bool,
    pub item_count: i32,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_at: String, // ISO 8601 timestamp
}

impl DeploymentBucket {
    /// Create an empty active bucket based on the given production deployment.
    pub fn new(project_id: Id, base_deployment_id: i64) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: generate_id(),
            project_id,
            name: format!("release-candidate-{}", base_deployment_id + 1),
            status: BucketStatus::Active,
            base_deployment_id,
            items: Vec::new(),
            has_conflicts: false,
            item_count: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BucketStatus::Active
    }

    /// Append a staged item. Later items for the same component are additive,
    /// not merged or deduplicated.
    pub fn add_item(&mut self, item: ChangeItem) -> Result<(), ProtocolError> {
        if !self.is_active() {
            return Err(ProtocolError::invalid_state(format!(
                "cannot stage changes into a {} bucket",
                self.status.as_str()
            )));
        }
        self.items.push(item);
        self.item_count = self.items.len() as i32;
        self.touch();
        Ok(())
    }

    /// Remove a staged item by id. An empty active bucket remains valid;
    /// removing the last item never discards the bucket.
    pub fn remove_item(&mut self, item_id: &Id) -> Result<ChangeItem, ProtocolError> {
        if !self.is_active() {
            return Err(ProtocolError::invalid_state(format!(
                "cannot remove items from a {} bucket",
                self.status.as_str()
            )));
        }
        let position = self
            .items
            .iter()
            .position(|item| &item.id == item_id)
            .ok_or_else(|| ProtocolError::not_found(format!("change item '{}'", item_id)))?;
        let removed = self.items.remove(position);
        self.item_count = self.items.len() as i32;
        self.touch();
        Ok(removed)
    }

    /// Transition to `discarded`. Valid from `active` only.
    pub fn discard(&mut self) -> Result<(), ProtocolError> {
        if !self.is_active() {
            return Err(ProtocolError::invalid_state(format!(
                "only an active bucket can be discarded, this one is {}",
                self.status.as_str()
            )));
        }
        self.status = BucketStatus::Discarded;
        self.touch();
        Ok(())
    }

    /// Transition to `deployed` after the executor has run.
    pub fn mark_deployed(&mut self) {
        self.status = BucketStatus::Deployed;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}
