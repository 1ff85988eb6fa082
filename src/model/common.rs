use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// The kinds of addressable configuration objects the console manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Datablock,
    Pipeline,
    Feature,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Datablock => "datablock",
            ComponentType::Pipeline => "pipeline",
            ComponentType::Feature => "feature",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the target of a staged change. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    pub component_type: ComponentType,
    pub component_id: Id,
    pub component_name: String,
}

impl ComponentRef {
    pub fn new(component_type: ComponentType, component_id: Id, component_name: String) -> Self {
        Self {
            component_type,
            component_id,
            component_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatablockKind {
    /// Columns mapped straight from a source table
    Direct,
    /// Values aggregated over a time window
    Aggregated,
    /// Rows labeled for model training
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineTrigger {
    Streaming,
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureDataType {
    String,
    Number,
    Boolean,
    Timestamp,
}

/// Closed set of payload shapes, one per component type. The tag mirrors
/// `ComponentRef.component_type` and the two must agree when a change is staged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "component_type", rename_all = "lowercase")]
pub enum ComponentPayload {
    Datablock {
        kind: DatablockKind,
        source: String,
        key_columns: Vec<String>,
        /// Aggregation window, required for aggregated datablocks
        #[serde(skip_serializing_if = "Option::is_none")]
        window_seconds: Option<u32>,
        /// Label column, required for training datablocks
        #[serde(skip_serializing_if = "Option::is_none")]
        label_column: Option<String>,
    },
    Pipeline {
        trigger: PipelineTrigger,
        datablock_ids: Vec<Id>,
        /// Cron expression, required for scheduled pipelines
        #[serde(skip_serializing_if = "Option::is_none")]
        schedule: Option<String>,
    },
    Feature {
        datablock_id: Id,
        expression: String,
        data_type: FeatureDataType,
    },
}

impl ComponentPayload {
    pub fn component_type(&self) -> ComponentType {
        match self {
            ComponentPayload::Datablock { .. } => ComponentType::Datablock,
            ComponentPayload::Pipeline { .. } => ComponentType::Pipeline,
            ComponentPayload::Feature { .. } => ComponentType::Feature,
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}
