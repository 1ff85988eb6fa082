use crate::model::{generate_id, Id};
use serde::{Deserialize, Serialize};

/// A project owns its deployment buckets and its deployment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
}

impl Project {
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: generate_id(),
            name,
            description,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn new_with_id(id: Id, name: String, description: Option<String>) -> Self {
        Self {
            id,
            name,
            description,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Input model for creating a new project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub id: Option<Id>,
    pub name: String,
    pub description: Option<String>,
}

impl NewProject {
    /// Convert to a full Project with server-generated fields
    pub fn into_project(self) -> Project {
        match self.id {
            Some(id) => Project::new_with_id(id, self.name, self.description),
            None => Project::new(self.name, self.description),
        }
    }
}
