use anyhow::{bail, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{
    BucketStatus, ChangeItem, ChangeType, Deployment, DeploymentBucket, DeploymentFilter,
    DeploymentStatus, Id, NewDeployment, Project,
};
use crate::store::traits::{BucketStore, ComponentWriter, DeploymentStore, ProjectStore, Store};

/// Schema DDL, applied idempotently on startup. The partial unique index on
/// buckets is what enforces the one-active-bucket-per-project invariant.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS buckets (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        base_deployment_id BIGINT NOT NULL,
        items JSONB NOT NULL,
        has_conflicts BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS buckets_one_active_per_project
        ON buckets (project_id) WHERE status = 'active'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deployments (
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        deployment_id BIGINT NOT NULL,
        status TEXT NOT NULL,
        items_total INT NOT NULL,
        items_succeeded INT NOT NULL,
        items_failed INT NOT NULL,
        errors JSONB NOT NULL,
        deployed_datablocks JSONB NOT NULL,
        deployed_pipelines JSONB NOT NULL,
        deployed_features JSONB NOT NULL,
        duration_ms BIGINT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (project_id, deployment_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS components (
        project_id TEXT NOT NULL,
        component_type TEXT NOT NULL,
        component_id TEXT NOT NULL,
        component_name TEXT NOT NULL,
        payload JSONB,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (project_id, component_type, component_id)
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Apply the embedded schema DDL
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bucket_from_row(row: &sqlx::postgres::PgRow) -> Result<DeploymentBucket> {
        let status = parse_bucket_status(row.get("status"));
        let items: serde_json::Value = row.get("items");
        let items: Vec<ChangeItem> =
            serde_json::from_value(items).context("Failed to decode bucket items")?;
        Ok(DeploymentBucket {
            id: row.get("id"),
            project_id: row.get("project_id"),
            name: row.get("name"),
            status,
            base_deployment_id: row.get("base_deployment_id"),
            item_count: items.len() as i32,
            items,
            has_conflicts: row.get("has_conflicts"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn deployment_from_row(row: &sqlx::postgres::PgRow) -> Result<Deployment> {
        let status: String = row.get("status");
        let status = DeploymentStatus::parse(&status)
            .with_context(|| format!("Unknown deployment status '{}'", status))?;
        let errors: serde_json::Value = row.get("errors");
        let deployed_datablocks: serde_json::Value = row.get("deployed_datablocks");
        let deployed_pipelines: serde_json::Value = row.get("deployed_pipelines");
        let deployed_features: serde_json::Value = row.get("deployed_features");
        Ok(Deployment {
            deployment_id: row.get("deployment_id"),
            project_id: row.get("project_id"),
            status,
            items_total: row.get("items_total"),
            items_succeeded: row.get("items_succeeded"),
            items_failed: row.get("items_failed"),
            errors: serde_json::from_value(errors).context("Failed to decode deployment errors")?,
            deployed_datablocks: serde_json::from_value(deployed_datablocks)?,
            deployed_pipelines: serde_json::from_value(deployed_pipelines)?,
            deployed_features: serde_json::from_value(deployed_features)?,
            duration_ms: row.get("duration_ms"),
            created_at: row.get("created_at"),
        })
    }
}

fn parse_bucket_status(s: &str) -> BucketStatus {
    match s {
        "deployed" => BucketStatus::Deployed,
        "discarded" => BucketStatus::Discarded,
        _ => BucketStatus::Active,
    }
}

#[async_trait::async_trait]
impl ProjectStore for PostgresStore {
    async fn get_project(&self, id: &Id) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, description, created_at FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch project")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Project {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        }))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows =
            sqlx::query("SELECT id, name, description, created_at FROM projects ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .context("Failed to list projects")?;

        Ok(rows
            .into_iter()
            .map(|row| Project {
                id: row.get("id"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert project")?;

        Ok(())
    }

    async fn delete_project(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete project")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl BucketStore for PostgresStore {
    async fn get_bucket(
        &self,
        project_id: &Id,
        bucket_id: &Id,
    ) -> Result<Option<DeploymentBucket>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, status, base_deployment_id, items, has_conflicts, created_at, updated_at
            FROM buckets
            WHERE project_id = $1 AND id = $2
            "#,
        )
        .bind(project_id)
        .bind(bucket_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch bucket")?;

        row.as_ref().map(Self::bucket_from_row).transpose()
    }

    async fn get_active_bucket(&self, project_id: &Id) -> Result<Option<DeploymentBucket>> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, status, base_deployment_id, items, has_conflicts, created_at, updated_at
            FROM buckets
            WHERE project_id = $1 AND status = 'active'
            "#,
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch active bucket")?;

        row.as_ref().map(Self::bucket_from_row).transpose()
    }

    async fn insert_bucket(&self, bucket: DeploymentBucket) -> Result<()> {
        let items = serde_json::to_value(&bucket.items)?;
        // The partial unique index rejects a second active bucket per project
        sqlx::query(
            r#"
            INSERT INTO buckets (id, project_id, name, status, base_deployment_id, items, has_conflicts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&bucket.id)
        .bind(&bucket.project_id)
        .bind(&bucket.name)
        .bind(bucket.status.as_str())
        .bind(bucket.base_deployment_id)
        .bind(items)
        .bind(bucket.has_conflicts)
        .bind(&bucket.created_at)
        .bind(&bucket.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert bucket")?;

        Ok(())
    }

    async fn append_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item: ChangeItem,
    ) -> Result<Option<DeploymentBucket>> {
        let appended = serde_json::to_value([item])?;
        // The status guard makes this a no-op on resolved buckets, so a
        // deploy or discard that won the race is never overwritten
        let row = sqlx::query(
            r#"
            UPDATE buckets
            SET items = items || $3, updated_at = $4
            WHERE project_id = $1 AND id = $2 AND status = 'active'
            RETURNING id, project_id, name, status, base_deployment_id, items, has_conflicts, created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(bucket_id)
        .bind(appended)
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to append change item")?;

        row.as_ref().map(Self::bucket_from_row).transpose()
    }

    async fn remove_item(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        item_id: &Id,
    ) -> Result<Option<DeploymentBucket>> {
        let row = sqlx::query(
            r#"
            UPDATE buckets
            SET items = COALESCE(
                    (SELECT jsonb_agg(elem)
                     FROM jsonb_array_elements(items) AS elem
                     WHERE elem->>'id' <> $3),
                    '[]'::jsonb),
                updated_at = $4
            WHERE project_id = $1 AND id = $2 AND status = 'active'
            RETURNING id, project_id, name, status, base_deployment_id, items, has_conflicts, created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(bucket_id)
        .bind(item_id)
        .bind(chrono::Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to remove change item")?;

        row.as_ref().map(Self::bucket_from_row).transpose()
    }

    async fn transition_bucket(
        &self,
        project_id: &Id,
        bucket_id: &Id,
        from: BucketStatus,
        to: BucketStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE buckets
            SET status = $4, updated_at = $5
            WHERE project_id = $1 AND id = $2 AND status = $3
            "#,
        )
        .bind(project_id)
        .bind(bucket_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to transition bucket status")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl DeploymentStore for PostgresStore {
    async fn current_deployment_id(&self, project_id: &Id) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(deployment_id), 0) AS current_id FROM deployments WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch current deployment id")?;

        Ok(row.get("current_id"))
    }

    async fn insert_deployment(&self, deployment: NewDeployment) -> Result<Deployment> {
        let mut tx = self.pool.begin().await?;

        // The composite primary key guards against a concurrent allocation of
        // the same id; the loser of that race fails and retries at the caller.
        let row = sqlx::query(
            "SELECT COALESCE(MAX(deployment_id), 0) + 1 AS next_id FROM deployments WHERE project_id = $1",
        )
        .bind(&deployment.project_id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to allocate deployment id")?;
        let next_id: i64 = row.get("next_id");

        let record = deployment.into_deployment(next_id);
        sqlx::query(
            r#"
            INSERT INTO deployments (
                project_id, deployment_id, status, items_total, items_succeeded, items_failed,
                errors, deployed_datablocks, deployed_pipelines, deployed_features,
                duration_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.project_id)
        .bind(record.deployment_id)
        .bind(record.status.as_str())
        .bind(record.items_total)
        .bind(record.items_succeeded)
        .bind(record.items_failed)
        .bind(serde_json::to_value(&record.errors)?)
        .bind(serde_json::to_value(&record.deployed_datablocks)?)
        .bind(serde_json::to_value(&record.deployed_pipelines)?)
        .bind(serde_json::to_value(&record.deployed_features)?)
        .bind(record.duration_ms)
        .bind(&record.created_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert deployment record")?;

        tx.commit().await?;
        Ok(record)
    }

    async fn get_deployment(
        &self,
        project_id: &Id,
        deployment_id: i64,
    ) -> Result<Option<Deployment>> {
        let row = sqlx::query(
            r#"
            SELECT project_id, deployment_id, status, items_total, items_succeeded, items_failed,
                   errors, deployed_datablocks, deployed_pipelines, deployed_features,
                   duration_ms, created_at
            FROM deployments
            WHERE project_id = $1 AND deployment_id = $2
            "#,
        )
        .bind(project_id)
        .bind(deployment_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch deployment")?;

        row.as_ref().map(Self::deployment_from_row).transpose()
    }

    async fn list_deployments(
        &self,
        project_id: &Id,
        filter: DeploymentFilter,
    ) -> Result<Vec<Deployment>> {
        let limit = filter.limit.unwrap_or(usize::MAX).min(i64::MAX as usize) as i64;
        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT project_id, deployment_id, status, items_total, items_succeeded, items_failed,
                           errors, deployed_datablocks, deployed_pipelines, deployed_features,
                           duration_ms, created_at
                    FROM deployments
                    WHERE project_id = $1 AND status = $2
                    ORDER BY deployment_id DESC
                    LIMIT $3
                    "#,
                )
                .bind(project_id)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT project_id, deployment_id, status, items_total, items_succeeded, items_failed,
                           errors, deployed_datablocks, deployed_pipelines, deployed_features,
                           duration_ms, created_at
                    FROM deployments
                    WHERE project_id = $1
                    ORDER BY deployment_id DESC
                    LIMIT $2
                    "#,
                )
                .bind(project_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to list deployments")?;

        rows.iter().map(Self::deployment_from_row).collect()
    }

    async fn list_deployments_between(
        &self,
        project_id: &Id,
        after: i64,
        up_to: i64,
    ) -> Result<Vec<Deployment>> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, deployment_id, status, items_total, items_succeeded, items_failed,
                   errors, deployed_datablocks, deployed_pipelines, deployed_features,
                   duration_ms, created_at
            FROM deployments
            WHERE project_id = $1 AND deployment_id > $2 AND deployment_id <= $3
            ORDER BY deployment_id
            "#,
        )
        .bind(project_id)
        .bind(after)
        .bind(up_to)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list deployments in range")?;

        rows.iter().map(Self::deployment_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ComponentWriter for PostgresStore {
    async fn apply_change(&self, project_id: &Id, item: &ChangeItem) -> Result<()> {
        let component = &item.component;
        let now = chrono::Utc::now().to_rfc3339();
        match item.change_type {
            ChangeType::Create => {
                let payload = item.payload.as_ref().map(serde_json::to_value).transpose()?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO components (project_id, component_type, component_id, component_name, payload, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (project_id, component_type, component_id) DO NOTHING
                    "#,
                )
                .bind(project_id)
                .bind(component.component_type.as_str())
                .bind(&component.component_id)
                .bind(&component.component_name)
                .bind(payload)
                .bind(&now)
                .execute(&self.pool)
                .await
                .context("Failed to create component")?;

                if result.rows_affected() == 0 {
                    bail!(
                        "{} '{}' already exists in production",
                        component.component_type,
                        component.component_name
                    );
                }
            }
            ChangeType::Update => {
                let payload = item.payload.as_ref().map(serde_json::to_value).transpose()?;
                let result = sqlx::query(
                    r#"
                    UPDATE components
                    SET component_name = $4, payload = $5, updated_at = $6
                    WHERE project_id = $1 AND component_type = $2 AND component_id = $3
                    "#,
                )
                .bind(project_id)
                .bind(component.component_type.as_str())
                .bind(&component.component_id)
                .bind(&component.component_name)
                .bind(payload)
                .bind(&now)
                .execute(&self.pool)
                .await
                .context("Failed to update component")?;

                if result.rows_affected() == 0 {
                    bail!(
                        "{} '{}' does not exist in production",
                        component.component_type,
                        component.component_name
                    );
                }
            }
            ChangeType::Delete => {
                let result = sqlx::query(
                    r#"
                    DELETE FROM components
                    WHERE project_id = $1 AND component_type = $2 AND component_id = $3
                    "#,
                )
                .bind(project_id)
                .bind(component.component_type.as_str())
                .bind(&component.component_id)
                .execute(&self.pool)
                .await
                .context("Failed to delete component")?;

                if result.rows_affected() == 0 {
                    bail!(
                        "{} '{}' does not exist in production",
                        component.component_type,
                        component.component_name
                    );
                }
            }
        }
        Ok(())
    }
}

impl Store for PostgresStore {}
