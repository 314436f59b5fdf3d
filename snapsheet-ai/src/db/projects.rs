//! Project database operations
//!
//! Writes go through `retry_on_lock` to ride out transient lock contention.
//! Timestamps are stored as fixed-width RFC 3339 (microseconds, `Z`) so that
//! text ordering matches time ordering.

use chrono::{DateTime, SecondsFormat, Utc};
use snapsheet_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Project, ProjectUpdate};
use crate::utils::retry_on_lock;

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, title, keys, columns, is_public, created_at, updated_at FROM projects";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", what, e)))
}

/// Insert a new project row
pub async fn insert_project(pool: &SqlitePool, max_wait_ms: u64, project: &Project) -> Result<()> {
    // Prepare all data before touching the database
    let keys = to_json("keys", &project.keys)?;
    let columns = to_json("columns", &project.columns)?;
    let created_at = format_timestamp(&project.created_at);
    let updated_at = format_timestamp(&project.updated_at);

    retry_on_lock("insert_project", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO projects (id, user_id, title, keys, columns, is_public, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.user_id)
        .bind(&project.title)
        .bind(&keys)
        .bind(&columns)
        .bind(project.is_public)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(pool)
        .await?;
        Ok::<(), Error>(())
    })
    .await
}

/// Apply a partial update; returns false when no row has this id
///
/// `updated_at` is always bumped.
pub async fn update_project(
    pool: &SqlitePool,
    max_wait_ms: u64,
    project_id: &str,
    update: &ProjectUpdate,
    updated_at: DateTime<Utc>,
) -> Result<bool> {
    let keys = update.keys.as_ref().map(|k| to_json("keys", k)).transpose()?;
    let columns = update
        .columns
        .as_ref()
        .map(|c| to_json("columns", c))
        .transpose()?;
    let updated_at = format_timestamp(&updated_at);

    let rows = retry_on_lock("update_project", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            UPDATE projects SET
                title = COALESCE(?, title),
                keys = COALESCE(?, keys),
                columns = COALESCE(?, columns),
                is_public = COALESCE(?, is_public),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.title)
        .bind(&keys)
        .bind(&columns)
        .bind(update.is_public)
        .bind(&updated_at)
        .bind(project_id)
        .execute(pool)
        .await?;
        Ok::<u64, Error>(result.rows_affected())
    })
    .await?;

    Ok(rows > 0)
}

/// Load one project
pub async fn load_project(pool: &SqlitePool, project_id: &str) -> Result<Option<Project>> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(project_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(decode_row).transpose()
}

/// All projects of one user, most recently updated first
///
/// Rows that fail to decode are skipped with a warning.
pub async fn list_projects(pool: &SqlitePool, user_id: &str) -> Result<Vec<Project>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY updated_at DESC, created_at DESC",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| match decode_row(row) {
            Ok(project) => Some(project),
            Err(e) => {
                let id: String = row.try_get("id").unwrap_or_default();
                tracing::warn!(project_id = %id, error = %e, "Skipping undecodable project row");
                None
            }
        })
        .collect())
}

/// Owning user of a project
pub async fn project_owner(pool: &SqlitePool, project_id: &str) -> Result<Option<String>> {
    let owner = sqlx::query_scalar("SELECT user_id FROM projects WHERE id = ?")
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(owner)
}

/// Titles of one user's projects
pub async fn list_titles(pool: &SqlitePool, user_id: &str) -> Result<Vec<String>> {
    let titles = sqlx::query_scalar("SELECT title FROM projects WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(titles)
}

/// Delete a project row; returns false when no row had this id
pub async fn delete_project(pool: &SqlitePool, max_wait_ms: u64, project_id: &str) -> Result<bool> {
    let rows = retry_on_lock("delete_project", max_wait_ms, || async {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(pool)
            .await?;
        Ok::<u64, Error>(result.rows_affected())
    })
    .await?;
    Ok(rows > 0)
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}

fn decode_row(row: &SqliteRow) -> Result<Project> {
    let keys: String = row.try_get("keys")?;
    let keys = serde_json::from_str(&keys)
        .map_err(|e| Error::Internal(format!("Failed to deserialize keys: {}", e)))?;

    let columns: String = row.try_get("columns")?;
    let columns = serde_json::from_str(&columns)
        .map_err(|e| Error::Internal(format!("Failed to deserialize columns: {}", e)))?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Project {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        keys,
        columns,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        is_public: row.try_get("is_public")?,
    })
}
