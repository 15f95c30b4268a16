//! Components, tool kits, and the branch associations between them.
//!
//! A component version ties a component to a tool kit and names the SVN
//! branch that carries its code for that release. Fan-out asks the reverse
//! question: given a component and the branch a commit landed on, which
//! tool kits under development receive the change?

use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use crate::error::{Result, TkError};
use crate::models::{BranchName, ToolKitStage, ToolKitTarget};

#[derive(Debug, Clone, Serialize)]
pub struct ToolKitInfo {
    pub id: i64,
    pub name: String,
    pub stage: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentVersionInfo {
    pub id: i64,
    pub component: String,
    pub tool_kit: String,
    pub stage: String,
    pub branch: String,
}

/// Tool kits in development whose component version for `component` lives
/// on `branch`, ordered by tool kit name.
///
/// # Errors
///
/// NotFound when the component is unknown; Format when no tool kit is
/// associated with the branch, since every code update needs one.
pub async fn fan_out(
    conn: &mut SqliteConnection,
    component: &str,
    branch: &BranchName,
) -> Result<Vec<ToolKitTarget>> {
    let component_id = component_id(conn, component).await?;

    let rows = sqlx::query(
        r#"
        SELECT tk.id AS tool_kit_id, tk.name AS tool_kit_name
        FROM component_versions cv
        JOIN tool_kits tk ON tk.id = cv.tool_kit_id
        WHERE cv.component_id = ? AND cv.branch = ? AND tk.stage = ?
        ORDER BY tk.name
        "#,
    )
    .bind(component_id)
    .bind(branch.as_str())
    .bind(ToolKitStage::Development.as_str())
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Err(TkError::format(
            "toolkit::fan_out",
            format!(
                "no tool kit under development uses branch '{}' for component '{}'",
                branch, component
            ),
        ));
    }

    Ok(rows
        .iter()
        .map(|row| ToolKitTarget {
            tool_kit_id: row.get("tool_kit_id"),
            tool_kit_name: row.get("tool_kit_name"),
            component_id,
        })
        .collect())
}

pub async fn component_id(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM components WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            TkError::not_found("toolkit::component_id", format!("unknown component '{}'", name))
        })
}

pub async fn tool_kit_id(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    sqlx::query_scalar("SELECT id FROM tool_kits WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            TkError::not_found("toolkit::tool_kit_id", format!("unknown tool kit '{}'", name))
        })
}

pub async fn add_component(conn: &mut SqliteConnection, name: &str) -> Result<i64> {
    let name = non_empty("toolkit::add_component", "component name", name)?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM components WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_some() {
        return Err(TkError::invalid(
            "toolkit::add_component",
            format!("component '{}' already exists", name),
        ));
    }

    let id = sqlx::query("INSERT INTO components (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn list_components(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM components ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    Ok(names)
}

pub async fn add_tool_kit(
    conn: &mut SqliteConnection,
    name: &str,
    stage: ToolKitStage,
) -> Result<i64> {
    let name = non_empty("toolkit::add_tool_kit", "tool kit name", name)?;
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM tool_kits WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    if exists.is_some() {
        return Err(TkError::invalid(
            "toolkit::add_tool_kit",
            format!("tool kit '{}' already exists", name),
        ));
    }

    let id = sqlx::query("INSERT INTO tool_kits (name, stage, created_at) VALUES (?, ?, ?)")
        .bind(name)
        .bind(stage.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();
    Ok(id)
}

pub async fn set_stage(conn: &mut SqliteConnection, name: &str, stage: ToolKitStage) -> Result<()> {
    let id = tool_kit_id(conn, name).await?;
    sqlx::query("UPDATE tool_kits SET stage = ? WHERE id = ?")
        .bind(stage.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn list_tool_kits(conn: &mut SqliteConnection) -> Result<Vec<ToolKitInfo>> {
    let rows = sqlx::query("SELECT id, name, stage FROM tool_kits ORDER BY name")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ToolKitInfo {
            id: row.get("id"),
            name: row.get("name"),
            stage: row.get("stage"),
        })
        .collect())
}

/// Create or move the component version for (component, tool kit).
pub async fn associate(
    conn: &mut SqliteConnection,
    component: &str,
    tool_kit: &str,
    branch: &str,
) -> Result<i64> {
    let branch = non_empty("toolkit::associate", "branch", branch)?;
    let component_id = component_id(conn, component).await?;
    let tool_kit_id = tool_kit_id(conn, tool_kit).await?;

    sqlx::query(
        r#"
        INSERT INTO component_versions (component_id, tool_kit_id, branch)
        VALUES (?, ?, ?)
        ON CONFLICT(component_id, tool_kit_id) DO UPDATE SET branch = excluded.branch
        "#,
    )
    .bind(component_id)
    .bind(tool_kit_id)
    .bind(branch)
    .execute(&mut *conn)
    .await?;

    let id: i64 = sqlx::query_scalar(
        "SELECT id FROM component_versions WHERE component_id = ? AND tool_kit_id = ?",
    )
    .bind(component_id)
    .bind(tool_kit_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn list_associations(
    conn: &mut SqliteConnection,
    tool_kit: Option<&str>,
) -> Result<Vec<ComponentVersionInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT cv.id, c.name AS component, tk.name AS tool_kit, tk.stage, cv.branch
        FROM component_versions cv
        JOIN components c ON c.id = cv.component_id
        JOIN tool_kits tk ON tk.id = cv.tool_kit_id
        WHERE (? IS NULL OR tk.name = ?)
        ORDER BY tk.name, c.name
        "#,
    )
    .bind(tool_kit)
    .bind(tool_kit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ComponentVersionInfo {
            id: row.get("id"),
            component: row.get("component"),
            tool_kit: row.get("tool_kit"),
            stage: row.get("stage"),
            branch: row.get("branch"),
        })
        .collect())
}

fn non_empty<'a>(origin: &'static str, what: &str, value: &'a str) -> Result<&'a str> {
    let v = value.trim();
    if v.is_empty() {
        return Err(TkError::invalid(origin, format!("{} must not be empty", what)));
    }
    Ok(v)
}
