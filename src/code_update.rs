//! Code update retrieval and level history.
//!
//! Used by `tkt cu show` and `tkt cu list`.

use sqlx::{Row, SqliteConnection};

use crate::error::{Result, TkError};
use crate::models::{CodeUpdateRecord, FileAction, FileVersionRecord};
use crate::toolkit;

/// One row of a tool kit's level history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub component: String,
    pub revision: String,
    pub branch: String,
    pub user_id: String,
    pub committed_at: String,
    pub file_count: i64,
    pub change_requests: Vec<String>,
}

pub async fn get_code_update(conn: &mut SqliteConnection, id: i64) -> Result<CodeUpdateRecord> {
    let row = sqlx::query(
        r#"
        SELECT cu.id, c.name AS component, tk.name AS tool_kit, cu.repository, cu.revision,
               cu.branch, cu.description, cu.user_id, cu.committed_at
        FROM code_updates cu
        JOIN components c ON c.id = cu.component_id
        JOIN tool_kits tk ON tk.id = cu.tool_kit_id
        WHERE cu.id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        TkError::not_found(
            "code_update::get_code_update",
            format!("code update {} does not exist", id),
        )
    })?;

    let file_rows = sqlx::query(
        r#"
        SELECT f.name, fv.action
        FROM file_versions fv
        JOIN file_names f ON f.id = fv.file_name_id
        WHERE fv.code_update_id = ?
        ORDER BY f.name
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let mut files = Vec::with_capacity(file_rows.len());
    for r in &file_rows {
        let action: String = r.get("action");
        let action: FileAction = action.parse().map_err(|e: String| {
            TkError::new(
                crate::error::ErrorKind::Persistence,
                "code_update::get_code_update",
                e,
            )
        })?;
        files.push(FileVersionRecord {
            path: r.get("name"),
            action,
        });
    }

    let change_requests = linked_change_requests(conn, id).await?;
    let committed_at: i64 = row.get("committed_at");

    Ok(CodeUpdateRecord {
        id: row.get("id"),
        component: row.get("component"),
        tool_kit: row.get("tool_kit"),
        repository: row.get("repository"),
        revision: row.get("revision"),
        branch: row.get("branch"),
        description: row.get("description"),
        user_id: row.get("user_id"),
        committed_at: format_ts_iso(committed_at),
        files,
        change_requests,
    })
}

/// Code updates recorded against a tool kit, newest commit first.
pub async fn list_history(
    conn: &mut SqliteConnection,
    tool_kit: &str,
    component: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<HistoryEntry>> {
    let tool_kit_id = toolkit::tool_kit_id(conn, tool_kit).await?;
    let component_id = match component {
        Some(name) => Some(toolkit::component_id(conn, name).await?),
        None => None,
    };

    let rows = sqlx::query(
        r#"
        SELECT cu.id, c.name AS component, cu.revision, cu.branch, cu.user_id, cu.committed_at,
               (SELECT COUNT(*) FROM file_versions fv WHERE fv.code_update_id = cu.id) AS file_count
        FROM code_updates cu
        JOIN components c ON c.id = cu.component_id
        WHERE cu.tool_kit_id = ? AND (? IS NULL OR cu.component_id = ?)
        ORDER BY cu.committed_at DESC, cu.id DESC
        LIMIT ?
        "#,
    )
    .bind(tool_kit_id)
    .bind(component_id)
    .bind(component_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(&mut *conn)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: i64 = row.get("id");
        let committed_at: i64 = row.get("committed_at");
        entries.push(HistoryEntry {
            id,
            component: row.get("component"),
            revision: row.get("revision"),
            branch: row.get("branch"),
            user_id: row.get("user_id"),
            committed_at: format_ts_iso(committed_at),
            file_count: row.get("file_count"),
            change_requests: linked_change_requests(conn, id).await?,
        });
    }
    Ok(entries)
}

async fn linked_change_requests(conn: &mut SqliteConnection, code_update_id: i64) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT cr.external_id
        FROM code_update_change_requests l
        JOIN change_requests cr ON cr.id = l.change_request_id
        WHERE l.code_update_id = ?
        ORDER BY cr.external_id
        "#,
    )
    .bind(code_update_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

pub fn print_code_update(cu: &CodeUpdateRecord) {
    println!("--- Code Update {} ---", cu.id);
    println!("component:    {}", cu.component);
    println!("tool kit:     {}", cu.tool_kit);
    if let Some(ref repo) = cu.repository {
        println!("repository:   {}", repo);
    }
    println!("revision:     {}", cu.revision);
    println!("branch:       {}", cu.branch);
    println!("user:         {}", cu.user_id);
    println!("committed_at: {}", cu.committed_at);
    if cu.change_requests.is_empty() {
        println!("change reqs:  (none)");
    } else {
        println!("change reqs:  {}", cu.change_requests.join(", "));
    }
    println!();

    println!("--- Abstract ---");
    println!("{}", cu.description);
    println!();

    println!("--- Files ({}) ---", cu.files.len());
    for f in &cu.files {
        println!("{:<7} {}", f.action.as_str(), f.path);
    }
}

pub fn print_history(tool_kit: &str, entries: &[HistoryEntry]) {
    println!("Level history for {}", tool_kit);
    println!(
        "  {:>6}  {:<16} {:>9}  {:<12} {:<10} {:>5}  {}",
        "ID", "COMPONENT", "REVISION", "BRANCH", "USER", "FILES", "CHANGE REQUESTS"
    );
    println!("  {}", "-".repeat(84));
    for e in entries {
        println!(
            "  {:>6}  {:<16} {:>9}  {:<12} {:<10} {:>5}  {}",
            e.id,
            e.component,
            e.revision,
            e.branch,
            e.user_id,
            e.file_count,
            if e.change_requests.is_empty() {
                "-".to_string()
            } else {
                e.change_requests.join(",")
            }
        );
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
