use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS components (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tool_kits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            stage TEXT NOT NULL DEFAULT 'development',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Which SVN branch backs a component inside a tool kit
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS component_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            component_id INTEGER NOT NULL,
            tool_kit_id INTEGER NOT NULL,
            branch TEXT NOT NULL,
            UNIQUE(component_id, tool_kit_id),
            FOREIGN KEY (component_id) REFERENCES components(id),
            FOREIGN KEY (tool_kit_id) REFERENCES tool_kits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT NOT NULL UNIQUE,
            component_id INTEGER,
            tool_kit_id INTEGER,
            status TEXT NOT NULL,
            cr_type TEXT NOT NULL,
            severity INTEGER NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            user_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (component_id) REFERENCES components(id),
            FOREIGN KEY (tool_kit_id) REFERENCES tool_kits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            component_id INTEGER NOT NULL,
            tool_kit_id INTEGER NOT NULL,
            repository TEXT,
            revision TEXT NOT NULL,
            branch TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            user_id TEXT NOT NULL,
            committed_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (component_id) REFERENCES components(id),
            FOREIGN KEY (tool_kit_id) REFERENCES tool_kits(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_names (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            code_update_id INTEGER NOT NULL,
            file_name_id INTEGER NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('add', 'update', 'delete')),
            UNIQUE(code_update_id, file_name_id),
            FOREIGN KEY (code_update_id) REFERENCES code_updates(id),
            FOREIGN KEY (file_name_id) REFERENCES file_names(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_update_change_requests (
            code_update_id INTEGER NOT NULL,
            change_request_id INTEGER NOT NULL,
            PRIMARY KEY (code_update_id, change_request_id),
            FOREIGN KEY (code_update_id) REFERENCES code_updates(id),
            FOREIGN KEY (change_request_id) REFERENCES change_requests(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_component_versions_branch ON component_versions(component_id, branch)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_code_updates_tool_kit ON code_updates(tool_kit_id, committed_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_versions_code_update ON file_versions(code_update_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cucr_change_request ON code_update_change_requests(change_request_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
