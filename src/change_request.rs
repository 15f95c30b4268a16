//! Change request resolution and administration.
//!
//! A commit names its change request with a token in the transcript's `CR`
//! line. Two tokens are sentinels: the not-applicable token links nothing,
//! and the developer token mints an informal, pre-approved request for every
//! tool kit the commit fans out to. Anything else must already exist.

use sqlx::{Row, SqliteConnection};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{Result, TkError};
use crate::models::{
    ChangeRequestRecord, CommitTranscript, CrStatus, CrType, ToolKitTarget, LOWEST_SEVERITY,
};
use crate::toolkit;

/// Tool kit name → change request row id. Tool kits without an entry get no link.
pub type ChangeRequestMap = BTreeMap<String, i64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrToken {
    NotApplicable,
    Developer,
    Tracked(String),
}

pub fn classify_token(token: &str, cfg: &IngestConfig) -> CrToken {
    let token = token.trim();
    if token.eq_ignore_ascii_case(&cfg.na_token) {
        CrToken::NotApplicable
    } else if token.eq_ignore_ascii_case(&cfg.dev_token) {
        CrToken::Developer
    } else {
        CrToken::Tracked(token.to_string())
    }
}

/// Resolve the transcript's change request for every fan-out target.
///
/// Developer requests are inserted here, on the caller's transaction, so a
/// later failure rolls them back together with the code updates.
pub async fn resolve_change_requests(
    conn: &mut SqliteConnection,
    transcript: &CommitTranscript,
    targets: &[ToolKitTarget],
    cfg: &IngestConfig,
) -> Result<ChangeRequestMap> {
    let mut resolved = ChangeRequestMap::new();

    match classify_token(&transcript.change_request, cfg) {
        CrToken::NotApplicable => {
            tracing::debug!(token = %transcript.change_request, "no change request for commit");
        }
        CrToken::Developer => {
            for target in targets {
                let external_id = format!(
                    "{}-{}",
                    cfg.dev_token.to_ascii_uppercase(),
                    &Uuid::new_v4().simple().to_string()[..12]
                );
                let id = insert_change_request(
                    conn,
                    &external_id,
                    Some(target.component_id),
                    Some(target.tool_kit_id),
                    CrStatus::Approved,
                    CrType::Feature,
                    LOWEST_SEVERITY,
                    &transcript.abstract_text,
                    Some(&transcript.user),
                )
                .await?;
                tracing::info!(
                    external_id = %external_id,
                    tool_kit = %target.tool_kit_name,
                    "created developer change request"
                );
                resolved.insert(target.tool_kit_name.clone(), id);
            }
        }
        CrToken::Tracked(external_id) => {
            let row = sqlx::query(
                "SELECT id, component_id, tool_kit_id FROM change_requests WHERE external_id = ?",
            )
            .bind(&external_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| {
                TkError::not_found(
                    "change_request::resolve_change_requests",
                    format!("change request '{}' does not exist", external_id),
                )
                .with_payload(format!("CR | {}", transcript.change_request))
            })?;

            let id: i64 = row.get("id");
            let owner_component: Option<i64> = row.get("component_id");
            let owner_tool_kit: Option<i64> = row.get("tool_kit_id");
            for target in targets {
                if owner_component.is_some_and(|c| c != target.component_id)
                    || owner_tool_kit.is_some_and(|t| t != target.tool_kit_id)
                {
                    tracing::warn!(
                        change_request = %external_id,
                        tool_kit = %target.tool_kit_name,
                        "change request is owned by a different component or tool kit"
                    );
                }
                resolved.insert(target.tool_kit_name.clone(), id);
            }
        }
    }

    Ok(resolved)
}

#[allow(clippy::too_many_arguments)]
async fn insert_change_request(
    conn: &mut SqliteConnection,
    external_id: &str,
    component_id: Option<i64>,
    tool_kit_id: Option<i64>,
    status: CrStatus,
    cr_type: CrType,
    severity: i64,
    description: &str,
    user: Option<&str>,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let id = sqlx::query(
        r#"
        INSERT INTO change_requests
            (external_id, component_id, tool_kit_id, status, cr_type, severity,
             description, user_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(external_id)
    .bind(component_id)
    .bind(tool_kit_id)
    .bind(status.as_str())
    .bind(cr_type.as_str())
    .bind(severity)
    .bind(description)
    .bind(user)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Fields for `tkt cr create`.
#[derive(Debug, Clone)]
pub struct NewChangeRequest {
    pub external_id: String,
    pub component: String,
    pub tool_kit: String,
    pub status: CrStatus,
    pub cr_type: CrType,
    pub severity: i64,
    pub description: String,
    pub user: Option<String>,
}

/// Fields for `tkt cr update`; `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct ChangeRequestUpdate {
    pub status: Option<CrStatus>,
    pub severity: Option<i64>,
    pub description: Option<String>,
    pub component: Option<String>,
    pub tool_kit: Option<String>,
}

pub async fn create_change_request(
    conn: &mut SqliteConnection,
    req: &NewChangeRequest,
    cfg: &IngestConfig,
) -> Result<i64> {
    const ORIGIN: &str = "change_request::create_change_request";

    let external_id = req.external_id.trim();
    if external_id.is_empty() {
        return Err(TkError::invalid(ORIGIN, "change request id must not be empty"));
    }
    if classify_token(external_id, cfg) != CrToken::Tracked(external_id.to_string()) {
        return Err(TkError::invalid(
            ORIGIN,
            format!("'{}' is a reserved change request token", external_id),
        ));
    }
    check_severity(ORIGIN, req.severity)?;

    let exists: Option<i64> =
        sqlx::query_scalar("SELECT id FROM change_requests WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&mut *conn)
            .await?;
    if exists.is_some() {
        return Err(TkError::invalid(
            ORIGIN,
            format!("change request '{}' already exists", external_id),
        ));
    }

    let component_id = toolkit::component_id(conn, &req.component).await?;
    let tool_kit_id = toolkit::tool_kit_id(conn, &req.tool_kit).await?;

    insert_change_request(
        conn,
        external_id,
        Some(component_id),
        Some(tool_kit_id),
        req.status,
        req.cr_type,
        req.severity,
        &req.description,
        req.user.as_deref(),
    )
    .await
}

/// Apply an update. The owning component and tool kit are frozen once any
/// code update links to the request.
pub async fn update_change_request(
    conn: &mut SqliteConnection,
    external_id: &str,
    update: &ChangeRequestUpdate,
) -> Result<()> {
    const ORIGIN: &str = "change_request::update_change_request";

    let row = sqlx::query(
        "SELECT id, component_id, tool_kit_id, status, severity, description FROM change_requests WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        TkError::not_found(ORIGIN, format!("change request '{}' does not exist", external_id))
    })?;

    let id: i64 = row.get("id");
    let mut component_id: Option<i64> = row.get("component_id");
    let mut tool_kit_id: Option<i64> = row.get("tool_kit_id");

    let new_component = match &update.component {
        Some(name) => Some(toolkit::component_id(conn, name).await?),
        None => None,
    };
    let new_tool_kit = match &update.tool_kit {
        Some(name) => Some(toolkit::tool_kit_id(conn, name).await?),
        None => None,
    };
    let owner_changes = new_component.is_some_and(|c| Some(c) != component_id)
        || new_tool_kit.is_some_and(|t| Some(t) != tool_kit_id);

    if owner_changes {
        let linked: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM code_update_change_requests WHERE change_request_id = ?",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        if linked > 0 {
            return Err(TkError::invalid(
                ORIGIN,
                format!(
                    "change request '{}' has {} linked code update(s); its component and tool kit cannot change",
                    external_id, linked
                ),
            ));
        }
        component_id = new_component.or(component_id);
        tool_kit_id = new_tool_kit.or(tool_kit_id);
    }

    let status = match update.status {
        Some(s) => s.as_str().to_string(),
        None => row.get("status"),
    };
    let severity = match update.severity {
        Some(s) => {
            check_severity(ORIGIN, s)?;
            s
        }
        None => row.get("severity"),
    };
    let description: String = match &update.description {
        Some(d) => d.clone(),
        None => row.get("description"),
    };

    sqlx::query(
        r#"
        UPDATE change_requests
        SET component_id = ?, tool_kit_id = ?, status = ?, severity = ?, description = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(component_id)
    .bind(tool_kit_id)
    .bind(status)
    .bind(severity)
    .bind(description)
    .bind(chrono::Utc::now().timestamp())
    .bind(id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_change_request(
    conn: &mut SqliteConnection,
    external_id: &str,
) -> Result<ChangeRequestRecord> {
    let row = sqlx::query(
        r#"
        SELECT cr.id, cr.external_id, c.name AS component, tk.name AS tool_kit,
               cr.status, cr.cr_type, cr.severity, cr.description, cr.user_id
        FROM change_requests cr
        LEFT JOIN components c ON c.id = cr.component_id
        LEFT JOIN tool_kits tk ON tk.id = cr.tool_kit_id
        WHERE cr.external_id = ?
        "#,
    )
    .bind(external_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| {
        TkError::not_found(
            "change_request::get_change_request",
            format!("change request '{}' does not exist", external_id),
        )
    })?;

    let id: i64 = row.get("id");
    let code_update_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT code_update_id FROM code_update_change_requests WHERE change_request_id = ? ORDER BY code_update_id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ChangeRequestRecord {
        id,
        external_id: row.get("external_id"),
        component: row.get("component"),
        tool_kit: row.get("tool_kit"),
        status: row.get("status"),
        cr_type: row.get("cr_type"),
        severity: row.get("severity"),
        description: row.get("description"),
        user_id: row.get("user_id"),
        code_update_ids,
    })
}

fn check_severity(origin: &'static str, severity: i64) -> Result<()> {
    if !(1..=LOWEST_SEVERITY).contains(&severity) {
        return Err(TkError::invalid(
            origin,
            format!("severity must be between 1 and {}, got {}", LOWEST_SEVERITY, severity),
        ));
    }
    Ok(())
}
