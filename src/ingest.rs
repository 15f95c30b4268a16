//! Code-update ingestion.
//!
//! Runs the post-commit flow: transcript → changed-file sets → branch →
//! tool-kit fan-out → change requests → one code update per tool kit. All
//! database writes share a single transaction; the `DB_ID` lines are
//! appended to the transcript only after it commits.

use sqlx::{SqliteConnection, SqlitePool};
use std::path::Path;

use crate::branch::resolve_branch;
use crate::change_request::{resolve_change_requests, ChangeRequestMap};
use crate::changes::ChangedFileSet;
use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::Result;
use crate::models::{BranchName, CommitTranscript, FileAction, ToolKitTarget};
use crate::toolkit;
use crate::transcript::{append_db_ids, read_transcript, ParseOutcome};

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Ingested(IngestReport),
    /// The transcript already carries `DB_ID` lines; nothing was written.
    AlreadyProcessed { code_update_ids: Vec<i64> },
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub component: String,
    pub revision: String,
    pub branch: BranchName,
    pub code_updates: Vec<CreatedCodeUpdate>,
}

impl IngestReport {
    pub fn code_update_ids(&self) -> Vec<i64> {
        self.code_updates.iter().map(|cu| cu.id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CreatedCodeUpdate {
    pub id: i64,
    pub tool_kit: String,
    pub file_versions: usize,
    pub change_request_id: Option<i64>,
}

/// CLI entry point for `tkt ingest --file <path>`.
///
/// The transcript is read before the database is opened, so an already
/// processed file never touches the database.
pub async fn run_ingest(config: &Config, file: &Path) -> anyhow::Result<IngestOutcome> {
    println!("ingest {}", file.display());

    let transcript = match read_transcript(file, &config.ingest)? {
        ParseOutcome::Transcript(t) => t,
        ParseOutcome::AlreadyProcessed { code_update_ids } => {
            println!(
                "  already processed (code updates: {})",
                join_ids(&code_update_ids)
            );
            return Ok(already_processed(file, code_update_ids));
        }
    };

    let pool = db::connect(config).await?;
    let report = ingest_and_mark(&pool, file, &transcript, &config.ingest).await;
    pool.close().await;
    let report = report?;

    println!("  component: {}", report.component);
    println!("  revision: {}", report.revision);
    println!("  branch: {}", report.branch);
    for cu in &report.code_updates {
        println!(
            "  code update {} -> {} ({} files{})",
            cu.id,
            cu.tool_kit,
            cu.file_versions,
            if cu.change_request_id.is_some() {
                ", change request linked"
            } else {
                ""
            }
        );
    }
    println!("ok");

    Ok(IngestOutcome::Ingested(report))
}

/// Parse, ingest, and mark a transcript file.
pub async fn ingest_file(
    pool: &SqlitePool,
    path: &Path,
    cfg: &IngestConfig,
) -> Result<IngestOutcome> {
    match read_transcript(path, cfg)? {
        ParseOutcome::Transcript(t) => {
            let report = ingest_and_mark(pool, path, &t, cfg).await?;
            Ok(IngestOutcome::Ingested(report))
        }
        ParseOutcome::AlreadyProcessed { code_update_ids } => {
            Ok(already_processed(path, code_update_ids))
        }
    }
}

fn already_processed(path: &Path, code_update_ids: Vec<i64>) -> IngestOutcome {
    tracing::info!(
        file = %path.display(),
        "transcript already processed, nothing to do"
    );
    IngestOutcome::AlreadyProcessed { code_update_ids }
}

/// Ingest a parsed transcript, then append its `DB_ID` lines to `path`.
pub async fn ingest_and_mark(
    pool: &SqlitePool,
    path: &Path,
    transcript: &CommitTranscript,
    cfg: &IngestConfig,
) -> Result<IngestReport> {
    let report = ingest_transcript(pool, transcript, cfg).await?;

    // Committed at this point; a failure here leaves the rows in place.
    if let Err(e) = append_db_ids(path, &report.code_update_ids()) {
        tracing::error!(
            file = %path.display(),
            ids = %join_ids(&report.code_update_ids()),
            "code updates committed but transcript could not be marked"
        );
        return Err(e);
    }

    Ok(report)
}

/// Write one code update per affected tool kit inside a single transaction.
pub async fn ingest_transcript(
    pool: &SqlitePool,
    transcript: &CommitTranscript,
    cfg: &IngestConfig,
) -> Result<IngestReport> {
    let files = ChangedFileSet::from_changes(&transcript.changes);
    let branch = resolve_branch(transcript.changes.iter().map(|c| c.path.as_str()))?;
    tracing::debug!(
        component = %transcript.component,
        revision = %transcript.revision,
        branch = %branch,
        added = files.added.len(),
        updated = files.updated.len(),
        deleted = files.deleted.len(),
        "parsed commit transcript"
    );

    let mut tx = pool.begin().await?;
    match stage_code_updates(&mut *tx, transcript, &branch, &files, cfg).await {
        Ok(code_updates) => {
            tx.commit().await?;
            for cu in &code_updates {
                tracing::info!(
                    code_update = cu.id,
                    tool_kit = %cu.tool_kit,
                    revision = %transcript.revision,
                    "code update recorded"
                );
            }
            Ok(IngestReport {
                component: transcript.component.clone(),
                revision: transcript.revision.clone(),
                branch,
                code_updates,
            })
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                tracing::error!(error = %rb, "rollback failed");
            }
            tracing::warn!(error = %e, revision = %transcript.revision, "ingestion rolled back");
            Err(e)
        }
    }
}

async fn stage_code_updates(
    conn: &mut SqliteConnection,
    transcript: &CommitTranscript,
    branch: &BranchName,
    files: &ChangedFileSet,
    cfg: &IngestConfig,
) -> Result<Vec<CreatedCodeUpdate>> {
    let targets = toolkit::fan_out(conn, &transcript.component, branch).await?;
    let change_requests = resolve_change_requests(conn, transcript, &targets, cfg).await?;

    let mut created = Vec::with_capacity(targets.len());
    for target in &targets {
        let cu =
            write_code_update(conn, transcript, branch, files, target, &change_requests).await?;
        created.push(cu);
    }
    Ok(created)
}

async fn write_code_update(
    conn: &mut SqliteConnection,
    transcript: &CommitTranscript,
    branch: &BranchName,
    files: &ChangedFileSet,
    target: &ToolKitTarget,
    change_requests: &ChangeRequestMap,
) -> Result<CreatedCodeUpdate> {
    let code_update_id = sqlx::query(
        r#"
        INSERT INTO code_updates
            (component_id, tool_kit_id, repository, revision, branch, description,
             user_id, committed_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(target.component_id)
    .bind(target.tool_kit_id)
    .bind(&transcript.repository)
    .bind(&transcript.revision)
    .bind(branch.as_str())
    .bind(&transcript.abstract_text)
    .bind(&transcript.user)
    .bind(transcript.committed_at.and_utc().timestamp())
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let mut file_versions = 0;
    for (path, action) in files.entries() {
        let file_name_id = file_name_id(conn, path).await?;
        insert_file_version(conn, code_update_id, file_name_id, action).await?;
        file_versions += 1;
    }

    let change_request_id = change_requests.get(&target.tool_kit_name).copied();
    if let Some(cr_id) = change_request_id {
        sqlx::query(
            "INSERT INTO code_update_change_requests (code_update_id, change_request_id) VALUES (?, ?)",
        )
        .bind(code_update_id)
        .bind(cr_id)
        .execute(&mut *conn)
        .await?;
    }

    Ok(CreatedCodeUpdate {
        id: code_update_id,
        tool_kit: target.tool_kit_name.clone(),
        file_versions,
        change_request_id,
    })
}

/// Look up a file name, creating it on first sight.
async fn file_name_id(conn: &mut SqliteConnection, path: &str) -> Result<i64> {
    sqlx::query("INSERT INTO file_names (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(path)
        .execute(&mut *conn)
        .await?;
    let id = sqlx::query_scalar("SELECT id FROM file_names WHERE name = ?")
        .bind(path)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

async fn insert_file_version(
    conn: &mut SqliteConnection,
    code_update_id: i64,
    file_name_id: i64,
    action: FileAction,
) -> Result<()> {
    sqlx::query("INSERT INTO file_versions (code_update_id, file_name_id, action) VALUES (?, ?, ?)")
        .bind(code_update_id)
        .bind(file_name_id)
        .bind(action.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
