//! Per tool kit / component summary.
//!
//! Rows are read from the database as a flat stream of [`Fact`]s and folded
//! into a [`Summary`]; the fold is pure so it can be tested without a
//! database.

use serde::Serialize;
use sqlx::{Row, SqliteConnection};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ErrorKind, Result, TkError};
use crate::models::FileAction;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportKey {
    pub tool_kit: String,
    pub component: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    CodeUpdate,
    File(FileAction),
    ChangeRequest(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub code_updates: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub change_requests: BTreeSet<String>,
}

impl Tally {
    fn record(mut self, fact: Fact) -> Self {
        match fact {
            Fact::CodeUpdate => self.code_updates += 1,
            Fact::File(FileAction::Add) => self.files_added += 1,
            Fact::File(FileAction::Update) => self.files_updated += 1,
            Fact::File(FileAction::Delete) => self.files_deleted += 1,
            Fact::ChangeRequest(id) => {
                self.change_requests.insert(id);
            }
        }
        self
    }
}

pub type Summary = BTreeMap<ReportKey, Tally>;

/// Fold one fact into a summary, returning the new summary.
pub fn accumulate(mut summary: Summary, key: ReportKey, fact: Fact) -> Summary {
    let tally = summary.remove(&key).unwrap_or_default().record(fact);
    summary.insert(key, tally);
    summary
}

pub fn summarize<I>(facts: I) -> Summary
where
    I: IntoIterator<Item = (ReportKey, Fact)>,
{
    facts
        .into_iter()
        .fold(Summary::new(), |acc, (key, fact)| accumulate(acc, key, fact))
}

/// Flattened summary line for display and JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub tool_kit: String,
    pub component: String,
    pub code_updates: u64,
    pub files_added: u64,
    pub files_updated: u64,
    pub files_deleted: u64,
    pub change_requests: usize,
}

pub fn rows(summary: &Summary) -> Vec<ReportRow> {
    summary
        .iter()
        .map(|(key, t)| ReportRow {
            tool_kit: key.tool_kit.clone(),
            component: key.component.clone(),
            code_updates: t.code_updates,
            files_added: t.files_added,
            files_updated: t.files_updated,
            files_deleted: t.files_deleted,
            change_requests: t.change_requests.len(),
        })
        .collect()
}

/// Read every fact for the (optionally filtered) tool kit and fold them.
pub async fn build_summary(
    conn: &mut SqliteConnection,
    tool_kit: Option<&str>,
) -> Result<Summary> {
    let mut facts: Vec<(ReportKey, Fact)> = Vec::new();

    let code_updates = sqlx::query(
        r#"
        SELECT tk.name AS tool_kit, c.name AS component
        FROM code_updates cu
        JOIN tool_kits tk ON tk.id = cu.tool_kit_id
        JOIN components c ON c.id = cu.component_id
        WHERE (? IS NULL OR tk.name = ?)
        "#,
    )
    .bind(tool_kit)
    .bind(tool_kit)
    .fetch_all(&mut *conn)
    .await?;
    for row in &code_updates {
        facts.push((key_of(row), Fact::CodeUpdate));
    }

    let files = sqlx::query(
        r#"
        SELECT tk.name AS tool_kit, c.name AS component, fv.action
        FROM file_versions fv
        JOIN code_updates cu ON cu.id = fv.code_update_id
        JOIN tool_kits tk ON tk.id = cu.tool_kit_id
        JOIN components c ON c.id = cu.component_id
        WHERE (? IS NULL OR tk.name = ?)
        "#,
    )
    .bind(tool_kit)
    .bind(tool_kit)
    .fetch_all(&mut *conn)
    .await?;
    for row in &files {
        let action: String = row.get("action");
        let action: FileAction = action.parse().map_err(|e: String| {
            TkError::new(ErrorKind::Persistence, "report::build_summary", e)
        })?;
        facts.push((key_of(row), Fact::File(action)));
    }

    let links = sqlx::query(
        r#"
        SELECT tk.name AS tool_kit, c.name AS component, cr.external_id
        FROM code_update_change_requests l
        JOIN code_updates cu ON cu.id = l.code_update_id
        JOIN change_requests cr ON cr.id = l.change_request_id
        JOIN tool_kits tk ON tk.id = cu.tool_kit_id
        JOIN components c ON c.id = cu.component_id
        WHERE (? IS NULL OR tk.name = ?)
        "#,
    )
    .bind(tool_kit)
    .bind(tool_kit)
    .fetch_all(&mut *conn)
    .await?;
    for row in &links {
        facts.push((key_of(row), Fact::ChangeRequest(row.get("external_id"))));
    }

    Ok(summarize(facts))
}

fn key_of(row: &sqlx::sqlite::SqliteRow) -> ReportKey {
    ReportKey {
        tool_kit: row.get("tool_kit"),
        component: row.get("component"),
    }
}

pub fn print_report(rows: &[ReportRow]) {
    println!(
        "  {:<16} {:<16} {:>7} {:>6} {:>8} {:>8} {:>5}",
        "TOOL KIT", "COMPONENT", "UPDATES", "ADDED", "UPDATED", "DELETED", "CRS"
    );
    println!("  {}", "-".repeat(72));
    for r in rows {
        println!(
            "  {:<16} {:<16} {:>7} {:>6} {:>8} {:>8} {:>5}",
            r.tool_kit,
            r.component,
            r.code_updates,
            r.files_added,
            r.files_updated,
            r.files_deleted,
            r.change_requests
        );
    }
}
