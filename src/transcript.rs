//! Commit transcript parsing.
//!
//! The post-commit hook writes one data file per commit:
//!
//! ```text
//! VERSION | 2.1
//! REPOSITORY | chipkit
//! COMPONENT | widget
//! CR | N/A
//! REVISION | 18342
//! USER | jdoe
//! DATE | 2024-03-05
//! TIME | 14:22:01
//! <ABSTRACT>
//! Fix clock gating in the widget netlist writer.
//! </ABSTRACT>
//! CHANGED | A | trunk/src/foo.c
//! CHANGED | U | trunk/src/bar.c
//! ```
//!
//! Hooks older than the configured version write the abstract as a single
//! `ABSTRACT | text` line instead of the block. After ingestion one
//! `DB_ID | <id> |` line per code update is appended; a file that already
//! carries one is reported as [`ParseOutcome::AlreadyProcessed`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::io::Write;
use std::path::Path;

use crate::config::IngestConfig;
use crate::error::{Result, TkError};
use crate::models::{CommitTranscript, FileAction, FileChange, HookVersion};

const ORIGIN: &str = "transcript::parse_transcript";

pub const TAG_VERSION: &str = "VERSION";
pub const TAG_REPOSITORY: &str = "REPOSITORY";
pub const TAG_COMPONENT: &str = "COMPONENT";
pub const TAG_CR: &str = "CR";
pub const TAG_REVISION: &str = "REVISION";
pub const TAG_USER: &str = "USER";
pub const TAG_DATE: &str = "DATE";
pub const TAG_TIME: &str = "TIME";
pub const TAG_CHANGED: &str = "CHANGED";
pub const TAG_ABSTRACT: &str = "ABSTRACT";
pub const TAG_DB_ID: &str = "DB_ID";
pub const ABSTRACT_START: &str = "<ABSTRACT>";
pub const ABSTRACT_END: &str = "</ABSTRACT>";

#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Transcript(CommitTranscript),
    /// The file was ingested by an earlier run.
    AlreadyProcessed { code_update_ids: Vec<i64> },
}

/// Read and parse a transcript file.
pub fn read_transcript(path: &Path, cfg: &IngestConfig) -> Result<ParseOutcome> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TkError::from(e).with_payload(format!("transcript: {}", path.display()))
    })?;
    parse_transcript(&text, cfg)
}

pub fn parse_transcript(text: &str, cfg: &IngestConfig) -> Result<ParseOutcome> {
    let tags = tag_lines(text);

    let markers: Vec<&String> = tags
        .iter()
        .filter(|(tag, _)| tag == TAG_DB_ID)
        .map(|(_, value)| value)
        .collect();
    if !markers.is_empty() {
        return Ok(ParseOutcome::AlreadyProcessed {
            code_update_ids: markers.iter().filter_map(|v| v.parse().ok()).collect(),
        });
    }

    let hook_version = detect_version(&tags)?;
    let legacy = hook_version < cfg.legacy_abstract_below;

    let mut fields = Fields::default();
    let mut changes: Vec<FileChange> = Vec::new();
    let mut abstract_text: Option<String> = None;
    let mut block: Option<Vec<&str>> = None;

    for raw in text.lines() {
        let line = raw.trim_end_matches('\r');

        if let Some(lines) = block.as_mut() {
            if line.trim() == ABSTRACT_END {
                abstract_text = Some(lines.join("\n").trim().to_string());
                block = None;
            } else {
                lines.push(line);
            }
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ABSTRACT_START {
            if legacy {
                return Err(TkError::format(
                    ORIGIN,
                    format!(
                        "abstract block not supported by hook version {} (expected '{} | text')",
                        hook_version, TAG_ABSTRACT
                    ),
                ));
            }
            if abstract_text.is_some() {
                return Err(TkError::format(ORIGIN, "abstract given more than once"));
            }
            block = Some(Vec::new());
            continue;
        }
        if trimmed == ABSTRACT_END {
            return Err(TkError::format(ORIGIN, "abstract end marker without start")
                .with_payload(trimmed));
        }

        let (tag, value) = split_tag(trimmed).ok_or_else(|| {
            TkError::format(ORIGIN, "unrecognized transcript line").with_payload(trimmed)
        })?;

        match tag.as_str() {
            TAG_VERSION => {}
            TAG_REPOSITORY => set_once(&mut fields.repository, tag.as_str(), value)?,
            TAG_COMPONENT => set_once(&mut fields.component, tag.as_str(), value)?,
            TAG_CR => set_once(&mut fields.change_request, tag.as_str(), value)?,
            TAG_REVISION => set_once(&mut fields.revision, tag.as_str(), value)?,
            TAG_USER => set_once(&mut fields.user, tag.as_str(), value)?,
            TAG_DATE => set_once(&mut fields.date, tag.as_str(), value)?,
            TAG_TIME => set_once(&mut fields.time, tag.as_str(), value)?,
            TAG_ABSTRACT => {
                if !legacy {
                    return Err(TkError::format(
                        ORIGIN,
                        format!(
                            "hook version {} requires an {} block",
                            hook_version, ABSTRACT_START
                        ),
                    )
                    .with_payload(trimmed));
                }
                set_once(&mut abstract_text, tag.as_str(), value)?;
            }
            TAG_CHANGED => changes.push(parse_change(trimmed)?),
            _ => {
                return Err(
                    TkError::format(ORIGIN, format!("unknown tag '{}'", tag)).with_payload(trimmed)
                );
            }
        }
    }

    if block.is_some() {
        return Err(TkError::format(
            ORIGIN,
            format!("{} block is not terminated", ABSTRACT_START),
        ));
    }

    let component = require(fields.component, TAG_COMPONENT)?;
    let change_request = require(fields.change_request, TAG_CR)?;
    let revision = require(fields.revision, TAG_REVISION)?;
    let user = require(fields.user, TAG_USER)?;
    let commit_date = require(fields.date, TAG_DATE)?;
    let commit_time = require(fields.time, TAG_TIME)?;
    if changes.is_empty() {
        return Err(TkError::format(
            ORIGIN,
            format!("transcript has no {} lines", TAG_CHANGED),
        ));
    }
    let committed_at = parse_timestamp(&commit_date, &commit_time)?;

    Ok(ParseOutcome::Transcript(CommitTranscript {
        hook_version,
        repository: fields.repository,
        component,
        change_request,
        revision,
        user,
        commit_date,
        commit_time,
        committed_at,
        abstract_text: abstract_text.unwrap_or_default(),
        changes,
    }))
}

#[derive(Default)]
struct Fields {
    repository: Option<String>,
    component: Option<String>,
    change_request: Option<String>,
    revision: Option<String>,
    user: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

/// Split `TAG | value |` into an upper-cased tag and a trimmed value.
fn split_tag(line: &str) -> Option<(String, String)> {
    let (tag, rest) = line.split_once('|')?;
    let tag = tag.trim();
    if tag.is_empty()
        || !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((tag.to_ascii_uppercase(), clean_value(rest)))
}

fn clean_value(raw: &str) -> String {
    raw.trim().trim_end_matches('|').trim().to_string()
}

fn set_once(slot: &mut Option<String>, tag: &str, value: String) -> Result<()> {
    if slot.is_some() {
        return Err(TkError::format(ORIGIN, format!("{} given more than once", tag)));
    }
    *slot = Some(value);
    Ok(())
}

fn require(slot: Option<String>, tag: &str) -> Result<String> {
    match slot {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(TkError::format(
            ORIGIN,
            format!("missing required field {}", tag),
        )),
    }
}

fn parse_change(line: &str) -> Result<FileChange> {
    let (_, rest) = line.split_once('|').unwrap_or((line, ""));
    let (code, path) = rest.split_once('|').ok_or_else(|| {
        TkError::format(ORIGIN, "CHANGED line needs a type and a path").with_payload(line)
    })?;
    let code = code.trim();
    let path = clean_value(path);

    let action = FileAction::from_code(code).ok_or_else(|| {
        TkError::format(ORIGIN, format!("unknown change type '{}'", code)).with_payload(line)
    })?;
    if path.is_empty() {
        return Err(TkError::format(ORIGIN, "CHANGED line has an empty path").with_payload(line));
    }

    Ok(FileChange { action, path })
}

/// Tagged lines outside any abstract block, so commit messages that happen
/// to contain `TAG | value` text are never mistaken for fields.
fn tag_lines(text: &str) -> Vec<(String, String)> {
    let mut in_block = false;
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if in_block {
            in_block = trimmed != ABSTRACT_END;
            continue;
        }
        if trimmed == ABSTRACT_START {
            in_block = true;
            continue;
        }
        if let Some(pair) = split_tag(trimmed) {
            out.push(pair);
        }
    }
    out
}

/// Hook version, decided once for the whole file. Missing means legacy.
fn detect_version(tags: &[(String, String)]) -> Result<HookVersion> {
    let mut version: Option<HookVersion> = None;
    for (tag, value) in tags {
        if tag != TAG_VERSION {
            continue;
        }
        if version.is_some() {
            return Err(TkError::format(ORIGIN, "VERSION given more than once"));
        }
        let parsed: HookVersion = value
            .parse()
            .map_err(|e: String| TkError::format(ORIGIN, e))?;
        version = Some(parsed);
    }
    Ok(version.unwrap_or(HookVersion::UNVERSIONED))
}

fn parse_timestamp(date: &str, time: &str) -> Result<NaiveDateTime> {
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%m/%d/%Y"))
        .map_err(|_| TkError::format(ORIGIN, format!("unparseable commit date '{}'", date)))?;
    let t = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .map_err(|_| TkError::format(ORIGIN, format!("unparseable commit time '{}'", time)))?;
    Ok(d.and_time(t))
}

/// Append one `DB_ID | <id> |` line per code update so the hook can report
/// the new identifiers back to the committer.
pub fn append_db_ids(path: &Path, code_update_ids: &[i64]) -> Result<()> {
    let existing = std::fs::read(path)?;
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    if !existing.is_empty() && !existing.ends_with(b"\n") {
        writeln!(file)?;
    }
    for id in code_update_ids {
        writeln!(file, "{} | {} |", TAG_DB_ID, id)?;
    }
    file.flush()?;
    Ok(())
}
