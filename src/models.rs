//! Core data models used throughout the tracker.
//!
//! These types represent the commit transcripts, branches, change requests
//! and code updates that flow through ingestion and reporting.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a commit did to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Add,
    Update,
    Delete,
}

impl FileAction {
    /// Map an SVN change-type code to an action.
    ///
    /// `A` adds, `D` deletes; `U` (content), `UU` (content and properties),
    /// `_U` (properties only) and `R` (replaced) all count as updates.
    pub fn from_code(code: &str) -> Option<FileAction> {
        match code {
            "A" => Some(FileAction::Add),
            "D" => Some(FileAction::Delete),
            "U" | "UU" | "_U" | "R" => Some(FileAction::Update),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Add => "add",
            FileAction::Update => "update",
            FileAction::Delete => "delete",
        }
    }
}

impl FromStr for FileAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(FileAction::Add),
            "update" => Ok(FileAction::Update),
            "delete" => Ok(FileAction::Delete),
            other => Err(format!("unknown file action '{}'", other)),
        }
    }
}

/// One `CHANGED | code | path` line, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub action: FileAction,
    pub path: String,
}

/// Post-commit hook protocol version, compared as `major.minor`.
///
/// Accepts `2`, `2.1` and `2.1.7` (patch ignored). `2.10` is newer than `2.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct HookVersion {
    pub major: u32,
    pub minor: u32,
}

impl HookVersion {
    /// What a transcript without a `VERSION` line is taken to be.
    pub const UNVERSIONED: HookVersion = HookVersion::new(0, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for HookVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("invalid hook version '{}' (expected major.minor)", s);
        let mut parts = s.trim().split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(bad)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => 0,
        };
        if let Some(patch) = parts.next() {
            patch.parse::<u32>().map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for HookVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for HookVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Parsed hook data file.
#[derive(Debug, Clone)]
pub struct CommitTranscript {
    pub hook_version: HookVersion,
    pub repository: Option<String>,
    pub component: String,
    pub change_request: String,
    pub revision: String,
    pub user: String,
    pub commit_date: String,
    pub commit_time: String,
    pub committed_at: NaiveDateTime,
    pub abstract_text: String,
    pub changes: Vec<FileChange>,
}

/// The logical line of development a commit landed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BranchName {
    Trunk,
    Branch(String),
}

impl BranchName {
    pub const TRUNK: &'static str = "trunk";

    pub fn as_str(&self) -> &str {
        match self {
            BranchName::Trunk => Self::TRUNK,
            BranchName::Branch(name) => name,
        }
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release-train lifecycle stage. Only `Development` receives new code updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKitStage {
    Development,
    Released,
    Frozen,
}

impl ToolKitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKitStage::Development => "development",
            ToolKitStage::Released => "released",
            ToolKitStage::Frozen => "frozen",
        }
    }
}

impl FromStr for ToolKitStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" => Ok(ToolKitStage::Development),
            "released" => Ok(ToolKitStage::Released),
            "frozen" => Ok(ToolKitStage::Frozen),
            other => Err(format!(
                "unknown tool kit stage '{}'. Must be development, released, or frozen",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrStatus {
    Submitted,
    Approved,
    Working,
    Complete,
    Rejected,
}

impl CrStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrStatus::Submitted => "submitted",
            CrStatus::Approved => "approved",
            CrStatus::Working => "working",
            CrStatus::Complete => "complete",
            CrStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for CrStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "submitted" => Ok(CrStatus::Submitted),
            "approved" => Ok(CrStatus::Approved),
            "working" => Ok(CrStatus::Working),
            "complete" => Ok(CrStatus::Complete),
            "rejected" => Ok(CrStatus::Rejected),
            other => Err(format!("unknown change request status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrType {
    Feature,
    Defect,
}

impl CrType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrType::Feature => "feature",
            CrType::Defect => "defect",
        }
    }
}

impl FromStr for CrType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feature" => Ok(CrType::Feature),
            "defect" => Ok(CrType::Defect),
            other => Err(format!("unknown change request type '{}'", other)),
        }
    }
}

/// Lowest change request severity; used for informal developer requests.
pub const LOWEST_SEVERITY: i64 = 4;

/// A tool kit that receives a code update for the current commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolKitTarget {
    pub tool_kit_id: i64,
    pub tool_kit_name: String,
    pub component_id: i64,
}

/// A change request as stored.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRequestRecord {
    pub id: i64,
    pub external_id: String,
    pub component: Option<String>,
    pub tool_kit: Option<String>,
    pub status: String,
    pub cr_type: String,
    pub severity: i64,
    pub description: String,
    pub user_id: Option<String>,
    pub code_update_ids: Vec<i64>,
}

/// One file touched by a code update.
#[derive(Debug, Clone, Serialize)]
pub struct FileVersionRecord {
    pub path: String,
    pub action: FileAction,
}

/// A code update as stored, with its files and linked change requests.
#[derive(Debug, Clone, Serialize)]
pub struct CodeUpdateRecord {
    pub id: i64,
    pub component: String,
    pub tool_kit: String,
    pub repository: Option<String>,
    pub revision: String,
    pub branch: String,
    pub description: String,
    pub user_id: String,
    pub committed_at: String,
    pub files: Vec<FileVersionRecord>,
    pub change_requests: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_codes() {
        assert_eq!(FileAction::from_code("A"), Some(FileAction::Add));
        assert_eq!(FileAction::from_code("D"), Some(FileAction::Delete));
        for code in ["U", "UU", "_U", "R"] {
            assert_eq!(FileAction::from_code(code), Some(FileAction::Update));
        }
        assert_eq!(FileAction::from_code("X"), None);
        assert_eq!(FileAction::from_code("a"), None);
    }

    #[test]
    fn test_branch_labels() {
        assert_eq!(BranchName::Trunk.to_string(), "trunk");
        assert_eq!(BranchName::Branch("rel_14".into()).as_str(), "rel_14");
    }

    #[test]
    fn test_hook_version_compares_numerically() {
        let v = |s: &str| s.parse::<HookVersion>().unwrap();
        assert!(v("2.10") > v("2.9"));
        assert!(v("2.05") < v("2.5"));
        assert_eq!(v("2.05"), HookVersion::new(2, 5));
        assert_eq!(v("2"), HookVersion::new(2, 0));
        assert_eq!(v("2.1.7"), v("2.1"));
        assert_eq!(v("2.10").to_string(), "2.10");
        for bad in ["", "two", "2.x", "2.1.7.1", "-1.0"] {
            assert!(bad.parse::<HookVersion>().is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!("Approved".parse::<CrStatus>(), Ok(CrStatus::Approved));
        assert_eq!("DEFECT".parse::<CrType>(), Ok(CrType::Defect));
        assert_eq!(
            "Development".parse::<ToolKitStage>(),
            Ok(ToolKitStage::Development)
        );
        assert!("shipped".parse::<ToolKitStage>().is_err());
    }
}
