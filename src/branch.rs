//! Branch inference from changed paths.
//!
//! Repository layout is `trunk/...`, `branches/<name>/...`, or a bare
//! top-level directory that names the branch itself. A commit is expected to
//! stay on one branch; when paths disagree the resolution below picks a
//! winner instead of rejecting the commit.

use crate::error::{Result, TkError};
use crate::models::BranchName;

const TRUNK: &str = "trunk";
const BRANCHES: &str = "branches";

/// Resolve the branch a commit landed on.
///
/// - any `trunk/...` path wins outright;
/// - otherwise the last `branches/<name>/...` path names the branch;
/// - otherwise the last bare first segment (or a lone `branches`) is used.
pub fn resolve_branch<'a, I>(paths: I) -> Result<BranchName>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut candidate: Option<String> = None;
    let mut fallback: Option<String> = None;
    let mut seen_any = false;

    for path in paths {
        seen_any = true;
        let mut segments = path.trim_start_matches('/').split('/');
        let first = segments.next().unwrap_or("");
        match first {
            TRUNK => return Ok(BranchName::Trunk),
            BRANCHES => match segments.next().filter(|s| !s.is_empty()) {
                Some(name) => candidate = Some(name.to_string()),
                None => {
                    if candidate.is_none() {
                        fallback = Some(BRANCHES.to_string());
                    }
                }
            },
            "" => {}
            other => fallback = Some(other.to_string()),
        }
    }

    if !seen_any {
        return Err(TkError::format(
            "branch::resolve_branch",
            "commit has no changed paths to infer a branch from",
        ));
    }

    candidate
        .or(fallback)
        .map(BranchName::Branch)
        .ok_or_else(|| {
            TkError::format(
                "branch::resolve_branch",
                "changed paths have no top-level directory",
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::Branch(name.to_string())
    }

    #[test]
    fn test_trunk_wins_regardless_of_order() {
        let paths = ["branches/foo/a.c", "widget/b.c", "trunk/c.c", "branches/bar/d.c"];
        assert_eq!(resolve_branch(paths).unwrap(), BranchName::Trunk);
    }

    #[test]
    fn test_branches_second_segment() {
        assert_eq!(resolve_branch(["branches/foo/bar"]).unwrap(), branch("foo"));
    }

    #[test]
    fn test_bare_segment_is_branch() {
        assert_eq!(resolve_branch(["widget/file.c"]).unwrap(), branch("widget"));
    }

    #[test]
    fn test_leading_slash_ignored() {
        assert_eq!(resolve_branch(["/trunk/x.c"]).unwrap(), BranchName::Trunk);
    }

    #[test]
    fn test_last_branch_candidate_wins() {
        let paths = ["branches/first/a.c", "branches/second/b.c"];
        assert_eq!(resolve_branch(paths).unwrap(), branch("second"));
    }

    #[test]
    fn test_branch_candidate_beats_bare_segment() {
        let paths = ["branches/rel_2/a.c", "widget/b.c"];
        assert_eq!(resolve_branch(paths).unwrap(), branch("rel_2"));
    }

    #[test]
    fn test_lone_branches_label() {
        assert_eq!(resolve_branch(["branches"]).unwrap(), branch("branches"));
        assert_eq!(
            resolve_branch(["branches", "branches/rel_3/x"]).unwrap(),
            branch("rel_3")
        );
    }

    #[test]
    fn test_mixed_bare_segments_pick_last() {
        assert_eq!(
            resolve_branch(["alpha/a.c", "beta/b.c"]).unwrap(),
            branch("beta")
        );
    }

    #[test]
    fn test_empty_list_is_format_error() {
        let err = resolve_branch(std::iter::empty()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Format);
    }
}
