//! Reconciliation of a commit's change list into add/update/delete sets.

use std::collections::BTreeSet;

use crate::models::{FileAction, FileChange};

/// Paths touched by one commit, split into three disjoint sets.
///
/// Changes must be applied in transcript order: a later action on the same
/// path moves it between sets rather than adding a second entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFileSet {
    pub added: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangedFileSet {
    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut set = Self::default();
        for change in changes {
            set.apply(change.action, &change.path);
        }
        set
    }

    pub fn apply(&mut self, action: FileAction, path: &str) {
        match action {
            FileAction::Add => {
                self.deleted.remove(path);
                self.updated.remove(path);
                self.added.insert(path.to_string());
            }
            FileAction::Delete => {
                self.added.remove(path);
                self.updated.remove(path);
                self.deleted.insert(path.to_string());
            }
            FileAction::Update => {
                // still new as far as this commit is concerned
                if self.added.contains(path) {
                    return;
                }
                self.deleted.remove(path);
                self.updated.insert(path.to_string());
            }
        }
    }

    /// Every path with the action it ends up recorded under, sorted by path.
    pub fn entries(&self) -> Vec<(&str, FileAction)> {
        let mut out: Vec<(&str, FileAction)> = self
            .added
            .iter()
            .map(|p| (p.as_str(), FileAction::Add))
            .chain(self.updated.iter().map(|p| (p.as_str(), FileAction::Update)))
            .chain(self.deleted.iter().map(|p| (p.as_str(), FileAction::Delete)))
            .collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(code: &str, path: &str) -> FileChange {
        FileChange {
            action: FileAction::from_code(code).unwrap(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_each_code_lands_in_exactly_one_set() {
        let changes = vec![
            change("A", "trunk/a.c"),
            change("D", "trunk/d.c"),
            change("U", "trunk/u.c"),
            change("UU", "trunk/uu.c"),
            change("_U", "trunk/props.c"),
            change("R", "trunk/r.c"),
        ];
        let set = ChangedFileSet::from_changes(&changes);
        assert_eq!(set.len(), 6);
        assert!(set.added.contains("trunk/a.c"));
        assert!(set.deleted.contains("trunk/d.c"));
        for p in ["trunk/u.c", "trunk/uu.c", "trunk/props.c", "trunk/r.c"] {
            assert!(set.updated.contains(p), "{} should be updated", p);
        }
        for (path, _) in set.entries() {
            let hits = [&set.added, &set.updated, &set.deleted]
                .iter()
                .filter(|s| s.contains(path))
                .count();
            assert_eq!(hits, 1, "{} appears in {} sets", path, hits);
        }
    }

    #[test]
    fn test_add_then_delete_moves_to_deleted() {
        let set = ChangedFileSet::from_changes(&[change("A", "p"), change("D", "p")]);
        assert!(set.deleted.contains("p"));
        assert!(!set.added.contains("p"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_delete_then_add_moves_to_added() {
        let set = ChangedFileSet::from_changes(&[change("D", "p"), change("A", "p")]);
        assert!(set.added.contains("p"));
        assert!(!set.deleted.contains("p"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_update_after_add_stays_added() {
        let set = ChangedFileSet::from_changes(&[change("A", "p"), change("U", "p")]);
        assert!(set.added.contains("p"));
        assert!(set.updated.is_empty());
    }

    #[test]
    fn test_update_after_delete_moves_to_updated() {
        let set = ChangedFileSet::from_changes(&[change("D", "p"), change("UU", "p")]);
        assert!(set.updated.contains("p"));
        assert!(!set.deleted.contains("p"));
        assert_eq!(set.entries(), vec![("p", FileAction::Update)]);
    }

    #[test]
    fn test_empty_change_list() {
        let set = ChangedFileSet::from_changes(&[]);
        assert!(set.is_empty());
        assert!(set.entries().is_empty());
        assert!(!ChangedFileSet::from_changes(&[change("A", "p")]).is_empty());
    }

    #[test]
    fn test_entries_sorted_by_path() {
        let set = ChangedFileSet::from_changes(&[
            change("U", "trunk/z.c"),
            change("A", "trunk/b.c"),
            change("D", "trunk/a.c"),
        ]);
        let paths: Vec<&str> = set.entries().iter().map(|(p, _)| *p).collect();
        assert_eq!(paths, vec!["trunk/a.c", "trunk/b.c", "trunk/z.c"]);
    }
}
