//! New / fixed / unchanged classification of issues between two runs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::parser::{LineMap, ParsedIssue};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDiff {
    /// Current handles with no counterpart in the reference.
    pub new: BTreeSet<String>,
    /// Reference handles with no counterpart in the current run.
    pub fixed: BTreeSet<String>,
    /// Current handles that match the reference.
    pub unchanged: BTreeSet<String>,
}

/// Plain set comparison of two handle sets.
pub fn diff_handles(current: &BTreeSet<String>, reference: &BTreeSet<String>) -> IssueDiff {
    IssueDiff {
        new: current.difference(reference).cloned().collect(),
        fixed: reference.difference(current).cloned().collect(),
        unchanged: current.intersection(reference).cloned().collect(),
    }
}

/// Compare current issues to reference handles, looking each current issue
/// up under its previous-revision location when a line map is given.
///
/// A current issue matches the reference under its translated handle, or
/// failing that under its own. `new` and `unchanged` hold current handles and
/// `fixed` holds reference handles; a reference handle that is still reported
/// verbatim by the current run is never fixed, so the three sets stay
/// disjoint.
pub fn diff_issues(
    current: &[ParsedIssue],
    reference: &BTreeSet<String>,
    linemap: Option<&LineMap>,
) -> IssueDiff {
    let mut diff = IssueDiff::default();
    let mut matched: BTreeSet<&str> = BTreeSet::new();

    for issue in current {
        let translated = linemap.map(|map| {
            let (file, line) = map.to_old(&issue.filename, issue.line);
            issue.handle_at(file, line)
        });
        let found = translated
            .as_ref()
            .and_then(|handle| reference.get(handle))
            .or_else(|| reference.get(&issue.handle));
        match found {
            Some(found) => {
                matched.insert(found.as_str());
                diff.unchanged.insert(issue.handle.clone());
            }
            None => {
                diff.new.insert(issue.handle.clone());
            }
        }
    }

    // Same handle reported twice in one run lands in one set only.
    diff.new.retain(|h| !diff.unchanged.contains(h));
    diff.fixed = reference
        .iter()
        .filter(|h| !matched.contains(h.as_str()))
        .filter(|h| !diff.unchanged.contains(*h) && !diff.new.contains(*h))
        .cloned()
        .collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::issue_handle;
    use crate::parser::LineMapEntry;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn issue(callable: &str, filename: &str, line: i64) -> ParsedIssue {
        ParsedIssue {
            handle: issue_handle("T", callable, filename, line, None),
            code: "T".into(),
            callable: callable.into(),
            message: String::new(),
            filename: filename.into(),
            line,
            kind: None,
            sources: vec![],
            sinks: vec![],
        }
    }

    #[test]
    fn test_handle_sets() {
        let diff = diff_handles(&set(&["B", "C"]), &set(&["A", "B"]));
        assert_eq!(diff.fixed, set(&["A"]));
        assert_eq!(diff.new, set(&["C"]));
        assert_eq!(diff.unchanged, set(&["B"]));
    }

    #[test]
    fn test_sets_are_disjoint_and_cover_inputs() {
        let current = set(&["x", "y", "z"]);
        let reference = set(&["w", "y"]);
        let diff = diff_handles(&current, &reference);
        assert!(diff.new.is_disjoint(&diff.unchanged));
        let covered: BTreeSet<String> = diff.new.union(&diff.unchanged).cloned().collect();
        assert_eq!(covered, current);
        let covered: BTreeSet<String> = diff.fixed.union(&diff.unchanged).cloned().collect();
        assert_eq!(covered, reference);
    }

    #[test]
    fn test_issues_without_linemap() {
        let current = vec![issue("b", "f", 1), issue("c", "f", 2)];
        let reference = set(&["T:a:f:1", "T:b:f:1"]);
        let diff = diff_issues(&current, &reference, None);
        assert_eq!(diff.fixed, set(&["T:a:f:1"]));
        assert_eq!(diff.new, set(&["T:c:f:2"]));
        assert_eq!(diff.unchanged, set(&["T:b:f:1"]));
    }

    #[test]
    fn test_linemap_keeps_moved_issue_unchanged() {
        let map = LineMap::from_entries(vec![LineMapEntry {
            old_file: "f".into(),
            old_line: 10,
            new_file: "f".into(),
            new_line: 12,
        }]);
        let current = vec![issue("foo", "f", 12)];
        let reference = set(&["T:foo:f:10"]);

        let diff = diff_issues(&current, &reference, Some(&map));
        assert_eq!(diff.unchanged, set(&["T:foo:f:12"]));
        assert!(diff.new.is_empty());
        assert!(diff.fixed.is_empty());

        let diff = diff_issues(&current, &reference, None);
        assert_eq!(diff.new, set(&["T:foo:f:12"]));
        assert_eq!(diff.fixed, set(&["T:foo:f:10"]));
    }

    #[test]
    fn test_moved_issue_onto_old_location_stays_disjoint() {
        // The issue at 10 moved to 12; whatever sat at 12 before is gone, but
        // its handle is the one the moved issue now carries.
        let map = LineMap::from_entries(vec![LineMapEntry {
            old_file: "f".into(),
            old_line: 10,
            new_file: "f".into(),
            new_line: 12,
        }]);
        let current = vec![issue("foo", "f", 12)];
        let reference = set(&["T:foo:f:10", "T:foo:f:12"]);

        let diff = diff_issues(&current, &reference, Some(&map));
        assert_eq!(diff.unchanged, set(&["T:foo:f:12"]));
        assert!(diff.new.is_empty());
        assert!(diff.fixed.is_empty());
        assert!(diff.fixed.is_disjoint(&diff.unchanged));
        assert!(diff.fixed.is_disjoint(&diff.new));
        assert!(diff.new.is_disjoint(&diff.unchanged));
    }

    #[test]
    fn test_untranslated_handle_is_a_fallback_match() {
        let map = LineMap::from_entries(vec![LineMapEntry {
            old_file: "f".into(),
            old_line: 3,
            new_file: "f".into(),
            new_line: 5,
        }]);
        let current = vec![issue("foo", "f", 5), issue("bar", "g", 1)];
        let reference = set(&["T:foo:f:5", "T:gone:f:1"]);

        let diff = diff_issues(&current, &reference, Some(&map));
        assert_eq!(diff.unchanged, set(&["T:foo:f:5"]));
        assert_eq!(diff.new, set(&["T:bar:g:1"]));
        assert_eq!(diff.fixed, set(&["T:gone:f:1"]));
    }
}
