//! Branch criteria: query predicates restricting a search to the view of
//! components visible on a branch at a point in time.
//!
//! A criteria object is a list of slices, one per branch in the ancestor
//! chain. The branch's own slice selects its current rows; each ancestor
//! slice selects rows visible at the (chained) base timestamp, minus
//! versions the lower branches have replaced. Compiling to a query is
//! per document kind because the replaced-version exclusions are.

use std::collections::{HashMap, HashSet};

use crate::store::{
    DocKind, END, PATH, START,
    query::{Query, RangeBounds},
};

#[derive(Debug, Clone)]
enum SliceKind {
    /// Current rows on the slice path.
    Live,
    /// Current rows, excluding writes staged by the open commit at the
    /// given timepoint and restoring rows that commit has superseded.
    LiveBeforeCommit(i64),
    /// Rows visible at a fixed timepoint (ancestor view).
    VisibleAt(i64),
    /// Every row on the slice path, tombstones included.
    Any,
}

#[derive(Debug, Clone)]
struct Slice {
    path: String,
    kind: SliceKind,
    excluded: HashMap<DocKind, HashSet<u64>>,
}

impl Slice {
    fn query_for(&self, kind: DocKind) -> Query {
        let mut builder = Query::bool_query().must(Query::term(PATH, self.path.as_str()));
        match &self.kind {
            SliceKind::Live => {
                builder = builder.must_not(Query::exists(END));
            }
            SliceKind::LiveBeforeCommit(timepoint) => {
                builder = builder
                    .must_not(Query::term(START, *timepoint))
                    .should(Query::bool_query().must_not(Query::exists(END)).build())
                    .should(Query::term(END, *timepoint));
            }
            SliceKind::VisibleAt(timepoint) => {
                builder = builder
                    .must(Query::range(
                        START,
                        RangeBounds {
                            lte: Some(*timepoint),
                            ..Default::default()
                        },
                    ))
                    .should(Query::bool_query().must_not(Query::exists(END)).build())
                    .should(Query::range(
                        END,
                        RangeBounds {
                            gt: Some(*timepoint),
                            ..Default::default()
                        },
                    ));
            }
            SliceKind::Any => {}
        }
        if let Some(excluded) = self.excluded.get(&kind)
            && !excluded.is_empty()
        {
            builder = builder.must_not(Query::Ids(excluded.clone()));
        }
        builder.build()
    }
}

/// A compiled branch view. Obtain from the branch service, combine with
/// entity filters via [`BranchCriteria::query_for`].
#[derive(Debug, Clone)]
pub struct BranchCriteria {
    slices: Vec<Slice>,
}

impl BranchCriteria {
    fn new() -> Self {
        Self { slices: Vec::new() }
    }

    pub(crate) fn live(path: &str) -> Self {
        let mut criteria = Self::new();
        criteria.push(path, SliceKind::Live, HashMap::new());
        criteria
    }

    pub(crate) fn live_before_commit(path: &str, timepoint: i64) -> Self {
        let mut criteria = Self::new();
        criteria.push(path, SliceKind::LiveBeforeCommit(timepoint), HashMap::new());
        criteria
    }

    pub(crate) fn any(path: &str) -> Self {
        let mut criteria = Self::new();
        criteria.push(path, SliceKind::Any, HashMap::new());
        criteria
    }

    pub(crate) fn push_ancestor(
        &mut self,
        path: &str,
        visible_at: i64,
        excluded: HashMap<DocKind, HashSet<u64>>,
    ) {
        self.push(path, SliceKind::VisibleAt(visible_at), excluded);
    }

    fn push(&mut self, path: &str, kind: SliceKind, excluded: HashMap<DocKind, HashSet<u64>>) {
        self.slices.push(Slice {
            path: path.to_string(),
            kind,
            excluded,
        });
    }

    /// The branch paths of the slices, nearest first.
    pub fn paths(&self) -> Vec<&str> {
        self.slices.iter().map(|slice| slice.path.as_str()).collect()
    }

    /// Compile the view to a query for one document kind.
    pub fn query_for(&self, kind: DocKind) -> Query {
        let mut builder = Query::bool_query();
        for slice in &self.slices {
            builder = builder.should(slice.query_for(kind));
        }
        builder.build()
    }
}

/// Query selecting rows written by the open commit at `timepoint`.
pub fn changed_in_commit(path: &str, timepoint: i64) -> Query {
    Query::bool_query()
        .must(Query::term(PATH, path))
        .must(Query::term(START, timepoint))
        .build()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// The own-branch slice sees live rows only; an ancestor slice is
    /// bounded by the base timestamp.
    #[test]
    fn test_slice_visibility() {
        let mut criteria = BranchCriteria::live("MAIN/project");
        criteria.push_ancestor("MAIN", 10, HashMap::new());
        let query = criteria.query_for(DocKind::Concept);

        let own_live = json!({"path": "MAIN/project", "start": 12});
        let own_ended = json!({"path": "MAIN/project", "start": 3, "end": 12});
        let parent_old = json!({"path": "MAIN", "start": 5});
        let parent_new = json!({"path": "MAIN", "start": 11});
        let parent_ended_late = json!({"path": "MAIN", "start": 5, "end": 20});
        let parent_ended_early = json!({"path": "MAIN", "start": 2, "end": 8});

        assert!(query.matches(1, &own_live));
        assert!(!query.matches(2, &own_ended));
        assert!(query.matches(3, &parent_old));
        assert!(!query.matches(4, &parent_new));
        assert!(query.matches(5, &parent_ended_late));
        assert!(!query.matches(6, &parent_ended_early));
    }

    /// Replaced ancestor versions are excluded for the kind they belong to.
    #[test]
    fn test_replaced_versions_excluded() {
        let mut excluded = HashMap::new();
        excluded.insert(DocKind::Concept, HashSet::from([3u64]));
        let mut criteria = BranchCriteria::live("MAIN/project");
        criteria.push_ancestor("MAIN", 10, excluded);

        let parent_row = json!({"path": "MAIN", "start": 5});
        assert!(!criteria.query_for(DocKind::Concept).matches(3, &parent_row));
        assert!(criteria.query_for(DocKind::Description).matches(3, &parent_row));
    }

    /// The before-commit view hides staged rows and restores superseded ones.
    #[test]
    fn test_before_commit_view() {
        let criteria = BranchCriteria::live_before_commit("MAIN", 42);
        let query = criteria.query_for(DocKind::Concept);

        let staged = json!({"path": "MAIN", "start": 42});
        let superseded = json!({"path": "MAIN", "start": 7, "end": 42});
        let untouched = json!({"path": "MAIN", "start": 7});
        assert!(!query.matches(1, &staged));
        assert!(query.matches(2, &superseded));
        assert!(query.matches(3, &untouched));
    }
}
