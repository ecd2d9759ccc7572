//! Branch and commit substrate.
//!
//! Branch paths form a tree rooted at `MAIN`. Each branch carries base and
//! head timestamps, nested metadata and the set of ancestor row versions it
//! has replaced. Commits serialise writes per branch: opening takes the
//! branch lock and fails immediately on contention, closing without marking
//! success rolls back every row tagged with the commit's timepoint.
//!
//! Commit listeners run at `pre_commit_completion`, after the user's writes
//! have been staged and before the commit is finalised. Listeners receive
//! the branch service per call instead of holding a reference to it, which
//! keeps the commit → branch → listener relationship acyclic.

pub mod criteria;
pub mod metadata;
pub mod path;

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info};

use crate::{
    branch::{criteria::BranchCriteria, metadata::Metadata},
    errors::TermError,
    store::{Doc, DocKind, IndexStore, query::Query},
};

const SAVE_PAGE: usize = 10_000;

/// A branch snapshot: path, timestamps, metadata and replaced versions.
#[derive(Debug, Clone, Default)]
pub struct Branch {
    pub path: String,
    /// Timepoint this branch last branched from or rebased onto its parent.
    pub base_timestamp: i64,
    /// Timepoint of the last successful commit.
    pub head_timestamp: i64,
    pub metadata: Metadata,
    versions_replaced: HashMap<DocKind, HashSet<u64>>,
}

impl Branch {
    /// Row ids of ancestor versions this branch has replaced, per kind.
    pub fn versions_replaced(&self, kind: DocKind) -> Option<&HashSet<u64>> {
        self.versions_replaced.get(&kind)
    }
}

/// The two commit kinds listeners observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    Content,
    Rebase,
}

#[derive(Default)]
struct CommitJournal {
    inserted: Vec<(DocKind, u64)>,
    ended: Vec<(DocKind, u64)>,
    replaced: Vec<(DocKind, u64)>,
}

/// An open commit. Pass to `save_batch`, then either `mark_successful` and
/// `close`, or `close` directly to roll back.
pub struct Commit {
    path: String,
    timepoint: i64,
    kind: CommitKind,
    successful: AtomicBool,
    journal: Mutex<CommitJournal>,
}

impl Commit {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn timepoint(&self) -> i64 {
        self.timepoint
    }

    pub fn kind(&self) -> CommitKind {
        self.kind
    }

    fn journal(&self) -> Result<std::sync::MutexGuard<'_, CommitJournal>, TermError> {
        self.journal
            .lock()
            .map_err(|_| TermError::Store("commit journal lock poisoned".to_string()))
    }
}

/// Listener invoked inside the commit, before it is finalised. An error
/// aborts the commit; the caller is expected to close it for rollback.
pub trait CommitListener<S: IndexStore>: Send + Sync {
    fn pre_commit_completion(
        &self,
        commit: &Commit,
        branching: &BranchService<S>,
    ) -> Result<(), TermError>;
}

/// Branch and commit operations over an index store.
pub struct BranchService<S: IndexStore> {
    store: Arc<S>,
    branches: DashMap<String, Branch>,
    locks: DashMap<String, String>,
    clock: AtomicI64,
    listeners: RwLock<Vec<Arc<dyn CommitListener<S>>>>,
}

impl<S: IndexStore> BranchService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            branches: DashMap::new(),
            locks: DashMap::new(),
            clock: AtomicI64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Register a commit listener. Listeners run in registration order.
    pub fn register_listener(&self, listener: Arc<dyn CommitListener<S>>) {
        self.listeners
            .write()
            .expect("listener registry lock poisoned")
            .push(listener);
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn exists(&self, path: &str) -> bool {
        self.branches.contains_key(path)
    }

    /// Snapshot of a branch.
    pub fn branch(&self, branch_path: &str) -> Result<Branch, TermError> {
        self.branches
            .get(branch_path)
            .map(|entry| entry.clone())
            .ok_or_else(|| TermError::BranchNotFound(branch_path.to_string()))
    }

    /// Create a branch. Non-root branches base on their parent's head.
    pub fn create_branch(&self, branch_path: &str) -> Result<Branch, TermError> {
        if self.exists(branch_path) {
            return Err(TermError::Validation(format!(
                "branch `{branch_path}` already exists"
            )));
        }
        let base_timestamp = match path::parent_path(branch_path) {
            Some(parent) => self.branch(parent)?.head_timestamp,
            None => {
                if branch_path != path::MAIN {
                    return Err(TermError::Validation(format!(
                        "root branch must be `{}`, got `{branch_path}`",
                        path::MAIN
                    )));
                }
                self.tick()
            }
        };
        let branch = Branch {
            path: branch_path.to_string(),
            base_timestamp,
            head_timestamp: base_timestamp,
            metadata: Metadata::new(),
            versions_replaced: HashMap::new(),
        };
        self.branches.insert(branch_path.to_string(), branch.clone());
        info!(path = branch_path, "branch created");
        Ok(branch)
    }

    /// Replace a branch's metadata.
    pub fn update_metadata(&self, branch_path: &str, metadata: Metadata) -> Result<(), TermError> {
        let mut entry = self
            .branches
            .get_mut(branch_path)
            .ok_or_else(|| TermError::BranchNotFound(branch_path.to_string()))?;
        entry.metadata = metadata;
        Ok(())
    }

    /// Open a CONTENT commit. Fails immediately when the branch lock is
    /// already taken.
    pub fn open_commit(&self, branch_path: &str, lock_context: &str) -> Result<Commit, TermError> {
        self.open_commit_kind(branch_path, lock_context, CommitKind::Content)
    }

    pub fn open_commit_kind(
        &self,
        branch_path: &str,
        lock_context: &str,
        kind: CommitKind,
    ) -> Result<Commit, TermError> {
        if !self.exists(branch_path) {
            return Err(TermError::BranchNotFound(branch_path.to_string()));
        }
        match self.locks.entry(branch_path.to_string()) {
            Entry::Occupied(_) => return Err(TermError::LockContention(branch_path.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(lock_context.to_string());
            }
        }
        let timepoint = self.tick();
        debug!(path = branch_path, timepoint, "commit opened");
        Ok(Commit {
            path: branch_path.to_string(),
            timepoint,
            kind,
            successful: AtomicBool::new(false),
            journal: Mutex::new(CommitJournal::default()),
        })
    }

    /// Stage a batch of documents into an open commit.
    ///
    /// A document whose id was already written by this commit is rewritten
    /// in place, so no two versions of one component id carry the same
    /// start timepoint. Otherwise the current version on the commit's
    /// branch is superseded, or, when the current version lives on an
    /// ancestor, that version is recorded as replaced.
    pub fn save_batch<T: Doc>(&self, commit: &Commit, docs: Vec<T>) -> Result<(), TermError> {
        if docs.is_empty() {
            return Ok(());
        }
        let kind = T::KIND;
        let ids: Vec<String> = docs.iter().map(|doc| doc.doc_id().to_string()).collect();

        let in_commit = self.rows_by_id(
            kind,
            Query::bool_query()
                .must(criteria::changed_in_commit(&commit.path, commit.timepoint))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .build(),
            T::ID_FIELD,
        )?;
        let own_live = self.rows_by_id(
            kind,
            Query::bool_query()
                .must(BranchCriteria::live(&commit.path).query_for(kind))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .build(),
            T::ID_FIELD,
        )?;
        let visible = self.rows_by_id_deepest(
            kind,
            Query::bool_query()
                .must(self.criteria_on_branch(&commit.path)?.query_for(kind))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .build(),
            T::ID_FIELD,
        )?;

        let mut inserts = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc.doc_id().to_string();
            let value = serde_json::to_value(&doc)?;
            if let Some((row_id, _)) = in_commit.get(&id) {
                self.store.replace_row_source(kind, *row_id, value)?;
                continue;
            }
            if let Some((row_id, _)) = own_live.get(&id) {
                self.store.set_row_end(kind, *row_id, Some(commit.timepoint))?;
                commit.journal()?.ended.push((kind, *row_id));
            } else if let Some((row_id, row_path)) = visible.get(&id)
                && row_path != &commit.path
            {
                self.record_replaced(commit, kind, *row_id)?;
            }
            inserts.push((value, commit.path.clone(), commit.timepoint));
        }
        let inserted = self.store.insert_rows(kind, inserts)?;
        commit
            .journal()?
            .inserted
            .extend(inserted.into_iter().map(|row_id| (kind, row_id)));
        Ok(())
    }

    /// Delete components by ending their current versions without staging
    /// replacements. Ancestor versions are shadowed via the replaced set.
    pub fn delete_batch<T: Doc>(&self, commit: &Commit, ids: &[String]) -> Result<(), TermError> {
        if ids.is_empty() {
            return Ok(());
        }
        let kind = T::KIND;
        let own_live = self.rows_by_id(
            kind,
            Query::bool_query()
                .must(BranchCriteria::live(&commit.path).query_for(kind))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .build(),
            T::ID_FIELD,
        )?;
        let visible = self.rows_by_id_deepest(
            kind,
            Query::bool_query()
                .must(self.criteria_on_branch(&commit.path)?.query_for(kind))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .build(),
            T::ID_FIELD,
        )?;
        for id in ids {
            if let Some((row_id, _)) = own_live.get(id) {
                self.store.set_row_end(kind, *row_id, Some(commit.timepoint))?;
                commit.journal()?.ended.push((kind, *row_id));
            } else if let Some((row_id, row_path)) = visible.get(id)
                && row_path != &commit.path
            {
                self.record_replaced(commit, kind, *row_id)?;
            }
        }
        Ok(())
    }

    fn record_replaced(&self, commit: &Commit, kind: DocKind, row_id: u64) -> Result<(), TermError> {
        let mut branch = self
            .branches
            .get_mut(&commit.path)
            .ok_or_else(|| TermError::BranchNotFound(commit.path.clone()))?;
        branch
            .versions_replaced
            .entry(kind)
            .or_default()
            .insert(row_id);
        commit.journal()?.replaced.push((kind, row_id));
        Ok(())
    }

    fn rows_by_id(
        &self,
        kind: DocKind,
        query: Query,
        id_field: &str,
    ) -> Result<HashMap<String, (u64, String)>, TermError> {
        let mut result = HashMap::new();
        for row in self.store.stream_rows(kind, &query, SAVE_PAGE)? {
            if let Some(id) = row.source.get(id_field).and_then(|value| value.as_str()) {
                result.insert(id.to_string(), (row.row_id, row.path));
            }
        }
        Ok(result)
    }

    /// As `rows_by_id`, keeping the row from the deepest branch path when a
    /// component is visible at several ancestor levels.
    fn rows_by_id_deepest(
        &self,
        kind: DocKind,
        query: Query,
        id_field: &str,
    ) -> Result<HashMap<String, (u64, String)>, TermError> {
        let mut result: HashMap<String, (u64, String)> = HashMap::new();
        for row in self.store.stream_rows(kind, &query, SAVE_PAGE)? {
            let Some(id) = row.source.get(id_field).and_then(|value| value.as_str()) else {
                continue;
            };
            match result.get(id) {
                Some((_, existing)) if existing.len() >= row.path.len() => {}
                _ => {
                    result.insert(id.to_string(), (row.row_id, row.path));
                }
            }
        }
        Ok(result)
    }

    /// Run commit listeners, then finalise the commit: the branch head
    /// moves to the commit timepoint. A listener error propagates and
    /// leaves the commit open for rollback.
    pub fn mark_successful(&self, commit: &Commit) -> Result<(), TermError> {
        let listeners: Vec<Arc<dyn CommitListener<S>>> = self
            .listeners
            .read()
            .expect("listener registry lock poisoned")
            .clone();
        for listener in listeners {
            listener.pre_commit_completion(commit, self)?;
        }
        {
            let mut branch = self
                .branches
                .get_mut(&commit.path)
                .ok_or_else(|| TermError::BranchNotFound(commit.path.clone()))?;
            branch.head_timestamp = commit.timepoint;
        }
        commit.successful.store(true, Ordering::SeqCst);
        debug!(path = commit.path.as_str(), timepoint = commit.timepoint, "commit successful");
        Ok(())
    }

    /// Close a commit and release the branch lock. Closing without a prior
    /// `mark_successful` rolls back every write tagged with the commit.
    pub fn close(&self, commit: Commit) -> Result<(), TermError> {
        if !commit.successful.load(Ordering::SeqCst) {
            self.rollback(&commit)?;
        }
        self.locks.remove(&commit.path);
        Ok(())
    }

    fn rollback(&self, commit: &Commit) -> Result<(), TermError> {
        let journal = commit.journal()?;
        info!(
            path = commit.path.as_str(),
            timepoint = commit.timepoint,
            inserted = journal.inserted.len(),
            "rolling back commit"
        );
        let mut by_kind: HashMap<DocKind, Vec<u64>> = HashMap::new();
        for (kind, row_id) in &journal.inserted {
            by_kind.entry(*kind).or_default().push(*row_id);
        }
        for (kind, row_ids) in by_kind {
            self.store.delete_rows(kind, &row_ids)?;
        }
        for (kind, row_id) in &journal.ended {
            self.store.set_row_end(*kind, *row_id, None)?;
        }
        if !journal.replaced.is_empty()
            && let Some(mut branch) = self.branches.get_mut(&commit.path)
        {
            for (kind, row_id) in &journal.replaced {
                if let Some(replaced) = branch.versions_replaced.get_mut(kind) {
                    replaced.remove(row_id);
                }
            }
        }
        Ok(())
    }

    /// Rebase a branch onto its parent's head. Opens a REBASE commit so
    /// listeners observe the new view.
    pub fn rebase(&self, branch_path: &str) -> Result<(), TermError> {
        let parent = path::parent_path(branch_path)
            .ok_or_else(|| TermError::Validation("cannot rebase the root branch".to_string()))?;
        let parent_head = self.branch(parent)?.head_timestamp;
        {
            let mut branch = self
                .branches
                .get_mut(branch_path)
                .ok_or_else(|| TermError::BranchNotFound(branch_path.to_string()))?;
            branch.base_timestamp = parent_head;
        }
        let commit = self.open_commit_kind(branch_path, "rebase", CommitKind::Rebase)?;
        let marked = self.mark_successful(&commit);
        self.close(commit)?;
        marked
    }

    /// Criteria selecting the latest visible version of each component on
    /// a branch.
    pub fn criteria_on_branch(&self, branch_path: &str) -> Result<BranchCriteria, TermError> {
        let branch = self.branch(branch_path)?;
        let mut criteria = BranchCriteria::live(branch_path);
        let mut visible_at = branch.base_timestamp;
        let mut excluded = branch.versions_replaced.clone();
        for ancestor_path in path::ancestors(branch_path) {
            let ancestor = self.branch(ancestor_path)?;
            criteria.push_ancestor(ancestor_path, visible_at, excluded.clone());
            visible_at = visible_at.min(ancestor.base_timestamp);
            for (kind, rows) in &ancestor.versions_replaced {
                excluded.entry(*kind).or_default().extend(rows.iter().copied());
            }
        }
        Ok(criteria)
    }

    /// As `criteria_on_branch`, plus rows staged by the open commit. Rows
    /// written on the commit's branch are current the moment they are
    /// staged, so the branch view already includes them.
    pub fn criteria_including_open_commit(
        &self,
        commit: &Commit,
    ) -> Result<BranchCriteria, TermError> {
        self.criteria_on_branch(&commit.path)
    }

    /// The snapshot the open commit started from.
    pub fn criteria_before_open_commit(&self, commit: &Commit) -> Result<BranchCriteria, TermError> {
        let branch = self.branch(&commit.path)?;
        let mut criteria = BranchCriteria::live_before_commit(&commit.path, commit.timepoint);
        let mut visible_at = branch.base_timestamp;
        let mut excluded = branch.versions_replaced.clone();
        for ancestor_path in path::ancestors(&commit.path) {
            let ancestor = self.branch(ancestor_path)?;
            criteria.push_ancestor(ancestor_path, visible_at, excluded.clone());
            visible_at = visible_at.min(ancestor.base_timestamp);
            for (kind, rows) in &ancestor.versions_replaced {
                excluded.entry(*kind).or_default().extend(rows.iter().copied());
            }
        }
        Ok(criteria)
    }

    /// Components changed on this branch and not yet promoted.
    pub fn criteria_unpromoted_changes(&self, branch_path: &str) -> Result<BranchCriteria, TermError> {
        if !self.exists(branch_path) {
            return Err(TermError::BranchNotFound(branch_path.to_string()));
        }
        Ok(BranchCriteria::live(branch_path))
    }

    /// As above, plus tombstones of components deleted on the branch.
    pub fn criteria_unpromoted_changes_and_deletions(
        &self,
        branch_path: &str,
    ) -> Result<BranchCriteria, TermError> {
        if !self.exists(branch_path) {
            return Err(TermError::BranchNotFound(branch_path.to_string()));
        }
        Ok(BranchCriteria::any(branch_path))
    }
}
