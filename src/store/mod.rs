//! Indexed document store abstraction consumed by the core services.
//!
//! The store holds versioned rows: a document body (the indexed fields of a
//! terminology component) plus the versioning columns `path`, `start` and
//! `end` maintained by the branching layer. Services read through
//! [`IndexStore::stream`], which pages under the hood and releases the
//! underlying cursor on every exit path via `Drop`.

pub mod memory;
pub mod query;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::TermError;
use crate::store::query::Query;

/// Versioning column: branch path the row was written on.
pub const PATH: &str = "path";
/// Versioning column: timepoint of the writing commit.
pub const START: &str = "start";
/// Versioning column: timepoint the row was superseded at.
pub const END: &str = "end";

/// Document kinds held by the store, one per entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocKind {
    Concept,
    Description,
    Relationship,
    Identifier,
    ReferenceSetMember,
    QueryConcept,
}

impl DocKind {
    /// Core component kinds must be flushed before any dependent kind
    /// during ingestion, so reference-set members never land in the index
    /// before the components they reference.
    pub fn is_core_component(&self) -> bool {
        matches!(
            self,
            DocKind::Concept | DocKind::Description | DocKind::Relationship
        )
    }
}

/// A typed document stored in the index.
///
/// `ID_FIELD` names the indexed field carrying the component id, used by
/// id-scoped queries (the effective-time patcher, integrity re-fetches).
pub trait Doc: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: DocKind;
    const ID_FIELD: &'static str;

    /// The component id of this document.
    fn doc_id(&self) -> &str;
}

/// A raw row as stored: document body plus versioning columns.
#[derive(Debug, Clone)]
pub struct VersionedRow {
    /// Internal row identifier, unique per kind.
    pub row_id: u64,
    /// Branch path the row was written on.
    pub path: String,
    /// Timepoint of the commit that wrote the row.
    pub start: i64,
    /// Timepoint the row was superseded at, `None` while current.
    pub end: Option<i64>,
    /// The document body.
    pub source: Value,
}

impl VersionedRow {
    /// Deserialize the document body into its typed form.
    pub fn to_doc<T: Doc>(&self) -> Result<T, TermError> {
        Ok(serde_json::from_value(self.source.clone())?)
    }
}

/// Callback invoked when a streaming cursor is dropped, letting store
/// implementations release the underlying scroll context.
pub type CursorRelease = Box<dyn FnOnce() + Send>;

/// A lazy, paging stream of rows. The underlying store cursor is released
/// when this value is dropped, on every exit path.
pub struct RowCursor {
    pages: std::vec::IntoIter<Vec<VersionedRow>>,
    current: std::vec::IntoIter<VersionedRow>,
    release: Option<CursorRelease>,
}

impl RowCursor {
    pub fn new(pages: Vec<Vec<VersionedRow>>, release: CursorRelease) -> Self {
        Self {
            pages: pages.into_iter(),
            current: Vec::new().into_iter(),
            release: Some(release),
        }
    }
}

impl Iterator for RowCursor {
    type Item = VersionedRow;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.current.next() {
                return Some(row);
            }
            self.current = self.pages.next()?.into_iter();
        }
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Typed wrapper over [`RowCursor`] yielding deserialized documents.
pub struct DocCursor<T> {
    rows: RowCursor,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Doc> Iterator for DocCursor<T> {
    type Item = Result<T, TermError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next().map(|row| row.to_doc())
    }
}

/// The indexed store interface consumed by the core subsystems.
///
/// Write operations are driven by the branching layer, which owns the
/// versioning semantics; services only read, except for the narrow
/// scripted-update primitive used by the MRCM updater.
pub trait IndexStore: Send + Sync + 'static {
    /// Stream raw rows matching `query`, paging with `page_size`.
    fn stream_rows(
        &self,
        kind: DocKind,
        query: &Query,
        page_size: usize,
    ) -> Result<RowCursor, TermError>;

    /// Insert new rows, returning their internal row ids in order.
    fn insert_rows(
        &self,
        kind: DocKind,
        rows: Vec<(Value, String, i64)>,
    ) -> Result<Vec<u64>, TermError>;

    /// Replace the document body of an existing row in place.
    fn replace_row_source(&self, kind: DocKind, row_id: u64, source: Value)
    -> Result<(), TermError>;

    /// Set or clear the `end` column of a row.
    fn set_row_end(&self, kind: DocKind, row_id: u64, end: Option<i64>) -> Result<(), TermError>;

    /// Remove rows entirely (commit rollback only).
    fn delete_rows(&self, kind: DocKind, row_ids: &[u64]) -> Result<(), TermError>;

    /// Rewrite named `additionalFields` entries of the current reference-set
    /// member row for `member_id` on `path`, without creating a new version.
    /// Fails when no current row exists there.
    fn rewrite_additional_fields(
        &self,
        path: &str,
        member_id: &str,
        fields: &indexmap::IndexMap<String, String>,
    ) -> Result<(), TermError>;

    /// Make pending writes visible to subsequent searches.
    fn refresh(&self) -> Result<(), TermError>;

    /// Stream typed documents matching `query`.
    fn stream<T: Doc>(&self, query: &Query, page_size: usize) -> Result<DocCursor<T>, TermError>
    where
        Self: Sized,
    {
        Ok(DocCursor {
            rows: self.stream_rows(T::KIND, query, page_size)?,
            _marker: std::marker::PhantomData,
        })
    }
}
