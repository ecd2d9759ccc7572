//! In-memory [`IndexStore`] implementation.
//!
//! Backs the test suites and embedded deployments. Rows are held per kind
//! with the versioning columns (`path`, `start`, `end`) merged into the
//! indexed document body, so branch criteria queries evaluate against a
//! single flat field space exactly as they would against a real index.
//! Streaming snapshots matching rows up front and then pages through the
//! snapshot; the open-cursor count is tracked so tests can assert scoped
//! release.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::trace;

use crate::{
    domain::refset_member,
    errors::TermError,
    store::{DocKind, END, IndexStore, PATH, RowCursor, START, VersionedRow, query::Query},
};

#[derive(Debug, Clone)]
struct Row {
    row_id: u64,
    source: Value,
}

/// In-memory document store with versioned rows.
#[derive(Default)]
pub struct MemStore {
    rows: RwLock<HashMap<DocKind, Vec<Row>>>,
    next_row_id: AtomicU64,
    open_cursors: Arc<AtomicUsize>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streaming cursors not yet released. Exposed for tests
    /// asserting scoped release.
    pub fn open_cursor_count(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    fn read_rows(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<DocKind, Vec<Row>>>, TermError> {
        self.rows
            .read()
            .map_err(|_| TermError::Store("row table lock poisoned".to_string()))
    }

    fn write_rows(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<DocKind, Vec<Row>>>, TermError> {
        self.rows
            .write()
            .map_err(|_| TermError::Store("row table lock poisoned".to_string()))
    }

    fn to_versioned(row: &Row) -> VersionedRow {
        let path = row.source[PATH].as_str().unwrap_or_default().to_string();
        let start = row.source[START].as_i64().unwrap_or_default();
        let end = row.source.get(END).and_then(Value::as_i64);
        VersionedRow {
            row_id: row.row_id,
            path,
            start,
            end,
            source: row.source.clone(),
        }
    }
}

impl IndexStore for MemStore {
    fn stream_rows(
        &self,
        kind: DocKind,
        query: &Query,
        page_size: usize,
    ) -> Result<RowCursor, TermError> {
        if page_size == 0 {
            return Err(TermError::Store("page size must be positive".to_string()));
        }
        let matching: Vec<VersionedRow> = {
            let rows = self.read_rows()?;
            rows.get(&kind)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| query.matches(row.row_id, &row.source))
                        .map(Self::to_versioned)
                        .collect()
                })
                .unwrap_or_default()
        };
        let pages = matching
            .chunks(page_size)
            .map(<[VersionedRow]>::to_vec)
            .collect();
        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        let open_cursors = Arc::clone(&self.open_cursors);
        Ok(RowCursor::new(
            pages,
            Box::new(move || {
                open_cursors.fetch_sub(1, Ordering::SeqCst);
            }),
        ))
    }

    fn insert_rows(
        &self,
        kind: DocKind,
        rows: Vec<(Value, String, i64)>,
    ) -> Result<Vec<u64>, TermError> {
        let mut table = self.write_rows()?;
        let entries = table.entry(kind).or_default();
        let mut ids = Vec::with_capacity(rows.len());
        for (source, path, start) in rows {
            let Value::Object(mut body) = source else {
                return Err(TermError::Store(
                    "document body must be a JSON object".to_string(),
                ));
            };
            body.insert(PATH.to_string(), Value::String(path));
            body.insert(START.to_string(), Value::from(start));
            body.remove(END);
            let row_id = self.next_row_id.fetch_add(1, Ordering::SeqCst) + 1;
            entries.push(Row {
                row_id,
                source: Value::Object(body),
            });
            ids.push(row_id);
        }
        Ok(ids)
    }

    fn replace_row_source(
        &self,
        kind: DocKind,
        row_id: u64,
        source: Value,
    ) -> Result<(), TermError> {
        let mut table = self.write_rows()?;
        let row = table
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|row| row.row_id == row_id))
            .ok_or_else(|| TermError::Store(format!("row {row_id} not found for {kind:?}")))?;
        let Value::Object(mut body) = source else {
            return Err(TermError::Store(
                "document body must be a JSON object".to_string(),
            ));
        };
        for column in [PATH, START, END] {
            if let Some(value) = row.source.get(column) {
                body.insert(column.to_string(), value.clone());
            }
        }
        row.source = Value::Object(body);
        Ok(())
    }

    fn set_row_end(&self, kind: DocKind, row_id: u64, end: Option<i64>) -> Result<(), TermError> {
        let mut table = self.write_rows()?;
        let row = table
            .get_mut(&kind)
            .and_then(|rows| rows.iter_mut().find(|row| row.row_id == row_id))
            .ok_or_else(|| TermError::Store(format!("row {row_id} not found for {kind:?}")))?;
        match (end, row.source.as_object_mut()) {
            (Some(timepoint), Some(body)) => {
                body.insert(END.to_string(), Value::from(timepoint));
            }
            (None, Some(body)) => {
                body.remove(END);
            }
            _ => {}
        }
        Ok(())
    }

    fn delete_rows(&self, kind: DocKind, row_ids: &[u64]) -> Result<(), TermError> {
        let mut table = self.write_rows()?;
        if let Some(rows) = table.get_mut(&kind) {
            rows.retain(|row| !row_ids.contains(&row.row_id));
        }
        Ok(())
    }

    fn rewrite_additional_fields(
        &self,
        path: &str,
        member_id: &str,
        fields: &IndexMap<String, String>,
    ) -> Result<(), TermError> {
        let mut table = self.write_rows()?;
        let rows = table.entry(DocKind::ReferenceSetMember).or_default();
        let row = rows
            .iter_mut()
            .find(|row| {
                row.source[refset_member::fields::MEMBER_ID].as_str() == Some(member_id)
                    && row.source[PATH].as_str() == Some(path)
                    && row.source.get(END).is_none()
            })
            .ok_or_else(|| {
                TermError::Store(format!(
                    "no current reference set member row for `{member_id}` on `{path}`"
                ))
            })?;
        let additional = row
            .source
            .as_object_mut()
            .and_then(|body| {
                body.entry(refset_member::fields::ADDITIONAL_FIELDS)
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
            })
            .ok_or_else(|| TermError::Store("additionalFields is not an object".to_string()))?;
        for (name, value) in fields {
            additional.insert(name.clone(), Value::String(value.clone()));
        }
        Ok(())
    }

    fn refresh(&self) -> Result<(), TermError> {
        trace!("refresh: in-memory store is always searchable");
        Ok(())
    }
}
