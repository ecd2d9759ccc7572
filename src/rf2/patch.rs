//! Effective-time conflict resolution for incoming release rows.
//!
//! An imported component must not overwrite a version the branch already
//! holds for the same or a newer effective time. The patcher filters each
//! batch against the branch snapshot the commit started from, except that
//! a designated patch release version may replace its own effective time
//! (folding hot-fixes into a published release). The sentinel `-1`
//! disables filtering entirely.
//!
//! Release-field inheritance runs after filtering: unreleased incoming
//! rows inherit the release envelope of their prior released version, and
//! their effective time is re-derived from envelope equality.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    branch::criteria::BranchCriteria,
    domain::{Component, ComponentFields, fields},
    errors::TermError,
    store::{Doc, IndexStore, query::{Query, RangeBounds}},
};

/// `patch_release_version` sentinel: any effective time may be replaced.
pub const PATCH_ALL_RELEASES: i32 = -1;

/// Per-import patching behaviour.
#[derive(Debug, Clone, Default)]
pub struct PatchConfig {
    /// Blank the component envelope before grouping, turning every row
    /// into an unreleased edit.
    pub clear_effective_times: bool,
    /// Effective time allowed to replace itself, or [`PATCH_ALL_RELEASES`].
    pub patch_release_version: Option<i32>,
    /// Inherit release envelopes onto unreleased incoming rows.
    pub copy_release_fields: bool,
}

/// Filter a batch against versions already on the branch snapshot, then
/// apply release-field inheritance. Returns the surviving components and
/// the number of rows skipped.
pub fn apply<T, S>(
    store: &S,
    snapshot: &BranchCriteria,
    mut incoming: Vec<T>,
    config: &PatchConfig,
    page_size: usize,
) -> Result<(Vec<T>, usize), TermError>
where
    T: Doc + Component,
    S: IndexStore,
{
    if config.clear_effective_times {
        for component in &mut incoming {
            component.clear_release_details();
        }
    }

    let mut skipped = 0;
    if config.patch_release_version != Some(PATCH_ALL_RELEASES) {
        let mut by_effective_time: HashMap<i32, Vec<String>> = HashMap::new();
        for component in &incoming {
            if let Some(effective_time) = component.effective_time() {
                by_effective_time
                    .entry(effective_time)
                    .or_default()
                    .push(component.doc_id().to_string());
            }
        }

        let mut superseded: HashSet<String> = HashSet::new();
        for (effective_time, ids) in by_effective_time {
            let bounds = if config.patch_release_version == Some(effective_time) {
                RangeBounds {
                    gt: Some(effective_time as i64),
                    ..Default::default()
                }
            } else {
                RangeBounds {
                    gte: Some(effective_time as i64),
                    ..Default::default()
                }
            };
            let query = Query::bool_query()
                .must(snapshot.query_for(T::KIND))
                .must(Query::terms(T::ID_FIELD, ids.iter().map(String::as_str)))
                .must(Query::range(fields::EFFECTIVE_TIME, bounds))
                .build();
            for existing in store.stream::<T>(&query, page_size)? {
                superseded.insert(existing?.doc_id().to_string());
            }
        }
        if !superseded.is_empty() {
            debug!(kind = ?T::KIND, count = superseded.len(), "skipping superseded rows");
            incoming.retain(|component| {
                let keep = !superseded.contains(component.doc_id());
                if !keep {
                    skipped += 1;
                }
                keep
            });
        }
    }

    if config.copy_release_fields {
        inherit_release_fields(store, snapshot, &mut incoming, page_size)?;
    }

    Ok((incoming, skipped))
}

/// Copy the release envelope of the prior released version onto unreleased
/// incoming components, then re-derive their effective time.
fn inherit_release_fields<T, S>(
    store: &S,
    snapshot: &BranchCriteria,
    incoming: &mut [T],
    page_size: usize,
) -> Result<(), TermError>
where
    T: Doc + Component,
    S: IndexStore,
{
    let unreleased: Vec<&str> = incoming
        .iter()
        .filter(|component| component.effective_time().is_none())
        .map(|component| component.doc_id())
        .collect();
    if unreleased.is_empty() {
        return Ok(());
    }

    let query = Query::bool_query()
        .must(snapshot.query_for(T::KIND))
        .must(Query::terms(T::ID_FIELD, unreleased))
        .must(Query::term(fields::RELEASED, true))
        .build();
    let mut released: HashMap<String, ComponentFields> = HashMap::new();
    for hit in store.stream::<T>(&query, page_size)? {
        let hit = hit?;
        released.insert(hit.doc_id().to_string(), hit.component_fields().clone());
    }

    for component in incoming.iter_mut() {
        if component.effective_time().is_none()
            && let Some(prior) = released.get(component.doc_id())
        {
            component.copy_release_details_from(prior);
            component.update_effective_time();
        }
    }
    Ok(())
}
