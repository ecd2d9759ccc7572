//! Commit-scoped component factories driven by the release reader.
//!
//! The factory receives raw RF2 rows through the [`ComponentFactory`]
//! callbacks, converts them to typed components, batches them in persist
//! buffers and stages full batches into the open commit. Core component
//! buffers are guaranteed to flush before the first dependent flush, so
//! reference set members never land in the index before the components
//! they reference.
//!
//! In history-aware mode (FULL imports) the factory closes and reopens a
//! commit at every release boundary, committing each historical version
//! atomically.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    branch::{BranchService, Commit, criteria::BranchCriteria},
    domain::{
        Component, concept::Concept, description::Description, identifier::Identifier,
        refset_member::ReferenceSetMember, relationship::Relationship,
    },
    errors::TermError,
    rf2::{
        ComponentFactory, STATED_RELATIONSHIPS_TO_SKIP,
        buffer::{CoreFlushLatch, PersistBuffer},
        parse_active, parse_effective_time,
        patch::{self, PatchConfig},
    },
    store::{Doc, DocKind, IndexStore},
};

/// Counters and observations collected over one import.
#[derive(Debug, Default)]
pub struct ImportStats {
    /// Rows suppressed by the effective-time patcher, per kind.
    pub skipped_components: HashMap<DocKind, usize>,
    /// Greatest effective time observed across every row of the archive.
    pub max_effective_time: Option<i32>,
}

/// Component factory staging rows into an open commit.
pub struct ImportComponentFactory<'b, S: IndexStore> {
    branching: &'b BranchService<S>,
    commit: Option<Commit>,
    snapshot: BranchCriteria,
    patch_config: PatchConfig,
    history_aware: bool,
    current_release: Option<Option<i32>>,
    lock_context: String,
    page_size: usize,
    concepts: PersistBuffer<Concept>,
    descriptions: PersistBuffer<Description>,
    relationships: PersistBuffer<Relationship>,
    identifiers: PersistBuffer<Identifier>,
    members: PersistBuffer<ReferenceSetMember>,
    core_flushed: CoreFlushLatch,
    stats: ImportStats,
}

impl<'b, S: IndexStore> ImportComponentFactory<'b, S> {
    /// Factory for DELTA and SNAPSHOT imports: one commit for the whole
    /// archive.
    pub fn new(
        branching: &'b BranchService<S>,
        commit: Commit,
        patch_config: PatchConfig,
        page_size: usize,
    ) -> Result<Self, TermError> {
        let snapshot = branching.criteria_before_open_commit(&commit)?;
        Ok(Self {
            branching,
            lock_context: String::new(),
            commit: Some(commit),
            snapshot,
            patch_config,
            history_aware: false,
            current_release: None,
            page_size,
            concepts: PersistBuffer::new(),
            descriptions: PersistBuffer::new(),
            relationships: PersistBuffer::new(),
            identifiers: PersistBuffer::new(),
            members: PersistBuffer::new(),
            core_flushed: CoreFlushLatch::new(),
            stats: ImportStats::default(),
        })
    }

    /// Factory for FULL imports: commits are cycled at release boundaries
    /// so the version control substrate timestamps each release
    /// independently.
    pub fn new_history_aware(
        branching: &'b BranchService<S>,
        commit: Commit,
        lock_context: impl Into<String>,
        page_size: usize,
    ) -> Result<Self, TermError> {
        let mut factory = Self::new(
            branching,
            commit,
            PatchConfig {
                clear_effective_times: false,
                patch_release_version: Some(patch::PATCH_ALL_RELEASES),
                copy_release_fields: false,
            },
            page_size,
        )?;
        factory.history_aware = true;
        factory.lock_context = lock_context.into();
        Ok(factory)
    }

    fn commit(&self) -> Result<&Commit, TermError> {
        self.commit
            .as_ref()
            .ok_or_else(|| TermError::RuntimeState("import commit already closed".to_string()))
    }

    /// Track the greatest effective time seen across the archive, and in
    /// history-aware mode cycle the commit when a new release begins.
    fn observe_effective_time(&mut self, effective_time: Option<i32>) -> Result<(), TermError> {
        if let Some(effective_time) = effective_time {
            self.stats.max_effective_time = Some(
                self.stats
                    .max_effective_time
                    .map_or(effective_time, |max| max.max(effective_time)),
            );
        }
        if self.history_aware {
            match self.current_release {
                None => self.current_release = Some(effective_time),
                Some(current) if current == effective_time => {}
                Some(current) => {
                    debug!(?current, next = ?effective_time, "release boundary, cycling commit");
                    self.cycle_commit()?;
                    self.current_release = Some(effective_time);
                }
            }
        }
        Ok(())
    }

    fn cycle_commit(&mut self) -> Result<(), TermError> {
        self.flush_all()?;
        let commit = self
            .commit
            .take()
            .ok_or_else(|| TermError::RuntimeState("import commit already closed".to_string()))?;
        let path = commit.path().to_string();
        match self.branching.mark_successful(&commit) {
            Ok(()) => self.branching.close(commit)?,
            Err(error) => {
                self.branching.close(commit)?;
                return Err(error);
            }
        }
        let next = self.branching.open_commit(&path, &self.lock_context)?;
        self.snapshot = self.branching.criteria_before_open_commit(&next)?;
        self.commit = Some(next);
        Ok(())
    }

    fn persist<T: Doc + Component>(&mut self, mut batch: Vec<T>) -> Result<(), TermError> {
        if batch.is_empty() {
            return Ok(());
        }
        for component in &mut batch {
            component.mark_changed();
        }
        let (kept, skipped) = patch::apply(
            self.branching.store().as_ref(),
            &self.snapshot,
            batch,
            &self.patch_config,
            self.page_size,
        )?;
        if skipped > 0 {
            *self.stats.skipped_components.entry(T::KIND).or_default() += skipped;
        }
        self.branching.save_batch(self.commit()?, kept)
    }

    fn flush_core(&mut self) -> Result<(), TermError> {
        let concepts = self.concepts.drain();
        self.persist(concepts)?;
        let descriptions = self.descriptions.drain();
        self.persist(descriptions)?;
        let relationships = self.relationships.drain();
        self.persist(relationships)
    }

    /// Dependent buffers must not flush until every core buffer has
    /// flushed once.
    fn ensure_core_flushed(&mut self) -> Result<(), TermError> {
        if self.core_flushed.set() {
            self.flush_core()?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> Result<(), TermError> {
        self.flush_core()?;
        self.core_flushed.set();
        let identifiers = self.identifiers.drain();
        self.persist(identifiers)?;
        let members = self.members.drain();
        self.persist(members)
    }

    /// Flush every buffer, finalise the commit and report the collected
    /// stats.
    pub fn complete(mut self) -> Result<ImportStats, TermError> {
        self.flush_all()?;
        let commit = self
            .commit
            .take()
            .ok_or_else(|| TermError::RuntimeState("import commit already closed".to_string()))?;
        match self.branching.mark_successful(&commit) {
            Ok(()) => {
                self.branching.close(commit)?;
                Ok(self.stats)
            }
            Err(error) => {
                self.branching.close(commit)?;
                Err(error)
            }
        }
    }

    /// Abandon the import: close the open commit without marking success,
    /// rolling back everything it staged.
    pub fn fail(mut self) -> Result<(), TermError> {
        if let Some(commit) = self.commit.take() {
            self.branching.close(commit)?;
        }
        Ok(())
    }
}

impl<S: IndexStore> ComponentFactory for ImportComponentFactory<'_, S> {
    fn new_concept_state(
        &mut self,
        concept_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        definition_status_id: &str,
    ) -> Result<(), TermError> {
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut concept = Concept::new(concept_id, module_id, parse_active(active));
        concept.definition_status_id = definition_status_id.to_string();
        if let Some(effective_time) = effective_time {
            concept.release(effective_time);
        }
        if let Some(batch) = self.concepts.save(concept) {
            self.persist(batch)?;
        }
        Ok(())
    }

    fn new_description_state(
        &mut self,
        description_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        concept_id: &str,
        language_code: &str,
        type_id: &str,
        term: &str,
        case_significance_id: &str,
    ) -> Result<(), TermError> {
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut description = Description::new(description_id, concept_id, type_id, term);
        description.fields.active = parse_active(active);
        description.fields.module_id = module_id.to_string();
        description.language_code = language_code.to_string();
        description.case_significance_id = case_significance_id.to_string();
        if let Some(effective_time) = effective_time {
            description.release(effective_time);
        }
        if let Some(batch) = self.descriptions.save(description) {
            self.persist(batch)?;
        }
        Ok(())
    }

    fn new_relationship_state(
        &mut self,
        relationship_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        destination_id: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
        stated: bool,
    ) -> Result<(), TermError> {
        if stated && STATED_RELATIONSHIPS_TO_SKIP.contains(&relationship_id) {
            debug!(relationship_id, "dropping known duplicate stated relationship");
            return Ok(());
        }
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut relationship = Relationship::new(
            relationship_id,
            source_id,
            type_id,
            destination_id,
            characteristic_type_id,
        );
        relationship.fields.active = parse_active(active);
        relationship.fields.module_id = module_id.to_string();
        relationship.relationship_group = relationship_group.parse().unwrap_or(0);
        relationship.modifier_id = modifier_id.to_string();
        if let Some(effective_time) = effective_time {
            relationship.release(effective_time);
        }
        if let Some(batch) = self.relationships.save(relationship) {
            self.persist(batch)?;
        }
        Ok(())
    }

    fn new_concrete_relationship_state(
        &mut self,
        relationship_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        source_id: &str,
        value: &str,
        relationship_group: &str,
        type_id: &str,
        characteristic_type_id: &str,
        modifier_id: &str,
    ) -> Result<(), TermError> {
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut relationship = Relationship::new_concrete(relationship_id, source_id, type_id, value);
        relationship.fields.active = parse_active(active);
        relationship.fields.module_id = module_id.to_string();
        relationship.relationship_group = relationship_group.parse().unwrap_or(0);
        relationship.characteristic_type_id = characteristic_type_id.to_string();
        relationship.modifier_id = modifier_id.to_string();
        if let Some(effective_time) = effective_time {
            relationship.release(effective_time);
        }
        if let Some(batch) = self.relationships.save(relationship) {
            self.persist(batch)?;
        }
        Ok(())
    }

    fn new_identifier_state(
        &mut self,
        alternate_identifier: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        identifier_scheme_id: &str,
        referenced_component_id: &str,
    ) -> Result<(), TermError> {
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut identifier = Identifier::new(
            alternate_identifier,
            identifier_scheme_id,
            referenced_component_id,
        );
        identifier.fields.active = parse_active(active);
        identifier.fields.module_id = module_id.to_string();
        if let Some(effective_time) = effective_time {
            identifier.release(effective_time);
        }
        self.ensure_core_flushed()?;
        if let Some(batch) = self.identifiers.save(identifier) {
            self.persist(batch)?;
        }
        Ok(())
    }

    fn new_reference_set_member_state(
        &mut self,
        field_names: &[String],
        member_id: &str,
        effective_time: &str,
        active: &str,
        module_id: &str,
        refset_id: &str,
        referenced_component_id: &str,
        other_values: &[String],
    ) -> Result<(), TermError> {
        let effective_time = parse_effective_time(effective_time);
        self.observe_effective_time(effective_time)?;
        let mut member = ReferenceSetMember::new(member_id, refset_id, referenced_component_id);
        member.fields.active = parse_active(active);
        member.fields.module_id = module_id.to_string();
        for (name, value) in field_names.iter().skip(6).zip(other_values) {
            member.set_additional_field(name.clone(), value.clone());
        }
        if let Some(effective_time) = effective_time {
            member.release(effective_time);
        }
        self.ensure_core_flushed()?;
        if let Some(batch) = self.members.save(member) {
            self.persist(batch)?;
        }
        Ok(())
    }
}
