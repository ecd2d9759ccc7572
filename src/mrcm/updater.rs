//! MRCM auto-maintenance commit listener.
//!
//! On every content-bearing commit that changes rulebook members, the
//! updater reloads the active rulebook, regenerates the derived attribute
//! rules and domain templates, and writes the changed members back inside
//! the same commit. Members already written by the commit are rewritten in
//! place through the store's scripted-update primitive, so no component id
//! ever carries two versions with one commit timepoint. Generator or store
//! failures propagate and roll the commit back.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::{
    branch::{BranchService, Commit, CommitListener, criteria, metadata},
    domain::{
        Component, concepts,
        description::{self, Description},
        fields,
        query_concept::{self, QueryConcept},
        refset_member::{self, ReferenceSetMember},
    },
    errors::TermError,
    mrcm::{
        MRCM_REFSETS, MrcmAttributeDomain, MrcmAttributeRange, MrcmDomain, MrcmRulebook,
        fields as mrcm_fields,
    },
    mrcm::template::{GeneratedMrcm, MrcmTemplateGenerator, TemplateGenerator},
    store::{DocKind, IndexStore, query::Query},
};

/// Commit listener recomputing MRCM-derived artefacts.
pub struct MrcmUpdater<S: IndexStore, G: TemplateGenerator = MrcmTemplateGenerator> {
    store: Arc<S>,
    generator: G,
    page_size: usize,
}

impl<S: IndexStore> MrcmUpdater<S> {
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self {
            store,
            generator: MrcmTemplateGenerator,
            page_size,
        }
    }
}

impl<S: IndexStore, G: TemplateGenerator> MrcmUpdater<S, G> {
    pub fn with_generator(store: Arc<S>, generator: G, page_size: usize) -> Self {
        Self {
            store,
            generator,
            page_size,
        }
    }

    fn changed_rulebook_members(&self, commit: &Commit) -> Result<Vec<String>, TermError> {
        let query = Query::bool_query()
            .must(criteria::changed_in_commit(commit.path(), commit.timepoint()))
            .must(Query::terms(refset_member::fields::REFSET_ID, MRCM_REFSETS))
            .build();
        let mut member_ids = Vec::new();
        for hit in self
            .store
            .stream::<ReferenceSetMember>(&query, self.page_size)?
        {
            member_ids.push(hit?.member_id);
        }
        Ok(member_ids)
    }

    fn load_rulebook(
        &self,
        branching: &BranchService<S>,
        commit: &Commit,
    ) -> Result<(MrcmRulebook, HashMap<String, ReferenceSetMember>), TermError> {
        let visible = branching.criteria_including_open_commit(commit)?;
        let query = Query::bool_query()
            .must(visible.query_for(DocKind::ReferenceSetMember))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::terms(refset_member::fields::REFSET_ID, MRCM_REFSETS))
            .build();
        let mut rulebook = MrcmRulebook::default();
        let mut members = HashMap::new();
        for hit in self
            .store
            .stream::<ReferenceSetMember>(&query, self.page_size)?
        {
            let member = hit?;
            match member.refset_id.as_str() {
                concepts::MRCM_DOMAIN_REFERENCE_SET => {
                    rulebook.domains.push(MrcmDomain::from_member(&member));
                }
                concepts::MRCM_ATTRIBUTE_DOMAIN_REFERENCE_SET => {
                    rulebook
                        .attribute_domains
                        .push(MrcmAttributeDomain::from_member(&member));
                }
                _ => {
                    rulebook
                        .attribute_ranges
                        .push(MrcmAttributeRange::from_member(&member));
                }
            }
            members.insert(member.member_id.clone(), member);
        }
        Ok((rulebook.sorted(), members))
    }

    /// FSN for domain concepts, preferred term for attributes.
    fn fetch_terms(
        &self,
        branching: &BranchService<S>,
        commit: &Commit,
        rulebook: &MrcmRulebook,
    ) -> Result<HashMap<String, String>, TermError> {
        let mut domain_ids: HashSet<String> = HashSet::new();
        let mut attribute_ids: HashSet<String> = HashSet::new();
        for domain in &rulebook.domains {
            domain_ids.insert(domain.referenced_component_id.clone());
        }
        for attribute_domain in &rulebook.attribute_domains {
            attribute_ids.insert(attribute_domain.referenced_component_id.clone());
        }
        for range in &rulebook.attribute_ranges {
            attribute_ids.insert(range.referenced_component_id.clone());
        }

        let all_ids: Vec<&str> = domain_ids
            .iter()
            .chain(attribute_ids.iter())
            .map(String::as_str)
            .collect();
        if all_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let visible = branching.criteria_including_open_commit(commit)?;
        let query = Query::bool_query()
            .must(visible.query_for(DocKind::Description))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::terms(description::fields::CONCEPT_ID, all_ids))
            .build();
        let mut terms = HashMap::new();
        for hit in self.store.stream::<Description>(&query, self.page_size)? {
            let hit = hit?;
            let wanted = if domain_ids.contains(&hit.concept_id) {
                hit.is_fsn()
            } else {
                hit.type_id == concepts::SYNONYM
            };
            if wanted {
                terms.entry(hit.concept_id.clone()).or_insert(hit.term);
            }
        }
        Ok(terms)
    }

    /// Descendants-or-self of the concept model data attribute, from the
    /// stated semantic index.
    fn data_attribute_ids(
        &self,
        branching: &BranchService<S>,
        commit: &Commit,
    ) -> Result<HashSet<String>, TermError> {
        let visible = branching.criteria_including_open_commit(commit)?;
        let query = Query::bool_query()
            .must(visible.query_for(DocKind::QueryConcept))
            .must(Query::term(query_concept::fields::STATED, true))
            .must(Query::terms(
                query_concept::fields::ANCESTORS,
                [concepts::CONCEPT_MODEL_DATA_ATTRIBUTE],
            ))
            .build();
        let mut ids = HashSet::from([concepts::CONCEPT_MODEL_DATA_ATTRIBUTE.to_string()]);
        for hit in self.store.stream::<QueryConcept>(&query, self.page_size)? {
            ids.insert(hit?.concept_id);
        }
        Ok(ids)
    }

    /// Apply generated artefacts onto the member documents, returning the
    /// members that changed together with their changed additional fields.
    fn apply_generated(
        &self,
        generated: &GeneratedMrcm,
        members: &mut HashMap<String, ReferenceSetMember>,
        default_module_id: Option<&str>,
    ) -> Vec<(ReferenceSetMember, IndexMap<String, String>)> {
        let mut updated = Vec::new();
        for (member_id, member) in members.iter_mut() {
            let mut changed_fields: IndexMap<String, String> = IndexMap::new();
            if let Some(rule) = generated.attribute_rules.get(member_id)
                && member.additional_field(mrcm_fields::ATTRIBUTE_RULE) != Some(rule.as_str())
            {
                changed_fields.insert(mrcm_fields::ATTRIBUTE_RULE.to_string(), rule.clone());
            }
            if let Some(templates) = generated.domain_templates.get(member_id) {
                if member.additional_field(mrcm_fields::DOMAIN_TEMPLATE_FOR_PRECOORDINATION)
                    != Some(templates.precoordination.as_str())
                {
                    changed_fields.insert(
                        mrcm_fields::DOMAIN_TEMPLATE_FOR_PRECOORDINATION.to_string(),
                        templates.precoordination.clone(),
                    );
                }
                if member.additional_field(mrcm_fields::DOMAIN_TEMPLATE_FOR_POSTCOORDINATION)
                    != Some(templates.postcoordination.as_str())
                {
                    changed_fields.insert(
                        mrcm_fields::DOMAIN_TEMPLATE_FOR_POSTCOORDINATION.to_string(),
                        templates.postcoordination.clone(),
                    );
                }
            }
            if changed_fields.is_empty() {
                continue;
            }
            for (name, value) in &changed_fields {
                member.set_additional_field(name.clone(), value.clone());
            }
            if let Some(module_id) = default_module_id {
                member.fields.module_id = module_id.to_string();
            }
            member.update_effective_time();
            member.mark_changed();
            updated.push((member.clone(), changed_fields));
        }
        updated.sort_by(|a, b| a.0.member_id.cmp(&b.0.member_id));
        updated
    }
}

impl<S: IndexStore, G: TemplateGenerator> CommitListener<S> for MrcmUpdater<S, G> {
    fn pre_commit_completion(
        &self,
        commit: &Commit,
        branching: &BranchService<S>,
    ) -> Result<(), TermError> {
        let branch = branching.branch(commit.path())?;
        if branch.metadata.flag_set(
            metadata::INTERNAL,
            metadata::IMPORTING_CODE_SYSTEM_VERSION,
        ) {
            return Ok(());
        }
        let changed_member_ids = self.changed_rulebook_members(commit)?;
        if changed_member_ids.is_empty() {
            return Ok(());
        }
        info!(
            branch = commit.path(),
            changed = changed_member_ids.len(),
            "MRCM rulebook changed, regenerating derived artefacts"
        );

        let (rulebook, mut members) = self.load_rulebook(branching, commit)?;
        let terms = self.fetch_terms(branching, commit, &rulebook)?;
        let data_attributes = self.data_attribute_ids(branching, commit)?;
        let generated = self
            .generator
            .generate(&rulebook, &terms, &data_attributes)?;
        let default_module_id = branch.metadata.get(metadata::DEFAULT_MODULE_ID);
        let updated = self.apply_generated(&generated, &mut members, default_module_id);
        if updated.is_empty() {
            debug!("MRCM artefacts already up to date");
            return Ok(());
        }

        // Members this commit already wrote are rewritten in place so a
        // single commit never carries two versions of one member.
        let updated_ids: Vec<&str> = updated
            .iter()
            .map(|(member, _)| member.member_id.as_str())
            .collect();
        let query = Query::bool_query()
            .must(criteria::changed_in_commit(commit.path(), commit.timepoint()))
            .must(Query::terms(refset_member::fields::MEMBER_ID, updated_ids))
            .build();
        let mut in_commit: HashSet<String> = HashSet::new();
        for hit in self
            .store
            .stream::<ReferenceSetMember>(&query, self.page_size)?
        {
            let member_id = hit?.member_id;
            if !in_commit.insert(member_id.clone()) {
                return Err(TermError::RuntimeState(format!(
                    "member `{member_id}` has two versions at one commit timepoint"
                )));
            }
        }

        let mut batch = Vec::new();
        let mut rewrites = 0usize;
        for (member, changed_fields) in updated {
            if in_commit.contains(&member.member_id) {
                self.store
                    .rewrite_additional_fields(commit.path(), &member.member_id, &changed_fields)?;
                rewrites += 1;
            } else {
                batch.push(member);
            }
        }
        if rewrites > 0 {
            self.store.refresh()?;
        }
        branching.save_batch(commit, batch)?;
        Ok(())
    }
}
