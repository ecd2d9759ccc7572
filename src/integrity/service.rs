//! Integrity analysis entry points.
//!
//! Three ways in: the incremental check over a branch's uncommitted
//! changes, the branch-versus-parent fix verification, and the full-branch
//! sweep. A commit hook drives the first two automatically while the
//! branch carries the integrity-issue flag.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};

use tracing::{info, warn};

use crate::{
    branch::{
        BranchService, Commit, CommitListener, criteria::BranchCriteria, metadata, path,
    },
    domain::{
        code_system::CodeSystemService,
        concept::{self, Concept},
        concepts,
        description::{self, Description},
        fields,
        query_concept::{self, QueryConcept},
        refset_member::{self, ReferenceSetMember},
        relationship::{self, Relationship},
    },
    errors::TermError,
    integrity::{ConceptMini, IntegrityReport, SemanticIndexExtras, axiom},
    store::{DocKind, IndexStore, query::Query},
};

#[derive(Debug, Clone)]
struct AxiomFinding {
    referenced_component_id: String,
    bad_references: BTreeSet<String>,
}

/// Read-only integrity analysis over the branch-versioned store.
pub struct IntegrityService<S: IndexStore> {
    store: Arc<S>,
    page_size: usize,
}

impl<S: IndexStore> IntegrityService<S> {
    pub fn new(store: Arc<S>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    /// Incremental check: which components changed on this branch still
    /// reference missing or inactive concepts. Refuses to run on the root
    /// branch; that case must use the full sweep.
    pub fn find_changed_components_with_bad_integrity(
        &self,
        branching: &BranchService<S>,
        branch_path: &str,
    ) -> Result<IntegrityReport, TermError> {
        if branch_path == path::MAIN {
            return Err(TermError::RuntimeState(
                "the incremental integrity check cannot run on the root branch, \
                 use the full branch sweep"
                    .to_string(),
            ));
        }
        let on_branch = branching.criteria_on_branch(branch_path)?;
        let changed_live = branching.criteria_unpromoted_changes(branch_path)?;
        let changed_all = branching.criteria_unpromoted_changes_and_deletions(branch_path)?;

        let mut source_map = BTreeMap::new();
        let mut type_map = BTreeMap::new();
        let mut destination_map = BTreeMap::new();
        let mut axiom_findings: BTreeMap<String, AxiomFinding> = BTreeMap::new();

        // Concepts deleted or made inactive by this branch's changes.
        let changed_concepts = self.concept_ids(&changed_all)?;
        let still_active = self.active_concept_ids_among(&on_branch, &changed_concepts)?;
        let deleted_or_inactive: HashSet<String> = changed_concepts
            .difference(&still_active)
            .cloned()
            .collect();

        if !deleted_or_inactive.is_empty() {
            // Relationships on the branch referencing those concepts.
            let query = Query::bool_query()
                .must(on_branch.query_for(DocKind::Relationship))
                .must(Query::term(fields::ACTIVE, true))
                .must_not(Query::term(
                    relationship::fields::CHARACTERISTIC_TYPE_ID,
                    concepts::INFERRED_RELATIONSHIP,
                ))
                .should(Query::terms(
                    relationship::fields::SOURCE_ID,
                    deleted_or_inactive.iter().map(String::as_str),
                ))
                .should(Query::terms(
                    relationship::fields::TYPE_ID,
                    deleted_or_inactive.iter().map(String::as_str),
                ))
                .should(Query::terms(
                    relationship::fields::DESTINATION_ID,
                    deleted_or_inactive.iter().map(String::as_str),
                ))
                .build();
            for hit in self.store.stream::<Relationship>(&query, self.page_size)? {
                let hit = hit?;
                record_relationship(
                    &hit,
                    &deleted_or_inactive,
                    &mut source_map,
                    &mut type_map,
                    &mut destination_map,
                );
            }

            // Axioms whose stated semantic-index row mentions them.
            let query = Query::bool_query()
                .must(on_branch.query_for(DocKind::QueryConcept))
                .must(Query::term(query_concept::fields::STATED, true))
                .must(Query::terms(
                    query_concept::fields::ATTR_ALL,
                    deleted_or_inactive.iter().map(String::as_str),
                ))
                .build();
            let mut candidate_sources: HashSet<String> = HashSet::new();
            for hit in self.store.stream::<QueryConcept>(&query, self.page_size)? {
                candidate_sources.insert(hit?.concept_id);
            }
            if !candidate_sources.is_empty() {
                for member in self.axiom_members(
                    &on_branch,
                    refset_member::fields::REFERENCED_COMPONENT_ID,
                    &candidate_sources,
                )? {
                    let references = axiom::extract_referenced_concepts(
                        member.owl_expression().unwrap_or_default(),
                    )?;
                    let bad: BTreeSet<String> = references
                        .into_iter()
                        .filter(|reference| deleted_or_inactive.contains(reference))
                        .collect();
                    if !bad.is_empty() {
                        axiom_findings
                            .entry(member.member_id.clone())
                            .or_insert_with(|| AxiomFinding {
                                referenced_component_id: member.referenced_component_id.clone(),
                                bad_references: BTreeSet::new(),
                            })
                            .bad_references
                            .extend(bad);
                    }
                }
            }
        }

        // Independently: every changed component must reference concepts
        // that are active on the branch.
        let mut source_inverse: HashMap<String, Vec<String>> = HashMap::new();
        let mut type_inverse: HashMap<String, Vec<String>> = HashMap::new();
        let mut destination_inverse: HashMap<String, Vec<String>> = HashMap::new();
        let query = Query::bool_query()
            .must(changed_live.query_for(DocKind::Relationship))
            .must(Query::term(fields::ACTIVE, true))
            .must_not(Query::term(
                relationship::fields::CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
            .build();
        for hit in self.store.stream::<Relationship>(&query, self.page_size)? {
            let hit = hit?;
            source_inverse
                .entry(hit.source_id.clone())
                .or_default()
                .push(hit.relationship_id.clone());
            type_inverse
                .entry(hit.type_id.clone())
                .or_default()
                .push(hit.relationship_id.clone());
            if let Some(destination_id) = &hit.destination_id {
                destination_inverse
                    .entry(destination_id.clone())
                    .or_default()
                    .push(hit.relationship_id.clone());
            }
        }

        let mut axiom_inverse: HashMap<String, Vec<String>> = HashMap::new();
        let mut changed_axioms: HashMap<String, AxiomFinding> = HashMap::new();
        let query = Query::bool_query()
            .must(changed_live.query_for(DocKind::ReferenceSetMember))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::term(
                refset_member::fields::REFSET_ID,
                concepts::OWL_AXIOM_REFERENCE_SET,
            ))
            .build();
        for hit in self.store.stream::<ReferenceSetMember>(&query, self.page_size)? {
            let hit = hit?;
            let references =
                axiom::extract_referenced_concepts(hit.owl_expression().unwrap_or_default())?;
            for reference in &references {
                axiom_inverse
                    .entry(reference.clone())
                    .or_default()
                    .push(hit.member_id.clone());
            }
            changed_axioms.insert(
                hit.member_id.clone(),
                AxiomFinding {
                    referenced_component_id: hit.referenced_component_id.clone(),
                    bad_references: BTreeSet::new(),
                },
            );
        }

        let mut required: HashSet<String> = HashSet::new();
        required.extend(source_inverse.keys().cloned());
        required.extend(type_inverse.keys().cloned());
        required.extend(destination_inverse.keys().cloned());
        required.extend(axiom_inverse.keys().cloned());

        if !required.is_empty() {
            let active = self.active_concept_ids_among(&on_branch, &required)?;
            for missing in required.difference(&active) {
                for relationship_id in source_inverse.get(missing).into_iter().flatten() {
                    source_map.insert(relationship_id.clone(), missing.clone());
                }
                for relationship_id in type_inverse.get(missing).into_iter().flatten() {
                    type_map.insert(relationship_id.clone(), missing.clone());
                }
                for relationship_id in destination_inverse.get(missing).into_iter().flatten() {
                    destination_map.insert(relationship_id.clone(), missing.clone());
                }
                for member_id in axiom_inverse.get(missing).into_iter().flatten() {
                    if let Some(finding) = changed_axioms.get(member_id) {
                        axiom_findings
                            .entry(member_id.clone())
                            .or_insert_with(|| AxiomFinding {
                                referenced_component_id: finding.referenced_component_id.clone(),
                                bad_references: BTreeSet::new(),
                            })
                            .bad_references
                            .insert(missing.clone());
                    }
                }
            }
        }

        self.assemble_report(&on_branch, source_map, type_map, destination_map, axiom_findings)
    }

    /// Fix verification: a task branch is fixing integrity problems that
    /// exist on its parent code-system branch; report the problems that
    /// remain after the fix. An empty result clears the integrity-issue
    /// flag on the fix branch.
    pub fn find_changed_components_with_bad_integrity_not_fixed(
        &self,
        branching: &BranchService<S>,
        fix_branch_path: &str,
        parent_system_path: &str,
    ) -> Result<IntegrityReport, TermError> {
        let project_path = path::parent_path(fix_branch_path).ok_or_else(|| {
            TermError::Validation("the fix branch must have a parent".to_string())
        })?;
        if !path::is_descendant_or_equal(project_path, parent_system_path) {
            return Err(TermError::Validation(format!(
                "`{project_path}` is not a descendant of `{parent_system_path}`"
            )));
        }
        let parent_system = branching.branch(parent_system_path)?;
        for rebased_path in [project_path, fix_branch_path] {
            let branch = branching.branch(rebased_path)?;
            if branch.base_timestamp < parent_system.head_timestamp {
                return Err(TermError::RuntimeState(format!(
                    "branch `{rebased_path}` must be rebased before verifying integrity fixes"
                )));
            }
        }

        let parent_report =
            self.find_changed_components_with_bad_integrity(branching, parent_system_path)?;
        if parent_report.is_empty() {
            return self.find_changed_components_with_bad_integrity(branching, fix_branch_path);
        }

        let on_fix = branching.criteria_on_branch(fix_branch_path)?;

        // Re-fetch the previously bad relationships as they stand on the
        // fix branch.
        let mut relationship_ids: BTreeSet<String> = BTreeSet::new();
        relationship_ids.extend(parent_report.relationships_with_missing_or_inactive_source.keys().cloned());
        relationship_ids.extend(parent_report.relationships_with_missing_or_inactive_type.keys().cloned());
        relationship_ids.extend(
            parent_report
                .relationships_with_missing_or_inactive_destination
                .keys()
                .cloned(),
        );
        let mut current_relationships = Vec::new();
        if !relationship_ids.is_empty() {
            let query = Query::bool_query()
                .must(on_fix.query_for(DocKind::Relationship))
                .must(Query::terms(
                    relationship::fields::RELATIONSHIP_ID,
                    relationship_ids.iter().map(String::as_str),
                ))
                .must(Query::term(fields::ACTIVE, true))
                .must_not(Query::term(
                    relationship::fields::CHARACTERISTIC_TYPE_ID,
                    concepts::INFERRED_RELATIONSHIP,
                ))
                .build();
            for hit in self.store.stream::<Relationship>(&query, self.page_size)? {
                current_relationships.push(hit?);
            }
        }

        // Re-fetch and re-parse the previously bad axioms.
        let axiom_ids: HashSet<String> = parent_report
            .axioms_with_missing_or_inactive_referenced_concept
            .keys()
            .cloned()
            .collect();
        let mut current_axioms: Vec<(ReferenceSetMember, BTreeSet<String>)> = Vec::new();
        if !axiom_ids.is_empty() {
            for member in
                self.axiom_members(&on_fix, refset_member::fields::MEMBER_ID, &axiom_ids)?
            {
                let references = axiom::extract_referenced_concepts(
                    member.owl_expression().unwrap_or_default(),
                )?;
                current_axioms.push((member, references));
            }
        }

        // Which of the concepts now referenced are still missing or
        // inactive on the fix branch.
        let mut candidates: HashSet<String> = HashSet::new();
        for current in &current_relationships {
            candidates.insert(current.source_id.clone());
            candidates.insert(current.type_id.clone());
            if let Some(destination_id) = &current.destination_id {
                candidates.insert(destination_id.clone());
            }
        }
        for (_, references) in &current_axioms {
            candidates.extend(references.iter().cloned());
        }
        let active = self.active_concept_ids_among(&on_fix, &candidates)?;
        let still_bad: HashSet<String> = candidates.difference(&active).cloned().collect();

        let mut source_map = BTreeMap::new();
        let mut type_map = BTreeMap::new();
        let mut destination_map = BTreeMap::new();
        let mut axiom_findings: BTreeMap<String, AxiomFinding> = BTreeMap::new();
        for current in &current_relationships {
            record_relationship(
                current,
                &still_bad,
                &mut source_map,
                &mut type_map,
                &mut destination_map,
            );
        }
        for (member, references) in &current_axioms {
            let bad: BTreeSet<String> = references
                .iter()
                .filter(|reference| still_bad.contains(*reference))
                .cloned()
                .collect();
            if !bad.is_empty() {
                axiom_findings.insert(
                    member.member_id.clone(),
                    AxiomFinding {
                        referenced_component_id: member.referenced_component_id.clone(),
                        bad_references: bad,
                    },
                );
            }
        }

        let report =
            self.assemble_report(&on_fix, source_map, type_map, destination_map, axiom_findings)?;
        if report.is_empty() {
            info!(branch = fix_branch_path, "integrity issues fixed, clearing flag");
            let mut branch_metadata = branching.branch(fix_branch_path)?.metadata;
            branch_metadata.remove_in(metadata::INTERNAL, metadata::INTEGRITY_ISSUE);
            branching.update_metadata(fix_branch_path, branch_metadata)?;
        }
        Ok(report)
    }

    /// Full sweep: every active relationship (stated or inferred view) and,
    /// for the stated view, every axiom, checked against the set of active
    /// concepts on the branch.
    pub fn find_all_components_with_bad_integrity(
        &self,
        branching: &BranchService<S>,
        branch_path: &str,
        stated: bool,
    ) -> Result<IntegrityReport, TermError> {
        let on_branch = branching.criteria_on_branch(branch_path)?;
        let active_concepts = self.active_concept_ids(&on_branch)?;

        let mut source_map = BTreeMap::new();
        let mut type_map = BTreeMap::new();
        let mut destination_map = BTreeMap::new();
        let mut axiom_findings: BTreeMap<String, AxiomFinding> = BTreeMap::new();

        let mut builder = Query::bool_query()
            .must(on_branch.query_for(DocKind::Relationship))
            .must(Query::term(fields::ACTIVE, true));
        builder = if stated {
            builder.must_not(Query::term(
                relationship::fields::CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
        } else {
            builder.must(Query::term(
                relationship::fields::CHARACTERISTIC_TYPE_ID,
                concepts::INFERRED_RELATIONSHIP,
            ))
        };
        for hit in self.store.stream::<Relationship>(&builder.build(), self.page_size)? {
            let hit = hit?;
            if !active_concepts.contains(&hit.source_id) {
                source_map.insert(hit.relationship_id.clone(), hit.source_id.clone());
            }
            if !active_concepts.contains(&hit.type_id) {
                type_map.insert(hit.relationship_id.clone(), hit.type_id.clone());
            }
            if let Some(destination_id) = &hit.destination_id
                && !active_concepts.contains(destination_id)
            {
                destination_map.insert(hit.relationship_id.clone(), destination_id.clone());
            }
        }

        if stated {
            let query = Query::bool_query()
                .must(on_branch.query_for(DocKind::QueryConcept))
                .must(Query::term(query_concept::fields::STATED, true))
                .build();
            let mut candidate_sources: HashSet<String> = HashSet::new();
            for hit in self.store.stream::<QueryConcept>(&query, self.page_size)? {
                let hit = hit?;
                if hit
                    .attribute_destinations()
                    .any(|destination| !active_concepts.contains(destination))
                {
                    candidate_sources.insert(hit.concept_id);
                }
            }
            if !candidate_sources.is_empty() {
                for member in self.axiom_members(
                    &on_branch,
                    refset_member::fields::REFERENCED_COMPONENT_ID,
                    &candidate_sources,
                )? {
                    let references = axiom::extract_referenced_concepts(
                        member.owl_expression().unwrap_or_default(),
                    )?;
                    let bad: BTreeSet<String> = references
                        .into_iter()
                        .filter(|reference| !active_concepts.contains(reference))
                        .collect();
                    if !bad.is_empty() {
                        axiom_findings.insert(
                            member.member_id.clone(),
                            AxiomFinding {
                                referenced_component_id: member.referenced_component_id.clone(),
                                bad_references: bad,
                            },
                        );
                    }
                }
            }
        }

        self.assemble_report(&on_branch, source_map, type_map, destination_map, axiom_findings)
    }

    /// Operator cross-check: semantic-index rows whose concept is not
    /// active on the branch, split by stated and inferred form.
    pub fn find_extra_concepts_in_semantic_index(
        &self,
        branching: &BranchService<S>,
        branch_path: &str,
    ) -> Result<SemanticIndexExtras, TermError> {
        let on_branch = branching.criteria_on_branch(branch_path)?;
        let active_concepts = self.active_concept_ids(&on_branch)?;

        let mut extras = SemanticIndexExtras::default();
        let query = on_branch.query_for(DocKind::QueryConcept);
        for hit in self.store.stream::<QueryConcept>(&query, self.page_size)? {
            let hit = hit?;
            if !active_concepts.contains(&hit.concept_id) {
                if hit.stated {
                    extras.stated.push(hit.concept_id);
                } else {
                    extras.inferred.push(hit.concept_id);
                }
            }
        }
        extras.stated.sort();
        extras.inferred.sort();
        Ok(extras)
    }

    fn concept_ids(&self, criteria: &BranchCriteria) -> Result<HashSet<String>, TermError> {
        let query = criteria.query_for(DocKind::Concept);
        let mut ids = HashSet::new();
        for row in self.store.stream_rows(DocKind::Concept, &query, self.page_size)? {
            if let Some(concept_id) = row.source[concept::fields::CONCEPT_ID].as_str() {
                ids.insert(concept_id.to_string());
            }
        }
        Ok(ids)
    }

    fn active_concept_ids(&self, criteria: &BranchCriteria) -> Result<HashSet<String>, TermError> {
        let query = Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .must(Query::term(fields::ACTIVE, true))
            .build();
        let mut ids = HashSet::new();
        for hit in self.store.stream::<Concept>(&query, self.page_size)? {
            ids.insert(hit?.concept_id);
        }
        Ok(ids)
    }

    fn active_concept_ids_among(
        &self,
        criteria: &BranchCriteria,
        among: &HashSet<String>,
    ) -> Result<HashSet<String>, TermError> {
        if among.is_empty() {
            return Ok(HashSet::new());
        }
        let query = Query::bool_query()
            .must(criteria.query_for(DocKind::Concept))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::terms(
                concept::fields::CONCEPT_ID,
                among.iter().map(String::as_str),
            ))
            .build();
        let mut ids = HashSet::new();
        for hit in self.store.stream::<Concept>(&query, self.page_size)? {
            ids.insert(hit?.concept_id);
        }
        Ok(ids)
    }

    fn axiom_members(
        &self,
        criteria: &BranchCriteria,
        id_field: &str,
        ids: &HashSet<String>,
    ) -> Result<Vec<ReferenceSetMember>, TermError> {
        let query = Query::bool_query()
            .must(criteria.query_for(DocKind::ReferenceSetMember))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::term(
                refset_member::fields::REFSET_ID,
                concepts::OWL_AXIOM_REFERENCE_SET,
            ))
            .must(Query::terms(id_field, ids.iter().map(String::as_str)))
            .build();
        let mut members = Vec::new();
        for hit in self.store.stream::<ReferenceSetMember>(&query, self.page_size)? {
            members.push(hit?);
        }
        Ok(members)
    }

    /// Join FSN and preferred term onto axiom findings and assemble the
    /// final report.
    fn assemble_report(
        &self,
        criteria: &BranchCriteria,
        source_map: BTreeMap<String, String>,
        type_map: BTreeMap<String, String>,
        destination_map: BTreeMap<String, String>,
        axiom_findings: BTreeMap<String, AxiomFinding>,
    ) -> Result<IntegrityReport, TermError> {
        let mut axioms = BTreeMap::new();
        if !axiom_findings.is_empty() {
            let concept_ids: HashSet<String> = axiom_findings
                .values()
                .map(|finding| finding.referenced_component_id.clone())
                .collect();
            let minis = self.concept_minis(criteria, &concept_ids)?;
            for (member_id, finding) in axiom_findings {
                let mut mini = minis
                    .get(&finding.referenced_component_id)
                    .cloned()
                    .unwrap_or_else(|| ConceptMini::new(finding.referenced_component_id.clone()));
                mini.set_missing_or_inactive_concepts(
                    finding.bad_references.into_iter().collect(),
                );
                axioms.insert(member_id, mini);
            }
        }
        Ok(IntegrityReport {
            relationships_with_missing_or_inactive_source: source_map,
            relationships_with_missing_or_inactive_type: type_map,
            relationships_with_missing_or_inactive_destination: destination_map,
            axioms_with_missing_or_inactive_referenced_concept: axioms,
        })
    }

    fn concept_minis(
        &self,
        criteria: &BranchCriteria,
        concept_ids: &HashSet<String>,
    ) -> Result<HashMap<String, ConceptMini>, TermError> {
        let mut minis: HashMap<String, ConceptMini> = concept_ids
            .iter()
            .map(|concept_id| (concept_id.clone(), ConceptMini::new(concept_id.clone())))
            .collect();
        let query = Query::bool_query()
            .must(criteria.query_for(DocKind::Description))
            .must(Query::term(fields::ACTIVE, true))
            .must(Query::terms(
                description::fields::CONCEPT_ID,
                concept_ids.iter().map(String::as_str),
            ))
            .build();
        for hit in self.store.stream::<Description>(&query, self.page_size)? {
            let hit = hit?;
            let Some(mini) = minis.get_mut(&hit.concept_id) else {
                continue;
            };
            if hit.is_fsn() {
                mini.fsn.get_or_insert(hit.term);
            } else if hit.type_id == concepts::SYNONYM {
                mini.pt.get_or_insert(hit.term);
            }
        }
        Ok(minis)
    }
}

fn record_relationship(
    relationship: &Relationship,
    bad_concepts: &HashSet<String>,
    source_map: &mut BTreeMap<String, String>,
    type_map: &mut BTreeMap<String, String>,
    destination_map: &mut BTreeMap<String, String>,
) {
    if bad_concepts.contains(&relationship.source_id) {
        source_map.insert(
            relationship.relationship_id.clone(),
            relationship.source_id.clone(),
        );
    }
    if bad_concepts.contains(&relationship.type_id) {
        type_map.insert(
            relationship.relationship_id.clone(),
            relationship.type_id.clone(),
        );
    }
    if let Some(destination_id) = &relationship.destination_id
        && bad_concepts.contains(destination_id)
    {
        destination_map.insert(relationship.relationship_id.clone(), destination_id.clone());
    }
}

/// Commit hook: while a branch carries the integrity-issue flag, re-check
/// on every commit and drop the flag once the issues are gone. A failure
/// of the check itself is logged and never blocks the commit.
pub struct IntegrityCommitHook<S: IndexStore> {
    service: IntegrityService<S>,
    code_systems: Arc<CodeSystemService>,
}

impl<S: IndexStore> IntegrityCommitHook<S> {
    pub fn new(service: IntegrityService<S>, code_systems: Arc<CodeSystemService>) -> Self {
        Self {
            service,
            code_systems,
        }
    }

    fn run_check(
        &self,
        commit: &Commit,
        branching: &BranchService<S>,
    ) -> Result<Option<IntegrityReport>, TermError> {
        let Some(code_system) = self.code_systems.find_closest_by_branch(commit.path()) else {
            return Ok(None);
        };
        let report = if commit.path() == code_system.branch_path {
            self.service
                .find_changed_components_with_bad_integrity(branching, commit.path())?
        } else {
            self.service.find_changed_components_with_bad_integrity_not_fixed(
                branching,
                commit.path(),
                &code_system.branch_path,
            )?
        };
        Ok(Some(report))
    }
}

impl<S: IndexStore> CommitListener<S> for IntegrityCommitHook<S> {
    fn pre_commit_completion(
        &self,
        commit: &Commit,
        branching: &BranchService<S>,
    ) -> Result<(), TermError> {
        let branch = branching.branch(commit.path())?;
        if !branch
            .metadata
            .flag_set(metadata::INTERNAL, metadata::INTEGRITY_ISSUE)
        {
            return Ok(());
        }
        match self.run_check(commit, branching) {
            Ok(Some(report)) if report.is_empty() => {
                info!(branch = commit.path(), "integrity issues resolved in commit");
                let mut branch_metadata = branching.branch(commit.path())?.metadata;
                branch_metadata.remove_in(metadata::INTERNAL, metadata::INTEGRITY_ISSUE);
                branching.update_metadata(commit.path(), branch_metadata)?;
            }
            Ok(_) => {}
            Err(check_error) => {
                // Failing to reason about integrity must not block valid
                // writes.
                warn!(branch = commit.path(), %check_error, "integrity commit check failed");
            }
        }
        Ok(())
    }
}
