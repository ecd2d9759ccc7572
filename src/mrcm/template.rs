//! Generation of MRCM attribute rules and domain templates.
//!
//! The generator is pure: it reads the rulebook, concept terms and the set
//! of data attributes, and produces the derived strings. Attributes are
//! processed in id order, so regenerating an unchanged rulebook yields
//! identical artefacts and no document updates.

use std::collections::{HashMap, HashSet};

use crate::{
    errors::TermError,
    mrcm::{MrcmAttributeDomain, MrcmRulebook},
};

/// Templates derived for one domain member.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainTemplates {
    pub precoordination: String,
    pub postcoordination: String,
}

/// All artefacts derived from one rulebook.
#[derive(Debug, Clone, Default)]
pub struct GeneratedMrcm {
    /// Attribute-range member id → attribute rule.
    pub attribute_rules: HashMap<String, String>,
    /// Domain member id → domain templates.
    pub domain_templates: HashMap<String, DomainTemplates>,
}

/// Pure generator seam: derives rules and templates from a rulebook.
pub trait TemplateGenerator: Send + Sync {
    fn generate(
        &self,
        rulebook: &MrcmRulebook,
        terms: &HashMap<String, String>,
        data_attributes: &HashSet<String>,
    ) -> Result<GeneratedMrcm, TermError>;
}

/// Default generator producing expression-constraint style rules.
#[derive(Debug, Clone, Default)]
pub struct MrcmTemplateGenerator;

impl MrcmTemplateGenerator {
    fn labelled(concept_id: &str, terms: &HashMap<String, String>) -> String {
        match terms.get(concept_id) {
            Some(term) => format!("{concept_id} |{term}|"),
            None => concept_id.to_string(),
        }
    }
}

impl TemplateGenerator for MrcmTemplateGenerator {
    fn generate(
        &self,
        rulebook: &MrcmRulebook,
        terms: &HashMap<String, String>,
        data_attributes: &HashSet<String>,
    ) -> Result<GeneratedMrcm, TermError> {
        let mut generated = GeneratedMrcm::default();

        for range in &rulebook.attribute_ranges {
            let attribute_id = &range.referenced_component_id;
            let applications: Vec<&MrcmAttributeDomain> = rulebook
                .attribute_domains
                .iter()
                .filter(|attribute_domain| {
                    &attribute_domain.referenced_component_id == attribute_id
                })
                .collect();
            if applications.is_empty() {
                continue;
            }
            let range_expression = if data_attributes.contains(attribute_id) {
                range.range_constraint.clone()
            } else {
                format!("({})", range.range_constraint)
            };
            let segments: Vec<String> = applications
                .iter()
                .map(|application| {
                    let domain_constraint = rulebook
                        .domain(&application.domain_id)
                        .map(|domain| domain.domain_constraint.clone())
                        .unwrap_or_else(|| format!("<< {}", application.domain_id));
                    let attribute = Self::labelled(attribute_id, terms);
                    if application.grouped {
                        format!(
                            "{domain_constraint}: [{}] {{ [{}] {attribute} = {range_expression} }}",
                            application.attribute_cardinality,
                            application.attribute_in_group_cardinality,
                        )
                    } else {
                        format!(
                            "{domain_constraint}: [{}] {attribute} = {range_expression}",
                            application.attribute_cardinality,
                        )
                    }
                })
                .collect();
            generated
                .attribute_rules
                .insert(range.member_id.clone(), segments.join(" OR "));
        }

        for domain in &rulebook.domains {
            let mut slots = Vec::new();
            for attribute_domain in rulebook
                .attribute_domains
                .iter()
                .filter(|attribute_domain| attribute_domain.domain_id == domain.referenced_component_id)
            {
                let attribute_id = &attribute_domain.referenced_component_id;
                let Some(range) = rulebook
                    .attribute_ranges
                    .iter()
                    .find(|range| &range.referenced_component_id == attribute_id)
                else {
                    continue;
                };
                let attribute = Self::labelled(attribute_id, terms);
                let range_expression = if data_attributes.contains(attribute_id) {
                    range.range_constraint.clone()
                } else {
                    format!("[[+id({})]]", range.range_constraint)
                };
                let slot = if attribute_domain.grouped {
                    format!(
                        "[[{}]] {{ [[{}]] {attribute} = {range_expression} }}",
                        attribute_domain.attribute_cardinality,
                        attribute_domain.attribute_in_group_cardinality,
                    )
                } else {
                    format!(
                        "[[{}]] {attribute} = {range_expression}",
                        attribute_domain.attribute_cardinality,
                    )
                };
                slots.push(slot);
            }
            let body = slots.join(", ");
            generated.domain_templates.insert(
                domain.member_id.clone(),
                DomainTemplates {
                    precoordination: format!(
                        "[[+id({})]]: {body}",
                        domain.proximal_primitive_constraint
                    ),
                    postcoordination: format!(
                        "[[+scg({})]]: {body}",
                        domain.proximal_primitive_constraint
                    ),
                },
            );
        }

        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mrcm::{MrcmAttributeRange, MrcmDomain};

    fn rulebook() -> MrcmRulebook {
        MrcmRulebook {
            domains: vec![MrcmDomain {
                member_id: "d-1".to_string(),
                referenced_component_id: "404684003".to_string(),
                domain_constraint: "<< 404684003 |Clinical finding|".to_string(),
                parent_domain: String::new(),
                proximal_primitive_constraint: "<< 404684003 |Clinical finding|".to_string(),
                proximal_primitive_refinement: String::new(),
            }],
            attribute_domains: vec![MrcmAttributeDomain {
                member_id: "ad-1".to_string(),
                referenced_component_id: "363698007".to_string(),
                domain_id: "404684003".to_string(),
                grouped: true,
                attribute_cardinality: "0..*".to_string(),
                attribute_in_group_cardinality: "0..1".to_string(),
                rule_strength_id: "723597001".to_string(),
                content_type_id: "723596005".to_string(),
            }],
            attribute_ranges: vec![MrcmAttributeRange {
                member_id: "ar-1".to_string(),
                referenced_component_id: "363698007".to_string(),
                range_constraint: "<< 442083009 |Anatomical or acquired body structure|"
                    .to_string(),
                attribute_rule: String::new(),
                rule_strength_id: "723597001".to_string(),
                content_type_id: "723596005".to_string(),
            }],
        }
        .sorted()
    }

    /// A grouped attribute yields a grouped rule scoped by its domain
    /// constraint.
    #[test]
    fn test_attribute_rule_generation() {
        let terms = HashMap::from([("363698007".to_string(), "Finding site".to_string())]);
        let generated = MrcmTemplateGenerator
            .generate(&rulebook(), &terms, &HashSet::new())
            .unwrap();
        assert_eq!(
            generated.attribute_rules["ar-1"],
            "<< 404684003 |Clinical finding|: [0..*] { [0..1] 363698007 |Finding site| = \
             (<< 442083009 |Anatomical or acquired body structure|) }"
        );
    }

    /// Domain templates carry the proximal primitive constraint and the
    /// attribute slots.
    #[test]
    fn test_domain_template_generation() {
        let generated = MrcmTemplateGenerator
            .generate(&rulebook(), &HashMap::new(), &HashSet::new())
            .unwrap();
        let templates = &generated.domain_templates["d-1"];
        assert_eq!(
            templates.precoordination,
            "[[+id(<< 404684003 |Clinical finding|)]]: [[0..*]] { [[0..1]] 363698007 = \
             [[+id(<< 442083009 |Anatomical or acquired body structure|)]] }"
        );
        assert!(templates.postcoordination.starts_with("[[+scg("));
    }

    /// Data attributes keep their concrete range constraint verbatim.
    #[test]
    fn test_data_attribute_range_verbatim() {
        let mut book = rulebook();
        book.attribute_ranges[0].range_constraint = "dec(>#0..)".to_string();
        let data_attributes = HashSet::from(["363698007".to_string()]);
        let generated = MrcmTemplateGenerator
            .generate(&book, &HashMap::new(), &data_attributes)
            .unwrap();
        assert_eq!(
            generated.attribute_rules["ar-1"],
            "<< 404684003 |Clinical finding|: [0..*] { [0..1] 363698007 = dec(>#0..) }"
        );
    }

    /// Generation twice over the same input is identical.
    #[test]
    fn test_deterministic() {
        let terms = HashMap::from([("363698007".to_string(), "Finding site".to_string())]);
        let first = MrcmTemplateGenerator
            .generate(&rulebook(), &terms, &HashSet::new())
            .unwrap();
        let second = MrcmTemplateGenerator
            .generate(&rulebook(), &terms, &HashSet::new())
            .unwrap();
        assert_eq!(first.attribute_rules, second.attribute_rules);
        assert_eq!(
            first.domain_templates.get("d-1"),
            second.domain_templates.get("d-1")
        );
    }
}
