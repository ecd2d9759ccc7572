//! Reference extraction from OWL functional-syntax expressions.
//!
//! Axiom members carry their logical definition as an OWL expression such
//! as `SubClassOf(:195967001 ObjectIntersectionOf(:50043002
//! ObjectSomeValuesFrom(:363698007 :955009)))`. Integrity analysis only
//! needs the set of referenced concept ids; the extractor collects the
//! `:sctid` tokens (and `<http://snomed.info/id/sctid>` IRIs) while
//! validating that the parentheses balance.

use std::collections::BTreeSet;

use crate::errors::TermError;

const IRI_PREFIX: &str = "http://snomed.info/id/";

/// The set of concept ids referenced by an OWL expression.
///
/// Fails on unbalanced parentheses or when no reference can be found, so
/// a mangled expression never passes as an axiom without dependencies.
pub fn extract_referenced_concepts(expression: &str) -> Result<BTreeSet<String>, TermError> {
    let mut references = BTreeSet::new();
    let mut depth: i32 = 0;
    let mut chars = expression.char_indices().peekable();

    while let Some((index, character)) = chars.next() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(TermError::Conversion(format!(
                        "unbalanced parentheses in OWL expression `{expression}`"
                    )));
                }
            }
            ':' => {
                let mut id = String::new();
                while let Some((_, digit)) = chars.peek() {
                    if digit.is_ascii_digit() {
                        id.push(*digit);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if !id.is_empty() {
                    references.insert(id);
                }
            }
            '<' => {
                let rest = &expression[index + 1..];
                if let Some(rest) = rest.strip_prefix(IRI_PREFIX) {
                    let id: String =
                        rest.chars().take_while(char::is_ascii_digit).collect();
                    if !id.is_empty() {
                        references.insert(id);
                    }
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(TermError::Conversion(format!(
            "unbalanced parentheses in OWL expression `{expression}`"
        )));
    }
    if references.is_empty() {
        return Err(TermError::Conversion(format!(
            "no concept references in OWL expression `{expression}`"
        )));
    }
    Ok(references)
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    /// References are collected from nested class expressions.
    #[test]
    fn test_extract_nested_references() {
        let expression = "SubClassOf(:195967001 ObjectIntersectionOf(:50043002 \
             ObjectSomeValuesFrom(:363698007 :955009)))";
        let references = extract_referenced_concepts(expression).unwrap();
        assert_eq!(
            references,
            BTreeSet::from([
                "195967001".to_string(),
                "50043002".to_string(),
                "363698007".to_string(),
                "955009".to_string(),
            ])
        );
    }

    /// Full IRIs resolve to their trailing id; foreign prefixes are
    /// ignored.
    #[test]
    fn test_extract_iri_references() {
        let expression =
            "SubClassOf(<http://snomed.info/id/195967001> <http://snomed.info/id/50043002>)";
        let references = extract_referenced_concepts(expression).unwrap();
        assert_eq!(references.len(), 2);
        assert!(references.contains("195967001"));
    }

    /// Datatype prefixes such as `xsd:decimal` contribute no references.
    #[test]
    fn test_datatype_prefix_ignored() {
        let expression = "SubClassOf(:373873005 DataHasValue(:3264475007 \
             \"250\"^^xsd:decimal))";
        let references = extract_referenced_concepts(expression).unwrap();
        assert_eq!(
            references,
            BTreeSet::from(["373873005".to_string(), "3264475007".to_string()])
        );
    }

    /// Unbalanced expressions and reference-free strings are conversion
    /// errors.
    #[test]
    fn test_malformed_expressions() {
        assert!(extract_referenced_concepts("SubClassOf(:1 :2").is_err());
        assert!(extract_referenced_concepts("SubClassOf :1 :2))").is_err());
        assert!(extract_referenced_concepts("EquivalentClasses()").is_err());
    }

    quickcheck! {
        /// Extraction is deterministic: parsing twice yields the same set.
        fn prop_extraction_deterministic(ids: Vec<u32>) -> bool {
            if ids.is_empty() {
                return true;
            }
            let body: Vec<String> = ids.iter().map(|id| format!(":{id}")).collect();
            let expression = format!("SubClassOf({})", body.join(" "));
            extract_referenced_concepts(&expression).ok()
                == extract_referenced_concepts(&expression).ok()
        }
    }
}
