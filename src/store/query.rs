//! Boolean query trees evaluated by index store implementations.
//!
//! Queries are expressed as `must`/`must_not`/`should` combinations of
//! `term`, `terms`, `range` and `exists` leaves over indexed field names,
//! plus an `ids` leaf matching internal row identifiers (used by branch
//! criteria to exclude versions a branch has replaced).

use std::collections::HashSet;

use serde_json::Value;

/// A single indexed field value, as stored in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl FieldValue {
    /// Compare against a JSON value from a stored document. Arrays match
    /// when any element matches, mirroring multi-valued index fields.
    pub fn matches(&self, stored: &Value) -> bool {
        match stored {
            Value::Array(items) => items.iter().any(|item| self.matches(item)),
            Value::String(s) => matches!(self, FieldValue::Str(v) if v == s),
            Value::Number(n) => {
                matches!(self, FieldValue::Int(v) if n.as_i64() == Some(*v))
            }
            Value::Bool(b) => matches!(self, FieldValue::Bool(v) if v == b),
            _ => false,
        }
    }
}

/// Bounds of a numeric `range` leaf. Unset bounds are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct RangeBounds {
    pub gt: Option<i64>,
    pub gte: Option<i64>,
    pub lt: Option<i64>,
    pub lte: Option<i64>,
}

impl RangeBounds {
    fn contains(&self, value: i64) -> bool {
        if let Some(gt) = self.gt
            && value <= gt
        {
            return false;
        }
        if let Some(gte) = self.gte
            && value < gte
        {
            return false;
        }
        if let Some(lt) = self.lt
            && value >= lt
        {
            return false;
        }
        if let Some(lte) = self.lte
            && value > lte
        {
            return false;
        }
        true
    }
}

/// A query node. Build with [`Query::bool_query`] and the leaf constructors.
#[derive(Debug, Clone)]
pub enum Query {
    Bool(BoolQuery),
    Term { field: String, value: FieldValue },
    Terms { field: String, values: Vec<FieldValue> },
    Range { field: String, bounds: RangeBounds },
    Exists { field: String },
    /// Matches documents whose internal row id is in the set.
    Ids(HashSet<u64>),
    MatchAll,
}

/// Boolean combination node.
///
/// A document matches when every `must` matches, no `must_not` matches,
/// and, if any `should` clauses are present, at least one of them matches.
#[derive(Debug, Clone, Default)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub should: Vec<Query>,
}

impl BoolQuery {
    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    pub fn build(self) -> Query {
        Query::Bool(self)
    }
}

impl Query {
    pub fn bool_query() -> BoolQuery {
        BoolQuery::default()
    }

    pub fn term(field: impl Into<String>, value: impl Into<FieldValue>) -> Query {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Query {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, bounds: RangeBounds) -> Query {
        Query::Range {
            field: field.into(),
            bounds,
        }
    }

    pub fn exists(field: impl Into<String>) -> Query {
        Query::Exists {
            field: field.into(),
        }
    }

    pub fn ids(ids: impl IntoIterator<Item = u64>) -> Query {
        Query::Ids(ids.into_iter().collect())
    }

    /// Evaluate this query against a document body and its internal row id.
    ///
    /// Dotted field names descend into nested objects
    /// (`additionalFields.owlExpression`, `attr.all`).
    pub fn matches(&self, row_id: u64, source: &Value) -> bool {
        match self {
            Query::Bool(inner) => {
                inner.must.iter().all(|q| q.matches(row_id, source))
                    && !inner.must_not.iter().any(|q| q.matches(row_id, source))
                    && (inner.should.is_empty()
                        || inner.should.iter().any(|q| q.matches(row_id, source)))
            }
            Query::Term { field, value } => {
                lookup(source, field).is_some_and(|stored| value.matches(stored))
            }
            Query::Terms { field, values } => lookup(source, field)
                .is_some_and(|stored| values.iter().any(|value| value.matches(stored))),
            Query::Range { field, bounds } => lookup(source, field)
                .and_then(Value::as_i64)
                .is_some_and(|value| bounds.contains(value)),
            Query::Exists { field } => {
                lookup(source, field).is_some_and(|stored| !stored.is_null())
            }
            Query::Ids(ids) => ids.contains(&row_id),
            Query::MatchAll => true,
        }
    }
}

/// Resolve a possibly dotted field name inside a JSON document.
fn lookup<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = source;
    for part in field.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Term leaves match strings, integers and booleans.
    #[test]
    fn test_term_matching() {
        let doc = json!({"active": true, "moduleId": "900000000000207008", "effectiveTime": 20230131});
        assert!(Query::term("active", true).matches(1, &doc));
        assert!(Query::term("moduleId", "900000000000207008").matches(1, &doc));
        assert!(Query::term("effectiveTime", 20230131).matches(1, &doc));
        assert!(!Query::term("moduleId", "123").matches(1, &doc));
    }

    /// Dotted paths descend into nested objects; arrays match any element.
    #[test]
    fn test_nested_and_multi_valued() {
        let doc = json!({
            "additionalFields": {"owlExpression": "SubClassOf(:1 :2)"},
            "attr": {"all": ["100", "200"]},
        });
        assert!(Query::term("additionalFields.owlExpression", "SubClassOf(:1 :2)").matches(1, &doc));
        assert!(Query::terms("attr.all", ["200", "999"]).matches(1, &doc));
        assert!(!Query::terms("attr.all", ["999"]).matches(1, &doc));
    }

    /// Bool semantics: must all, no must_not, at least one should when present.
    #[test]
    fn test_bool_combination() {
        let doc = json!({"active": true, "typeId": "116680003"});
        let query = Query::bool_query()
            .must(Query::term("active", true))
            .must_not(Query::term("typeId", "900000000000011006"))
            .should(Query::term("typeId", "116680003"))
            .should(Query::term("typeId", "738774007"))
            .build();
        assert!(query.matches(7, &doc));

        let none_should = Query::bool_query()
            .must(Query::term("active", true))
            .should(Query::term("typeId", "738774007"))
            .build();
        assert!(!none_should.matches(7, &doc));
    }

    /// Range bounds honour gt vs gte at the boundary.
    #[test]
    fn test_range_bounds() {
        let doc = json!({"effectiveTime": 20230131});
        let gte = RangeBounds {
            gte: Some(20230131),
            ..Default::default()
        };
        let gt = RangeBounds {
            gt: Some(20230131),
            ..Default::default()
        };
        assert!(Query::range("effectiveTime", gte).matches(1, &doc));
        assert!(!Query::range("effectiveTime", gt).matches(1, &doc));
    }

    /// Exists is false for missing and null fields, ids match row ids.
    #[test]
    fn test_exists_and_ids() {
        let doc = json!({"effectiveTime": null, "term": "Clinical finding"});
        assert!(!Query::exists("effectiveTime").matches(1, &doc));
        assert!(Query::exists("term").matches(1, &doc));
        assert!(Query::ids([1, 2]).matches(1, &doc));
        assert!(!Query::ids([2]).matches(1, &doc));
    }
}
