//! Predicate and sort expression trees.
//!
//! A [`Predicate`] is a closed, serializable expression tree over record
//! fields: comparisons, `IN`, `LIKE`, null checks, and boolean combinators.
//! The store crate compiles it to parameterized SQL; [`Predicate::matches`]
//! evaluates the same tree against encoded column values with identical
//! semantics, which is what lets a live query re-evaluate a single changed
//! row's membership without touching the database.
//!
//! Semantics follow SQL three-valued logic collapsed to match/no-match:
//! a comparison against NULL (or over a field the row does not carry) never
//! matches, while a null check over a missing field does.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::value::{ColumnValues, FieldValue};

/// Comparison operator for [`Predicate::Compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// One sort criterion: a field and a direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Field (column) to sort by.
    pub field: String,
    /// Ascending when true.
    pub ascending: bool,
}

impl SortKey {
    /// Ascending sort on `field`.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    /// Descending sort on `field`.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Filter expression over record fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every row.
    True,
    /// Binary comparison between a field and a constant.
    Compare {
        /// Field name.
        field: String,
        /// Operator.
        compare: CompareOp,
        /// Right-hand constant.
        value: FieldValue,
    },
    /// Field value is one of the listed constants.
    In {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<FieldValue>,
    },
    /// SQL `LIKE` with `%` and `_` wildcards (ASCII case-insensitive).
    Like {
        /// Field name.
        field: String,
        /// Pattern.
        pattern: String,
    },
    /// Field is NULL (or absent from the row).
    IsNull {
        /// Field name.
        field: String,
    },
    /// Field is present and non-NULL.
    IsNotNull {
        /// Field name.
        field: String,
    },
    /// All children match. Empty list matches everything.
    And(Vec<Predicate>),
    /// Any child matches. Empty list matches nothing.
    Or(Vec<Predicate>),
    /// Child does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field = value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// `field != value`
    #[must_use]
    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Ne,
            value: value.into(),
        }
    }

    /// `field < value`
    #[must_use]
    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Lt,
            value: value.into(),
        }
    }

    /// `field <= value`
    #[must_use]
    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Le,
            value: value.into(),
        }
    }

    /// `field > value`
    #[must_use]
    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Gt,
            value: value.into(),
        }
    }

    /// `field >= value`
    #[must_use]
    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            compare: CompareOp::Ge,
            value: value.into(),
        }
    }

    /// `field IN (values…)`
    #[must_use]
    pub fn is_in(field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// `field LIKE pattern`
    #[must_use]
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    /// `field IS NOT NULL`
    #[must_use]
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNotNull {
            field: field.into(),
        }
    }

    /// Conjunction of `self` and `other`.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction of `self` and `other`.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    /// Negation of `self`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Every field name referenced anywhere in the tree.
    #[must_use]
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::True => {}
            Self::Compare { field, .. }
            | Self::In { field, .. }
            | Self::Like { field, .. }
            | Self::IsNull { field }
            | Self::IsNotNull { field } => {
                let _ = out.insert(field.clone());
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Self::Not(child) => child.collect_fields(out),
        }
    }

    /// Evaluate against encoded column values.
    ///
    /// Matches the SQL compilation: a comparison over a NULL or absent field
    /// never matches, `IS NULL` over an absent field does.
    #[must_use]
    pub fn matches(&self, values: &ColumnValues) -> bool {
        match self {
            Self::True => true,
            Self::Compare {
                field,
                compare,
                value,
            } => {
                let Some(stored) = non_null(values, field) else {
                    return false;
                };
                if value.is_null() {
                    return false;
                }
                let ord = stored.sqlite_cmp(value);
                match compare {
                    CompareOp::Eq => ord == Ordering::Equal,
                    CompareOp::Ne => ord != Ordering::Equal,
                    CompareOp::Lt => ord == Ordering::Less,
                    CompareOp::Le => ord != Ordering::Greater,
                    CompareOp::Gt => ord == Ordering::Greater,
                    CompareOp::Ge => ord != Ordering::Less,
                }
            }
            Self::In {
                field,
                values: accepted,
            } => {
                let Some(stored) = non_null(values, field) else {
                    return false;
                };
                accepted
                    .iter()
                    .any(|v| !v.is_null() && stored.sqlite_cmp(v) == Ordering::Equal)
            }
            Self::Like { field, pattern } => {
                let Some(stored) = non_null(values, field) else {
                    return false;
                };
                stored
                    .to_like_operand()
                    .is_some_and(|text| like_match(pattern, &text))
            }
            Self::IsNull { field } => non_null(values, field).is_none(),
            Self::IsNotNull { field } => non_null(values, field).is_some(),
            Self::And(children) => children.iter().all(|c| c.matches(values)),
            Self::Or(children) => children.iter().any(|c| c.matches(values)),
            Self::Not(child) => !child.matches(values),
        }
    }
}

fn non_null<'a>(values: &'a ColumnValues, field: &str) -> Option<&'a FieldValue> {
    values.get(field).filter(|v| !v.is_null())
}

/// SQL `LIKE` matching: `%` matches any run, `_` exactly one character,
/// everything else compares ASCII case-insensitively (SQLite's default).
#[must_use]
pub fn like_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[char], t: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => rec(&p[1..], t) || (!t.is_empty() && rec(p, &t[1..])),
            Some('_') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(c) => {
                !t.is_empty()
                    && c.to_ascii_lowercase() == t[0].to_ascii_lowercase()
                    && rec(&p[1..], &t[1..])
            }
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    rec(&p, &t)
}

/// Compare two sort-key tuples under per-position directions.
///
/// Positions beyond `ascending` (e.g. the appended id tie-breaker) compare
/// ascending. Used by the live query controller to keep its snapshot in the
/// same order `ORDER BY` produced.
#[must_use]
pub fn compare_key_values(a: &[FieldValue], b: &[FieldValue], ascending: &[bool]) -> Ordering {
    for (i, (va, vb)) in a.iter().zip(b.iter()).enumerate() {
        let mut ord = va.sqlite_cmp(vb);
        if ord != Ordering::Equal {
            if ascending.get(i).copied() == Some(false) {
                ord = ord.reverse();
            }
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, FieldValue)]) -> ColumnValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn compare_matches() {
        let r = row(&[("sent", FieldValue::Integer(5))]);
        assert!(Predicate::eq("sent", 5i64).matches(&r));
        assert!(Predicate::gt("sent", 4i64).matches(&r));
        assert!(!Predicate::lt("sent", 5i64).matches(&r));
        assert!(Predicate::le("sent", 5i64).matches(&r));
    }

    #[test]
    fn null_comparisons_never_match() {
        let r = row(&[("sender", FieldValue::Null)]);
        assert!(!Predicate::eq("sender", "a").matches(&r));
        assert!(!Predicate::ne("sender", "a").matches(&r));
        // Absent field behaves like NULL.
        assert!(!Predicate::eq("missing", 1i64).matches(&r));
    }

    #[test]
    fn null_checks() {
        let r = row(&[("sender", FieldValue::Null)]);
        assert!(Predicate::is_null("sender").matches(&r));
        assert!(Predicate::is_null("missing").matches(&r));
        assert!(!Predicate::is_not_null("sender").matches(&r));
    }

    #[test]
    fn in_list() {
        let r = row(&[("status", FieldValue::Text("sent".into()))]);
        let p = Predicate::is_in("status", vec!["queued".into(), "sent".into()]);
        assert!(p.matches(&r));
        assert!(!Predicate::is_in("status", vec![]).matches(&r));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("al%", "alice"));
        assert!(like_match("%ICE", "alice"));
        assert!(like_match("a_ice", "alice"));
        assert!(!like_match("a_ice", "alicia"));
        assert!(like_match("%", ""));
    }

    #[test]
    fn boolean_combinators() {
        let r = row(&[
            ("chat", FieldValue::Text("c1".into())),
            ("sent", FieldValue::Integer(10)),
        ]);
        let p = Predicate::eq("chat", "c1").and(Predicate::gt("sent", 5i64));
        assert!(p.matches(&r));
        assert!(!p.clone().not().matches(&r));
        assert!(!Predicate::Or(vec![]).matches(&r));
        assert!(Predicate::And(vec![]).matches(&r));
    }

    #[test]
    fn not_over_missing_field_matches() {
        // NOT (missing = 1) — the inner atom can't match, so NOT does.
        let r = row(&[]);
        assert!(Predicate::eq("missing", 1i64).not().matches(&r));
    }

    #[test]
    fn fields_collects_every_reference() {
        let p = Predicate::eq("a", 1i64)
            .and(Predicate::like("b", "x%"))
            .and(Predicate::is_null("c").not());
        let fields = p.fields();
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
    }

    #[test]
    fn key_comparison_respects_direction() {
        let a = [FieldValue::Integer(1), FieldValue::Text("x".into())];
        let b = [FieldValue::Integer(2), FieldValue::Text("x".into())];
        assert_eq!(compare_key_values(&a, &b, &[true]), Ordering::Less);
        assert_eq!(compare_key_values(&a, &b, &[false]), Ordering::Greater);
    }

    #[test]
    fn key_comparison_tie_breaks_on_extra_positions() {
        let a = [FieldValue::Integer(1), FieldValue::Text("a".into())];
        let b = [FieldValue::Integer(1), FieldValue::Text("b".into())];
        // Extra position (the id) always ascends, even under a descending sort.
        assert_eq!(compare_key_values(&a, &b, &[false]), Ordering::Less);
    }

    #[test]
    fn serde_round_trip() {
        let p = Predicate::eq("chat", "c1").and(Predicate::is_not_null("sent"));
        let json = serde_json::to_string(&p).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
