//! Query expression evaluation for in-memory document filtering.
//!
//! Filters are parsed into [`Expr`] trees and evaluated against stored documents following
//! the document-store conventions:
//!
//! - dotted paths reach into embedded documents and arrays of documents
//! - equality against an array field matches when any element is equal
//! - a missing field is equal to `null`
//! - range operators only compare values of the same type class (all numbers are one class)
//!
//! [`compare_bson`] provides the total order used for sorting across types.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docmodel_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

static NULL: Bson = Bson::Null;

/// Type-erased, comparable representation of BSON values used for equality.
///
/// Numbers compare by value across types, so `Int32(1)`, `Int64(1)` and `Double(1.0)` are
/// equal. Integers stay exact over the whole `i64` range.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(Number),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match Number::of(bson) {
                Some(number) => Comparable::Number(number),
                None => Comparable::Other(bson),
            },
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a.compare(*b) == Some(Ordering::Equal),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

/// Returns `true` if two values are equal under store semantics.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Rank of a value's type in the cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 13,
        _ => 12,
    }
}

/// A numeric value. Integers are kept as `i64` and only meet `f64` against a `Double`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn of(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(n) => Some(Number::Int(i64::from(*n))),
            Bson::Int64(n) => Some(Number::Int(*n)),
            Bson::Double(n) => Some(Number::Float(*n)),
            _ => None,
        }
    }

    /// `None` only when a NaN is involved.
    fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (Number::Float(a), Number::Float(b)) => a.partial_cmp(&b),
            (Number::Int(a), Number::Float(b)) => compare_int_float(a, b),
            (Number::Float(a), Number::Int(b)) => compare_int_float(b, a).map(Ordering::reverse),
        }
    }
}

/// Compares an integer with a float without rounding the integer.
fn compare_int_float(int: i64, float: f64) -> Option<Ordering> {
    // 2^63, exactly representable.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= LIMIT {
        return Some(Ordering::Less);
    }
    if float < -LIMIT {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();

    match int.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(float - whole)),
        ordering => Some(ordering),
    }
}

/// Total order over BSON values: by type rank first, then by value.
pub(crate) fn compare_bson(left: &Bson, right: &Bson) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Bson::String(a), Bson::String(b)) => a.cmp(b),
        (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
        (Bson::DateTime(a), Bson::DateTime(b)) => a.cmp(b),
        (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
        (Bson::Timestamp(a), Bson::Timestamp(b)) => (a.time, a.increment).cmp(&(b.time, b.increment)),
        (Bson::Array(a), Bson::Array(b)) => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| compare_bson(x, y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Bson::Document(a), Bson::Document(b)) => a
            .iter()
            .zip(b.iter())
            .map(|((ka, va), (kb, vb))| compare_bson(va, vb).then_with(|| ka.cmp(kb)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (a, b) => match (Number::of(a), Number::of(b)) {
            (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Collects the values at a dotted path.
///
/// Arrays met along the way fan out: `"items.sku"` yields the `sku` of every embedded
/// document in `items`, and a numeric segment such as `"items.0"` selects by position.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut values = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            resolve(value, rest, &mut values);
        }
    }

    values
}

fn resolve<'a>(value: &'a Bson, segments: &[&str], values: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        values.push(value);
        return;
    };

    match value {
        Bson::Document(document) => {
            if let Some(inner) = document.get(*head) {
                resolve(inner, rest, values);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(position) => {
                if let Some(item) = items.get(position) {
                    resolve(item, rest, values);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    resolve(item, segments, values);
                }
            }
        },
        _ => {}
    }
}

/// The first value at a dotted path, or `null` when the path is missing.
pub(crate) fn first_value<'a>(document: &'a Document, path: &str) -> &'a Bson {
    lookup(document, path)
        .into_iter()
        .next()
        .unwrap_or(&NULL)
}

/// Sorts documents by the given keys. The sort is stable, so ties keep insertion order.
pub(crate) fn apply_sort(documents: &mut [Document], sort: &[Sort]) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        for key in sort {
            let ordering = compare_bson(first_value(a, &key.field), first_value(b, &key.field));

            if ordering != Ordering::Equal {
                return match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
            }
        }

        Ordering::Equal
    });
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Returns `true` if the document matches the expression.
    pub fn matches(document: &'a Document, expr: &Expr) -> DocumentStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(expr)
    }

    fn equals(candidates: &[&Bson], value: &Bson) -> bool {
        if candidates.is_empty() {
            return matches!(value, Bson::Null);
        }

        let target = Comparable::from(value);

        candidates.iter().any(|candidate| {
            Comparable::from(*candidate) == target
                || match candidate {
                    Bson::Array(items) => items
                        .iter()
                        .any(|item| Comparable::from(item) == target),
                    _ => false,
                }
        })
    }

    fn compares(candidates: &[&Bson], value: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
        let check = |candidate: &Bson| {
            type_rank(candidate) == type_rank(value) && accept(compare_bson(candidate, value))
        };

        candidates.iter().any(|candidate| {
            check(candidate)
                || match candidate {
                    Bson::Array(items) => items.iter().any(|item| check(item)),
                    _ => false,
                }
        })
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_or(exprs)?)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!lookup(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let candidates = lookup(self.document, field);

        Ok(match op {
            FieldOp::Eq => Self::equals(&candidates, value),
            FieldOp::Ne => !Self::equals(&candidates, value),
            FieldOp::Gt => Self::compares(&candidates, value, Ordering::is_gt),
            FieldOp::Gte => Self::compares(&candidates, value, Ordering::is_ge),
            FieldOp::Lt => Self::compares(&candidates, value, Ordering::is_lt),
            FieldOp::Lte => Self::compares(&candidates, value, Ordering::is_le),
            FieldOp::AnyOf | FieldOp::NoneOf => {
                let Bson::Array(values) = value else {
                    return Err(DocumentStoreError::InvalidQuery(format!(
                        "{} needs an array",
                        op.as_operator()
                    )));
                };

                let any = values
                    .iter()
                    .any(|value| Self::equals(&candidates, value));

                if matches!(op, FieldOp::AnyOf) { any } else { !any }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmodel_core::query::Filter;

    fn matches(document: &Document, filter: Document) -> bool {
        DocumentEvaluator::matches(document, &Expr::parse(&filter).unwrap()).unwrap()
    }

    #[test]
    fn equality_across_numeric_types() {
        let document = doc! { "n": 3_i64, "f": 2.0 };

        assert!(matches(&document, doc! { "n": 3 }));
        assert!(matches(&document, doc! { "f": 2 }));
        assert!(!matches(&document, doc! { "n": "3" }));
    }

    #[test]
    fn large_integers_stay_exact() {
        let low = Bson::Int64(1 << 53);
        let high = Bson::Int64((1 << 53) + 1);

        assert!(!values_equal(&low, &high));
        assert_eq!(compare_bson(&low, &high), Ordering::Less);
        assert_eq!(compare_bson(&Bson::Int64(i64::MAX), &Bson::Int64(i64::MAX - 1)), Ordering::Greater);

        let document = doc! { "_id": (1_i64 << 53) + 1 };
        assert!(matches(&document, doc! { "_id": { "$gt": 1_i64 << 53 } }));
        assert!(!matches(&document, doc! { "_id": 1_i64 << 53 }));
    }

    #[test]
    fn integers_and_doubles_compare_by_value() {
        assert!(values_equal(&Bson::Int64(7), &Bson::Double(7.0)));
        assert_eq!(compare_bson(&Bson::Int32(2), &Bson::Double(2.5)), Ordering::Less);
        assert_eq!(compare_bson(&Bson::Int64(-2), &Bson::Double(-2.5)), Ordering::Greater);
        assert_eq!(compare_bson(&Bson::Double(1e30), &Bson::Int64(i64::MAX)), Ordering::Greater);
    }

    #[test]
    fn missing_field_equals_null() {
        let document = doc! { "a": 1 };

        assert!(matches(&document, doc! { "b": null }));
        assert!(!matches(&document, doc! { "a": null }));
        assert!(matches(&document, doc! { "b": { "$exists": false } }));
    }

    #[test]
    fn arrays_match_any_element() {
        let document = doc! { "tags": ["red", "blue"], "scores": [3, 9] };

        assert!(matches(&document, doc! { "tags": "blue" }));
        assert!(matches(&document, doc! { "tags": { "$in": ["green", "red"] } }));
        assert!(matches(&document, doc! { "tags": { "$nin": ["green"] } }));
        assert!(matches(&document, doc! { "scores": { "$gt": 8 } }));
        assert!(!matches(&document, doc! { "scores": { "$gt": 9 } }));
    }

    #[test]
    fn dotted_paths() {
        let document = doc! {
            "address": { "city": "Oslo" },
            "items": [{ "sku": "a" }, { "sku": "b" }],
        };

        assert!(matches(&document, doc! { "address.city": "Oslo" }));
        assert!(matches(&document, doc! { "items.sku": "b" }));
        assert!(matches(&document, doc! { "items.1.sku": "b" }));
        assert!(!matches(&document, doc! { "items.0.sku": "b" }));
    }

    #[test]
    fn ranges_only_compare_same_type() {
        let document = doc! { "v": "10" };

        assert!(!matches(&document, doc! { "v": { "$gt": 5 } }));
        assert!(matches(&document, doc! { "v": { "$gt": "1" } }));
    }

    #[test]
    fn logical_operators() {
        let document = doc! { "a": 1, "b": 2 };

        assert!(matches(&document, doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(&document, doc! { "$nor": [{ "a": 1 }] }));
        assert!(matches(&document, doc! { "a": { "$not": { "$gt": 3 } } }));

        let expr = Filter::eq("a", 1).and(Filter::ne("b", 3));
        assert!(DocumentEvaluator::matches(&document, &expr).unwrap());
    }

    #[test]
    fn cross_type_sort_order() {
        let mut documents = vec![
            doc! { "_id": 1, "v": "text" },
            doc! { "_id": 2, "v": 5 },
            doc! { "_id": 3 },
            doc! { "_id": 4, "v": 1.5 },
            doc! { "_id": 5, "v": true },
        ];

        apply_sort(&mut documents, &[Sort::asc("v")]);

        let ids = documents
            .iter()
            .map(|d| d.get_i32("_id").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 4, 2, 1, 5]);
    }

    #[test]
    fn multi_key_sort_is_stable() {
        let mut documents = vec![
            doc! { "_id": 1, "g": 1, "v": 2 },
            doc! { "_id": 2, "g": 0, "v": 2 },
            doc! { "_id": 3, "g": 1, "v": 1 },
            doc! { "_id": 4, "g": 1, "v": 2 },
        ];

        apply_sort(&mut documents, &[Sort::desc("g"), Sort::asc("v")]);

        let ids = documents
            .iter()
            .map(|d| d.get_i32("_id").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![3, 1, 4, 2]);
    }
}
