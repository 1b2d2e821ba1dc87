//! Query construction and filter expressions.
//!
//! Filters travel to the store as plain documents in the store's own query language, e.g.
//! `{ "age": { "$gte": 18 }, "status": "active" }`. This module provides:
//!
//! - [`Query`] and [`QueryBuilder`]: filter, sort, projection, skip and limit of a find
//! - [`Expr`] and [`Filter`]: a typed filter AST, parsed from and rendered to filter documents
//! - [`QueryVisitor`]: a visitor over [`Expr`] used by backends to evaluate or translate filters
//!
//! # Query Building
//!
//! ```ignore
//! use docmodel::query::{Query, Filter, SortDirection};
//!
//! let query = Query::builder()
//!     .expr(Filter::eq("status", "active").and(Filter::gt("age", 18)))
//!     .sort("created_at", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```
//!
//! # Supported Operators
//!
//! - Comparison: `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`
//! - Membership: `$in`, `$nin`
//! - Existence: `$exists`
//! - Logical: `$and`, `$or`, `$nor`, `$not`
//!
//! A field mapped to a plain value is an implicit `$eq`.

use bson::{Bson, Document, doc};
use std::convert::Infallible;

use crate::{
    document::Map,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    #[default]
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The numeric sort order understood by the store, `1` or `-1`.
    pub fn as_order(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }

    /// Reads a numeric sort order. Any negative value is descending.
    pub fn from_order(order: i64) -> Self {
        if order < 0 { SortDirection::Desc } else { SortDirection::Asc }
    }

    /// The comparison operator that moves past a cursor in this direction.
    pub fn cursor_operator(self) -> &'static str {
        match self {
            SortDirection::Asc => "$gt",
            SortDirection::Desc => "$lt",
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. Arrays match if any element is equal.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Equal to any of the values.
    AnyOf,
    /// Equal to none of the values.
    NoneOf,
}

impl FieldOp {
    /// The operator name in a filter document.
    pub fn as_operator(self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
        }
    }

    fn from_operator(operator: &str) -> Option<Self> {
        Some(match operator {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" => FieldOp::AnyOf,
            "$nin" => FieldOp::NoneOf,
            _ => return None,
        })
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Nor`, `Not`)
/// to build complex filter predicates.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::{Expr, Filter};
///
/// let expr = Filter::and(vec![
///     Filter::eq("status", "active"),
///     Filter::gt("age", 18),
/// ]);
///
/// let parsed = Expr::parse(&doc! { "status": "active", "age": { "$gt": 18 } })?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOR of multiple expressions (none may match).
    Nor(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare, dotted for nested fields.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Parses a filter document.
    ///
    /// An empty document matches everything and parses to an empty AND.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidQuery`] for unknown operators and malformed operands.
    pub fn parse(filter: &Document) -> DocumentStoreResult<Expr> {
        let mut clauses = filter
            .iter()
            .map(|(key, value)| match key.as_str() {
                "$and" => Ok(Expr::And(parse_list(key, value)?)),
                "$or" => Ok(Expr::Or(parse_list(key, value)?)),
                "$nor" => Ok(Expr::Nor(parse_list(key, value)?)),
                op if op.starts_with('$') => Err(DocumentStoreError::InvalidQuery(format!(
                    "unknown top level operator: {op}"
                ))),
                field => parse_field(field, value),
            })
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Expr::And(clauses),
        })
    }

    /// Renders this expression as a filter document.
    pub fn to_document(&self) -> Document {
        DocumentTranslator
            .visit_expr(self)
            .unwrap_or_else(|never| match never {})
    }
}

impl From<Expr> for Map {
    fn from(expr: Expr) -> Self {
        Map::from(expr.to_document())
    }
}

fn parse_list(operator: &str, value: &Bson) -> DocumentStoreResult<Vec<Expr>> {
    match value {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(clause) => Expr::parse(clause),
                _ => Err(DocumentStoreError::InvalidQuery(format!(
                    "{operator} entries must be documents"
                ))),
            })
            .collect(),
        _ => Err(DocumentStoreError::InvalidQuery(format!(
            "{operator} must be a non-empty array"
        ))),
    }
}

fn parse_field(field: &str, value: &Bson) -> DocumentStoreResult<Expr> {
    match value {
        Bson::Document(operators) if operators.keys().next().is_some_and(|key| key.starts_with('$')) => {
            parse_operators(field, operators)
        }
        _ => Ok(Filter::eq(field, value.clone())),
    }
}

fn parse_operators(field: &str, operators: &Document) -> DocumentStoreResult<Expr> {
    let mut clauses = operators
        .iter()
        .map(|(operator, operand)| match operator.as_str() {
            "$exists" => Ok(Expr::Exists(field.to_string(), is_truthy(operand))),
            "$not" => match operand {
                Bson::Document(inner) => Ok(parse_operators(field, inner)?.not()),
                _ => Err(DocumentStoreError::InvalidQuery("$not needs an operator document".to_string())),
            },
            other => match FieldOp::from_operator(other) {
                Some(op @ (FieldOp::AnyOf | FieldOp::NoneOf)) if !matches!(operand, Bson::Array(_)) => {
                    Err(DocumentStoreError::InvalidQuery(format!(
                        "{} needs an array",
                        op.as_operator()
                    )))
                }
                Some(op) => Ok(Expr::field(field.to_string(), op, operand.clone())),
                None => Err(DocumentStoreError::InvalidQuery(format!(
                    "unknown operator: {other}"
                ))),
            },
        })
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    Ok(match clauses.len() {
        1 => clauses.remove(0),
        _ => Expr::And(clauses),
    })
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

/// A structured query for retrieving documents.
///
/// Use [`QueryBuilder`] for ergonomic construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Filter document. `None` matches every document.
    pub filter: Option<Map>,
    /// Sort keys, applied in order.
    pub sort: Vec<Sort>,
    /// Projection document in include (`1`) or exclude (`0`) form.
    pub projection: Option<Map>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl Query {
    /// Creates a new empty query with no filters or limits.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a query matching the given filter.
    pub fn filter(filter: impl Into<Map>) -> Self {
        Query { filter: Some(filter.into()), ..Query::default() }
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// The filter as a document, empty when absent.
    pub fn filter_document(&self) -> Document {
        self.filter
            .as_ref()
            .map(|filter| filter.as_document().clone())
            .unwrap_or_default()
    }

    /// The sort keys as an ordered sort document.
    pub fn sort_document(&self) -> Document {
        self.sort
            .iter()
            .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_order())))
            .collect()
    }

    /// Adds a condition on `field`, keeping any condition already present on it.
    pub fn and_where(mut self, field: &str, condition: impl Into<Bson>) -> Self {
        let condition = condition.into();

        self.filter = Some(match self.filter.take() {
            Some(filter) if filter.contains_key(field) => {
                Map::new().set("$and", vec![Bson::from(filter), Bson::Document(doc! { field: condition })])
            }
            Some(filter) => filter.set(field, condition),
            None => Map::new().set(field, condition),
        });

        self
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let expr = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// All expressions must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Any expression may match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// No expression may match.
    pub fn nor(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Nor(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NoneOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter document for this query.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter document to apply
    pub fn filter(mut self, filter: impl Into<Map>) -> Self {
        self.query.filter = Some(filter.into());
        self
    }

    /// Sets the filter from a typed expression.
    pub fn expr(self, expr: Expr) -> Self {
        self.filter(expr)
    }

    /// Appends a sort key.
    ///
    /// # Arguments
    ///
    /// * `field` - The field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Sets the projection document.
    pub fn projection(mut self, projection: impl Into<Map>) -> Self {
        self.query.projection = Some(projection.into());
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.query.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

/// Renders [`Expr`] trees as filter documents.
pub struct DocumentTranslator;

impl DocumentTranslator {
    fn visit_all(&mut self, exprs: &[Expr]) -> Vec<Document> {
        exprs
            .iter()
            .map(|expr| self.visit_expr(expr).unwrap_or_else(|never| match never {}))
            .collect()
    }
}

impl QueryVisitor for DocumentTranslator {
    type Output = Document;
    type Error = Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$and": self.visit_all(exprs) })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$or": self.visit_all(exprs) })
    }

    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$nor": self.visit_all(exprs) })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(match expr {
            Expr::Field { field, op, value } => doc! {
                field: { "$not": { op.as_operator(): value } },
            },
            Expr::Exists(field, should_exist) => doc! {
                field: { "$exists": !should_exist },
            },
            other => doc! { "$nor": [self.visit_expr(other)?] },
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { op.as_operator(): value.clone() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implicit_equality() {
        let expr = Expr::parse(&doc! { "name": "Ada" }).unwrap();
        assert_eq!(expr, Filter::eq("name", "Ada"));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(Expr::parse(&doc! {}).unwrap(), Expr::And(vec![]));
    }

    #[test]
    fn operator_documents() {
        let expr = Expr::parse(&doc! {
            "age": { "$gte": 18, "$lt": 65 },
            "tags": { "$in": ["a", "b"] },
            "deleted": { "$exists": 0 },
        })
        .unwrap();

        assert_eq!(
            expr,
            Expr::And(vec![
                Expr::And(vec![Filter::gte("age", 18), Filter::lt("age", 65)]),
                Filter::any_of("tags", ["a", "b"]),
                Filter::not_exists("deleted"),
            ])
        );
    }

    #[test]
    fn logical_operators() {
        let expr = Expr::parse(&doc! {
            "$or": [{ "a": 1 }, { "b": { "$not": { "$eq": 2 } } }],
        })
        .unwrap();

        assert_eq!(
            expr,
            Filter::or(vec![Filter::eq("a", 1), Filter::eq("b", 2).not()])
        );
    }

    #[test]
    fn embedded_documents_without_operators_are_equality() {
        let expr = Expr::parse(&doc! { "address": { "city": "Oslo" } }).unwrap();
        assert_eq!(expr, Filter::eq("address", doc! { "city": "Oslo" }));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        assert!(matches!(
            Expr::parse(&doc! { "a": { "$regex": "x" } }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            Expr::parse(&doc! { "$where": "true" }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            Expr::parse(&doc! { "a": { "$in": 1 } }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
        assert!(matches!(
            Expr::parse(&doc! { "$and": [] }),
            Err(DocumentStoreError::InvalidQuery(_))
        ));
    }

    #[test]
    fn translation_parses_back() {
        let expr = Filter::and(vec![
            Filter::eq("name", "Ada"),
            Filter::gt("age", 18).not(),
            Filter::nor(vec![Filter::exists("x")]),
            Filter::none_of("role", ["guest"]),
        ]);

        let rendered = expr.to_document();
        assert_eq!(Expr::parse(&rendered).unwrap(), expr);
    }

    #[test]
    fn and_where_keeps_existing_conditions() {
        let query = Query::filter(Map::new().set("age", 3)).and_where("_id", doc! { "$gt": 5 });
        assert_eq!(
            query.filter.unwrap(),
            Map::new().set("age", 3).set("_id", doc! { "$gt": 5 })
        );

        let query = Query::filter(Map::new().set("_id", doc! { "$ne": 1 })).and_where("_id", doc! { "$gt": 5 });
        assert_eq!(
            query.filter.unwrap(),
            Map::from(doc! { "$and": [{ "_id": { "$ne": 1 } }, { "_id": { "$gt": 5 } }] })
        );

        let query = Query::new().and_where("_id", doc! { "$lt": 2 });
        assert_eq!(query.filter_document(), doc! { "_id": { "$lt": 2 } });
    }

    #[test]
    fn sort_document_keeps_order() {
        let query = Query::builder()
            .sort("b", SortDirection::Desc)
            .sort("a", SortDirection::Asc)
            .build();

        let keys: Vec<_> = query.sort_document().keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(query.sort_document().get_i32("b").unwrap(), -1);
    }
}
