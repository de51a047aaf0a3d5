//! Selectors, projections and cursor options understood by every store backend.
//!
//! This is deliberately not a query language: it covers what the mapper itself
//! needs to locate documents (by id, by foreign key, by a caller supplied field
//! match) plus the paging options used by linked collections.
//!
//! ```ignore
//! use docmapper::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("user_id", user_id))
//!     .sort("_id", SortDirection::Asc)
//!     .offset(10)
//!     .limit(5)
//!     .build();
//! ```
//!
//! Field names are dotted paths. A path that crosses an array matches when any
//! element of the array matches, the way document stores usually resolve them.

use bson::Bson;

use crate::error::MapperError;

/// Sort direction for query results and index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Returns the conventional numeric form of the direction (`1` / `-1`).
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone)]
pub struct Sort {
    /// The field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for selector expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to (exact match, or array contains the value).
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
    /// Field equals any of the given values.
    AnyOf,
    /// Field equals none of the given values.
    NoneOf,
}

/// A selector expression.
///
/// `Expr::And(vec![])` selects every document.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The dotted field path to compare.
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

    /// A selector matching every document.
    pub fn all() -> Self {
        Expr::And(Vec::new())
    }

    /// Returns `true` for the match-everything selector.
    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::And(list) if list.is_empty())
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

    /// Rewrites every field path in the expression as `<prefix>.<path>`.
    ///
    /// Used to turn a selector written against an embedded document into one that
    /// runs against the host document's array field.
    pub fn prefixed(&self, prefix: &str) -> Expr {
        match self {
            Expr::And(list) => Expr::And(list.iter().map(|e| e.prefixed(prefix)).collect()),
            Expr::Or(list) => Expr::Or(list.iter().map(|e| e.prefixed(prefix)).collect()),
            Expr::Not(expr) => Expr::Not(Box::new(expr.prefixed(prefix))),
            Expr::Exists(field, should_exist) => {
                Expr::Exists(format!("{}.{}", prefix, field), *should_exist)
            }
            Expr::Field { field, op, value } => Expr::Field {
                field: format!("{}.{}", prefix, field),
                op: op.clone(),
                value: value.clone(),
            },
        }
    }

    /// Collects the equality constraints placed directly on paths below `prefix`,
    /// returned relative to that prefix. Nested `Or`/`Not` branches are ignored.
    pub fn equalities_under<'a>(&'a self, prefix: &str) -> Vec<(&'a str, &'a Bson)> {
        let mut found = Vec::new();
        self.collect_equalities(&format!("{}.", prefix), &mut found);
        found
    }

    fn collect_equalities<'a>(&'a self, prefix: &str, found: &mut Vec<(&'a str, &'a Bson)>) {
        match self {
            Expr::And(list) => list
                .iter()
                .for_each(|expr| expr.collect_equalities(prefix, found)),
            Expr::Field { field, op: FieldOp::Eq, value } => {
                if let Some(rest) = field.strip_prefix(prefix) {
                    found.push((rest, value));
                }
            }
            _ => {}
        }
    }
}

impl Default for Expr {
    fn default() -> Self {
        Expr::all()
    }
}

/// Helper struct for constructing selector expressions.
///
/// ```ignore
/// use docmapper::query::Filter;
///
/// let expr = Filter::eq("name", "Alice").and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field exists.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field does not exist.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::AnyOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches documents where the field equals none of the given values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::NoneOf,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }
}

/// Shapes the document returned by a point lookup.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Return `_id` plus the array `field` reduced to its first element matching `filter`.
    ElemMatch {
        /// The array field to project.
        field: String,
        /// Selector evaluated against each element of the array.
        filter: Expr,
    },
}

/// A selector plus cursor options.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Selector the documents must match.
    pub filter: Expr,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip.
    pub offset: Option<usize>,
    /// Sort specification for results.
    pub sort: Option<Sort>,
}

impl Query {
    /// Creates a query that matches everything.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
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

    /// Sets the selector for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = filter;
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Sets the sort specification for the query results.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort = Some(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks a selector expression; backends implement it to evaluate or translate selectors.
pub trait QueryVisitor {
    type Output;
    type Error: Into<MapperError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
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
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
