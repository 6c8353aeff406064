//! Backend-neutral query descriptor.
//!
//! A [`Query`] is built once and compiled by each backend into its native
//! form. Operators form a closed set: every backend compiler matches on
//! [`Operator`] exhaustively, and constructs a backend cannot express
//! (ancestor filters) are rejected at compile time, before any I/O.
//!
//! # Example
//!
//! ```rust
//! use seistore_journal::key::Kind;
//! use seistore_journal::query::{Operator, Query};
//!
//! let query = Query::new("seismic-store-acme-survey", Kind::Datasets)
//!     .filter("path", "/a/")
//!     .filter_op("size", Operator::Gt, 10)
//!     .limit(50);
//! assert_eq!(query.filters.len(), 2);
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use crate::entity::Entity;
use crate::key::Kind;

/// Message used by every backend when an ancestor filter is compiled.
pub const HAS_ANCESTOR_UNSUPPORTED: &str = "HAS_ANCESTOR operator is not supported in query filters.";

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operator {
    /// Equality. The default when no operator is given.
    #[default]
    Eq,
    /// Strictly less than.
    Lt,
    /// Strictly greater than.
    Gt,
    /// Less than or equal.
    Le,
    /// Greater than or equal.
    Ge,
    /// Membership: the property (an array or string) contains the value.
    Contains,
    /// Ancestor query. No supported backend can express it.
    HasAncestor,
}

impl Operator {
    /// Returns the operator's symbol.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Contains => "CONTAINS",
            Self::HasAncestor => "HAS_ANCESTOR",
        }
    }

    /// Evaluates `actual <op> expected` the way the stores do: numbers compare
    /// numerically, strings lexicographically, other types only for equality.
    /// A missing property never matches.
    #[must_use]
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let Some(actual) = actual else {
            return false;
        };
        match self {
            Self::Eq => compare_values(actual, expected) == Some(Ordering::Equal),
            Self::Lt => compare_values(actual, expected) == Some(Ordering::Less),
            Self::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
            Self::Le => matches!(
                compare_values(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Ge => matches!(
                compare_values(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Contains => match (actual, expected) {
                (Value::Array(items), _) => items
                    .iter()
                    .any(|item| compare_values(item, expected) == Some(Ordering::Equal)),
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                _ => false,
            },
            Self::HasAncestor => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(Self::Eq),
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "<=" => Ok(Self::Le),
            ">=" => Ok(Self::Ge),
            "CONTAINS" => Ok(Self::Contains),
            "HAS_ANCESTOR" => Ok(Self::HasAncestor),
            other => Err(Error::InvalidInput(format!("unknown filter operator '{other}'"))),
        }
    }
}

/// Orders two JSON values of the same scalar type.
///
/// Returns `None` when the values are not comparable.
#[must_use]
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

/// One predicate of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Property name inside the entity payload.
    pub property: String,
    /// Comparison operator.
    pub operator: Operator,
    /// Value compared against.
    pub value: Value,
}

impl Filter {
    /// Creates a filter. A missing operator means equality and a missing
    /// value means the empty string.
    #[must_use]
    pub fn new(property: impl Into<String>, operator: Option<Operator>, value: Option<Value>) -> Self {
        Self {
            property: property.into(),
            operator: operator.unwrap_or_default(),
            value: value.unwrap_or_else(|| Value::String(String::new())),
        }
    }
}

/// Where a page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// Opaque continuation token returned as `end_cursor` by a previous page.
    Token(String),
    /// Binary cursor. No supported backend accepts it.
    Bytes(Vec<u8>),
}

impl Cursor {
    /// Returns the token form of the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for binary cursors, naming `backend`.
    pub fn token(&self, backend: &str) -> Result<&str> {
        match self {
            Self::Token(token) => Ok(token),
            Self::Bytes(bytes) => Err(Error::InvalidInput(format!(
                "binary cursor '{}' is not supported by the {backend} backend",
                BASE64.encode(bytes)
            ))),
        }
    }
}

impl From<String> for Cursor {
    fn from(token: String) -> Self {
        Self::Token(token)
    }
}

impl From<&str> for Cursor {
    fn from(token: &str) -> Self {
        Self::Token(token.to_string())
    }
}

impl From<Vec<u8>> for Cursor {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

/// A backend-neutral query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Namespace the queried entities belong to.
    pub namespace: String,
    /// Entity kind.
    pub kind: Kind,
    /// Predicates, all of which must hold.
    pub filters: Vec<Filter>,
    /// Properties to return instead of whole entities.
    pub projection: Vec<String>,
    /// Properties whose distinct value combinations are returned.
    pub group_by: Vec<String>,
    /// Where the page starts.
    pub start: Option<Cursor>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl Query {
    /// Creates an unfiltered query over one kind in one namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: Kind) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            filters: Vec::new(),
            projection: Vec::new(),
            group_by: Vec::new(),
            start: None,
            limit: None,
        }
    }

    /// Adds an equality filter.
    #[must_use]
    pub fn filter(self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter_op(property, Operator::Eq, value)
    }

    /// Adds a filter with an explicit operator.
    ///
    /// Filtering the same property more than once keeps every predicate.
    #[must_use]
    pub fn filter_op(
        mut self,
        property: impl Into<String>,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.filters
            .push(Filter::new(property, Some(operator), Some(value.into())));
        self
    }

    /// Adds a prepared filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the projected properties.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the group-by properties.
    #[must_use]
    pub fn group_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Starts the page at `cursor`.
    #[must_use]
    pub fn start(mut self, cursor: impl Into<Cursor>) -> Self {
        self.start = Some(cursor.into());
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true when the query returns projected fields rather than
    /// whole entities.
    #[must_use]
    pub fn is_projection(&self) -> bool {
        !self.projection.is_empty() || !self.group_by.is_empty()
    }

    /// Fails with [`Error::UnsupportedOperator`] if any filter is an
    /// ancestor filter.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn reject_ancestor_filters(&self) -> Result<()> {
        if self
            .filters
            .iter()
            .any(|f| f.operator == Operator::HasAncestor)
        {
            return Err(Error::UnsupportedOperator {
                message: HAS_ANCESTOR_UNSUPPORTED.to_string(),
            });
        }
        Ok(())
    }
}

/// One page of query results.
///
/// Whole-entity queries fill `entities`; projection and group-by queries fill
/// `projections` with objects holding only the selected properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPage {
    /// Matching entities.
    pub entities: Vec<Entity>,
    /// Projected rows.
    pub projections: Vec<Map<String, Value>>,
    /// Cursor for the next page, when more results may exist.
    pub end_cursor: Option<String>,
}

impl QueryPage {
    /// Number of rows in the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len() + self.projections.len()
    }

    /// Returns true when the page holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Projects `data` onto `fields`. Missing properties are omitted.
#[must_use]
pub fn project(data: &Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|f| data.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

/// Keeps the first row of every distinct combination of `fields`, preserving
/// order.
#[must_use]
pub fn distinct_by(rows: Vec<Map<String, Value>>, fields: &[String]) -> Vec<Map<String, Value>> {
    let mut seen: Vec<Vec<Option<Value>>> = Vec::new();
    rows.into_iter()
        .filter(|row| {
            let group: Vec<Option<Value>> = fields.iter().map(|f| row.get(f).cloned()).collect();
            if seen.contains(&group) {
                false
            } else {
                seen.push(group);
                true
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_operator_and_value() {
        let filter = Filter::new("name", None, None);
        assert_eq!(filter.operator, Operator::Eq);
        assert_eq!(filter.value, json!(""));

        let a = Query::new("ns", Kind::Datasets).filter("name", "x");
        let b = Query::new("ns", Kind::Datasets).filter_op("name", Operator::Eq, "x");
        assert_eq!(a, b);
    }

    #[test]
    fn operator_symbols_roundtrip() {
        for op in [
            Operator::Eq,
            Operator::Lt,
            Operator::Gt,
            Operator::Le,
            Operator::Ge,
            Operator::Contains,
            Operator::HasAncestor,
        ] {
            assert_eq!(op.symbol().parse::<Operator>().expect("parse"), op);
        }
        assert!("!=".parse::<Operator>().is_err());
    }

    #[test]
    fn evaluate_compares_like_the_stores() {
        assert!(Operator::Eq.evaluate(Some(&json!(3)), &json!(3.0)));
        assert!(Operator::Lt.evaluate(Some(&json!("/a/")), &json!("/b/")));
        assert!(Operator::Ge.evaluate(Some(&json!(5)), &json!(5)));
        assert!(!Operator::Gt.evaluate(Some(&json!("5")), &json!(4)));
        assert!(!Operator::Eq.evaluate(None, &json!("")));
        assert!(Operator::Contains.evaluate(Some(&json!(["a", "b"])), &json!("b")));
        assert!(Operator::Contains.evaluate(Some(&json!("survey")), &json!("vey")));
        assert!(!Operator::HasAncestor.evaluate(Some(&json!("x")), &json!("x")));
    }

    #[test]
    fn folder_range_upper_bound_sorts_after_children() {
        let upper = json!("/a/\u{fffd}");
        assert!(Operator::Lt.evaluate(Some(&json!("/a/zzz/")), &upper));
        assert!(Operator::Gt.evaluate(Some(&json!("/a/b/")), &json!("/a/")));
    }

    #[test]
    fn ancestor_filters_are_rejected() {
        let query = Query::new("ns", Kind::Datasets).filter_op("p", Operator::HasAncestor, "x");
        let err = query.reject_ancestor_filters().expect_err("ancestor");
        assert_eq!(
            err.to_string(),
            "unsupported operator: HAS_ANCESTOR operator is not supported in query filters."
        );
    }

    #[test]
    fn binary_cursor_is_rejected() {
        let cursor = Cursor::from(b"data".to_vec());
        assert!(cursor.token("sql-api").is_err());
        assert_eq!(Cursor::from("tok").token("scan").expect("token"), "tok");
    }

    #[test]
    fn distinct_keeps_first_of_each_group() {
        let rows = vec![
            json!({"path": "/a/", "n": 1}),
            json!({"path": "/b/", "n": 2}),
            json!({"path": "/a/", "n": 3}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let out = distinct_by(rows, &["path".to_string()]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["n"], json!(2));
    }
}
