//! Query compiler for the SQL-API document backend.
//!
//! Queries compile to parameterized SQL text over the alias `a`, where the
//! entity payload lives under `a.data`:
//!
//! ```text
//! SELECT * FROM datasets AS a WHERE a.data.path = @path AND ARRAY_CONTAINS(a.data.gtags, @gtags)
//! SELECT a.data.path FROM datasets AS a WHERE a.data.path > @path AND a.data.path < @path1 GROUP BY a.data.path
//! ```
//!
//! Paging is carried by [`FeedOptions`], scoped to the `{namespace}-{kind}`
//! partition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use seistore_core::error::{Error, Result};

use crate::key::namespaced_partition_key;
use crate::query::{HAS_ANCESTOR_UNSUPPORTED, Operator, Query};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "sql-api";

/// Alias of the queried container in generated SQL.
pub const ALIAS: &str = "a";

/// A named query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    /// Name including the leading `@`.
    pub name: String,
    /// Bound value.
    pub value: Value,
}

/// Parameterized SQL text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlQuerySpec {
    /// Query text.
    pub query: String,
    /// Parameters referenced by `query`.
    pub parameters: Vec<SqlParameter>,
}

impl SqlQuerySpec {
    /// Looks up a parameter value by name.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }
}

/// Per-request paging and partition options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOptions {
    /// Partition the query is scoped to.
    pub partition_key: String,
    /// Token returned by the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    /// Page size; `-1` means unlimited.
    pub max_item_count: i64,
}

impl FeedOptions {
    /// Options for the whole `{namespace}-{kind}` partition, unpaged.
    #[must_use]
    pub fn for_partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            continuation_token: None,
            max_item_count: -1,
        }
    }

    /// Continues from `token`.
    #[must_use]
    pub fn with_continuation(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }

    /// Caps the page size.
    #[must_use]
    pub fn with_max_item_count(mut self, count: usize) -> Self {
        self.max_item_count = i64::try_from(count).unwrap_or(i64::MAX);
        self
    }

    /// The page size, or `None` when unlimited.
    #[must_use]
    pub fn page_size(&self) -> Option<usize> {
        usize::try_from(self.max_item_count).ok()
    }
}

#[derive(Default)]
struct StatementBuilder {
    clauses: Vec<String>,
    parameters: Vec<SqlParameter>,
}

impl StatementBuilder {
    fn parameter_name(&self, property: &str) -> String {
        let base: String = property
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let taken = |name: &str| self.parameters.iter().any(|p| p.name == name);
        let first = format!("@{base}");
        if !taken(&first) {
            return first;
        }
        (1..)
            .map(|i| format!("@{base}{i}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or(first)
    }

    fn push(&mut self, property: &str, operator: Operator, value: &Value) -> Result<()> {
        let name = self.parameter_name(property);
        let clause = match operator {
            Operator::Eq | Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
                format!("{ALIAS}.data.{property} {} {name}", operator.symbol())
            }
            Operator::Contains => format!("ARRAY_CONTAINS({ALIAS}.data.{property}, {name})"),
            Operator::HasAncestor => {
                return Err(Error::UnsupportedOperator {
                    message: HAS_ANCESTOR_UNSUPPORTED.to_string(),
                });
            }
        };
        self.clauses.push(clause);
        self.parameters.push(SqlParameter {
            name,
            value: value.clone(),
        });
        Ok(())
    }
}

fn field_list(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("{ALIAS}.data.{f}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Compiles `query` into SQL text and feed options.
///
/// # Errors
///
/// Returns [`Error::UnsupportedOperator`] for ancestor filters and
/// [`Error::InvalidInput`] for binary cursors.
pub fn compile(query: &Query) -> Result<(SqlQuerySpec, FeedOptions)> {
    let mut builder = StatementBuilder::default();
    for filter in &query.filters {
        builder.push(&filter.property, filter.operator, &filter.value)?;
    }

    let selected = if query.projection.is_empty() {
        &query.group_by
    } else {
        &query.projection
    };
    let mut text = if selected.is_empty() {
        format!("SELECT * FROM {} AS {ALIAS}", query.kind)
    } else {
        format!("SELECT {} FROM {} AS {ALIAS}", field_list(selected), query.kind)
    };
    if !builder.clauses.is_empty() {
        text.push_str(" WHERE ");
        text.push_str(&builder.clauses.join(" AND "));
    }
    if !query.group_by.is_empty() {
        text.push_str(" GROUP BY ");
        text.push_str(&field_list(&query.group_by));
    }

    let mut options = FeedOptions::for_partition(namespaced_partition_key(&query.namespace, query.kind));
    if let Some(cursor) = &query.start {
        options = options.with_continuation(cursor.token(BACKEND)?);
    }
    if let Some(limit) = query.limit {
        options = options.with_max_item_count(limit);
    }

    Ok((
        SqlQuerySpec {
            query: text,
            parameters: builder.parameters,
        },
        options,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Kind;
    use serde_json::json;

    #[test]
    fn filters_compile_to_parameterized_predicates() {
        let query = Query::new("seismic-store-acme-survey", Kind::Datasets)
            .filter("name", "x")
            .filter_op("gtags", Operator::Contains, "legal");
        let (spec, options) = compile(&query).expect("compile");

        assert_eq!(
            spec.query,
            "SELECT * FROM datasets AS a WHERE a.data.name = @name AND ARRAY_CONTAINS(a.data.gtags, @gtags)"
        );
        assert_eq!(spec.parameter("@gtags"), Some(&json!("legal")));
        assert_eq!(options.partition_key, "seismic-store-acme-survey-datasets");
        assert_eq!(options.max_item_count, -1);
        assert_eq!(options.continuation_token, None);
    }

    #[test]
    fn repeated_properties_get_numbered_parameters() {
        let query = Query::new("ns", Kind::Datasets)
            .filter_op("size", Operator::Ge, 1)
            .filter_op("size", Operator::Lt, 10)
            .filter_op("size", Operator::Gt, 2);
        let (spec, _) = compile(&query).expect("compile");
        assert_eq!(
            spec.query,
            "SELECT * FROM datasets AS a WHERE a.data.size >= @size AND a.data.size < @size1 AND a.data.size > @size2"
        );
        let values: Vec<_> = spec.parameters.iter().map(|p| p.value.clone()).collect();
        assert_eq!(values, [json!(1), json!(10), json!(2)]);
    }

    #[test]
    fn projection_and_group_by() {
        let query = Query::new("ns", Kind::Datasets)
            .select(["path", "name"])
            .group_by(["path", "name"]);
        let (spec, _) = compile(&query).expect("compile");
        assert_eq!(
            spec.query,
            "SELECT a.data.path, a.data.name FROM datasets AS a GROUP BY a.data.path, a.data.name"
        );

        let (spec, _) = compile(&Query::new("ns", Kind::Datasets).group_by(["path"])).expect("compile");
        assert_eq!(spec.query, "SELECT a.data.path FROM datasets AS a GROUP BY a.data.path");
    }

    #[test]
    fn paging_options_compose() {
        let query = Query::new("ns", Kind::Apps).start("tok").limit(25);
        let (_, options) = compile(&query).expect("compile");
        assert_eq!(
            serde_json::to_value(&options).expect("ser"),
            json!({"partitionKey": "ns-apps", "continuationToken": "tok", "maxItemCount": 25})
        );
        assert_eq!(options.page_size(), Some(25));
        assert_eq!(FeedOptions::for_partition("p").page_size(), None);
    }

    #[test]
    fn unsupported_constructs_fail_fast() {
        let query = Query::new("ns", Kind::Apps).filter_op("x", Operator::HasAncestor, "y");
        assert!(matches!(compile(&query), Err(Error::UnsupportedOperator { .. })));
        let query = Query::new("ns", Kind::Apps).start(vec![0u8]);
        assert!(matches!(compile(&query), Err(Error::InvalidInput(_))));
    }
}
