//! Query compiler for the scan+filter backend.
//!
//! Queries become a scan request with an AND-chained filter expression over
//! named placeholders: `#attr` aliases in `ExpressionAttributeNames` and
//! `:value` placeholders in `ExpressionAttributeValues`. A property filtered
//! more than once gets suffixed placeholders (`:size`, `:size1`, `:size2`),
//! so every predicate survives.
//!
//! Kinds stored in shared per-tenant tables get extra equality filters
//! derived from the query namespace, appended after the caller's filters.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use crate::key::Kind;
use crate::query::{Filter, Operator, Query};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "scan";

/// Physical table layout: `{environment}-{tenant_id}-SeismicStore.{kind}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLayout {
    /// Deployment environment prefix.
    pub environment: String,
    /// Tenant identifier resolved from the data partition.
    pub tenant_id: String,
}

impl ScanLayout {
    /// Creates a layout.
    #[must_use]
    pub fn new(environment: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            tenant_id: tenant_id.into(),
        }
    }

    /// Table holding entities of `kind`.
    #[must_use]
    pub fn table_name(&self, kind: Kind) -> String {
        format!("{}-{}-SeismicStore.{kind}", self.environment, self.tenant_id)
    }
}

/// A compiled scan request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanInput {
    /// Table to scan.
    pub table_name: String,
    /// AND-chained filter expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_expression: Option<String>,
    /// `#alias` to attribute name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: BTreeMap<String, String>,
    /// `:placeholder` to value.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_values: BTreeMap<String, Value>,
    /// Comma-separated attribute aliases to return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Items evaluated per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Primary key of the last item evaluated by the previous request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<Map<String, Value>>,
}

/// Alias of an attribute in expressions. `path` is a reserved word and is
/// aliased as `#p`.
#[must_use]
pub fn attribute_alias(property: &str) -> String {
    if property == "path" {
        "#p".to_string()
    } else {
        format!("#{property}")
    }
}

/// Builds an exclusive start key from a continuation token.
#[must_use]
pub fn start_key(token: &str) -> Map<String, Value> {
    let mut key = Map::new();
    key.insert("id".to_string(), Value::String(token.to_string()));
    key
}

#[derive(Default)]
struct ExpressionBuilder {
    clauses: Vec<String>,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
}

impl ExpressionBuilder {
    fn placeholder(&self, base: &str) -> String {
        let first = format!(":{base}");
        if !self.values.contains_key(&first) {
            return first;
        }
        (1..)
            .map(|i| format!(":{base}{i}"))
            .find(|candidate| !self.values.contains_key(candidate))
            .unwrap_or(first)
    }

    fn push(&mut self, filter: &Filter) -> Result<()> {
        let alias = attribute_alias(&filter.property);
        let placeholder = self.placeholder(alias.trim_start_matches('#'));
        let clause = match filter.operator {
            Operator::Eq | Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
                format!("{alias}{}{placeholder}", filter.operator.symbol())
            }
            Operator::Contains => format!("contains({alias},{placeholder})"),
            Operator::HasAncestor => {
                return Err(Error::UnsupportedOperator {
                    message: crate::query::HAS_ANCESTOR_UNSUPPORTED.to_string(),
                });
            }
        };
        self.names.insert(alias, filter.property.clone());
        self.values.insert(placeholder, filter.value.clone());
        self.clauses.push(clause);
        Ok(())
    }
}

/// Equality filters implied by the namespace for kinds kept in shared tables.
///
/// Namespaces end in `-{tenant}-{subproject}` for datasets and `-{tenant}`
/// for subprojects and apps.
#[must_use]
pub fn partition_filters(namespace: &str, kind: Kind) -> Vec<Filter> {
    let parts: Vec<&str> = namespace.split('-').collect();
    let last = parts.last().copied().unwrap_or_default();
    let eq = |property: &str, value: &str| {
        Filter::new(property, Some(Operator::Eq), Some(Value::String(value.to_string())))
    };
    match kind {
        Kind::Datasets => {
            let tenant = parts
                .len()
                .checked_sub(2)
                .and_then(|i| parts.get(i))
                .copied()
                .unwrap_or_default();
            vec![eq("tenant", tenant), eq("subproject", last)]
        }
        Kind::Subprojects | Kind::Apps => vec![eq("tenant", last)],
        Kind::Tenants | Kind::SeismicMeta => Vec::new(),
    }
}

/// Compiles `query` into a scan request against `layout`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedOperator`] for ancestor filters and
/// [`Error::InvalidInput`] for binary cursors.
pub fn compile(query: &Query, layout: &ScanLayout) -> Result<ScanInput> {
    let mut builder = ExpressionBuilder::default();
    for filter in &query.filters {
        builder.push(filter)?;
    }
    for filter in partition_filters(&query.namespace, query.kind) {
        builder.push(&filter)?;
    }

    let mut fields: Vec<&String> = query.projection.iter().collect();
    for field in &query.group_by {
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    let projection_expression = if fields.is_empty() {
        None
    } else {
        let aliases: Vec<String> = fields
            .iter()
            .map(|field| {
                let alias = attribute_alias(field);
                builder.names.insert(alias.clone(), (*field).clone());
                alias
            })
            .collect();
        Some(aliases.join(","))
    };

    let exclusive_start_key = match &query.start {
        Some(cursor) => Some(start_key(cursor.token(BACKEND)?)),
        None => None,
    };

    Ok(ScanInput {
        table_name: layout.table_name(query.kind),
        filter_expression: if builder.clauses.is_empty() {
            None
        } else {
            Some(builder.clauses.join(" AND "))
        },
        expression_attribute_names: builder.names,
        expression_attribute_values: builder.values,
        projection_expression,
        limit: query.limit,
        exclusive_start_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout() -> ScanLayout {
        ScanLayout::new("dev", "t-123")
    }

    #[test]
    fn table_names_follow_the_physical_layout() {
        assert_eq!(layout().table_name(Kind::Datasets), "dev-t-123-SeismicStore.datasets");
    }

    #[test]
    fn dataset_queries_inject_tenant_and_subproject() {
        let query = Query::new("seismic-store-acme-survey", Kind::Datasets).filter("name", "x");
        let input = compile(&query, &layout()).expect("compile");

        assert_eq!(
            input.filter_expression.as_deref(),
            Some("#name=:name AND #tenant=:tenant AND #subproject=:subproject")
        );
        assert_eq!(input.expression_attribute_values[":tenant"], json!("acme"));
        assert_eq!(input.expression_attribute_values[":subproject"], json!("survey"));
    }

    #[test]
    fn subproject_and_app_queries_inject_tenant_only() {
        for kind in [Kind::Subprojects, Kind::Apps] {
            let input = compile(&Query::new("seismic-store-acme", kind), &layout()).expect("compile");
            assert_eq!(input.filter_expression.as_deref(), Some("#tenant=:tenant"));
            assert_eq!(input.expression_attribute_values[":tenant"], json!("acme"));
        }
        let input = compile(&Query::new("seismic-store", Kind::Tenants), &layout()).expect("compile");
        assert_eq!(input.filter_expression, None);
        assert!(input.expression_attribute_names.is_empty());
    }

    #[test]
    fn path_is_aliased() {
        let query = Query::new("seismic-store", Kind::Tenants).filter("path", "/a/");
        let input = compile(&query, &layout()).expect("compile");
        assert_eq!(input.filter_expression.as_deref(), Some("#p=:p"));
        assert_eq!(input.expression_attribute_names["#p"], "path");
    }

    #[test]
    fn same_property_twice_keeps_both_predicates() {
        let query = Query::new("seismic-store", Kind::Tenants)
            .filter_op("path", Operator::Gt, "/a/")
            .filter_op("path", Operator::Lt, "/a/\u{fffd}")
            .filter_op("gtags", Operator::Contains, "x")
            .filter_op("gtags", Operator::Contains, "y");
        let input = compile(&query, &layout()).expect("compile");

        assert_eq!(
            input.filter_expression.as_deref(),
            Some("#p>:p AND #p<:p1 AND contains(#gtags,:gtags) AND contains(#gtags,:gtags1)")
        );
        assert_eq!(input.expression_attribute_values[":p"], json!("/a/"));
        assert_eq!(input.expression_attribute_values[":p1"], json!("/a/\u{fffd}"));
        assert_eq!(input.expression_attribute_values[":gtags1"], json!("y"));
    }

    #[test]
    fn default_operator_compiles_like_explicit_equality() {
        let implicit = Query::new("seismic-store", Kind::Tenants)
            .with_filter(Filter::new("name", None, Some(json!("a"))));
        let explicit = Query::new("seismic-store", Kind::Tenants).filter_op("name", Operator::Eq, "a");
        assert_eq!(
            compile(&implicit, &layout()).expect("compile"),
            compile(&explicit, &layout()).expect("compile")
        );
    }

    #[test]
    fn projection_and_paging() {
        let query = Query::new("seismic-store", Kind::Tenants)
            .select(["path", "name"])
            .start("acme:survey:x:/a/")
            .limit(10);
        let input = compile(&query, &layout()).expect("compile");
        assert_eq!(input.projection_expression.as_deref(), Some("#p,#name"));
        assert_eq!(input.limit, Some(10));
        assert_eq!(
            input.exclusive_start_key,
            Some(start_key("acme:survey:x:/a/"))
        );
    }

    #[test]
    fn ancestor_and_binary_cursor_fail_fast() {
        let query = Query::new("ns", Kind::Tenants).filter_op("a", Operator::HasAncestor, "b");
        assert!(matches!(
            compile(&query, &layout()),
            Err(Error::UnsupportedOperator { .. })
        ));

        let query = Query::new("ns", Kind::Tenants).start(b"raw".to_vec());
        assert!(matches!(compile(&query, &layout()), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let query = Query::new("seismic-store", Kind::Tenants).filter("name", "a");
        let wire = serde_json::to_value(compile(&query, &layout()).expect("compile")).expect("ser");
        assert_eq!(wire["TableName"], json!("dev-t-123-SeismicStore.tenants"));
        assert_eq!(wire["FilterExpression"], json!("#name=:name"));
        assert!(wire.get("ProjectionExpression").is_none());
    }
}
