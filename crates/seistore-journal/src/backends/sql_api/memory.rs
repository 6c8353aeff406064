//! In-memory document container.
//!
//! Queries are answered by parsing the generated SQL text back, so the
//! emulator exercises exactly what the compiler emits. Only the grammar the
//! compiler produces is understood; anything else is a `BadRequest`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use crate::query::{Operator, distinct_by, project};

use super::client::{CosmosItem, DocumentContainer, FeedResponse, container_id};
use super::compiler::{ALIAS, FeedOptions, SqlQuerySpec};

const BAD_REQUEST: &str = "BadRequest";

type Partitions = BTreeMap<String, BTreeMap<String, CosmosItem>>;

/// In-memory [`DocumentContainer`].
#[derive(Debug, Clone)]
pub struct MemoryDocumentContainer {
    id: String,
    partitions: Arc<RwLock<Partitions>>,
}

impl MemoryDocumentContainer {
    /// Creates the empty container of `data_partition`.
    #[must_use]
    pub fn new(data_partition: &str) -> Self {
        Self {
            id: container_id(data_partition),
            partitions: Arc::default(),
        }
    }

    /// Number of documents in `partition_key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn partition_len(&self, partition_key: &str) -> Result<usize> {
        let partitions = self.partitions.read().map_err(poison_err)?;
        Ok(partitions.get(partition_key).map_or(0, BTreeMap::len))
    }
}

#[async_trait]
impl DocumentContainer for MemoryDocumentContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn upsert_item(&self, item: CosmosItem) -> Result<()> {
        let mut partitions = self.partitions.write().map_err(poison_err)?;
        partitions
            .entry(item.key.clone())
            .or_default()
            .insert(item.id.clone(), item);
        Ok(())
    }

    async fn read_item(&self, id: &str, partition_key: &str) -> Result<Option<CosmosItem>> {
        let partitions = self.partitions.read().map_err(poison_err)?;
        Ok(partitions
            .get(partition_key)
            .and_then(|items| items.get(id))
            .cloned())
    }

    async fn delete_item(&self, id: &str, partition_key: &str) -> Result<bool> {
        let mut partitions = self.partitions.write().map_err(poison_err)?;
        Ok(partitions
            .get_mut(partition_key)
            .and_then(|items| items.remove(id))
            .is_some())
    }

    async fn query_items(&self, spec: &SqlQuerySpec, options: &FeedOptions) -> Result<FeedResponse> {
        let parsed = ParsedQuery::parse(spec)?;
        let offset = match &options.continuation_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                Error::backend_with_code(BAD_REQUEST, format!("invalid continuation token '{token}'"))
            })?,
            None => 0,
        };

        let partitions = self.partitions.read().map_err(poison_err)?;
        let matching = partitions
            .get(&options.partition_key)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|item| parsed.matches(&item.data));

        let rows: Vec<Value> = match &parsed.select {
            None => matching
                .map(serde_json::to_value)
                .collect::<std::result::Result<_, _>>()?,
            Some(fields) => {
                let projected: Vec<Map<String, Value>> =
                    matching.map(|item| project(&item.data, fields)).collect();
                let projected = if parsed.group_by.is_empty() {
                    projected
                } else {
                    distinct_by(projected, &parsed.group_by)
                };
                projected.into_iter().map(Value::Object).collect()
            }
        };

        let page = options.page_size().unwrap_or(usize::MAX);
        let resources: Vec<Value> = rows.iter().skip(offset).take(page).cloned().collect();
        let next = offset + resources.len();
        Ok(FeedResponse {
            continuation_token: (next < rows.len()).then(|| next.to_string()),
            resources,
        })
    }
}

struct Predicate {
    field: String,
    operator: Operator,
    value: Value,
}

struct ParsedQuery {
    select: Option<Vec<String>>,
    predicates: Vec<Predicate>,
    group_by: Vec<String>,
}

impl ParsedQuery {
    fn parse(spec: &SqlQuerySpec) -> Result<Self> {
        let text = spec.query.trim();
        let rest = text
            .strip_prefix("SELECT ")
            .ok_or_else(|| syntax_error(text))?;
        let (select, rest) = rest.split_once(" FROM ").ok_or_else(|| syntax_error(text))?;
        let (rest, group_by) = match rest.split_once(" GROUP BY ") {
            Some((before, list)) => (before, field_list(list)?),
            None => (rest, Vec::new()),
        };
        let predicates = match rest.split_once(" WHERE ") {
            Some((_, clauses)) => clauses
                .split(" AND ")
                .map(|clause| parse_predicate(clause.trim(), spec))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        let select = if select.trim() == "*" {
            None
        } else {
            Some(field_list(select)?)
        };
        Ok(Self {
            select,
            predicates,
            group_by,
        })
    }

    fn matches(&self, data: &Map<String, Value>) -> bool {
        self.predicates
            .iter()
            .all(|p| p.operator.evaluate(data.get(&p.field), &p.value))
    }
}

fn field(expr: &str) -> Result<String> {
    expr.trim()
        .strip_prefix(ALIAS)
        .and_then(|rest| rest.strip_prefix(".data."))
        .map(str::to_string)
        .ok_or_else(|| syntax_error(expr))
}

fn field_list(list: &str) -> Result<Vec<String>> {
    list.split(',').map(field).collect()
}

fn parse_predicate(clause: &str, spec: &SqlQuerySpec) -> Result<Predicate> {
    let (lhs, operator, name) = if let Some(args) = clause
        .strip_prefix("ARRAY_CONTAINS(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (lhs, name) = args.split_once(',').ok_or_else(|| syntax_error(clause))?;
        (lhs, Operator::Contains, name.trim())
    } else {
        let mut tokens = clause.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(lhs), Some(op), Some(name), None) => (lhs, op.parse::<Operator>()?, name),
            _ => return Err(syntax_error(clause)),
        }
    };
    let value = spec.parameter(name).ok_or_else(|| {
        Error::backend_with_code(BAD_REQUEST, format!("parameter {name} is not defined"))
    })?;
    Ok(Predicate {
        field: field(lhs)?,
        operator,
        value: value.clone(),
    })
}

fn syntax_error(text: &str) -> Error {
    Error::backend_with_code(BAD_REQUEST, format!("syntax error near '{text}'"))
}

#[allow(clippy::needless_pass_by_value)]
fn poison_err<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("document container lock poisoned")
}
