//! In-memory scan+filter store.
//!
//! Evaluates the compiled [`ScanInput`] the way the hosted store does: the
//! filter expression is parsed back from its text form, placeholders are
//! resolved through the attribute maps, and `limit` caps the number of
//! items evaluated per call rather than the number returned.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};

use seistore_core::error::{Error, Result};

use crate::query::{Operator, project};

use super::client::{ScanItem, ScanOutput, WideColumnClient};
use super::compiler::ScanInput;

const VALIDATION: &str = "ValidationException";

type Tables = BTreeMap<String, BTreeMap<String, ScanItem>>;

/// In-memory [`WideColumnClient`].
#[derive(Debug, Clone, Default)]
pub struct MemoryWideColumnClient {
    tables: Arc<RwLock<Tables>>,
    page_size: Option<usize>,
}

impl MemoryWideColumnClient {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the items evaluated per scan call, forcing multi-page scans.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Number of items in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(table).map_or(0, BTreeMap::len))
    }

    /// Returns true when `table` holds no items.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self, table: &str) -> Result<bool> {
        Ok(self.len(table)? == 0)
    }

    fn evaluation_budget(&self, limit: Option<usize>) -> usize {
        match (limit, self.page_size) {
            (Some(limit), Some(page)) => limit.min(page),
            (Some(limit), None) => limit,
            (None, Some(page)) => page,
            (None, None) => usize::MAX,
        }
    }
}

#[async_trait]
impl WideColumnClient for MemoryWideColumnClient {
    async fn put_item(&self, table: &str, item: ScanItem) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(item.id.clone(), item);
        Ok(())
    }

    async fn get_item(&self, table: &str, id: &str) -> Result<Option<ScanItem>> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(table).and_then(|items| items.get(id)).cloned())
    }

    async fn delete_item(&self, table: &str, id: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        if let Some(items) = tables.get_mut(table) {
            items.remove(id);
        }
        Ok(())
    }

    async fn scan(&self, input: &ScanInput) -> Result<ScanOutput> {
        let clauses = match &input.filter_expression {
            Some(expression) => parse_expression(expression, input)?,
            None => Vec::new(),
        };
        let projection = match &input.projection_expression {
            Some(expression) => Some(parse_projection(expression, input)?),
            None => None,
        };

        let tables = self.tables.read().map_err(poison_err)?;
        let Some(items) = tables.get(&input.table_name) else {
            return Ok(ScanOutput::default());
        };

        let lower = match input
            .exclusive_start_key
            .as_ref()
            .and_then(|key| key.get("id"))
        {
            Some(Value::String(id)) => Bound::Excluded(id.clone()),
            Some(_) => {
                return Err(Error::backend_with_code(
                    VALIDATION,
                    "ExclusiveStartKey id must be a string",
                ));
            }
            None => Bound::Unbounded,
        };

        let budget = self.evaluation_budget(input.limit);
        let mut range = items.range((lower, Bound::Unbounded)).peekable();
        let mut output = ScanOutput::default();
        let mut evaluated = 0usize;
        let mut last_id = None;
        while evaluated < budget {
            let Some((id, item)) = range.next() else {
                break;
            };
            evaluated += 1;
            last_id = Some(id.clone());
            if clauses.iter().all(|clause| clause.matches(item)) {
                let mut item = item.clone();
                if let Some(fields) = &projection {
                    item.attributes = project(&item.attributes, fields);
                }
                output.items.push(item);
            }
        }

        if range.peek().is_some() {
            output.last_evaluated_key = last_id.map(|id| super::compiler::start_key(&id));
        }
        Ok(output)
    }
}

struct Clause {
    attribute: String,
    operator: Operator,
    value: Value,
}

impl Clause {
    fn matches(&self, item: &ScanItem) -> bool {
        self.operator.evaluate(item.attribute(&self.attribute), &self.value)
    }
}

fn parse_expression(expression: &str, input: &ScanInput) -> Result<Vec<Clause>> {
    expression
        .split(" AND ")
        .map(|clause| parse_clause(clause.trim(), input))
        .collect()
}

fn parse_clause(clause: &str, input: &ScanInput) -> Result<Clause> {
    let (alias, operator, placeholder) = if let Some(args) = clause
        .strip_prefix("contains(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let (alias, placeholder) = args
            .split_once(',')
            .ok_or_else(|| invalid_expression(clause))?;
        (alias.trim(), Operator::Contains, placeholder.trim())
    } else {
        let start = clause
            .find(['<', '>', '='])
            .ok_or_else(|| invalid_expression(clause))?;
        let rest = &clause[start..];
        let width = if rest.starts_with("<=") || rest.starts_with(">=") {
            2
        } else {
            1
        };
        let operator: Operator = rest[..width].parse()?;
        (&clause[..start], operator, &rest[width..])
    };

    let attribute = input
        .expression_attribute_names
        .get(alias)
        .ok_or_else(|| {
            Error::backend_with_code(VALIDATION, format!("undefined attribute name {alias}"))
        })?;
    let value = input
        .expression_attribute_values
        .get(placeholder)
        .ok_or_else(|| {
            Error::backend_with_code(VALIDATION, format!("undefined attribute value {placeholder}"))
        })?;
    Ok(Clause {
        attribute: attribute.clone(),
        operator,
        value: value.clone(),
    })
}

fn parse_projection(expression: &str, input: &ScanInput) -> Result<Vec<String>> {
    expression
        .split(',')
        .map(|alias| {
            let alias = alias.trim();
            input
                .expression_attribute_names
                .get(alias)
                .cloned()
                .ok_or_else(|| {
                    Error::backend_with_code(VALIDATION, format!("undefined attribute name {alias}"))
                })
        })
        .collect()
}

fn invalid_expression(clause: &str) -> Error {
    Error::backend_with_code(VALIDATION, format!("invalid filter expression '{clause}'"))
}

#[allow(clippy::needless_pass_by_value)]
fn poison_err<T>(_: std::sync::PoisonError<T>) -> Error {
    Error::internal("scan store lock poisoned")
}
