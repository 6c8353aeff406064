//! Query compiler for the document-over-SQL backend.
//!
//! Every entity lives in one table of `(id, name, key, ctag, data)` rows,
//! where `key` is `{namespace}-{kind}` and `data` a JSON column. Queries
//! compile to a find-many request whose `where.AND` list holds one JSON-path
//! predicate per filter plus the partition predicate:
//!
//! ```json
//! {"where":{"AND":[{"data":{"path":["size"],"gt":10}},{"key":"ns-datasets"}]},
//!  "take":50,"skip":1,"cursor":{"id":42}}
//! ```

use serde::ser::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use seistore_core::error::{Error, Result};

use crate::key::namespaced_partition_key;
use crate::query::{HAS_ANCESTOR_UNSUPPORTED, Operator, Query};

/// Backend name used in logs and errors.
pub const BACKEND: &str = "document-sql";

/// JSON-path comparison operators of the row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathOperator {
    /// `equals`
    Equals,
    /// `lt`
    Lt,
    /// `gt`
    Gt,
    /// `lte`
    Lte,
    /// `gte`
    Gte,
    /// `array_contains`
    ArrayContains,
}

impl PathOperator {
    /// Wire name of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Lte => "lte",
            Self::Gte => "gte",
            Self::ArrayContains => "array_contains",
        }
    }

    /// Maps a query operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperator`] for ancestor filters.
    pub fn from_operator(operator: Operator) -> Result<Self> {
        match operator {
            Operator::Eq => Ok(Self::Equals),
            Operator::Lt => Ok(Self::Lt),
            Operator::Gt => Ok(Self::Gt),
            Operator::Le => Ok(Self::Lte),
            Operator::Ge => Ok(Self::Gte),
            Operator::Contains => Ok(Self::ArrayContains),
            Operator::HasAncestor => Err(Error::UnsupportedOperator {
                message: HAS_ANCESTOR_UNSUPPORTED.to_string(),
            }),
        }
    }

    /// The equivalent query operator, used by evaluators.
    #[must_use]
    pub fn operator(self) -> Operator {
        match self {
            Self::Equals => Operator::Eq,
            Self::Lt => Operator::Lt,
            Self::Gt => Operator::Gt,
            Self::Lte => Operator::Le,
            Self::Gte => Operator::Ge,
            Self::ArrayContains => Operator::Contains,
        }
    }
}

/// One JSON-path predicate on the `data` column.
#[derive(Debug, Clone, PartialEq)]
pub struct PathPredicate {
    /// Path inside `data`.
    pub path: Vec<String>,
    /// Comparison.
    pub operator: PathOperator,
    /// Right-hand side.
    pub value: Value,
}

impl PathPredicate {
    /// Resolves the predicate's path in `data`.
    #[must_use]
    pub fn lookup<'a>(&self, data: &'a Map<String, Value>) -> Option<&'a Value> {
        let (first, rest) = self.path.split_first()?;
        rest.iter()
            .try_fold(data.get(first)?, |value, segment| value.get(segment))
    }

    /// Evaluates the predicate against a row's `data`.
    #[must_use]
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.operator.operator().evaluate(self.lookup(data), &self.value)
    }
}

/// A compiled find-many request.
#[derive(Debug, Clone, PartialEq)]
pub struct FindManyArgs {
    /// Predicates on `data`, all of which must hold.
    pub predicates: Vec<PathPredicate>,
    /// Required value of the `key` column.
    pub partition_key: String,
    /// Maximum rows returned.
    pub take: Option<usize>,
    /// Rows skipped after the cursor row.
    pub skip: Option<usize>,
    /// Row id the page starts from.
    pub cursor: Option<i64>,
}

impl FindManyArgs {
    /// The request in the row store's JSON argument form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut and: Vec<Value> = self
            .predicates
            .iter()
            .map(|p| {
                let mut filter = Map::new();
                filter.insert("path".to_string(), json!(p.path));
                filter.insert(p.operator.as_str().to_string(), p.value.clone());
                json!({ "data": filter })
            })
            .collect();
        and.push(json!({ "key": self.partition_key }));

        let mut args = Map::new();
        args.insert("where".to_string(), json!({ "AND": and }));
        if let Some(take) = self.take {
            args.insert("take".to_string(), json!(take));
        }
        if let Some(skip) = self.skip {
            args.insert("skip".to_string(), json!(skip));
        }
        if let Some(id) = self.cursor {
            args.insert("cursor".to_string(), json!({ "id": id }));
        }
        Value::Object(args)
    }
}

impl Serialize for FindManyArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Compiles `query` into find-many arguments.
///
/// Projection and group-by are not part of the request; the journal applies
/// them to the returned rows.
///
/// # Errors
///
/// Returns [`Error::UnsupportedOperator`] for ancestor filters and
/// [`Error::InvalidInput`] for binary or non-numeric cursors.
pub fn compile(query: &Query) -> Result<FindManyArgs> {
    let predicates = query
        .filters
        .iter()
        .map(|filter| {
            Ok(PathPredicate {
                path: vec![filter.property.clone()],
                operator: PathOperator::from_operator(filter.operator)?,
                value: filter.value.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let cursor = match &query.start {
        Some(start) => {
            let token = start.token(BACKEND)?;
            Some(token.parse::<i64>().map_err(|_| {
                Error::InvalidInput(format!("invalid {BACKEND} cursor '{token}'"))
            })?)
        }
        None => None,
    };

    Ok(FindManyArgs {
        predicates,
        partition_key: namespaced_partition_key(&query.namespace, query.kind),
        take: query.limit,
        skip: cursor.map(|_| 1),
        cursor,
    })
}
