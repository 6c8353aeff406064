//! Scan+filter journal: one table per kind, shared by every subproject of a
//! tenant.
//!
//! The primary key is a composite partition id built from the namespace:
//!
//! | Kind | Partition id |
//! |------|--------------|
//! | subprojects | `{tenant}:{name}` |
//! | datasets | `{tenant}:{subproject}:{dataset name}:{dataset path}` |
//! | apps | `{tenant}:{name}` |
//! | others | `{name}` |
//!
//! Dataset ids embed the dataset's name and path, so dataset keys can only
//! be created from a spec that carries a location.

pub mod client;
pub mod compiler;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::Instrument;

use seistore_core::error::{Error, Result};
use seistore_core::observability::journal_span;

use crate::entity::Entity;
use crate::journal::Journal;
use crate::key::{Key, KeySpec, Kind, NameRule, local_name, validate_name};
use crate::query::{Query, QueryPage, distinct_by};
use crate::transaction::Transaction;

pub use client::{ScanItem, ScanOutput, WideColumnClient};
pub use compiler::{BACKEND, ScanInput, ScanLayout};
pub use memory::MemoryWideColumnClient;

/// Naming rules enforced by this backend: subproject names may not contain
/// `-`, since the namespace is split on it.
pub const SCAN_NAME_RULES: &[NameRule] = &[NameRule {
    kind: Kind::Subprojects,
    pattern: "^[^\\-]+$",
    check: has_no_hyphen,
}];

fn has_no_hyphen(name: &str) -> bool {
    !name.is_empty() && !name.contains('-')
}

/// Journal over a [`WideColumnClient`].
pub struct ScanJournal<C> {
    client: Arc<C>,
    layout: ScanLayout,
}

impl<C> std::fmt::Debug for ScanJournal<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanJournal")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl<C: WideColumnClient> ScanJournal<C> {
    /// Creates a journal writing to the tables of `layout`.
    #[must_use]
    pub fn new(client: Arc<C>, layout: ScanLayout) -> Self {
        Self { client, layout }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    fn table(&self, key: &Key) -> String {
        key.table_name
            .clone()
            .unwrap_or_else(|| self.layout.table_name(key.kind))
    }

    /// Dataset ids are `tenant:subproject:name:path`; anything shorter would
    /// be stored under an id its key cannot read back.
    fn check_dataset_id(key: &Key) -> Result<()> {
        if key.kind == Kind::Datasets && key.partition_key.splitn(4, ':').count() < 4 {
            return Err(Error::InvalidInput(format!(
                "dataset key {key} does not carry the dataset name and path"
            )));
        }
        Ok(())
    }
}

/// Builds the composite partition id of a key.
#[must_use]
pub fn partition_id(spec: &KeySpec, name: &str) -> String {
    let parts: Vec<&str> = spec.namespace.split('-').collect();
    let last = parts.last().copied().unwrap_or_default();
    match spec.kind {
        Kind::Subprojects | Kind::Apps => format!("{last}:{name}"),
        Kind::Datasets => {
            let tenant = parts
                .len()
                .checked_sub(2)
                .and_then(|i| parts.get(i))
                .copied()
                .unwrap_or_default();
            match &spec.location {
                Some(location) => {
                    format!("{tenant}:{last}:{}:{}", location.name, location.path)
                }
                None => format!("{tenant}:{last}"),
            }
        }
        Kind::Tenants | Kind::SeismicMeta => name.to_string(),
    }
}

#[async_trait]
impl<C: WideColumnClient> Journal for ScanJournal<C> {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn create_key(&self, spec: &KeySpec) -> Result<Key> {
        if spec.kind == Kind::Datasets && spec.location.is_none() {
            return Err(Error::InvalidInput(format!(
                "dataset keys in {} require the dataset path and name",
                spec.namespace
            )));
        }
        let name = local_name(spec)?;
        validate_name(SCAN_NAME_RULES, spec.kind, &name)?;
        let mut key = Key::new(name.clone(), partition_id(spec, &name), spec.kind);
        key.table_name = Some(self.layout.table_name(spec.kind));
        Ok(key)
    }

    async fn save(&self, entity: &Entity) -> Result<()> {
        validate_name(SCAN_NAME_RULES, entity.key.kind, &entity.key.name)?;
        Self::check_dataset_id(&entity.key)?;
        let table = self.table(&entity.key);
        let id = entity.key.partition_key.clone();

        let key = entity.key.clone();
        let mut partition_attributes = Map::new();
        if key.kind == Kind::Apps {
            if let Some((tenant, _)) = id.split_once(':') {
                partition_attributes.insert("tenant".to_string(), Value::String(tenant.to_string()));
            }
        }

        let item = ScanItem {
            id,
            key,
            ctag: entity.ctag.clone(),
            attributes: entity.data.clone(),
            partition_attributes,
        };
        self.client
            .put_item(&table, item)
            .instrument(journal_span("save", BACKEND, &table))
            .await
    }

    async fn get(&self, key: &Key) -> Result<Option<Entity>> {
        let table = self.table(key);
        let item = self
            .client
            .get_item(&table, &key.partition_key)
            .instrument(journal_span("get", BACKEND, &table))
            .await?;
        Ok(item.map(|item| Entity {
            key: item.key,
            ctag: item.ctag,
            data: item.attributes,
        }))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let table = self.table(key);
        self.client
            .delete_item(&table, &key.partition_key)
            .instrument(journal_span("delete", BACKEND, &table))
            .await
    }

    async fn run_query(&self, query: &Query) -> Result<QueryPage> {
        let mut input = compiler::compile(query, &self.layout)?;
        let span = journal_span("run_query", BACKEND, &query.namespace);

        let mut items: Vec<ScanItem> = Vec::new();
        let mut exhausted = false;
        let mut truncated = false;
        let mut pages = 0usize;
        async {
            loop {
                let output = self.client.scan(&input).await?;
                pages += 1;
                for item in output.items {
                    if query.limit.is_some_and(|limit| items.len() >= limit) {
                        truncated = true;
                        break;
                    }
                    items.push(item);
                }
                match output.last_evaluated_key {
                    Some(next) if !truncated => {
                        if query.limit.is_some_and(|limit| items.len() >= limit) {
                            break;
                        }
                        input.exclusive_start_key = Some(next);
                    }
                    Some(_) => break,
                    None => {
                        exhausted = !truncated;
                        break;
                    }
                }
            }
            tracing::debug!(pages, rows = items.len(), "scan finished");
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await?;

        let end_cursor = if exhausted {
            None
        } else {
            items.last().map(|item| item.id.clone())
        };

        let mut page = QueryPage {
            end_cursor,
            ..QueryPage::default()
        };
        if query.is_projection() {
            let rows = items.into_iter().map(|item| item.attributes).collect();
            page.projections = if query.group_by.is_empty() {
                rows
            } else {
                distinct_by(rows, &query.group_by)
            };
        } else {
            page.entities = items
                .into_iter()
                .map(|item| Entity {
                    key: item.key,
                    ctag: item.ctag,
                    data: item.attributes,
                })
                .collect();
        }
        Ok(page)
    }

    fn transaction(self: Arc<Self>) -> Transaction {
        Transaction::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DatasetKeyStrategy;
    use crate::query::Operator;
    use serde_json::json;

    const NS: &str = "seismic-store-acme-survey";

    fn journal(page_size: usize) -> Arc<ScanJournal<MemoryWideColumnClient>> {
        let client = Arc::new(MemoryWideColumnClient::new().with_page_size(page_size));
        Arc::new(ScanJournal::new(client, ScanLayout::new("dev", "t-1")))
    }

    fn dataset(journal: &ScanJournal<MemoryWideColumnClient>, path: &str, name: &str) -> Entity {
        let key = journal
            .create_key(&KeySpec::dataset(NS, DatasetKeyStrategy::RandomId).at(path, name))
            .expect("key");
        let data = json!({
            "name": name,
            "path": path,
            "tenant": "acme",
            "subproject": "survey",
        });
        Entity::new(key, data.as_object().cloned().expect("object"))
    }

    #[test]
    fn partition_ids_per_kind() {
        let j = journal(10);
        let key = j
            .create_key(&KeySpec::new("seismic-store-acme", Kind::Subprojects, "survey"))
            .expect("key");
        assert_eq!(key.partition_key, "acme:survey");
        assert_eq!(key.table_name.as_deref(), Some("dev-t-1-SeismicStore.subprojects"));

        let key = j
            .create_key(&KeySpec::dataset(NS, DatasetKeyStrategy::Enforced).at("/a/", "x.segy"))
            .expect("key");
        assert_eq!(key.partition_key, "acme:survey:x.segy:/a/");

        let key = j
            .create_key(&KeySpec::new("seismic-store", Kind::Tenants, "acme"))
            .expect("key");
        assert_eq!(key.partition_key, "acme");
    }

    #[test]
    fn hyphenated_subproject_names_are_rejected() {
        let err = journal(10)
            .create_key(&KeySpec::new("seismic-store-acme", Kind::Subprojects, "my-survey"))
            .expect_err("invalid");
        assert!(matches!(err, Error::InvalidName { .. }));
    }

    #[tokio::test]
    async fn dataset_keys_read_back_what_was_saved() {
        let j = journal(10);
        let entity = dataset(&j, "/a/", "x.segy");
        assert_eq!(entity.key.partition_key, "acme:survey:x.segy:/a/");
        j.save(&entity).await.expect("save");

        let stored = j.get(&entity.key).await.expect("get").expect("present");
        assert_eq!(stored.data, entity.data);
        assert_eq!(stored.key, entity.key);

        j.delete(&entity.key).await.expect("delete");
        assert!(j.get(&entity.key).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn dataset_keys_without_a_location_are_rejected() {
        let j = journal(10);
        let err = j
            .create_key(&KeySpec::dataset(NS, DatasetKeyStrategy::RandomId))
            .expect_err("no location");
        assert!(matches!(err, Error::InvalidInput(_)));

        let mut entity = dataset(&j, "/a/", "x.segy");
        entity.key.partition_key = "acme:survey".into();
        let err = j.save(&entity).await.expect_err("short id");
        assert!(matches!(err, Error::InvalidInput(_)));
        let table = j.table(&entity.key);
        assert!(j.client().is_empty(&table).expect("len"));
    }

    #[tokio::test]
    async fn app_items_carry_the_tenant_for_filtering() {
        let j = journal(10);
        let key = j
            .create_key(&KeySpec::new("seismic-store-acme", Kind::Apps, "client-1"))
            .expect("key");
        j.save(&Entity::new(key, Map::new())).await.expect("save");

        let page = j
            .run_query(&Query::new("seismic-store-acme", Kind::Apps))
            .await
            .expect("query");
        assert_eq!(page.entities.len(), 1);
        assert!(page.entities[0].data.is_empty());

        let page = j
            .run_query(&Query::new("seismic-store-other", Kind::Apps))
            .await
            .expect("query");
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn queries_follow_continuation_until_exhausted() {
        let j = journal(2);
        for i in 0..7 {
            j.save(&dataset(&j, "/a/", &format!("d{i}"))).await.expect("save");
        }

        let page = j.run_query(&Query::new(NS, Kind::Datasets)).await.expect("query");
        assert_eq!(page.entities.len(), 7);
        assert_eq!(page.end_cursor, None);
    }

    #[tokio::test]
    async fn limit_stops_paging_and_returns_a_cursor() {
        let j = journal(2);
        for i in 0..7 {
            j.save(&dataset(&j, "/a/", &format!("d{i}"))).await.expect("save");
        }

        let first = j
            .run_query(&Query::new(NS, Kind::Datasets).limit(3))
            .await
            .expect("query");
        assert_eq!(first.entities.len(), 3);
        let cursor = first.end_cursor.clone().expect("cursor");

        let rest = j
            .run_query(&Query::new(NS, Kind::Datasets).start(cursor))
            .await
            .expect("query");
        assert_eq!(rest.entities.len(), 4);
        let mut names: Vec<_> = first
            .entities
            .iter()
            .chain(&rest.entities)
            .filter_map(|e| e.data["name"].as_str().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 7);
    }

    #[tokio::test]
    async fn folders_are_listed_from_the_path_range() {
        let j = journal(3);
        for (path, name) in [("/a/", "x"), ("/a/b/", "y"), ("/a/b/", "z"), ("/a/c/d/", "w"), ("/e/", "v")] {
            j.save(&dataset(&j, path, name)).await.expect("save");
        }
        let mut folders = j.list_folders(NS, "/a/").await.expect("folders");
        folders.sort();
        assert_eq!(folders, ["b/", "c/"]);
    }

    #[tokio::test]
    async fn ancestor_filters_never_reach_the_store() {
        let j = journal(10);
        let query = Query::new(NS, Kind::Datasets).filter_op("path", Operator::HasAncestor, "/a/");
        assert!(matches!(
            j.run_query(&query).await,
            Err(Error::UnsupportedOperator { .. })
        ));
    }
}
