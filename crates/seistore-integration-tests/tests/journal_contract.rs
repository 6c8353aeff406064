//! Behavior every journal backend must share.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use seistore_core::dataset::Dataset;
use seistore_core::error::Error;
use seistore_core::tenant::{DatasetRef, StoreNamespace, Tenant};
use seistore_journal::datasets::{DatasetStore, ListMode};
use seistore_journal::entity::Entity;
use seistore_journal::key::{DatasetKeyStrategy, KeySpec, Kind};
use seistore_journal::query::Operator;
use seistore_test_utils::{RecordedJournal, recorded_journals};
use serde_json::{Map, json};

fn tenant() -> Tenant {
    Tenant::new("acme", "acme.example.com", "acme-project")
}

fn store(journal: &RecordedJournal) -> DatasetStore {
    DatasetStore::new(Arc::clone(&journal.journal), StoreNamespace::new(Some("test")))
}

async fn register(store: &DatasetStore, path: &str, name: &str, gtags: &[&str]) {
    let address = DatasetRef::new("acme", "survey", path, name);
    let mut dataset = Dataset::new(&address);
    dataset.gtags = gtags.iter().map(|t| (*t).to_string()).collect();
    let key = store
        .create_key(&address, DatasetKeyStrategy::Enforced)
        .expect("key");
    store.register(key, dataset).await.expect("register");
}

#[tokio::test]
async fn datasets_roundtrip_on_every_backend() {
    for journal in recorded_journals(&tenant()) {
        let store = store(&journal);
        register(&store, "/raw/", "line-1.segy", &["2d"]).await;

        let address = DatasetRef::new("acme", "survey", "/raw/", "line-1.segy");
        let by_key = store
            .get_by_key(&address)
            .await
            .expect("get")
            .unwrap_or_else(|| panic!("{}: missing by key", journal.backend));
        let by_query = store
            .get(&address)
            .await
            .expect("query")
            .unwrap_or_else(|| panic!("{}: missing by query", journal.backend));
        assert_eq!(by_key.dataset, by_query.dataset, "{}", journal.backend);
        assert_eq!(by_key.dataset.gtags, ["2d"], "{}", journal.backend);
    }
}

#[tokio::test]
async fn every_key_strategy_reads_back_and_deletes_its_own_entity() {
    let strategies = [
        DatasetKeyStrategy::RandomId,
        DatasetKeyStrategy::ContentHash,
        DatasetKeyStrategy::Enforced,
    ];
    for journal in recorded_journals(&tenant()) {
        for strategy in strategies {
            let spec = KeySpec::dataset("seismic-store-test-acme-survey", strategy)
                .at("/raw/", "line-1.segy");
            let key = journal.journal.create_key(&spec).expect("key");
            let data = json!({
                "name": "line-1.segy",
                "path": "/raw/",
                "tenant": "acme",
                "subproject": "survey",
            });
            let entity = Entity::new(key.clone(), data.as_object().cloned().expect("object"));

            journal.journal.save(&entity).await.expect("save");
            let stored = journal
                .journal
                .get(&key)
                .await
                .expect("get")
                .unwrap_or_else(|| panic!("{} {strategy:?}: missing after save", journal.backend));
            assert_eq!(stored.data, entity.data, "{} {strategy:?}", journal.backend);

            journal.journal.delete(&key).await.expect("delete");
            let gone = journal.journal.get(&key).await.expect("get");
            assert!(gone.is_none(), "{} {strategy:?}: still present", journal.backend);
        }
    }
}

#[tokio::test]
async fn absent_entities_read_as_none_and_delete_quietly() {
    for journal in recorded_journals(&tenant()) {
        let key = journal
            .journal
            .create_key(&KeySpec::new("seismic-store-test", Kind::Tenants, "ghost"))
            .expect("key");
        assert!(journal.journal.get(&key).await.expect("get").is_none(), "{}", journal.backend);
        journal.journal.delete(&key).await.expect("delete missing");
    }
}

#[tokio::test]
async fn filters_are_and_chained() {
    for journal in recorded_journals(&tenant()) {
        let store = store(&journal);
        register(&store, "/a/", "x", &[]).await;
        register(&store, "/a/", "y", &[]).await;
        register(&store, "/b/", "x", &[]).await;

        let query = journal
            .journal
            .create_query(&store.subproject_namespace("acme", "survey"), Kind::Datasets)
            .filter("path", "/a/")
            .filter("name", "x");
        let page = journal.journal.run_query(&query).await.expect("query");
        assert_eq!(page.entities.len(), 1, "{}", journal.backend);
        assert_eq!(page.entities[0].data["path"], json!("/a/"), "{}", journal.backend);
    }
}

#[tokio::test]
async fn tag_membership_and_folders_agree_across_backends() {
    for journal in recorded_journals(&tenant()) {
        let store = store(&journal);
        register(&store, "/a/", "one", &["x", "y"]).await;
        register(&store, "/a/b/", "two", &["x"]).await;
        register(&store, "/a/c/d/", "three", &["y"]).await;

        let tagged = store
            .list("acme", "survey", &["y".into()], None)
            .await
            .expect("list");
        let mut names: Vec<_> = tagged.datasets.iter().map(|d| d.dataset.name.clone()).collect();
        names.sort();
        assert_eq!(names, ["one", "three"], "{}", journal.backend);

        let folder = DatasetRef::new("acme", "survey", "/a/", "");
        let mut content = store.list_content(&folder, ListMode::All).await.expect("ls");
        content.directories.sort();
        assert_eq!(content.datasets, ["one"], "{}", journal.backend);
        assert_eq!(content.directories, ["b/", "c/"], "{}", journal.backend);
    }
}

#[tokio::test]
async fn ancestor_filters_fail_before_io() {
    for journal in recorded_journals(&tenant()) {
        let query = journal
            .journal
            .create_query("seismic-store-test-acme-survey", Kind::Datasets)
            .filter_op("path", Operator::HasAncestor, "/a/");
        let err = journal.journal.run_query(&query).await.expect_err("unsupported");
        assert!(matches!(err, Error::UnsupportedOperator { .. }), "{}", journal.backend);
        assert!(journal.log.is_empty(), "{}: {:?}", journal.backend, journal.log.calls());
    }
}

#[tokio::test]
async fn scan_backend_rejects_hyphenated_subprojects_before_io() {
    let journal = recorded_journals(&tenant())
        .into_iter()
        .find(|j| j.backend == "scan")
        .expect("scan backend");

    let spec = KeySpec::new("seismic-store-test-acme", Kind::Subprojects, "my-survey");
    let err = journal.journal.create_key(&spec).expect_err("invalid");
    assert!(matches!(err, Error::InvalidName { .. }));

    let mut key = journal
        .journal
        .create_key(&KeySpec::new("seismic-store-test-acme", Kind::Subprojects, "survey"))
        .expect("key");
    key.name = "my-survey".into();
    let err = journal
        .journal
        .save(&Entity::new(key, Map::new()))
        .await
        .expect_err("invalid");
    assert!(matches!(err, Error::InvalidName { .. }));
    assert!(journal.log.is_empty());
}

#[tokio::test]
async fn transactions_defer_writes_until_commit() {
    for journal in recorded_journals(&tenant()) {
        let key = journal
            .journal
            .create_key(&KeySpec::new("seismic-store-test", Kind::Tenants, "acme"))
            .expect("key");
        let entity = Entity::new(key.clone(), json!({"gcpid": "p"}).as_object().cloned().expect("object"));

        let mut tx = Arc::clone(&journal.journal).transaction();
        tx.run().expect("run");
        tx.save(entity.clone()).expect("queue save");
        tx.rollback();
        assert!(journal.log.is_empty(), "{}", journal.backend);

        tx.run().expect("run");
        tx.save(entity).expect("queue save");
        assert!(journal.log.is_empty(), "{}", journal.backend);
        tx.commit().await.expect("commit");

        let stored = journal.journal.get(&key).await.expect("get").expect("committed");
        assert_eq!(stored.data["gcpid"], json!("p"), "{}", journal.backend);
    }
}

#[tokio::test]
async fn default_operator_sends_the_same_request_as_equality() {
    for journal in recorded_journals(&tenant()) {
        let namespace = "seismic-store-test-acme-survey";
        let implicit = journal
            .journal
            .create_query(namespace, Kind::Datasets)
            .filter("name", "x");
        let explicit = journal
            .journal
            .create_query(namespace, Kind::Datasets)
            .filter_op("name", Operator::Eq, "x");

        journal.journal.run_query(&implicit).await.expect("implicit");
        let first = journal.log.calls();
        journal.log.clear();
        journal.journal.run_query(&explicit).await.expect("explicit");
        assert_eq!(first, journal.log.calls(), "{}", journal.backend);
    }
}
