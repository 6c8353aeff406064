//! Journal provider registry.
//!
//! Providers are deployment identifiers: `aws`
//! selects the scan+filter backend, `anthos` the document-over-SQL backend
//! and `azure` the SQL-API backend. [`in_memory_registry`] wires each of
//! them to its in-memory client, for tests and local runs.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use seistore_core::error::{Error, Result};
use seistore_core::registry::Registry;
use seistore_core::tenant::Tenant;

use crate::backends::{
    DocumentSqlJournal, MemoryDocumentContainer, MemoryDocumentSqlClient, MemoryWideColumnClient,
    ScanJournal, ScanLayout, SqlApiJournal,
};
use crate::journal::Journal;

/// Provider id of the scan+filter backend.
pub const PROVIDER_SCAN: &str = "aws";
/// Provider id of the document-over-SQL backend.
pub const PROVIDER_DOCUMENT_SQL: &str = "anthos";
/// Provider id of the SQL-API backend.
pub const PROVIDER_SQL_API: &str = "azure";

/// Builds a tenant's journal for a provider id.
pub type JournalRegistry = Registry<dyn Journal, Tenant>;

/// Returns a registry whose providers share in-memory stores, so journals
/// built for the same tenant see each other's writes.
///
/// `environment` prefixes the scan backend's table names.
#[must_use]
pub fn in_memory_registry(environment: &str) -> JournalRegistry {
    let mut registry = JournalRegistry::new("journal");

    let wide_column = Arc::new(MemoryWideColumnClient::new());
    let environment = environment.to_string();
    registry.register(PROVIDER_SCAN, move |tenant: &Tenant| {
        let layout = ScanLayout::new(environment.clone(), tenant.data_partition());
        Ok(Arc::new(ScanJournal::new(Arc::clone(&wide_column), layout)) as Arc<dyn Journal>)
    });

    let rows = Arc::new(MemoryDocumentSqlClient::new());
    registry.register(PROVIDER_DOCUMENT_SQL, move |_: &Tenant| {
        Ok(Arc::new(DocumentSqlJournal::new(Arc::clone(&rows))) as Arc<dyn Journal>)
    });

    let containers: Arc<RwLock<BTreeMap<String, Arc<MemoryDocumentContainer>>>> = Arc::default();
    registry.register(PROVIDER_SQL_API, move |tenant: &Tenant| {
        let partition = tenant.data_partition();
        let mut containers = containers
            .write()
            .map_err(|_| Error::internal("container cache lock poisoned"))?;
        let container = containers
            .entry(partition.to_string())
            .or_insert_with(|| Arc::new(MemoryDocumentContainer::new(partition)));
        Ok(Arc::new(SqlApiJournal::new(Arc::clone(container))) as Arc<dyn Journal>)
    });

    registry
}

/// Builds the journal of `tenant` for `provider`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unknown providers.
pub fn journal_for(registry: &JournalRegistry, provider: &str, tenant: &Tenant) -> Result<Arc<dyn Journal>> {
    let journal = registry.build(provider, tenant)?;
    tracing::debug!(provider, tenant = %tenant.name, backend = journal.backend(), "journal ready");
    Ok(journal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::key::{KeySpec, Kind};
    use serde_json::Map;

    fn tenant() -> Tenant {
        Tenant::new("acme", "acme.example.com", "proj-1")
    }

    #[test]
    fn providers_map_to_backends() {
        let registry = in_memory_registry("dev");
        assert_eq!(registry.providers(), ["anthos", "aws", "azure"]);
        for (provider, backend) in [("aws", "scan"), ("anthos", "document-sql"), ("azure", "sql-api")] {
            let journal = journal_for(&registry, provider, &tenant()).expect("journal");
            assert_eq!(journal.backend(), backend);
        }
        assert!(journal_for(&registry, "ibm", &tenant()).is_err());
    }

    #[tokio::test]
    async fn journals_of_one_provider_share_state() {
        let registry = in_memory_registry("dev");
        for provider in [PROVIDER_SCAN, PROVIDER_DOCUMENT_SQL, PROVIDER_SQL_API] {
            let writer = journal_for(&registry, provider, &tenant()).expect("journal");
            let reader = journal_for(&registry, provider, &tenant()).expect("journal");
            let key = writer
                .create_key(&KeySpec::new("seismic-store", Kind::Tenants, "acme"))
                .expect("key");
            writer.save(&Entity::new(key.clone(), Map::new())).await.expect("save");
            assert!(reader.get(&key).await.expect("get").is_some(), "{provider}");
        }
    }
}
