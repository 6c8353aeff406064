//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use seistore_core::tenant::DatasetRef;
use seistore_test_utils::{DatasetFactory, TestContext};

use crate::context::CopyContext;
use crate::job::SubprojectSettings;
use crate::request::CopyRequest;

pub(crate) const PROVIDER: &str = "anthos";

pub(crate) fn copy_context(ctx: &TestContext) -> Arc<CopyContext> {
    Arc::new(CopyContext::new(
        ctx.provider.clone(),
        ctx.namespace.clone(),
        Arc::clone(&ctx.journals),
        Arc::clone(&ctx.storages),
        Arc::clone(&ctx.locker),
    ))
}

pub(crate) fn dataset(ctx: &TestContext, name: &str) -> DatasetRef {
    DatasetFactory::dataset_ref(&ctx.tenant, "/raw/", name)
}

pub(crate) fn copy_request(ctx: &TestContext, from: &str, to: &str) -> CopyRequest {
    CopyRequest {
        tenant: ctx.tenant.clone(),
        from: dataset(ctx, from),
        to: dataset(ctx, to),
        destination_storage: format!("{}/{to}", seistore_test_utils::TEST_BUCKET),
        subproject: SubprojectSettings::default(),
        lock_source: true,
        usermail: "user@example.com".to_string(),
    }
}
