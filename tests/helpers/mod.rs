//! Test helpers and fixtures for the table client tests
//!
//! Every test builds its own [`FakeStore`], so tests run in parallel without
//! sharing state.
#![allow(dead_code)]

pub mod fake_store;
pub mod fixtures;

pub use fake_store::{Call, FakeStore};
pub use fixtures::*;

pub use std::sync::Arc;
pub use std::time::Duration;
pub use vulnscore_table::{
    ClientOptions, Error, Item, ProvisioningPolicy, RetryPolicy, TableClient, TableSchema,
};

/// Options with millisecond polling and retry delays
pub fn fast_options() -> ClientOptions {
    ClientOptions {
        provisioning: fast_provisioning(),
        retry: fast_retry(),
        ..ClientOptions::default()
    }
}

pub fn fast_provisioning() -> ProvisioningPolicy {
    ProvisioningPolicy {
        max_polls: 5,
        interval: Duration::from_millis(1),
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(3)
        .with_delays(Duration::from_millis(1), Duration::from_millis(4))
}

/// Opens a client over a shared fake store
pub async fn open(store: &Arc<FakeStore>, schema: TableSchema) -> TableClient<FakeStore> {
    TableClient::open(Arc::clone(store), schema, fast_options())
        .await
        .expect("table should reconcile")
}
