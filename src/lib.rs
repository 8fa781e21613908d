//! # Vulnerability Score Table Client
//!
//! Typed access to the wide-column tables that hold vulnerability scoring
//! data (EPSS records and friends), backed by DynamoDB:
//! - Declarative table schemas, reconciled against the live table on open
//! - Lazy, cursor-driven pagination over queries and scans
//! - Chunked bulk writes with bounded concurrency and retry with backoff
//! - Partial failure reporting that keeps unwritten chunks for re-submission
//!
//! ## Features
//!
//! - **Non-destructive**: reconciliation only ever adds tables, indexes and attribute definitions
//! - **Async-first**: built on `tokio` and `aws-sdk-dynamodb`
//! - **Type-safe**: records go through `serde_dynamo`
//! - **Testable**: every store call goes through the [`WideColumnStore`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures_util::TryStreamExt;
//! use serde::{Deserialize, Serialize};
//! use vulnscore_table::{
//!     AttributeValue, ClientOptions, Error, KeyConditionBuilder, QueryRequest, ScalarType, SecondaryIndex,
//!     StoreConfig, TableClient, TableSchema,
//! };
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct EpssRecord {
//!     cve: String,
//!     date: String,
//!     percentile: f64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let schema = TableSchema::new("epss", "cve", ScalarType::String)
//!         .with_sort_key("date", ScalarType::String)
//!         .with_attribute("percentile", ScalarType::Number)
//!         .with_index(SecondaryIndex::new("by-percentile", "percentile"));
//!
//!     let config = StoreConfig::new("us-east-1");
//!     let table = TableClient::connect(&config, schema, ClientOptions::default()).await?;
//!
//!     let records = vec![EpssRecord {
//!         cve: "CVE-2024-0001".into(),
//!         date: "2024-05-01".into(),
//!         percentile: 0.97,
//!     }];
//!     let output = table.bulk_put_records(&records, 1000, 10).await?;
//!     println!("wrote {} items", output.items_written());
//!
//!     let condition = KeyConditionBuilder::partition_key("cve", AttributeValue::S("CVE-2024-0001".into()))
//!         .build();
//!     let history: Vec<EpssRecord> = table
//!         .query_all_as(QueryRequest::new(condition))
//!         .try_collect()
//!         .await?;
//!     println!("{} scores", history.len());
//!
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    deprecated,
    unknown_lints,
    unreachable_code,
    unused_mut
)]
#![warn(unused, unreachable_pub, unused_qualifications, unused_results)]

mod error;
pub use error::{BoxError, Error, FailedChunk, PartialWriteError};

/// Connection settings and SDK configuration
pub mod config;

/// Declarative table schemas
pub mod schema;

/// Store boundary and the DynamoDB implementation
pub mod store;

/// Table client, reconciliation, pagination and bulk writes
pub mod table;

pub use config::{ServiceSettings, StaticCredentials, StoreConfig, load_sdk_config};
pub use schema::{
    AttributeDefinition, BillingMode, Encryption, KeyElement, KeyRole, Projection,
    ProjectionType, ScalarType, SchemaDocument, SecondaryIndex, TableSchema, Tag, Throughput,
};
pub use store::{DynamoDbStore, WideColumnStore};
pub use table::{
    BulkPutOptions, BulkPutOutput, ClientOptions, Cursor, Expression, Item, KeyConditionBuilder, Page,
    ProvisioningPolicy, QueryRequest, ReadyTable, ReconcileMode, RetryPolicy, SchemaReconciler,
    TableClient,
};

// Re-export aws-config types for configuration
pub use aws_config::{BehaviorVersion, Region, SdkConfig};

// Re-export the attribute value type items are built from
pub use aws_sdk_dynamodb::types::AttributeValue;
