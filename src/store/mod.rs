//! Wide-column store boundary
//!
//! [`WideColumnStore`] is the small set of table operations the client is
//! built on. [`DynamoDbStore`] implements it over `aws-sdk-dynamodb`; tests
//! and local tooling can supply their own implementation.

mod dynamodb;

pub use dynamodb::DynamoDbStore;

use std::future::Future;

use crate::Error;
use crate::schema::TableSchema;
use crate::table::{Cursor, Item, Page, QueryRequest, ReconciliationPlan, TableDescription};

/// Hard cap on items per `BatchWriteItem` request
pub const BATCH_WRITE_LIMIT: usize = 25;

/// Operations issued against a wide-column store
pub trait WideColumnStore: Send + Sync {
    /// Names of every table visible to the client
    fn list_tables(&self) -> impl Future<Output = Result<Vec<String>, Error>> + Send;

    /// Current status, key schema, indexes and attributes of a table
    fn describe_table(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<TableDescription, Error>> + Send;

    /// Requests creation of a table; returns once the request is accepted
    ///
    /// Fails with [`Error::TableInUse`] when the table is already being created.
    fn create_table(&self, schema: &TableSchema) -> impl Future<Output = Result<(), Error>> + Send;

    /// Adds the plan's index and attribute definitions to a live table
    ///
    /// A plan may create at most one index; see [`ReconciliationPlan::steps`].
    fn update_table(
        &self,
        table: &str,
        plan: &ReconciliationPlan,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Fetches one page of a query
    fn query(
        &self,
        table: &str,
        request: &QueryRequest,
        cursor: Option<Cursor>,
    ) -> impl Future<Output = Result<Page, Error>> + Send;

    /// Fetches one page of a full table scan
    fn scan(
        &self,
        table: &str,
        cursor: Option<Cursor>,
    ) -> impl Future<Output = Result<Page, Error>> + Send;

    /// Writes a single item
    fn put_item(&self, table: &str, item: Item) -> impl Future<Output = Result<(), Error>> + Send;

    /// Writes up to [`max_batch_write_items`](Self::max_batch_write_items) items
    ///
    /// Returns the items the store left unprocessed.
    fn batch_write_item(
        &self,
        table: &str,
        items: &[Item],
    ) -> impl Future<Output = Result<Vec<Item>, Error>> + Send;

    /// Per-request item cap of [`batch_write_item`](Self::batch_write_item)
    fn max_batch_write_items(&self) -> usize {
        BATCH_WRITE_LIMIT
    }
}
