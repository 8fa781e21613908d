mod batch;
mod helpers;
mod paginate;
mod reconcile;
mod types;

pub use batch::{
    BulkPutOptions, BulkPutOutput, ChunkSummary, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, bulk_put,
};
pub use helpers::expressions::KeyConditionBuilder;
pub use paginate::{items, pages, query_all, scan_all};
pub use reconcile::{
    ProvisioningPolicy, ReadyTable, ReconcileMode, ReconciliationPlan, SchemaReconciler,
};
pub use types::{
    Chunk, Cursor, Expression, IndexDescription, Item, Page, QueryRequest, RetryPolicy,
    TableDescription, TableStatus,
};

use futures_util::{Stream, TryStreamExt};
use serde::{Serialize, de::DeserializeOwned};
use serde_dynamo::{from_item, to_item};
use std::sync::Arc;

use crate::Error;
use crate::config::ServiceSettings;
use crate::schema::TableSchema;
use crate::store::{DynamoDbStore, WideColumnStore};

/// Options of a [`TableClient`]
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Bound on the wait for a new table to become active
    pub provisioning: ProvisioningPolicy,
    /// How much of the schema to enforce on an existing table
    pub mode: ReconcileMode,
    /// Retry policy of batch writes
    pub retry: RetryPolicy,
}

/// Item store over one reconciled table
///
/// Construction reconciles the declared schema, so every client refers to a
/// table that exists and carries the declared indexes. All operations share
/// the one store connection the client owns.
#[derive(Debug)]
pub struct TableClient<S = DynamoDbStore> {
    store: Arc<S>,
    schema: TableSchema,
    ready: ReadyTable,
    retry: RetryPolicy,
}

impl TableClient<DynamoDbStore> {
    /// Connects to DynamoDB and reconciles the schema
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use vulnscore_table::{ClientOptions, ScalarType, StoreConfig, TableClient, TableSchema};
    ///
    /// # async fn example() -> Result<(), vulnscore_table::Error> {
    /// let schema = TableSchema::new("epss", "cve", ScalarType::String);
    /// let client = TableClient::connect(
    ///     &StoreConfig::new("us-east-1"),
    ///     schema,
    ///     ClientOptions::default(),
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(
        settings: &impl ServiceSettings,
        schema: TableSchema,
        options: ClientOptions,
    ) -> Result<Self, Error> {
        let store = DynamoDbStore::connect(settings).await?;
        Self::open(Arc::new(store), schema, options).await
    }
}

impl<S: WideColumnStore> TableClient<S> {
    /// Reconciles the schema against `store` and returns a client for the table
    pub async fn open(store: Arc<S>, schema: TableSchema, options: ClientOptions) -> Result<Self, Error> {
        let ready = SchemaReconciler::new(store.as_ref())
            .with_policy(options.provisioning)
            .with_mode(options.mode)
            .ensure(&schema)
            .await?;

        Ok(Self {
            store,
            schema,
            ready,
            retry: options.retry,
        })
    }

    /// Table name
    pub fn name(&self) -> &str {
        self.ready.name()
    }

    /// Declared schema
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Reconciliation outcome
    pub fn ready(&self) -> &ReadyTable {
        &self.ready
    }

    /// Shared store connection
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Writes a single item
    pub async fn put(&self, item: Item) -> Result<(), Error> {
        batch::check_item(&self.schema, &item)
            .map_err(|reason| Error::InvalidItem { index: 0, reason })?;
        self.store.put_item(self.name(), item).await
    }

    /// Serializes and writes a single record
    pub async fn put_record<T: Serialize>(&self, record: &T) -> Result<(), Error> {
        let item = to_item::<_, Item>(record)?;
        self.put(item).await
    }

    /// Writes one chunk of items through a buffering writer, without fan-out
    pub async fn put_chunk(&self, items: Vec<Item>) -> Result<ChunkSummary, Error> {
        batch::check_items(&self.schema, &items)?;
        let chunk = Chunk::new(0, items);
        batch::write_chunk(self.store.as_ref(), self.name(), &chunk, &self.retry).await
    }

    /// Writes items in chunks of `batch_size`, at most `max_concurrency` at a time
    ///
    /// See [`bulk_put`] for the partial failure contract.
    pub async fn bulk_put(
        &self,
        items: Vec<Item>,
        batch_size: usize,
        max_concurrency: usize,
    ) -> Result<BulkPutOutput, Error> {
        let options =
            BulkPutOptions::new(batch_size, max_concurrency).with_retry(self.retry.clone());
        self.bulk_put_with(items, &options).await
    }

    /// Writes items in chunks with explicit options
    pub async fn bulk_put_with(
        &self,
        items: Vec<Item>,
        options: &BulkPutOptions,
    ) -> Result<BulkPutOutput, Error> {
        batch::check_items(&self.schema, &items)?;
        bulk_put(self.store.as_ref(), self.name(), items, options).await
    }

    /// Serializes records and writes them in chunks
    pub async fn bulk_put_records<T: Serialize>(
        &self,
        records: &[T],
        batch_size: usize,
        max_concurrency: usize,
    ) -> Result<BulkPutOutput, Error> {
        let items = records
            .iter()
            .map(to_item::<_, Item>)
            .collect::<Result<Vec<_>, _>>()?;
        self.bulk_put(items, batch_size, max_concurrency).await
    }

    /// Fetches one page of a query
    pub async fn query_page(&self, request: &QueryRequest, cursor: Option<Cursor>) -> Result<Page, Error> {
        self.store.query(self.name(), request, cursor).await
    }

    /// Fetches one page of a scan
    pub async fn scan_page(&self, cursor: Option<Cursor>) -> Result<Page, Error> {
        self.store.scan(self.name(), cursor).await
    }

    /// Every item matching the query, lazily, in store order
    pub fn query_all(&self, request: QueryRequest) -> impl Stream<Item = Result<Item, Error>> + '_ {
        query_all(self.store.as_ref(), self.name(), request)
    }

    /// Every record matching the query, deserialized
    pub fn query_all_as<T: DeserializeOwned>(
        &self,
        request: QueryRequest,
    ) -> impl Stream<Item = Result<T, Error>> + '_ {
        self.query_all(request)
            .and_then(|item| async { from_item(item).map_err(Into::into) })
    }

    /// Every item of the table, lazily, in store order
    pub fn scan_all(&self) -> impl Stream<Item = Result<Item, Error>> + '_ {
        scan_all(self.store.as_ref(), self.name())
    }

    /// Every record of the table, deserialized
    pub fn scan_all_as<T: DeserializeOwned>(&self) -> impl Stream<Item = Result<T, Error>> + '_ {
        self.scan_all()
            .and_then(|item| async { from_item(item).map_err(Into::into) })
    }
}
