use aws_sdk_dynamodb::types::AttributeValue;
use std::{collections::HashMap, fmt, time::Duration};

use crate::Error;
use crate::schema::{AttributeDefinition, KeyElement};

/// A stored item: attribute name to value
pub type Item = HashMap<String, AttributeValue>;

/// Opaque pagination token returned by a single page read
///
/// A cursor can only be handed back to the operation that produced it to
/// fetch the next page. It is neither comparable nor ordered.
#[must_use = "cursor should be used for pagination to fetch the next page"]
#[derive(Clone)]
pub struct Cursor(Item);

impl Cursor {
    /// Wraps the store's last evaluated key; `None` when the key is empty
    pub fn from_last_evaluated_key(key: Item) -> Option<Self> {
        if key.is_empty() { None } else { Some(Self(key)) }
    }

    /// The key to send as the exclusive start key of the next request
    pub fn exclusive_start_key(&self) -> &Item {
        &self.0
    }

    /// Consumes the cursor, returning the exclusive start key
    pub fn into_exclusive_start_key(self) -> Item {
        self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.0.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_tuple("Cursor").field(&names).finish()
    }
}

/// One page of a query or scan
#[must_use = "query results should be used or you'll lose the fetched data"]
#[derive(Clone, Debug, Default)]
pub struct Page {
    /// Items in store order
    pub items: Vec<Item>,
    /// Cursor of the next page; `None` on the last page
    pub cursor: Option<Cursor>,
}

impl Page {
    /// Builds a page
    pub fn new(items: Vec<Item>, cursor: Option<Cursor>) -> Self {
        Self { items, cursor }
    }

    /// Whether this is the last page
    pub fn is_last(&self) -> bool {
        self.cursor.is_none()
    }
}

/// Condition or filter expression with its placeholders
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expression {
    text: String,
    names: HashMap<String, String>,
    values: Item,
}

impl Expression {
    /// Raw expression text, placeholders bound separately
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Binds a `#name` placeholder to an attribute name
    pub fn name(mut self, placeholder: impl Into<String>, attribute: impl Into<String>) -> Self {
        let _ = self.names.insert(placeholder.into(), attribute.into());
        self
    }

    /// Binds a `:value` placeholder to a value
    pub fn value(mut self, placeholder: impl Into<String>, value: AttributeValue) -> Self {
        let _ = self.values.insert(placeholder.into(), value);
        self
    }

    /// Expression text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Attribute name placeholders
    pub fn names(&self) -> &HashMap<String, String> {
        &self.names
    }

    /// Value placeholders
    pub fn values(&self) -> &Item {
        &self.values
    }

    pub(crate) fn push_clause(&mut self, clause: &str) {
        if !self.text.is_empty() {
            self.text.push_str(" and ");
        }
        self.text.push_str(clause);
    }
}

/// Key condition, optional filter and optional index of a query
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    /// Key condition expression
    pub key_condition: Expression,
    /// Filter applied after the key condition
    pub filter: Option<Expression>,
    /// Index to query instead of the table
    pub index_name: Option<String>,
}

impl QueryRequest {
    /// Query on the table's primary key
    pub fn new(key_condition: Expression) -> Self {
        Self {
            key_condition,
            filter: None,
            index_name: None,
        }
    }

    /// Adds a filter expression
    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Queries a secondary index
    pub fn on_index(mut self, index_name: impl Into<String>) -> Self {
        self.index_name = Some(index_name.into());
        self
    }
}

/// Lifecycle status of a table
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableStatus {
    /// Being created
    Creating,
    /// Being updated
    Updating,
    /// Being deleted
    Deleting,
    /// Ready for reads and writes
    Active,
    /// Any other status reported by the store
    Other(String),
}

impl TableStatus {
    /// Whether reads and writes are accepted
    pub fn is_active(&self) -> bool {
        matches!(self, TableStatus::Active)
    }
}

/// Secondary index as reported by the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDescription {
    /// Index name
    pub name: String,
    /// Index key schema
    pub key_schema: Vec<KeyElement>,
}

/// Live table as reported by the store
#[derive(Clone, Debug, PartialEq)]
pub struct TableDescription {
    /// Table name
    pub name: String,
    /// Lifecycle status
    pub status: TableStatus,
    /// Key schema
    pub key_schema: Vec<KeyElement>,
    /// Secondary indexes
    pub indexes: Vec<IndexDescription>,
    /// Attribute definitions
    pub attributes: Vec<AttributeDefinition>,
}

impl TableDescription {
    /// Looks up a live index by name
    pub fn index(&self, name: &str) -> Option<&IndexDescription> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Whether the attribute is defined on the live table
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.attribute_name == name)
    }
}

/// Contiguous slice of a bulk write, tagged with its position
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    index: usize,
    items: Vec<Item>,
}

impl Chunk {
    /// Builds a chunk
    pub fn new(index: usize, items: Vec<Item>) -> Self {
        Self { index, items }
    }

    /// Splits items into contiguous chunks of `size`; the last may be smaller
    pub(crate) fn partition(items: Vec<Item>, size: usize) -> Vec<Chunk> {
        let mut chunks = Vec::with_capacity(items.len().div_ceil(size.max(1)));
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            let batch: Vec<Item> = items.by_ref().take(size).collect();
            chunks.push(Chunk::new(chunks.len(), batch));
        }
        chunks
    }

    /// Position of the chunk within its bulk write
    pub fn index(&self) -> usize {
        self.index
    }

    /// Items of the chunk, in input order
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the chunk holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consumes the chunk, returning its items
    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}

/// Retry configuration for batch writes
///
/// A request is attempted once and retried up to `max_retries` times while
/// the store answers with a retryable error or leaves items unprocessed.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Decides which errors are worth retrying
    pub retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Sets the retry bound
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff range
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: usize) -> Duration {
        crate::table::helpers::retry_config::retry_delay(attempt, self.initial_delay, self.max_delay)
    }

    /// Whether the error should be retried
    pub fn should_retry(&self, error: &Error) -> bool {
        (self.retryable)(error)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            retryable: Error::is_retryable,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}
