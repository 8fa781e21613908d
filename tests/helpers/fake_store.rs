//! In-process store recording every call
//!
//! Behaves like a single-region DynamoDB for the operations the client uses:
//! tables go through CREATING before ACTIVE, pages are cut at a fixed size and
//! batch writes can be throttled per key.
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use vulnscore_table::store::WideColumnStore;
use vulnscore_table::table::{IndexDescription, ReconciliationPlan, TableDescription, TableStatus};
use vulnscore_table::{AttributeValue, Cursor, Error, Item, Page, QueryRequest, TableSchema};

const OFFSET: &str = "__offset";

/// A recorded store call
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    ListTables,
    DescribeTable(String),
    CreateTable(TableSchema),
    UpdateTable(String, ReconciliationPlan),
    Query(String),
    Scan(String),
    PutItem(String),
    BatchWrite(String, usize),
}

impl Call {
    pub fn is_mutating_schema(&self) -> bool {
        matches!(self, Call::CreateTable(_) | Call::UpdateTable(..))
    }
}

struct FakeTable {
    description: TableDescription,
    creating_polls: usize,
    items: Vec<Item>,
}

impl FakeTable {
    fn key_of(&self, item: &Item) -> Vec<Option<AttributeValue>> {
        self.description
            .key_schema
            .iter()
            .map(|k| item.get(&k.attribute_name).cloned())
            .collect()
    }

    fn upsert(&mut self, item: Item) {
        let key = self.key_of(&item);
        match self.items.iter().position(|i| self.key_of(i) == key) {
            Some(pos) => self.items[pos] = item,
            None => self.items.push(item),
        }
    }
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, FakeTable>,
    calls: Vec<Call>,
    queries: Vec<QueryRequest>,
    page_fetches: usize,
    fail_page: Option<usize>,
    creating_polls: usize,
    create_race: bool,
    throttled_keys: HashSet<String>,
    throttle_errors: usize,
}

/// Recording fake of [`WideColumnStore`]
pub struct FakeStore {
    state: Mutex<State>,
    page_size: usize,
    write_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 100,
            write_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[allow(dead_code)]
impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items per query or scan page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Time every batch write takes
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Describe calls answered with CREATING after a create
    pub fn with_creating_polls(self, polls: usize) -> Self {
        self.state().creating_polls = polls;
        self
    }

    /// Another writer creates the table between list and create
    pub fn with_create_race(self) -> Self {
        self.state().create_race = true;
        self
    }

    /// Page fetch (0-based, across queries and scans) that fails
    pub fn with_failing_page(self, page: usize) -> Self {
        self.state().fail_page = Some(page);
        self
    }

    /// Items whose partition key is `key` are always left unprocessed
    pub fn with_throttled_key(self, key: &str) -> Self {
        let _ = self.state().throttled_keys.insert(key.to_string());
        self
    }

    /// The next `count` batch writes fail with a throttling error
    pub fn with_throttle_errors(self, count: usize) -> Self {
        self.state().throttle_errors = count;
        self
    }

    /// Registers a live table built from `schema`
    pub fn with_table(self, schema: &TableSchema, status: TableStatus) -> Self {
        let mut description = describe(schema);
        description.status = status;
        self.with_description(description)
    }

    /// Registers a live table as described
    pub fn with_description(self, description: TableDescription) -> Self {
        let _ = self.state().tables.insert(
            description.name.clone(),
            FakeTable {
                creating_polls: usize::from(!description.status.is_active()),
                description,
                items: Vec::new(),
            },
        );
        self
    }

    /// Stores items directly, bypassing the call log
    pub fn seed_items(&self, table: &str, items: Vec<Item>) {
        let mut state = self.state();
        let table = state.tables.get_mut(table).expect("table not registered");
        for item in items {
            table.upsert(item);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn schema_mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(Call::is_mutating_schema)
            .collect()
    }

    /// Schemas sent with every create call
    pub fn created_schemas(&self) -> Vec<TableSchema> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateTable(schema) => Some(schema),
                _ => None,
            })
            .collect()
    }

    /// Plans sent with every update call
    pub fn updates(&self) -> Vec<ReconciliationPlan> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UpdateTable(_, plan) => Some(plan),
                _ => None,
            })
            .collect()
    }

    pub fn describe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::DescribeTable(_)))
            .count()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::BatchWrite(_, n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn queries(&self) -> Vec<QueryRequest> {
        self.state().queries.clone()
    }

    pub fn page_fetches(&self) -> usize {
        self.state().page_fetches
    }

    pub fn items(&self, table: &str) -> Vec<Item> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.items.clone())
            .unwrap_or_default()
    }

    pub fn live(&self, table: &str) -> Option<TableDescription> {
        self.state()
            .tables
            .get(table)
            .map(|t| t.description.clone())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake store poisoned")
    }

    fn page(&self, table: &str, cursor: Option<Cursor>, keep: impl Fn(&Item) -> bool) -> Result<Page, Error> {
        let mut state = self.state();
        let fetch = state.page_fetches;
        state.page_fetches += 1;
        if state.fail_page == Some(fetch) {
            return Err(Error::connection(format!("page {fetch} unavailable")));
        }

        let Some(table) = state.tables.get(table) else {
            return Err(Error::InvalidArgument(format!("table '{table}' not found")));
        };
        let matching: Vec<Item> = table.items.iter().filter(|i| keep(i)).cloned().collect();

        let start = cursor
            .and_then(|c| match c.exclusive_start_key().get(OFFSET) {
                Some(AttributeValue::N(n)) => n.parse::<usize>().ok(),
                _ => None,
            })
            .unwrap_or(0);
        let end = (start + self.page_size).min(matching.len());
        let next = (end < matching.len())
            .then(|| Item::from([(OFFSET.to_string(), AttributeValue::N(end.to_string()))]))
            .and_then(Cursor::from_last_evaluated_key);

        Ok(Page::new(matching[start..end].to_vec(), next))
    }
}

/// Live description of a freshly created table
pub fn describe(schema: &TableSchema) -> TableDescription {
    TableDescription {
        name: schema.name.clone(),
        status: TableStatus::Active,
        key_schema: schema.key_schema.clone(),
        indexes: schema
            .indexes
            .iter()
            .map(|i| IndexDescription {
                name: i.index_name.clone(),
                key_schema: i.key_schema.clone(),
            })
            .collect(),
        attributes: schema.attributes.clone(),
    }
}

fn partition_value(item: &Item, table: &FakeTable) -> Option<String> {
    let key = table.description.key_schema.first()?;
    match item.get(&key.attribute_name)? {
        AttributeValue::S(s) => Some(s.clone()),
        AttributeValue::N(n) => Some(n.clone()),
        _ => None,
    }
}

impl WideColumnStore for FakeStore {
    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        let mut state = self.state();
        state.calls.push(Call::ListTables);
        Ok(state.tables.keys().cloned().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<TableDescription, Error> {
        let mut state = self.state();
        state.calls.push(Call::DescribeTable(table.to_string()));
        let Some(table) = state.tables.get_mut(table) else {
            return Err(Error::InvalidArgument(format!("table '{table}' not found")));
        };
        if table.creating_polls > 0 {
            table.creating_polls -= 1;
            let mut description = table.description.clone();
            if description.status.is_active() {
                description.status = TableStatus::Creating;
            }
            return Ok(description);
        }
        table.description.status = TableStatus::Active;
        Ok(table.description.clone())
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::CreateTable(schema.clone()));
        if state.tables.contains_key(&schema.name) {
            return Err(Error::TableInUse(schema.name.clone()));
        }
        let creating_polls = state.creating_polls;
        let _ = state.tables.insert(
            schema.name.clone(),
            FakeTable {
                description: describe(schema),
                creating_polls,
                items: Vec::new(),
            },
        );
        if state.create_race {
            return Err(Error::TableInUse(schema.name.clone()));
        }
        Ok(())
    }

    async fn update_table(&self, table: &str, plan: &ReconciliationPlan) -> Result<(), Error> {
        let mut state = self.state();
        state
            .calls
            .push(Call::UpdateTable(table.to_string(), plan.clone()));
        let Some(live) = state.tables.get_mut(table) else {
            return Err(Error::InvalidArgument(format!("table '{table}' not found")));
        };
        for attribute in &plan.attribute_definitions {
            if !live.description.has_attribute(&attribute.attribute_name) {
                live.description.attributes.push(attribute.clone());
            }
        }
        for index in &plan.indexes_to_create {
            live.description.indexes.push(IndexDescription {
                name: index.index_name.clone(),
                key_schema: index.key_schema.clone(),
            });
        }
        Ok(())
    }

    async fn query(&self, table: &str, request: &QueryRequest, cursor: Option<Cursor>) -> Result<Page, Error> {
        {
            let mut state = self.state();
            state.calls.push(Call::Query(table.to_string()));
            state.queries.push(request.clone());
        }
        let condition = &request.key_condition;
        let attribute = condition.names().get("#hash_key").cloned();
        let value = condition.values().get(":hash_value").cloned();
        self.page(table, cursor, |item| match (&attribute, &value) {
            (Some(attribute), Some(value)) => item.get(attribute) == Some(value),
            _ => true,
        })
    }

    async fn scan(&self, table: &str, cursor: Option<Cursor>) -> Result<Page, Error> {
        self.state().calls.push(Call::Scan(table.to_string()));
        self.page(table, cursor, |_| true)
    }

    async fn put_item(&self, table: &str, item: Item) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.push(Call::PutItem(table.to_string()));
        let Some(live) = state.tables.get_mut(table) else {
            return Err(Error::InvalidArgument(format!("table '{table}' not found")));
        };
        live.upsert(item);
        Ok(())
    }

    async fn batch_write_item(&self, table: &str, items: &[Item]) -> Result<Vec<Item>, Error> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }

        let result = {
            let mut state = self.state();
            state.calls.push(Call::BatchWrite(table.to_string(), items.len()));
            if state.throttle_errors > 0 {
                state.throttle_errors -= 1;
                Err(Error::throttling("BatchWriteItem", "rate exceeded"))
            } else {
                let throttled = state.throttled_keys.clone();
                match state.tables.get_mut(table) {
                    None => Err(Error::InvalidArgument(format!("table '{table}' not found"))),
                    Some(live) => {
                        let mut unprocessed = Vec::new();
                        for item in items {
                            let held = partition_value(item, live).is_some_and(|k| throttled.contains(&k));
                            if held {
                                unprocessed.push(item.clone());
                            } else {
                                live.upsert(item.clone());
                            }
                        }
                        Ok(unprocessed)
                    }
                }
            }
        };

        let _ = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
