//! Schema reconciliation
//!
//! Brings a live table in line with a declared [`TableSchema`] without ever
//! removing anything: absent tables are created, missing indexes and attribute
//! definitions are added, and everything else is left alone.
//!
//! ```text
//! ABSENT -> CREATING -> ACTIVE (polled) -> RECONCILED
//! ```

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::Error;
use crate::schema::{AttributeDefinition, KeyElement, SecondaryIndex, TableSchema};
use crate::store::WideColumnStore;
use crate::table::types::TableDescription;

/// Bounds the wait for a table to become active
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProvisioningPolicy {
    /// Maximum number of status polls
    pub max_polls: u32,
    /// Sleep before each poll
    pub interval: Duration,
}

impl Default for ProvisioningPolicy {
    fn default() -> Self {
        Self {
            max_polls: 60,
            interval: Duration::from_secs(5),
        }
    }
}

/// How much of the declared schema to enforce on an existing table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Create if absent, then add missing indexes and attributes
    #[default]
    Full,
    /// Create if absent; never update an existing table
    CreateOnly,
}

/// Additions needed to bring a live table up to the declared schema
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Declared indexes missing from the live table
    pub indexes_to_create: Vec<SecondaryIndex>,
    /// Declared attribute definitions missing from the live table
    pub attributes_to_add: Vec<AttributeDefinition>,
    /// Definitions sent with the update: the full declared set when indexes
    /// are created, otherwise only the missing ones
    pub attribute_definitions: Vec<AttributeDefinition>,
}

impl ReconciliationPlan {
    /// Diffs the declared schema against the live table
    pub fn compute(desired: &TableSchema, live: &TableDescription) -> Self {
        let indexes_to_create: Vec<SecondaryIndex> = desired
            .indexes
            .iter()
            .filter(|index| match live.index(&index.index_name) {
                Some(existing) => {
                    if existing.key_schema != index.key_schema {
                        warn!(
                            table = %desired.name,
                            index = %index.index_name,
                            "live index key schema differs from declaration, leaving it untouched"
                        );
                    }
                    false
                }
                None => true,
            })
            .map(|index| SecondaryIndex {
                provisioned_throughput: desired.index_throughput(index),
                ..index.clone()
            })
            .collect();

        let attributes_to_add: Vec<AttributeDefinition> = desired
            .attributes
            .iter()
            .filter(|attribute| !live.has_attribute(&attribute.attribute_name))
            .cloned()
            .collect();

        let attribute_definitions = if indexes_to_create.is_empty() {
            attributes_to_add.clone()
        } else {
            desired.attributes.clone()
        };

        Self {
            indexes_to_create,
            attributes_to_add,
            attribute_definitions,
        }
    }

    /// Whether the live table already matches
    pub fn is_empty(&self) -> bool {
        self.indexes_to_create.is_empty() && self.attributes_to_add.is_empty()
    }

    /// Splits the plan into updates that each create at most one index
    ///
    /// Every step carries the declared definitions of the key attributes in
    /// use once it is applied: the table key, the live indexes, the indexes of
    /// earlier steps and its own.
    pub fn steps(&self, desired: &TableSchema, live: &TableDescription) -> Vec<ReconciliationPlan> {
        if self.indexes_to_create.is_empty() {
            return vec![self.clone()];
        }

        let mut in_use: HashSet<&str> = desired
            .key_schema
            .iter()
            .chain(live.indexes.iter().flat_map(|i| i.key_schema.iter()))
            .map(|k| k.attribute_name.as_str())
            .collect();
        let mut added = HashSet::new();

        let mut steps = Vec::with_capacity(self.indexes_to_create.len());
        for index in &self.indexes_to_create {
            in_use.extend(index.key_schema.iter().map(|k| k.attribute_name.as_str()));
            let attribute_definitions = desired
                .attributes
                .iter()
                .filter(|a| in_use.contains(a.attribute_name.as_str()))
                .cloned()
                .collect();
            let attributes_to_add = self
                .attributes_to_add
                .iter()
                .filter(|a| {
                    in_use.contains(a.attribute_name.as_str())
                        && added.insert(a.attribute_name.as_str())
                })
                .cloned()
                .collect();
            steps.push(ReconciliationPlan {
                indexes_to_create: vec![index.clone()],
                attributes_to_add,
                attribute_definitions,
            });
        }
        steps
    }

    /// Names of the indexes the plan creates
    pub fn index_names(&self) -> Vec<&str> {
        self.indexes_to_create
            .iter()
            .map(|index| index.index_name.as_str())
            .collect()
    }
}

/// Proof that a table reached the reconciled state
#[must_use = "a ready table is required to open a table client"]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyTable {
    name: String,
    created: bool,
    applied: Option<ReconciliationPlan>,
}

impl ReadyTable {
    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this call created the table
    pub fn created(&self) -> bool {
        self.created
    }

    /// Update applied to an existing table, if any
    pub fn applied_plan(&self) -> Option<&ReconciliationPlan> {
        self.applied.as_ref()
    }
}

/// Reconciles declared schemas against a store
#[derive(Debug)]
pub struct SchemaReconciler<'a, S> {
    store: &'a S,
    policy: ProvisioningPolicy,
    mode: ReconcileMode,
}

impl<'a, S: WideColumnStore> SchemaReconciler<'a, S> {
    /// Reconciler with the default polling bound and full reconciliation
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            policy: ProvisioningPolicy::default(),
            mode: ReconcileMode::default(),
        }
    }

    /// Sets the polling bound
    pub fn with_policy(mut self, policy: ProvisioningPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the reconcile mode
    pub fn with_mode(mut self, mode: ReconcileMode) -> Self {
        self.mode = mode;
        self
    }

    /// Ensures the table exists and carries every declared index and attribute
    ///
    /// Calling it again on a reconciled table issues no mutating request.
    #[tracing::instrument(skip(self, schema), fields(table = %schema.name))]
    pub async fn ensure(&self, schema: &TableSchema) -> Result<ReadyTable, Error> {
        schema.validate()?;

        let tables = self.store.list_tables().await?;
        let created = !tables.iter().any(|name| name == &schema.name);

        let live = if created {
            info!("table absent, creating");
            match self.store.create_table(schema).await {
                Ok(()) => {}
                Err(Error::TableInUse(_)) => debug!("table created concurrently, waiting for it"),
                Err(e) => return Err(e),
            }
            self.wait_until_active(&schema.name).await?
        } else {
            let live = self.store.describe_table(&schema.name).await?;
            if live.status.is_active() {
                live
            } else {
                debug!(status = ?live.status, "table not active yet");
                self.wait_until_active(&schema.name).await?
            }
        };

        check_key_schema(schema, &live)?;

        if self.mode == ReconcileMode::CreateOnly {
            return Ok(ReadyTable {
                name: schema.name.clone(),
                created,
                applied: None,
            });
        }

        let plan = ReconciliationPlan::compute(schema, &live);
        let applied = if plan.is_empty() {
            debug!("table up to date");
            None
        } else {
            info!(
                indexes = ?plan.index_names(),
                attributes = plan.attributes_to_add.len(),
                "updating table"
            );
            for (n, step) in plan.steps(schema, &live).iter().enumerate() {
                if n > 0 {
                    let _ = self.wait_until_active(&schema.name).await?;
                }
                self.store.update_table(&schema.name, step).await?;
            }
            Some(plan)
        };

        Ok(ReadyTable {
            name: schema.name.clone(),
            created,
            applied,
        })
    }

    async fn wait_until_active(&self, table: &str) -> Result<TableDescription, Error> {
        for poll in 1..=self.policy.max_polls {
            sleep(self.policy.interval).await;
            let description = self.store.describe_table(table).await?;
            if description.status.is_active() {
                info!(polls = poll, "table active");
                return Ok(description);
            }
            debug!(poll, status = ?description.status, "waiting for table");
        }

        Err(Error::ProvisioningTimeout {
            table: table.to_string(),
            polls: self.policy.max_polls,
        })
    }
}

/// Key schemas are immutable once created; a mismatch cannot be repaired
fn check_key_schema(desired: &TableSchema, live: &TableDescription) -> Result<(), Error> {
    let conflict = || Error::SchemaConflict {
        table: desired.name.clone(),
        expected: desired.key_schema.clone(),
        live: live.key_schema.clone(),
    };

    if desired.key_schema != live.key_schema {
        return Err(conflict());
    }

    for KeyElement { attribute_name, .. } in &desired.key_schema {
        let live_type = live
            .attributes
            .iter()
            .find(|a| &a.attribute_name == attribute_name)
            .map(|a| a.attribute_type);
        if live_type.is_some() && live_type != desired.attribute_type(attribute_name) {
            return Err(conflict());
        }
    }

    Ok(())
}
