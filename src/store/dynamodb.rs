use aws_config::SdkConfig;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::operation::create_table::CreateTableError;
use aws_sdk_dynamodb::operation::create_table::builders::CreateTableFluentBuilder;
use aws_sdk_dynamodb::operation::update_table::builders::UpdateTableFluentBuilder;
use aws_sdk_dynamodb::types::{
    AttributeDefinition as SdkAttributeDefinition, BillingMode as SdkBillingMode,
    CreateGlobalSecondaryIndexAction, GlobalSecondaryIndex, GlobalSecondaryIndexUpdate,
    KeySchemaElement, KeyType, Projection as SdkProjection, ProjectionType as SdkProjectionType,
    ProvisionedThroughput, PutRequest, ScalarAttributeType, SseSpecification, SseType,
    Tag as SdkTag, TableStatus as SdkTableStatus, WriteRequest,
};
use aws_smithy_types_convert::stream::PaginationStreamExt;
use futures_util::TryStreamExt;
use std::fmt;

use crate::Error;
use crate::config::{ServiceSettings, load_sdk_config};
use crate::schema::{
    AttributeDefinition, BillingMode, KeyElement, KeyRole, Projection, ProjectionType, ScalarType,
    SecondaryIndex, TableSchema, Throughput,
};
use crate::store::WideColumnStore;
use crate::table::{
    Cursor, IndexDescription, Item, Page, QueryRequest, ReconciliationPlan, TableDescription,
    TableStatus,
};

/// [`WideColumnStore`] backed by Amazon DynamoDB
#[derive(Clone)]
pub struct DynamoDbStore {
    client: Client,
}

impl fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamoDbStore").finish_non_exhaustive()
    }
}

impl DynamoDbStore {
    /// Builds the SDK config from the settings and connects
    ///
    /// Fails with [`Error::Connection`] when no region can be resolved.
    pub async fn connect(settings: &impl ServiceSettings) -> Result<Self, Error> {
        let config = load_sdk_config(settings).await;
        Self::new(&config)
    }

    /// Connects with an already loaded SDK config
    pub fn new(config: &SdkConfig) -> Result<Self, Error> {
        if config.region().is_none() {
            return Err(Error::connection(
                "no AWS region configured; set it in the settings or AWS_REGION",
            ));
        }
        Ok(Self::from_client(Client::new(config)))
    }

    /// Wraps an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Underlying SDK client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// CreateTable request carrying the whole declared schema
    fn create_table_request(&self, schema: &TableSchema) -> Result<CreateTableFluentBuilder, Error> {
        let mut builder = self
            .client
            .create_table()
            .table_name(&schema.name)
            .set_key_schema(Some(
                schema
                    .key_schema
                    .iter()
                    .map(key_schema_element)
                    .collect::<Result<Vec<_>, _>>()?,
            ))
            .set_attribute_definitions(Some(
                schema
                    .attributes
                    .iter()
                    .map(attribute_definition)
                    .collect::<Result<Vec<_>, _>>()?,
            ));

        builder = match schema.billing {
            BillingMode::Provisioned(capacity) => builder
                .billing_mode(SdkBillingMode::Provisioned)
                .provisioned_throughput(throughput(capacity)?),
            BillingMode::OnDemand => builder.billing_mode(SdkBillingMode::PayPerRequest),
        };

        for index in &schema.indexes {
            builder = builder
                .global_secondary_indexes(global_secondary_index(index, schema.index_throughput(index))?);
        }

        if let Some(encryption) = &schema.encryption {
            builder = builder.sse_specification(
                SseSpecification::builder()
                    .enabled(encryption.enabled)
                    .set_sse_type(encryption.sse_type.as_deref().map(SseType::from))
                    .set_kms_master_key_id(encryption.kms_master_key_id.clone())
                    .build(),
            );
        }

        for tag in &schema.tags {
            builder = builder.tags(SdkTag::builder().key(&tag.key).value(&tag.value).build()?);
        }

        Ok(builder)
    }

    /// UpdateTable request; the store accepts at most one index creation per request
    fn update_table_request(
        &self,
        table: &str,
        plan: &ReconciliationPlan,
    ) -> Result<UpdateTableFluentBuilder, Error> {
        if plan.indexes_to_create.len() > 1 {
            return Err(Error::InvalidArgument(format!(
                "an update of '{table}' can create one index, got {}",
                plan.indexes_to_create.len()
            )));
        }

        let updates = plan
            .indexes_to_create
            .iter()
            .map(create_index_action)
            .collect::<Result<Vec<_>, _>>()?;
        let definitions = plan
            .attribute_definitions
            .iter()
            .map(attribute_definition)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(self
            .client
            .update_table()
            .table_name(table)
            .set_attribute_definitions((!definitions.is_empty()).then_some(definitions))
            .set_global_secondary_index_updates((!updates.is_empty()).then_some(updates)))
    }
}

fn key_schema_element(key: &KeyElement) -> Result<KeySchemaElement, Error> {
    let key_type = match key.key_type {
        KeyRole::Partition => KeyType::Hash,
        KeyRole::Sort => KeyType::Range,
    };
    Ok(KeySchemaElement::builder()
        .attribute_name(&key.attribute_name)
        .key_type(key_type)
        .build()?)
}

fn key_element(key: &KeySchemaElement) -> KeyElement {
    let key_type = match key.key_type() {
        KeyType::Range => KeyRole::Sort,
        _ => KeyRole::Partition,
    };
    KeyElement {
        attribute_name: key.attribute_name().to_string(),
        key_type,
    }
}

fn attribute_definition(attribute: &AttributeDefinition) -> Result<SdkAttributeDefinition, Error> {
    let attribute_type = match attribute.attribute_type {
        ScalarType::String => ScalarAttributeType::S,
        ScalarType::Number => ScalarAttributeType::N,
        ScalarType::Binary => ScalarAttributeType::B,
    };
    Ok(SdkAttributeDefinition::builder()
        .attribute_name(&attribute.attribute_name)
        .attribute_type(attribute_type)
        .build()?)
}

fn live_attribute(attribute: &SdkAttributeDefinition) -> Option<AttributeDefinition> {
    let attribute_type = match attribute.attribute_type() {
        ScalarAttributeType::S => ScalarType::String,
        ScalarAttributeType::N => ScalarType::Number,
        ScalarAttributeType::B => ScalarType::Binary,
        _ => return None,
    };
    Some(AttributeDefinition::new(
        attribute.attribute_name(),
        attribute_type,
    ))
}

fn throughput(throughput: Throughput) -> Result<ProvisionedThroughput, Error> {
    Ok(ProvisionedThroughput::builder()
        .read_capacity_units(throughput.read_capacity_units)
        .write_capacity_units(throughput.write_capacity_units)
        .build()?)
}

fn projection(projection: &Projection) -> SdkProjection {
    let projection_type = match projection.projection_type {
        ProjectionType::All => SdkProjectionType::All,
        ProjectionType::KeysOnly => SdkProjectionType::KeysOnly,
        ProjectionType::Include => SdkProjectionType::Include,
    };
    SdkProjection::builder()
        .projection_type(projection_type)
        .set_non_key_attributes(
            (!projection.non_key_attributes.is_empty())
                .then(|| projection.non_key_attributes.clone()),
        )
        .build()
}

fn global_secondary_index(
    index: &SecondaryIndex,
    capacity: Option<Throughput>,
) -> Result<GlobalSecondaryIndex, Error> {
    Ok(GlobalSecondaryIndex::builder()
        .index_name(&index.index_name)
        .set_key_schema(Some(
            index
                .key_schema
                .iter()
                .map(key_schema_element)
                .collect::<Result<Vec<_>, _>>()?,
        ))
        .projection(projection(&index.projection))
        .set_provisioned_throughput(capacity.map(throughput).transpose()?)
        .build()?)
}

fn create_index_action(index: &SecondaryIndex) -> Result<GlobalSecondaryIndexUpdate, Error> {
    let action = CreateGlobalSecondaryIndexAction::builder()
        .index_name(&index.index_name)
        .set_key_schema(Some(
            index
                .key_schema
                .iter()
                .map(key_schema_element)
                .collect::<Result<Vec<_>, _>>()?,
        ))
        .projection(projection(&index.projection))
        .set_provisioned_throughput(index.provisioned_throughput.map(throughput).transpose()?)
        .build()?;
    Ok(GlobalSecondaryIndexUpdate::builder().create(action).build())
}

fn table_status(status: Option<&SdkTableStatus>) -> TableStatus {
    match status {
        Some(SdkTableStatus::Active) => TableStatus::Active,
        Some(SdkTableStatus::Creating) => TableStatus::Creating,
        Some(SdkTableStatus::Updating) => TableStatus::Updating,
        Some(SdkTableStatus::Deleting) => TableStatus::Deleting,
        Some(other) => TableStatus::Other(other.as_str().to_string()),
        None => TableStatus::Other("UNKNOWN".to_string()),
    }
}

impl WideColumnStore for DynamoDbStore {
    #[tracing::instrument(skip(self))]
    async fn list_tables(&self) -> Result<Vec<String>, Error> {
        self.client
            .list_tables()
            .into_paginator()
            .items()
            .send()
            .into_stream_03x()
            .map_err(|e| Error::from_sdk("ListTables", e))
            .try_collect()
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn describe_table(&self, table: &str) -> Result<TableDescription, Error> {
        let output = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| Error::from_sdk("DescribeTable", e))?;

        let Some(description) = output.table() else {
            return Err(Error::connection(format!(
                "DescribeTable returned no description for '{table}'"
            )));
        };

        Ok(TableDescription {
            name: description.table_name().unwrap_or(table).to_string(),
            status: table_status(description.table_status()),
            key_schema: description.key_schema().iter().map(key_element).collect(),
            indexes: description
                .global_secondary_indexes()
                .iter()
                .map(|index| IndexDescription {
                    name: index.index_name().unwrap_or_default().to_string(),
                    key_schema: index.key_schema().iter().map(key_element).collect(),
                })
                .collect(),
            attributes: description
                .attribute_definitions()
                .iter()
                .filter_map(live_attribute)
                .collect(),
        })
    }

    #[tracing::instrument(skip(self, schema), fields(table = %schema.name))]
    async fn create_table(&self, schema: &TableSchema) -> Result<(), Error> {
        match self.create_table_request(schema)?.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(CreateTableError::ResourceInUseException(_)) = e.as_service_error() {
                    return Err(Error::TableInUse(schema.name.clone()));
                }
                Err(Error::from_sdk("CreateTable", e))
            }
        }
    }

    #[tracing::instrument(skip(self, plan), fields(indexes = ?plan.index_names()))]
    async fn update_table(&self, table: &str, plan: &ReconciliationPlan) -> Result<(), Error> {
        let _ = self
            .update_table_request(table, plan)?
            .send()
            .await
            .map_err(|e| Error::from_sdk("UpdateTable", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request, cursor), fields(index = ?request.index_name))]
    async fn query(
        &self,
        table: &str,
        request: &QueryRequest,
        cursor: Option<Cursor>,
    ) -> Result<Page, Error> {
        let mut builder = self
            .client
            .query()
            .table_name(table)
            .set_index_name(request.index_name.clone())
            .key_condition_expression(request.key_condition.text())
            .set_exclusive_start_key(cursor.map(Cursor::into_exclusive_start_key));

        let filter = request.filter.as_ref();
        if let Some(filter) = filter {
            builder = builder.filter_expression(filter.text());
        }

        let expressions = std::iter::once(&request.key_condition).chain(filter);
        for expression in expressions {
            for (placeholder, name) in expression.names() {
                builder = builder.expression_attribute_names(placeholder, name);
            }
            for (placeholder, value) in expression.values() {
                builder = builder.expression_attribute_values(placeholder, value.clone());
            }
        }

        let output = builder
            .send()
            .await
            .map_err(|e| Error::from_sdk("Query", e))?;

        Ok(Page::new(
            output.items.unwrap_or_default(),
            output
                .last_evaluated_key
                .and_then(Cursor::from_last_evaluated_key),
        ))
    }

    #[tracing::instrument(skip(self, cursor))]
    async fn scan(&self, table: &str, cursor: Option<Cursor>) -> Result<Page, Error> {
        let output = self
            .client
            .scan()
            .table_name(table)
            .set_exclusive_start_key(cursor.map(Cursor::into_exclusive_start_key))
            .send()
            .await
            .map_err(|e| Error::from_sdk("Scan", e))?;

        Ok(Page::new(
            output.items.unwrap_or_default(),
            output
                .last_evaluated_key
                .and_then(Cursor::from_last_evaluated_key),
        ))
    }

    #[tracing::instrument(skip(self, item))]
    async fn put_item(&self, table: &str, item: Item) -> Result<(), Error> {
        let _ = self
            .client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| Error::from_sdk("PutItem", e))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    async fn batch_write_item(&self, table: &str, items: &[Item]) -> Result<Vec<Item>, Error> {
        let mut write_ops: Vec<WriteRequest> = Vec::with_capacity(items.len());
        for item in items {
            let put_request = PutRequest::builder().set_item(Some(item.clone())).build()?;
            write_ops.push(
                WriteRequest::builder()
                    .set_put_request(Some(put_request))
                    .build(),
            );
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(table, write_ops)
            .send()
            .await
            .map_err(|e| Error::from_sdk("BatchWriteItem", e))?;

        let unprocessed = output
            .unprocessed_items
            .and_then(|mut tables| tables.remove(table))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|request| request.put_request.map(|put| put.item))
            .collect();

        Ok(unprocessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDocument;
    use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials, Region};

    fn store() -> DynamoDbStore {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("akid", "secret", None, None, "test"))
            .build();
        DynamoDbStore::from_client(Client::from_conf(config))
    }

    fn provisioned_document() -> SchemaDocument {
        serde_json::from_str(
            r#"{
              "general": {
                "provisionedThroughput": { "ReadCapacityUnits": 10, "WriteCapacityUnits": 5 },
                "sseSpecification": { "Enabled": true, "SSEType": "KMS", "KMSMasterKeyId": "alias/scores" },
                "tags": [{ "Key": "service", "Value": "vulnscore" }]
              },
              "tables": {
                "epss": {
                  "keySchema": [
                    { "AttributeName": "cve", "KeyType": "HASH" },
                    { "AttributeName": "date", "KeyType": "RANGE" }
                  ],
                  "attributeDefinitions": [
                    { "AttributeName": "cve", "AttributeType": "S" },
                    { "AttributeName": "date", "AttributeType": "S" },
                    { "AttributeName": "percentile", "AttributeType": "N" }
                  ],
                  "globalSecondaryIndexes": [
                    {
                      "IndexName": "by-percentile",
                      "KeySchema": [{ "AttributeName": "percentile", "KeyType": "HASH" }],
                      "Projection": { "ProjectionType": "INCLUDE", "NonKeyAttributes": ["epss"] }
                    },
                    {
                      "IndexName": "by-date",
                      "KeySchema": [{ "AttributeName": "date", "KeyType": "HASH" }],
                      "Projection": { "ProjectionType": "KEYS_ONLY" },
                      "ProvisionedThroughput": { "ReadCapacityUnits": 2, "WriteCapacityUnits": 1 }
                    }
                  ]
                }
              }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_key_roles_map_to_key_types() {
        let hash = key_schema_element(&KeyElement::partition("cve")).unwrap();
        let range = key_schema_element(&KeyElement::sort("date")).unwrap();
        assert_eq!(hash.attribute_name(), "cve");
        assert_eq!(hash.key_type(), &KeyType::Hash);
        assert_eq!(range.key_type(), &KeyType::Range);
        assert_eq!(key_element(&range), KeyElement::sort("date"));
    }

    #[test]
    fn test_live_attribute_types() {
        let number = SdkAttributeDefinition::builder()
            .attribute_name("percentile")
            .attribute_type(ScalarAttributeType::N)
            .build()
            .unwrap();
        assert_eq!(
            live_attribute(&number),
            Some(AttributeDefinition::new("percentile", ScalarType::Number))
        );

        let unknown = SdkAttributeDefinition::builder()
            .attribute_name("blob")
            .attribute_type(ScalarAttributeType::from("BOOL"))
            .build()
            .unwrap();
        assert_eq!(live_attribute(&unknown), None);
    }

    #[test]
    fn test_table_status_mapping() {
        assert_eq!(table_status(Some(&SdkTableStatus::Active)), TableStatus::Active);
        assert_eq!(table_status(Some(&SdkTableStatus::Creating)), TableStatus::Creating);
        assert_eq!(
            table_status(Some(&SdkTableStatus::from("RESTORING"))),
            TableStatus::Other("RESTORING".into())
        );
        assert_eq!(table_status(None), TableStatus::Other("UNKNOWN".into()));
    }

    #[test]
    fn test_projection_non_key_attributes() {
        let include = projection(&Projection {
            projection_type: ProjectionType::Include,
            non_key_attributes: vec!["epss".into()],
        });
        assert_eq!(include.projection_type(), Some(&SdkProjectionType::Include));
        assert_eq!(include.non_key_attributes(), ["epss".to_string()]);

        let keys_only = projection(&Projection {
            projection_type: ProjectionType::KeysOnly,
            non_key_attributes: Vec::new(),
        });
        assert!(keys_only.non_key_attributes.is_none());
    }

    #[test]
    fn test_create_request_carries_document_settings() {
        let schema = provisioned_document().table_schema("epss").unwrap();
        let request = store().create_table_request(&schema).unwrap();
        let input = request.as_input();

        assert_eq!(input.get_table_name().as_deref(), Some("epss"));
        assert_eq!(input.get_key_schema().as_ref().map(Vec::len), Some(2));
        assert_eq!(input.get_attribute_definitions().as_ref().map(Vec::len), Some(3));
        assert_eq!(input.get_billing_mode(), &Some(SdkBillingMode::Provisioned));

        let table = input.get_provisioned_throughput().as_ref().unwrap();
        assert_eq!(table.read_capacity_units(), 10);
        assert_eq!(table.write_capacity_units(), 5);

        let indexes = input.get_global_secondary_indexes().as_ref().unwrap();
        assert_eq!(indexes.len(), 2);
        let by_percentile = &indexes[0];
        assert_eq!(by_percentile.index_name(), "by-percentile");
        assert_eq!(
            by_percentile.projection().and_then(|p| p.projection_type()),
            Some(&SdkProjectionType::Include)
        );
        // inherits the table capacity
        let capacity = by_percentile.provisioned_throughput().unwrap();
        assert_eq!(capacity.read_capacity_units(), 10);
        // declares its own
        let capacity = indexes[1].provisioned_throughput().unwrap();
        assert_eq!(capacity.read_capacity_units(), 2);
        assert_eq!(capacity.write_capacity_units(), 1);

        let sse = input.get_sse_specification().as_ref().unwrap();
        assert_eq!(sse.enabled(), Some(true));
        assert_eq!(sse.sse_type(), Some(&SseType::Kms));
        assert_eq!(sse.kms_master_key_id(), Some("alias/scores"));

        let tags = input.get_tags().as_ref().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].key(), "service");
        assert_eq!(tags[0].value(), "vulnscore");
    }

    #[test]
    fn test_create_request_on_demand() {
        let schema = TableSchema::new("kev", "cve", ScalarType::String)
            .with_attribute("vendor", ScalarType::String)
            .with_index(SecondaryIndex::new("by-vendor", "vendor"));
        let request = store().create_table_request(&schema).unwrap();
        let input = request.as_input();

        assert_eq!(input.get_billing_mode(), &Some(SdkBillingMode::PayPerRequest));
        assert!(input.get_provisioned_throughput().is_none());
        assert!(input.get_sse_specification().is_none());
        assert!(input.get_tags().is_none());
        let indexes = input.get_global_secondary_indexes().as_ref().unwrap();
        assert!(indexes[0].provisioned_throughput().is_none());
    }

    #[test]
    fn test_update_request_creates_one_index() {
        let schema = TableSchema::new("epss", "cve", ScalarType::String)
            .with_attribute("vendor", ScalarType::String)
            .with_index(SecondaryIndex::new("by-vendor", "vendor"));
        let plan = ReconciliationPlan {
            indexes_to_create: schema.indexes.clone(),
            attributes_to_add: vec![AttributeDefinition::new("vendor", ScalarType::String)],
            attribute_definitions: schema.attributes.clone(),
        };

        let request = store().update_table_request("epss", &plan).unwrap();
        let input = request.as_input();
        assert_eq!(input.get_attribute_definitions().as_ref().map(Vec::len), Some(2));
        let updates = input.get_global_secondary_index_updates().as_ref().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].create().map(|c| c.index_name()),
            Some("by-vendor")
        );

        let mut two = plan.clone();
        two.indexes_to_create.push(SecondaryIndex::new("by-cve", "cve"));
        assert!(matches!(
            store().update_table_request("epss", &two),
            Err(Error::InvalidArgument(_))
        ));
    }
}
