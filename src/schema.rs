//! Declared table schemas
//!
//! A [`TableSchema`] describes the table the client should find in the store:
//! its key schema, attribute definitions, secondary indexes, throughput mode,
//! encryption and tags. Schemas are usually built from a [`SchemaDocument`],
//! the serde shape of the `tables.json` style configuration:
//!
//! ```json
//! {
//!   "general": {
//!     "provisionedThroughput": { "ReadCapacityUnits": 10, "WriteCapacityUnits": 10 },
//!     "sseSpecification": { "Enabled": true },
//!     "tags": [{ "Key": "service", "Value": "vulnscore" }]
//!   },
//!   "tables": {
//!     "epss": {
//!       "keySchema": [{ "AttributeName": "cve", "KeyType": "HASH" }],
//!       "attributeDefinitions": [{ "AttributeName": "cve", "AttributeType": "S" }]
//!     }
//!   }
//! }
//! ```

use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::Error;

/// Scalar type of a key attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// String (`S`)
    #[serde(rename = "S")]
    String,
    /// Number (`N`)
    #[serde(rename = "N")]
    Number,
    /// Binary (`B`)
    #[serde(rename = "B")]
    Binary,
}

impl ScalarType {
    /// Whether the attribute value carries this scalar type
    pub fn matches(self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (ScalarType::String, AttributeValue::S(_))
                | (ScalarType::Number, AttributeValue::N(_))
                | (ScalarType::Binary, AttributeValue::B(_))
        )
    }
}

/// Role of an attribute within a key schema
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyRole {
    /// Partition (hash) key
    #[serde(rename = "HASH")]
    Partition,
    /// Sort (range) key
    #[serde(rename = "RANGE")]
    Sort,
}

/// One element of a key schema
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyElement {
    /// Attribute name
    pub attribute_name: String,
    /// Partition or sort
    pub key_type: KeyRole,
}

impl KeyElement {
    /// Partition key element
    pub fn partition(name: impl Into<String>) -> Self {
        Self {
            attribute_name: name.into(),
            key_type: KeyRole::Partition,
        }
    }

    /// Sort key element
    pub fn sort(name: impl Into<String>) -> Self {
        Self {
            attribute_name: name.into(),
            key_type: KeyRole::Sort,
        }
    }
}

impl fmt::Display for KeyElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.key_type {
            KeyRole::Partition => "HASH",
            KeyRole::Sort => "RANGE",
        };
        write!(f, "{} {}", self.attribute_name, role)
    }
}

/// Attribute name and scalar type
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    /// Attribute name
    pub attribute_name: String,
    /// Scalar type
    pub attribute_type: ScalarType,
}

impl AttributeDefinition {
    /// Creates an attribute definition
    pub fn new(name: impl Into<String>, attribute_type: ScalarType) -> Self {
        Self {
            attribute_name: name.into(),
            attribute_type,
        }
    }
}

/// Which attributes an index carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionType {
    /// Every attribute
    #[default]
    #[serde(rename = "ALL")]
    All,
    /// Only the table and index keys
    #[serde(rename = "KEYS_ONLY")]
    KeysOnly,
    /// Keys plus the listed non-key attributes
    #[serde(rename = "INCLUDE")]
    Include,
}

/// Index projection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Projection {
    /// Projection type
    #[serde(default)]
    pub projection_type: ProjectionType,
    /// Attributes projected with `INCLUDE`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_key_attributes: Vec<String>,
}

/// Provisioned read/write capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Throughput {
    /// Read capacity units
    pub read_capacity_units: i64,
    /// Write capacity units
    pub write_capacity_units: i64,
}

/// Capacity mode of a table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BillingMode {
    /// Fixed provisioned capacity
    Provisioned(Throughput),
    /// Pay per request
    #[default]
    OnDemand,
}

/// Global secondary index definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecondaryIndex {
    /// Index name
    pub index_name: String,
    /// Index key schema
    pub key_schema: Vec<KeyElement>,
    /// Projected attributes
    #[serde(default)]
    pub projection: Projection,
    /// Index capacity when the table is provisioned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<Throughput>,
}

impl SecondaryIndex {
    /// Index keyed on a single partition attribute, projecting everything
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            index_name: name.into(),
            key_schema: vec![KeyElement::partition(partition_key)],
            projection: Projection::default(),
            provisioned_throughput: None,
        }
    }

    /// Adds a sort key to the index
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.key_schema.push(KeyElement::sort(sort_key));
        self
    }

    /// Replaces the projection
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Sets the index capacity
    pub fn with_throughput(mut self, throughput: Throughput) -> Self {
        self.provisioned_throughput = Some(throughput);
        self
    }
}

/// Server-side encryption settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    /// Whether encryption at rest uses a non-default key
    #[serde(rename = "Enabled")]
    pub enabled: bool,
    /// `KMS` or `AES256`
    #[serde(rename = "SSEType", default, skip_serializing_if = "Option::is_none")]
    pub sse_type: Option<String>,
    /// KMS key id, alias or ARN
    #[serde(
        rename = "KMSMasterKeyId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kms_master_key_id: Option<String>,
}

/// Resource tag
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

/// Declared schema of one table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Partition key first, then the optional sort key
    pub key_schema: Vec<KeyElement>,
    /// Definitions of every attribute used by a key schema
    pub attributes: Vec<AttributeDefinition>,
    /// Global secondary indexes
    pub indexes: Vec<SecondaryIndex>,
    /// Capacity mode
    pub billing: BillingMode,
    /// Encryption at rest
    pub encryption: Option<Encryption>,
    /// Tags applied at creation
    pub tags: Vec<Tag>,
}

impl TableSchema {
    /// Schema with a single partition key, on-demand capacity and nothing else
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>, key_type: ScalarType) -> Self {
        let partition_key = partition_key.into();
        Self {
            name: name.into(),
            key_schema: vec![KeyElement::partition(partition_key.clone())],
            attributes: vec![AttributeDefinition::new(partition_key, key_type)],
            indexes: Vec::new(),
            billing: BillingMode::OnDemand,
            encryption: None,
            tags: Vec::new(),
        }
    }

    /// Adds a sort key and its attribute definition
    pub fn with_sort_key(mut self, sort_key: impl Into<String>, key_type: ScalarType) -> Self {
        let sort_key = sort_key.into();
        self.key_schema.push(KeyElement::sort(sort_key.clone()));
        self.with_attribute(sort_key, key_type)
    }

    /// Adds an attribute definition, replacing one with the same name
    ///
    /// The attribute must be a table or index key attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attribute_type: ScalarType) -> Self {
        let definition = AttributeDefinition::new(name, attribute_type);
        self.attributes
            .retain(|a| a.attribute_name != definition.attribute_name);
        self.attributes.push(definition);
        self
    }

    /// Adds a secondary index
    pub fn with_index(mut self, index: SecondaryIndex) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets the capacity mode
    pub fn with_billing(mut self, billing: BillingMode) -> Self {
        self.billing = billing;
        self
    }

    /// Sets encryption at rest
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Adds a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Partition key element
    pub fn partition_key(&self) -> Option<&KeyElement> {
        self.key_schema
            .iter()
            .find(|k| k.key_type == KeyRole::Partition)
    }

    /// Sort key element, if the table has one
    pub fn sort_key(&self) -> Option<&KeyElement> {
        self.key_schema.iter().find(|k| k.key_type == KeyRole::Sort)
    }

    /// Declared type of an attribute
    pub fn attribute_type(&self, name: &str) -> Option<ScalarType> {
        self.attributes
            .iter()
            .find(|a| a.attribute_name == name)
            .map(|a| a.attribute_type)
    }

    /// Capacity of an index, falling back to the table capacity
    pub fn index_throughput(&self, index: &SecondaryIndex) -> Option<Throughput> {
        match self.billing {
            BillingMode::Provisioned(table) => Some(index.provisioned_throughput.unwrap_or(table)),
            BillingMode::OnDemand => None,
        }
    }

    /// Checks the schema's structural invariants
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidSchema("table name is empty".into()));
        }

        validate_key_schema(&self.name, &self.key_schema)?;

        let mut names = HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.index_name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "index '{}' declared twice",
                    index.index_name
                )));
            }
            validate_key_schema(&index.index_name, &index.key_schema)?;
        }

        let keys = self
            .key_schema
            .iter()
            .chain(self.indexes.iter().flat_map(|i| i.key_schema.iter()));
        let mut used = HashSet::new();
        for key in keys {
            if self.attribute_type(&key.attribute_name).is_none() {
                return Err(Error::InvalidSchema(format!(
                    "key attribute '{}' has no attribute definition",
                    key.attribute_name
                )));
            }
            let _ = used.insert(key.attribute_name.as_str());
        }

        // the store only keeps definitions of key attributes
        if let Some(unused) = self
            .attributes
            .iter()
            .find(|a| !used.contains(a.attribute_name.as_str()))
        {
            return Err(Error::InvalidSchema(format!(
                "attribute '{}' is not used by the key schema or any index",
                unused.attribute_name
            )));
        }

        Ok(())
    }
}

fn validate_key_schema(owner: &str, keys: &[KeyElement]) -> Result<(), Error> {
    match keys {
        [first] | [first, _] if first.key_type != KeyRole::Partition => Err(Error::InvalidSchema(
            format!("'{owner}' key schema must start with a HASH key"),
        )),
        [_] => Ok(()),
        [_, second] if second.key_type == KeyRole::Sort => Ok(()),
        [_, _] => Err(Error::InvalidSchema(format!(
            "'{owner}' second key element must be a RANGE key"
        ))),
        _ => Err(Error::InvalidSchema(format!(
            "'{owner}' key schema must have one or two elements, got {}",
            keys.len()
        ))),
    }
}

/// Settings shared by every table of a schema document
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    /// Provisioned capacity; on-demand when absent
    #[serde(default)]
    pub provisioned_throughput: Option<Throughput>,
    /// Encryption at rest
    #[serde(default)]
    pub sse_specification: Option<Encryption>,
    /// Tags applied to created tables
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Per-table section of a schema document
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    /// Key schema
    pub key_schema: Vec<KeyElement>,
    /// Attribute definitions
    pub attribute_definitions: Vec<AttributeDefinition>,
    /// Global secondary indexes
    #[serde(default)]
    pub global_secondary_indexes: Vec<SecondaryIndex>,
    /// Overrides the general capacity for this table
    #[serde(default)]
    pub provisioned_throughput: Option<Throughput>,
}

/// Schema document enumerating every table of the service
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SchemaDocument {
    /// Shared settings
    #[serde(default)]
    pub general: GeneralSettings,
    /// Tables by name
    #[serde(default)]
    pub tables: BTreeMap<String, TableDefinition>,
}

impl SchemaDocument {
    /// Names of the declared tables
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Resolves and validates the schema of one table
    pub fn table_schema(&self, name: &str) -> Result<TableSchema, Error> {
        let definition = self
            .tables
            .get(name)
            .ok_or_else(|| Error::InvalidSchema(format!("table '{name}' is not declared")))?;

        let billing = match definition
            .provisioned_throughput
            .or(self.general.provisioned_throughput)
        {
            Some(throughput) => BillingMode::Provisioned(throughput),
            None => BillingMode::OnDemand,
        };

        let schema = TableSchema {
            name: name.to_string(),
            key_schema: definition.key_schema.clone(),
            attributes: definition.attribute_definitions.clone(),
            indexes: definition.global_secondary_indexes.clone(),
            billing,
            encryption: self.general.sse_specification.clone(),
            tags: self.general.tags.clone(),
        };
        schema.validate()?;
        Ok(schema)
    }
}
