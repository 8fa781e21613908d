//! Schemas and items shared by the tests
use serde::{Deserialize, Serialize};
use vulnscore_table::{AttributeValue, Item, ScalarType, SecondaryIndex, TableSchema};

pub const TABLE: &str = "epss";

/// Daily EPSS score of one CVE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpssRecord {
    pub cve: String,
    pub epss: f64,
    pub percentile: f64,
}

impl EpssRecord {
    pub fn new(n: usize) -> Self {
        Self {
            cve: cve(n),
            epss: 0.001 * (n % 1000) as f64,
            percentile: (n % 100) as f64 / 100.0,
        }
    }
}

pub fn cve(n: usize) -> String {
    format!("CVE-2024-{n:05}")
}

/// Table keyed on the CVE id only
pub fn epss_schema() -> TableSchema {
    TableSchema::new(TABLE, "cve", ScalarType::String)
}

/// Table keyed on the CVE id with two score indexes
pub fn indexed_schema() -> TableSchema {
    epss_schema()
        .with_attribute("percentile", ScalarType::Number)
        .with_attribute("vendor", ScalarType::String)
        .with_index(SecondaryIndex::new("by-percentile", "percentile"))
        .with_index(SecondaryIndex::new("by-vendor", "vendor"))
}

/// Score history table keyed on CVE and scoring date
pub fn history_schema() -> TableSchema {
    TableSchema::new("epss-history", "cve", ScalarType::String)
        .with_sort_key("date", ScalarType::String)
}

pub fn epss_item(n: usize) -> Item {
    Item::from([
        ("cve".to_string(), AttributeValue::S(cve(n))),
        (
            "percentile".to_string(),
            AttributeValue::N(format!("{}", (n % 100) as f64 / 100.0)),
        ),
    ])
}

pub fn epss_items(count: usize) -> Vec<Item> {
    (0..count).map(epss_item).collect()
}

pub fn history_item(n: usize, day: usize) -> Item {
    Item::from([
        ("cve".to_string(), AttributeValue::S(cve(n))),
        (
            "date".to_string(),
            AttributeValue::S(format!("2024-05-{:02}", day + 1)),
        ),
    ])
}

pub fn cve_of(item: &Item) -> String {
    match item.get("cve") {
        Some(AttributeValue::S(s)) => s.clone(),
        other => panic!("unexpected cve attribute {other:?}"),
    }
}
