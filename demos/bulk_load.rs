//! Example: bulk loading EPSS scores and re-submitting failed chunks
//!
//! Connects with `AWS_PROFILE=localstack` (or `AWS_ENDPOINT_URL`) to a local
//! DynamoDB, reconciles the `epss` table and writes synthetic scores.
//!
//! ```sh
//! AWS_PROFILE=localstack RUST_LOG=vulnscore_table=debug cargo run --example bulk_load
//! ```
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vulnscore_table::{
    BulkPutOptions, ClientOptions, Error, Item, ScalarType, SecondaryIndex, StoreConfig,
    TableClient, TableSchema,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EpssScore {
    cve: String,
    date: String,
    epss: f64,
    percentile: f64,
}

fn scores(count: usize) -> Vec<EpssScore> {
    (0..count)
        .map(|n| EpssScore {
            cve: format!("CVE-2024-{n:05}"),
            date: "2024-05-01".into(),
            epss: (n % 1000) as f64 / 1000.0,
            percentile: (n % 100) as f64 / 100.0,
        })
        .collect()
}

/// Re-submits the chunks a bulk write left unwritten, with a growing pause
async fn load_with_resubmission(
    table: &TableClient,
    mut items: Vec<Item>,
    max_rounds: usize,
) -> Result<usize, Error> {
    let mut written = 0;
    let mut pause = Duration::from_millis(500);

    for round in 1..=max_rounds {
        let submitted = items.len();
        let options = BulkPutOptions::new(1000, 10).with_timeout(Duration::from_secs(60));
        match table.bulk_put_with(items, &options).await {
            Ok(output) => {
                tracing::info!(
                    round,
                    items = output.items_written(),
                    retries = output.retry_count(),
                    elapsed = ?output.total_duration,
                    "load complete"
                );
                return Ok(written + output.items_written());
            }
            Err(Error::PartialWrite(partial)) => {
                for failed in &partial.failed_chunks {
                    tracing::warn!(chunk = failed.chunk.index(), error = %failed.error, "chunk failed");
                }
                items = partial
                    .into_resubmittable()
                    .into_iter()
                    .flat_map(|chunk| chunk.into_items())
                    .collect();
                written += submitted - items.len();
                tracing::warn!(round, remaining = items.len(), "re-submitting unwritten chunks");
                tokio::time::sleep(pause).await;
                pause *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::throttling(
        "BatchWriteItem",
        format!("{} items still unwritten after {max_rounds} rounds", items.len()),
    ))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let schema = TableSchema::new("epss", "cve", ScalarType::String)
        .with_sort_key("date", ScalarType::String)
        .with_attribute("percentile", ScalarType::Number)
        .with_index(SecondaryIndex::new("by-percentile", "percentile").with_sort_key("date"));

    let config = StoreConfig::new("us-east-1");
    let table = TableClient::connect(&config, schema, ClientOptions::default()).await?;

    let items = scores(5000)
        .iter()
        .map(serde_dynamo::to_item)
        .collect::<Result<Vec<Item>, _>>()?;

    let written = load_with_resubmission(&table, items, 3).await?;
    println!("wrote {written} scores to {}", table.name());
    Ok(())
}
