use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};

use opkernel::config::Config;
use opkernel::{Argument, DataObject, OperationContext, SqlStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_ansi(config.logging.style != "never")
        .init();

    let ctx = OperationContext::with_default_operations(config.context_options())
        .context("Failed to register default operations")?;

    // Two stores: the SQL variant of append cannot combine them
    let local = SqlStore::open(&config.database.url).context("Failed to open local store")?;
    let remote = SqlStore::open_in_memory().context("Failed to open remote store")?;
    for (store, rows) in [(&local, "(1, 'ada'), (2, 'grace')"), (&remote, "(3, 'alan')")] {
        store
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS people (id INTEGER, name TEXT);
                 DELETE FROM people;
                 INSERT INTO people VALUES {};",
                rows
            ))
            .await?;
    }

    let objects: Vec<Arc<dyn DataObject>> = vec![
        Arc::new(local.table("people").await?),
        Arc::new(remote.table("people").await?),
    ];

    let appended = match ctx.invoke("append", vec![Argument::List(objects)]).await {
        Ok(output) => output,
        Err(e) => {
            error!("append failed: {}", e);
            return Err(e.into());
        }
    };

    let records = match appended.into_object() {
        Some(object) => object.records().await?,
        None => Vec::new(),
    };
    info!("append produced {} records", records.len());

    println!("{}", serde_json::to_string_pretty(&records)?);
    println!("{}", serde_json::to_string_pretty(&ctx.describe().await)?);

    Ok(())
}
