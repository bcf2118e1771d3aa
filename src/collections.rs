//! `coderag collections ...`: administrative commands over the vector store.
//!
//! Thin wrappers around [`VectorDbHandle`] that print a human summary. The
//! collection name defaults to `[vectordb].collection`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::store::{CollectionSchema, IndexParams};
use crate::vectordb::VectorDbHandle;

fn handle(config: &Config) -> Result<VectorDbHandle> {
    Ok(VectorDbHandle::from_config(&config.vectordb)?)
}

fn collection_name<'a>(config: &'a Config, name: Option<&'a str>) -> &'a str {
    name.unwrap_or(&config.vectordb.collection)
}

pub async fn run_list(config: &Config) -> Result<()> {
    let names = handle(config)?.list_collections().await?;
    if names.is_empty() {
        println!("No collections.");
        return Ok(());
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub async fn run_exists(config: &Config, name: Option<&str>) -> Result<()> {
    let name = collection_name(config, name);
    let exists = handle(config)?.collection_exists(name).await?;
    println!("{}: {}", name, if exists { "exists" } else { "missing" });
    Ok(())
}

/// Create a document collection with an index on its vector field.
pub async fn run_create(config: &Config, name: Option<&str>, dims: Option<usize>) -> Result<()> {
    let name = collection_name(config, name);
    let Some(dims) = dims.or(config.embedding.dims).filter(|d| *d > 0) else {
        bail!("Vector dims unknown. Pass --dims or set [embedding].dims.");
    };

    let handle = handle(config)?;
    let schema = CollectionSchema::for_documents(handle.vector_field(), dims);
    handle.create_collection(name, &schema).await?;
    let index = IndexParams::new(&config.vectordb.index_type, &config.vectordb.metric_type)
        .with_param("nlist", 128);
    handle
        .create_index(name, handle.vector_field(), &index)
        .await?;

    println!("create {}", name);
    for field in &schema.fields {
        let mut line = format!("  {}: {}", field.name, field.dtype);
        if field.is_primary {
            line.push_str(" (primary)");
        }
        if let Some(dim) = field.dim {
            line.push_str(&format!(" dim={}", dim));
        }
        println!("{}", line);
    }
    println!(
        "  index: {} / {}",
        config.vectordb.index_type, config.vectordb.metric_type
    );
    println!("ok");
    Ok(())
}

pub async fn run_drop(config: &Config, name: Option<&str>, yes: bool) -> Result<()> {
    let name = collection_name(config, name);
    if !yes {
        bail!("Refusing to drop '{}' without --yes", name);
    }
    handle(config)?.drop_collection(name).await?;
    println!("dropped {}", name);
    Ok(())
}

pub async fn run_stats(config: &Config, name: Option<&str>) -> Result<()> {
    let name = collection_name(config, name);
    let handle = handle(config)?;
    let schema = handle.get_schema(name).await?;
    let stats = handle.get_collection_stats(name).await?;

    println!("Collection {}", name);
    println!("================================");
    println!();
    println!("  Backend:     {}", handle.store().backend_name());
    println!("  Rows:        {}", stats.row_count);
    println!("  Fields:");
    for field in &schema.fields {
        println!(
            "    {:<20} {}{}",
            field.name,
            field.dtype,
            field.dim.map(|d| format!("({})", d)).unwrap_or_default()
        );
    }
    println!();
    Ok(())
}

pub async fn run_count(config: &Config, name: Option<&str>) -> Result<()> {
    let name = collection_name(config, name);
    let count = handle(config)?.count_vectors(name).await?;
    println!("{}", count);
    Ok(())
}
