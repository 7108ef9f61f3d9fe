use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};

use crate::config::Config;
use crate::retriever::{IndexState, Retriever};

/// Force a full rebuild and print what was indexed.
pub async fn run_rebuild(config: &Config) -> Result<()> {
    let retriever = Retriever::from_config(config)?;
    let index = retriever
        .build_index()
        .await
        .context("Failed to rebuild the document index")?;

    println!("index rebuilt");
    println!("  path: {}", retriever.index_path().display());
    println!("  documents: {}", index.document_count());
    println!("  chunks: {}", index.len());
    println!("  model: {}", index.metadata().embedding_model_id);
    Ok(())
}

/// Print the persisted index's metadata and freshness.
pub async fn run_status(config: &Config, json: bool) -> Result<()> {
    let retriever = Retriever::from_config(config)?;
    let status = retriever.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("index: {}", status.path.display());
    match status.state {
        IndexState::Missing => {
            println!("  state: missing (built on the next query)");
            return Ok(());
        }
        IndexState::Corrupt => {
            println!(
                "  state: corrupt ({}; rebuilt on the next query)",
                status.reason.as_deref().unwrap_or("unknown reason")
            );
            return Ok(());
        }
        IndexState::Fresh => println!("  state: fresh"),
        IndexState::Stale => println!("  state: stale (rebuilt on the next query)"),
    }

    println!("  documents: {}", status.documents);
    println!("  chunks: {}", status.entries);
    if let Some(meta) = &status.metadata {
        println!("  model: {} ({} dims)", meta.embedding_model_id, meta.dims);
        println!(
            "  chunking: size {}, overlap {}",
            meta.chunk_size, meta.chunk_overlap
        );
        let built = Utc
            .timestamp_opt(meta.built_at, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| meta.built_at.to_string());
        println!("  built: {}", built);
    }
    Ok(())
}
