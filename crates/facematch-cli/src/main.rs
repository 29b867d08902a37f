use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{ModelCache, RecognitionPipeline, Slot};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod enroll;

use config::Config;

#[derive(Parser)]
#[command(name = "facematch", about = "Face recognition against a precomputed embedding store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in one or more images
    Recognize {
        /// Image files (PNG, JPEG, ...)
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Match distance threshold (overrides FACEMATCH_MATCH_THRESHOLD)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Load every model and report which are ready
    Status,
    /// Build the embedding store from a directory of labeled photos
    Enroll {
        /// Directory holding one sub-directory of photos per identity
        #[arg(short, long)]
        data_dir: PathBuf,
        /// Output file (defaults to FACEMATCH_STORE_PATH)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    let cache = Arc::new(ModelCache::new(config.loader()));

    match cli.command {
        Commands::Recognize { images, threshold } => {
            if config.warmup_enabled {
                cache.spawn_warmup().context("spawning warm-up thread")?;
            }
            let pipeline = RecognitionPipeline::new(Arc::clone(&cache))
                .with_threshold(threshold.unwrap_or(config.match_threshold));
            recognize_all(pipeline, images).await?;
        }
        Commands::Status => {
            let warmup = cache.spawn_warmup().context("spawning warm-up thread")?;
            let status = tokio::task::spawn_blocking(move || warmup.join())
                .await?
                .map_err(|_| anyhow::anyhow!("warm-up thread panicked"))?;
            for slot in Slot::ALL {
                if !status.is_ready(slot) {
                    tracing::warn!(%slot, "not ready after warm-up");
                }
            }

            let report = json!({
                "models_loaded": status.all_ready(),
                "detector_ready": status.detector_ready,
                "embedder_ready": status.embedder_ready,
                "store_ready": status.store_ready,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Enroll { data_dir, output } => {
            let output = output.unwrap_or_else(|| config.store_path.clone());
            let embedder = cache.embedder()?;

            let store = tokio::task::spawn_blocking(move || {
                enroll::build_store(embedder.as_ref(), &data_dir)
            })
            .await??;

            store
                .save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Enrolled {} identities ({} embeddings) into {}",
                store.len(),
                store.embedding_count(),
                output.display()
            );
        }
    }

    Ok(())
}

/// Recognize every image on the blocking pool, printing one JSON line per
/// image in argument order.
async fn recognize_all(pipeline: RecognitionPipeline, images: Vec<PathBuf>) -> Result<()> {
    tracing::debug!(threshold = pipeline.threshold(), images = images.len(), "recognizing");
    let tasks: Vec<_> = images
        .into_iter()
        .map(|path| {
            let pipeline = pipeline.clone();
            tokio::task::spawn_blocking(move || recognize_file(&pipeline, &path))
        })
        .collect();

    let mut failures = 0usize;
    for task in tasks {
        let (report, ok) = task.await?;
        if !ok {
            failures += 1;
        }
        println!("{}", serde_json::to_string(&report)?);
    }

    if failures > 0 {
        anyhow::bail!("{failures} image(s) could not be processed");
    }
    Ok(())
}

fn recognize_file(pipeline: &RecognitionPipeline, path: &Path) -> (serde_json::Value, bool) {
    let image = path.display().to_string();

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(image = %image, error = %err, "cannot read image");
            return (json!({ "image": image, "error": err.to_string(), "retryable": false }), false);
        }
    };

    match pipeline.recognize(&bytes) {
        Ok(results) => {
            tracing::info!(image = %image, faces = results.len(), "recognized");
            (json!({ "image": image, "results": results }), true)
        }
        Err(err) => {
            tracing::error!(image = %image, error = %err, "recognition failed");
            let report = json!({
                "image": image,
                "error": err.to_string(),
                "retryable": err.is_retryable(),
                "status": pipeline.status(),
            });
            (report, false)
        }
    }
}
