//! Offline enrollment: build the embedding store from labeled photos.
//!
//! Expects one sub-directory per identity under the data directory. Each
//! `.jpg`, `.jpeg` or `.png` file inside is converted to RGB, resized whole to
//! the embedder input size and embedded. Unreadable images are logged and
//! skipped.

use anyhow::{Context, Result};
use facematch_core::preprocess;
use facematch_core::{Embedder, EmbeddingStore};
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Embed every enrollment image under `data_dir`, in sorted path order.
pub fn build_store(embedder: &dyn Embedder, data_dir: &Path) -> Result<EmbeddingStore> {
    let mut entries = Vec::new();

    for identity_dir in sorted_entries(data_dir)? {
        if !identity_dir.is_dir() {
            continue;
        }
        let Some(label) = identity_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %identity_dir.display(), "skipping non-UTF-8 identity directory");
            continue;
        };

        let mut vectors = Vec::new();
        for image_path in sorted_entries(&identity_dir)? {
            if !is_enrollment_image(&image_path) {
                continue;
            }
            match embed_file(embedder, &image_path) {
                Ok(values) => vectors.push(values),
                Err(err) => {
                    tracing::warn!(path = %image_path.display(), error = %err, "skipping image")
                }
            }
        }

        tracing::info!(label, images = vectors.len(), "identity enrolled");
        entries.push((label.to_string(), vectors));
    }

    Ok(EmbeddingStore::from_entries(entries)?)
}

fn embed_file(embedder: &dyn Embedder, path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let image = preprocess::decode_rgb(&bytes)?;
    let input = preprocess::resize_square(&image, embedder.input_size());
    Ok(embedder.embed(&input)?.values)
}

fn is_enrollment_image(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let extension_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
    path.is_file() && !hidden && extension_ok
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}
