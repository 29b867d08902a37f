//! Read-only database of enrolled identities and their reference embeddings.
//!
//! Persisted as a JSON object mapping each label to a list of vectors:
//!
//! ```json
//! { "alice": [[0.01, -0.20, ...], [0.03, -0.18, ...]], "bob": [[...]] }
//! ```
//!
//! Stores loaded from disk iterate identities in lexicographic label order;
//! stores built with [`EmbeddingStore::from_entries`] keep insertion order.

use crate::types::Embedding;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding store not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed embedding store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate identity label: {0}")]
    DuplicateLabel(String),
    #[error("identity {label}: embedding {index} is empty")]
    EmptyEmbedding { label: String, index: usize },
    #[error("identity {label}: embedding {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        label: String,
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("identity {label}: embedding {index} contains a non-finite value")]
    NonFinite { label: String, index: usize },
}

#[derive(Debug, Clone)]
struct Identity {
    label: String,
    embeddings: Vec<Embedding>,
}

/// Validated identity → embeddings mapping. All vectors share one dimension.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStore {
    identities: Vec<Identity>,
    dim: Option<usize>,
}

impl EmbeddingStore {
    /// Build a store from `(label, vectors)` pairs, keeping their order.
    ///
    /// Identities without any vectors are dropped with a warning.
    pub fn from_entries<I, L>(entries: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (L, Vec<Vec<f32>>)>,
        L: Into<String>,
    {
        let mut identities = Vec::new();
        let mut seen = HashSet::new();
        let mut dim: Option<usize> = None;

        for (label, vectors) in entries {
            let label = label.into();
            if !seen.insert(label.clone()) {
                return Err(StoreError::DuplicateLabel(label));
            }
            if vectors.is_empty() {
                tracing::warn!(label = %label, "identity has no embeddings; skipping");
                continue;
            }

            let mut embeddings = Vec::with_capacity(vectors.len());
            for (index, values) in vectors.into_iter().enumerate() {
                if values.is_empty() {
                    return Err(StoreError::EmptyEmbedding { label, index });
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(StoreError::NonFinite { label, index });
                }
                let expected = *dim.get_or_insert(values.len());
                if values.len() != expected {
                    return Err(StoreError::DimensionMismatch {
                        label,
                        index,
                        expected,
                        actual: values.len(),
                    });
                }
                embeddings.push(Embedding::new(values));
            }

            identities.push(Identity { label, embeddings });
        }

        Ok(Self { identities, dim })
    }

    /// Load and validate the JSON store at `path`.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.display().to_string()));
        }
        let reader = BufReader::new(File::open(path)?);
        let raw: BTreeMap<String, Vec<Vec<f32>>> = serde_json::from_reader(reader)?;
        let store = Self::from_entries(raw)?;

        tracing::info!(
            path = %path.display(),
            identities = store.len(),
            embeddings = store.embedding_count(),
            dim = ?store.dim,
            "loaded embedding store"
        );

        Ok(store)
    }

    /// Write the store as JSON. Used by offline enrollment only.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let raw: BTreeMap<&str, Vec<&[f32]>> = self
            .identities
            .iter()
            .map(|identity| {
                let vectors = identity.embeddings.iter().map(|e| e.values.as_slice()).collect();
                (identity.label.as_str(), vectors)
            })
            .collect();

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &raw)?;
        writer.flush()?;
        Ok(())
    }

    /// Dimension shared by every stored vector, `None` for an empty store.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|i| i.embeddings.len()).sum()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(|i| i.label.as_str())
    }

    /// Identities with their embeddings, in store order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Embedding])> {
        self.identities
            .iter()
            .map(|i| (i.label.as_str(), i.embeddings.as_slice()))
    }
}
