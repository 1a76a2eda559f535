//! Saving, loading, and expiring on-disk indexes.
//!
//! An index directory holds two files:
//!
//! - `index.bin`: magic `DQIX`, format version, dimension, and count as little-endian `u32`,
//!   followed by `count * dimension` little-endian `f32` values.
//! - `docstore.json`: the chunks plus the embedding model, dimension, creation time, and a
//!   SHA-256 over the chunk texts used to detect mismatched pairs of files.
//!
//! Directories older than the configured TTL are removed by [`reap_expired`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use super::{IndexError, SimilarityIndex};
use crate::processing::Chunk;

/// File name of the vector payload inside an index directory.
pub const INDEX_FILE: &str = "index.bin";
/// File name of the chunk store inside an index directory.
pub const DOCSTORE_FILE: &str = "docstore.json";

const MAGIC: &[u8; 4] = b"DQIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize)]
struct DocStore {
    embedding_model: String,
    dimension: usize,
    created_at: String,
    content_hash: String,
    chunks: Vec<Chunk>,
}

impl SimilarityIndex {
    /// Write the index into `dir`, creating it when missing.
    pub fn save(&self, dir: &Path, embedding_model: &str) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;

        let mut payload =
            Vec::with_capacity(HEADER_LEN + self.vectors.len() * self.dimension * 4);
        payload.extend_from_slice(MAGIC);
        payload.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        payload.extend_from_slice(&to_u32(self.dimension)?.to_le_bytes());
        payload.extend_from_slice(&to_u32(self.vectors.len())?.to_le_bytes());
        for value in self.vectors.iter().flatten() {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(dir.join(INDEX_FILE), payload)?;

        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(std::io::Error::other)?;
        let store = DocStore {
            embedding_model: embedding_model.to_string(),
            dimension: self.dimension,
            created_at,
            content_hash: content_hash(&self.chunks),
            chunks: self.chunks.clone(),
        };
        fs::write(dir.join(DOCSTORE_FILE), serde_json::to_vec_pretty(&store)?)?;

        tracing::info!(
            path = %dir.display(),
            chunks = self.chunks.len(),
            model = embedding_model,
            "Saved similarity index"
        );
        Ok(())
    }

    /// Load an index saved by [`SimilarityIndex::save`].
    ///
    /// Fails with [`IndexError::ModelMismatch`] when the index was built with a model other than
    /// `embedding_model`, since query vectors would not be comparable.
    pub fn load(dir: &Path, embedding_model: &str) -> Result<Self, IndexError> {
        if !dir.is_dir() {
            return Err(IndexError::NotFound(dir.to_path_buf()));
        }

        let store: DocStore = serde_json::from_slice(&fs::read(dir.join(DOCSTORE_FILE))?)?;
        if store.embedding_model != embedding_model {
            return Err(IndexError::ModelMismatch {
                expected: embedding_model.to_string(),
                found: store.embedding_model,
            });
        }
        if content_hash(&store.chunks) != store.content_hash {
            return Err(IndexError::Corrupt("chunk store hash mismatch".into()));
        }

        let payload = fs::read(dir.join(INDEX_FILE))?;
        if payload.len() < HEADER_LEN || &payload[..4] != MAGIC {
            return Err(IndexError::Corrupt("missing index header".into()));
        }
        let version = read_u32(&payload, 4);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported index version {version}"
            )));
        }
        let dimension = read_u32(&payload, 8) as usize;
        let count = read_u32(&payload, 12) as usize;
        if dimension != store.dimension || count != store.chunks.len() {
            return Err(IndexError::Corrupt(
                "vector header disagrees with chunk store".into(),
            ));
        }
        let body = &payload[HEADER_LEN..];
        if body.len() != count * dimension * 4 {
            return Err(IndexError::Corrupt("vector payload is truncated".into()));
        }

        let values: Vec<f32> = body
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        let vectors = if dimension == 0 {
            vec![Vec::new(); count]
        } else {
            values.chunks(dimension).map(<[f32]>::to_vec).collect()
        };

        tracing::info!(path = %dir.display(), chunks = count, "Loaded similarity index");
        Self::new(vectors, store.chunks)
    }
}

fn to_u32(value: usize) -> Result<u32, IndexError> {
    u32::try_from(value).map_err(|_| IndexError::Corrupt(format!("{value} exceeds u32 range")))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn content_hash(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for (position, chunk) in chunks.iter().enumerate() {
        if position > 0 {
            hasher.update([0u8]);
        }
        hasher.update(chunk.text.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Delete index directories directly under `root` whose modification time is older than `ttl`.
///
/// Returns the number of directories removed. A missing root is not an error.
pub fn reap_expired(root: &Path, ttl: Duration) -> Result<usize, IndexError> {
    if !root.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|error| {
            IndexError::Io(
                error
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok())
            .and_then(|modified| modified.elapsed().ok());
        match age {
            Some(age) if age >= ttl => {
                fs::remove_dir_all(entry.path())?;
                tracing::debug!(path = %entry.path().display(), "Removed expired index");
                removed += 1;
            }
            _ => {}
        }
    }
    Ok(removed)
}

/// Periodically reap expired indexes under `root` until the runtime shuts down.
pub fn spawn_reaper(root: PathBuf, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let dir = root.clone();
            match tokio::task::spawn_blocking(move || reap_expired(&dir, ttl)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => tracing::info!(removed, "Reaped expired indexes"),
                Ok(Err(error)) => tracing::warn!(error = %error, "Index reaper failed"),
                Err(error) => tracing::warn!(error = %error, "Index reaper task aborted"),
            }
        }
    })
}
