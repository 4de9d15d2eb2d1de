//! Single-slot embedding persistence.
//!
//! One file per identity slot, holding `D` little-endian `f32`s in order with
//! no header. `D` comes from the loaded model; a file of any other length is
//! treated as absent.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::Embedding;

const FLOAT_BYTES: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid slot name: {0:?}")]
    InvalidSlot(String),
    #[error("embedding has {actual} components, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

pub struct EmbeddingStore {
    dir: PathBuf,
    dimension: usize,
}

impl EmbeddingStore {
    /// Open (creating if needed) a store rooted at `dir` for `dimension`-long vectors.
    pub fn open(dir: impl Into<PathBuf>, dimension: usize) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), dimension, "embedding store opened");
        Ok(Self { dir, dimension })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Serialize and overwrite the record for `slot`.
    ///
    /// The bytes go to a hidden temporary sibling first and are renamed into
    /// place, so readers never observe a half-written record.
    pub fn save(&self, slot: &str, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.dimension() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        let path = self.slot_path(slot)?;
        let bytes = encode(embedding.as_slice());

        // Temp names start with '.', which no slot may.
        let mut tmp = tempfile::Builder::new()
            .prefix(".facegate-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;

        tracing::info!(slot, bytes = bytes.len(), "embedding saved");
        Ok(())
    }

    /// Read the record for `slot`. Missing or wrong-length records are `Ok(None)`.
    pub fn load(&self, slot: &str) -> Result<Option<Embedding>, StoreError> {
        let path = self.slot_path(slot)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let expected = self.dimension * FLOAT_BYTES;
        if bytes.len() != expected {
            tracing::warn!(
                slot,
                expected,
                actual = bytes.len(),
                "stored embedding has wrong length; treating as absent"
            );
            return Ok(None);
        }

        Ok(Some(Embedding::new(decode(&bytes))))
    }

    /// Delete the record for `slot`. Returns whether a record existed.
    pub fn remove(&self, slot: &str) -> Result<bool, StoreError> {
        let path = self.slot_path(slot)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(slot, "embedding removed");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Slot names present in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut slots = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            slots.push(name);
        }
        slots.sort();
        Ok(slots)
    }

    fn slot_path(&self, slot: &str) -> Result<PathBuf, StoreError> {
        let valid = !slot.is_empty()
            && !slot.starts_with('.')
            && !slot.contains(['/', '\\', '\0']);
        if !valid {
            return Err(StoreError::InvalidSlot(slot.to_string()));
        }
        Ok(self.dir.join(slot))
    }
}

fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(FLOAT_BYTES)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
