//! # Namespaced Key-Value Storage
//!
//! Pairings, the selected band and mode and user settings persist through
//! a small typed layer over an opaque blob store. Backends only speak
//! blobs; the typed accessors enforce exact sizes on read so a schema
//! change surfaces as a miss instead of a misread. Writes are batched:
//! callers issue their `set_*` calls and commit once.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::air::AirPairing;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(String),
}

/// Storage namespaces. Every key is tagged with its namespace so both
/// can live in one backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StorageNamespace {
    Config = 1,
    Settings = 2,
}

/// Opaque blob store.
pub trait StorageBackend {
    fn get_blob(&self, key: &str) -> Option<Vec<u8>>;
    fn set_blob(&mut self, key: &str, value: &[u8]);
    fn commit(&mut self) -> Result<(), StorageError>;
}

/// Volatile backend for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get_blob(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.get(key).cloned()
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) {
        self.blobs.insert(key.to_string(), value.to_vec());
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileSnapshot {
    blobs: HashMap<String, Vec<u8>>,
}

/// JSON-file backend. Mutations accumulate in memory and land on disk
/// atomically at commit time, via a sibling temp file.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    snapshot: FileSnapshot,
}

impl FileBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileSnapshot::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, snapshot })
    }
}

impl StorageBackend for FileBackend {
    fn get_blob(&self, key: &str) -> Option<Vec<u8>> {
        self.snapshot.blobs.get(key).cloned()
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) {
        self.snapshot.blobs.insert(key.to_string(), value.to_vec());
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&self.snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Typed accessors over one namespace of a backend.
pub struct Storage<B: StorageBackend> {
    backend: B,
    namespace: StorageNamespace,
}

macro_rules! int_accessors {
    ($get:ident, $set:ident, $ty:ty) => {
        pub fn $get(&self, key: &str) -> Option<$ty> {
            let blob = self.get_sized_blob(key, core::mem::size_of::<$ty>())?;
            Some(<$ty>::from_le_bytes(blob.try_into().unwrap()))
        }

        pub fn $set(&mut self, key: &str, v: $ty) {
            self.set_blob(key, &v.to_le_bytes());
        }
    };
}

impl<B: StorageBackend> Storage<B> {
    pub fn new(backend: B, namespace: StorageNamespace) -> Self {
        Self { backend, namespace }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{}", self.namespace as u8, key)
    }

    pub fn get_blob(&self, key: &str) -> Option<Vec<u8>> {
        self.backend.get_blob(&self.full_key(key))
    }

    /// The blob only if it exists with exactly the expected size.
    pub fn get_sized_blob(&self, key: &str, size: usize) -> Option<Vec<u8>> {
        let blob = self.get_blob(key)?;
        if blob.len() != size {
            warn!(
                target: "storage",
                "blob {key} has size {} instead of {size}, ignoring", blob.len()
            );
            return None;
        }
        Some(blob)
    }

    pub fn set_blob(&mut self, key: &str, value: &[u8]) {
        self.backend.set_blob(&self.full_key(key), value);
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_u8(key).map(|v| v != 0)
    }

    pub fn set_bool(&mut self, key: &str, v: bool) {
        self.set_u8(key, u8::from(v));
    }

    int_accessors!(get_u8, set_u8, u8);
    int_accessors!(get_i8, set_i8, i8);
    int_accessors!(get_u16, set_u16, u16);
    int_accessors!(get_i16, set_i16, i16);
    int_accessors!(get_u32, set_u32, u32);
    int_accessors!(get_i32, set_i32, i32);

    pub fn get_str(&self, key: &str) -> Option<String> {
        let blob = self.get_blob(key)?;
        String::from_utf8(blob).ok()
    }

    pub fn set_str(&mut self, key: &str, s: &str) {
        self.set_blob(key, s.as_bytes());
    }

    pub fn get_pairing(&self, key: &str) -> Option<AirPairing> {
        let blob = self.get_blob(key)?;
        serde_json::from_slice(&blob).ok()
    }

    pub fn set_pairing(&mut self, key: &str, pairing: &AirPairing) {
        let blob = serde_json::to_vec(pairing).expect("pairing always serializes");
        self.set_blob(key, &blob);
    }

    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.backend.commit()
    }
}
