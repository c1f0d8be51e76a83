use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// The storage partition a key resolves to. Opaque to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSubchunk {
    pub chunk: i32,
    pub subchunk: i32,
}

impl ChunkSubchunk {
    pub fn new(chunk: i32, subchunk: i32) -> Self {
        ChunkSubchunk { chunk, subchunk }
    }
}

impl std::fmt::Display for ChunkSubchunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk={} subchunk={}", self.chunk, self.subchunk)
    }
}

/// Result of a key insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The key was new and has been stored.
    Inserted,
    /// The key already existed; carries the mapping that is staying in place.
    Duplicate(ChunkSubchunk),
}

/// In-memory association from key to `(chunk, subchunk)`.
///
/// Inserts are first-writer-wins: a repeat insert never overwrites, it hands
/// back the stored mapping so the caller can report the duplicate. One lock
/// serializes writers; readers share it.
#[derive(Debug, Default)]
pub struct KeyMap {
    entries: RwLock<HashMap<String, ChunkSubchunk>>,
}

impl KeyMap {
    pub fn new() -> Self {
        KeyMap::default()
    }

    pub fn insert(&self, key: &str, info: ChunkSubchunk) -> InsertOutcome {
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(existing) => InsertOutcome::Duplicate(*existing),
            None => {
                entries.insert(key.to_string(), info);
                InsertOutcome::Inserted
            }
        }
    }

    pub fn lookup(&self, key: &str) -> Option<ChunkSubchunk> {
        self.entries.read().unwrap().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}
