//! Content-addressed cue-file store.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use cuesync_core::file::{prepare_file, CueFile};
use dashmap::DashMap;

/// Looks up cue files for an upstream endpoint.
pub trait FileResolver: Send + Sync + 'static {
    /// Fails for unknown hashes; the error message is sent back to the peer.
    fn get_file(&self, hash: &str) -> impl Future<Output = anyhow::Result<CueFile>> + Send + 'static;
}

/// In-memory store of prepared cue files keyed by content hash. Files can
/// also be found by a short name, usually the stem of the file they were
/// loaded from. Cheap to clone.
#[derive(Clone, Default)]
pub struct CueStore {
    files: Arc<DashMap<String, Arc<CueFile>>>,
    names: Arc<DashMap<String, String>>,
}

impl CueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a file. Returns its content hash.
    pub fn insert(&self, file: CueFile) -> String {
        let hash = file.content_hash();
        self.files.insert(hash.clone(), Arc::new(file));
        hash
    }

    pub fn insert_named(&self, name: &str, file: CueFile) -> String {
        let hash = self.insert(file);
        self.names.insert(name.to_string(), hash.clone());
        hash
    }

    pub fn get(&self, hash: &str) -> Option<Arc<CueFile>> {
        self.files.get(hash).map(|f| f.value().clone())
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.files.contains_key(hash)
    }

    pub fn hash_for_name(&self, name: &str) -> Option<String> {
        self.names.get(name).map(|h| h.value().clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Load every `*.json` file in `dir`, named by file stem. Files that
    /// fail to parse are skipped with a warning. Returns the number loaded.
    pub fn load_dir(&self, dir: &Path) -> anyhow::Result<usize> {
        let entries = std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        let mut loaded = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|text| serde_json::from_str::<CueFile>(&text).map_err(anyhow::Error::from));
            match parsed {
                Ok(file) => {
                    let hash = self.insert_named(stem, prepare_file(file));
                    tracing::debug!(name = stem, hash = %hash, "loaded cue file");
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cue file");
                }
            }
        }
        Ok(loaded)
    }
}

impl FileResolver for CueStore {
    fn get_file(&self, hash: &str) -> impl Future<Output = anyhow::Result<CueFile>> + Send + 'static {
        let found = self.get(hash);
        let hash = hash.to_string();
        async move {
            found
                .map(|file| CueFile::clone(&file))
                .ok_or_else(|| anyhow::anyhow!("unknown file: {hash}"))
        }
    }
}
