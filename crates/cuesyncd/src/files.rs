//! Cue-file resolution for the daemon's upstream endpoints.

use std::future::Future;
use std::sync::{Arc, RwLock};

use cuesync_core::file::CueFile;
use cuesync_protocol::broadcast::DownstreamEndpoint;
use cuesync_protocol::{CueStore, FileResolver};

/// The connection to the parent upstream, while relaying.
#[derive(Clone, Default)]
pub struct ParentLink(Arc<RwLock<Option<Arc<DownstreamEndpoint>>>>);

impl ParentLink {
    pub fn set(&self, parent: Option<Arc<DownstreamEndpoint>>) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = parent;
    }

    pub fn get(&self) -> Option<Arc<DownstreamEndpoint>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Serves files from the local store, falling back to the parent upstream.
/// Files fetched from the parent are verified against their hash and cached.
#[derive(Clone)]
pub struct DaemonFiles {
    store: CueStore,
    parent: ParentLink,
}

impl DaemonFiles {
    pub fn new(store: CueStore, parent: ParentLink) -> Self {
        Self { store, parent }
    }
}

impl FileResolver for DaemonFiles {
    fn get_file(&self, hash: &str) -> impl Future<Output = anyhow::Result<CueFile>> + Send + 'static {
        let store = self.store.clone();
        let parent = self.parent.get();
        let hash = hash.to_string();
        async move {
            if let Some(file) = store.get(&hash) {
                return Ok(CueFile::clone(&file));
            }
            let Some(parent) = parent else {
                anyhow::bail!("unknown file: {hash}");
            };
            let file = parent.get_file(&hash).await?;
            if file.content_hash() != hash {
                anyhow::bail!("parent returned a file that does not match {hash}");
            }
            tracing::debug!(%hash, "cached cue file from parent");
            store.insert(file.clone());
            Ok(file)
        }
    }
}
