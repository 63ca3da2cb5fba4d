//! Script metadata cache (spec §3 ScriptMetadata, §4.6 Script lifecycle).
//!
//! Records one entry per `Debugger.scriptParsed` event under an LRU cap
//! (default 1000), keyed by `scriptId`, with lookup by URL for breakpoint
//! upgrade matching.

use std::collections::HashMap;
use std::path::Path;

use sourcemap::SourceMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ScriptMetadata {
    pub script_id: String,
    pub url: String,
    pub source_map_url: Option<String>,
    pub base_name: String,
    pub directory: String,
}

impl ScriptMetadata {
    pub fn new(script_id: String, url: String, source_map_url: Option<String>) -> Self {
        let path = Path::new(&url);
        let base_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&url)
            .to_string();
        let directory = path
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("")
            .to_string();
        Self {
            script_id,
            url,
            source_map_url,
            base_name,
            directory,
        }
    }

    /// Keys a pending-upgrade lookup might be registered under for this
    /// script: the exact URL, its `file://` form, and its base name. First
    /// match wins when checked in this order by the caller.
    pub fn match_keys(&self) -> Vec<String> {
        let mut keys = vec![self.url.clone(), self.base_name.clone()];
        if !self.url.starts_with("file://") {
            keys.push(format!("file://{}", self.url));
        }
        keys
    }
}

const DEFAULT_CAP: usize = 1000;

pub struct ScriptCache {
    cap: usize,
    by_id: HashMap<String, ScriptMetadata>,
    /// Insertion order, used to evict the least-recently-added entry once
    /// `cap` is exceeded (a simple FIFO approximation of LRU, adequate
    /// since scripts are rarely re-parsed).
    order: Vec<String>,
    loaded_maps: HashMap<String, Arc<SourceMap>>,
}

impl Default for ScriptCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAP)
    }
}

impl ScriptCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            by_id: HashMap::new(),
            order: Vec::new(),
            loaded_maps: HashMap::new(),
        }
    }

    pub fn insert(&mut self, meta: ScriptMetadata) {
        if !self.by_id.contains_key(&meta.script_id) {
            self.order.push(meta.script_id.clone());
        }
        self.by_id.insert(meta.script_id.clone(), meta);
        while self.order.len() > self.cap {
            let evicted = self.order.remove(0);
            self.by_id.remove(&evicted);
        }
    }

    pub fn get(&self, script_id: &str) -> Option<&ScriptMetadata> {
        self.by_id.get(script_id)
    }

    pub fn find_by_match_key(&self, key: &str) -> Option<&ScriptMetadata> {
        self.by_id.values().find(|m| m.match_keys().iter().any(|k| k == key))
    }

    /// Metadata for every parsed script that carries a source map, for
    /// author-source matching (`SourceMapMapper::source_matches_any`)
    /// against a breakpoint recorded under its author path rather than its
    /// generated identity.
    pub fn with_source_maps(&self) -> Vec<ScriptMetadata> {
        self.by_id
            .values()
            .filter(|m| m.source_map_url.is_some())
            .cloned()
            .collect()
    }

    pub fn cache_source_map(&mut self, url: String, map: Arc<SourceMap>) {
        self.loaded_maps.insert(url, map);
    }

    pub fn cached_source_map(&self, url: &str) -> Option<Arc<SourceMap>> {
        self.loaded_maps.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
