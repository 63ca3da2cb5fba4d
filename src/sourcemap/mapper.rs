//! Source Map Mapper (spec §4.5).
//!
//! Loads a source map from `file://`, `http(s)://`, or inline `data:` and
//! translates between author (original) and generated coordinates. Parsed
//! maps are cached by their canonical key (the resolved map URL/path)
//! because a Debug Session consults the same map repeatedly while
//! upgrading pending breakpoints.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use sourcemap::SourceMap;
use tokio::sync::RwLock;

use crate::{Error, Result};

/// 10 MiB, as specified: a source map fetched over this size is treated as
/// unavailable rather than partially buffered.
const MAX_SOURCE_MAP_BYTES: usize = 10 * 1024 * 1024;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub line: u32,
    pub column: u32,
}

pub struct SourceMapMapper {
    cache: RwLock<HashMap<String, Arc<SourceMap>>>,
    http: reqwest::Client,
}

impl Default for SourceMapMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMapMapper {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Loads and parses the map at `reference`, or returns the cached
    /// parse. `reference` may be a `file://` path, an `http(s)://` URL, or
    /// an inline `data:` URI (as commonly embedded via
    /// `//# sourceMappingURL=data:...;base64,...`).
    pub async fn load(&self, reference: &str) -> Result<Arc<SourceMap>> {
        if let Some(cached) = self.cache.read().await.get(reference) {
            return Ok(cached.clone());
        }

        let bytes = if let Some(data) = reference.strip_prefix("data:") {
            decode_data_uri(data)?
        } else if let Some(path) = reference.strip_prefix("file://") {
            tokio::fs::read(path).await.map_err(Error::Io)?
        } else if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_http(reference).await?
        } else {
            // Bare path, no scheme.
            tokio::fs::read(reference).await.map_err(Error::Io)?
        };

        if bytes.len() > MAX_SOURCE_MAP_BYTES {
            return Err(Error::SourceMap(format!(
                "source map {reference} exceeds {MAX_SOURCE_MAP_BYTES} byte cap, unavailable"
            )));
        }

        let map = SourceMap::from_reader(Cursor::new(bytes))
            .map_err(|e| Error::SourceMap(format!("failed to parse {reference}: {e}")))?;
        let map = Arc::new(map);
        self.cache
            .write()
            .await
            .insert(reference.to_string(), map.clone());
        Ok(map)
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>> {
        let response = tokio::time::timeout(FETCH_TIMEOUT, self.http.get(url).send())
            .await
            .map_err(|_| Error::SourceMap(format!("timed out fetching {url}")))?
            .map_err(|e| Error::SourceMap(format!("failed to fetch {url}: {e}")))?;

        if let Some(len) = response.content_length() {
            if len as usize > MAX_SOURCE_MAP_BYTES {
                return Err(Error::SourceMap(format!(
                    "source map {url} declares {len} bytes, exceeds cap, unavailable"
                )));
            }
        }

        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        use futures_util::StreamExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::SourceMap(format!("stream error on {url}: {e}")))?;
            buf.extend_from_slice(&chunk);
            if buf.len() > MAX_SOURCE_MAP_BYTES {
                return Err(Error::SourceMap(format!(
                    "source map {url} exceeded {MAX_SOURCE_MAP_BYTES} bytes mid-stream, unavailable"
                )));
            }
        }
        Ok(buf)
    }

    /// Translates generated (0-based line, 0-based column) coordinates to
    /// the original author source, if the map covers that position.
    pub fn get_original(map: &SourceMap, generated: Coord) -> Option<(String, Coord)> {
        let token = map.lookup_token(generated.line, generated.column)?;
        let source = token.get_source()?.to_string();
        Some((
            source,
            Coord {
                line: token.get_src_line(),
                column: token.get_src_col(),
            },
        ))
    }

    /// Translates author-source (0-based line, 0-based column)
    /// coordinates to generated coordinates by scanning for the token
    /// whose source matches `source_id` and whose position is the closest
    /// at-or-after the requested original line/column. Returns `None` if no
    /// token maps to that source file.
    pub fn get_generated(map: &SourceMap, source_id: &str, original: Coord) -> Option<Coord> {
        let mut best: Option<(u32, u32, Coord)> = None;
        for token in map.tokens() {
            let Some(src) = token.get_source() else {
                continue;
            };
            if !source_matches(src, source_id) {
                continue;
            }
            let src_line = token.get_src_line();
            let src_col = token.get_src_col();
            if src_line < original.line || (src_line == original.line && src_col < original.column) {
                continue;
            }
            let candidate = (
                src_line,
                src_col,
                Coord {
                    line: token.get_dst_line(),
                    column: token.get_dst_col(),
                },
            );
            best = match best {
                None => Some(candidate),
                Some(current) if (candidate.0, candidate.1) < (current.0, current.1) => Some(candidate),
                Some(current) => Some(current),
            };
        }
        best.map(|(_, _, coord)| coord)
    }

    /// True if any of `map`'s author `sources` entries identifies
    /// `source_id` (exact, suffix, or basename match). Used to match a
    /// pending breakpoint upgrade keyed by an author path (`app.ts`)
    /// against a script that parsed under its generated identity
    /// (`dist/app.js`).
    pub fn source_matches_any(map: &SourceMap, source_id: &str) -> bool {
        map.sources().any(|s| source_matches(s, source_id))
    }
}

fn source_matches(candidate: &str, source_id: &str) -> bool {
    candidate == source_id
        || candidate.ends_with(source_id)
        || std::path::Path::new(candidate)
            .file_name()
            .and_then(|n| n.to_str())
            == std::path::Path::new(source_id)
                .file_name()
                .and_then(|n| n.to_str())
}

fn decode_data_uri(data: &str) -> Result<Vec<u8>> {
    let (_meta, payload) = data
        .split_once(',')
        .ok_or_else(|| Error::SourceMap("malformed data: URI".to_string()))?;
    if data.contains(";base64") {
        base64_decode(payload).map_err(|e| Error::SourceMap(format!("bad base64 in data: URI: {e}")))
    } else {
        Ok(urlencoding_decode(payload).into_bytes())
    }
}

fn urlencoding_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8_lossy()
        .into_owned()
}

fn base64_decode(s: &str) -> std::result::Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| e.to_string())
}
