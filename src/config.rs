//! Configuration document loading and merging.
//!
//! A single document enumerates the child servers to front, the tool
//! visibility pattern lists, and the reconnection policy. Merge precedence
//! is `defaults ← user-global ← project-local`, last wins, arrays replace,
//! objects merge key-wise.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// When present, dials a remote URL instead of spawning `command`.
    #[serde(default)]
    pub url: Option<String>,
}

/// Either ordered list or name-keyed map, normalized to a `Vec<ServerSpec>`
/// at load time as required of the configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ServersField {
    List(Vec<ServerSpec>),
    Map(HashMap<String, ServerSpecNoName>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ServerSpecNoName {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    1_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    servers: Vec<ServerSpec>,
    #[serde(default)]
    pub expose_tools: Vec<String>,
    #[serde(default)]
    pub hide_tools: Vec<String>,
    #[serde(default)]
    pub always_visible_tools: Vec<String>,
    #[serde(default = "default_true")]
    pub expose_core_tools: bool,
    #[serde(default)]
    pub auto_reconnect: ReconnectPolicy,
    /// Discovery endpoints consumed by an external collaborator; this crate
    /// only carries the value through.
    #[serde(default)]
    pub registries: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            expose_tools: Vec::new(),
            hide_tools: Vec::new(),
            always_visible_tools: Vec::new(),
            expose_core_tools: true,
            auto_reconnect: ReconnectPolicy::default(),
            registries: Vec::new(),
        }
    }
}

impl Config {
    pub fn servers(&self) -> &[ServerSpec] {
        &self.servers
    }

    /// Builder hook for constructing a `Config` programmatically (embedding,
    /// tests) rather than via `load`.
    pub fn with_servers(mut self, servers: Vec<ServerSpec>) -> Self {
        self.servers = servers;
        self
    }

    /// Loads `path`, falling back to an empty document when it does not
    /// exist so `--config` remains optional. `~` is expanded first, so
    /// `--config ~/funnel-mcp.toml` resolves the same way the teacher's
    /// `shellexpand::tilde` use for adapter paths does.
    pub fn load_file(path: &Path) -> Result<serde_json::Value> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let path = Path::new(&expanded);
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Value::Object(Default::default()))
            }
            Err(e) => return Err(Error::Io(e)),
        };
        let value = if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&text).map_err(Error::Json)?
        } else {
            toml::from_str::<toml::Value>(&text)
                .map_err(|e| Error::Config(format!("invalid TOML in {}: {e}", path.display())))?
                .try_into()
                .map_err(|e| Error::Config(format!("{e}")))?
        };
        Ok(value)
    }

    /// Loads and merges `defaults ← user-global ← project-local ← explicit`,
    /// then deserializes into the typed `Config`, normalizing the `servers`
    /// field to a list regardless of whether it was authored as a list or a
    /// name-keyed map.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::Value::Object(Default::default());

        if let Some(home) = dirs_home() {
            let user_global = home.join(".config/funnel-mcp/config.toml");
            merge_into(&mut merged, Self::load_file(&user_global)?);
        }

        let project_local = PathBuf::from(".funnel-mcp.toml");
        merge_into(&mut merged, Self::load_file(&project_local)?);

        if let Some(p) = explicit {
            merge_into(&mut merged, Self::load_file(p)?);
        }

        let servers_field: Option<ServersField> = merged
            .get("servers")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::Json)?;
        let servers = match servers_field {
            None => Vec::new(),
            Some(ServersField::List(list)) => list,
            Some(ServersField::Map(map)) => map
                .into_iter()
                .map(|(name, spec)| ServerSpec {
                    name,
                    command: spec.command,
                    args: spec.args,
                    env: spec.env,
                    url: spec.url,
                })
                .collect(),
        };

        let mut cfg: Config = serde_json::from_value(merged).map_err(Error::Json)?;
        cfg.servers = servers;
        Ok(cfg)
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Recursive merge: objects merge key-wise, arrays and scalars replace.
fn merge_into(base: &mut serde_json::Value, overlay: serde_json::Value) {
    use serde_json::Value;
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge_into(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}
