//! Debug Session (spec §4.6).
//!
//! Owns a spawned runtime process (if any) and its CDP client, drives the
//! CDP handshake, and manages breakpoints, pause state, scopes, evaluation,
//! and stepping. Upgrades pending breakpoints as scripts parse.
//!
//! Event handlers for `Debugger.paused`/`resumed`/`scriptParsed` and
//! `Runtime.consoleAPICalled`/`exceptionThrown` are registered *before* the
//! CDP handshake runs. Registering after would race: a pause that occurs
//! between `Debugger.enable` and handler registration would never update
//! `model.state`, leaving a session stuck reporting `Running` while the
//! debuggee sits paused. Do not reorder this.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use crate::cdp::client::CdpClient;
use crate::cdp::types::{
    CallFrame, EvaluateOnCallFrameParams, EvaluateResult, GetPossibleBreakpointsParams,
    GetPossibleBreakpointsResult, GetPropertiesParams, GetPropertiesResult, Location, RemoteObject,
    RuntimeEvaluateParams, Scope, ScriptParsedParams, SetBreakpointByUrlParams,
    SetBreakpointByUrlResult, SetBreakpointParams, SetBreakpointResult,
};
use crate::debug::output::{OutputBuffer, StdioStream};
use crate::debug::scripts::{ScriptCache, ScriptMetadata};
use crate::debug::state::{
    BreakpointSpec, PauseDetails, PendingUpgrade, ResolvedLocation, ResumeIntent, RestingState,
    SessionModel, SessionState,
};
use crate::sourcemap::{Coord, SourceMapMapper};
use crate::{Error, Result};

const VARIABLE_MAX_DEPTH_DEFAULT: usize = 3;
const ARRAY_TRUNCATE_AT: usize = 100;
const ARRAY_SHOW: usize = 50;
const OBJECT_TRUNCATE_AT: usize = 50;
const MAP_SET_TRUNCATE_AT: usize = 20;
const BREAKPOINT_RESOLUTION_POLL: Duration = Duration::from_millis(100);
const BREAKPOINT_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub enum SessionTarget {
    /// Spawn a runtime with `--inspect-brk` and the given entry file.
    Launch {
        runtime: String,
        entry: String,
        argv: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },
    /// Dial an already-running inspector directly.
    Attach { websocket_url: String },
}

#[derive(Debug, Clone)]
pub struct DebugSessionConfig {
    pub target: SessionTarget,
    pub initial_breakpoints: Vec<BreakpointSpec>,
    pub resume_after_configure: bool,
    pub script_cache_cap: usize,
    pub timeout: Duration,
    pub output_retention: usize,
}

impl Default for DebugSessionConfig {
    fn default() -> Self {
        Self {
            target: SessionTarget::Attach {
                websocket_url: String::new(),
            },
            initial_breakpoints: Vec::new(),
            resume_after_configure: true,
            script_cache_cap: 1000,
            timeout: Duration::from_secs(30),
            output_retention: 10_000,
        }
    }
}

struct PauseWaiters {
    notify: Notify,
}

/// A Debug Session. The `SessionManager` stores one `Arc<DebugSession>` per
/// session id and clones the `Arc`, not the session itself.
pub struct DebugSession {
    pub id: String,
    config: DebugSessionConfig,
    client: RwLock<Option<CdpClient>>,
    child: tokio::sync::Mutex<Option<Child>>,
    model: RwLock<SessionModel>,
    scripts: RwLock<ScriptCache>,
    output: RwLock<OutputBuffer>,
    source_maps: SourceMapMapper,
    pause_waiters: PauseWaiters,
    last_activity: RwLock<Instant>,
}

impl DebugSession {
    /// Steps 1-8 of the connect lifecycle. Returns once the session has
    /// applied its initial breakpoints and settled into a resting state.
    pub async fn connect(id: String, config: DebugSessionConfig) -> Result<Arc<Self>> {
        let session = Arc::new(Self {
            id: id.clone(),
            model: RwLock::new(SessionModel::new()),
            scripts: RwLock::new(ScriptCache::new(config.script_cache_cap)),
            output: RwLock::new(OutputBuffer::new(config.output_retention)),
            source_maps: SourceMapMapper::new(),
            client: RwLock::new(None),
            child: tokio::sync::Mutex::new(None),
            pause_waiters: PauseWaiters {
                notify: Notify::new(),
            },
            last_activity: RwLock::new(Instant::now()),
            config,
        });

        let ws_url = session.spawn_or_attach().await?;

        let (client, _lifecycle) = CdpClient::connect(&ws_url, Duration::from_secs(10)).await?;
        session.register_event_handlers(&client).await;
        *session.client.write().await = Some(client);

        session.run_handshake().await?;

        Ok(session)
    }

    async fn spawn_or_attach(self: &Arc<Self>) -> Result<String> {
        match &self.config.target {
            SessionTarget::Attach { websocket_url } => Ok(websocket_url.clone()),
            SessionTarget::Launch {
                runtime,
                entry,
                argv,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(runtime);
                cmd.arg("--inspect-brk=0").arg(entry).args(argv);
                for (k, v) in env {
                    cmd.env(k, v);
                }
                if let Some(cwd) = cwd {
                    cmd.current_dir(cwd);
                }
                cmd.stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);

                let mut child = cmd
                    .spawn()
                    .map_err(|e| Error::Process(format!("failed to spawn {runtime}: {e}")))?;

                // Node prints "Debugger listening on ws://..." to stderr once
                // the inspector socket is ready; there is no other portable
                // discovery channel for a freshly spawned process.
                let stderr = child
                    .stderr
                    .take()
                    .ok_or_else(|| Error::Process("child stderr not piped".to_string()))?;
                let mut lines = BufReader::new(stderr).lines();
                let ws_url = tokio::time::timeout(self.config.timeout, async {
                    while let Ok(Some(line)) = lines.next_line().await {
                        info!(session = %self.id, "child stderr: {line}");
                        if let Some(idx) = line.find("ws://") {
                            return Ok(line[idx..].trim().to_string());
                        }
                    }
                    Err(Error::Process(
                        "child exited before printing an inspector URL".to_string(),
                    ))
                })
                .await
                .map_err(|_| Error::ConnectionTimeout(self.config.timeout))??;

                self.pump_child_stdout(child.stdout.take());
                *self.child.lock().await = Some(child);
                Ok(ws_url)
            }
        }
    }

    fn pump_child_stdout(self: &Arc<Self>, stdout: Option<tokio::process::ChildStdout>) {
        let Some(stdout) = stdout else { return };
        let this = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                this.output
                    .write()
                    .await
                    .push_stdio(StdioStream::Stdout, line);
            }
        });
    }

    async fn register_event_handlers(self: &Arc<Self>, client: &CdpClient) {
        let this = self.clone();
        client
            .on("Debugger.paused", move |params| {
                let this = this.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    this.on_paused(params).await;
                });
            })
            .await;

        let this = self.clone();
        client
            .on("Debugger.resumed", move |_params| {
                let this = this.clone();
                tokio::spawn(async move {
                    this.on_resumed().await;
                });
            })
            .await;

        let this = self.clone();
        client
            .on("Debugger.scriptParsed", move |params| {
                let this = this.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    this.on_script_parsed(params).await;
                });
            })
            .await;

        let this = self.clone();
        client
            .on("Runtime.consoleAPICalled", move |params| {
                let this = this.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    this.on_console_api(params).await;
                });
            })
            .await;

        let this = self.clone();
        client
            .on("Runtime.exceptionThrown", move |params| {
                let this = this.clone();
                let params = params.clone();
                tokio::spawn(async move {
                    this.on_exception(params).await;
                });
            })
            .await;
    }

    async fn on_paused(&self, params: Value) {
        let parsed: crate::cdp::types::PausedParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id, "malformed Debugger.paused params: {e}");
                return;
            }
        };
        let details = PauseDetails {
            reason: parsed.reason,
            call_frames: parsed.call_frames,
            hit_breakpoints: parsed.hit_breakpoints,
            exception_text: None,
        };
        self.model.write().await.set_state(SessionState::Paused(details));
        *self.last_activity.write().await = Instant::now();
        self.pause_waiters.notify.notify_waiters();
    }

    async fn on_resumed(&self) {
        self.model.write().await.set_state(SessionState::Running);
        *self.last_activity.write().await = Instant::now();
        self.pause_waiters.notify.notify_waiters();
    }

    async fn on_script_parsed(self: &Arc<Self>, params: Value) {
        let parsed: ScriptParsedParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = %self.id, "malformed Debugger.scriptParsed params: {e}");
                return;
            }
        };
        let meta = ScriptMetadata::new(
            parsed.script_id.clone(),
            parsed.url.clone(),
            parsed.source_map_url.clone(),
        );
        let match_keys = meta.match_keys();
        self.scripts.write().await.insert(meta);

        let pending_key = {
            let model = self.model.read().await;
            match_keys
                .iter()
                .find(|k| model.pending_upgrades.contains_key(*k))
                .cloned()
        };
        let pending_key = match pending_key {
            Some(k) => Some(k),
            None => self.match_pending_upgrade_by_source_map(&parsed).await,
        };
        let Some(key) = pending_key else { return };
        if let Err(e) = self.try_upgrade_breakpoint(&key, &parsed).await {
            warn!(session = %self.id, "breakpoint upgrade for {key} failed, keeping fallback: {e}");
        }
    }

    /// Matches a pending breakpoint upgrade against the author `sources` of
    /// `script`'s source map. A breakpoint set on `app.ts` is recorded in
    /// `pending_upgrades` under that author path, which never equals any of
    /// a compiled script's own URL/basename/`file://` match keys, so the
    /// upgrade can only be found by asking the map itself which author
    /// sources it covers (spec §9 pending-breakpoint upgrade).
    async fn match_pending_upgrade_by_source_map(&self, script: &ScriptParsedParams) -> Option<String> {
        let map_url = script.source_map_url.as_ref()?;
        let map = self.source_maps.load(map_url).await.ok()?;
        let model = self.model.read().await;
        model
            .pending_upgrades
            .keys()
            .find(|k| SourceMapMapper::source_matches_any(&map, k))
            .cloned()
    }

    async fn try_upgrade_breakpoint(&self, key: &str, script: &ScriptParsedParams) -> Result<()> {
        let pending = {
            let mut model = self.model.write().await;
            model.pending_upgrades.remove(key)
        };
        let Some(pending) = pending else { return Ok(()) };

        let mut target = Coord {
            line: pending.spec.line_number,
            column: pending.spec.column_number.unwrap_or(0),
        };

        if let Some(map_url) = &script.source_map_url {
            if let Ok(map) = self.source_maps.load(map_url).await {
                if let Some(generated) = SourceMapMapper::get_generated(
                    &map,
                    key,
                    Coord {
                        line: pending.spec.line_number,
                        column: pending.spec.column_number.unwrap_or(0),
                    },
                ) {
                    target = generated;
                }
            }
        }

        let snapped = self.snap_to_possible_breakpoint(&script.script_id, target).await?;

        let client = self.require_client().await?;
        let result: SetBreakpointResult = client
            .send(
                "Debugger.setBreakpoint",
                Some(serde_json::to_value(SetBreakpointParams {
                    location: Location {
                        script_id: script.script_id.clone(),
                        line_number: snapped.line,
                        column_number: Some(snapped.column),
                    },
                    condition: pending.spec.condition.clone(),
                })?),
            )
            .await?;

        let _ = client
            .send::<Value>(
                "Debugger.removeBreakpoint",
                Some(serde_json::json!({"breakpointId": pending.breakpoint_id})),
            )
            .await;

        let mut model = self.model.write().await;
        model.add_breakpoint(
            result.breakpoint_id,
            pending.spec,
            vec![ResolvedLocation {
                script_id: result.actual_location.script_id,
                line_number: result.actual_location.line_number,
                column_number: result.actual_location.column_number.unwrap_or(0),
            }],
        );
        Ok(())
    }

    async fn snap_to_possible_breakpoint(&self, script_id: &str, coord: Coord) -> Result<Coord> {
        let client = self.require_client().await?;
        let result: GetPossibleBreakpointsResult = client
            .send(
                "Debugger.getPossibleBreakpoints",
                Some(serde_json::to_value(GetPossibleBreakpointsParams {
                    start: Location {
                        script_id: script_id.to_string(),
                        line_number: coord.line,
                        column_number: Some(coord.column),
                    },
                    end: None,
                    restrict_to_function: false,
                })?),
            )
            .await?;
        Ok(result
            .locations
            .into_iter()
            .next()
            .map(|loc| Coord {
                line: loc.line_number,
                column: loc.column_number.unwrap_or(0),
            })
            .unwrap_or(coord))
    }

    async fn on_console_api(&self, params: Value) {
        let level = params
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("log")
            .to_string();
        let args: Vec<Value> = params
            .get("args")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let text = args
            .iter()
            .map(describe_remote_value)
            .collect::<Vec<_>>()
            .join(" ");
        self.output.write().await.push_console(level, text, args);
    }

    async fn on_exception(&self, params: Value) {
        let text = params
            .pointer("/exceptionDetails/text")
            .and_then(|v| v.as_str())
            .unwrap_or("uncaught exception")
            .to_string();
        let details = params.get("exceptionDetails").cloned();
        self.output.write().await.push_exception(text, details);
    }

    /// Steps 2-8: enable domains, install internal breakpoints, trigger
    /// the initial pause, apply user breakpoints, and settle into the
    /// session's first externally-visible state.
    async fn run_handshake(self: &Arc<Self>) -> Result<()> {
        let client = self.require_client().await?;
        client.send::<Value>("Runtime.enable", None).await?;
        client.send::<Value>("Debugger.enable", None).await?;

        let mut internal_ids = Vec::new();
        if let SessionTarget::Launch { entry, .. } = &self.config.target {
            internal_ids.push(self.set_internal_breakpoint(entry).await?);
        }
        for spec in &self.config.initial_breakpoints {
            if let Some(url) = &spec.url {
                internal_ids.push(self.set_internal_breakpoint(url).await?);
            }
        }

        client.send::<Value>("Debugger.pause", None).await?;
        client
            .send::<Value>("Runtime.runIfWaitingForDebugger", None)
            .await?;

        self.wait_for_pause(self.config.timeout).await?;
        self.resume().await?;
        self.wait_for_pause(self.config.timeout).await?;

        let mut any_resolved = false;
        for spec in self.config.initial_breakpoints.clone() {
            if self.set_breakpoint(spec).await.is_ok() {
                any_resolved = true;
            }
        }

        let deadline = Instant::now() + BREAKPOINT_RESOLUTION_TIMEOUT;
        while Instant::now() < deadline {
            let resolved = self
                .model
                .read()
                .await
                .list_breakpoints()
                .iter()
                .all(|b| b.is_resolved());
            if resolved {
                break;
            }
            tokio::time::sleep(BREAKPOINT_RESOLUTION_POLL).await;
        }

        for id in internal_ids {
            let _ = client
                .send::<Value>(
                    "Debugger.removeBreakpoint",
                    Some(serde_json::json!({"breakpointId": id})),
                )
                .await;
        }

        if any_resolved && self.config.resume_after_configure {
            self.resume().await?;
            self.wait_for_pause(self.config.timeout).await?;
        } else if !self.model.read().await.state.is_paused() {
            self.resume().await?;
        }

        Ok(())
    }

    async fn set_internal_breakpoint(&self, url: &str) -> Result<String> {
        let client = self.require_client().await?;
        let result: SetBreakpointByUrlResult = client
            .send(
                "Debugger.setBreakpointByUrl",
                Some(serde_json::to_value(SetBreakpointByUrlParams {
                    line_number: 0,
                    url: Some(url.to_string()),
                    url_regex: None,
                    column_number: None,
                    condition: None,
                })?),
            )
            .await?;
        Ok(result.breakpoint_id)
    }

    async fn wait_for_pause(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.pause_waiters.notify.notified())
            .await
            .map_err(|_| Error::Capacity("pause wait timed out".to_string()))?;
        Ok(())
    }

    async fn require_client(&self) -> Result<CdpClient> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::InvalidState("session has no active CDP client".to_string()))
    }

    // -- Pause/resume state machine (spec §4.6, §9 command-vs-event) --

    async fn transition(&self, from: RestingState, intent: ResumeIntent) {
        self.model
            .write()
            .await
            .set_state(SessionState::Transitioning { from, intent });
    }

    pub async fn resume(&self) -> Result<()> {
        self.transition(RestingState::Paused, ResumeIntent::Resume).await;
        self.require_client().await?.send::<Value>("Debugger.resume", None).await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        self.transition(RestingState::Running, ResumeIntent::Pause).await;
        self.require_client().await?.send::<Value>("Debugger.pause", None).await?;
        Ok(())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.transition(RestingState::Paused, ResumeIntent::Resume).await;
        self.require_client().await?.send::<Value>("Debugger.stepOver", None).await?;
        Ok(())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.transition(RestingState::Paused, ResumeIntent::Resume).await;
        self.require_client().await?.send::<Value>("Debugger.stepInto", None).await?;
        Ok(())
    }

    pub async fn step_out(&self) -> Result<()> {
        self.transition(RestingState::Paused, ResumeIntent::Resume).await;
        self.require_client().await?.send::<Value>("Debugger.stepOut", None).await?;
        Ok(())
    }

    pub async fn continue_to_location(&self, location: Location) -> Result<()> {
        self.transition(RestingState::Paused, ResumeIntent::Resume).await;
        self.require_client()
            .await?
            .send::<Value>(
                "Debugger.continueToLocation",
                Some(serde_json::json!({"location": location})),
            )
            .await?;
        Ok(())
    }

    // -- Breakpoints (spec §4.6 step 6, §9 Pending-breakpoint upgrade) --

    /// Resolves `source_id` to already-parsed script metadata, first by the
    /// script's own generated identity, then — for scripts carrying a
    /// source map — by scanning the map's author `sources` so a breakpoint
    /// requested against `app.ts` finds a script that parsed as
    /// `dist/app.js`.
    async fn resolve_script_by_source(&self, source_id: &str) -> Option<ScriptMetadata> {
        if let Some(meta) = self.scripts.read().await.find_by_match_key(source_id).cloned() {
            return Some(meta);
        }
        let candidates = self.scripts.read().await.with_source_maps();
        for meta in candidates {
            let Some(map_url) = &meta.source_map_url else {
                continue;
            };
            if let Ok(map) = self.source_maps.load(map_url).await {
                if SourceMapMapper::source_matches_any(&map, source_id) {
                    return Some(meta);
                }
            }
        }
        None
    }

    pub async fn set_breakpoint(&self, spec: BreakpointSpec) -> Result<String> {
        let source_id = match &spec.url {
            Some(url) => normalize_file_path(url)?,
            None => spec
                .script_id
                .clone()
                .ok_or_else(|| Error::InvalidRequest("breakpoint spec needs url or scriptId".to_string()))?,
        };

        let script_meta = self.resolve_script_by_source(&source_id).await;

        if let Some(meta) = script_meta {
            if let Some(map_url) = &meta.source_map_url {
                if let Ok(map) = self.source_maps.load(map_url).await {
                    if let Some(generated) = SourceMapMapper::get_generated(
                        &map,
                        &source_id,
                        Coord {
                            line: spec.line_number,
                            column: spec.column_number.unwrap_or(0),
                        },
                    ) {
                        let snapped = self.snap_to_possible_breakpoint(&meta.script_id, generated).await?;
                        let client = self.require_client().await?;
                        let result: SetBreakpointResult = client
                            .send(
                                "Debugger.setBreakpoint",
                                Some(serde_json::to_value(SetBreakpointParams {
                                    location: Location {
                                        script_id: meta.script_id.clone(),
                                        line_number: snapped.line,
                                        column_number: Some(snapped.column),
                                    },
                                    condition: spec.condition.clone(),
                                })?),
                            )
                            .await?;
                        let mut model = self.model.write().await;
                        model.add_breakpoint(
                            result.breakpoint_id.clone(),
                            spec,
                            vec![ResolvedLocation {
                                script_id: result.actual_location.script_id,
                                line_number: result.actual_location.line_number,
                                column_number: result.actual_location.column_number.unwrap_or(0),
                            }],
                        );
                        return Ok(result.breakpoint_id);
                    }
                }
            }
        }

        // Fallback: by-URL registration, recorded as pending for upgrade
        // once the owning script parses and (if present) its map resolves.
        let client = self.require_client().await?;
        let result: SetBreakpointByUrlResult = client
            .send(
                "Debugger.setBreakpointByUrl",
                Some(serde_json::to_value(SetBreakpointByUrlParams {
                    line_number: spec.line_number,
                    url: spec.url.clone(),
                    url_regex: None,
                    column_number: spec.column_number,
                    condition: spec.condition.clone(),
                })?),
            )
            .await?;

        let resolved = result
            .locations
            .iter()
            .map(|l| ResolvedLocation {
                script_id: l.script_id.clone(),
                line_number: l.line_number,
                column_number: l.column_number.unwrap_or(0),
            })
            .collect::<Vec<_>>();

        let mut model = self.model.write().await;
        if resolved.is_empty() {
            model.pending_upgrades.insert(
                source_id,
                PendingUpgrade {
                    breakpoint_id: result.breakpoint_id.clone(),
                    spec: spec.clone(),
                },
            );
        }
        model.add_breakpoint(result.breakpoint_id.clone(), spec, resolved);
        Ok(result.breakpoint_id)
    }

    pub async fn remove_breakpoint(&self, id: &str) -> Result<()> {
        self.require_client()
            .await?
            .send::<Value>(
                "Debugger.removeBreakpoint",
                Some(serde_json::json!({"breakpointId": id})),
            )
            .await?;
        self.model.write().await.remove_breakpoint(id);
        Ok(())
    }

    // -- Inspection (spec §4.6 Inspection) --

    pub async fn get_stacktrace(&self) -> Vec<CallFrame> {
        match &self.model.read().await.state {
            SessionState::Paused(details) => details.call_frames.clone(),
            _ => Vec::new(),
        }
    }

    pub async fn get_scopes(&self, frame_idx: usize, include_global: bool) -> Result<Vec<Scope>> {
        let model = self.model.read().await;
        let SessionState::Paused(details) = &model.state else {
            return Err(Error::InvalidState("session is not paused".to_string()));
        };
        let frame = details
            .call_frames
            .get(frame_idx)
            .ok_or_else(|| Error::InvalidRequest(format!("no call frame at index {frame_idx}")))?;
        let scopes = frame
            .scope_chain
            .iter()
            .filter(|s| include_global || s.scope_type != "global")
            .cloned()
            .collect();
        Ok(scopes)
    }

    pub async fn get_variables(
        &self,
        path: &str,
        frame_idx: usize,
        max_depth: Option<usize>,
    ) -> Result<Value> {
        let scopes = self.get_scopes(frame_idx, true).await?;
        let client = self.require_client().await?;

        for scope in &scopes {
            let root_name = path.split('.').next().unwrap_or(path);
            let Some(object_id) = &scope.object.object_id else {
                continue;
            };
            let props: GetPropertiesResult = client
                .send(
                    "Runtime.getProperties",
                    Some(serde_json::to_value(GetPropertiesParams {
                        object_id: object_id.clone(),
                        own_properties: true,
                    })?),
                )
                .await?;
            if let Some(found) = props.result.into_iter().find(|p| p.name == root_name) {
                let Some(value) = found.value else { continue };
                let mut current = value;
                for segment in path.splitn(2, '.').nth(1).map(|s| s.split('.')).into_iter().flatten() {
                    current = self.descend(&client, &current, segment).await?;
                }
                let mut visited = std::collections::HashSet::new();
                return self
                    .enrich(&client, &current, max_depth.unwrap_or(VARIABLE_MAX_DEPTH_DEFAULT), &mut visited)
                    .await;
            }
        }
        Err(Error::InvalidRequest(format!("variable not found on path: {path}")))
    }

    async fn descend(&self, client: &CdpClient, value: &RemoteObject, segment: &str) -> Result<RemoteObject> {
        let Some(object_id) = &value.object_id else {
            return Err(Error::InvalidRequest(format!("cannot index into {segment}: not an object")));
        };
        let props: GetPropertiesResult = client
            .send(
                "Runtime.getProperties",
                Some(serde_json::to_value(GetPropertiesParams {
                    object_id: object_id.clone(),
                    own_properties: true,
                })?),
            )
            .await?;
        props
            .result
            .into_iter()
            .find(|p| p.name == segment)
            .and_then(|p| p.value)
            .ok_or_else(|| Error::InvalidRequest(format!("no property named {segment}")))
    }

    /// Walks a resolved `RemoteObject` into a JSON value, applying the
    /// truncation rules (arrays >100 shown as 50, objects >50 properties
    /// shown as 50) and a cycle guard keyed by `objectId` identity rather
    /// than deep equality.
    fn enrich<'a>(
        &'a self,
        client: &'a CdpClient,
        value: &'a RemoteObject,
        depth: usize,
        visited: &'a mut std::collections::HashSet<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(v) = &value.value {
                return Ok(v.clone());
            }
            let Some(object_id) = &value.object_id else {
                return Ok(Value::String(
                    value.description.clone().unwrap_or_else(|| "undefined".to_string()),
                ));
            };

            if let Some(tagged) = tagged_representation(value) {
                return Ok(tagged);
            }

            if !visited.insert(object_id.clone()) {
                return Ok(serde_json::json!("[Circular]"));
            }

            if depth == 0 {
                return Ok(Value::String(
                    value.description.clone().unwrap_or_else(|| "[Object]".to_string()),
                ));
            }

            let props: GetPropertiesResult = client
                .send(
                    "Runtime.getProperties",
                    Some(serde_json::to_value(GetPropertiesParams {
                        object_id: object_id.clone(),
                        own_properties: true,
                    })?),
                )
                .await?;

            let is_array =
                value.class_name.as_deref() == Some("Array") || value.subtype.as_deref() == Some("array");
            if is_array {
                let total = props.result.len();
                if total > ARRAY_TRUNCATE_AT {
                    return Ok(serde_json::json!(format!(
                        "[Array with {total} items - too large to display]"
                    )));
                }
                let mut out = Vec::new();
                for prop in props.result.into_iter().take(ARRAY_SHOW) {
                    if let Some(v) = prop.value {
                        out.push(self.enrich(client, &v, depth - 1, visited).await?);
                    }
                }
                return Ok(Value::Array(out));
            }

            let total = props.result.len();
            let mut out = serde_json::Map::new();
            for prop in props.result.into_iter().take(OBJECT_TRUNCATE_AT.min(total)) {
                if let Some(v) = prop.value {
                    out.insert(prop.name, self.enrich(client, &v, depth - 1, visited).await?);
                }
            }
            Ok(Value::Object(out))
        })
    }

    // -- Evaluation (spec §4.6 Evaluation) --

    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let paused_frame_id = match &self.model.read().await.state {
            SessionState::Paused(details) => details.call_frames.first().map(|f| f.call_frame_id.clone()),
            _ => None,
        };
        let client = self.require_client().await?;

        if let Some(frame_id) = paused_frame_id {
            let result: EvaluateResult = client
                .send(
                    "Debugger.evaluateOnCallFrame",
                    Some(serde_json::to_value(EvaluateOnCallFrameParams {
                        call_frame_id: frame_id,
                        expression: expression.to_string(),
                        generate_preview: true,
                    })?),
                )
                .await?;
            return Ok(evaluate_result_to_json(result));
        }

        let result: EvaluateResult = client
            .send(
                "Runtime.evaluate",
                Some(serde_json::to_value(RuntimeEvaluateParams {
                    expression: expression.to_string(),
                    generate_preview: true,
                })?),
            )
            .await?;
        Ok(evaluate_result_to_json(result))
    }

    // -- Termination (spec §4.6 Termination) --

    pub async fn disconnect(&self) -> Result<()> {
        if let Some(client) = self.client.write().await.take() {
            let _ = client.disconnect().await;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let grace = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            if grace.is_err() {
                warn!(session = %self.id, "child did not exit after SIGTERM grace, forcing kill");
                let _ = child.kill().await;
            }
        }
        self.model.write().await.set_state(SessionState::Terminated {
            exit_code: None,
            signal: None,
        });
        Ok(())
    }

    pub async fn get_state(&self) -> SessionState {
        self.model.read().await.state.clone()
    }

    /// Current breakpoint table, including pending (unresolved) entries.
    pub async fn get_breakpoints(&self) -> Vec<crate::debug::state::BreakpointRecord> {
        self.model.read().await.list_breakpoints()
    }

    pub async fn last_activity(&self) -> Instant {
        *self.last_activity.read().await
    }

    pub async fn search_console_output(&self, needle: &str) -> Vec<Value> {
        self.output
            .read()
            .await
            .search(needle)
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect()
    }
}

fn describe_remote_value(value: &Value) -> String {
    value
        .get("description")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

fn tagged_representation(value: &RemoteObject) -> Option<Value> {
    match value.subtype.as_deref() {
        Some("date") => Some(serde_json::json!({
            "__type": "Date",
            "value": value.description.clone()?,
        })),
        Some("regexp") => Some(serde_json::json!({
            "__type": "RegExp",
            "value": value.description.clone()?,
        })),
        Some("map") => Some(serde_json::json!({
            "__type": "Map",
            "value": format!("{} (truncated at {MAP_SET_TRUNCATE_AT} entries)", value.description.clone()?),
        })),
        Some("set") => Some(serde_json::json!({
            "__type": "Set",
            "value": format!("{} (truncated at {MAP_SET_TRUNCATE_AT} entries)", value.description.clone()?),
        })),
        Some("symbol") => Some(serde_json::json!({"__type": "Symbol", "value": value.description.clone()?})),
        _ => match value.object_type.as_str() {
            "function" => Some(serde_json::json!({"__type": "Function", "value": value.description.clone()?})),
            "bigint" => {
                Some(serde_json::json!({"__type": "BigInt", "value": value.unserializable_value.clone()?}))
            }
            _ => None,
        },
    }
}

fn evaluate_result_to_json(result: EvaluateResult) -> Value {
    if let Some(details) = result.exception_details {
        return serde_json::json!({"error": true, "details": details});
    }
    result.result.value.unwrap_or_else(|| {
        serde_json::json!({
            "type": result.result.object_type,
            "description": result.result.description,
        })
    })
}

pub fn normalize_file_path(path: &str) -> Result<String> {
    let canonical = Path::new(path);
    if canonical.components().any(|c| c.as_os_str() == "..") {
        return Err(Error::InvalidRequest(format!("path traversal rejected: {path}")));
    }
    Ok(path.to_string())
}
