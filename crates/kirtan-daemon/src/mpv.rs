//! mpv-backed media backend.
//!
//! Spawns a single idle mpv process and talks JSON IPC over its unix
//! socket.  Commands are matched to responses by request id: the writer
//! task registers a reply channel before sending, the reader task resolves
//! it when the response line arrives.  Unsolicited property-change pushes
//! (`core-idle`, `pause`) and `end-file` events are translated into
//! [`MediaEvent`]s for the player loop.
//!
//! Sources are loaded lazily: `set_source` only records the url, `play`
//! issues the `loadfile`.  That mirrors the capability the controller
//! expects, where setting a source never starts audio by itself.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use kirtan_core::media::{MediaBackend, MediaEvent, PlaybackError};
use kirtan_core::player::PlayerEvent;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Fixed observe_property ids, matched in property-change events.
const OBS_CORE_IDLE: u64 = 1;
const OBS_PAUSE: u64 = 2;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line, '\n' included
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

/// Property values mirrored from mpv pushes, readable without an IPC
/// round-trip.
#[derive(Default)]
struct Observed {
    paused: AtomicBool,
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.  `send` fires a command and awaits
/// the matched response.
#[derive(Clone)]
struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    async fn load(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let _ = self.send(json!(["stop"])).await;
        Ok(())
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", pct])).await?;
        Ok(())
    }

    /// Must be called after every fresh connection; mpv then pushes a
    /// property-change whenever either value changes.
    async fn observe_properties(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

// ── backend ───────────────────────────────────────────────────────────────────

pub struct MpvBackend {
    socket_path: PathBuf,
    process: Option<tokio::process::Child>,
    handle: Option<MpvHandle>,
    /// What the controller selected; loaded into mpv on `play`.
    source: Option<String>,
    /// What mpv currently has loaded.
    loaded: Option<String>,
    volume: f32,
    observed: Arc<Observed>,
    event_tx: mpsc::Sender<PlayerEvent>,
}

impl MpvBackend {
    pub fn new(event_tx: mpsc::Sender<PlayerEvent>) -> Self {
        Self {
            socket_path: std::env::temp_dir().join("kirtand-mpv.sock"),
            process: None,
            handle: None,
            source: None,
            loaded: None,
            volume: 0.5,
            observed: Arc::new(Observed::default()),
            event_tx,
        }
    }

    fn process_alive(&mut self) -> bool {
        if let Some(ref mut child) = self.process {
            child.try_wait().ok().flatten().is_none()
        } else {
            false
        }
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if self.handle.is_some() && !self.process_alive() {
            warn!("mpv process died, dropping handle");
            self.handle = None;
            self.loaded = None;
            self.observed.paused.store(true, Ordering::Relaxed);
        }
        if let Some(handle) = self.handle.clone() {
            return Ok(handle);
        }

        if let Some(mut stale) = self.process.take() {
            let _ = stale.kill().await;
        }
        let _ = tokio::fs::remove_file(&self.socket_path).await;

        info!("mpv: spawning new process");
        let vol_arg = format!(
            "--volume={}",
            (self.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let ipc_arg = format!("--input-ipc-server={}", self.socket_path.display());
        let child = tokio::process::Command::new("mpv")
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(ipc_arg)
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if self.socket_path.exists() {
                break;
            }
        }
        if !self.socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }

        let stream = UnixStream::connect(&self.socket_path).await?;
        info!("mpv: connected to IPC socket");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        tokio::spawn(writer_task(write_half, cmd_rx, Arc::clone(&pending)));
        tokio::spawn(reader_task(
            BufReader::new(read_half),
            pending,
            self.event_tx.clone(),
            Arc::clone(&self.observed),
        ));

        let handle = MpvHandle { tx: cmd_tx };
        handle.observe_properties().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

impl MediaBackend for MpvBackend {
    async fn set_source(&mut self, url: Option<&str>) {
        self.source = url.map(str::to_string);
        if url.is_none() {
            self.loaded = None;
            if let Some(handle) = self.handle.clone() {
                if let Err(e) = handle.stop().await {
                    warn!("mpv: stop failed: {}", e);
                }
            }
        }
    }

    async fn play(&mut self) -> Result<(), PlaybackError> {
        let Some(src) = self.source.clone() else {
            return Err(PlaybackError::new("no source selected"));
        };
        let handle = self
            .ensure_handle()
            .await
            .map_err(|e| PlaybackError::new(e.to_string()))?;

        if self.loaded.as_deref() != Some(src.as_str()) {
            handle
                .load(&src)
                .await
                .map_err(|e| PlaybackError::new(e.to_string()))?;
            self.loaded = Some(src);
            if let Err(e) = handle.set_volume(self.volume).await {
                warn!("mpv: set_volume after load failed: {}", e);
            }
        }

        handle
            .set_pause(false)
            .await
            .map_err(|e| PlaybackError::new(e.to_string()))?;
        self.observed.paused.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn pause(&mut self) {
        if let Some(handle) = self.handle.clone() {
            if let Err(e) = handle.set_pause(true).await {
                warn!("mpv: pause failed: {}", e);
            }
        }
        self.observed.paused.store(true, Ordering::Relaxed);
    }

    async fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(handle) = self.handle.clone() {
            if let Err(e) = handle.set_volume(volume).await {
                warn!("mpv: set_volume failed: {}", e);
            }
        }
    }

    fn is_paused(&self) -> bool {
        self.loaded.is_none() || self.observed.paused.load(Ordering::Relaxed)
    }
}

// ── io tasks ──────────────────────────────────────────────────────────────────

async fn writer_task(
    mut writer: tokio::net::unix::OwnedWriteHalf,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) {
    while let Some(req) = rx.recv().await {
        // Register the reply channel before writing so the reader can
        // match the response whenever it lands.
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!("mpv writer: send req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

async fn reader_task(
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    pending: PendingMap,
    event_tx: mpsc::Sender<PlayerEvent>,
    observed: Arc<Observed>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                let _ = event_tx
                    .send(PlayerEvent::Media(MediaEvent::Error(
                        "mpv connection closed".into(),
                    )))
                    .await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    resolve_pending(&pending, req_id, val).await;
                } else if let Some(event) = classify_event(&val, &observed) {
                    debug!("mpv reader: media event {:?}", event);
                    if event_tx.send(PlayerEvent::Media(event)).await.is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn resolve_pending(pending: &PendingMap, req_id: u64, val: Value) {
    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&req_id) {
        let result = if val["error"].as_str() == Some("success") {
            Ok(val)
        } else {
            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
            Err(anyhow::anyhow!("mpv error: {}", err))
        };
        let _ = tx.send(result);
    } else {
        debug!("mpv reader: response for unknown req={}", req_id);
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

/// Translate one unsolicited mpv line into a media event, mirroring the
/// observed property values along the way.
fn classify_event(val: &Value, observed: &Observed) -> Option<MediaEvent> {
    let name = val.get("event").and_then(Value::as_str)?;

    if name == "property-change" {
        let id = val.get("id").and_then(Value::as_u64)?;
        let data = val.get("data").unwrap_or(&Value::Null);
        return match id {
            OBS_PAUSE => {
                let paused = data.as_bool().unwrap_or(false);
                observed.paused.store(paused, Ordering::Relaxed);
                paused.then_some(MediaEvent::Paused)
            }
            OBS_CORE_IDLE => {
                let idle = data.as_bool().unwrap_or(true);
                if idle {
                    // Stalled while unpaused reads as buffering; idling
                    // while paused is the expected quiet state.
                    (!observed.paused.load(Ordering::Relaxed)).then_some(MediaEvent::Waiting)
                } else {
                    Some(MediaEvent::Playing)
                }
            }
            _ => None,
        };
    }

    if name == "end-file" {
        let reason = val.get("reason").and_then(Value::as_str).unwrap_or("");
        return match reason {
            "eof" => Some(MediaEvent::Ended),
            "error" | "network" => Some(MediaEvent::Error(format!("end-file: {}", reason))),
            // "redirect", "stop", "quit" and loadfile replacement are
            // self-inflicted; the controller already knows.
            _ => None,
        };
    }

    None
}
