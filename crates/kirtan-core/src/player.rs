//! PlayerCore: single-owner event loop for all playback state.
//!
//! Every input (HTTP command, schedule tick, directory-scan completion,
//! media backend notification) arrives as a [`PlayerEvent`] on one mpsc
//! channel.  PlayerCore owns the catalog position, the track cursor, the
//! pause intent, and the media backend exclusively; no other task touches
//! them.  Directory scans run in spawned tasks and report back through the
//! same channel; their results are applied only when both the scan
//! generation and the selected stream id still match, so out-of-order
//! completions cannot corrupt state.
//!
//! After each event the shared [`StateSnapshot`] is republished with a
//! bumped `rev` so pollers can detect missed updates.

use std::sync::Arc;

use chrono::Timelike;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, StreamDescriptor};
use crate::cursor::TrackCursor;
use crate::media::{MediaBackend, MediaEvent};
use crate::resolver::{track_name, DirectoryResolver, ResolveError};
use crate::schedule;

// ── events ────────────────────────────────────────────────────────────────────

/// Requests from UI wiring (HTTP API, tests).
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Select a stream by id.  Manual selections override and disable the
    /// schedule; unknown ids are ignored.
    Select { id: String, manual: bool },
    /// Invoke play or pause according to the backend's actual paused flag.
    TogglePlayback,
    Play,
    Pause,
    SetVolume(f32),
    SetAutoSchedule(bool),
}

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum PlayerEvent {
    Command(PlayerCommand),
    /// A directory scan finished.  `generation` and `stream_id` are the
    /// staleness guards; `autoplay` is the intent captured when the scan
    /// was issued.
    ScanComplete {
        generation: u64,
        stream_id: String,
        autoplay: bool,
        outcome: Result<Arc<Vec<String>>, ResolveError>,
    },
    Media(MediaEvent),
    ScheduleTick,
    Shutdown,
}

// ── status ────────────────────────────────────────────────────────────────────

/// Controller status.  Distinct from the `user_paused` intent: buffering
/// and errors do not touch intent, and intent survives stream switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    #[default]
    Idle,
    Scanning,
    Loading,
    Playing,
    Paused,
    Errored,
}

/// The four-way indicator the UI renders as the status dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusDot {
    #[default]
    None,
    Loading,
    Playing,
    Error,
}

impl PlayerStatus {
    fn dot(self) -> StatusDot {
        match self {
            PlayerStatus::Idle | PlayerStatus::Paused => StatusDot::None,
            PlayerStatus::Scanning | PlayerStatus::Loading => StatusDot::Loading,
            PlayerStatus::Playing => StatusDot::Playing,
            PlayerStatus::Errored => StatusDot::Error,
        }
    }
}

/// Position within a directory stream, for progress display.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrackProgress {
    pub index: usize,
    pub played: usize,
    pub total: usize,
}

/// Read-only view published for the status surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StateSnapshot {
    /// Monotonic revision counter, bumped on every republish.
    pub rev: u64,
    pub stream_id: String,
    pub stream_name: String,
    /// "Name" for direct streams, "Name • track.mp3" for directory streams.
    pub now_playing: String,
    pub status: PlayerStatus,
    pub dot: StatusDot,
    pub status_text: String,
    pub hint: String,
    pub user_paused: bool,
    pub auto_schedule: bool,
    pub volume: f32,
    /// Present while a directory stream has a resolved, non-empty list.
    pub track_progress: Option<TrackProgress>,
}

// ── PlayerCore ────────────────────────────────────────────────────────────────

pub struct PlayerCore<M: MediaBackend> {
    catalog: Catalog,
    media: M,
    resolver: DirectoryResolver,
    cursor: TrackCursor,
    current: usize,
    user_paused: bool,
    auto_schedule: bool,
    volume: f32,
    status: PlayerStatus,
    status_text: String,
    hint: String,
    /// Transient display-only buffering flag; never touches `status`.
    buffering: bool,
    /// Bumped on every stream entry; a completed scan carrying an older
    /// value is discarded.
    scan_generation: u64,
    rev: u64,
    event_tx: mpsc::Sender<PlayerEvent>,
    snapshot: Arc<RwLock<StateSnapshot>>,
}

impl<M: MediaBackend> PlayerCore<M> {
    pub fn new(
        catalog: Catalog,
        media: M,
        resolver: DirectoryResolver,
        auto_schedule: bool,
        volume: f32,
        event_tx: mpsc::Sender<PlayerEvent>,
    ) -> Self {
        Self {
            catalog,
            media,
            resolver,
            cursor: TrackCursor::new(),
            current: 0,
            user_paused: true,
            auto_schedule,
            volume: volume.clamp(0.0, 1.0),
            status: PlayerStatus::Idle,
            status_text: "Paused".into(),
            hint: String::new(),
            buffering: false,
            scan_generation: 0,
            rev: 0,
            event_tx,
            snapshot: Arc::new(RwLock::new(StateSnapshot::default())),
        }
    }

    /// Shared handle to the published snapshot, for the status surface.
    pub fn snapshot_handle(&self) -> Arc<RwLock<StateSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub fn current_stream(&self) -> &StreamDescriptor {
        self.catalog.stream(self.current)
    }

    pub fn status(&self) -> PlayerStatus {
        self.status
    }

    pub fn is_user_paused(&self) -> bool {
        self.user_paused
    }

    pub fn auto_schedule_enabled(&self) -> bool {
        self.auto_schedule
    }

    pub fn cursor(&self) -> &TrackCursor {
        &self.cursor
    }

    /// Prepare the default stream (first catalog entry) without starting
    /// playback, then process events until the channel closes or a
    /// `Shutdown` event arrives.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<PlayerEvent>) {
        info!("player: starting event loop");
        self.media.set_volume(self.volume).await;
        self.enter_stream(self.current, false).await;
        self.publish().await;

        while let Some(event) = event_rx.recv().await {
            if matches!(event, PlayerEvent::Shutdown) {
                info!("player: shutdown requested");
                break;
            }
            self.handle_event(event).await;
        }
        info!("player: event loop finished");
    }

    /// Dispatch one event and republish the snapshot.  Public so tests can
    /// drive transitions without running the loop.
    pub async fn handle_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::Command(cmd) => self.handle_command(cmd).await,
            PlayerEvent::ScanComplete {
                generation,
                stream_id,
                autoplay,
                outcome,
            } => {
                self.on_scan_complete(generation, &stream_id, autoplay, outcome)
                    .await
            }
            PlayerEvent::Media(event) => self.on_media_event(event).await,
            PlayerEvent::ScheduleTick => {
                if self.auto_schedule {
                    let hour = chrono::Local::now().hour();
                    self.apply_schedule_for_hour(hour).await;
                }
            }
            PlayerEvent::Shutdown => {}
        }
        self.publish().await;
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: PlayerCommand) {
        match cmd {
            PlayerCommand::Select { id, manual } => self.select_stream(&id, manual, false).await,
            PlayerCommand::TogglePlayback => {
                // The backend's actual flag decides, not `user_paused`; the
                // button stays correct even while the two briefly diverge.
                if self.media.is_paused() {
                    self.start_playback().await;
                } else {
                    self.pause_playback().await;
                }
            }
            PlayerCommand::Play => self.start_playback().await,
            PlayerCommand::Pause => self.pause_playback().await,
            PlayerCommand::SetVolume(volume) => {
                self.volume = volume.clamp(0.0, 1.0);
                self.media.set_volume(self.volume).await;
            }
            PlayerCommand::SetAutoSchedule(enabled) => {
                self.auto_schedule = enabled;
                info!(
                    "auto-schedule {}",
                    if enabled { "enabled" } else { "disabled" }
                );
                if enabled {
                    let hour = chrono::Local::now().hour();
                    self.apply_schedule_for_hour(hour).await;
                }
            }
        }
    }

    /// Switch the current stream.  Unknown ids are ignored so stale UI
    /// references cannot disturb playback.
    async fn select_stream(&mut self, id: &str, manual: bool, suppress_autoplay: bool) {
        let Some(idx) = self.catalog.index_of(id) else {
            debug!("select: unknown stream id '{}'", id);
            return;
        };
        if manual {
            self.auto_schedule = false;
        }
        info!("selecting stream '{}'", id);
        self.current = idx;
        let autoplay = !self.user_paused && !suppress_autoplay;
        self.enter_stream(idx, autoplay).await;
    }

    /// Point the backend at the stream's source.  The old source is
    /// abandoned, not drained; any in-flight scan is superseded from this
    /// moment.
    async fn enter_stream(&mut self, idx: usize, autoplay: bool) {
        let stream = self.catalog.stream(idx).clone();
        self.scan_generation += 1;
        self.buffering = false;
        self.cursor.clear();

        if stream.is_directory() {
            self.media.set_source(None).await;
            self.status = PlayerStatus::Scanning;
            self.status_text = "Scanning…".into();
            self.hint = "Scanning directory for audio files…".into();

            let generation = self.scan_generation;
            let resolver = self.resolver.clone();
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let outcome = resolver.resolve(&stream.url).await;
                let _ = tx
                    .send(PlayerEvent::ScanComplete {
                        generation,
                        stream_id: stream.id,
                        autoplay,
                        outcome,
                    })
                    .await;
            });
            return;
        }

        self.media.set_source(Some(&stream.url)).await;
        if autoplay {
            self.start_playback().await;
        } else {
            self.status = PlayerStatus::Paused;
            self.status_text = "Paused".into();
            self.hint = self.schedule_hint().unwrap_or_else(|| "Paused.".into());
        }
    }

    // ── scan completion ───────────────────────────────────────────────────────

    async fn on_scan_complete(
        &mut self,
        generation: u64,
        stream_id: &str,
        autoplay: bool,
        outcome: Result<Arc<Vec<String>>, ResolveError>,
    ) {
        // Both guards must hold: a newer scan supersedes this one, and so
        // does navigating away from the stream it was issued for.
        if generation != self.scan_generation || self.current_stream().id != stream_id {
            debug!("discarding stale scan result for '{}'", stream_id);
            return;
        }

        let tracks = match outcome {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("directory scan for '{}' failed: {}", stream_id, e);
                self.status = PlayerStatus::Errored;
                self.status_text = "Scan failed".into();
                self.hint =
                    "Could not scan directory. Enable directory listing on your server.".into();
                return;
            }
        };

        self.cursor.reset(tracks);
        if self.cursor.is_empty() {
            self.status = PlayerStatus::Errored;
            self.status_text = "No tracks found".into();
            self.hint = "No playable audio files found in this directory.".into();
            return;
        }

        let first = self.cursor.current_url().map(str::to_string);
        self.media.set_source(first.as_deref()).await;

        if autoplay {
            self.start_playback().await;
        } else {
            self.status = PlayerStatus::Paused;
            self.status_text = "Paused".into();
            self.hint = self.progress_hint().unwrap_or_else(|| "Paused.".into());
        }
    }

    // ── playback ──────────────────────────────────────────────────────────────

    async fn start_playback(&mut self) {
        let stream = self.current_stream().clone();

        if stream.is_directory() {
            if self.cursor.is_empty() {
                // Nothing to hand the backend; report and stay usable.
                self.status = PlayerStatus::Errored;
                self.status_text = "No tracks found".into();
                self.hint = "No playable audio files found in this directory.".into();
                return;
            }
            let url = self.cursor.current_url().map(str::to_string);
            self.media.set_source(url.as_deref()).await;
        }

        self.status = PlayerStatus::Loading;
        self.status_text = "Loading…".into();
        self.hint = "Loading stream…".into();

        match self.media.play().await {
            Ok(()) => {
                self.user_paused = false;
                self.buffering = false;
                if stream.is_directory() {
                    self.cursor.mark_played(&stream.id);
                }
                self.status = PlayerStatus::Playing;
                self.status_text = "Playing".into();
                self.hint = self
                    .progress_hint()
                    .unwrap_or_else(|| "Listening. Switch streams anytime.".into());
                info!("playing '{}'", stream.name);
            }
            Err(e) => {
                warn!("playback rejected for '{}': {}", stream.name, e);
                self.user_paused = true;
                self.buffering = false;
                self.status = PlayerStatus::Errored;
                self.status_text = "Can't play".into();
                self.hint = "Playback failed. Check the stream URL.".into();
            }
        }
    }

    async fn pause_playback(&mut self) {
        self.media.pause().await;
        self.user_paused = true;
        self.buffering = false;
        self.status = PlayerStatus::Paused;
        self.status_text = "Paused".into();
        self.hint = "Paused.".into();
    }

    // ── media events ──────────────────────────────────────────────────────────

    async fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Waiting => {
                // Transient buffering: display-only, the logical state and
                // the pause intent stay put.
                if !self.media.is_paused() {
                    self.buffering = true;
                }
            }
            MediaEvent::Playing => {
                if !self.media.is_paused() {
                    self.buffering = false;
                    let stream = self.current_stream().clone();
                    if stream.is_directory() {
                        self.cursor.mark_played(&stream.id);
                    }
                    self.status = PlayerStatus::Playing;
                    self.status_text = "Playing".into();
                    if let Some(hint) = self.progress_hint() {
                        self.hint = hint;
                    }
                }
            }
            MediaEvent::Paused => {
                self.buffering = false;
                if self.user_paused {
                    self.status = PlayerStatus::Paused;
                    self.status_text = "Paused".into();
                }
            }
            MediaEvent::Ended => {
                // Directory streams loop through their list; direct streams
                // do not chain.
                if self.current_stream().is_directory() && !self.cursor.is_empty() {
                    self.cursor.advance();
                    self.start_playback().await;
                }
            }
            MediaEvent::Error(reason) => {
                warn!("media backend error: {}", reason);
                self.buffering = false;
                self.status = PlayerStatus::Errored;
                self.status_text = "Stream error".into();
                self.hint = "The stream reported an error.".into();
            }
        }
    }

    // ── schedule ──────────────────────────────────────────────────────────────

    /// Re-evaluate the schedule for an explicit hour.  A differing stream
    /// triggers a switch that keeps playing only if we were actively
    /// playing at that moment; a matching stream only refreshes the hint.
    pub async fn apply_schedule_for_hour(&mut self, hour: u32) {
        let Some((stream, entry)) = schedule::scheduled_stream(&self.catalog, hour) else {
            return;
        };
        let target_id = stream.id.clone();
        let label = entry.label.clone();

        if self.current_stream().id != target_id {
            let keep_playing = self.status == PlayerStatus::Playing;
            info!("schedule: switching to '{}' ({})", target_id, label);
            self.select_stream(&target_id, false, !keep_playing).await;
        } else {
            self.hint = format!("Schedule: {}", label);
        }
    }

    fn schedule_hint(&self) -> Option<String> {
        if !self.auto_schedule {
            return None;
        }
        let hour = chrono::Local::now().hour();
        schedule::scheduled_entry(&self.catalog, hour).map(|e| format!("Schedule: {}", e.label))
    }

    // ── snapshot ──────────────────────────────────────────────────────────────

    fn progress_hint(&self) -> Option<String> {
        let stream = self.current_stream();
        if !stream.is_directory() || self.cursor.is_empty() {
            return None;
        }
        let (played, total) = self.cursor.progress(&stream.id);
        Some(format!(
            "Track {}/{} • Played {}/{}",
            self.cursor.index() + 1,
            total,
            played,
            total
        ))
    }

    async fn publish(&mut self) {
        self.rev += 1;
        let stream = self.current_stream();

        let now_playing = match self.cursor.current_url() {
            Some(url) if stream.is_directory() => {
                format!("{} • {}", stream.name, track_name(url))
            }
            _ => stream.name.clone(),
        };
        let track_progress = if stream.is_directory() && !self.cursor.is_empty() {
            let (played, total) = self.cursor.progress(&stream.id);
            Some(TrackProgress {
                index: self.cursor.index(),
                played,
                total,
            })
        } else {
            None
        };
        let (dot, status_text) = if self.buffering {
            (StatusDot::Loading, "Buffering…".to_string())
        } else {
            (self.status.dot(), self.status_text.clone())
        };

        let snapshot = StateSnapshot {
            rev: self.rev,
            stream_id: stream.id.clone(),
            stream_name: stream.name.clone(),
            now_playing,
            status: self.status,
            dot,
            status_text,
            hint: self.hint.clone(),
            user_paused: self.user_paused,
            auto_schedule: self.auto_schedule,
            volume: self.volume,
            track_progress,
        };
        *self.snapshot.write().await = snapshot;
    }
}
