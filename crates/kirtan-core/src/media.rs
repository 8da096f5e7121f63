//! The media backend seam.
//!
//! The controller drives playback through [`MediaBackend`] and receives the
//! backend's lifecycle notifications as [`MediaEvent`]s on its event
//! channel.  The daemon implements the trait over mpv's IPC socket; tests
//! script it directly.

use thiserror::Error;

/// Playback start was refused (backend unreachable, load rejected, decode
/// refused).  Recoverable: the player stays usable and a later explicit
/// play may succeed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("playback rejected: {reason}")]
pub struct PlaybackError {
    pub reason: String,
}

impl PlaybackError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Lifecycle notifications from the media backend.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Data stalled while playback was wanted (buffering).
    Waiting,
    /// Audio is flowing.
    Playing,
    /// The backend entered the paused state.
    Paused,
    /// The current source finished naturally.
    Ended,
    /// The backend reported a runtime error.
    Error(String),
}

/// One active media source, driven serially.  Setting a source never starts
/// playback by itself; `play` is the only entry into audible state.
#[allow(async_fn_in_trait)]
pub trait MediaBackend {
    /// Replace (or clear) the current source.
    async fn set_source(&mut self, url: Option<&str>);

    /// Request playback start.  Resolves once the backend accepts the
    /// request; later runtime failures arrive as [`MediaEvent::Error`].
    async fn play(&mut self) -> Result<(), PlaybackError>;

    async fn pause(&mut self);

    async fn set_volume(&mut self, volume: f32);

    /// The backend's actual paused flag, independent of the controller's
    /// pause intent.  True whenever nothing is loaded.
    fn is_paused(&self) -> bool;
}
