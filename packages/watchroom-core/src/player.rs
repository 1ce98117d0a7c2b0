//! Local media player abstraction.
//!
//! Video decoding and rendering live outside this crate. The engine talks to
//! whatever renders the video through [`MediaPlayer`]; [`ClockPlayer`] is a
//! headless implementation that advances a wall clock while playing.

use tokio::time::Instant;

/// Trait for the local video player.
///
/// Used by `PlaybackSynchronizer` to read the owner's position and to steer a
/// follower's player towards the authoritative state.
pub trait MediaPlayer: Send {
    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Loads a new video and positions it at `position` seconds.
    fn load(&mut self, url: &str, position: f64);

    /// Seeks within the loaded video.
    fn seek_to(&mut self, seconds: f64);

    /// Starts or pauses playback.
    fn set_playing(&mut self, playing: bool);

    /// Unloads the video and reveals the browse view.
    fn clear(&mut self);

    /// Returns `true` once the loaded video played to its end.
    ///
    /// Players that report the end through their own callback keep the default.
    fn has_ended(&self) -> bool {
        false
    }
}

/// Headless player that tracks position against a monotonic clock.
///
/// Uses `tokio::time::Instant` so tests running with paused time control it.
#[derive(Debug, Clone)]
pub struct ClockPlayer {
    url: Option<String>,
    /// Position at `anchor`.
    base_position: f64,
    anchor: Instant,
    playing: bool,
    /// Known duration of the loaded video, if any.
    duration: Option<f64>,
}

impl ClockPlayer {
    /// Creates an empty, paused player.
    pub fn new() -> Self {
        Self {
            url: None,
            base_position: 0.0,
            anchor: Instant::now(),
            playing: false,
            duration: None,
        }
    }

    /// Sets the duration of the loaded video so [`MediaPlayer::has_ended`] can fire.
    pub fn set_duration(&mut self, seconds: Option<f64>) {
        self.duration = seconds;
    }

    /// Currently loaded URL.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Whether the clock is running.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn rebase(&mut self, position: f64) {
        self.base_position = position.max(0.0);
        self.anchor = Instant::now();
    }
}

impl Default for ClockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaPlayer for ClockPlayer {
    fn position(&self) -> f64 {
        let elapsed = if self.playing {
            self.anchor.elapsed().as_secs_f64()
        } else {
            0.0
        };
        let position = self.base_position + elapsed;
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn load(&mut self, url: &str, position: f64) {
        self.url = Some(url.to_string());
        self.duration = None;
        self.rebase(position);
    }

    fn seek_to(&mut self, seconds: f64) {
        self.rebase(seconds);
    }

    fn set_playing(&mut self, playing: bool) {
        if self.playing != playing {
            let position = self.position();
            self.playing = playing;
            self.rebase(position);
        }
    }

    fn clear(&mut self) {
        self.url = None;
        self.playing = false;
        self.duration = None;
        self.rebase(0.0);
    }

    fn has_ended(&self) -> bool {
        match (self.url.as_ref(), self.duration) {
            (Some(_), Some(duration)) => self.position() >= duration,
            _ => false,
        }
    }
}

/// Player that records every command, for unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingPlayer {
    pub position: f64,
    pub url: Option<String>,
    pub playing: bool,
    pub loads: Vec<(String, f64)>,
    pub seeks: Vec<f64>,
    pub clears: usize,
}

#[cfg(test)]
impl MediaPlayer for RecordingPlayer {
    fn position(&self) -> f64 {
        self.position
    }

    fn load(&mut self, url: &str, position: f64) {
        self.url = Some(url.to_string());
        self.position = position;
        self.loads.push((url.to_string(), position));
    }

    fn seek_to(&mut self, seconds: f64) {
        self.position = seconds;
        self.seeks.push(seconds);
    }

    fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    fn clear(&mut self) {
        self.url = None;
        self.playing = false;
        self.clears += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn clock_player_advances_only_while_playing() {
        let mut player = ClockPlayer::new();
        player.load("v1", 10.0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(player.position(), 10.0);

        player.set_playing(true);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!((player.position() - 14.0).abs() < 1e-6);

        player.set_playing(false);
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!((player.position() - 14.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_player_reports_end_of_video() {
        let mut player = ClockPlayer::new();
        player.load("v1", 0.0);
        player.set_duration(Some(5.0));
        player.set_playing(true);
        assert!(!player.has_ended());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(player.has_ended());
        assert_eq!(player.position(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_resets_player() {
        let mut player = ClockPlayer::new();
        player.load("v1", 30.0);
        player.set_playing(true);
        player.clear();
        assert!(player.url().is_none());
        assert!(!player.is_playing());
        assert_eq!(player.position(), 0.0);
    }
}
