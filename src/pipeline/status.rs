//! Shared playback status
//!
//! Written by the event loop and read by the UI thread. Every field is an
//! atomic (or sits behind a mutex) so both threads see consistent values.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::types::{ClockTime, SeekInfo};

/// Status record shared between the event loop and the UI thread
///
/// Duration and position are stored as raw nanoseconds with
/// `ClockTime::NONE` meaning unknown.
pub struct PlaybackStatus {
    /// Whether the pipeline last confirmed `Playing`
    playing: AtomicBool,

    /// Whether the current stream supports seeking
    seek_enabled: AtomicBool,

    /// Whether the one-shot automatic seek already happened
    seek_done: AtomicBool,

    /// Cached stream duration
    duration: AtomicU64,

    /// Last position reported by a progress tick
    position: AtomicU64,

    /// Seekable range from the last seeking query
    seek_range: Mutex<Option<(ClockTime, ClockTime)>>,
}

impl PlaybackStatus {
    /// Create a status record with everything unknown
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            seek_enabled: AtomicBool::new(false),
            seek_done: AtomicBool::new(false),
            duration: AtomicU64::new(ClockTime::NONE.nanos),
            position: AtomicU64::new(ClockTime::NONE.nanos),
            seek_range: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn seek_enabled(&self) -> bool {
        self.seek_enabled.load(Ordering::SeqCst)
    }

    /// Cache the result of a seeking query
    pub fn set_seek_info(&self, info: SeekInfo) {
        self.seek_enabled.store(info.seekable, Ordering::SeqCst);
        let range = info.seekable.then_some((info.start, info.end));
        *self
            .seek_range
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = range;
    }

    /// Seekable range, if the stream is seekable
    pub fn seek_range(&self) -> Option<(ClockTime, ClockTime)> {
        *self
            .seek_range
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seek_done(&self) -> bool {
        self.seek_done.load(Ordering::SeqCst)
    }

    pub fn set_seek_done(&self, done: bool) {
        self.seek_done.store(done, Ordering::SeqCst);
    }

    /// Cached duration, `None` while unknown
    pub fn duration(&self) -> Option<ClockTime> {
        ClockTime::from_nseconds(self.duration.load(Ordering::SeqCst)).valid()
    }

    pub fn set_duration(&self, duration: ClockTime) {
        self.duration.store(duration.nanos, Ordering::SeqCst);
    }

    /// Forget the cached duration; the next progress tick queries it again
    pub fn invalidate_duration(&self) {
        self.duration.store(ClockTime::NONE.nanos, Ordering::SeqCst);
    }

    /// Last reported position, `None` before the first progress tick
    pub fn position(&self) -> Option<ClockTime> {
        ClockTime::from_nseconds(self.position.load(Ordering::SeqCst)).valid()
    }

    pub fn set_position(&self, position: Option<ClockTime>) {
        let nanos = position.unwrap_or(ClockTime::NONE).nanos;
        self.position.store(nanos, Ordering::SeqCst);
    }

    /// Get a copy of the current status
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            playing: self.is_playing(),
            seek_enabled: self.seek_enabled(),
            seek_done: self.seek_done(),
            seek_range: self.seek_range(),
            position: self.position(),
            duration: self.duration(),
        }
    }
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the playback status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub playing: bool,
    pub seek_enabled: bool,
    pub seek_done: bool,
    pub seek_range: Option<(ClockTime, ClockTime)>,
    pub position: Option<ClockTime>,
    pub duration: Option<ClockTime>,
}

impl std::fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} / {}",
            if self.playing { "Playing" } else { "Not playing" },
            self.position.unwrap_or(ClockTime::NONE),
            self.duration.unwrap_or(ClockTime::NONE),
        )?;
        match self.seek_range {
            Some((start, end)) if self.seek_enabled => {
                write!(f, " (seekable {} - {})", start, end)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_duration_unknown_until_set() {
        let status = PlaybackStatus::new();
        assert_eq!(status.duration(), None);

        status.set_duration(ClockTime::from_seconds(52));
        assert_eq!(status.duration(), Some(ClockTime::from_seconds(52)));

        status.invalidate_duration();
        assert_eq!(status.duration(), None);
    }

    #[test]
    fn test_seek_info() {
        let status = PlaybackStatus::new();
        assert!(!status.seek_enabled());
        assert_eq!(status.seek_range(), None);

        status.set_seek_info(SeekInfo {
            seekable: true,
            start: ClockTime::ZERO,
            end: ClockTime::from_seconds(60),
        });
        assert!(status.seek_enabled());
        assert_eq!(
            status.seek_range(),
            Some((ClockTime::ZERO, ClockTime::from_seconds(60)))
        );

        status.set_seek_info(SeekInfo {
            seekable: false,
            start: ClockTime::ZERO,
            end: ClockTime::NONE,
        });
        assert!(!status.seek_enabled());
        assert_eq!(status.seek_range(), None);
    }

    #[test]
    fn test_snapshot_display() {
        let status = PlaybackStatus::new();
        status.set_playing(true);
        status.set_position(Some(ClockTime::from_seconds(5)));
        status.set_duration(ClockTime::from_seconds(60));

        let snapshot = status.snapshot();
        assert!(snapshot.playing);
        assert_eq!(
            snapshot.to_string(),
            "Playing 0:00:05.000000000 / 0:01:00.000000000"
        );

        status.set_seek_info(SeekInfo {
            seekable: true,
            start: ClockTime::ZERO,
            end: ClockTime::from_seconds(60),
        });
        let snapshot = status.snapshot();
        assert_eq!(
            snapshot.seek_range,
            Some((ClockTime::ZERO, ClockTime::from_seconds(60)))
        );
        assert_eq!(
            snapshot.to_string(),
            "Playing 0:00:05.000000000 / 0:01:00.000000000 \
             (seekable 0:00:00.000000000 - 0:01:00.000000000)"
        );
    }

    #[test]
    fn test_cross_thread_visibility() {
        let status = Arc::new(PlaybackStatus::new());
        let writer = {
            let status = status.clone();
            thread::spawn(move || {
                status.set_playing(true);
                status.set_duration(ClockTime::from_seconds(10));
            })
        };
        writer.join().unwrap();

        assert!(status.is_playing());
        assert_eq!(status.duration(), Some(ClockTime::from_seconds(10)));
    }
}
