//! Core types for the playback graph

use std::time::Duration;

/// Stream time in nanoseconds
///
/// Mirrors the engine's clock unit. `ClockTime::NONE` is the "unknown"
/// sentinel and never compares as a valid position.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    pub nanos: u64,
}

impl ClockTime {
    pub const ZERO: ClockTime = ClockTime { nanos: 0 };
    pub const NONE: ClockTime = ClockTime { nanos: u64::MAX };
    /// Largest real time; anything longer saturates here, never at `NONE`
    pub const MAX: ClockTime = ClockTime {
        nanos: u64::MAX - 1,
    };
    pub const SECOND: u64 = 1_000_000_000;

    /// Create a clock time from nanoseconds
    pub fn from_nseconds(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create a clock time from whole seconds
    pub fn from_seconds(secs: u64) -> Self {
        Self {
            nanos: secs.saturating_mul(Self::SECOND).min(Self::MAX.nanos),
        }
    }

    /// Create a clock time from a duration
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            nanos: u64::try_from(duration.as_nanos())
                .unwrap_or(Self::MAX.nanos)
                .min(Self::MAX.nanos),
        }
    }

    /// Whether this is a real time and not the unknown sentinel
    pub fn is_valid(&self) -> bool {
        self.nanos != u64::MAX
    }

    /// `None` for the unknown sentinel
    pub fn valid(self) -> Option<ClockTime> {
        self.is_valid().then_some(self)
    }

    pub fn seconds(&self) -> u64 {
        self.nanos / Self::SECOND
    }
}

impl std::fmt::Display for ClockTime {
    /// `H:MM:SS.nnnnnnnnn`, or all nines when the time is unknown
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_valid() {
            return write!(f, "99:99:99.999999999");
        }
        let secs = self.seconds();
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.nanos % Self::SECOND
        )
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl MediaKind {
    /// Classify a negotiated media type by its prefix
    ///
    /// `video/x-raw` and friends map to `Video`, `audio/...` to `Audio`.
    /// Anything else (subtitles, metadata, ...) is not handled by any branch.
    pub fn from_media_type(media_type: &str) -> Option<MediaKind> {
        if media_type.starts_with("video") {
            Some(MediaKind::Video)
        } else if media_type.starts_with("audio") {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Role a node plays in the playback graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    /// The pipeline container itself
    Container,
    /// Decoding source exposing dynamic connection points
    Source,
    /// Buffering stage at the head of a branch
    Queue(MediaKind),
    /// Format converter
    Convert(MediaKind),
    /// Audio resampler
    Resample,
    /// Renderer at the tail of a branch
    Sink(MediaKind),
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Container => write!(f, "pipeline"),
            NodeRole::Source => write!(f, "source"),
            NodeRole::Queue(kind) => write!(f, "{kind} queue"),
            NodeRole::Convert(kind) => write!(f, "{kind} convert"),
            NodeRole::Resample => write!(f, "audio resample"),
            NodeRole::Sink(kind) => write!(f, "{kind} sink"),
        }
    }
}

/// Seekable range reported by a seeking query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekInfo {
    pub seekable: bool,
    pub start: ClockTime,
    pub end: ClockTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_display() {
        assert_eq!(ClockTime::ZERO.to_string(), "0:00:00.000000000");
        assert_eq!(
            ClockTime::from_nseconds(3_723_500_000_000).to_string(),
            "1:02:03.500000000"
        );
        assert_eq!(ClockTime::NONE.to_string(), "99:99:99.999999999");
    }

    #[test]
    fn test_clock_time_validity() {
        assert!(ClockTime::ZERO.is_valid());
        assert!(!ClockTime::NONE.is_valid());
        assert_eq!(ClockTime::NONE.valid(), None);
        assert_eq!(
            ClockTime::from_seconds(2).valid(),
            Some(ClockTime::from_nseconds(2_000_000_000))
        );
        assert_eq!(
            ClockTime::from_duration(Duration::from_millis(1500)),
            ClockTime::from_nseconds(1_500_000_000)
        );
    }

    #[test]
    fn test_huge_times_stay_valid() {
        assert_eq!(ClockTime::from_seconds(u64::MAX), ClockTime::MAX);
        assert!(ClockTime::from_seconds(18_446_744_074).is_valid());
        assert_eq!(ClockTime::from_duration(Duration::MAX), ClockTime::MAX);
        assert!(ClockTime::from_nseconds(u64::MAX - 1).is_valid());
    }

    #[test]
    fn test_media_kind_classification() {
        assert_eq!(
            MediaKind::from_media_type("video/x-raw"),
            Some(MediaKind::Video)
        );
        assert_eq!(
            MediaKind::from_media_type("audio/x-raw"),
            Some(MediaKind::Audio)
        );
        assert_eq!(MediaKind::from_media_type("videofoo"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_media_type("text/x-raw"), None);
        assert_eq!(MediaKind::from_media_type(""), None);
        assert_eq!(MediaKind::from_media_type("application/x-audio"), None);
    }

    #[test]
    fn test_role_names() {
        assert_eq!(NodeRole::Queue(MediaKind::Audio).to_string(), "audio queue");
        assert_eq!(NodeRole::Sink(MediaKind::Video).to_string(), "video sink");
        assert_eq!(NodeRole::Container.to_string(), "pipeline");
    }
}
