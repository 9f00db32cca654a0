//! Bus notifications emitted by the processing graph
//!
//! Every notification is consumed exactly once by the event loop.

use std::fmt;

use super::state::PlaybackState;

/// Kind of a bus notification, used to filter bus pops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Error,
    EndOfStream,
    StateChanged,
    DurationChanged,
    Warning,
    Other,
}

/// Kinds the event loop asks the bus for; everything else is dropped by the bus
pub const PLAYBACK_MESSAGES: &[MessageKind] = &[
    MessageKind::StateChanged,
    MessageKind::Error,
    MessageKind::EndOfStream,
    MessageKind::DurationChanged,
    MessageKind::Warning,
];

/// Notification posted on the graph's bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A node failed; playback can't continue
    Error {
        /// Name of the node that posted the error
        source: String,
        message: String,
        debug: Option<String>,
    },

    /// All branches drained
    EndOfStream,

    /// A node (or the pipeline itself) changed state
    StateChanged {
        old: PlaybackState,
        new: PlaybackState,
        pending: Option<PlaybackState>,
        /// Name of the element whose state changed
        emitter: String,
    },

    /// The stream duration may have changed; cached values are stale
    DurationChanged,

    /// Non-fatal problem reported by a node
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },

    /// A message kind the event loop has no handler for
    Other { kind: String, emitter: String },
}

impl Notification {
    pub fn kind(&self) -> MessageKind {
        match self {
            Notification::Error { .. } => MessageKind::Error,
            Notification::EndOfStream => MessageKind::EndOfStream,
            Notification::StateChanged { .. } => MessageKind::StateChanged,
            Notification::DurationChanged => MessageKind::DurationChanged,
            Notification::Warning { .. } => MessageKind::Warning,
            Notification::Other { .. } => MessageKind::Other,
        }
    }

    /// Whether this notification passes a bus filter
    pub fn matches(&self, filter: &[MessageKind]) -> bool {
        filter.contains(&self.kind())
    }

    /// Whether this notification ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Notification::Error { .. } | Notification::EndOfStream
        )
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Error {
                source, message, ..
            } => write!(f, "Error from {}: {}", source, message),
            Notification::EndOfStream => write!(f, "EOS"),
            Notification::StateChanged {
                old, new, emitter, ..
            } => write!(f, "{} state changed: {} -> {}", emitter, old, new),
            Notification::DurationChanged => write!(f, "Duration changed"),
            Notification::Warning {
                source, message, ..
            } => write!(f, "Warning from {}: {}", source, message),
            Notification::Other { kind, emitter } => {
                write!(f, "Unhandled {} message from {}", kind, emitter)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_changed(emitter: &str) -> Notification {
        Notification::StateChanged {
            old: PlaybackState::Paused,
            new: PlaybackState::Playing,
            pending: None,
            emitter: emitter.to_string(),
        }
    }

    #[test]
    fn test_filter() {
        assert!(Notification::EndOfStream.matches(PLAYBACK_MESSAGES));
        assert!(state_changed("pipeline").matches(PLAYBACK_MESSAGES));
        assert!(Notification::DurationChanged.matches(&[MessageKind::DurationChanged]));
        assert!(!Notification::DurationChanged.matches(&[MessageKind::Error]));

        let other = Notification::Other {
            kind: "tag".into(),
            emitter: "source".into(),
        };
        assert!(!other.matches(PLAYBACK_MESSAGES));
    }

    #[test]
    fn test_terminal() {
        let error = Notification::Error {
            source: "source".into(),
            message: "decode failure".into(),
            debug: None,
        };
        assert!(error.is_terminal());
        assert!(Notification::EndOfStream.is_terminal());
        assert!(!Notification::DurationChanged.is_terminal());
        assert!(!state_changed("pipeline").is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            state_changed("audio-sink").to_string(),
            "audio-sink state changed: PAUSED -> PLAYING"
        );
        assert_eq!(Notification::EndOfStream.to_string(), "EOS");
    }
}
