//! Pipeline state management

/// State of the processing graph as seen by the engine
///
/// States are ordered: a transition from `Null` to `Playing` walks through
/// `Ready` and `Paused`, one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlaybackState {
    /// Nothing allocated
    Null,
    /// Resources allocated, no data flowing
    Ready,
    /// Prerolled, clock stopped
    Paused,
    /// Data flowing, clock running
    Playing,
}

impl PlaybackState {
    /// The next state on the way from `self` to `target`, if any
    pub fn next_toward(&self, target: PlaybackState) -> Option<PlaybackState> {
        use PlaybackState::*;

        if *self == target {
            return None;
        }
        let up = target > *self;
        Some(match (self, up) {
            (Null, true) => Ready,
            (Ready, true) => Paused,
            (Paused, true) => Playing,
            (Playing, false) => Paused,
            (Paused, false) => Ready,
            (Ready, false) => Null,
            // Null can't go down and Playing can't go up
            (Null, false) | (Playing, true) => return None,
        })
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PlaybackState::Null => "NULL",
            PlaybackState::Ready => "READY",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Playing => "PLAYING",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Successful outcome of a state-change request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeSuccess {
    /// The graph reached the requested state
    Success,
    /// The change continues in the background and is confirmed on the bus
    Async,
    /// Live source: the graph cannot preroll in `Paused`
    NoPreroll,
}

/// Event loop state machine
///
/// `Terminated` is final. `Idle` and `Playing` follow the pipeline's
/// confirmed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for the pipeline to reach `Playing`
    Idle,

    /// Pipeline confirmed `Playing`, progress is reported
    Playing,

    /// Error, end of stream or shutdown was observed
    Terminated,
}

impl LoopState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &LoopState) -> bool {
        use LoopState::*;

        match (self, target) {
            (Terminated, Terminated) => true,
            (Terminated, _) => false,
            _ => true,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, LoopState::Terminated)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Playing => write!(f, "Playing"),
            LoopState::Terminated => write!(f, "Terminated"),
        }
    }
}
