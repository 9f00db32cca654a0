//! Event loop
//!
//! Owns the bus side of a running session. Each iteration waits at most
//! one poll interval for a notification and dispatches it; when nothing
//! arrives while playing, it refreshes position and duration instead.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::config::AutoSeek;
use crate::utils::sos::SignalOfStop;

use super::engine::Pipeline;
use super::message::{Notification, PLAYBACK_MESSAGES};
use super::state::{LoopState, PlaybackState};
use super::status::PlaybackStatus;
use super::types::ClockTime;

/// Why playback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    /// Message of the error notification
    Error(String),
    /// The token was cancelled by the user side (surface, window, Ctrl-C)
    UserQuit,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::EndOfStream => write!(f, "end of stream"),
            EndReason::Error(message) => write!(f, "error: {}", message),
            EndReason::UserQuit => write!(f, "user quit"),
        }
    }
}

/// What one iteration did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A notification was dispatched
    Handled,
    /// Nothing arrived while playing; progress was refreshed
    Progress {
        position: Option<ClockTime>,
        duration: Option<ClockTime>,
    },
    /// Nothing arrived and nothing is playing
    Idle,
}

pub struct EventLoop<P: Pipeline> {
    pipeline: Arc<P>,
    status: Arc<PlaybackStatus>,
    sos: SignalOfStop,
    state: LoopState,
    poll_interval: Duration,
    auto_seek: Option<AutoSeek>,
    end: Option<EndReason>,
}

impl<P: Pipeline> EventLoop<P> {
    pub fn new(
        pipeline: Arc<P>,
        status: Arc<PlaybackStatus>,
        sos: SignalOfStop,
        poll_interval: Duration,
    ) -> Self {
        // Without a seek policy there is nothing left to do
        status.set_seek_done(true);
        Self {
            pipeline,
            status,
            sos,
            state: LoopState::Idle,
            poll_interval,
            auto_seek: None,
            end: None,
        }
    }

    pub fn with_auto_seek(mut self, auto_seek: Option<AutoSeek>) -> Self {
        self.status.set_seek_done(auto_seek.is_none());
        self.auto_seek = auto_seek;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// First terminal notification seen, if any
    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end.as_ref()
    }

    /// Iterate until the token is cancelled, printing progress on stdout
    pub fn run(&mut self) -> LoopState {
        info!("EventLoop: started on {}", self.pipeline.name());
        while !self.sos.cancelled() {
            if let Step::Progress { position, duration } = self.step() {
                print!(
                    "Position {} / {}\r",
                    position.unwrap_or(ClockTime::NONE),
                    duration.unwrap_or(ClockTime::NONE)
                );
                let _ = std::io::stdout().flush();
            }
        }
        println!();
        info!("EventLoop: stopped ({})", self.state);
        self.state
    }

    /// Wait for one notification, or refresh progress on timeout
    pub fn step(&mut self) -> Step {
        match self
            .pipeline
            .timed_pop_filtered(self.poll_interval, PLAYBACK_MESSAGES)
        {
            Some(notification) => {
                self.handle(notification);
                Step::Handled
            }
            None if self.status.is_playing() => self.refresh_progress(),
            None => Step::Idle,
        }
    }

    /// Dispatch a single notification
    pub fn handle(&mut self, notification: Notification) {
        let terminal = notification.is_terminal();
        match notification {
            Notification::Error {
                source,
                message,
                debug,
            } => {
                error!("Error received from element {}: {}", source, message);
                error!(
                    "Debugging information: {}",
                    debug.as_deref().unwrap_or("none")
                );
                self.end_with(EndReason::Error(message));
            }
            Notification::EndOfStream => {
                info!("End-Of-Stream reached");
                self.end_with(EndReason::EndOfStream);
            }
            Notification::StateChanged {
                old, new, emitter, ..
            } if emitter == self.pipeline.name() => {
                info!(
                    "Pipeline state changed from {} to {}",
                    old.description(),
                    new.description()
                );
                let playing = new == PlaybackState::Playing;
                self.status.set_playing(playing);
                if playing {
                    self.query_seeking();
                }
                if !self.state.is_terminated() {
                    self.transition(if playing {
                        LoopState::Playing
                    } else {
                        LoopState::Idle
                    });
                }
            }
            Notification::StateChanged {
                old, new, emitter, ..
            } => trace!("EventLoop: {} changed from {} to {}", emitter, old, new),
            Notification::DurationChanged => {
                debug!("EventLoop: duration changed, invalidating");
                self.status.invalidate_duration();
            }
            Notification::Warning {
                source,
                message,
                debug,
            } => {
                warn!("Warning received from element {}: {}", source, message);
                if let Some(debug) = debug {
                    debug!("Debugging information: {}", debug);
                }
            }
            Notification::Other { kind, emitter } => {
                warn!("EventLoop: unexpected message {} from {}", kind, emitter)
            }
        }
        if terminal {
            self.transition(LoopState::Terminated);
        }
    }

    /// Keep the first terminal reason only
    fn end_with(&mut self, reason: EndReason) {
        if self.end.is_none() {
            self.end = Some(reason);
        }
    }

    fn transition(&mut self, next: LoopState) {
        if !self.state.can_transition_to(&next) {
            return;
        }
        if self.state != next {
            debug!("EventLoop: {} -> {}", self.state, next);
        }
        self.state = next;
        if next.is_terminated() {
            self.sos.cancel();
        }
    }

    fn query_seeking(&self) {
        match self.pipeline.query_seeking() {
            Some(info) => {
                self.status.set_seek_info(info);
                if info.seekable {
                    info!("Seeking is ENABLED from {} to {}", info.start, info.end);
                } else {
                    info!("Seeking is DISABLED for this stream");
                }
            }
            None => warn!("Seeking query failed"),
        }
    }

    fn refresh_progress(&mut self) -> Step {
        let position = self.pipeline.query_position();
        if position.is_none() {
            warn!("Could not query current position");
        }
        self.status.set_position(position);

        if self.status.duration().is_none() {
            match self.pipeline.query_duration() {
                Some(duration) => self.status.set_duration(duration),
                None => warn!("Could not query current duration"),
            }
        }

        if let Some(policy) = self.auto_seek
            && let Some(position) = position
            && self.status.seek_enabled()
            && !self.status.seek_done()
            && position > policy.after()
        {
            info!("Reached {}, performing seek to {}", policy.after(), policy.to());
            if let Err(e) = self.pipeline.seek_simple(policy.to()) {
                warn!("EventLoop: seek failed: {}", e);
            }
            self.status.set_seek_done(true);
        }

        Step::Progress {
            position,
            duration: self.status.duration(),
        }
    }
}
