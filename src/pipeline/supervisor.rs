//! State supervisor
//!
//! Forwards play/pause/stop requests to the graph without waiting for them
//! to complete. Confirmation comes back as a StateChanged notification.

use std::sync::Arc;

use log::{debug, error, info};

use crate::error::{EngineError, SessionError};
use crate::ui::PlaybackControls;

use super::engine::Pipeline;
use super::state::PlaybackState;

pub struct StateSupervisor<P: Pipeline> {
    pipeline: Arc<P>,
}

impl<P: Pipeline> StateSupervisor<P> {
    pub fn new(pipeline: Arc<P>) -> Self {
        Self { pipeline }
    }

    /// Initial transition to `Playing`; failing here ends the session
    pub fn start(&self) -> Result<(), SessionError> {
        match self.pipeline.set_state(PlaybackState::Playing) {
            Ok(result) => {
                debug!("StateSupervisor: start requested ({:?})", result);
                Ok(())
            }
            Err(e) => {
                error!("StateSupervisor: unable to set the pipeline to the playing state");
                Err(SessionError::InitialState(e))
            }
        }
    }

    /// Request `target`; returns whether the request reached the graph
    ///
    /// Requests for the state the graph is already in (with nothing
    /// pending) or already heading to are dropped.
    pub fn request(&self, target: PlaybackState) -> Result<bool, EngineError> {
        let current = self.pipeline.current_state();
        let pending = self.pipeline.pending_state();
        if pending == Some(target) || (pending.is_none() && current == target) {
            debug!("StateSupervisor: already {} ({}), skipping", target, current);
            return Ok(false);
        }

        info!("StateSupervisor: requesting {}", target);
        self.pipeline.set_state(target)?;
        Ok(true)
    }

    pub fn request_play(&self) -> Result<bool, EngineError> {
        self.request(PlaybackState::Playing)
    }

    pub fn request_pause(&self) -> Result<bool, EngineError> {
        self.request(PlaybackState::Paused)
    }

    /// Stop returns to `Ready`, keeping the graph allocated
    pub fn request_stop(&self) -> Result<bool, EngineError> {
        self.request(PlaybackState::Ready)
    }

    /// Teardown to `Null`
    pub fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(PlaybackState::Null) {
            error!("StateSupervisor: teardown failed: {}", e);
        }
    }
}

fn log_failure(action: &str, result: Result<bool, EngineError>) {
    if let Err(e) = result {
        error!("StateSupervisor: {} failed: {}", action, e);
    }
}

impl<P: Pipeline> PlaybackControls for StateSupervisor<P> {
    fn play(&self) {
        log_failure("play", self.request_play());
    }

    fn pause(&self) {
        log_failure("pause", self.request_pause());
    }

    fn stop(&self) {
        log_failure("stop", self.request_stop());
    }
}
