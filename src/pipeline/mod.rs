//! Playback orchestration for openpipe
//!
//! This module wires a media engine into a playable graph and supervises it:
//! - Construction: the graph builder creates the source and both branches
//! - Discovery: the dynamic linker attaches source outputs as they appear
//! - Control: the state supervisor forwards play/pause/stop requests
//! - Events: the event loop consumes bus notifications and reports progress
//!
//! # Architecture
//!
//! The session runs the event loop on the calling thread and the control
//! surface on a `ui` thread. Both share a `PlaybackStatus` and a
//! `SignalOfStop`; nothing else crosses threads except the supervisor.
//! Engines implement the traits in `engine`.

pub mod builder;
pub mod engine;
pub mod event_loop;
pub mod linker;
pub mod message;
pub mod session;
pub mod state;
pub mod status;
pub mod supervisor;
pub mod types;

pub use builder::PlaybackGraph;
pub use event_loop::{EndReason, EventLoop, Step};
pub use linker::{DynamicLinker, LinkOutcome};
pub use message::Notification;
pub use session::{PipelineContext, Session, SessionEnd};
pub use state::{LoopState, PlaybackState};
pub use status::{PlaybackStatus, StatusSnapshot};
pub use supervisor::StateSupervisor;
pub use types::{ClockTime, MediaKind};
