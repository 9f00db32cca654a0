//! Contract between the orchestration layer and a media engine
//!
//! The engine owns decoding, conversion and rendering. The orchestration
//! layer only creates nodes by factory name, wires them, drives states and
//! reads the bus. Implementations live in `crate::engine`.

use std::time::Duration;

use crate::error::EngineError;

use super::message::{MessageKind, Notification};
use super::state::{PlaybackState, StateChangeSuccess};
use super::types::{ClockTime, SeekInfo};

/// Callback invoked on the engine's worker context for each connection point
///
/// The point is handed over by value: dropping it releases every transient
/// reference the engine attached to it.
pub type PadHandler<P> = Box<dyn Fn(P) + Send + Sync + 'static>;

/// Factory side of a media engine
pub trait Engine: Send + Sync + 'static {
    type Node: Node;
    type Pad: ConnectionPoint<Node = Self::Node>;
    type Pipeline: Pipeline<Node = Self::Node, Pad = Self::Pad>;

    /// Create a node from a factory name; `None` if the factory is unavailable
    fn make_node(&self, factory: &str, name: &str) -> Option<Self::Node>;

    /// Create an empty container
    fn make_pipeline(&self, name: &str) -> Option<Self::Pipeline>;

    /// Short engine name for logs
    fn name(&self) -> &'static str;
}

/// Handle to a processing stage
pub trait Node: Clone + Send + Sync + 'static {
    fn name(&self) -> String;

    /// Set a property from its string form (e.g. the source `uri`)
    fn set_property_str(&self, property: &str, value: &str);
}

/// Output that appeared on a node after it started inspecting content
pub trait ConnectionPoint: Send + 'static {
    type Node: Node;

    fn name(&self) -> String;

    /// Negotiated media type (`audio/x-raw`, `video/x-raw`, ...), if known yet
    fn media_type(&self) -> Option<String>;

    /// Link this point to the static input of `target`
    fn link_to(&self, target: &Self::Node) -> Result<(), EngineError>;
}

/// Container holding the nodes, with its bus and queries
pub trait Pipeline: Send + Sync + 'static {
    type Node: Node;
    type Pad: ConnectionPoint<Node = Self::Node>;

    fn name(&self) -> String;

    /// Insert nodes into the container
    fn add_many(&self, nodes: &[&Self::Node]) -> Result<(), EngineError>;

    /// Link nodes pairwise in order
    fn link_many(&self, chain: &[&Self::Node]) -> Result<(), EngineError>;

    /// Register the "new connection point" hook on `source`
    fn connect_pad_added(&self, source: &Self::Node, handler: PadHandler<Self::Pad>);

    /// Register the "connection point removed" hook on `source`
    fn connect_pad_removed(&self, source: &Self::Node, handler: PadHandler<Self::Pad>);

    /// Request a state change; `Async` changes are confirmed on the bus
    fn set_state(&self, state: PlaybackState) -> Result<StateChangeSuccess, EngineError>;

    fn current_state(&self) -> PlaybackState;

    /// State the graph is still moving towards, if any
    fn pending_state(&self) -> Option<PlaybackState>;

    /// Pop the next notification matching `filter`, waiting at most `timeout`
    ///
    /// Notifications of other kinds are discarded.
    fn timed_pop_filtered(
        &self,
        timeout: Duration,
        filter: &[MessageKind],
    ) -> Option<Notification>;

    fn query_position(&self) -> Option<ClockTime>;

    fn query_duration(&self) -> Option<ClockTime>;

    fn query_seeking(&self) -> Option<SeekInfo>;

    /// Flushing, key-unit seek to `position`
    fn seek_simple(&self, position: ClockTime) -> Result<(), EngineError>;
}
