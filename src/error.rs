//! Error types for openpipe.

use thiserror::Error;

use crate::pipeline::state::PlaybackState;
use crate::pipeline::types::{MediaKind, NodeRole};

/// Failure reported by a media engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Two nodes (or a connection point and a node) could not be linked.
    #[error("link failed: {0}")]
    Link(String),

    /// A node could not be inserted into the container.
    #[error("could not add {0} to the pipeline")]
    Add(String),

    /// The graph refused a state change.
    #[error("state change to {0} failed")]
    StateChange(PlaybackState),

    /// A seek request was rejected.
    #[error("seek failed: {0}")]
    Seek(String),
}

/// Failure while assembling the playback graph.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A node factory returned nothing.
    #[error("not all elements could be created: missing {role}")]
    GraphConstruction { role: NodeRole },

    /// The container name is also used by one of its nodes.
    #[error("pipeline name '{0}' is already used by a node")]
    NameClash(String),

    /// Nodes could not be inserted into the container.
    #[error("elements could not be added to the pipeline")]
    Insert(#[source] EngineError),

    /// A static branch chain could not be linked.
    #[error("elements could not be linked on {branch} branch")]
    Link {
        branch: MediaKind,
        #[source]
        source: EngineError,
    },
}

/// Fatal failure before or while starting a playback session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The initial transition to `Playing` failed; no session was established.
    #[error("unable to set the pipeline to the playing state")]
    InitialState(#[source] EngineError),

    /// A session thread could not be started.
    #[error("failed to spawn the {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_culprit() {
        let err = BuildError::GraphConstruction {
            role: NodeRole::Sink(MediaKind::Video),
        };
        assert_eq!(
            err.to_string(),
            "not all elements could be created: missing video sink"
        );

        let err = BuildError::Link {
            branch: MediaKind::Audio,
            source: EngineError::Link("audio-convert -> resample".into()),
        };
        assert_eq!(err.to_string(), "elements could not be linked on audio branch");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_session_wraps_build() {
        let err: SessionError = BuildError::GraphConstruction {
            role: NodeRole::Source,
        }
        .into();
        assert!(matches!(err, SessionError::Build(_)));
        assert_eq!(
            err.to_string(),
            "not all elements could be created: missing source"
        );
    }
}
