//! Graph builder
//!
//! Creates the container, the source and both branches, then links each
//! branch chain. The source outputs are linked later by the dynamic linker
//! once the source discovers its streams.

use std::sync::Arc;

use log::{error, info};

use crate::config::ElementFactories;
use crate::error::BuildError;

use super::engine::{Engine, Node, Pipeline};
use super::types::{MediaKind, NodeRole};

/// Names given to the nodes of every graph
pub const NODE_NAMES: &[&str] = &[
    "source",
    "audio-queue",
    "audio-convert",
    "resample",
    "audio-sink",
    "video-queue",
    "video-convert",
    "video-sink",
];

/// One chain `queue -> convert [-> resample] -> sink`
pub struct Branch<N> {
    pub kind: MediaKind,
    pub queue: N,
    pub convert: N,
    pub resample: Option<N>,
    pub sink: N,
}

impl<N: Node> Branch<N> {
    /// Node the source output links into
    pub fn entry(&self) -> &N {
        &self.queue
    }

    /// Nodes in link order
    pub fn chain(&self) -> Vec<&N> {
        let mut chain = vec![&self.queue, &self.convert];
        chain.extend(self.resample.as_ref());
        chain.push(&self.sink);
        chain
    }
}

/// Fully built (but not yet started) playback graph
pub struct PlaybackGraph<E: Engine> {
    pipeline: Arc<E::Pipeline>,
    source: E::Node,
    audio: Branch<E::Node>,
    video: Branch<E::Node>,
}

impl<E: Engine> PlaybackGraph<E> {
    /// Build the graph for `uri`
    ///
    /// On error every node created so far is released before returning.
    pub fn build(
        engine: &E,
        pipeline_name: &str,
        uri: &str,
        factories: &ElementFactories,
    ) -> Result<Self, BuildError> {
        // State changes of the root are told apart from its children by name
        if NODE_NAMES.contains(&pipeline_name) {
            error!("GraphBuilder: pipeline name '{}' clashes with a node", pipeline_name);
            return Err(BuildError::NameClash(pipeline_name.to_string()));
        }

        let source = make(engine, &factories.source, "source", NodeRole::Source)?;
        let audio = Branch {
            kind: MediaKind::Audio,
            queue: make(
                engine,
                &factories.queue,
                "audio-queue",
                NodeRole::Queue(MediaKind::Audio),
            )?,
            convert: make(
                engine,
                &factories.audio_convert,
                "audio-convert",
                NodeRole::Convert(MediaKind::Audio),
            )?,
            resample: Some(make(
                engine,
                &factories.audio_resample,
                "resample",
                NodeRole::Resample,
            )?),
            sink: make(
                engine,
                &factories.audio_sink,
                "audio-sink",
                NodeRole::Sink(MediaKind::Audio),
            )?,
        };
        let video = Branch {
            kind: MediaKind::Video,
            queue: make(
                engine,
                &factories.queue,
                "video-queue",
                NodeRole::Queue(MediaKind::Video),
            )?,
            convert: make(
                engine,
                &factories.video_convert,
                "video-convert",
                NodeRole::Convert(MediaKind::Video),
            )?,
            resample: None,
            sink: make(
                engine,
                &factories.video_sink,
                "video-sink",
                NodeRole::Sink(MediaKind::Video),
            )?,
        };
        let pipeline = engine.make_pipeline(pipeline_name).ok_or_else(|| {
            error!("GraphBuilder: could not create the {} container", engine.name());
            BuildError::GraphConstruction {
                role: NodeRole::Container,
            }
        })?;

        let mut nodes = vec![&source];
        nodes.extend(audio.chain());
        nodes.extend(video.chain());
        pipeline.add_many(&nodes).map_err(BuildError::Insert)?;

        for branch in [&audio, &video] {
            pipeline.link_many(&branch.chain()).map_err(|e| {
                error!("GraphBuilder: {} branch could not be linked: {}", branch.kind, e);
                BuildError::Link {
                    branch: branch.kind,
                    source: e,
                }
            })?;
        }

        source.set_property_str("uri", uri);
        info!(
            "GraphBuilder: {} pipeline '{}' ready for {}",
            engine.name(),
            pipeline.name(),
            uri
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            source,
            audio,
            video,
        })
    }

    pub fn pipeline(&self) -> &Arc<E::Pipeline> {
        &self.pipeline
    }

    pub fn source(&self) -> &E::Node {
        &self.source
    }

    pub fn branch(&self, kind: MediaKind) -> &Branch<E::Node> {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }
}

fn make<E: Engine>(
    engine: &E,
    factory: &str,
    name: &str,
    role: NodeRole,
) -> Result<E::Node, BuildError> {
    engine.make_node(factory, name).ok_or_else(|| {
        error!("GraphBuilder: not all elements could be created (missing {} '{}')", role, factory);
        BuildError::GraphConstruction { role }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::SimEngine;
    use crate::error::EngineError;
    use std::thread;
    use std::time::{Duration, Instant};

    const URI: &str = "file:///media/clip.mp4";

    /// The sim worker may hold the container for one tick after it is dropped
    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn link(up: &str, down: &str) -> (String, String) {
        (up.to_string(), down.to_string())
    }

    #[test]
    fn test_build_links_both_branches() {
        let engine = SimEngine::new();
        let graph =
            PlaybackGraph::build(&engine, "test", URI, &ElementFactories::default()).unwrap();

        assert_eq!(engine.live_nodes(), 8);
        assert_eq!(graph.pipeline().node_names(), NODE_NAMES);
        assert_eq!(graph.source().property("uri").as_deref(), Some(URI));

        let links = graph.pipeline().links();
        assert_eq!(
            links,
            vec![
                link("audio-queue", "audio-convert"),
                link("audio-convert", "resample"),
                link("resample", "audio-sink"),
                link("video-queue", "video-convert"),
                link("video-convert", "video-sink"),
            ]
        );
        assert_eq!(graph.branch(MediaKind::Audio).entry().name(), "audio-queue");
        assert_eq!(graph.branch(MediaKind::Video).chain().len(), 3);
    }

    #[test]
    fn test_missing_factory_releases_everything() {
        let engine = SimEngine::new().with_missing_factory("autovideosink");
        let err = PlaybackGraph::build(&engine, "test", URI, &ElementFactories::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            BuildError::GraphConstruction {
                role: NodeRole::Sink(MediaKind::Video)
            }
        ));
        assert_eq!(engine.live_nodes(), 0);
    }

    #[test]
    fn test_missing_container() {
        let engine = SimEngine::new().with_missing_factory("pipeline");
        let err = PlaybackGraph::build(&engine, "test", URI, &ElementFactories::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            BuildError::GraphConstruction {
                role: NodeRole::Container
            }
        ));
        assert_eq!(engine.live_nodes(), 0);
    }

    #[test]
    fn test_refused_chain_link() {
        let engine = SimEngine::new().with_refused_link("video-sink");
        let err = PlaybackGraph::build(&engine, "test", URI, &ElementFactories::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            BuildError::Link {
                branch: MediaKind::Video,
                ..
            }
        ));
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_refused_insert_releases_everything() {
        let engine = SimEngine::new().with_refused_add("video-convert");
        let err = PlaybackGraph::build(&engine, "test", URI, &ElementFactories::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            BuildError::Insert(EngineError::Add(ref name)) if name == "video-convert"
        ));
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_pipeline_name_must_not_shadow_a_node() {
        let engine = SimEngine::new();
        for name in ["source", "audio-sink"] {
            let err = PlaybackGraph::build(&engine, name, URI, &ElementFactories::default())
                .err()
                .unwrap();
            assert!(matches!(err, BuildError::NameClash(ref clash) if clash == name));
        }
        assert_eq!(engine.live_nodes(), 0);
    }

    #[test]
    fn test_configured_factories() {
        let engine = SimEngine::new();
        let factories = ElementFactories {
            audio_sink: "fakesink".into(),
            video_sink: "fakesink".into(),
            ..ElementFactories::default()
        };
        let graph = PlaybackGraph::build(&engine, "test", URI, &factories).unwrap();
        assert_eq!(graph.branch(MediaKind::Video).sink.factory(), "fakesink");
    }
}
