//! GStreamer engine

use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use log::warn;
use once_cell::sync::OnceCell;

use crate::error::EngineError;
use crate::pipeline::engine::{ConnectionPoint, Engine, Node, PadHandler, Pipeline};
use crate::pipeline::message::{MessageKind, Notification};
use crate::pipeline::state::{PlaybackState, StateChangeSuccess};
use crate::pipeline::types::{ClockTime, SeekInfo};

static INIT: OnceCell<Result<(), String>> = OnceCell::new();

/// Engine backed by the system GStreamer installation
pub struct GstEngine {
    _private: (),
}

impl GstEngine {
    /// Initialise GStreamer once per process
    pub fn new() -> anyhow::Result<Self> {
        INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()))
            .clone()
            .map_err(|e| anyhow::anyhow!("Failed to initialize GStreamer: {}", e))?;
        Ok(Self { _private: () })
    }
}

impl Engine for GstEngine {
    type Node = GstNode;
    type Pad = GstPad;
    type Pipeline = GstPipeline;

    fn make_node(&self, factory: &str, name: &str) -> Option<GstNode> {
        gst::ElementFactory::make(factory)
            .name(name)
            .build()
            .map_err(|e| warn!("GstEngine: failed to create {}: {}", factory, e))
            .ok()
            .map(GstNode)
    }

    fn make_pipeline(&self, name: &str) -> Option<GstPipeline> {
        let pipeline = gst::Pipeline::with_name(name);
        let bus = pipeline.bus()?;
        Some(GstPipeline { pipeline, bus })
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}

#[derive(Clone)]
pub struct GstNode(gst::Element);

impl Node for GstNode {
    fn name(&self) -> String {
        self.0.name().to_string()
    }

    fn set_property_str(&self, property: &str, value: &str) {
        self.0.set_property_from_str(property, value);
    }
}

/// A pad exposed by `uridecodebin`; dropping it releases our reference
pub struct GstPad(gst::Pad);

impl ConnectionPoint for GstPad {
    type Node = GstNode;

    fn name(&self) -> String {
        self.0.name().to_string()
    }

    fn media_type(&self) -> Option<String> {
        let caps = self
            .0
            .current_caps()
            .unwrap_or_else(|| self.0.query_caps(None));
        caps.structure(0).map(|s| s.name().to_string())
    }

    fn link_to(&self, target: &GstNode) -> Result<(), EngineError> {
        let sink_pad = target
            .0
            .static_pad("sink")
            .ok_or_else(|| EngineError::Link(format!("{} has no sink pad", target.name())))?;
        if sink_pad.is_linked() {
            return Err(EngineError::Link(format!(
                "{} input is already linked",
                target.name()
            )));
        }
        self.0
            .link(&sink_pad)
            .map(|_| ())
            .map_err(|e| EngineError::Link(format!("{:?}", e)))
    }
}

pub struct GstPipeline {
    pipeline: gst::Pipeline,
    bus: gst::Bus,
}

impl Pipeline for GstPipeline {
    type Node = GstNode;
    type Pad = GstPad;

    fn name(&self) -> String {
        self.pipeline.name().to_string()
    }

    fn add_many(&self, nodes: &[&GstNode]) -> Result<(), EngineError> {
        self.pipeline
            .add_many(nodes.iter().map(|node| &node.0))
            .map_err(|e| EngineError::Add(e.to_string()))
    }

    fn link_many(&self, chain: &[&GstNode]) -> Result<(), EngineError> {
        gst::Element::link_many(chain.iter().map(|node| &node.0))
            .map_err(|e| EngineError::Link(e.to_string()))
    }

    fn connect_pad_added(&self, source: &GstNode, handler: PadHandler<GstPad>) {
        source
            .0
            .connect_pad_added(move |_src, pad| handler(GstPad(pad.clone())));
    }

    fn connect_pad_removed(&self, source: &GstNode, handler: PadHandler<GstPad>) {
        source
            .0
            .connect_pad_removed(move |_src, pad| handler(GstPad(pad.clone())));
    }

    fn set_state(&self, state: PlaybackState) -> Result<StateChangeSuccess, EngineError> {
        match self.pipeline.set_state(to_gst_state(state)) {
            Ok(gst::StateChangeSuccess::Success) => Ok(StateChangeSuccess::Success),
            Ok(gst::StateChangeSuccess::Async) => Ok(StateChangeSuccess::Async),
            Ok(gst::StateChangeSuccess::NoPreroll) => Ok(StateChangeSuccess::NoPreroll),
            Err(_) => Err(EngineError::StateChange(state)),
        }
    }

    fn current_state(&self) -> PlaybackState {
        from_gst_state(self.pipeline.current_state()).unwrap_or(PlaybackState::Null)
    }

    fn pending_state(&self) -> Option<PlaybackState> {
        from_gst_state(self.pipeline.pending_state())
    }

    fn timed_pop_filtered(
        &self,
        timeout: Duration,
        filter: &[MessageKind],
    ) -> Option<Notification> {
        let types: Vec<gst::MessageType> = filter.iter().filter_map(to_gst_type).collect();
        let timeout = gst::ClockTime::from_nseconds(ClockTime::from_duration(timeout).nanos);
        let msg = self.bus.timed_pop_filtered(timeout, &types)?;
        Some(notification_from(&msg))
    }

    fn query_position(&self) -> Option<ClockTime> {
        self.pipeline
            .query_position::<gst::ClockTime>()
            .map(|t| ClockTime::from_nseconds(t.nseconds()))
    }

    fn query_duration(&self) -> Option<ClockTime> {
        self.pipeline
            .query_duration::<gst::ClockTime>()
            .map(|t| ClockTime::from_nseconds(t.nseconds()))
    }

    fn query_seeking(&self) -> Option<SeekInfo> {
        let mut query = gst::query::Seeking::new(gst::Format::Time);
        if !self.pipeline.query(&mut query) {
            return None;
        }
        let (seekable, start, end) = query.result();
        Some(SeekInfo {
            seekable,
            start: clock_from_raw(start.value()),
            end: clock_from_raw(end.value()),
        })
    }

    fn seek_simple(&self, position: ClockTime) -> Result<(), EngineError> {
        let Some(position) = position.valid() else {
            return Err(EngineError::Seek("unknown target position".into()));
        };
        self.pipeline
            .seek_simple(
                gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                gst::ClockTime::from_nseconds(position.nanos),
            )
            .map_err(|e| EngineError::Seek(e.to_string()))
    }
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        // GStreamer wants pipelines in NULL before they are disposed
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn notification_from(msg: &gst::Message) -> Notification {
    use gst::MessageView;

    let emitter = msg
        .src()
        .map(|src| src.name().to_string())
        .unwrap_or_default();

    match msg.view() {
        MessageView::Error(err) => Notification::Error {
            source: emitter,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        },
        MessageView::Warning(w) => Notification::Warning {
            source: emitter,
            message: w.error().to_string(),
            debug: w.debug().map(|d| d.to_string()),
        },
        MessageView::Eos(_) => Notification::EndOfStream,
        MessageView::DurationChanged(_) => Notification::DurationChanged,
        MessageView::StateChanged(sc) => Notification::StateChanged {
            old: from_gst_state(sc.old()).unwrap_or(PlaybackState::Null),
            new: from_gst_state(sc.current()).unwrap_or(PlaybackState::Null),
            pending: from_gst_state(sc.pending()),
            emitter,
        },
        _ => Notification::Other {
            kind: format!("{:?}", msg.type_()),
            emitter,
        },
    }
}

fn to_gst_type(kind: &MessageKind) -> Option<gst::MessageType> {
    match kind {
        MessageKind::Error => Some(gst::MessageType::Error),
        MessageKind::EndOfStream => Some(gst::MessageType::Eos),
        MessageKind::StateChanged => Some(gst::MessageType::StateChanged),
        MessageKind::DurationChanged => Some(gst::MessageType::DurationChanged),
        MessageKind::Warning => Some(gst::MessageType::Warning),
        MessageKind::Other => None,
    }
}

fn to_gst_state(state: PlaybackState) -> gst::State {
    match state {
        PlaybackState::Null => gst::State::Null,
        PlaybackState::Ready => gst::State::Ready,
        PlaybackState::Paused => gst::State::Paused,
        PlaybackState::Playing => gst::State::Playing,
    }
}

fn from_gst_state(state: gst::State) -> Option<PlaybackState> {
    match state {
        gst::State::Null => Some(PlaybackState::Null),
        gst::State::Ready => Some(PlaybackState::Ready),
        gst::State::Paused => Some(PlaybackState::Paused),
        gst::State::Playing => Some(PlaybackState::Playing),
        _ => None,
    }
}

/// Raw formatted values use -1 for "none"
fn clock_from_raw(value: i64) -> ClockTime {
    u64::try_from(value)
        .map(ClockTime::from_nseconds)
        .unwrap_or(ClockTime::NONE)
}
