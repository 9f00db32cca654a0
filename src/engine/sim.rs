//! In-process engine honouring the whole engine contract
//!
//! No media is decoded. The engine keeps the node graph and its links,
//! walks states one step at a time, exposes connection points on a worker
//! thread after a short preroll, runs a playback clock, and posts the same
//! notifications a real engine would. Media content is described by a
//! [`MediaScript`], and failures can be injected through [`SimFaults`].
//!
//! The engine counts live nodes, live connection-point references and
//! dynamic link attempts so resource handling can be checked.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use once_cell::sync::Lazy;

use crate::error::EngineError;
use crate::pipeline::engine::{ConnectionPoint, Engine, Node, PadHandler, Pipeline};
use crate::pipeline::message::{MessageKind, Notification};
use crate::pipeline::state::{PlaybackState, StateChangeSuccess};
use crate::pipeline::types::{ClockTime, SeekInfo};

/// Worker tick: preroll, state steps and the clock advance at this rate
const TICK: Duration = Duration::from_millis(5);

/// Static pads of a factory: (has sink, has static src)
static FACTORIES: Lazy<HashMap<&'static str, (bool, bool)>> = Lazy::new(|| {
    HashMap::from([
        // Exposes its outputs dynamically
        ("uridecodebin", (false, false)),
        ("queue", (true, true)),
        ("audioconvert", (true, true)),
        ("audioresample", (true, true)),
        ("videoconvert", (true, true)),
        ("autoaudiosink", (true, false)),
        ("autovideosink", (true, false)),
        ("fakesink", (true, false)),
    ])
});

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "oga", "opus", "flac", "wav", "m4a", "aac"];
const LIVE_SCHEMES: &[&str] = &["rtsp://", "rtp://", "udp://", "srt://"];

/// What the source "contains"
#[derive(Debug, Clone, PartialEq)]
pub struct MediaScript {
    /// Media type of each connection point, in discovery order (`None`: no caps)
    pub streams: Vec<Option<String>>,
    /// `None` for live content
    pub duration: Option<ClockTime>,
    pub seekable: bool,
    /// Post an error once playback reaches this position
    pub error_at: Option<(ClockTime, String)>,
    /// Delay between leaving `Ready` and exposing connection points
    pub preroll: Duration,
    /// Clock speed relative to wall time
    pub rate: f64,
}

impl MediaScript {
    /// A seekable file with one video and one audio stream
    pub fn audio_video(duration: ClockTime) -> Self {
        Self {
            streams: vec![Some("video/x-raw".into()), Some("audio/x-raw".into())],
            duration: Some(duration),
            seekable: true,
            error_at: None,
            preroll: Duration::from_millis(150),
            rate: 1.0,
        }
    }

    /// A seekable file with a single audio stream
    pub fn audio_only(duration: ClockTime) -> Self {
        Self {
            streams: vec![Some("audio/x-raw".into())],
            ..Self::audio_video(duration)
        }
    }

    /// Guess the content from the locator
    ///
    /// Audio file extensions give an audio-only stream, live schemes give an
    /// unseekable stream without duration, anything else audio and video.
    pub fn for_uri(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();

        let mut script = if AUDIO_EXTENSIONS.contains(&extension) {
            Self::audio_only(ClockTime::from_seconds(60))
        } else {
            Self::audio_video(ClockTime::from_seconds(60))
        };
        if LIVE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            script.duration = None;
            script.seekable = false;
        }
        script
    }

    pub fn with_streams(mut self, streams: &[&str]) -> Self {
        self.streams = streams.iter().map(|s| Some(s.to_string())).collect();
        self
    }

    /// Append a connection point that never negotiates a media type
    pub fn with_untyped_stream(mut self) -> Self {
        self.streams.push(None);
        self
    }

    pub fn with_error_at(mut self, position: ClockTime, message: impl Into<String>) -> Self {
        self.error_at = Some((position, message.into()));
        self
    }

    pub fn with_preroll(mut self, preroll: Duration) -> Self {
        self.preroll = preroll;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }
}

/// Injected failures
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Factory names (or `"pipeline"`) that can't be instantiated
    pub missing_factories: HashSet<String>,
    /// Node names whose input refuses every link
    pub refuse_links: HashSet<String>,
    /// Target states `set_state` refuses
    pub fail_states: HashSet<PlaybackState>,
    /// Node names the container refuses to take in
    pub refuse_adds: HashSet<String>,
}

#[derive(Debug, Default)]
struct Counters {
    live_nodes: AtomicUsize,
    live_pad_refs: AtomicUsize,
    link_attempts: AtomicUsize,
    state_requests: AtomicUsize,
}

/// Simulated engine
#[derive(Clone, Default)]
pub struct SimEngine {
    script: Option<MediaScript>,
    faults: SimFaults,
    counters: Arc<Counters>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `script` whatever the source URI says
    pub fn with_script(mut self, script: MediaScript) -> Self {
        self.script = Some(script);
        self
    }

    pub fn with_missing_factory(mut self, factory: &str) -> Self {
        self.faults.missing_factories.insert(factory.to_string());
        self
    }

    pub fn with_refused_link(mut self, node: &str) -> Self {
        self.faults.refuse_links.insert(node.to_string());
        self
    }

    pub fn with_refused_add(mut self, node: &str) -> Self {
        self.faults.refuse_adds.insert(node.to_string());
        self
    }

    pub fn with_failing_state(mut self, state: PlaybackState) -> Self {
        self.faults.fail_states.insert(state);
        self
    }

    /// Nodes created by this engine and not yet released
    pub fn live_nodes(&self) -> usize {
        self.counters.live_nodes.load(Ordering::SeqCst)
    }

    /// Connection-point references handed out and not yet released
    pub fn live_pad_refs(&self) -> usize {
        self.counters.live_pad_refs.load(Ordering::SeqCst)
    }

    /// Connection point link attempts so far
    pub fn link_attempts(&self) -> usize {
        self.counters.link_attempts.load(Ordering::SeqCst)
    }

    /// `set_state` calls so far
    pub fn state_requests(&self) -> usize {
        self.counters.state_requests.load(Ordering::SeqCst)
    }
}

impl Engine for SimEngine {
    type Node = SimNode;
    type Pad = SimPad;
    type Pipeline = SimPipeline;

    fn make_node(&self, factory: &str, name: &str) -> Option<SimNode> {
        if self.faults.missing_factories.contains(factory) {
            return None;
        }
        let &(sink_pad, src_pad) = FACTORIES.get(factory)?;

        self.counters.live_nodes.fetch_add(1, Ordering::SeqCst);
        Some(SimNode {
            inner: Arc::new(NodeInner {
                name: name.to_string(),
                factory: factory.to_string(),
                sink_pad,
                src_pad,
                properties: Mutex::new(HashMap::new()),
                counters: self.counters.clone(),
            }),
        })
    }

    fn make_pipeline(&self, name: &str) -> Option<SimPipeline> {
        if self.faults.missing_factories.contains("pipeline") {
            return None;
        }
        SimPipeline::spawn(name, self.script.clone(), self.faults.clone(), self.counters.clone())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

struct NodeInner {
    name: String,
    factory: String,
    sink_pad: bool,
    src_pad: bool,
    properties: Mutex<HashMap<String, String>>,
    counters: Arc<Counters>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        self.counters.live_nodes.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Node handle of the simulated engine
#[derive(Clone)]
pub struct SimNode {
    inner: Arc<NodeInner>,
}

impl SimNode {
    pub fn factory(&self) -> &str {
        &self.inner.factory
    }

    pub fn property(&self, property: &str) -> Option<String> {
        lock(&self.inner.properties).get(property).cloned()
    }

    fn same(&self, other: &SimNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Node for SimNode {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn set_property_str(&self, property: &str, value: &str) {
        lock(&self.inner.properties).insert(property.to_string(), value.to_string());
    }
}

impl std::fmt::Debug for SimNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimNode")
            .field("name", &self.inner.name)
            .field("factory", &self.inner.factory)
            .finish()
    }
}

/// Transient reference attached to a connection point
struct PadRef {
    counters: Arc<Counters>,
}

impl PadRef {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.live_pad_refs.fetch_add(1, Ordering::SeqCst);
        Self {
            counters: counters.clone(),
        }
    }
}

impl Drop for PadRef {
    fn drop(&mut self) {
        self.counters.live_pad_refs.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connection point exposed by a simulated source
pub struct SimPad {
    name: String,
    media_type: Option<String>,
    /// Name of the node that exposed this point
    owner: String,
    pipeline: Weak<PipelineInner>,
    _ref: PadRef,
}

impl SimPad {
    /// Link identifier as recorded in the graph (`owner:pad`)
    fn link_name(&self) -> String {
        format!("{}:{}", self.owner, self.name)
    }
}

impl ConnectionPoint for SimPad {
    type Node = SimNode;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn media_type(&self) -> Option<String> {
        self.media_type.clone()
    }

    fn link_to(&self, target: &SimNode) -> Result<(), EngineError> {
        let Some(pipeline) = self.pipeline.upgrade() else {
            return Err(EngineError::Link(format!("{}: pipeline is gone", self.name)));
        };
        pipeline.counters.link_attempts.fetch_add(1, Ordering::SeqCst);

        let mut graph = lock(&pipeline.graph);
        if !graph.pads.iter().any(|pad| pad.name == self.name) {
            return Err(EngineError::Link(format!("{} no longer exists", self.name)));
        }
        let link_name = self.link_name();
        graph.check_input(&pipeline.faults, &link_name, target)?;
        graph.links.push((link_name, target.name()));
        Ok(())
    }
}

struct PadInfo {
    name: String,
    media_type: Option<String>,
}

/// Playback clock, frozen outside `Playing`
#[derive(Default)]
struct PlayClock {
    base: ClockTime,
    running_since: Option<Instant>,
    rate: f64,
}

impl PlayClock {
    fn now(&self, limit: Option<ClockTime>) -> ClockTime {
        let elapsed = self
            .running_since
            .and_then(|since| {
                Duration::try_from_secs_f64(since.elapsed().as_secs_f64() * self.rate).ok()
            })
            .map(ClockTime::from_duration)
            .unwrap_or_default();
        let position = ClockTime::from_nseconds(
            self.base
                .nanos
                .saturating_add(elapsed.nanos)
                .min(ClockTime::MAX.nanos),
        );
        match limit {
            Some(limit) => position.min(limit),
            None => position,
        }
    }
}

struct Graph {
    nodes: Vec<SimNode>,
    /// (upstream, downstream) node names; dynamic points appear as `owner:pad`
    links: Vec<(String, String)>,
    current: PlaybackState,
    target: PlaybackState,
    script: Option<MediaScript>,
    pads: Vec<PadInfo>,
    preroll_started: Option<Instant>,
    clock: PlayClock,
    eos_posted: bool,
    error_posted: bool,
}

impl Graph {
    fn contains(&self, node: &SimNode) -> bool {
        self.nodes.iter().any(|n| n.same(node))
    }

    fn discovered(&self) -> bool {
        self.script.is_some()
    }

    fn duration(&self) -> Option<ClockTime> {
        self.script.as_ref().and_then(|s| s.duration)
    }

    fn position(&self) -> ClockTime {
        self.clock.now(self.duration())
    }

    /// Whether `target` can accept a link from `upstream`
    fn check_input(
        &self,
        faults: &SimFaults,
        upstream: &str,
        target: &SimNode,
    ) -> Result<(), EngineError> {
        let target_name = target.name();
        if !self.contains(target) {
            return Err(EngineError::Link(format!(
                "{upstream} -> {target_name}: not in the same pipeline"
            )));
        }
        if !target.inner.sink_pad {
            return Err(EngineError::Link(format!("{target_name} has no input")));
        }
        if faults.refuse_links.contains(&target_name) {
            return Err(EngineError::Link(format!(
                "{upstream} -> {target_name}: incompatible formats"
            )));
        }
        if self.links.iter().any(|(_, down)| *down == target_name) {
            return Err(EngineError::Link(format!(
                "{target_name} input is already linked"
            )));
        }
        Ok(())
    }

    /// Forget the discovered content and every dynamic link
    fn tear_down(&mut self) -> Vec<PadInfo> {
        let torn_down: Vec<String> = self.pads.iter().map(|pad| format!(":{}", pad.name)).collect();
        self.links
            .retain(|(up, _)| !torn_down.iter().any(|suffix| up.ends_with(suffix.as_str())));
        self.script = None;
        self.preroll_started = None;
        self.clock = PlayClock::default();
        self.eos_posted = false;
        self.error_posted = false;
        self.pads.drain(..).collect()
    }

    fn link_static(
        &mut self,
        faults: &SimFaults,
        upstream: &SimNode,
        downstream: &SimNode,
    ) -> Result<(), EngineError> {
        let up = upstream.name();
        if !self.contains(upstream) {
            return Err(EngineError::Link(format!("{up} is not in the pipeline")));
        }
        if !upstream.inner.src_pad {
            return Err(EngineError::Link(format!("{up} has no static output")));
        }
        if self.links.iter().any(|(u, _)| *u == up) {
            return Err(EngineError::Link(format!("{up} output is already linked")));
        }
        self.check_input(faults, &up, downstream)?;
        self.links.push((up, downstream.name()));
        Ok(())
    }
}

#[derive(Default)]
struct Handlers {
    pad_added: Vec<(String, Arc<dyn Fn(SimPad) + Send + Sync>)>,
    pad_removed: Vec<(String, Arc<dyn Fn(SimPad) + Send + Sync>)>,
}

struct PipelineInner {
    /// Handed to connection points so they can link back into the graph
    me: Weak<PipelineInner>,
    name: String,
    script_override: Option<MediaScript>,
    faults: SimFaults,
    counters: Arc<Counters>,
    graph: Mutex<Graph>,
    handlers: Mutex<Handlers>,
    bus_tx: Sender<Notification>,
    bus_rx: Mutex<Receiver<Notification>>,
}

/// Container of the simulated engine
#[derive(Clone)]
pub struct SimPipeline {
    inner: Arc<PipelineInner>,
}

impl SimPipeline {
    fn spawn(
        name: &str,
        script_override: Option<MediaScript>,
        faults: SimFaults,
        counters: Arc<Counters>,
    ) -> Option<Self> {
        let (bus_tx, bus_rx) = mpsc::channel();
        let inner = Arc::new_cyclic(|me| PipelineInner {
            me: me.clone(),
            name: name.to_string(),
            script_override,
            faults,
            counters,
            graph: Mutex::new(Graph {
                nodes: Vec::new(),
                links: Vec::new(),
                current: PlaybackState::Null,
                target: PlaybackState::Null,
                script: None,
                pads: Vec::new(),
                preroll_started: None,
                clock: PlayClock::default(),
                eos_posted: false,
                error_posted: false,
            }),
            handlers: Mutex::new(Handlers::default()),
            bus_tx,
            bus_rx: Mutex::new(bus_rx),
        });

        // The worker only holds a weak reference and ends with the pipeline
        let weak = Arc::downgrade(&inner);
        let spawned = thread::Builder::new()
            .name(format!("{name}:worker"))
            .spawn(move || {
                loop {
                    thread::sleep(TICK);
                    let Some(pipeline) = weak.upgrade() else {
                        break;
                    };
                    pipeline.tick();
                }
            });
        if let Err(e) = spawned {
            error!("SimEngine: failed to start the worker of {}: {}", name, e);
            return None;
        }

        Some(Self { inner })
    }

    /// Inject a notification on the bus
    pub fn post(&self, notification: Notification) {
        self.inner.post(notification);
    }

    /// Expose a connection point on `source` right away, running the
    /// pad-added hooks on the calling thread
    pub fn announce(&self, source: &SimNode, pad: &str, media_type: Option<&str>) {
        let info = || PadInfo {
            name: pad.to_string(),
            media_type: media_type.map(str::to_string),
        };
        lock(&self.inner.graph).pads.push(info());
        self.inner.fire(vec![info()], &source.name(), true);
    }

    /// Current links as (upstream, downstream) names
    pub fn links(&self) -> Vec<(String, String)> {
        lock(&self.inner.graph).links.clone()
    }

    /// Whether `downstream` has something linked into its input
    pub fn is_input_linked(&self, downstream: &str) -> bool {
        lock(&self.inner.graph)
            .links
            .iter()
            .any(|(_, down)| down == downstream)
    }

    /// Names of the nodes in the container
    pub fn node_names(&self) -> Vec<String> {
        lock(&self.inner.graph).nodes.iter().map(|n| n.name()).collect()
    }
}

impl PipelineInner {
    fn post(&self, notification: Notification) {
        trace!("SimEngine: post {}", notification);
        // The receiver lives in the same struct, so this can't fail
        let _ = self.bus_tx.send(notification);
    }

    /// Move one step toward `next`, posting state changes for every node and
    /// then for the pipeline. Returns the connection points torn down.
    fn apply_step(&self, graph: &mut Graph, next: PlaybackState) -> Vec<PadInfo> {
        let old = graph.current;
        graph.current = next;
        let pending = (next != graph.target).then_some(graph.target);

        let mut removed = Vec::new();
        if old == PlaybackState::Playing {
            graph.clock.base = graph.position();
            graph.clock.running_since = None;
        }
        if next == PlaybackState::Playing {
            graph.clock.running_since = Some(Instant::now());
        }
        if old == PlaybackState::Paused && next == PlaybackState::Ready {
            removed = graph.tear_down();
        }

        for node in &graph.nodes {
            self.post(Notification::StateChanged {
                old,
                new: next,
                pending,
                emitter: node.name(),
            });
        }
        self.post(Notification::StateChanged {
            old,
            new: next,
            pending,
            emitter: self.name.clone(),
        });
        removed
    }

    /// The node that exposes connection points
    fn dynamic_source(graph: &Graph) -> Option<SimNode> {
        graph
            .nodes
            .iter()
            .find(|n| !n.inner.sink_pad && !n.inner.src_pad)
            .cloned()
    }

    fn fire(&self, pads: Vec<PadInfo>, owner: &str, added: bool) {
        let handlers: Vec<_> = {
            let handlers = lock(&self.handlers);
            let list = if added {
                &handlers.pad_added
            } else {
                &handlers.pad_removed
            };
            list.iter()
                .filter(|(node, _)| node == owner)
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        for pad in pads {
            for handler in &handlers {
                handler(SimPad {
                    name: pad.name.clone(),
                    media_type: pad.media_type.clone(),
                    owner: owner.to_string(),
                    pipeline: self.me.clone(),
                    _ref: PadRef::new(&self.counters),
                });
            }
        }
    }

    fn tick(&self) {
        let mut graph = lock(&self.graph);

        if let Some(next) = graph.current.next_toward(graph.target)
            && next > graph.current
        {
            if next == PlaybackState::Paused && !graph.discovered() {
                let preroll_started = *graph.preroll_started.get_or_insert_with(Instant::now);
                let script = self.resolve_script(&graph);
                if preroll_started.elapsed() < script.preroll {
                    return;
                }
                graph.clock.rate = script.rate;
                let Some(source) = Self::dynamic_source(&graph) else {
                    graph.script = Some(script);
                    self.apply_step(&mut graph, next);
                    return;
                };

                let pads: Vec<PadInfo> = script
                    .streams
                    .iter()
                    .enumerate()
                    .map(|(i, media_type)| PadInfo {
                        name: format!("src_{i}"),
                        media_type: media_type.clone(),
                    })
                    .collect();
                let announce: Vec<PadInfo> = pads
                    .iter()
                    .map(|pad| PadInfo {
                        name: pad.name.clone(),
                        media_type: pad.media_type.clone(),
                    })
                    .collect();
                let has_duration = script.duration.is_some();
                graph.pads = pads;
                graph.script = Some(script);
                debug!(
                    "SimEngine: {} exposes {} connection points",
                    source.name(),
                    announce.len()
                );

                // Handlers link back into the graph, so call them unlocked
                drop(graph);
                self.fire(announce, &source.name(), true);
                if has_duration {
                    self.post(Notification::DurationChanged);
                }
                graph = lock(&self.graph);
                // A stop may have raced with the announcement
                if graph.current.next_toward(graph.target) != Some(PlaybackState::Paused) {
                    let removed = graph.tear_down();
                    drop(graph);
                    self.fire(removed, &source.name(), false);
                    return;
                }
            }
            self.apply_step(&mut graph, next);
            return;
        }

        if graph.current == PlaybackState::Playing {
            let position = graph.position();
            let error_at = graph.script.as_ref().and_then(|s| s.error_at.clone());
            if let Some((at, message)) = error_at
                && !graph.error_posted
                && position >= at
            {
                graph.error_posted = true;
                let source = Self::dynamic_source(&graph)
                    .map(|n| n.name())
                    .unwrap_or_else(|| self.name.clone());
                self.post(Notification::Error {
                    source,
                    message,
                    debug: Some(format!("simulated failure at {at}")),
                });
            }
            if let Some(duration) = graph.duration()
                && !graph.eos_posted
                && position >= duration
            {
                graph.eos_posted = true;
                self.post(Notification::EndOfStream);
            }
        }
    }

    fn resolve_script(&self, graph: &Graph) -> MediaScript {
        if let Some(script) = &self.script_override {
            return script.clone();
        }
        Self::dynamic_source(graph)
            .and_then(|source| source.property("uri"))
            .map(|uri| MediaScript::for_uri(&uri))
            .unwrap_or_else(|| MediaScript::audio_video(ClockTime::from_seconds(60)))
    }
}

impl Pipeline for SimPipeline {
    type Node = SimNode;
    type Pad = SimPad;

    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn add_many(&self, nodes: &[&SimNode]) -> Result<(), EngineError> {
        let mut graph = lock(&self.inner.graph);
        for node in nodes {
            if graph.contains(node)
                || graph.nodes.iter().any(|n| n.name() == node.name())
                || self.inner.faults.refuse_adds.contains(&node.name())
            {
                return Err(EngineError::Add(node.name()));
            }
            graph.nodes.push((*node).clone());
        }
        Ok(())
    }

    fn link_many(&self, chain: &[&SimNode]) -> Result<(), EngineError> {
        let mut graph = lock(&self.inner.graph);
        for pair in chain.windows(2) {
            graph.link_static(&self.inner.faults, pair[0], pair[1])?;
        }
        Ok(())
    }

    fn connect_pad_added(&self, source: &SimNode, handler: PadHandler<SimPad>) {
        lock(&self.inner.handlers)
            .pad_added
            .push((source.name(), Arc::from(handler)));
    }

    fn connect_pad_removed(&self, source: &SimNode, handler: PadHandler<SimPad>) {
        lock(&self.inner.handlers)
            .pad_removed
            .push((source.name(), Arc::from(handler)));
    }

    fn set_state(&self, state: PlaybackState) -> Result<StateChangeSuccess, EngineError> {
        let inner = &self.inner;
        inner.counters.state_requests.fetch_add(1, Ordering::SeqCst);
        if inner.faults.fail_states.contains(&state) {
            return Err(EngineError::StateChange(state));
        }

        let mut graph = lock(&inner.graph);
        graph.target = state;
        if graph.current == state {
            return Ok(StateChangeSuccess::Success);
        }

        if state < graph.current {
            // Downward changes complete synchronously
            let mut removed = Vec::new();
            while let Some(next) = graph.current.next_toward(state) {
                removed.extend(inner.apply_step(&mut graph, next));
            }
            let source = PipelineInner::dynamic_source(&graph).map(|n| n.name());
            drop(graph);
            if let Some(source) = source
                && !removed.is_empty()
            {
                inner.fire(removed, &source, false);
            }
            return Ok(StateChangeSuccess::Success);
        }

        if graph.current == PlaybackState::Null {
            inner.apply_step(&mut graph, PlaybackState::Ready);
        }
        if graph.current == state {
            Ok(StateChangeSuccess::Success)
        } else {
            Ok(StateChangeSuccess::Async)
        }
    }

    fn current_state(&self) -> PlaybackState {
        lock(&self.inner.graph).current
    }

    fn pending_state(&self) -> Option<PlaybackState> {
        let graph = lock(&self.inner.graph);
        (graph.target != graph.current).then_some(graph.target)
    }

    fn timed_pop_filtered(
        &self,
        timeout: Duration,
        filter: &[MessageKind],
    ) -> Option<Notification> {
        let deadline = Instant::now() + timeout;
        let bus = lock(&self.inner.bus_rx);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match bus.recv_timeout(remaining) {
                Ok(notification) if notification.matches(filter) => return Some(notification),
                Ok(notification) => trace!("SimEngine: dropped {}", notification),
                Err(_) => return None,
            }
        }
    }

    fn query_position(&self) -> Option<ClockTime> {
        let graph = lock(&self.inner.graph);
        (graph.current >= PlaybackState::Paused && graph.discovered()).then(|| graph.position())
    }

    fn query_duration(&self) -> Option<ClockTime> {
        lock(&self.inner.graph).duration()
    }

    fn query_seeking(&self) -> Option<SeekInfo> {
        let graph = lock(&self.inner.graph);
        if graph.current < PlaybackState::Paused {
            return None;
        }
        let script = graph.script.as_ref()?;
        Some(SeekInfo {
            seekable: script.seekable,
            start: ClockTime::ZERO,
            end: script.duration.unwrap_or(ClockTime::NONE),
        })
    }

    fn seek_simple(&self, position: ClockTime) -> Result<(), EngineError> {
        let mut graph = lock(&self.inner.graph);
        if graph.current < PlaybackState::Paused {
            return Err(EngineError::Seek("pipeline is not prerolled".into()));
        }
        let seekable = graph.script.as_ref().is_some_and(|s| s.seekable);
        if !seekable {
            return Err(EngineError::Seek("stream is not seekable".into()));
        }
        if !position.is_valid() {
            return Err(EngineError::Seek("unknown target position".into()));
        }

        let limit = graph.duration().unwrap_or(position);
        graph.clock.base = position.min(limit);
        if graph.current == PlaybackState::Playing {
            graph.clock.running_since = Some(Instant::now());
        }
        graph.eos_posted = false;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(engine: &SimEngine) -> SimPipeline {
        engine.make_pipeline("sim").unwrap()
    }

    fn next(pipeline: &SimPipeline) -> Notification {
        pipeline
            .timed_pop_filtered(Duration::from_secs(2), &[MessageKind::StateChanged])
            .unwrap()
    }

    #[test]
    fn test_unknown_factory() {
        let engine = SimEngine::new();
        assert!(engine.make_node("doesnotexist", "x").is_none());
        assert_eq!(engine.live_nodes(), 0);

        let node = engine.make_node("queue", "q").unwrap();
        let copy = node.clone();
        assert_eq!(engine.live_nodes(), 1);
        drop(node);
        drop(copy);
        assert_eq!(engine.live_nodes(), 0);
    }

    #[test]
    fn test_states_step_one_at_a_time() {
        let engine = SimEngine::new().with_script(
            MediaScript::audio_only(ClockTime::from_seconds(1)).with_preroll(Duration::ZERO),
        );
        let pipeline = pipeline(&engine);

        assert_eq!(
            pipeline.set_state(PlaybackState::Playing),
            Ok(StateChangeSuccess::Async)
        );
        assert_eq!(pipeline.pending_state(), Some(PlaybackState::Playing));

        let mut seen = Vec::new();
        for _ in 0..3 {
            if let Notification::StateChanged {
                old, new, emitter, ..
            } = next(&pipeline)
            {
                assert_eq!(emitter, "sim");
                seen.push((old, new));
            }
        }
        assert_eq!(
            seen,
            vec![
                (PlaybackState::Null, PlaybackState::Ready),
                (PlaybackState::Ready, PlaybackState::Paused),
                (PlaybackState::Paused, PlaybackState::Playing),
            ]
        );
        assert_eq!(pipeline.current_state(), PlaybackState::Playing);
        assert_eq!(pipeline.pending_state(), None);

        // Downward changes are immediate
        assert_eq!(
            pipeline.set_state(PlaybackState::Null),
            Ok(StateChangeSuccess::Success)
        );
        assert_eq!(pipeline.current_state(), PlaybackState::Null);
    }

    #[test]
    fn test_bus_filter_discards_other_kinds() {
        let pipeline = pipeline(&SimEngine::new());
        pipeline.post(Notification::Warning {
            source: "x".into(),
            message: "ignored".into(),
            debug: None,
        });
        pipeline.post(Notification::EndOfStream);

        let popped =
            pipeline.timed_pop_filtered(Duration::from_millis(100), &[MessageKind::EndOfStream]);
        assert_eq!(popped, Some(Notification::EndOfStream));
        assert_eq!(
            pipeline.timed_pop_filtered(Duration::from_millis(20), &[MessageKind::Warning]),
            None
        );
    }

    #[test]
    fn test_connection_points_appear_after_preroll() {
        let engine = SimEngine::new();
        let pipeline = pipeline(&engine);
        let source = engine.make_node("uridecodebin", "source").unwrap();
        source.set_property_str("uri", "file:///music/track.flac");
        pipeline.add_many(&[&source]).unwrap();

        let (tx, rx) = mpsc::channel();
        pipeline.connect_pad_added(
            &source,
            Box::new(move |pad| {
                let _ = tx.send((pad.name(), pad.media_type()));
            }),
        );

        assert!(pipeline.query_duration().is_none());
        pipeline.set_state(PlaybackState::Paused).unwrap();
        let (name, media_type) = rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert_eq!(name, "src_0");
        assert_eq!(media_type.as_deref(), Some("audio/x-raw"));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(pipeline.query_duration(), Some(ClockTime::from_seconds(60)));
        assert_eq!(engine.live_pad_refs(), 0);
    }

    #[test]
    fn test_seek_rules() {
        let engine = SimEngine::new().with_script(
            MediaScript::audio_only(ClockTime::from_seconds(30))
                .with_preroll(Duration::ZERO)
                .with_seekable(false),
        );
        let pipeline = pipeline(&engine);
        assert!(pipeline.seek_simple(ClockTime::from_seconds(5)).is_err());
        assert!(pipeline.query_seeking().is_none());

        pipeline.set_state(PlaybackState::Paused).unwrap();
        while pipeline.current_state() != PlaybackState::Paused {
            thread::sleep(TICK);
        }
        assert_eq!(
            pipeline.query_seeking().map(|info| info.seekable),
            Some(false)
        );
        assert!(pipeline.seek_simple(ClockTime::from_seconds(5)).is_err());
    }

    #[test]
    fn test_clock_runs_without_source() {
        let engine = SimEngine::new().with_script(
            MediaScript::audio_only(ClockTime::from_seconds(600))
                .with_preroll(Duration::ZERO)
                .with_rate(10.0),
        );
        let pipeline = pipeline(&engine);
        pipeline.set_state(PlaybackState::Playing).unwrap();
        while pipeline.current_state() != PlaybackState::Playing {
            thread::sleep(TICK);
        }

        thread::sleep(Duration::from_millis(200));
        let position = pipeline.query_position().unwrap();
        assert!(position > ClockTime::from_seconds(1), "clock stuck at {position}");
        assert!(position < ClockTime::from_seconds(600));
    }

    #[test]
    fn test_refused_add() {
        let engine = SimEngine::new().with_refused_add("q2");
        let pipeline = pipeline(&engine);
        let q1 = engine.make_node("queue", "q1").unwrap();
        let q2 = engine.make_node("queue", "q2").unwrap();

        assert_eq!(
            pipeline.add_many(&[&q1, &q2]),
            Err(EngineError::Add("q2".into()))
        );
        assert_eq!(pipeline.node_names(), vec!["q1".to_string()]);
    }

    #[test]
    fn test_for_uri() {
        assert_eq!(MediaScript::for_uri("file:///a/b.MP3?x=1").streams.len(), 1);
        assert_eq!(MediaScript::for_uri("http://host/clip.mp4").streams.len(), 2);

        let live = MediaScript::for_uri("udp://239.0.0.1:5000");
        assert!(live.duration.is_none());
        assert!(!live.seekable);
    }
}
