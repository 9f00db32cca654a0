//! Session coordinator
//!
//! Wires builder, linker, supervisor, event loop and control surface
//! together, in dependency order:
//! build graph -> attach linker -> start playing -> spawn UI thread ->
//! run event loop -> cancel -> join UI -> teardown.

use std::sync::Arc;
use std::thread;

use log::{error, info};

use crate::config::Config;
use crate::error::SessionError;
use crate::ui::{ControlSurface, PlaybackControls};
use crate::utils::sos::SignalOfStop;

use super::builder::PlaybackGraph;
use super::engine::Engine;
use super::event_loop::{EndReason, EventLoop};
use super::linker::DynamicLinker;
use super::status::{PlaybackStatus, StatusSnapshot};
use super::supervisor::StateSupervisor;
use super::types::MediaKind;

/// Everything a running session owns
///
/// Created before the graph starts playing and dropped once both threads
/// are done with it.
pub struct PipelineContext<E: Engine> {
    graph: PlaybackGraph<E>,
    linker: Arc<DynamicLinker<E::Node>>,
    status: Arc<PlaybackStatus>,
    sos: SignalOfStop,
}

impl<E: Engine> PipelineContext<E> {
    /// Build the graph for `uri` and hook the linker onto its source
    pub fn new(
        engine: &E,
        config: &Config,
        uri: &str,
        sos: SignalOfStop,
    ) -> Result<Self, SessionError> {
        let graph =
            PlaybackGraph::build(engine, &config.pipeline_name, uri, &config.factories)?;
        let linker = Arc::new(DynamicLinker::new(
            graph.branch(MediaKind::Audio).entry().clone(),
            graph.branch(MediaKind::Video).entry().clone(),
        ));
        linker.attach(graph.pipeline().as_ref(), graph.source());

        Ok(Self {
            graph,
            linker,
            status: Arc::new(PlaybackStatus::new()),
            sos,
        })
    }

    pub fn graph(&self) -> &PlaybackGraph<E> {
        &self.graph
    }

    pub fn linker(&self) -> &Arc<DynamicLinker<E::Node>> {
        &self.linker
    }

    pub fn status(&self) -> &Arc<PlaybackStatus> {
        &self.status
    }

    pub fn sos(&self) -> &SignalOfStop {
        &self.sos
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
    pub reason: EndReason,
    /// Status at the moment the graph was released
    pub snapshot: StatusSnapshot,
}

pub struct Session;

impl Session {
    /// Play `uri` until end of stream, an error, or the user quits
    ///
    /// Returns `Err` only when the graph can't be built or started; the
    /// graph is released before returning in every case.
    pub fn run<E: Engine>(
        engine: &E,
        config: &Config,
        uri: &str,
        surface: Box<dyn ControlSurface>,
        sos: SignalOfStop,
    ) -> Result<SessionEnd, SessionError> {
        info!("Session: playing {} with the {} engine", uri, engine.name());
        let context = PipelineContext::new(engine, config, uri, sos.clone())?;
        let pipeline = context.graph.pipeline().clone();
        let supervisor = Arc::new(StateSupervisor::new(pipeline.clone()));

        if let Err(e) = supervisor.start() {
            supervisor.shutdown();
            return Err(e);
        }

        let surface_name = surface.name();
        let ui = {
            let controls: Arc<dyn PlaybackControls> = supervisor.clone();
            let status = context.status.clone();
            let sos = sos.clone();
            thread::Builder::new()
                .name("ui".into())
                .spawn(move || {
                    if let Err(e) = surface.run(controls, status, sos.clone()) {
                        error!("Session: {} surface failed: {:#}", surface_name, e);
                    }
                    sos.cancel();
                })
        };
        let ui = match ui {
            Ok(handle) => handle,
            Err(source) => {
                supervisor.shutdown();
                return Err(SessionError::Spawn { name: "ui", source });
            }
        };
        info!("Session: {} surface started", surface_name);

        let mut event_loop = EventLoop::new(
            pipeline,
            context.status.clone(),
            sos.clone(),
            config.poll_interval(),
        )
        .with_auto_seek(config.auto_seek);
        event_loop.run();

        sos.cancel();
        if ui.join().is_err() {
            error!("Session: UI thread panicked");
        }
        supervisor.shutdown();

        let end = SessionEnd {
            reason: event_loop
                .end_reason()
                .cloned()
                .unwrap_or(EndReason::UserQuit),
            snapshot: context.status.snapshot(),
        };
        drop(context);
        info!("Session: ended ({})", end.reason);
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::{MediaScript, SimEngine};
    use crate::pipeline::engine::Pipeline;
    use crate::pipeline::state::PlaybackState;
    use crate::pipeline::types::ClockTime;
    use crate::ui::{ConsoleSurface, HeadlessSurface};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    const URI: &str = "file:///media/clip.mp4";

    fn config() -> Config {
        Config {
            poll_interval_ms: 10,
            ..Config::default()
        }
    }

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

    /// Surface that records whether it ran on the UI thread, then waits for the end
    struct Probe {
        ran: Arc<AtomicBool>,
    }

    impl ControlSurface for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn run(
            self: Box<Self>,
            _controls: Arc<dyn PlaybackControls>,
            _status: Arc<PlaybackStatus>,
            sos: SignalOfStop,
        ) -> anyhow::Result<()> {
            let on_ui_thread = thread::current().name() == Some("ui");
            self.ran.store(on_ui_thread, Ordering::SeqCst);
            sos.wait_cancellation();
            Ok(())
        }
    }

    #[test]
    fn test_audio_only_source_plays_to_end() {
        let engine = SimEngine::new().with_script(
            MediaScript::audio_only(ClockTime::from_seconds(2))
                .with_preroll(Duration::from_millis(20))
                .with_rate(10.0),
        );

        let end = Session::run(
            &engine,
            &config(),
            URI,
            Box::new(HeadlessSurface),
            SignalOfStop::new(),
        )
        .unwrap();

        assert_eq!(end.reason, EndReason::EndOfStream);
        assert_eq!(end.snapshot.duration, Some(ClockTime::from_seconds(2)));
        // Only the audio branch ever had something to link
        assert_eq!(engine.link_attempts(), 1);
        assert_eq!(engine.live_pad_refs(), 0);
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_decode_failure_ends_session() {
        let engine = SimEngine::new().with_script(
            MediaScript::audio_video(ClockTime::from_seconds(60))
                .with_preroll(Duration::from_millis(20))
                .with_rate(10.0)
                .with_error_at(ClockTime::from_seconds(1), "decode failure"),
        );
        let ran = Arc::new(AtomicBool::new(false));

        let end = Session::run(
            &engine,
            &config(),
            URI,
            Box::new(Probe { ran: ran.clone() }),
            SignalOfStop::new(),
        )
        .unwrap();

        assert_eq!(end.reason, EndReason::Error("decode failure".into()));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(engine.link_attempts(), 2);
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_start_failure_never_runs_ui() {
        let engine = SimEngine::new().with_failing_state(PlaybackState::Playing);
        let ran = Arc::new(AtomicBool::new(false));

        let err = Session::run(
            &engine,
            &config(),
            URI,
            Box::new(Probe { ran: ran.clone() }),
            SignalOfStop::new(),
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::InitialState(_)));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_build_failure_is_reported() {
        let engine = SimEngine::new().with_missing_factory("uridecodebin");

        let err = Session::run(
            &engine,
            &config(),
            URI,
            Box::new(HeadlessSurface),
            SignalOfStop::new(),
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::Build(_)));
        assert_eq!(engine.live_nodes(), 0);
    }

    #[test]
    fn test_user_quit() {
        let engine = SimEngine::new();
        let sos = SignalOfStop::new();
        let surface = ConsoleSurface::from_reader(Cursor::new("pause\nquit\n"));

        let end = Session::run(&engine, &config(), URI, Box::new(surface), sos.clone()).unwrap();

        assert_eq!(end.reason, EndReason::UserQuit);
        assert!(sos.cancelled());
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_external_cancel() {
        let engine = SimEngine::new();
        let sos = SignalOfStop::new();
        let canceller = {
            let sos = sos.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                sos.cancel();
            })
        };

        let end = Session::run(&engine, &config(), URI, Box::new(HeadlessSurface), sos).unwrap();
        canceller.join().unwrap();

        assert_eq!(end.reason, EndReason::UserQuit);
        assert!(wait_until(|| engine.live_nodes() == 0));
    }

    #[test]
    fn test_context_owns_graph() {
        let engine = SimEngine::new();
        let context = PipelineContext::new(&engine, &config(), URI, SignalOfStop::new()).unwrap();

        assert_eq!(context.graph().pipeline().name(), "openpipe-pipeline");
        assert!(!context.linker().is_linked(MediaKind::Audio));
        assert!(!context.status().is_playing());
        assert!(!context.sos().cancelled());
        assert_eq!(engine.live_nodes(), 8);

        drop(context);
        assert!(wait_until(|| engine.live_nodes() == 0));
    }
}
