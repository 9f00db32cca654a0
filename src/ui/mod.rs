//! Control surfaces
//!
//! A surface runs on its own thread. It talks to the rest of the session
//! only through [`PlaybackControls`], the shared [`PlaybackStatus`] and the
//! cancellation token.

use std::sync::Arc;

use crate::pipeline::status::PlaybackStatus;
use crate::utils::sos::SignalOfStop;

pub mod console;
#[cfg(all(feature = "gui", target_os = "linux"))]
pub mod gtk;
pub mod headless;

pub use console::ConsoleSurface;
pub use headless::HeadlessSurface;

/// Non-blocking playback requests a surface can issue
pub trait PlaybackControls: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
}

/// User-facing front end of a session
pub trait ControlSurface: Send + 'static {
    fn name(&self) -> &'static str;

    /// Block until the user quits or `sos` is cancelled
    ///
    /// The caller cancels `sos` once this returns.
    fn run(
        self: Box<Self>,
        controls: Arc<dyn PlaybackControls>,
        status: Arc<PlaybackStatus>,
        sos: SignalOfStop,
    ) -> anyhow::Result<()>;
}

/// Pick the surface for this process: the window when built with `gui`,
/// the console when stdin is a terminal, headless otherwise
pub fn default_surface() -> Box<dyn ControlSurface> {
    #[cfg(all(feature = "gui", target_os = "linux"))]
    {
        Box::new(gtk::GtkSurface::new())
    }

    #[cfg(not(all(feature = "gui", target_os = "linux")))]
    {
        use std::io::IsTerminal;

        if std::io::stdin().is_terminal() {
            Box::new(ConsoleSurface::stdin())
        } else {
            Box::new(HeadlessSurface)
        }
    }
}
