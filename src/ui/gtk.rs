use std::sync::Arc;
use std::time::Duration;

use gtk::glib;
use gtk::prelude::*;
use log::info;

use super::{ControlSurface, PlaybackControls};
use crate::pipeline::status::PlaybackStatus;
use crate::utils::sos::SignalOfStop;

const REFRESH: Duration = Duration::from_millis(200);

/// Window with Play/Pause/Stop buttons and a position label
///
/// GTK is initialised on the UI thread and its main loop runs there.
pub struct GtkSurface {
    title: String,
}

impl GtkSurface {
    pub fn new() -> Self {
        Self {
            title: "Open pipe media player".into(),
        }
    }
}

impl Default for GtkSurface {
    fn default() -> Self {
        Self::new()
    }
}

fn button(
    label: &str,
    controls: &Arc<dyn PlaybackControls>,
    action: fn(&dyn PlaybackControls),
) -> gtk::Button {
    let button = gtk::Button::with_label(label);
    let controls = Arc::clone(controls);
    button.connect_clicked(move |_| action(controls.as_ref()));
    button
}

impl ControlSurface for GtkSurface {
    fn name(&self) -> &'static str {
        "gtk"
    }

    fn run(
        self: Box<Self>,
        controls: Arc<dyn PlaybackControls>,
        status: Arc<PlaybackStatus>,
        sos: SignalOfStop,
    ) -> anyhow::Result<()> {
        gtk::init().map_err(|e| anyhow::anyhow!("Failed to initialize GTK: {}", e))?;

        let buttons = gtk::Box::new(gtk::Orientation::Vertical, 0);
        buttons.pack_start(&button("Play", &controls, |c| c.play()), true, true, 0);
        buttons.pack_start(&button("Pause", &controls, |c| c.pause()), true, true, 0);
        buttons.pack_start(&button("Stop", &controls, |c| c.stop()), true, true, 0);

        let position = gtk::Label::new(Some(&status.snapshot().to_string()));

        let main_view = gtk::Box::new(gtk::Orientation::Horizontal, 0);
        main_view.pack_start(&position, true, true, 0);
        main_view.pack_start(&buttons, true, true, 0);

        let window = gtk::Window::new(gtk::WindowType::Toplevel);
        window.set_title(&self.title);
        window.set_default_size(800, 600);
        window.add(&main_view);
        window.connect_destroy(|_| {
            info!("GtkSurface: window closed");
            gtk::main_quit();
        });
        window.show_all();

        glib::timeout_add_local(REFRESH, move || {
            if sos.cancelled() {
                gtk::main_quit();
                return glib::ControlFlow::Break;
            }
            position.set_text(&status.snapshot().to_string());
            glib::ControlFlow::Continue
        });

        gtk::main();
        Ok(())
    }
}
