use crate::config::{Config, app_name, app_version};
use crate::pipeline::Session;
use crate::utils::sos::SignalOfStop;
use clap::{Arg, Command};
use log::{error, info};
#[cfg(not(feature = "gstreamer"))]
use log::warn;
use std::process;

pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod ui;
pub mod utils;

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("source")
                .value_name("SOURCE")
                .help("URI or local path of the media to play (defaults to a sample stream).")
                .required(false)
                .num_args(1),
        )
        .get_matches();

    let config = match Config::load() {
        Ok(config) => config.with_source(matches.get_one::<String>("source").cloned()),
        Err(e) => {
            error!("{:#}", e);
            process::exit(-1);
        }
    };
    let uri = match config.uri() {
        Ok(uri) => uri,
        Err(e) => {
            error!("{:#}", e);
            process::exit(-1);
        }
    };

    let sos = SignalOfStop::new();

    // Ctrl-C ends the session like closing the window
    {
        let sos = sos.clone();
        if let Err(e) = ctrlc::set_handler(move || sos.cancel()) {
            error!("Error setting Ctrl-C handler: {}", e);
        }
    }

    let surface = ui::default_surface();

    #[cfg(feature = "gstreamer")]
    let result = match engine::gst::GstEngine::new() {
        Ok(engine) => Session::run(&engine, &config, &uri, surface, sos),
        Err(e) => {
            error!("{:#}", e);
            process::exit(-1);
        }
    };

    #[cfg(not(feature = "gstreamer"))]
    let result = {
        warn!(
            "{} was built without the gstreamer feature: playing a simulated stream, no media will be decoded",
            app_name()
        );
        Session::run(&engine::SimEngine::new(), &config, &uri, surface, sos)
    };

    match result {
        Ok(end) => info!("{}: {} ({})", app_name(), end.reason, end.snapshot),
        Err(e) => {
            error!("{}", e);
            process::exit(-1);
        }
    }
}
