use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use log::{info, warn};

use super::{ControlSurface, PlaybackControls};
use crate::pipeline::status::PlaybackStatus;
use crate::utils::sos::SignalOfStop;

/// How often the surface re-checks the cancellation token
const POLL: Duration = Duration::from_millis(50);

const HELP: &str = "Commands: play (p), pause (a), stop (s), status (i), quit (q)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play,
    Pause,
    Stop,
    Status,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<ConsoleCommand> {
        match line.trim().to_ascii_lowercase().as_str() {
            "play" | "p" => Some(ConsoleCommand::Play),
            "pause" | "a" => Some(ConsoleCommand::Pause),
            "stop" | "s" => Some(ConsoleCommand::Stop),
            "status" | "i" => Some(ConsoleCommand::Status),
            "quit" | "q" | "exit" => Some(ConsoleCommand::Quit),
            _ => None,
        }
    }
}

/// Line-based control surface reading commands from an input stream
pub struct ConsoleSurface {
    input: Box<dyn BufRead + Send>,
}

impl ConsoleSurface {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    pub fn from_reader(input: impl BufRead + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
        }
    }
}

impl ControlSurface for ConsoleSurface {
    fn name(&self) -> &'static str {
        "console"
    }

    fn run(
        self: Box<Self>,
        controls: Arc<dyn PlaybackControls>,
        status: Arc<PlaybackStatus>,
        sos: SignalOfStop,
    ) -> anyhow::Result<()> {
        // Reads block, so they happen on a detached thread feeding a channel
        let (tx, rx) = mpsc::channel::<String>();
        let input = self.input;
        thread::Builder::new()
            .name("console-input".into())
            .spawn(move || {
                for line in input.lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        println!("{}", HELP);
        while !sos.cancelled() {
            let line = match rx.recv_timeout(POLL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("ConsoleSurface: input closed, waiting for the session to end");
                    sos.wait_cancellation();
                    break;
                }
            };

            match ConsoleCommand::parse(&line) {
                Some(ConsoleCommand::Play) => controls.play(),
                Some(ConsoleCommand::Pause) => controls.pause(),
                Some(ConsoleCommand::Stop) => controls.stop(),
                Some(ConsoleCommand::Status) => println!("{}", status.snapshot()),
                Some(ConsoleCommand::Quit) => {
                    info!("ConsoleSurface: quit requested");
                    break;
                }
                None if line.trim().is_empty() => {}
                None => {
                    warn!("ConsoleSurface: unknown command '{}'", line.trim());
                    println!("{}", HELP);
                }
            }
        }
        Ok(())
    }
}
