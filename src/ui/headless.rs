use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::{ControlSurface, PlaybackControls};
use crate::pipeline::status::PlaybackStatus;
use crate::utils::sos::SignalOfStop;

/// How often the status is written to the log
const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Surface without user input; plays until the session ends
pub struct HeadlessSurface;

impl ControlSurface for HeadlessSurface {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn run(
        self: Box<Self>,
        _controls: Arc<dyn PlaybackControls>,
        status: Arc<PlaybackStatus>,
        sos: SignalOfStop,
    ) -> anyhow::Result<()> {
        info!("HeadlessSurface: waiting for the session to end");
        while !sos.wait_timeout(REPORT_EVERY) {
            debug!("HeadlessSurface: {}", status.snapshot());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Ignored;

    impl PlaybackControls for Ignored {
        fn play(&self) {}
        fn pause(&self) {}
        fn stop(&self) {}
    }

    #[test]
    fn test_returns_once_cancelled() {
        let sos = SignalOfStop::new();
        let canceller = {
            let sos = sos.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                sos.cancel();
            })
        };

        Box::new(HeadlessSurface)
            .run(Arc::new(Ignored), Arc::new(PlaybackStatus::new()), sos.clone())
            .unwrap();
        canceller.join().unwrap();
        assert!(sos.cancelled());
    }
}
