//! Media engines implementing `crate::pipeline::engine`
//!
//! - `sim`: in-process engine, always available
//! - `gst`: GStreamer, behind the `gstreamer` feature

#[cfg(feature = "gstreamer")]
pub mod gst;
pub mod sim;

pub use sim::{MediaScript, SimEngine};
