use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use log::info;
use serde::Deserialize;

use crate::pipeline::types::ClockTime;

/// Environment variable naming an optional JSON configuration file
pub const CONFIG_ENV: &str = "OPENPIPE_CONFIG";

/// Longest accepted bus wait per loop iteration
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_URI: &str =
    "http://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4";

/// Factory names used to build the playback graph
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElementFactories {
    pub source: String,
    pub queue: String,
    pub audio_convert: String,
    pub audio_resample: String,
    pub audio_sink: String,
    pub video_convert: String,
    pub video_sink: String,
}

impl Default for ElementFactories {
    fn default() -> Self {
        ElementFactories {
            source: "uridecodebin".into(),
            queue: "queue".into(),
            audio_convert: "audioconvert".into(),
            audio_resample: "audioresample".into(),
            audio_sink: "autoaudiosink".into(),
            video_convert: "videoconvert".into(),
            video_sink: "autovideosink".into(),
        }
    }
}

/// One-shot seek issued once playback passes `after_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AutoSeek {
    pub after_secs: u64,
    pub to_secs: u64,
}

impl AutoSeek {
    /// Both marks must be representable as real stream times
    fn validate(&self) -> anyhow::Result<()> {
        let limit = ClockTime::MAX.seconds();
        anyhow::ensure!(
            self.after_secs <= limit && self.to_secs <= limit,
            "auto_seek times must not exceed {} seconds",
            limit
        );
        Ok(())
    }

    pub fn after(&self) -> ClockTime {
        ClockTime::from_seconds(self.after_secs)
    }

    pub fn to(&self) -> ClockTime {
        ClockTime::from_seconds(self.to_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Media to play; a plain path is turned into a `file://` URI
    pub source: Option<String>,
    pub pipeline_name: String,
    /// Longest bus wait per loop iteration
    pub poll_interval_ms: u64,
    pub factories: ElementFactories,
    pub auto_seek: Option<AutoSeek>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source: None,
            pipeline_name: "openpipe-pipeline".into(),
            poll_interval_ms: 100,
            factories: ElementFactories::default(),
            auto_seek: None,
        }
    }
}

impl Config {
    /// Defaults, overridden by the file named in `OPENPIPE_CONFIG` if set
    pub fn load() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_json(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        anyhow::ensure!(
            (1..=MAX_POLL_INTERVAL_MS).contains(&config.poll_interval_ms),
            "poll_interval_ms must be between 1 and {}",
            MAX_POLL_INTERVAL_MS
        );
        if let Some(auto_seek) = &config.auto_seek {
            auto_seek.validate()?;
        }
        Ok(config)
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        if source.is_some() {
            self.source = source;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// URI of the media to play
    pub fn uri(&self) -> anyhow::Result<String> {
        match &self.source {
            Some(source) => resolve_uri(source),
            None => Ok(DEFAULT_URI.to_string()),
        }
    }
}

/// Values containing `://` are URIs; anything else is a local path
pub fn resolve_uri(source: &str) -> anyhow::Result<String> {
    if source.contains("://") {
        return Ok(source.to_string());
    }
    let path = std::path::absolute(source)
        .with_context(|| format!("resolving path {}", source))?;
    Ok(format!("file://{}", path.display()))
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.factories.source, "uridecodebin");
        assert_eq!(config.uri().unwrap(), DEFAULT_URI);
        assert!(config.auto_seek.is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json(
            r#"{ "poll_interval_ms": 20, "factories": { "video_sink": "fakesink" },
                 "auto_seek": { "after_secs": 10, "to_secs": 30 } }"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.factories.video_sink, "fakesink");
        assert_eq!(config.factories.audio_sink, "autoaudiosink");
        assert_eq!(config.pipeline_name, "openpipe-pipeline");
        assert_eq!(config.auto_seek.unwrap().to(), ClockTime::from_seconds(30));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(Config::from_json(r#"{ "poll_interval_ms": 0 }"#).is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(Config::from_json(r#"{ "poll_interval_ms": 60001 }"#).is_err());
        assert!(Config::from_json(r#"{ "poll_interval_ms": 60000 }"#).is_ok());

        let err = Config::from_json(r#"{ "auto_seek": { "after_secs": 1, "to_secs": 18446744074 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("auto_seek"));

        let config =
            Config::from_json(r#"{ "auto_seek": { "after_secs": 1, "to_secs": 18446744073 } }"#)
                .unwrap();
        assert!(config.auto_seek.unwrap().to().is_valid());
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(
            resolve_uri("rtsp://camera/stream").unwrap(),
            "rtsp://camera/stream"
        );

        let uri = resolve_uri("media/clip.ogg").unwrap();
        assert!(uri.starts_with("file:///"));
        assert!(uri.ends_with("media/clip.ogg"));
    }

    #[test]
    fn test_cli_source_overrides() {
        let config = Config::default().with_source(Some("http://host/a.mp4".into()));
        assert_eq!(config.uri().unwrap(), "http://host/a.mp4");

        let config = config.with_source(None);
        assert_eq!(config.uri().unwrap(), "http://host/a.mp4");
    }
}
