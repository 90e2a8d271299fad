use crate::assets::{
    CONNECT_ATTEMPTS, CONNECT_TIMEOUT, DEFAULT_SERVICE_URL, DEVICE_INIT_ATTEMPTS,
    DEVICE_INIT_RETRY, DISPLAY_LATENCY_CAP_MS, FRAME_RATE, MAX_FRAME_RATE, MAX_FRAME_SIZE,
    MAX_PENDING_FRAMES, START_RETRY_INTERVAL, STATS_WINDOW, THROTTLE_BACKOFF, VIEWPORT_HEIGHT,
    VIEWPORT_WIDTH,
};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Every tunable of the capture loop.
///
/// Durations are expressed in milliseconds so the JSON file stays flat; missing
/// fields fall back to the defaults in [`crate::assets`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub service_url: String,
    pub device_id: Option<String>,
    pub target_fps: u32,
    pub max_frame_size: usize,
    pub max_pending_frames: usize,
    pub throttle_backoff_ms: u64,
    pub start_retry_ms: u64,
    pub stats_window_ms: u64,
    pub display_latency_cap_ms: u64,
    pub device_init_attempts: u32,
    pub device_init_retry_ms: u64,
    pub connect_timeout_ms: u64,
    pub connect_attempts: u32,
    pub strict_correlation: bool,
    pub viewport: (u32, u32),
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            device_id: None,
            target_fps: FRAME_RATE,
            max_frame_size: MAX_FRAME_SIZE,
            max_pending_frames: MAX_PENDING_FRAMES,
            throttle_backoff_ms: THROTTLE_BACKOFF.as_millis() as u64,
            start_retry_ms: START_RETRY_INTERVAL.as_millis() as u64,
            stats_window_ms: STATS_WINDOW.as_millis() as u64,
            display_latency_cap_ms: DISPLAY_LATENCY_CAP_MS,
            device_init_attempts: DEVICE_INIT_ATTEMPTS,
            device_init_retry_ms: DEVICE_INIT_RETRY.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            connect_attempts: CONNECT_ATTEMPTS,
            strict_correlation: false,
            viewport: (VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.target_fps > 0, "target_fps must be greater than zero");
        anyhow::ensure!(
            self.target_fps <= MAX_FRAME_RATE,
            "target_fps must be at most {}",
            MAX_FRAME_RATE
        );
        anyhow::ensure!(self.max_pending_frames > 0, "max_pending_frames must be greater than zero");
        anyhow::ensure!(self.max_frame_size > 0, "max_frame_size must be greater than zero");
        anyhow::ensure!(self.stats_window_ms >= 1000, "stats_window_ms must be at least 1000");
        anyhow::ensure!(self.device_init_attempts > 0, "device_init_attempts must be at least 1");
        Ok(())
    }

    /// Pause between two capture attempts.
    pub fn target_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    pub fn start_retry(&self) -> Duration {
        Duration::from_millis(self.start_retry_ms)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }

    pub fn device_init_retry(&self) -> Duration {
        Duration::from_millis(self.device_init_retry_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Configured device id, or one derived from the current time.
    pub fn resolve_device_id(&self) -> String {
        self.device_id
            .clone()
            .unwrap_or_else(|| generate_device_id(chrono::Utc::now().timestamp_millis() as u64))
    }
}

/// Base-36 rendering of a millisecond timestamp.
pub fn generate_device_id(millis: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if millis == 0 {
        return "0".to_string();
    }
    let mut value = millis;
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
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
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_frame_size, 307_200);
        assert_eq!(config.max_pending_frames, 2);
        assert_eq!(config.target_interval(), Duration::from_millis(500));
        assert_eq!(config.stats_window(), Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "target_fps": 10, "strict_correlation": true }}"#).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.target_fps, 10);
        assert!(config.strict_correlation);
        assert_eq!(config.target_interval(), Duration::from_millis(100));
        assert_eq!(config.max_pending_frames, MAX_PENDING_FRAMES);
    }

    #[test]
    fn test_rejects_short_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stats_window_ms": 200 }}"#).unwrap();
        assert!(PipelineConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_fps_bounds() {
        let mut config = PipelineConfig {
            target_fps: 1000,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.target_interval(), Duration::from_millis(1));

        config.target_fps = 1001;
        assert!(config.validate().is_err());
        config.target_fps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_id_base36() {
        assert_eq!(generate_device_id(0), "0");
        assert_eq!(generate_device_id(35), "z");
        assert_eq!(generate_device_id(36), "10");
        assert_eq!(generate_device_id(1_700_000_000_000), "loyw3v28");
    }
}
