use std::time::Duration;

pub const FRAME_RATE: u32 = 2;
/// Above this the capture interval rounds down to zero
pub const MAX_FRAME_RATE: u32 = 1000;
pub const MAX_FRAME_SIZE: usize = 300 * 1024;
pub const MAX_PENDING_FRAMES: usize = 2;

// scheduling
pub const THROTTLE_BACKOFF: Duration = Duration::from_millis(100);
pub const START_RETRY_INTERVAL: Duration = Duration::from_millis(500);

// statistics
pub const STATS_WINDOW: Duration = Duration::from_millis(1000);
pub const DISPLAY_LATENCY_CAP_MS: u64 = 2000;
pub const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

// device
pub const DEVICE_INIT_ATTEMPTS: u32 = 3;
pub const DEVICE_INIT_RETRY: Duration = Duration::from_millis(500);

// connections
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const CONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_SERVICE_URL: &str = "ws://localhost:8000/ws/realtime";

// overlay
pub const CONFIDENT_THRESHOLD: f64 = 0.8;
pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 720;
