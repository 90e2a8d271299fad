//! Capture-pace-send-correlate-render pipeline
//!
//! The pipeline is driven by a single coordinator task:
//! - The scheduler paces captures and holds back while too many frames are
//!   awaiting results
//! - The frame table remembers what was sent so results can be timed
//! - The stats aggregator turns sends and round trips into FPS and latency
//! - Health counters record every frame or message that was dropped
//!
//! Everything else (the frame source, the transport, the presenter) is
//! reached through traits and lives outside this module.

pub mod clock;
pub mod coordinator;
pub mod frames;
pub mod health;
pub mod scheduler;
pub mod state;
pub mod stats;
pub mod types;

pub use clock::{FrameIds, PipelineClock};
pub use coordinator::{
    Command, CoordinatorHandle, PipelineCoordinator, PipelineError, PipelineEvent,
};
pub use frames::{Correlation, CorrelationMode, FrameTable};
pub use health::{HealthSummary, PipelineHealth};
pub use scheduler::{Scheduler, SchedulerState, Tick};
pub use state::SessionState;
pub use stats::{StatsAggregator, StatsSnapshot};
pub use types::{FrameRecord, Session, Timestamp};
