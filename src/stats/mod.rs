//! Frame pacing and rate statistics

pub mod governor;
pub mod metrics;

pub use governor::{FrameGovernor, GovernorOptions, Sleeper, TokioSleeper, DEFAULT_FPS_WINDOW};
pub use metrics::GovernorStats;
