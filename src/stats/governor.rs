//! Frame rate governor
//!
//! Caps the iteration rate of a loop and keeps rolling FPS statistics. Every
//! producer, publisher and viewer loop owns one and calls
//! [`FrameGovernor::advance_one_frame`] once per iteration; that call is the
//! loop's only intentional suspension point.
//!
//! ```text
//!   last_frame            now           last_frame'
//!       |---- frame_time ---|--- sleep ---|
//!       |<-------- 1 / target_fps ------->|
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

use super::metrics::{rate, GovernorStats};

/// Default length of the windowed FPS measurement
pub const DEFAULT_FPS_WINDOW: Duration = Duration::from_secs(5);

/// Sleep primitive used by the governor
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Default sleeper backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Governor options
#[derive(Clone)]
pub struct GovernorOptions {
    /// Target rate; `f64::INFINITY` disables pacing
    pub target_fps: f64,
    /// Window for the windowed FPS statistic
    pub window: Duration,
    /// Log a rate summary on every frame
    pub print_fps: bool,
    /// Sleep primitive
    pub sleeper: Arc<dyn Sleeper>,
}

impl GovernorOptions {
    pub fn new(target_fps: f64) -> Self {
        Self {
            target_fps,
            window: DEFAULT_FPS_WINDOW,
            print_fps: false,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set the statistics window
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Enable per-frame rate logging
    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }

    /// Replace the sleep primitive
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}

impl std::fmt::Debug for GovernorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernorOptions")
            .field("target_fps", &self.target_fps)
            .field("window", &self.window)
            .field("print_fps", &self.print_fps)
            .finish()
    }
}

#[derive(Debug)]
struct GovernorState {
    last_frame: Instant,
    frame_time: Duration,
    instantaneous_fps: f64,
    start: Instant,
    frames_rendered: u64,
    average_fps: f64,
    window_start: Instant,
    window_frames: u64,
    window_fps: f64,
}

impl GovernorState {
    fn new(now: Instant) -> Self {
        Self {
            last_frame: now,
            frame_time: Duration::ZERO,
            instantaneous_fps: f64::INFINITY,
            start: now,
            frames_rendered: 0,
            average_fps: f64::INFINITY,
            window_start: now,
            window_frames: 0,
            window_fps: f64::INFINITY,
        }
    }
}

/// Frame rate governor ("frame controller")
///
/// Internally synchronized so overlays can read statistics while the owning
/// loop advances it.
pub struct FrameGovernor {
    target_fps: f64,
    interval: Duration,
    window: Duration,
    print_fps: bool,
    sleeper: Arc<dyn Sleeper>,
    state: Mutex<GovernorState>,
}

impl FrameGovernor {
    /// Create a governor with default options
    pub fn new(target_fps: f64) -> Result<Self> {
        Self::with_options(GovernorOptions::new(target_fps))
    }

    /// Create a governor with custom options
    pub fn with_options(options: GovernorOptions) -> Result<Self> {
        // NaN fails this comparison too
        if !(options.target_fps > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "target fps must be greater than 0, got {}",
                options.target_fps
            )));
        }
        if options.window.is_zero() {
            return Err(Error::InvalidConfiguration(
                "fps window must be non-zero".into(),
            ));
        }

        let interval = if options.target_fps.is_infinite() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / options.target_fps)
        };

        Ok(Self {
            target_fps: options.target_fps,
            interval,
            window: options.window,
            print_fps: options.print_fps,
            sleeper: options.sleeper,
            state: Mutex::new(GovernorState::new(Instant::now())),
        })
    }

    /// Configured target rate
    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// The sleep primitive, shared with error-frame backoff
    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Time left before the next frame is due
    pub fn sleep_time(&self) -> Duration {
        let mut state = self.state.lock();
        state.frame_time = Instant::now().saturating_duration_since(state.last_frame);
        self.interval.saturating_sub(state.frame_time)
    }

    /// Pace the calling loop to the target rate and update statistics
    pub async fn advance_one_frame(&self) {
        let sleep = self.sleep_time();
        if sleep.is_zero() {
            // Unbounded loops still give other tasks a turn
            tokio::task::yield_now().await;
        } else {
            self.sleeper.sleep(sleep).await;
        }
        self.record_frame();
    }

    fn record_frame(&self) {
        let now = Instant::now();
        let snapshot = {
            let mut state = self.state.lock();

            let interval = now.saturating_duration_since(state.last_frame);
            state.instantaneous_fps = if interval.is_zero() {
                f64::INFINITY
            } else {
                1.0 / interval.as_secs_f64()
            };
            state.last_frame = now;

            state.frames_rendered += 1;
            state.average_fps = rate(
                state.frames_rendered,
                now.saturating_duration_since(state.start),
            );

            state.window_frames += 1;
            let window_elapsed = now.saturating_duration_since(state.window_start);
            if window_elapsed > self.window {
                state.window_fps = rate(state.window_frames, window_elapsed);
                state.window_frames = 0;
                state.window_start = now;
            }

            self.print_fps.then(|| self.snapshot(&state))
        };

        if let Some(stats) = snapshot {
            tracing::info!("{}", stats.summary());
        }
    }

    /// Restart all counters and timers at "now"
    ///
    /// Target rate, window and sleeper are preserved.
    pub fn reset_statistics(&self) {
        *self.state.lock() = GovernorState::new(Instant::now());
    }

    /// Snapshot of the current statistics
    pub fn stats(&self) -> GovernorStats {
        let state = self.state.lock();
        self.snapshot(&state)
    }

    fn snapshot(&self, state: &GovernorState) -> GovernorStats {
        GovernorStats {
            target_fps: self.target_fps,
            frame_time: state.frame_time,
            instantaneous_fps: state.instantaneous_fps,
            average_fps: state.average_fps,
            window_fps: state.window_fps,
            window: self.window,
            frames_rendered: state.frames_rendered,
        }
    }
}

impl std::fmt::Debug for FrameGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGovernor")
            .field("target_fps", &self.target_fps)
            .field("window", &self.window)
            .field("stats", &self.stats())
            .finish()
    }
}
