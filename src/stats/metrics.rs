//! Frame rate statistics snapshots

use std::time::Duration;

/// Point-in-time copy of a governor's rolling statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GovernorStats {
    /// Configured target rate (infinite when unbounded)
    pub target_fps: f64,
    /// Work time of the last frame, measured before pacing
    pub frame_time: Duration,
    /// Rate derived from the interval between the last two frames
    pub instantaneous_fps: f64,
    /// Frames rendered divided by time since start (or last reset)
    pub average_fps: f64,
    /// Rate over the last completed window
    pub window_fps: f64,
    /// Configured window length
    pub window: Duration,
    /// Frames advanced since start (or last reset)
    pub frames_rendered: u64,
}

impl GovernorStats {
    /// One-line summary used by `print_fps` logging and overlays
    pub fn summary(&self) -> String {
        format!(
            "Instantaneous FPS: {:.2} Average FPS: {:.2} FPS over {:.1} Seconds: {:.2} Frame Time {:.2} ms",
            self.instantaneous_fps,
            self.average_fps,
            self.window.as_secs_f64(),
            self.window_fps,
            self.frame_time.as_secs_f64() * 1000.0
        )
    }
}

/// Frames per second over an interval, infinite for an empty interval
pub fn rate(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        frames as f64 / secs
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate() {
        assert_eq!(rate(30, Duration::from_secs(1)), 30.0);
        assert_eq!(rate(150, Duration::from_secs(5)), 30.0);
    }

    #[test]
    fn test_rate_zero_duration() {
        assert!(rate(1, Duration::ZERO).is_infinite());
    }

    #[test]
    fn test_summary_format() {
        let stats = GovernorStats {
            target_fps: 30.0,
            frame_time: Duration::from_millis(5),
            instantaneous_fps: 30.0,
            average_fps: 29.5,
            window_fps: 30.25,
            window: Duration::from_secs(5),
            frames_rendered: 10,
        };

        assert_eq!(
            stats.summary(),
            "Instantaneous FPS: 30.00 Average FPS: 29.50 FPS over 5.0 Seconds: 30.25 Frame Time 5.00 ms"
        );
    }
}
