//! Frame buffer
//!
//! The buffer holds the most recent finished frame of a video. One producer
//! pushes frames through [`FrameBuffer::set_frame`]; any number of
//! publishers read [`FrameBuffer::get_frame`] concurrently.
//!
//! ```text
//!   producer ──set_frame──► [modifier 1] ► [modifier 2] ► swap Arc ► [subscribers]
//!                                                          │
//!   publishers ◄──────────────get_frame (Arc<Frame>)───────┘
//! ```
//!
//! Modifiers work on the owned frame before it is published, so readers never
//! observe a frame being edited. Modifier and subscriber failures (errors or
//! panics) are logged and never reach the producer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, Error, Result};
use crate::stats::{FrameGovernor, GovernorOptions, Sleeper, DEFAULT_FPS_WINDOW};

use super::draw;
use super::frame::{Frame, RGB};

/// Backoff applied after an error frame is shown
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Background of error frames
const ERROR_COLOR: [u8; 4] = [96, 0, 0, 255];

type ModifierFn = dyn Fn(&FrameBuffer, &mut Frame) -> std::result::Result<(), BoxError> + Send + Sync;
type SubscriberFn = dyn Fn(&FrameBuffer) -> std::result::Result<(), BoxError> + Send + Sync;

/// Named function mutating each frame before it is published
#[derive(Clone)]
pub struct FrameModifier {
    name: String,
    apply: Arc<ModifierFn>,
}

impl FrameModifier {
    pub fn new<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&FrameBuffer, &mut Frame) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FrameModifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FrameModifier").field(&self.name).finish()
    }
}

/// Named function notified after a frame is published
#[derive(Clone)]
pub struct FrameSubscriber {
    name: String,
    notify: Arc<SubscriberFn>,
}

impl FrameSubscriber {
    pub fn new<F>(name: impl Into<String>, notify: F) -> Self
    where
        F: Fn(&FrameBuffer) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            notify: Arc::new(notify),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FrameSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FrameSubscriber").field(&self.name).finish()
    }
}

/// Frame buffer configuration
#[derive(Clone)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    /// Channels per pixel (1-4)
    pub depth: usize,
    /// Maximum render rate; `f64::INFINITY` for unbounded
    pub max_fps: f64,
    /// Log governor statistics on every frame
    pub print_fps: bool,
    /// Draw failing modifier messages onto the frame
    pub annotate_errors: bool,
    /// Window for the windowed FPS statistic
    pub fps_window: Duration,
    /// Label shown in debug output
    pub source_label: &'static str,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl VideoConfig {
    /// RGB buffer of `width × height` at 30 fps
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: RGB,
            max_fps: 30.0,
            print_fps: false,
            annotate_errors: false,
            fps_window: DEFAULT_FPS_WINDOW,
            source_label: "FrameBuffer",
            sleeper: None,
        }
    }

    pub fn depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = fps;
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }

    pub fn annotate_errors(mut self, enabled: bool) -> Self {
        self.annotate_errors = enabled;
        self
    }

    pub fn fps_window(mut self, window: Duration) -> Self {
        self.fps_window = window;
        self
    }

    pub fn source_label(mut self, label: &'static str) -> Self {
        self.source_label = label;
        self
    }

    /// Replace the governor's sleep primitive
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    fn governor_options(&self) -> GovernorOptions {
        let options = GovernorOptions::new(self.max_fps)
            .window(self.fps_window)
            .print_fps(self.print_fps);
        match &self.sleeper {
            Some(sleeper) => options.sleeper(sleeper.clone()),
            None => options,
        }
    }
}

impl std::fmt::Debug for VideoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoConfig")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("max_fps", &self.max_fps)
            .field("print_fps", &self.print_fps)
            .field("annotate_errors", &self.annotate_errors)
            .finish()
    }
}

/// Stream description exchanged during sync
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_size: usize,
    /// `None` when the stream is unbounded
    pub max_fps: Option<f64>,
}

/// Shared last-known-frame holder with a modifier/subscriber pipeline
pub struct FrameBuffer {
    width: u32,
    height: u32,
    depth: usize,
    max_fps: f64,
    annotate_errors: bool,
    source_label: &'static str,
    finished: RwLock<Arc<Frame>>,
    modifiers: RwLock<Vec<FrameModifier>>,
    subscribers: RwLock<Vec<FrameSubscriber>>,
    governor: FrameGovernor,
}

impl FrameBuffer {
    /// Create a buffer holding an all-zero frame
    pub fn new(config: VideoConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "video dimensions must be non-zero, got {}x{}",
                config.width, config.height
            )));
        }
        if !(1..=4).contains(&config.depth) {
            return Err(Error::InvalidConfiguration(format!(
                "pixel size must be between 1 and 4, got {}",
                config.depth
            )));
        }
        let governor = FrameGovernor::with_options(config.governor_options())?;

        Ok(Self {
            width: config.width,
            height: config.height,
            depth: config.depth,
            max_fps: config.max_fps,
            annotate_errors: config.annotate_errors,
            source_label: config.source_label,
            finished: RwLock::new(Arc::new(Frame::blank(
                config.width,
                config.height,
                config.depth,
            ))),
            modifiers: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            governor,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Channels per pixel
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_fps(&self) -> f64 {
        self.max_fps
    }

    pub fn source_label(&self) -> &'static str {
        self.source_label
    }

    /// The embedded governor
    pub fn governor(&self) -> &FrameGovernor {
        &self.governor
    }

    /// Description used by the sync protocol
    pub fn info(&self) -> StreamInfo {
        StreamInfo {
            width: self.width,
            height: self.height,
            pixel_size: self.depth,
            max_fps: self.max_fps.is_finite().then_some(self.max_fps),
        }
    }

    /// Latest finished frame
    ///
    /// Never waits for the producer; the frame may be stale.
    pub fn get_frame(&self) -> Arc<Frame> {
        self.finished.read().clone()
    }

    /// Run `frame` through the modifiers and publish it
    pub fn set_frame(&self, frame: Frame) -> Result<()> {
        if frame.size() != self.size() || frame.depth() != self.depth {
            return Err(Error::FrameSizeMismatch {
                expected: Frame::byte_len(self.width, self.height, self.depth),
                actual: frame.data().len(),
            });
        }
        self.apply_and_publish(frame);
        Ok(())
    }

    /// Publish raw bytes laid out as this buffer's frames
    pub fn set_raw(&self, data: Vec<u8>) -> Result<()> {
        let frame = Frame::from_raw(self.width, self.height, self.depth, data)?;
        self.apply_and_publish(frame);
        Ok(())
    }

    /// Publish an all-zero frame
    pub fn set_blank_frame(&self) {
        self.apply_and_publish(Frame::blank(self.width, self.height, self.depth));
    }

    pub fn add_frame_modifier(&self, modifier: FrameModifier) {
        tracing::debug!(modifier = %modifier.name, "Frame modifier added");
        self.modifiers.write().push(modifier);
    }

    pub fn add_frame_subscriber(&self, subscriber: FrameSubscriber) {
        tracing::debug!(subscriber = %subscriber.name, "Frame subscriber added");
        self.subscribers.write().push(subscriber);
    }

    /// Registered modifier names in execution order
    pub fn modifier_names(&self) -> Vec<String> {
        self.modifiers.read().iter().map(|m| m.name.clone()).collect()
    }

    /// Registered subscriber names in execution order
    pub fn subscriber_names(&self) -> Vec<String> {
        self.subscribers.read().iter().map(|s| s.name.clone()).collect()
    }

    /// Show an error frame, back off, then restart statistics
    ///
    /// Used by producer and viewer loops to recover from transient failures.
    pub async fn render_error(&self, error: &Error, context: &str) {
        tracing::warn!(
            source = self.source_label,
            error = %error,
            "{}",
            context
        );

        let mut frame = Frame::solid(self.width, self.height, self.depth, ERROR_COLOR);
        let max_chars = (self.width / draw::GLYPH_ADVANCE).saturating_sub(3).max(1) as usize;
        let mut lines = vec![context.to_string(), format!("Error: {}", error.kind())];
        lines.extend(wrap(&error.to_string(), max_chars));
        draw::draw_multiline_text(&mut frame, 0, 0, &lines);

        self.publish(frame);

        self.governor.sleeper().sleep(ERROR_BACKOFF).await;
        self.governor.reset_statistics();
    }

    fn apply_and_publish(&self, mut frame: Frame) {
        let modifiers = self.modifiers.read().clone();
        for modifier in &modifiers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (modifier.apply)(self, &mut frame)));
            if let Some(message) = failure_message(outcome) {
                tracing::warn!(modifier = %modifier.name, error = %message, "Frame modifier failed");
                if self.annotate_errors {
                    let text = format!("{} failed: {}", modifier.name, message);
                    let y = self.height as i64 - 10;
                    draw::draw_text_outlined(&mut frame, &text, 4, y, 1, draw::YELLOW);
                }
            }
        }

        self.publish(frame);
    }

    fn publish(&self, frame: Frame) {
        *self.finished.write() = Arc::new(frame);

        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.notify)(self)));
            if let Some(message) = failure_message(outcome) {
                tracing::warn!(subscriber = %subscriber.name, error = %message, "Frame subscriber failed");
            }
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("max_fps", &self.max_fps)
            .field("modifiers", &self.modifier_names())
            .field("subscribers", &self.subscriber_names())
            .finish()
    }
}

fn failure_message(
    outcome: std::thread::Result<std::result::Result<(), BoxError>>,
) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(
            panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panicked".to_string()),
        ),
    }
}

/// Split a message into lines of at most `width` characters
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn buffer(width: u32, height: u32) -> FrameBuffer {
        FrameBuffer::new(VideoConfig::new(width, height)).unwrap()
    }

    #[test]
    fn test_new_buffer_is_blank() {
        let video = buffer(64, 48);
        let frame = video.get_frame();
        assert_eq!(frame.size(), (64, 48));
        assert_eq!(frame.depth(), RGB);
        assert!(frame.is_blank());
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(matches!(
            FrameBuffer::new(VideoConfig::new(0, 48)),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            FrameBuffer::new(VideoConfig::new(64, 48).depth(0)),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            FrameBuffer::new(VideoConfig::new(64, 48).max_fps(0.0)),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_set_frame_round_trip() {
        let video = buffer(4, 4);
        let frame = Frame::solid(4, 4, RGB, [1, 2, 3, 0]);

        video.set_frame(frame.clone()).unwrap();
        assert_eq!(*video.get_frame(), frame);
    }

    #[test]
    fn test_mismatched_frame_leaves_state() {
        let video = buffer(64, 48);
        let first = Frame::solid(64, 48, RGB, [9, 9, 9, 0]);
        video.set_frame(first.clone()).unwrap();

        let result = video.set_frame(Frame::blank(32, 48, RGB));
        assert!(matches!(result, Err(Error::FrameSizeMismatch { .. })));

        let result = video.set_frame(Frame::blank(64, 48, 4));
        assert!(matches!(result, Err(Error::FrameSizeMismatch { .. })));

        assert!(matches!(
            video.set_raw(vec![0; 10]),
            Err(Error::FrameSizeMismatch { .. })
        ));
        assert_eq!(*video.get_frame(), first);
    }

    #[test]
    fn test_modifiers_run_in_order() {
        let video = buffer(2, 2);
        video.add_frame_modifier(FrameModifier::new("fill", |_, frame| {
            frame.fill([10, 10, 10, 0]);
            Ok(())
        }));
        video.add_frame_modifier(FrameModifier::new("double", |_, frame| {
            for b in frame.data_mut() {
                *b *= 2;
            }
            Ok(())
        }));

        video.set_blank_frame();
        assert_eq!(video.get_frame().pixel(1, 1), Some(&[20u8, 20, 20][..]));
        assert_eq!(video.modifier_names(), vec!["fill", "double"]);
    }

    #[test]
    fn test_failing_modifier_is_isolated() {
        let video = buffer(2, 2);
        let calls = Arc::new(AtomicUsize::new(0));

        video.add_frame_modifier(FrameModifier::new("broken", |_, _| Err("boom".into())));
        video.add_frame_modifier(FrameModifier::new("panics", |_, _| panic!("bad modifier")));

        let counter = calls.clone();
        video.add_frame_modifier(FrameModifier::new("fill", move |_, frame| {
            counter.fetch_add(1, Ordering::SeqCst);
            frame.fill([5, 5, 5, 0]);
            Ok(())
        }));

        let counter = calls.clone();
        video.add_frame_subscriber(FrameSubscriber::new("failing", |_| Err("nope".into())));
        video.add_frame_subscriber(FrameSubscriber::new("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        video.set_blank_frame();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(video.get_frame().pixel(0, 0), Some(&[5u8, 5, 5][..]));
    }

    #[test]
    fn test_annotated_modifier_error_is_drawn() {
        let video = FrameBuffer::new(VideoConfig::new(200, 40).annotate_errors(true)).unwrap();
        video.add_frame_modifier(FrameModifier::new("broken", |_, _| Err("boom".into())));

        video.set_blank_frame();
        assert!(!video.get_frame().is_blank());
    }

    #[test]
    fn test_subscribers_see_finished_frame() {
        let video = Arc::new(buffer(2, 2));
        let seen = Arc::new(parking_lot::Mutex::new(None));

        video.add_frame_modifier(FrameModifier::new("fill", |_, frame| {
            frame.fill([7, 7, 7, 0]);
            Ok(())
        }));
        let sink = seen.clone();
        video.add_frame_subscriber(FrameSubscriber::new("capture", move |v| {
            *sink.lock() = Some(v.get_frame());
            Ok(())
        }));

        video.set_blank_frame();
        let frame = seen.lock().clone().unwrap();
        assert_eq!(frame.pixel(0, 0), Some(&[7u8, 7, 7][..]));
    }

    #[test]
    fn test_info_serializes_unbounded_rate_as_null() {
        let video = FrameBuffer::new(VideoConfig::new(64, 48).max_fps(f64::INFINITY)).unwrap();
        let json = serde_json::to_value(video.info()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"width": 64, "height": 48, "pixel_size": 3, "max_fps": null})
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_error_publishes_and_resets() {
        let video = buffer(160, 60);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        video.add_frame_subscriber(FrameSubscriber::new("count", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        video.governor().advance_one_frame().await;
        let start = tokio::time::Instant::now();
        let error = Error::source_unavailable("camera 0", "device busy");
        video.render_error(&error, "Camera read failed").await;

        assert!(start.elapsed() >= ERROR_BACKOFF);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(video.get_frame().pixel(0, 0), Some(&[96u8, 0, 0][..]));
        assert_eq!(video.governor().stats().frames_rendered, 0);
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("aaa bbb ccc", 7), vec!["aaa bbb", "ccc"]);
        assert!(wrap("", 10).is_empty());
    }
}
