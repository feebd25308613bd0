//! Video source adapters
//!
//! Every source is a [`FrameProducer`] strategy driven by one shared producer
//! loop. The loop reads a frame, fits it to the buffer, publishes it and
//! paces itself with the buffer's governor:
//!
//! ```text
//!   Opening ──► Running ──error──► Recovering ──frame──► Running
//!                  │
//!                  └──end of stream──► Rewind (Running) | Exhausted (blank frames)
//! ```
//!
//! Errors never stop the loop; they are shown as error frames through
//! [`FrameBuffer::render_error`] and the producer is polled again.

pub mod camera;
pub mod copy;
pub mod ffmpeg;
pub mod file;
pub mod generator;
pub mod image;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::video::{Codec, Frame, FrameBuffer, ImageCodec};

pub use camera::{CameraOptions, CameraSource};
pub use copy::{hard_copy, soft_copy};
pub use file::{FileOptions, FileSource};
pub use generator::GeneratorSource;
pub use image::{ImageOptions, ImageSource};

/// Result of one producer poll
#[derive(Debug)]
pub enum Produced {
    /// A frame to fit and publish
    Frame(Frame),
    /// The producer already published through the buffer itself
    Published,
    /// The source has no more frames
    EndOfStream,
}

/// What the loop does when a producer reports end of stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfStream {
    /// Restart from the beginning
    Rewind,
    /// Publish blank frames and keep polling at the governed rate
    Blank,
}

/// Observable lifecycle of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Opening,
    Running,
    /// Showing an error frame and backing off
    Recovering,
    /// End of stream reached; blank frames are being published
    Exhausted,
}

/// Producer strategy for one kind of origin
#[async_trait]
pub trait FrameProducer: Send + 'static {
    /// Short description used in logs and error frames
    fn describe(&self) -> String;

    /// End of stream policy
    fn end_of_stream(&self) -> EndOfStream {
        EndOfStream::Blank
    }

    /// Produce the next frame
    async fn next_frame(&mut self, video: &FrameBuffer) -> Result<Produced>;

    /// Restart from the first frame
    async fn rewind(&mut self) -> Result<()> {
        Err(Error::source_unavailable(self.describe(), "source cannot rewind"))
    }
}

/// Handle to a running source
#[derive(Debug)]
pub struct Source {
    video: Arc<FrameBuffer>,
    state: watch::Receiver<SourceState>,
    task: Option<JoinHandle<()>>,
}

impl Source {
    /// A source without a producer loop (e.g. a still image rendered once)
    pub(crate) fn idle(video: Arc<FrameBuffer>) -> Self {
        let (_, state) = watch::channel(SourceState::Running);
        Self {
            video,
            state,
            task: None,
        }
    }

    /// The buffer this source publishes into
    pub fn video(&self) -> &Arc<FrameBuffer> {
        &self.video
    }

    /// Consume the handle, leaving the loop detached
    pub fn into_video(self) -> Arc<FrameBuffer> {
        self.video
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.clone()
    }

    /// Whether the producer loop is alive
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Abort the producer loop; the buffer keeps its last frame
    pub fn stop(self) -> Arc<FrameBuffer> {
        if let Some(task) = self.task {
            task.abort();
        }
        self.video
    }
}

/// Start the producer loop for `producer` as a detached task
pub fn spawn_producer<P: FrameProducer>(video: Arc<FrameBuffer>, producer: P) -> Source {
    let (state_tx, state) = watch::channel(SourceState::Opening);
    let task = tokio::spawn(run_producer(video.clone(), producer, state_tx));
    Source {
        video,
        state,
        task: Some(task),
    }
}

async fn run_producer<P: FrameProducer>(
    video: Arc<FrameBuffer>,
    mut producer: P,
    state: watch::Sender<SourceState>,
) {
    let codec = ImageCodec::new();
    let description = producer.describe();
    let mut just_rewound = false;

    tracing::info!(source = %description, "Producer loop started");
    state.send_replace(SourceState::Running);

    loop {
        let outcome = match producer.next_frame(&video).await {
            Ok(Produced::Frame(frame)) => fit(&codec, &video, frame).and_then(|f| video.set_frame(f)),
            Ok(Produced::Published) => Ok(()),
            Ok(Produced::EndOfStream) => match producer.end_of_stream() {
                EndOfStream::Rewind if just_rewound => Err(Error::source_unavailable(
                    &description,
                    "end of stream immediately after rewind",
                )),
                EndOfStream::Rewind => {
                    tracing::debug!(source = %description, "End of stream, rewinding");
                    match producer.rewind().await {
                        Ok(()) => {
                            just_rewound = true;
                            continue;
                        }
                        Err(e) => Err(e),
                    }
                }
                EndOfStream::Blank => {
                    if *state.borrow() != SourceState::Exhausted {
                        tracing::info!(source = %description, "End of stream, publishing blank frames");
                        state.send_replace(SourceState::Exhausted);
                    }
                    video.set_blank_frame();
                    video.governor().advance_one_frame().await;
                    continue;
                }
            },
            Err(e) => Err(e),
        };
        just_rewound = false;

        match outcome {
            Ok(()) => {
                if *state.borrow() != SourceState::Running {
                    tracing::info!(source = %description, "Source recovered");
                    state.send_replace(SourceState::Running);
                }
                video.governor().advance_one_frame().await;
            }
            Err(e) => {
                state.send_replace(SourceState::Recovering);
                let context = format!("Error while reading {}", description);
                video.render_error(&e, &context).await;
            }
        }
    }
}

/// Resize `frame` to the buffer's dimensions when they differ
pub(crate) fn fit(codec: &dyn Codec, video: &FrameBuffer, frame: Frame) -> Result<Frame> {
    if frame.size() == video.size() {
        Ok(frame)
    } else {
        codec.resize(&frame, video.width(), video.height())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::video::{VideoConfig, RGB};

    /// Replays a fixed script, then reports end of stream forever
    struct Scripted {
        script: VecDeque<Result<Produced>>,
        policy: EndOfStream,
        rewinds: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl Scripted {
        fn new(script: Vec<Result<Produced>>, policy: EndOfStream) -> Self {
            Self {
                script: script.into(),
                policy,
                rewinds: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl FrameProducer for Scripted {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn end_of_stream(&self) -> EndOfStream {
            self.policy
        }

        async fn next_frame(&mut self, _video: &FrameBuffer) -> Result<Produced> {
            self.script.pop_front().unwrap_or(Ok(Produced::EndOfStream))
        }

        async fn rewind(&mut self) -> Result<()> {
            self.rewinds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    fn solid(value: u8) -> Result<Produced> {
        Ok(Produced::Frame(Frame::solid(8, 6, RGB, [value, value, value, 0])))
    }

    fn video() -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(VideoConfig::new(8, 6).max_fps(10.0)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_publishes_blank_and_stays_alive() {
        let video = video();
        let source = spawn_producer(
            video.clone(),
            Scripted::new(vec![solid(50), solid(60), solid(70)], EndOfStream::Blank),
        );

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(video.get_frame().is_blank());
        assert!(source.is_running());
        assert_eq!(source.state(), SourceState::Exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_resized_to_buffer() {
        let video = video();
        let big = Frame::solid(16, 12, RGB, [9, 9, 9, 0]);
        let _source = spawn_producer(
            video.clone(),
            Scripted::new(vec![Ok(Produced::Frame(big))], EndOfStream::Blank),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let frame = video.get_frame();
        assert_eq!(frame.size(), (8, 6));
        assert_eq!(frame.pixel(0, 0), Some(&[9u8, 9, 9][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_renders_error_frame_and_recovers() {
        let video = video();
        let source = spawn_producer(
            video.clone(),
            Scripted::new(
                vec![
                    Err(Error::source_unavailable("scripted", "glitch")),
                    solid(42),
                    solid(42),
                ],
                EndOfStream::Blank,
            ),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.state(), SourceState::Recovering);
        assert_eq!(video.get_frame().pixel(0, 0), Some(&[96u8, 0, 0][..]));

        // Backoff is one second
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(video.get_frame().pixel(0, 0), Some(&[42u8, 42, 42][..]));
        assert!(source.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewind_then_immediate_end_is_an_error() {
        let video = video();
        let producer = Scripted::new(vec![solid(1)], EndOfStream::Rewind);
        let rewinds = producer.rewinds.clone();
        let source = spawn_producer(video.clone(), producer);

        tokio::time::sleep(Duration::from_millis(500)).await;

        // One rewind, then the empty restart becomes an error frame
        assert_eq!(rewinds.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(source.state(), SourceState::Recovering);

        tokio::time::sleep(Duration::from_secs(5)).await;
        // One rewind attempt per backoff, never a hot loop
        assert!(rewinds.load(std::sync::atomic::Ordering::SeqCst) <= 7);
        assert!(source.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_last_frame() {
        let video = video();
        let source = spawn_producer(
            video.clone(),
            Scripted::new(vec![solid(77), solid(77), solid(77)], EndOfStream::Blank),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = source.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stopped.get_frame().pixel(0, 0), Some(&[77u8, 77, 77][..]));
    }

    #[tokio::test]
    async fn test_idle_source() {
        let source = Source::idle(video());
        assert!(!source.is_running());
        assert_eq!(source.state(), SourceState::Running);
    }
}
