//! Source driven by a user closure

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BoxError, Error, Result};
use crate::video::{Frame, FrameBuffer, VideoConfig};

use super::{spawn_producer, FrameProducer, Produced, Source};

type GeneratorFn =
    dyn FnMut(&FrameBuffer) -> std::result::Result<Option<Frame>, BoxError> + Send + 'static;

/// Calls a generator once per tick
///
/// The generator returns the next frame, or `None` when it already published
/// through the buffer itself. For manual pushing without a loop, use a plain
/// [`FrameBuffer`].
pub struct GeneratorSource {
    generator: Box<GeneratorFn>,
}

impl GeneratorSource {
    pub fn spawn<F>(config: VideoConfig, generator: F) -> Result<Source>
    where
        F: FnMut(&FrameBuffer) -> std::result::Result<Option<Frame>, BoxError> + Send + 'static,
    {
        let video = Arc::new(FrameBuffer::new(config.source_label("GeneratorSource"))?);
        let producer = Self {
            generator: Box::new(generator),
        };
        Ok(spawn_producer(video, producer))
    }
}

#[async_trait]
impl FrameProducer for GeneratorSource {
    fn describe(&self) -> String {
        "generator".to_string()
    }

    async fn next_frame(&mut self, video: &FrameBuffer) -> Result<Produced> {
        match (self.generator)(video) {
            Ok(Some(frame)) => Ok(Produced::Frame(frame)),
            Ok(None) => Ok(Produced::Published),
            Err(e) => Err(Error::Callback(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::video::RGB;

    #[tokio::test(start_paused = true)]
    async fn test_generator_is_paced() {
        let mut counter = 0u8;
        let source = GeneratorSource::spawn(VideoConfig::new(64, 48).max_fps(10.0), move |_| {
            counter = counter.wrapping_add(1);
            Ok(Some(Frame::solid(64, 48, RGB, [counter, 0, 0, 0])))
        })
        .unwrap();

        let start = tokio::time::Instant::now();
        let video = source.video().clone();
        while video.governor().stats().frames_rendered < 20 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let elapsed = start.elapsed().as_secs_f64();

        // 20 frames at 10 fps take about two seconds
        assert!((1.8..=2.2).contains(&elapsed), "elapsed {}", elapsed);
        assert!(video.get_frame().pixel(0, 0).unwrap()[0] >= 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_can_publish_itself() {
        let source = GeneratorSource::spawn(VideoConfig::new(4, 4), |video| {
            video.set_frame(Frame::solid(4, 4, RGB, [77, 0, 0, 0]))?;
            Ok(None)
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.video().get_frame().pixel(0, 0), Some(&[77u8, 0, 0][..]));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unbounded_generator_shares_the_runtime() {
        let source = GeneratorSource::spawn(VideoConfig::new(4, 4).max_fps(f64::INFINITY), |_| {
            Ok(Some(Frame::solid(4, 4, RGB, [1, 2, 3, 0])))
        })
        .unwrap();

        // Only completes if the generator loop hands the thread back
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
        });
        let woke = tokio::time::timeout(Duration::from_secs(5), rx).await;

        assert!(matches!(woke, Ok(Ok(()))));
        assert!(source.video().governor().stats().frames_rendered > 0);
        assert!(source.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_error_is_rendered() {
        let source = GeneratorSource::spawn(VideoConfig::new(64, 48), |_| Err("no input".into())).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(source.is_running());
        assert_eq!(source.video().get_frame().pixel(0, 0), Some(&[96u8, 0, 0][..]));
    }
}
