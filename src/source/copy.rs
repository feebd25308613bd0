//! Copies of another frame buffer
//!
//! A soft copy relays every published frame of the original through a
//! subscriber, so it adds its own modifiers without pacing of its own. A hard
//! copy runs an independent governed loop and may have a different size or
//! rate.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::video::{Frame, FrameBuffer, FrameSubscriber, VideoConfig};

use super::{spawn_producer, FrameProducer, Produced, Source};

/// Buffer mirroring `original` frame by frame
pub fn soft_copy(original: &Arc<FrameBuffer>) -> Result<Arc<FrameBuffer>> {
    let copy = Arc::new(FrameBuffer::new(
        VideoConfig::new(original.width(), original.height())
            .depth(original.depth())
            .max_fps(original.max_fps())
            .source_label("SoftCopy"),
    )?);

    let target = copy.clone();
    original.add_frame_subscriber(FrameSubscriber::new("soft_copy", move |video| {
        target.set_frame(Frame::clone(&video.get_frame()))?;
        Ok(())
    }));

    Ok(copy)
}

/// Buffer pulling `original` at its own rate, resized to `config`'s size
pub fn hard_copy(original: Arc<FrameBuffer>, config: VideoConfig) -> Result<Source> {
    let video = Arc::new(FrameBuffer::new(
        config.depth(original.depth()).source_label("HardCopy"),
    )?);
    Ok(spawn_producer(video, HardCopy { original }))
}

struct HardCopy {
    original: Arc<FrameBuffer>,
}

#[async_trait]
impl FrameProducer for HardCopy {
    fn describe(&self) -> String {
        "hard copy".to_string()
    }

    async fn next_frame(&mut self, _video: &FrameBuffer) -> Result<Produced> {
        Ok(Produced::Frame(Frame::clone(&self.original.get_frame())))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::video::{modifiers, RGB};

    fn original() -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(VideoConfig::new(16, 8).max_fps(20.0)).unwrap())
    }

    #[test]
    fn test_soft_copy_follows_original() {
        let original = original();
        let copy = soft_copy(&original).unwrap();
        copy.add_frame_modifier(modifiers::inverse());

        assert_eq!(copy.size(), original.size());
        assert_eq!(copy.max_fps(), 20.0);

        original
            .set_frame(Frame::solid(16, 8, RGB, [10, 20, 30, 0]))
            .unwrap();

        // The copy's modifiers do not leak into the original
        assert_eq!(original.get_frame().pixel(0, 0), Some(&[10u8, 20, 30][..]));
        assert_eq!(copy.get_frame().pixel(0, 0), Some(&[245u8, 235, 225][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_copy_resizes() {
        let original = original();
        original
            .set_frame(Frame::solid(16, 8, RGB, [5, 6, 7, 0]))
            .unwrap();

        let copy = hard_copy(original.clone(), VideoConfig::new(8, 4).max_fps(5.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let frame = copy.video().get_frame();
        assert_eq!(frame.size(), (8, 4));
        assert_eq!(frame.pixel(0, 0), Some(&[5u8, 6, 7][..]));
        assert!(copy.is_running());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unbounded_hard_copy_shares_the_runtime() {
        let original = original();
        original
            .set_frame(Frame::solid(16, 8, RGB, [5, 6, 7, 0]))
            .unwrap();
        let copy = hard_copy(original.clone(), VideoConfig::new(16, 8).max_fps(f64::INFINITY)).unwrap();

        // The original keeps changing while the copy spins
        let writer = original.clone();
        let updated = tokio::spawn(async move {
            for value in 1..=5u8 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                writer.set_frame(Frame::solid(16, 8, RGB, [value, 0, 0, 0]))?;
            }
            Ok::<_, crate::Error>(())
        });
        let result = tokio::time::timeout(Duration::from_secs(5), updated).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));

        tokio::time::timeout(Duration::from_secs(5), async {
            while copy.video().get_frame().pixel(0, 0) != Some(&[5u8, 0, 0][..]) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(copy.video().governor().stats().frames_rendered > 5);
    }
}
