//! Video file source

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::video::{Frame, FrameBuffer, VideoConfig, RGB};

use super::ffmpeg::{self, RawFrameReader, RawVideoReader, ReaderInput};
use super::{spawn_producer, EndOfStream, FrameProducer, Produced, Source};

/// Rate used when neither the caller nor the container provide one
pub const FALLBACK_FPS: f64 = 30.0;

/// File source options; unset fields are discovered from the file
#[derive(Debug, Clone)]
pub struct FileOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_fps: Option<f64>,
    /// Rewind at end of file instead of publishing blank frames
    pub repeat: bool,
    pub print_fps: bool,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            max_fps: None,
            repeat: true,
            print_fps: false,
        }
    }
}

impl FileOptions {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn max_fps(mut self, fps: f64) -> Self {
        self.max_fps = Some(fps);
        self
    }

    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn print_fps(mut self, enabled: bool) -> Self {
        self.print_fps = enabled;
        self
    }
}

/// Opens a fresh reader positioned at the first frame
pub(crate) type OpenReader = Box<dyn FnMut() -> Result<Box<dyn RawFrameReader>> + Send>;

/// Decodes a video file through ffmpeg
pub struct FileSource {
    path: String,
    size: (u32, u32),
    repeat: bool,
    open_reader: OpenReader,
    reader: Option<Box<dyn RawFrameReader>>,
}

impl FileSource {
    /// Open `path` and start its producer loop
    ///
    /// Fails with `SourceUnavailable` when the file is missing or has no
    /// decodable video stream. The file is probed even when size and rate
    /// are given, so non-video files are rejected here.
    pub async fn open(path: impl AsRef<Path>, options: FileOptions) -> Result<Source> {
        let path = path.as_ref();
        let shown = path.display().to_string();

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::source_unavailable(&shown, e))?;
        if !metadata.is_file() {
            return Err(Error::source_unavailable(&shown, "not a regular file"));
        }

        let media = ffmpeg::probe(&shown, None).await?;
        let width = options.width.unwrap_or(media.width);
        let height = options.height.unwrap_or(media.height);
        let fps = options.max_fps.or(media.fps).unwrap_or(FALLBACK_FPS);

        let video = Arc::new(FrameBuffer::new(
            VideoConfig::new(width, height)
                .max_fps(fps)
                .print_fps(options.print_fps)
                .source_label("FileSource"),
        )?);

        let input = ReaderInput::File(shown.clone());
        let mut open_reader: OpenReader = Box::new(move || {
            let reader = RawVideoReader::spawn(&input, width, height, RGB)?;
            Ok(Box::new(reader) as Box<dyn RawFrameReader>)
        });
        let reader = open_reader()?;

        tracing::info!(path = %shown, width, height, fps, repeat = options.repeat, "File source opened");

        Ok(Self::start(video, shown, options.repeat, open_reader, Some(reader)))
    }

    /// Start the producer loop over readers from `open_reader`
    pub(crate) fn start(
        video: Arc<FrameBuffer>,
        path: String,
        repeat: bool,
        open_reader: OpenReader,
        reader: Option<Box<dyn RawFrameReader>>,
    ) -> Source {
        let producer = Self {
            path,
            size: video.size(),
            repeat,
            open_reader,
            reader,
        };
        spawn_producer(video, producer)
    }

    fn reader(&mut self) -> Result<&mut Box<dyn RawFrameReader>> {
        if self.reader.is_none() {
            self.reader = Some((self.open_reader)()?);
        }
        self.reader
            .as_mut()
            .ok_or_else(|| Error::source_unavailable(&self.path, "reader not available"))
    }
}

#[async_trait]
impl FrameProducer for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path)
    }

    fn end_of_stream(&self) -> EndOfStream {
        if self.repeat {
            EndOfStream::Rewind
        } else {
            EndOfStream::Blank
        }
    }

    async fn next_frame(&mut self, _video: &FrameBuffer) -> Result<Produced> {
        let (w, h) = self.size;
        let read = self.reader()?.read_frame().await;
        match read {
            Ok(Some(data)) => Ok(Produced::Frame(Frame::from_raw(w, h, RGB, data)?)),
            Ok(None) => Ok(Produced::EndOfStream),
            Err(e) => {
                // Respawn on the next poll
                self.reader = None;
                Err(e)
            }
        }
    }

    async fn rewind(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.close().await;
        }
        self.reader()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::source::ffmpeg::RawVideoWriter;
    use crate::source::SourceState;

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let result = FileSource::open("/nonexistent/video.mp4", FileOptions::default()).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSource::open(dir.path(), FileOptions::default()).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_non_video_file_is_unavailable_with_full_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.mp4");
        std::fs::write(&path, b"this is not a video").unwrap();

        let options = FileOptions::default().size(32, 24).max_fps(10.0);
        let result = FileSource::open(&path, options).await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
    }

    /// Serves a fixed list of frames, then end of stream
    struct ListReader {
        frames: VecDeque<Vec<u8>>,
    }

    #[async_trait]
    impl RawFrameReader for ListReader {
        async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(self.frames.pop_front())
        }

        async fn close(self: Box<Self>) {}
    }

    fn list_reader(values: Vec<u8>, opens: Arc<AtomicUsize>) -> OpenReader {
        Box::new(move || {
            opens.fetch_add(1, Ordering::SeqCst);
            let frames = values
                .iter()
                .map(|v| vec![*v; Frame::byte_len(8, 6, RGB)])
                .collect();
            Ok(Box::new(ListReader { frames }) as Box<dyn RawFrameReader>)
        })
    }

    fn clip_video() -> Arc<FrameBuffer> {
        Arc::new(FrameBuffer::new(VideoConfig::new(8, 6).max_fps(10.0)).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_file_without_repeat_goes_blank() {
        let video = clip_video();
        let opens = Arc::new(AtomicUsize::new(0));
        let source = FileSource::start(
            video.clone(),
            "clip.mp4".to_string(),
            false,
            list_reader(vec![40, 50, 60], opens.clone()),
            None,
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(video.get_frame().pixel(0, 0), Some(&[50u8, 50, 50][..]));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let frame = video.get_frame();
        assert!(frame.is_blank());
        assert_eq!(frame.size(), (8, 6));
        assert_eq!(source.state(), SourceState::Exhausted);
        assert!(source.is_running());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_file_with_repeat_rewinds() {
        let video = clip_video();
        let opens = Arc::new(AtomicUsize::new(0));
        let source = FileSource::start(
            video.clone(),
            "clip.mp4".to_string(),
            true,
            list_reader(vec![70, 80], opens.clone()),
            None,
        );

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(opens.load(Ordering::SeqCst) >= 5);
        assert!(!video.get_frame().is_blank());
        assert_eq!(source.state(), SourceState::Running);
        assert!(source.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ffmpeg_clip_plays_to_end() {
        if std::process::Command::new("ffmpeg").arg("-version").output().is_err()
            || std::process::Command::new("ffprobe").arg("-version").output().is_err()
        {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        let mut writer = RawVideoWriter::spawn(&path, 16, 16, RGB, 10.0, &["-c:v", "mpeg4"]).unwrap();
        for _ in 0..5 {
            let frame = Frame::solid(16, 16, RGB, [200, 200, 200, 0]);
            writer.write_frame(frame.data()).await.unwrap();
        }
        writer.finish().await.unwrap();

        let source = FileSource::open(&path, FileOptions::default().max_fps(50.0).repeat(false))
            .await
            .unwrap();
        assert_eq!(source.video().size(), (16, 16));

        let mut state = source.subscribe_state();
        let exhausted = tokio::time::timeout(
            Duration::from_secs(10),
            state.wait_for(|s| *s == SourceState::Exhausted),
        )
        .await;
        assert!(exhausted.is_ok());
        assert!(source.video().get_frame().is_blank());
        assert!(source.is_running());
    }

    #[test]
    fn test_options_builder() {
        let options = FileOptions::default().size(320, 240).max_fps(15.0).repeat(false);
        assert_eq!(options.width, Some(320));
        assert_eq!(options.height, Some(240));
        assert_eq!(options.max_fps, Some(15.0));
        assert!(!options.repeat);
        assert!(FileOptions::default().repeat);
    }
}
