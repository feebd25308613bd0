//! Frames, the frame buffer and frame processing

pub mod buffer;
pub mod codec;
pub mod draw;
pub mod frame;
pub mod modifiers;
pub mod watermark;
pub mod writer;

pub use buffer::{FrameBuffer, FrameModifier, FrameSubscriber, StreamInfo, VideoConfig};
pub use codec::{Codec, ImageCodec, ImageFormat};
pub use frame::{Frame, RGB, RGBA};
pub use watermark::Watermark;
pub use writer::VideoWriter;
