//! Publish a video file, a camera, or a generated test pattern
//!
//! Run with: cargo run --example simple_stream [RESOURCE] [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_stream                         # moving test pattern on 0.0.0.0:8000
//!   cargo run --example simple_stream video.mp4               # loop a file
//!   cargo run --example simple_stream 0 127.0.0.1:8001        # camera 0 on port 8001
//!
//! ## Viewing
//!
//! In a browser:
//!   http://localhost:8000/wormhole/stream/default/mjpeg
//!
//! From another hub:
//!   cargo run --example viewer localhost:8000 default

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;
use wormhole::source::GeneratorSource;
use wormhole::video::draw::{draw_text_outlined, fill_rect};
use wormhole::video::RGB;
use wormhole::{Frame, ServerConfig, StreamOptions, VideoConfig, Wormhole};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wormhole=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let resource = args.get(1).cloned();
    let addr: SocketAddr = match args.get(2) {
        Some(addr) => addr.parse()?,
        None => "0.0.0.0:8000".parse()?,
    };

    let hub = Wormhole::new(ServerConfig::with_addr(addr).debug(true))?;
    let options = StreamOptions::new().print_fps(true);

    // Keep the source handle alive for the lifetime of the server
    let _source = match resource {
        Some(resource) => hub.stream(&resource, options).await?,
        None => {
            let source = GeneratorSource::spawn(
                VideoConfig::new(WIDTH, HEIGHT).max_fps(30.0),
                test_pattern(),
            )?;
            hub.stream_video(source.video().clone(), options)?;
            source
        }
    };

    println!("Streams: {:?}", hub.streams().names());
    println!("Open http://{}/ for the welcome page", addr);

    hub.run_until(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}

/// A bar sweeping across the frame with a frame counter
fn test_pattern(
) -> impl FnMut(&wormhole::FrameBuffer) -> Result<Option<Frame>, wormhole::error::BoxError> {
    let mut tick: u64 = 0;
    move |_| {
        let mut frame = Frame::solid(WIDTH, HEIGHT, RGB, [20, 20, 40, 0]);
        let x = (tick * 8 % u64::from(WIDTH)) as i64;
        fill_rect(&mut frame, x, 0, x + 40, HEIGHT as i64, [230, 120, 20, 0]);
        draw_text_outlined(&mut frame, &format!("frame {}", tick), 20, 20, 3, [255, 255, 255, 0]);
        tick += 1;
        Ok(Some(frame))
    }
}
