//! View a stream published by another hub, optionally recording it
//!
//! Run with: cargo run --example viewer HOST STREAM [OUTPUT_FILE]
//!
//! Examples:
//!   cargo run --example viewer localhost:8000 default
//!   cargo run --example viewer localhost:8000 default capture.mp4
//!
//! The viewed stream is re-published locally on 0.0.0.0:8001, so it can be
//! relayed further.

use std::time::Duration;

use tracing_subscriber::EnvFilter;
use wormhole::video::writer::WriterOptions;
use wormhole::{ServerConfig, StreamOptions, VideoWriter, Wormhole};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wormhole=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} HOST STREAM [OUTPUT_FILE]", args[0]);
        std::process::exit(1);
    }

    let hub = Wormhole::new(ServerConfig::with_addr("0.0.0.0:8001".parse()?))?;
    let viewer = hub.view(&args[1], &args[2]).await?;
    println!(
        "Viewing {} over {} at {}x{}",
        viewer.url(),
        viewer.protocol(),
        viewer.video().width(),
        viewer.video().height()
    );

    hub.stream_video(viewer.video().clone(), StreamOptions::new().name("relay"))?;
    let addr = hub.spawn().await?;
    println!("Relaying on http://{}/wormhole/stream/relay/mjpeg", addr);

    let writer = match args.get(3) {
        Some(path) => Some(VideoWriter::start(
            viewer.video().clone(),
            path,
            WriterOptions::default().max_fps(30.0),
        )?),
        None => None,
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                println!("state={:?} {}", viewer.state(), viewer.video().governor().stats().summary());
            }
        }
    }

    if let Some(writer) = writer {
        writer.stop().await?;
    }
    viewer.close();
    Ok(())
}
