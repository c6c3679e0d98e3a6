//! WarpCam - interactive perspective warp for live video
//!
//! This application captures video from a camera, runs it through a pair
//! of perspective warp effects and shows the raw, input and output frames
//! in browser-based viewer windows. Control points are dragged directly
//! on the input viewer; a right-click menu swaps the warp and input roles.

mod app;
mod capture;
mod config;
mod effect;
mod error;
mod overlay;
mod points;
mod server;
mod transform;
mod viewer;
mod warp;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::SourceKind;
use crate::server::AppState;
use crate::viewer::ViewerHub;

/// WarpCam - interactive perspective warp video demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input video device (e.g., /dev/video0)
    #[arg(short, long)]
    input: Option<String>,

    /// Use the built-in test pattern instead of a camera
    #[arg(long)]
    pattern: bool,

    /// Capture width
    #[arg(long)]
    width: Option<u32>,

    /// Capture height
    #[arg(long)]
    height: Option<u32>,

    /// Target FPS
    #[arg(long)]
    fps: Option<u32>,

    /// Web server host
    #[arg(long)]
    host: Option<String>,

    /// Web server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Apply command line overrides on top of the file configuration
    fn apply(&self, config: &mut config::Config) {
        if let Some(input) = &self.input {
            config.video.input_device = input.clone();
            config.video.source = SourceKind::V4l;
        }
        if self.pattern {
            config.video.source = SourceKind::Pattern;
        }
        if let Some(width) = self.width {
            config.video.width = width;
        }
        if let Some(height) = self.height {
            config.video.height = height;
        }
        if let Some(fps) = self.fps {
            config.video.fps = fps;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("WarpCam v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::Config::load_or_create(&args.config)?;
    args.apply(&mut config);

    match config.video.source {
        SourceKind::V4l => info!("Input device: {}", config.video.input_device),
        SourceKind::Pattern => info!("Input: test pattern"),
    }
    info!(
        "Resolution: {}x{} @ {}fps",
        config.video.width, config.video.height, config.video.fps
    );

    let hub = Arc::new(ViewerHub::new(config.server.jpeg_quality));
    let state = Arc::new(AppState::new(hub));

    // Capture and processing run on a blocking thread; the source is opened there too
    let pipeline_state = state.clone();
    let video = config.video.clone();
    let style = config.overlay.clone();
    let pipeline_handle = tokio::task::spawn_blocking(move || {
        let source = capture::open_source(&video)?;
        app::run(source, pipeline_state, style)
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting web server at http://{}", addr);

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move { server::run_server(&addr, server_state).await });

    tokio::select! {
        result = pipeline_handle => {
            match result {
                Ok(Ok(())) => info!("Pipeline exited normally"),
                Ok(Err(e)) => {
                    tracing::error!("Pipeline error: {:#}", e);
                    return Err(e);
                }
                Err(e) => tracing::error!("Pipeline task panicked: {}", e),
            }
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => tracing::error!("Server error: {}", e),
                Err(e) => tracing::error!("Server task panicked: {}", e),
            }
            state.hub.request_quit();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let args = Args::parse_from(["warpcam", "--pattern", "--width", "320", "--port", "9000"]);
        let mut config = config::Config::default();
        args.apply(&mut config);

        assert_eq!(config.video.source, SourceKind::Pattern);
        assert_eq!(config.video.width, 320);
        assert_eq!(config.video.height, 480);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_cli_without_flags_keeps_config() {
        let args = Args::parse_from(["warpcam"]);
        let mut config = config::Config::default();
        args.apply(&mut config);
        assert_eq!(config, config::Config::default());
    }
}
