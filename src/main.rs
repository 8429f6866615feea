use anyhow::Result;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

mod config;
mod device;
mod gesture;
mod preview;
mod sequencer;
mod session;
mod storage;

use crate::config::Config;
use crate::device::{CameraDevice, FakeCamera, RpicamCamera};
use crate::session::CaptureSession;
use crate::storage::PhotoStore;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("📷 Starting Raspberry Pi Gesture Camera (Rust Edition)");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    info!(
        "Configuration loaded: {}x{} viewport, match threshold {}",
        config.display.width, config.display.height, config.recognizer.match_threshold
    );

    if config.camera.simulate {
        warn!("Camera simulation enabled; captures produce a test pattern");
        run(FakeCamera::new(config.camera.quality), config).await?;
    } else {
        run(RpicamCamera::new(config.camera.quality), config).await?;
    }

    info!("Application shut down gracefully");
    Ok(())
}

/// Owner loop: recognition events arrive as lines on stdin (one event per
/// line, `name=score` tokens), countdown ticks arrive on the session's tick
/// channel, Ctrl-C tears the session down.
async fn run<D: CameraDevice>(device: D, config: Config) -> Result<()> {
    let store = PhotoStore::new(config.paths.save_dir.clone());
    let (mut session, mut ticks) = CaptureSession::new(device, &config, store);

    if let Err(e) = session.resume().await {
        // The user must restart the application to retry
        warn!("Camera not available: {:#}. Gestures will be ignored.", e);
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = ticks.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = session.handle_event(event).await {
                    error!("Capture failed: {:#}", e);
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let matches = gesture::parse_matches(&line);
                        session.on_gesture(&matches);
                    }
                    None => {
                        info!("Recognizer feed closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    session.pause().await;
    Ok(())
}
