//! Live Detection Example
//!
//! Runs a live detection session against a simulated camera and a scripted
//! detector that reports one person walking across the frame. After the
//! requested number of frames the session is stopped and the overlay that was
//! left on screen is printed as JSON.
//!
//! Usage:
//!   cargo run --example live_detect -- [--frames <n>] [--deny] [--debug]

use clap::Parser;
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vision_session::backends::scripted::ScriptedDetector;
use vision_session::media::simulated::SimulatedDevices;
use vision_session::{
    BoundingBox, DisplayList, LiveSession, LiveState, Loaded, MediaAcquisition, Prediction,
    RawFailure, Resolution, SessionConfig,
};

/// Command line parameters for the live detection example
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of frames to detect before stopping
    #[arg(short, long, default_value_t = 30)]
    frames: usize,

    /// Simulate the user denying camera permission
    #[arg(long, default_value_t = false)]
    deny: bool,

    /// Optional JSON session configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

fn walking_person(frames: usize) -> ScriptedDetector {
    ScriptedDetector::new((0..frames).map(|i| {
        Ok(vec![Prediction::new(
            "person",
            0.9,
            BoundingBox::new(20.0 + i as f32 * 10.0, 60.0, 120.0, 300.0),
        )])
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if args.debug {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };

    let devices = if args.deny {
        SimulatedDevices::failing(RawFailure::new("NotAllowedError", "Permission denied"))
    } else {
        SimulatedDevices::granting(Resolution::new(640, 480))
    };
    let devices = Arc::new(devices);

    let surface = Arc::new(Mutex::new(DisplayList::new(Resolution::default())));
    let detector = Arc::new(walking_person(args.frames));
    let session = LiveSession::new(
        MediaAcquisition::new(devices.clone()),
        Arc::new(Loaded::detector(detector)),
        surface.clone(),
        &config,
    );

    if let Err(e) = session.start().await {
        println!("Could not start: {}", e.message);
        return Ok(());
    }

    let mut state = session.subscribe();
    state
        .wait_for(|s| matches!(s, LiveState::Active | LiveState::Error(_)))
        .await?;

    loop {
        let drawn = surface.lock().map(|s| s.clear_count()).unwrap_or(0);
        if drawn >= args.frames || session.state().error().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(16)).await;
    }
    session.stop();

    if let Some(error) = session.state().error() {
        println!("Session failed: {}", error.message);
    }

    let surface = surface.lock().map_err(|e| e.to_string())?;
    println!("Frames drawn: {}", surface.clear_count());
    println!("Open camera streams: {}", devices.open_streams());
    println!("Overlay on screen:");
    println!("{}", serde_json::to_string_pretty(surface.visible())?);

    Ok(())
}
