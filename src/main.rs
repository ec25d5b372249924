//! Selene acquisition/recording pipeline demo runner.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use tracing::info;

use selene::capture::sim::SimulatedSource;
use selene::session::CameraSession;
use selene::{utils, Config, FrameShape};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "selene=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Selene launching...");

    // Load configuration, optionally from a TOML file given as first arg
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;
    selene::CONFIG.store(Arc::new(config.clone()));

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Release))?;
    }

    let shape = FrameShape::new(config.capture.width, config.capture.height);
    let source = SimulatedSource::new(shape)
        .with_exposure(config.capture.exposure_us)
        .with_frame_delay(Duration::from_millis(config.acquisition.poll_interval_ms));

    let mut session = CameraSession::new(config.acquisition.clone(), config.recording.clone());
    session.start_acquisition(Box::new(source))?;

    let store_path =
        Path::new(&config.recording.output_dir).join(utils::timestamped_name("session"));
    session.start_recording(&store_path)?;
    info!(path = %store_path.display(), "recording, press Ctrl-C to stop");

    while running.load(Ordering::Acquire) && session.is_acquiring() {
        thread::sleep(Duration::from_millis(100));
    }

    let record_stats = session.stop_recording()?;
    let mailbox_stats = session.stop_acquisition()?;
    info!(
        recorded = record_stats.recorded,
        decimated = record_stats.decimated,
        overflow_dropped = record_stats.overflow_dropped,
        published = mailbox_stats.published,
        skipped = mailbox_stats.skipped,
        duplicates = mailbox_stats.duplicates,
        "session complete"
    );
    Ok(())
}
