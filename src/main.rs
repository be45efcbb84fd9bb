//! Streams a synthetic camera and records a short clip from it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use framestream::pipeline::TracingObserver;
use framestream::{ChannelSink, Config, StreamManager, SyntheticCamera};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("framestream=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Framestream launching...");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    let record_mode = config.record.frame_count_mode();

    let camera = Arc::new(SyntheticCamera::new(640, 480, 16, 30.0));
    let (sink, previews) = ChannelSink::new(4);
    let manager = Arc::new(
        StreamManager::builder(camera.clone())
            .config(config)
            .sink(Arc::new(sink))
            .observer(Arc::new(TracingObserver))
            .build()?,
    );

    // The camera only sees the manager weakly so dropping it shuts down
    let weak = Arc::downgrade(&manager);
    camera.set_frame_callback(Arc::new(move |buffer: &[u8], timestamp: u64| {
        if let Some(manager) = weak.upgrade() {
            manager.submit_frame(buffer, timestamp);
        }
    }));

    let preview_task = tokio::spawn(async move {
        let mut blobs = 0u64;
        let mut bytes = 0usize;
        while let Ok(blob) = previews.recv_async().await {
            blobs += 1;
            bytes += blob.data.len();
        }
        (blobs, bytes)
    });

    manager.set_streaming(true)?;
    let path = manager.start_recording(record_mode)?;
    info!(path = %path.display(), ?record_mode, "Recording");

    tokio::select! {
        _ = async {
            while manager.record_state().is_on() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => info!("Recording complete"),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            manager.stop_recording()?;
        }
    }

    manager.set_streaming(false)?;
    let fps = manager.current_fps();
    let stats = manager.stats();
    drop(manager);

    let (blobs, bytes) = preview_task.await?;
    info!(
        submitted = stats.submitted,
        queued = stats.queued,
        dropped = stats.dropped,
        written = stats.written,
        previewed = stats.previewed,
        average_fps = fps.average,
        "Framestream shutting down"
    );
    info!(blobs, bytes, "Preview blobs received");
    Ok(())
}
