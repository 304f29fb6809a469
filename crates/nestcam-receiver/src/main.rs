mod config;
mod mqtt;
mod routes;
mod storage;
mod thumbs;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use nestcam_transfer::{Reassembler, ReceiverConfig, ReceiverProgress, TracingLogger, run_assembler};

use crate::config::Config;
use crate::routes::AppState;
use crate::storage::ImageStore;

/// Frames buffered between the MQTT task and the assembler thread.
const FRAME_QUEUE: usize = 256;
/// How often the assembler checks for a stalled accumulation.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nestcam_receiver=debug,nestcam_transfer=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init storage
    let store = ImageStore::new(config.image_dir.clone(), config.battery_log.clone())?;
    std::fs::create_dir_all(&config.thumb_dir)?;
    let progress = Arc::new(ReceiverProgress::new());

    // Assembler thread owns the reassembly state; the MQTT task only forwards frames.
    let reassembler = Reassembler::new(
        ReceiverConfig {
            idle_timeout: config.idle_timeout,
            max_image_bytes: config.max_image_bytes,
        },
        store.clone(),
        progress.clone(),
        Arc::new(TracingLogger),
    );
    let (frame_tx, frame_rx) = crossbeam_channel::bounded::<Bytes>(FRAME_QUEUE);
    std::thread::Builder::new()
        .name("assembler".into())
        .spawn(move || {
            run_assembler(frame_rx, reassembler, SWEEP_INTERVAL);
            warn!("Assembler thread exited");
        })?;

    match config.idle_timeout {
        Some(timeout) => info!("Stalled transfers discarded after {:?}", timeout),
        None => info!("Stalled transfers kept until superseded"),
    }

    tokio::spawn(mqtt::run_subscriber(config.mqtt.clone(), frame_tx));

    let state = AppState {
        store: Arc::new(store),
        thumb_dir: config.thumb_dir.clone(),
        progress,
    };
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.http_host, config.http_port).parse()?;
    info!("Nestcam receiver listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
