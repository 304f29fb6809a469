mod config;
mod hardware;
mod mqtt;

use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{error, info, warn};

use nestcam_transfer::{
    Indicator, MAX_BATTERY, TracingLogger, TransferLogger, capture_with_indicator,
    ensure_connected, send_heartbeat, send_image,
};

use crate::config::Config;
use crate::hardware::{CommandCamera, NmcliRadio, NoopIndicator, SysfsLed, read_battery};
use crate::mqtt::MqttPublisher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Capture,
    Heartbeat,
}

impl Mode {
    fn parse(arg: Option<&str>) -> anyhow::Result<Self> {
        match arg {
            None | Some("capture") => Ok(Self::Capture),
            Some("heartbeat") => Ok(Self::Heartbeat),
            Some(other) => bail!("unknown mode {:?}, expected capture or heartbeat", other),
        }
    }
}

/// One wake cycle. Every failure is logged and the process still exits 0 so
/// the next scheduled cycle runs.
fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nestcam_node=debug,nestcam_transfer=info".into()),
        )
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
    }
    info!("Cycle finished");
}

fn run() -> anyhow::Result<()> {
    let mode = Mode::parse(std::env::args().nth(1).as_deref())?;
    let config = Config::from_env().context("invalid configuration")?;
    let logger: Arc<dyn TransferLogger> = Arc::new(TracingLogger);

    match mode {
        Mode::Capture => capture_cycle(&config, &logger),
        Mode::Heartbeat => heartbeat_cycle(&config, &logger),
    }
}

fn capture_cycle(config: &Config, logger: &Arc<dyn TransferLogger>) -> anyhow::Result<()> {
    let mut camera = CommandCamera::from_command_line(&config.capture_cmd)?;
    let mut indicator: Box<dyn Indicator> = match &config.led_path {
        Some(path) => Box::new(SysfsLed::new(path.clone())),
        None => Box::new(NoopIndicator),
    };

    let image = capture_with_indicator(&mut camera, indicator.as_mut()).context("capture failed")?;
    info!("Captured {} bytes", image.len());

    let battery = image_battery(config);

    if let Some(wifi) = &config.wifi {
        ensure_connected(&mut NmcliRadio, wifi, &config.retry)?;
    }

    let mut publisher = MqttPublisher::new(&config.mqtt);
    let report = send_image(&mut publisher, &image, Some(battery), &config.sender, logger)?;
    info!(
        "Sent {} chunks ({} bytes) in {:?}",
        report.chunks_sent, report.bytes_sent, report.elapsed
    );
    Ok(())
}

fn heartbeat_cycle(config: &Config, logger: &Arc<dyn TransferLogger>) -> anyhow::Result<()> {
    let Some(level) = battery_level(config) else {
        bail!("heartbeat needs a battery reading; set NESTCAM_BATTERY_PATH");
    };

    if let Some(wifi) = &config.wifi {
        ensure_connected(&mut NmcliRadio, wifi, &config.retry)?;
    }

    let mut publisher = MqttPublisher::new(&config.mqtt);
    send_heartbeat(&mut publisher, level, logger)?;
    Ok(())
}

fn battery_level(config: &Config) -> Option<u8> {
    let path = config.battery_path.as_ref()?;
    match read_battery(path) {
        Ok(level) => Some(level),
        Err(e) => {
            warn!("Cannot read battery from {}: {}", path.display(), e);
            None
        }
    }
}

/// Image frames always carry a level so a payload starting with digits is
/// never taken for one. A node without a gauge reports full.
fn image_battery(config: &Config) -> u8 {
    battery_level(config).unwrap_or(MAX_BATTERY)
}
