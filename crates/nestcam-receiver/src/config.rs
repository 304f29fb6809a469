use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use nestcam_transfer::receiver::DEFAULT_MAX_IMAGE_BYTES;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

/// Receiver configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub http_host: String,
    pub http_port: u16,
    pub image_dir: PathBuf,
    pub thumb_dir: PathBuf,
    pub battery_log: PathBuf,
    /// `None` disables the stale-accumulation sweep.
    pub idle_timeout: Option<Duration>,
    pub max_image_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("NESTCAM_MQTT_HOST")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("NESTCAM_MQTT_HOST is required"))?;

        let mqtt = MqttConfig {
            host,
            port: parse_or(&get, "NESTCAM_MQTT_PORT", 1883)?,
            topic: get("NESTCAM_MQTT_TOPIC").unwrap_or_else(|| "nestcam/images".into()),
            username: get("NESTCAM_MQTT_USERNAME"),
            password: get("NESTCAM_MQTT_PASSWORD"),
            client_id: get("NESTCAM_MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("nestcam-receiver-{}", std::process::id())),
        };

        let idle_secs: u64 = parse_or(&get, "NESTCAM_IDLE_TIMEOUT_SECS", 120)?;

        Ok(Self {
            mqtt,
            http_host: get("NESTCAM_HTTP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            http_port: parse_or(&get, "NESTCAM_HTTP_PORT", 8000)?,
            image_dir: get("NESTCAM_IMAGE_DIR").unwrap_or_else(|| "./images".into()).into(),
            thumb_dir: get("NESTCAM_THUMB_DIR").unwrap_or_else(|| "./thumbs".into()).into(),
            battery_log: get("NESTCAM_BATTERY_LOG")
                .unwrap_or_else(|| "./battery.csv".into())
                .into(),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            max_image_bytes: parse_or(&get, "NESTCAM_MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
