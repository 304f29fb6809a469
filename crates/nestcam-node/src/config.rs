use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use nestcam_transfer::{
    MAX_BATTERY, MAX_CHUNKS, RetryPolicy, SenderConfig, WifiCredentials, max_payload_len,
};

const DEFAULT_CAPTURE_CMD: &str = "libcamera-still -n -t 1 --width 800 --height 600 -q 90 -o -";

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

/// Node configuration for one wake cycle.
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub sender: SenderConfig,
    /// `None` skips the connectivity gate.
    pub wifi: Option<WifiCredentials>,
    pub retry: RetryPolicy,
    pub capture_cmd: String,
    pub led_path: Option<PathBuf>,
    pub battery_path: Option<PathBuf>,
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
                .unwrap_or_else(|| format!("nestcam-node-{}", std::process::id())),
        };

        let defaults = SenderConfig::default();
        let chunk_size: usize = parse_or(&get, "NESTCAM_CHUNK_SIZE", defaults.chunk_size)?;
        if chunk_size == 0 {
            bail!("NESTCAM_CHUNK_SIZE must be at least 1");
        }
        let largest = max_payload_len(MAX_CHUNKS, Some(MAX_BATTERY));
        if chunk_size > largest {
            bail!("NESTCAM_CHUNK_SIZE must be at most {} to fit a frame", largest);
        }
        let sender = SenderConfig {
            chunk_size,
            pacing: Duration::from_millis(parse_or(
                &get,
                "NESTCAM_PACING_MS",
                defaults.pacing.as_millis() as u64,
            )?),
            budget: Duration::from_secs(parse_or(
                &get,
                "NESTCAM_BUDGET_SECS",
                defaults.budget.as_secs(),
            )?),
        };

        let wifi = get("NESTCAM_WIFI_SSID")
            .filter(|s| !s.is_empty())
            .map(|ssid| WifiCredentials {
                ssid,
                password: get("NESTCAM_WIFI_PASSWORD").unwrap_or_default(),
            });

        let policy = RetryPolicy::default();
        let retry = RetryPolicy {
            timeout: Duration::from_millis(parse_or(
                &get,
                "NESTCAM_WIFI_TIMEOUT_MS",
                policy.timeout.as_millis() as u64,
            )?),
            retries: parse_or(&get, "NESTCAM_WIFI_RETRIES", policy.retries)?,
            ..policy
        };

        Ok(Self {
            mqtt,
            sender,
            wifi,
            retry,
            capture_cmd: get("NESTCAM_CAPTURE_CMD").unwrap_or_else(|| DEFAULT_CAPTURE_CMD.into()),
            led_path: get("NESTCAM_LED_PATH").map(PathBuf::from),
            battery_path: get("NESTCAM_BATTERY_PATH").map(PathBuf::from),
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
