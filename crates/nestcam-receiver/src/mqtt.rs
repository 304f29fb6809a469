use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use nestcam_transfer::MAX_FRAME_LEN;

use crate::config::MqttConfig;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const MIN_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
/// Room for MQTT framing on top of the largest chunk frame.
const PACKET_OVERHEAD: usize = 1024;

pub fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_max_packet_size(MAX_FRAME_LEN + PACKET_OVERHEAD, PACKET_OVERHEAD);
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

/// Drive the broker connection and forward every message on the image topic
/// to the assembler. Subscribes again after each reconnect.
///
/// Frames are handed over with `try_send`: when the assembler falls behind
/// the frame is dropped and logged, the same as a lost chunk. Returns once
/// the assembler side of the channel is gone.
pub async fn run_subscriber(config: MqttConfig, frames: Sender<Bytes>) {
    let (client, mut eventloop) = AsyncClient::new(options(&config), 64);
    let mut delay = MIN_RECONNECT_DELAY;

    info!(
        "Connecting to MQTT broker {}:{} as {}",
        config.host, config.port, config.client_id
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected ({:?}), subscribing to {}", ack.code, config.topic);
                delay = MIN_RECONNECT_DELAY;
                if let Err(e) = client.subscribe(config.topic.as_str(), QoS::AtMostOnce).await {
                    warn!("Subscribe to {} failed: {}", config.topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Frame received: {} bytes", publish.payload.len());
                match frames.try_send(publish.payload) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        warn!("Assembler busy, dropping {} byte frame", frame.len());
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        info!("Assembler stopped, closing MQTT subscriber");
                        let _ = client.disconnect().await;
                        return;
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                debug!("Subscription to {} acknowledged", config.topic);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}; retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_allow_full_frames() {
        let config = MqttConfig {
            host: "broker".into(),
            port: 1884,
            topic: "nestcam/images".into(),
            username: Some("pi".into()),
            password: None,
            client_id: "receiver-test".into(),
        };
        let options = options(&config);
        assert_eq!(options.broker_address(), ("broker".to_string(), 1884));
        assert_eq!(options.keep_alive(), KEEP_ALIVE);
        assert!(options.max_packet_size() >= MAX_FRAME_LEN);
    }
}
