//! Blocking MQTT publisher for the node.
//!
//! ```text
//! [send_image] --publish--> [Client] ==requests==> [driver thread: Connection::iter]
//!                                                        |
//!      connect() waits on <---- ConnAck / error ---------+
//! ```

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rumqttc::{Client, Connection, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, info};

use nestcam_transfer::{MAX_FRAME_LEN, Publisher, Result, TransferError};

use crate::config::MqttConfig;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Room for MQTT framing on top of the largest chunk frame.
const PACKET_OVERHEAD: usize = 1024;
const REQUEST_QUEUE: usize = 16;

/// What the driver thread reports back to the publisher.
#[derive(Debug)]
enum Status {
    Connected,
    Failed(String),
}

struct Session {
    client: Client,
    status: Receiver<Status>,
    driver: JoinHandle<()>,
}

/// One broker connection per transfer, QoS 0, no retained messages.
pub struct MqttPublisher {
    options: MqttOptions,
    topic: String,
    session: Option<Session>,
}

impl MqttPublisher {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_max_packet_size(PACKET_OVERHEAD, MAX_FRAME_LEN + PACKET_OVERHEAD);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.as_deref().unwrap_or_default());
        }
        Self {
            options,
            topic: config.topic.clone(),
            session: None,
        }
    }

    /// Surface a connection error the driver saw since the last call.
    fn check_driver(session: &Session) -> Result<()> {
        match session.status.try_recv() {
            Ok(Status::Failed(e)) => Err(TransferError::Transport(e)),
            _ => Ok(()),
        }
    }
}

impl Publisher for MqttPublisher {
    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let (client, connection) = Client::new(self.options.clone(), REQUEST_QUEUE);
        let (status_tx, status_rx) = crossbeam_channel::bounded(4);
        let driver = std::thread::Builder::new()
            .name("mqtt-driver".into())
            .spawn(move || drive(connection, status_tx))?;

        let session = Session {
            client,
            status: status_rx,
            driver,
        };

        match session.status.recv_timeout(CONNECT_TIMEOUT) {
            Ok(Status::Connected) => {
                let (host, port) = self.options.broker_address();
                info!("MQTT connected to {}:{}", host, port);
                self.session = Some(session);
                Ok(())
            }
            Ok(Status::Failed(e)) => {
                let _ = session.driver.join();
                Err(TransferError::Transport(format!("connect failed: {}", e)))
            }
            Err(RecvTimeoutError::Timeout) => {
                // the driver exits once the client is dropped
                drop(session.client);
                Err(TransferError::Transport(format!(
                    "no CONNACK within {:?}",
                    CONNECT_TIMEOUT
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = session.driver.join();
                Err(TransferError::Transport("MQTT driver stopped".into()))
            }
        }
    }

    fn publish(&mut self, frame: &[u8]) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TransferError::Transport("not connected".into()))?;
        Self::check_driver(session)?;
        session
            .client
            .publish(self.topic.as_str(), QoS::AtMostOnce, false, frame.to_vec())
            .map_err(|e| TransferError::Transport(e.to_string()))
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let requested = session
            .client
            .disconnect()
            .map_err(|e| TransferError::Transport(e.to_string()));
        drop(session.client);
        if session.driver.join().is_err() {
            return Err(TransferError::Transport("MQTT driver panicked".into()));
        }
        debug!("MQTT disconnected");
        requested
    }
}

/// Poll the connection until it fails, a disconnect goes out, or the client
/// is dropped. Queued publishes are flushed before the disconnect.
fn drive(mut connection: Connection, status: Sender<Status>) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                let _ = status.try_send(Status::Connected);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                let _ = status.try_send(Status::Failed(e.to_string()));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".into(),
            port: 1,
            topic: "nestcam/images".into(),
            username: None,
            password: None,
            client_id: "node-test".into(),
        }
    }

    #[test]
    fn test_publish_requires_connection() {
        let mut publisher = MqttPublisher::new(&config());
        assert!(matches!(
            publisher.publish(b"0|1|x"),
            Err(TransferError::Transport(_))
        ));
        assert!(publisher.disconnect().is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let publisher = MqttPublisher::new(&config());
        assert_eq!(publisher.options.keep_alive(), KEEP_ALIVE);
        assert_eq!(
            publisher.options.broker_address(),
            ("127.0.0.1".to_string(), 1)
        );
    }
}
