//! Connectivity gate: make the network reachable before a transfer.
//!
//! Each attempt activates the radio, scans for the target network, then
//! associates and polls until ready or until the attempt deadline passes.
//! State left behind by a failed attempt is not rolled back.

use std::io;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::error::{Result, TransferError};

/// Wireless interface operations the gate needs.
pub trait Radio {
    fn is_active(&mut self) -> io::Result<bool>;
    fn activate(&mut self) -> io::Result<()>;
    /// Visible networks from a fresh scan.
    fn scan(&mut self) -> io::Result<Vec<ScanEntry>>;
    fn is_connected(&mut self, ssid: &str) -> io::Result<bool>;
    /// Start association. Must not block until the link is up.
    fn begin_connect(&mut self, ssid: &str, password: &str) -> io::Result<()>;
}

/// One network seen in a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub ssid: String,
    /// Signal strength as the driver reports it.
    pub signal: i32,
}

#[derive(Debug, Clone)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

/// Retry policy for the gate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Per-attempt association deadline.
    pub timeout: Duration,
    pub retries: u32,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            retries: 2,
            poll_interval: Duration::from_millis(200),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error("network not found in scan")]
    NetworkNotFound,

    #[error("association timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("radio error: {0}")]
    Radio(#[from] io::Error),
}

/// Bring the link up, retrying up to `policy.retries` times.
/// Returns the 1-based attempt that succeeded.
pub fn ensure_connected<R: Radio + ?Sized>(
    radio: &mut R,
    wifi: &WifiCredentials,
    policy: &RetryPolicy,
) -> Result<u32> {
    for attempt in 1..=policy.retries {
        match try_connect(radio, wifi, policy) {
            Ok(()) => {
                info!(ssid = %wifi.ssid, attempt, "network connected");
                return Ok(attempt);
            }
            Err(failure) => {
                warn!(ssid = %wifi.ssid, attempt, "connection attempt failed: {}", failure);
            }
        }
    }
    Err(TransferError::ConnectivityExhausted {
        attempts: policy.retries,
    })
}

fn try_connect<R: Radio + ?Sized>(
    radio: &mut R,
    wifi: &WifiCredentials,
    policy: &RetryPolicy,
) -> std::result::Result<(), AttemptFailure> {
    if !radio.is_active()? {
        radio.activate()?;
    }

    let found = radio.scan()?.into_iter().find(|net| net.ssid == wifi.ssid);
    match found {
        Some(net) => info!(ssid = %net.ssid, signal = net.signal, "network found"),
        None => return Err(AttemptFailure::NetworkNotFound),
    }

    if radio.is_connected(&wifi.ssid)? {
        return Ok(());
    }

    radio.begin_connect(&wifi.ssid, &wifi.password)?;
    let start = Instant::now();
    while !radio.is_connected(&wifi.ssid)? {
        if start.elapsed() > policy.timeout {
            return Err(AttemptFailure::TimedOut(policy.timeout));
        }
        std::thread::sleep(policy.poll_interval);
    }
    Ok(())
}
