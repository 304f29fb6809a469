//! Adapters from the transfer seams to the Linux node: a capture command for
//! the camera, sysfs for the LED and battery, and `nmcli` for Wi-Fi.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use nestcam_transfer::{Camera, Indicator, MAX_BATTERY, Radio, ScanEntry};

/// Runs a still-capture command and takes the JPEG from its stdout.
pub struct CommandCamera {
    program: String,
    args: Vec<String>,
}

impl CommandCamera {
    /// Split a whitespace-separated command line.
    pub fn from_command_line(line: &str) -> io::Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty capture command")
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Camera for CommandCamera {
    fn capture(&mut self) -> io::Result<Vec<u8>> {
        debug!("Capturing with {} {:?}", self.program, self.args);
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(io::Error::other(format!("{} produced no image", self.program)));
        }
        Ok(output.stdout)
    }
}

/// LED driven through a sysfs `brightness` file.
pub struct SysfsLed {
    path: PathBuf,
}

impl SysfsLed {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Indicator for SysfsLed {
    fn set(&mut self, on: bool) -> io::Result<()> {
        fs::write(&self.path, if on { "1" } else { "0" })
    }
}

/// Stand-in when the node has no LED.
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn set(&mut self, _on: bool) -> io::Result<()> {
        Ok(())
    }
}

/// Read a sysfs `capacity` file. Values above 100 are clamped.
pub fn read_battery(path: &Path) -> io::Result<u8> {
    let raw = fs::read_to_string(path)?;
    let level: u32 = raw.trim().parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad battery level {:?}: {}", raw.trim(), e),
        )
    })?;
    Ok(level.min(MAX_BATTERY as u32) as u8)
}

/// Wi-Fi through NetworkManager's command line client.
#[derive(Default)]
pub struct NmcliRadio;

impl NmcliRadio {
    fn run(args: &[&str]) -> io::Result<String> {
        let output = Command::new("nmcli")
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "nmcli {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Radio for NmcliRadio {
    fn is_active(&mut self) -> io::Result<bool> {
        Ok(Self::run(&["radio", "wifi"])?.trim() == "enabled")
    }

    fn activate(&mut self) -> io::Result<()> {
        Self::run(&["radio", "wifi", "on"]).map(|_| ())
    }

    fn scan(&mut self) -> io::Result<Vec<ScanEntry>> {
        let listing = Self::run(&["-t", "-f", "SSID,SIGNAL", "dev", "wifi", "list", "--rescan", "yes"])?;
        Ok(parse_scan(&listing))
    }

    fn is_connected(&mut self, ssid: &str) -> io::Result<bool> {
        let listing = Self::run(&["-t", "-f", "ACTIVE,SSID", "dev", "wifi"])?;
        Ok(active_ssid(&listing).as_deref() == Some(ssid))
    }

    fn begin_connect(&mut self, ssid: &str, password: &str) -> io::Result<()> {
        let mut cmd = Command::new("nmcli");
        cmd.args(["dev", "wifi", "connect", ssid]);
        if !password.is_empty() {
            cmd.args(["password", password]);
        }
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        // reap in the background; the gate polls is_connected
        std::thread::spawn(move || child.wait());
        Ok(())
    }
}

/// Split one terse `nmcli` line on unescaped colons.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if let Some(field) = fields.last_mut() {
                        field.push(next);
                    }
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}

fn parse_scan(listing: &str) -> Vec<ScanEntry> {
    listing
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [ssid, signal] = fields.as_slice() else {
                return None;
            };
            if ssid.is_empty() {
                return None;
            }
            Some(ScanEntry {
                ssid: ssid.clone(),
                signal: signal.trim().parse().ok()?,
            })
        })
        .collect()
}

fn active_ssid(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let mut fields = split_terse(line).into_iter();
        match (fields.next().as_deref(), fields.next()) {
            (Some("yes"), Some(ssid)) => Some(ssid),
            _ => None,
        }
    })
}
