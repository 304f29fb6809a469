use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::fs as afs;
use tracing::{info, warn};

use nestcam_transfer::{Artifact, ArtifactSink, BatteryReading};

const IMAGE_EXT: &str = "jpg";
const FILENAME_FORMAT: &str = "%Y%m%d_%H%M%S.jpg";
const BATTERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One stored image as listed by the gallery.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    pub modified: DateTime<Local>,
}

/// Flat on-disk image store plus an append-only battery log.
///
/// Images land at `{image_dir}/YYYYMMDD_HHMMSS.jpg` using the local time at
/// reassembly. Two images finished within the same second share a name and
/// the later one wins.
#[derive(Debug, Clone)]
pub struct ImageStore {
    image_dir: PathBuf,
    battery_log: PathBuf,
}

impl ImageStore {
    pub fn new(image_dir: PathBuf, battery_log: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&image_dir)?;
        if let Some(parent) = battery_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        info!("Image directory: {}", image_dir.display());
        Ok(Self {
            image_dir,
            battery_log,
        })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn battery_log(&self) -> &Path {
        &self.battery_log
    }

    fn append_battery(&self, reading: &BatteryReading) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.battery_log)?;
        writeln!(
            file,
            "{},{}",
            reading.timestamp.format(BATTERY_TIME_FORMAT),
            reading.level
        )
    }

    /// Stored images, newest first.
    pub async fn list_images(&self) -> Result<Vec<ImageEntry>> {
        let mut entries = afs::read_dir(&self.image_dir).await?;
        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(IMAGE_EXT) {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = match metadata.modified() {
                Ok(t) => DateTime::<Local>::from(t),
                Err(e) => {
                    warn!("No mtime for {}: {}", name, e);
                    continue;
                }
            };
            images.push(ImageEntry { name, modified });
        }
        images.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(images)
    }

    /// The most recent line of the battery log, if any.
    pub async fn last_battery(&self) -> Result<Option<(String, u8)>> {
        let contents = match afs::read_to_string(&self.battery_log).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(contents.lines().rev().find_map(parse_battery_line))
    }
}

impl ArtifactSink for ImageStore {
    fn store(&mut self, artifact: &Artifact) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.image_dir)?;
        let path = self
            .image_dir
            .join(artifact.captured_at.format(FILENAME_FORMAT).to_string());
        fs::write(&path, &artifact.bytes)?;

        if let Some(level) = artifact.battery {
            let reading = BatteryReading {
                timestamp: artifact.captured_at,
                level,
            };
            // The image is already on disk; a log failure must not fail the store.
            if let Err(e) = self.append_battery(&reading) {
                warn!("Cannot append to {}: {}", self.battery_log.display(), e);
            }
        }
        Ok(path)
    }

    fn record_battery(&mut self, reading: &BatteryReading) -> io::Result<()> {
        self.append_battery(reading)
    }
}

fn parse_battery_line(line: &str) -> Option<(String, u8)> {
    let (timestamp, level) = line.trim().split_once(',')?;
    Some((timestamp.to_string(), level.trim().parse().ok()?))
}
