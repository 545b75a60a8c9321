//! Recording and playback of telemetry packets.
//!
//! A replay file is a 12 byte header followed by telemetry frames back to back:
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────────┬─────────────────────┐
//! │ Magic (u32)  │ Version (u32)│ Update rate (u32) │ SimConnectData ...  │
//! │ 0xCACF4F27   │ 1            │ milliseconds      │ self delimiting     │
//! └──────────────┴──────────────┴───────────────────┴─────────────────────┘
//! ```

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::simconnect::wire::{FRAME_PREFIX_SIZE, MAX_FRAME_SIZE};
use crate::simconnect::{DATA_MAGIC_NUMBER, ProtocolError, SimConnectData};

pub const REPLAY_MAGIC_NUMBER: u32 = 0xCACF_4F27;
pub const REPLAY_FILE_VERSION: u32 = 1;
pub const REPLAY_HEADER_SIZE: u64 = 12;

/// Appends telemetry packets to a replay file
pub struct ReplayWriter {
    path: PathBuf,
    file: BufWriter<File>,
    buf: BytesMut,
    packets_written: u64,
}

impl ReplayWriter {
    /// Create or truncate `path` and write the header
    pub fn create(path: impl AsRef<Path>, update_rate_ms: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create replay file {}", path.display()))?;
        let mut file = BufWriter::new(file);

        let header = [
            REPLAY_MAGIC_NUMBER.to_be_bytes(),
            REPLAY_FILE_VERSION.to_be_bytes(),
            update_rate_ms.to_be_bytes(),
        ]
        .concat();
        file.write_all(&header)
            .with_context(|| format!("Failed to write replay header to {}", path.display()))?;

        info!(
            "Recording replay to {} (update rate {} ms)",
            path.display(),
            update_rate_ms
        );

        Ok(Self {
            path,
            file,
            buf: BytesMut::new(),
            packets_written: 0,
        })
    }

    /// Append one packet. Weather replies are not recorded and return false.
    pub fn append(&mut self, data: &SimConnectData) -> Result<bool> {
        if data.is_weather_reply() {
            return Ok(false);
        }

        self.buf.clear();
        data.write(&mut self.buf);
        self.file
            .write_all(&self.buf)
            .with_context(|| format!("Failed to append to replay file {}", self.path.display()))?;

        self.packets_written += 1;
        metrics::counter!("replay.packets_written_total").increment(1);
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .with_context(|| format!("Failed to flush replay file {}", self.path.display()))
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Result of scanning a complete replay file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub update_rate_ms: u32,
    pub packets: u64,
    /// Capture time of the first and last packet, seconds since epoch
    pub first_packet_ts: Option<u32>,
    pub last_packet_ts: Option<u32>,
    pub packets_with_user_aircraft: u64,
    pub max_ai_aircraft: usize,
    pub max_boats: usize,
    /// Bytes at the end of the file that do not form a complete packet
    pub trailing_bytes: u64,
}

impl ReplaySummary {
    /// Wall clock time covered by the recording
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.first_packet_ts, self.last_packet_ts) {
            (Some(first), Some(last)) => {
                Some(chrono::Duration::seconds(last as i64 - first as i64))
            }
            _ => None,
        }
    }
}

/// Reads packets from a replay file, starting over at the end
pub struct ReplayReader {
    path: PathBuf,
    file: BufReader<File>,
    update_rate_ms: u32,
    rewinds: u64,
}

impl ReplayReader {
    /// Open `path` and validate its header.
    ///
    /// A wrong magic number or version is an error; no packet is ever read
    /// from such a file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open replay file {}", path.display()))?;
        let mut file = BufReader::new(file);

        let mut header = [0u8; REPLAY_HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .with_context(|| format!("Replay file {} is too short", path.display()))?;

        let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        if magic != REPLAY_MAGIC_NUMBER {
            bail!(
                "{} is not a replay file (magic number {:#010x})",
                path.display(),
                magic
            );
        }

        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != REPLAY_FILE_VERSION {
            bail!(
                "Replay file {} has version {}, expected {}",
                path.display(),
                version,
                REPLAY_FILE_VERSION
            );
        }

        let update_rate_ms = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        info!(
            "Opened replay file {} (update rate {} ms)",
            path.display(),
            update_rate_ms
        );

        Ok(Self {
            path,
            file,
            update_rate_ms,
            rewinds: 0,
        })
    }

    /// Update rate the file was recorded with
    pub fn update_rate_ms(&self) -> u32 {
        self.update_rate_ms
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next packet, starting over after the header at the end of the file.
    ///
    /// Returns `None` only if the file holds no packet at all. Frame errors are
    /// returned as [`ProtocolError`] inside the `anyhow` error.
    pub fn next_packet(&mut self) -> Result<Option<SimConnectData>> {
        if let Some(data) = self.read_packet()? {
            return Ok(Some(data));
        }

        self.rewind()?;
        self.rewinds += 1;
        let data = self.read_packet()?;
        if data.is_some() {
            debug!(
                "Replay {} reached the end, starting over ({} times)",
                self.path.display(),
                self.rewinds
            );
        }
        Ok(data)
    }

    /// Scan the whole file. Playback continues at the first packet afterwards.
    pub fn summary(&mut self) -> Result<ReplaySummary> {
        self.rewind()?;

        let mut summary = ReplaySummary {
            update_rate_ms: self.update_rate_ms,
            ..Default::default()
        };

        while let Some(data) = self.read_packet()? {
            summary.packets += 1;
            summary.first_packet_ts.get_or_insert(data.packet_ts);
            summary.last_packet_ts = Some(data.packet_ts);
            if data.user_aircraft.is_some() {
                summary.packets_with_user_aircraft += 1;
            }

            let boats = data.ai_aircraft().iter().filter(|a| a.is_any_boat()).count();
            summary.max_boats = summary.max_boats.max(boats);
            summary.max_ai_aircraft = summary
                .max_ai_aircraft
                .max(data.ai_aircraft().len() - boats);
        }

        let end = self.file.stream_position()?;
        let len = self.file.get_ref().metadata()?.len();
        summary.trailing_bytes = len.saturating_sub(end);

        self.rewind()?;
        Ok(summary)
    }

    fn rewind(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(REPLAY_HEADER_SIZE))
            .with_context(|| format!("Failed to rewind replay file {}", self.path.display()))?;
        Ok(())
    }

    /// One packet at the current position, `None` at the end of the file or
    /// before an incomplete trailing packet
    fn read_packet(&mut self) -> Result<Option<SimConnectData>> {
        let start = self.file.stream_position()?;

        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        let read = read_full(&mut self.file, &mut prefix)?;
        if read < FRAME_PREFIX_SIZE {
            if read > 0 {
                warn!(
                    "Replay file {} ends with an incomplete packet",
                    self.path.display()
                );
                self.file.seek(SeekFrom::Start(start))?;
            }
            return Ok(None);
        }

        let magic = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        if magic != DATA_MAGIC_NUMBER {
            return Err(ProtocolError::InvalidMagicNumber {
                expected: DATA_MAGIC_NUMBER,
                found: magic,
            })
            .with_context(|| format!("Corrupt packet at offset {} in {}", start, self.path.display()));
        }

        let size = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        if size > MAX_FRAME_SIZE {
            bail!(
                "Corrupt packet size {} at offset {} in {}",
                size,
                start,
                self.path.display()
            );
        }

        let mut buf = BytesMut::zeroed(FRAME_PREFIX_SIZE + size);
        buf[..FRAME_PREFIX_SIZE].copy_from_slice(&prefix);
        let read = read_full(&mut self.file, &mut buf[FRAME_PREFIX_SIZE..])?;
        if read < size {
            warn!(
                "Replay file {} ends with an incomplete packet",
                self.path.display()
            );
            self.file.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }

        SimConnectData::read(&mut buf)
            .with_context(|| format!("Corrupt packet at offset {} in {}", start, self.path.display()))
    }
}

/// Read until `buf` is full or the end of the file, returning the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simconnect::{Category, SimConnectAircraft};
    use tempfile::TempDir;

    fn packet(packet_id: u32, ai: usize) -> SimConnectData {
        let mut data = SimConnectData {
            packet_id,
            packet_ts: 1_760_000_000 + packet_id,
            ..Default::default()
        };
        for object_id in 0..ai as u32 {
            data.add_ai_aircraft(SimConnectAircraft {
                object_id,
                ..Default::default()
            });
        }
        data
    }

    #[test]
    fn test_header_layout() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flight.replay");
        let mut writer = ReplayWriter::create(&path, 500).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(
            bytes,
            [0xCA, 0xCF, 0x4F, 0x27, 0, 0, 0, 1, 0, 0, 0x01, 0xF4]
        );
    }

    #[test]
    fn test_write_then_play_loops() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flight.replay");

        let mut writer = ReplayWriter::create(&path, 250).unwrap();
        assert!(writer.append(&packet(1, 0)).unwrap());
        assert!(!writer.append(&SimConnectData::weather_reply(Vec::new())).unwrap());
        assert!(writer.append(&packet(2, 3)).unwrap());
        assert_eq!(writer.packets_written(), 2);
        writer.flush().unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        assert_eq!(reader.update_rate_ms(), 250);

        let ids: Vec<u32> = (0..5)
            .map(|_| reader.next_packet().unwrap().unwrap().packet_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_empty_replay_has_no_packets() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.replay");
        ReplayWriter::create(&path, 500).unwrap().flush().unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        assert!(reader.next_packet().unwrap().is_none());
        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let temp_dir = TempDir::new().unwrap();

        let path = temp_dir.path().join("magic.replay");
        std::fs::write(&path, [0xCA, 0xCF, 0x4F, 0x28, 0, 0, 0, 1, 0, 0, 1, 0]).unwrap();
        let err = ReplayReader::open(&path).err().unwrap();
        assert!(err.to_string().contains("not a replay file"));

        let path = temp_dir.path().join("version.replay");
        std::fs::write(&path, [0xCA, 0xCF, 0x4F, 0x27, 0, 0, 0, 2, 0, 0, 1, 0]).unwrap();
        let err = ReplayReader::open(&path).err().unwrap();
        assert!(err.to_string().contains("version 2"));

        let path = temp_dir.path().join("short.replay");
        std::fs::write(&path, [0xCA, 0xCF]).unwrap();
        assert!(ReplayReader::open(&path).is_err());
    }

    #[test]
    fn test_incomplete_tail_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("crashed.replay");

        let mut writer = ReplayWriter::create(&path, 500).unwrap();
        writer.append(&packet(1, 1)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        // Half of a second packet, as left behind by a crash
        let frame = packet(2, 1).encode();
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&frame[..frame.len() / 2]).unwrap();
        drop(file);

        let mut reader = ReplayReader::open(&path).unwrap();
        assert_eq!(reader.next_packet().unwrap().unwrap().packet_id, 1);
        assert_eq!(reader.next_packet().unwrap().unwrap().packet_id, 1);

        let summary = reader.summary().unwrap();
        assert_eq!(summary.packets, 1);
        assert_eq!(summary.trailing_bytes, (frame.len() / 2) as u64);
    }

    #[test]
    fn test_version_mismatch_inside_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("old.replay");

        let mut writer = ReplayWriter::create(&path, 500).unwrap();
        writer.append(&packet(1, 0)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut bytes = std::fs::read(&path).unwrap();
        // packet version follows header, packet magic and size
        bytes[20..24].copy_from_slice(&12u32.to_be_bytes());
        std::fs::write(&path, bytes).unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        let err = reader.next_packet().unwrap_err();
        let protocol = err.downcast_ref::<ProtocolError>().unwrap();
        assert!(matches!(protocol, ProtocolError::VersionMismatch { found: 12, .. }));
    }

    #[test]
    fn test_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flight.replay");

        let mut writer = ReplayWriter::create(&path, 1000).unwrap();
        writer.append(&packet(1, 2)).unwrap();
        let mut with_boat = packet(2, 4);
        with_boat.add_ai_aircraft(SimConnectAircraft {
            object_id: 77,
            category: Category::Carrier,
            ..Default::default()
        });
        writer.append(&with_boat).unwrap();
        writer.append(&packet(3, 1)).unwrap();
        writer.flush().unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        let summary = reader.summary().unwrap();
        assert_eq!(summary.packets, 3);
        assert_eq!(summary.max_ai_aircraft, 4);
        assert_eq!(summary.max_boats, 1);
        assert_eq!(summary.first_packet_ts, Some(1_760_000_001));
        assert_eq!(summary.duration(), Some(chrono::Duration::seconds(2)));
        assert_eq!(summary.trailing_bytes, 0);

        // Playback starts from the beginning after a summary
        assert_eq!(reader.next_packet().unwrap().unwrap().packet_id, 1);
    }
}
