use bytes::{Bytes, BufMut, BytesMut};
use std::collections::HashMap;
use std::io::Write;

use super::aircraft::SimConnectAircraft;
use super::error::ProtocolError;
use super::user_aircraft::SimConnectUserAircraft;
use super::weather::MetarResult;
use super::wire::{WireReader, read_frame, write_frame};
use super::{DATA_MAGIC_NUMBER, DATA_VERSION, WEATHER_PACKET_ID, now_secs};

/// One telemetry snapshot as sent from the server to its clients.
///
/// Packet id 0 marks a weather reply that carries METARs only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimConnectData {
    pub packet_id: u32,
    /// Capture time in seconds since epoch
    pub packet_ts: u32,
    pub user_aircraft: Option<SimConnectUserAircraft>,
    pub(crate) ai_aircraft: Vec<SimConnectAircraft>,
    pub(crate) ai_index: HashMap<u32, usize>,
    pub metars: Vec<MetarResult>,
}

impl SimConnectData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Weather-only packet
    pub fn weather_reply(metars: Vec<MetarResult>) -> Self {
        Self {
            packet_id: WEATHER_PACKET_ID,
            packet_ts: now_secs(),
            metars,
            ..Default::default()
        }
    }

    pub fn is_weather_reply(&self) -> bool {
        self.packet_id == WEATHER_PACKET_ID
    }

    /// Stamp the packet with the current time
    pub fn touch(&mut self) {
        self.packet_ts = now_secs();
    }

    pub fn ai_aircraft(&self) -> &[SimConnectAircraft] {
        &self.ai_aircraft
    }

    /// Append an aircraft, replacing an earlier one with the same object id
    pub fn add_ai_aircraft(&mut self, aircraft: SimConnectAircraft) {
        match self.ai_index.get(&aircraft.object_id) {
            Some(&idx) => self.ai_aircraft[idx] = aircraft,
            None => {
                self.ai_index
                    .insert(aircraft.object_id, self.ai_aircraft.len());
                self.ai_aircraft.push(aircraft);
            }
        }
    }

    pub fn ai_aircraft_by_id(&self, object_id: u32) -> Option<&SimConnectAircraft> {
        self.ai_index
            .get(&object_id)
            .map(|&idx| &self.ai_aircraft[idx])
    }

    /// Keep the AI aircraft matching `keep`, preserving order
    pub fn retain_ai_aircraft(&mut self, keep: impl FnMut(&SimConnectAircraft) -> bool) {
        self.ai_aircraft.retain(keep);
        self.rebuild_index();
    }

    pub fn clear_ai_aircraft(&mut self) {
        self.ai_aircraft.clear();
        self.ai_index.clear();
    }

    fn rebuild_index(&mut self) {
        self.ai_index = self
            .ai_aircraft
            .iter()
            .enumerate()
            .map(|(idx, aircraft)| (aircraft.object_id, idx))
            .collect();
    }

    /// Append one frame to `buf` and return its size
    pub fn write(&self, buf: &mut BytesMut) -> usize {
        write_frame(buf, DATA_MAGIC_NUMBER, DATA_VERSION, |buf| {
            buf.put_u32(self.packet_id);
            buf.put_u32(self.packet_ts);

            match &self.user_aircraft {
                Some(user) => {
                    buf.put_u8(1);
                    user.write(buf);
                }
                None => buf.put_u8(0),
            }

            let ai_count = self.ai_aircraft.len().min(u16::MAX as usize);
            buf.put_u16(ai_count as u16);
            for aircraft in self.ai_aircraft.iter().take(ai_count) {
                aircraft.write(buf);
            }

            let metar_count = self.metars.len().min(u16::MAX as usize);
            buf.put_u16(metar_count as u16);
            for metar in self.metars.iter().take(metar_count) {
                metar.write(buf);
            }
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write(&mut buf);
        buf.freeze()
    }

    /// Write the frame with a single call on `writer`.
    ///
    /// A short write is reported as [`ProtocolError::InsufficientWrite`] and
    /// not resumed.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<usize, ProtocolError> {
        let frame = self.encode();
        let written = writer.write(&frame).map_err(ProtocolError::WriteError)?;
        if written < frame.len() {
            return Err(ProtocolError::InsufficientWrite {
                written,
                expected: frame.len(),
            });
        }
        Ok(written)
    }

    /// Decode one packet from the front of `buf`.
    ///
    /// `Ok(None)` means more bytes are needed; nothing was consumed.
    pub fn read(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        read_frame(buf, DATA_MAGIC_NUMBER, DATA_VERSION, Self::read_body)
    }

    fn read_body(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let packet_id = reader.u32()?;
        let packet_ts = reader.u32()?;

        let user_aircraft = if reader.u8()? != 0 {
            Some(SimConnectUserAircraft::read(reader)?)
        } else {
            None
        };

        let ai_count = reader.u16()? as usize;
        let mut data = Self {
            packet_id,
            packet_ts,
            user_aircraft,
            ai_aircraft: Vec::with_capacity(ai_count),
            ..Default::default()
        };
        for _ in 0..ai_count {
            data.add_ai_aircraft(SimConnectAircraft::read(reader)?);
        }

        let metar_count = reader.u16()? as usize;
        for _ in 0..metar_count {
            data.metars.push(MetarResult::read(reader)?);
        }
        Ok(data)
    }
}
