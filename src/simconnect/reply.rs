use bytes::{Bytes, BufMut, BytesMut};

use super::error::ProtocolError;
use super::weather::WeatherRequest;
use super::wire::{WireReader, read_frame, write_frame};
use super::{REPLY_MAGIC_NUMBER, REPLY_VERSION, now_secs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum ReplyCommand {
    /// Plain acknowledgement of a telemetry packet
    #[default]
    None = 0,
    WeatherRequest = 1,
}

impl ReplyCommand {
    /// Unknown commands are treated as acknowledgements
    pub fn from_u16(value: u16) -> Self {
        match value {
            1 => ReplyCommand::WeatherRequest,
            _ => ReplyCommand::None,
        }
    }
}

/// Client to server message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimConnectReply {
    pub packet_id: u32,
    /// Seconds since epoch
    pub packet_ts: u32,
    pub command: ReplyCommand,
    pub weather_request: WeatherRequest,
}

impl SimConnectReply {
    pub fn ack(packet_id: u32) -> Self {
        Self {
            packet_id,
            packet_ts: now_secs(),
            ..Default::default()
        }
    }

    pub fn weather(request: WeatherRequest) -> Self {
        Self {
            packet_ts: now_secs(),
            command: ReplyCommand::WeatherRequest,
            weather_request: request,
            ..Default::default()
        }
    }

    pub fn write(&self, buf: &mut BytesMut) -> usize {
        write_frame(buf, REPLY_MAGIC_NUMBER, REPLY_VERSION, |buf| {
            buf.put_u32(self.packet_id);
            buf.put_u32(self.packet_ts);
            buf.put_u16(self.command as u16);
            self.weather_request.write(buf);
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write(&mut buf);
        buf.freeze()
    }

    /// Decode one reply from the front of `buf`, `Ok(None)` if incomplete
    pub fn read(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        read_frame(buf, REPLY_MAGIC_NUMBER, REPLY_VERSION, |reader: &mut WireReader<'_>| {
            Ok(Self {
                packet_id: reader.u32()?,
                packet_ts: reader.u32()?,
                command: ReplyCommand::from_u16(reader.u16()?),
                weather_request: WeatherRequest::read(reader)?,
            })
        })
    }
}
