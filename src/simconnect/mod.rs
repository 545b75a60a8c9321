//! Binary data exchange protocol between the simulator side and its clients.
//!
//! The server sends [`SimConnectData`] frames, clients answer each one with a
//! [`SimConnectReply`] that either acknowledges the packet id or carries a
//! [`WeatherRequest`]. See [`wire`] for the frame layout.

pub mod aircraft;
pub mod data;
pub mod error;
pub mod reply;
pub mod user_aircraft;
pub mod weather;
pub mod wire;

pub use aircraft::{AircraftFlags, Category, EngineType, Position, SimConnectAircraft};
pub use data::SimConnectData;
pub use error::{PacketStatus, ProtocolError};
pub use reply::{ReplyCommand, SimConnectReply};
pub use user_aircraft::{Icing, SimConnectUserAircraft};
pub use weather::{GeoPos, MetarResult, WeatherRequest};

/// Magic number of telemetry frames
pub const DATA_MAGIC_NUMBER: u32 = 0xF75E_0AF3;
/// Layout version of telemetry frames, bumped on every field change
pub const DATA_VERSION: u32 = 13;

pub const REPLY_MAGIC_NUMBER: u32 = 0x33ED_8272;
pub const REPLY_VERSION: u32 = 5;

/// Packet id reserved for weather-only packets
pub const WEATHER_PACKET_ID: u32 = 0;

/// Default port of the distribution server
pub const DEFAULT_PORT: u16 = 51968;

pub(crate) fn now_secs() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}
