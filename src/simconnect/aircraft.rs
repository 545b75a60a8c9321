use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::error::ProtocolError;
use super::wire::{INVALID_ORDINATE, WireReader, put_short_string};

/// Keys of the double precision side table carried with every aircraft.
///
/// The fixed layout only has single precision coordinates. Consumers that
/// need more precision look these up instead.
pub mod property {
    pub const LONX_DOUBLE: u8 = 1;
    pub const LATY_DOUBLE: u8 = 2;
    pub const ALTITUDE_DOUBLE: u8 = 3;
}

bitflags::bitflags! {
    /// State and source flags of an aircraft, packed into a u32 on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AircraftFlags: u32 {
        const ON_GROUND = 1 << 0;
        const IN_CLOUD = 1 << 1;
        const IN_RAIN = 1 << 2;
        const IN_SNOW = 1 << 3;
        const IS_USER = 1 << 4;
        const SIM_PAUSED = 1 << 5;
        const SIM_REPLAY = 1 << 6;
        const SIM_FSX_P3D = 1 << 7;
        const SIM_XPLANE11 = 1 << 8;
        const SIM_XPLANE12 = 1 << 9;
        const SIM_MSFS = 1 << 10;
        /// Aircraft comes from an online network like VATSIM or IVAO
        const SIM_ONLINE = 1 << 11;
        /// Simulator AI aircraft that has an online network counterpart
        const SIM_ONLINE_SHADOW = 1 << 12;
    }
}

/// Kind of simulator object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Category {
    Airplane = 0,
    Helicopter = 1,
    Boat = 2,
    Carrier = 3,
    Frigate = 4,
    GroundVehicle = 5,
    ControlTower = 6,
    SimpleObject = 7,
    Viewer = 8,
    #[default]
    Unknown = 9,
}

impl Category {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Category::Airplane,
            1 => Category::Helicopter,
            2 => Category::Boat,
            3 => Category::Carrier,
            4 => Category::Frigate,
            5 => Category::GroundVehicle,
            6 => Category::ControlTower,
            7 => Category::SimpleObject,
            8 => Category::Viewer,
            _ => Category::Unknown,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Airplane => "Airplane",
            Category::Helicopter => "Helicopter",
            Category::Boat => "Boat",
            Category::Carrier => "Carrier",
            Category::Frigate => "Frigate",
            Category::GroundVehicle => "Ground Vehicle",
            Category::ControlTower => "Control Tower",
            Category::SimpleObject => "Simple Object",
            Category::Viewer => "Viewer",
            Category::Unknown => "Unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum EngineType {
    Piston = 0,
    Jet = 1,
    NoEngine = 2,
    HeloTurbine = 3,
    #[default]
    Unsupported = 4,
    Turboprop = 5,
}

impl EngineType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => EngineType::Piston,
            1 => EngineType::Jet,
            2 => EngineType::NoEngine,
            3 => EngineType::HeloTurbine,
            5 => EngineType::Turboprop,
            _ => EngineType::Unsupported,
        }
    }
}

/// Double precision position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub lonx: f64,
    pub laty: f64,
    pub altitude_ft: f64,
}

/// Base telemetry of one simulator object (user or AI)
#[derive(Debug, Clone, PartialEq)]
pub struct SimConnectAircraft {
    /// Simulator assigned id, stable for the lifetime of the object
    pub object_id: u32,
    pub flags: AircraftFlags,

    pub title: String,
    pub model: String,
    pub registration: String,
    pub type_designator: String,
    pub airline: String,
    pub flight_number: String,
    pub from_ident: String,
    pub to_ident: String,

    pub lonx: f32,
    pub laty: f32,
    pub altitude_ft: f32,

    pub heading_true_deg: f32,
    pub heading_mag_deg: f32,
    pub ground_speed_kts: f32,
    pub indicated_speed_kts: f32,
    pub true_airspeed_kts: f32,
    pub mach: f32,
    pub vertical_speed_fpm: f32,
    pub indicated_altitude_ft: f32,
    /// Radar altitude
    pub altitude_above_ground_ft: f32,

    pub wingspan_ft: u16,
    pub model_radius_ft: u16,
    pub deck_height_ft: u16,
    pub number_of_engines: u8,

    pub category: Category,
    pub engine_type: EngineType,

    /// Binary transponder code, -1 if not available
    pub transponder_code: i16,

    /// Keyed side table, see [`property`]
    pub properties: BTreeMap<u8, f64>,
}

impl Default for SimConnectAircraft {
    fn default() -> Self {
        Self {
            object_id: 0,
            flags: AircraftFlags::empty(),
            title: String::new(),
            model: String::new(),
            registration: String::new(),
            type_designator: String::new(),
            airline: String::new(),
            flight_number: String::new(),
            from_ident: String::new(),
            to_ident: String::new(),
            lonx: INVALID_ORDINATE,
            laty: INVALID_ORDINATE,
            altitude_ft: INVALID_ORDINATE,
            heading_true_deg: 0.0,
            heading_mag_deg: 0.0,
            ground_speed_kts: 0.0,
            indicated_speed_kts: 0.0,
            true_airspeed_kts: 0.0,
            mach: 0.0,
            vertical_speed_fpm: 0.0,
            indicated_altitude_ft: 0.0,
            altitude_above_ground_ft: 0.0,
            wingspan_ft: 0,
            model_radius_ft: 0,
            deck_height_ft: 0,
            number_of_engines: 0,
            category: Category::Unknown,
            engine_type: EngineType::Unsupported,
            transponder_code: -1,
            properties: BTreeMap::new(),
        }
    }
}

impl SimConnectAircraft {
    /// Object id was assigned and the position is set and inside the
    /// coordinate ranges
    pub fn is_valid(&self) -> bool {
        self.object_id != 0
            && self.lonx != INVALID_ORDINATE
            && self.laty != INVALID_ORDINATE
            && self.lonx.is_finite()
            && self.laty.is_finite()
            && (-180.0..=180.0).contains(&self.lonx)
            && (-90.0..=90.0).contains(&self.laty)
    }

    /// Stricter check that filters broken packets.
    ///
    /// Zero initialized structures from a simulator that is still loading have
    /// a position near 0,0 and no speed. Altitudes outside of -2000 to 200000 ft
    /// are garbage.
    pub fn is_fully_valid(&self) -> bool {
        if !self.is_valid() {
            return false;
        }

        let altitude = self.altitude_ft;
        if !altitude.is_finite() || altitude == 0.0 || !(-2000.0..=200000.0).contains(&altitude)
        {
            return false;
        }

        !(self.ground_speed_kts < 5.0 && self.lonx.abs() < 0.1 && self.laty.abs() < 0.1)
    }

    /// Position using the double precision overrides where present
    pub fn position(&self) -> Position {
        Position {
            lonx: self
                .properties
                .get(&property::LONX_DOUBLE)
                .copied()
                .unwrap_or(self.lonx as f64),
            laty: self
                .properties
                .get(&property::LATY_DOUBLE)
                .copied()
                .unwrap_or(self.laty as f64),
            altitude_ft: self
                .properties
                .get(&property::ALTITUDE_DOUBLE)
                .copied()
                .unwrap_or(self.altitude_ft as f64),
        }
    }

    /// Set single and double precision position at once
    pub fn set_position(&mut self, lonx: f64, laty: f64, altitude_ft: f64) {
        self.lonx = lonx as f32;
        self.laty = laty as f32;
        self.altitude_ft = altitude_ft as f32;
        self.properties.insert(property::LONX_DOUBLE, lonx);
        self.properties.insert(property::LATY_DOUBLE, laty);
        self.properties.insert(property::ALTITUDE_DOUBLE, altitude_ft);
    }

    pub fn is_on_ground(&self) -> bool {
        self.flags.contains(AircraftFlags::ON_GROUND)
    }

    pub fn is_user(&self) -> bool {
        self.flags.contains(AircraftFlags::IS_USER)
    }

    pub fn is_online(&self) -> bool {
        self.flags.contains(AircraftFlags::SIM_ONLINE)
    }

    pub fn is_any_boat(&self) -> bool {
        matches!(
            self.category,
            Category::Boat | Category::Carrier | Category::Frigate
        )
    }

    pub fn is_helicopter(&self) -> bool {
        self.category == Category::Helicopter
    }

    /// Transponder code as four octal digits, `None` if not available
    pub fn transponder_code_string(&self) -> Option<String> {
        if self.transponder_code < 0 {
            None
        } else {
            Some(format!("{:04o}", self.transponder_code))
        }
    }

    /// Serialize into `buf` and return the number of bytes written
    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();

        buf.put_u32(self.object_id);
        buf.put_u32(self.flags.bits());

        put_short_string(buf, &self.title);
        put_short_string(buf, &self.model);
        put_short_string(buf, &self.registration);
        put_short_string(buf, &self.type_designator);
        put_short_string(buf, &self.airline);
        put_short_string(buf, &self.flight_number);
        put_short_string(buf, &self.from_ident);
        put_short_string(buf, &self.to_ident);

        buf.put_f32(self.lonx);
        buf.put_f32(self.laty);
        buf.put_f32(self.altitude_ft);

        buf.put_f32(self.heading_true_deg);
        buf.put_f32(self.heading_mag_deg);
        buf.put_f32(self.ground_speed_kts);
        buf.put_f32(self.indicated_speed_kts);
        buf.put_f32(self.true_airspeed_kts);
        buf.put_f32(self.mach);
        buf.put_f32(self.vertical_speed_fpm);
        buf.put_f32(self.indicated_altitude_ft);
        buf.put_f32(self.altitude_above_ground_ft);

        buf.put_u16(self.wingspan_ft);
        buf.put_u16(self.model_radius_ft);
        buf.put_u16(self.deck_height_ft);
        buf.put_u8(self.number_of_engines);
        buf.put_u8(self.category as u8);
        buf.put_u8(self.engine_type as u8);
        buf.put_i16(self.transponder_code);

        if self.properties.len() > u8::MAX as usize {
            warn!(
                "Aircraft {} has {} properties, only {} are sent",
                self.object_id,
                self.properties.len(),
                u8::MAX
            );
        }
        let count = self.properties.len().min(u8::MAX as usize);
        buf.put_u8(count as u8);
        for (key, value) in self.properties.iter().take(count) {
            buf.put_u8(*key);
            buf.put_f64(*value);
        }

        buf.len() - start
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let object_id = reader.u32()?;
        let flags = AircraftFlags::from_bits_truncate(reader.u32()?);

        let title = reader.short_string()?;
        let model = reader.short_string()?;
        let registration = reader.short_string()?;
        let type_designator = reader.short_string()?;
        let airline = reader.short_string()?;
        let flight_number = reader.short_string()?;
        let from_ident = reader.short_string()?;
        let to_ident = reader.short_string()?;

        let lonx = reader.f32()?;
        let laty = reader.f32()?;
        let altitude_ft = reader.f32()?;

        let heading_true_deg = reader.f32()?;
        let heading_mag_deg = reader.f32()?;
        let ground_speed_kts = reader.f32()?;
        let indicated_speed_kts = reader.f32()?;
        let true_airspeed_kts = reader.f32()?;
        let mach = reader.f32()?;
        let vertical_speed_fpm = reader.f32()?;
        let indicated_altitude_ft = reader.f32()?;
        let altitude_above_ground_ft = reader.f32()?;

        let wingspan_ft = reader.u16()?;
        let model_radius_ft = reader.u16()?;
        let deck_height_ft = reader.u16()?;
        let number_of_engines = reader.u8()?;
        let category = Category::from_u8(reader.u8()?);
        let engine_type = EngineType::from_u8(reader.u8()?);
        let transponder_code = reader.i16()?;

        let count = reader.u8()?;
        let mut properties = BTreeMap::new();
        for _ in 0..count {
            let key = reader.u8()?;
            let value = reader.f64()?;
            properties.insert(key, value);
        }

        Ok(Self {
            object_id,
            flags,
            title,
            model,
            registration,
            type_designator,
            airline,
            flight_number,
            from_ident,
            to_ident,
            lonx,
            laty,
            altitude_ft,
            heading_true_deg,
            heading_mag_deg,
            ground_speed_kts,
            indicated_speed_kts,
            true_airspeed_kts,
            mach,
            vertical_speed_fpm,
            indicated_altitude_ft,
            altitude_above_ground_ft,
            wingspan_ft,
            model_radius_ft,
            deck_height_ft,
            number_of_engines,
            category,
            engine_type,
            transponder_code,
            properties,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Airliner in cruise over New Jersey
    pub(crate) fn cruising_airliner() -> SimConnectAircraft {
        let mut aircraft = SimConnectAircraft {
            object_id: 4711,
            flags: AircraftFlags::IN_CLOUD | AircraftFlags::SIM_MSFS,
            title: "Airbus A320 Neo".to_string(),
            model: "A20N".to_string(),
            registration: "D-AINA".to_string(),
            type_designator: "A20N".to_string(),
            airline: "Lufthansa".to_string(),
            flight_number: "LH400".to_string(),
            from_ident: "EDDF".to_string(),
            to_ident: "KJFK".to_string(),
            heading_true_deg: 265.5,
            heading_mag_deg: 278.25,
            ground_speed_kts: 450.0,
            indicated_speed_kts: 270.0,
            true_airspeed_kts: 455.0,
            mach: 0.78,
            vertical_speed_fpm: -150.0,
            indicated_altitude_ft: 35020.0,
            altitude_above_ground_ft: 34800.0,
            wingspan_ft: 117,
            model_radius_ft: 63,
            number_of_engines: 2,
            category: Category::Airplane,
            engine_type: EngineType::Jet,
            transponder_code: 0o2000,
            ..Default::default()
        };
        aircraft.set_position(-73.0, 40.0, 35000.0);
        aircraft
    }

    fn round_trip(aircraft: &SimConnectAircraft) -> SimConnectAircraft {
        let mut buf = BytesMut::new();
        let written = aircraft.write(&mut buf);
        assert_eq!(written, buf.len());
        let mut reader = WireReader::new(&buf);
        let decoded = SimConnectAircraft::read(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        decoded
    }

    #[test]
    fn test_round_trip() {
        let aircraft = cruising_airliner();
        let decoded = round_trip(&aircraft);
        assert_eq!(decoded, aircraft);
        assert_eq!(decoded.mach.to_bits(), aircraft.mach.to_bits());
        assert_eq!(decoded.position().lonx, -73.0);
    }

    #[test]
    fn test_default_round_trip() {
        let aircraft = SimConnectAircraft::default();
        assert_eq!(round_trip(&aircraft), aircraft);
    }

    #[test]
    fn test_full_object_id_preserved() {
        let aircraft = SimConnectAircraft {
            object_id: u32::MAX - 1,
            ..cruising_airliner()
        };
        assert_eq!(round_trip(&aircraft).object_id, u32::MAX - 1);
    }

    #[test]
    fn test_long_title_truncation_is_stable() {
        let aircraft = SimConnectAircraft {
            title: "X".repeat(400),
            ..cruising_airliner()
        };
        let once = round_trip(&aircraft);
        assert_eq!(once.title.len(), 255);
        let twice = round_trip(&once);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_unknown_flag_bits_dropped() {
        let mut buf = BytesMut::new();
        cruising_airliner().write(&mut buf);
        // flags follow the object id
        buf[4..8].copy_from_slice(&(0x8000_0000u32 | 1).to_be_bytes());
        let decoded = SimConnectAircraft::read(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(decoded.flags, AircraftFlags::ON_GROUND);
    }

    #[test]
    fn test_is_fully_valid_airborne() {
        let aircraft = cruising_airliner();
        assert!(aircraft.is_valid());
        assert!(aircraft.is_fully_valid());
    }

    #[test]
    fn test_is_fully_valid_rejects_bad_altitudes() {
        for altitude in [f32::NAN, -5000.0, 250000.0, 0.0] {
            let aircraft = SimConnectAircraft {
                altitude_ft: altitude,
                ..cruising_airliner()
            };
            assert!(!aircraft.is_fully_valid(), "altitude {}", altitude);
        }
    }

    #[test]
    fn test_is_fully_valid_rejects_null_island() {
        let aircraft = SimConnectAircraft {
            lonx: 0.05,
            laty: -0.05,
            ground_speed_kts: 2.0,
            ..cruising_airliner()
        };
        assert!(!aircraft.is_fully_valid());

        // Moving fast near 0,0 is fine
        let aircraft = SimConnectAircraft {
            ground_speed_kts: 300.0,
            ..aircraft
        };
        assert!(aircraft.is_fully_valid());
    }

    #[test]
    fn test_unassigned_object_id_is_invalid() {
        let aircraft = SimConnectAircraft {
            object_id: 0,
            ..cruising_airliner()
        };
        assert!(!aircraft.is_valid());
        assert!(!aircraft.is_fully_valid());
    }

    #[test]
    fn test_default_is_invalid() {
        assert!(!SimConnectAircraft::default().is_valid());
        assert!(!SimConnectAircraft::default().is_fully_valid());
    }

    #[test]
    fn test_transponder_code_octal() {
        let mut aircraft = cruising_airliner();
        aircraft.transponder_code = 0o7700;
        assert_eq!(aircraft.transponder_code_string().as_deref(), Some("7700"));
        aircraft.transponder_code = 0o0042;
        assert_eq!(aircraft.transponder_code_string().as_deref(), Some("0042"));
        aircraft.transponder_code = -1;
        assert_eq!(aircraft.transponder_code_string(), None);
    }

    #[test]
    fn test_position_prefers_double_overrides() {
        let mut aircraft = cruising_airliner();
        aircraft.set_position(8.570_456_123_4, 50.033_333_987_6, 364.0);
        let pos = aircraft.position();
        assert_eq!(pos.lonx, 8.570_456_123_4);
        assert_eq!(pos.laty, 50.033_333_987_6);

        aircraft.properties.clear();
        assert_eq!(aircraft.position().lonx, aircraft.lonx as f64);
    }

    #[test]
    fn test_boat_categories() {
        for category in [Category::Boat, Category::Carrier, Category::Frigate] {
            let aircraft = SimConnectAircraft {
                category,
                ..Default::default()
            };
            assert!(aircraft.is_any_boat());
        }
        assert!(!cruising_airliner().is_any_boat());
        assert_eq!(Category::from_u8(200), Category::Unknown);
        assert_eq!(EngineType::from_u8(4), EngineType::Unsupported);
    }
}
