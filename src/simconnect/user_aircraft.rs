use bytes::{BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use super::aircraft::SimConnectAircraft;
use super::error::ProtocolError;
use super::wire::WireReader;

/// Icing in percent for each surface reported by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Icing {
    pub structural: u8,
    pub carburetor: u8,
    pub pitot: u8,
    pub static_port: u8,
    pub window: u8,
    pub aoa: u8,
    pub inlet: u8,
    pub propeller: u8,
}

impl Icing {
    fn values(&self) -> [u8; 8] {
        [
            self.structural,
            self.carburetor,
            self.pitot,
            self.static_port,
            self.window,
            self.aoa,
            self.inlet,
            self.propeller,
        ]
    }
}

/// User aircraft with environment, fuel, weight and time information.
///
/// Derefs to the embedded [`SimConnectAircraft`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimConnectUserAircraft {
    pub aircraft: SimConnectAircraft,

    pub wind_speed_kts: f32,
    pub wind_direction_deg_true: f32,
    pub ambient_temperature_c: f32,
    pub total_air_temperature_c: f32,
    pub sea_level_pressure_mbar: f32,
    pub ambient_visibility_meter: f32,
    pub mag_var_deg: f32,

    pub icing: Icing,

    /// Fuel is reported in both units since the density depends on fuel type
    pub fuel_total_quantity_gallons: f32,
    pub fuel_total_weight_lbs: f32,
    pub fuel_flow_gph: f32,
    pub fuel_flow_pph: f32,

    pub airplane_total_weight_lbs: f32,
    pub airplane_max_gross_weight_lbs: f32,
    pub airplane_empty_weight_lbs: f32,

    pub track_mag_deg: f32,
    pub track_true_deg: f32,

    /// Simulator local time as seconds since epoch plus UTC offset
    pub local_time_secs: i64,
    pub local_offset_secs: i32,
    /// Simulator zulu time as seconds since epoch
    pub zulu_time_secs: i64,
}

impl std::ops::Deref for SimConnectUserAircraft {
    type Target = SimConnectAircraft;

    fn deref(&self) -> &Self::Target {
        &self.aircraft
    }
}

impl std::ops::DerefMut for SimConnectUserAircraft {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.aircraft
    }
}

impl SimConnectUserAircraft {
    /// Aircraft is in the air.
    ///
    /// The on-ground flag alone is unreliable right after spawning, so speed
    /// and radar altitude have to agree.
    pub fn is_flying(&self) -> bool {
        !self.aircraft.is_on_ground()
            && self.aircraft.ground_speed_kts > 20.0
            && self.aircraft.altitude_above_ground_ft > 50.0
    }

    pub fn is_any_icing(&self) -> bool {
        self.max_icing_percent() > 0
    }

    pub fn max_icing_percent(&self) -> u8 {
        self.icing.values().into_iter().max().unwrap_or(0)
    }

    pub fn zulu_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.zulu_time_secs, 0)
    }

    pub fn local_time(&self) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.local_offset_secs)?;
        offset.timestamp_opt(self.local_time_secs, 0).single()
    }

    pub fn set_zulu_time(&mut self, time: DateTime<Utc>) {
        self.zulu_time_secs = time.timestamp();
    }

    pub fn set_local_time(&mut self, time: DateTime<FixedOffset>) {
        self.local_time_secs = time.timestamp();
        self.local_offset_secs = time.offset().local_minus_utc();
    }

    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        self.aircraft.write(buf);

        buf.put_f32(self.wind_speed_kts);
        buf.put_f32(self.wind_direction_deg_true);
        buf.put_f32(self.ambient_temperature_c);
        buf.put_f32(self.total_air_temperature_c);
        buf.put_f32(self.sea_level_pressure_mbar);
        buf.put_f32(self.ambient_visibility_meter);
        buf.put_f32(self.mag_var_deg);

        buf.put_slice(&self.icing.values());

        buf.put_f32(self.fuel_total_quantity_gallons);
        buf.put_f32(self.fuel_total_weight_lbs);
        buf.put_f32(self.fuel_flow_gph);
        buf.put_f32(self.fuel_flow_pph);

        buf.put_f32(self.airplane_total_weight_lbs);
        buf.put_f32(self.airplane_max_gross_weight_lbs);
        buf.put_f32(self.airplane_empty_weight_lbs);

        buf.put_f32(self.track_mag_deg);
        buf.put_f32(self.track_true_deg);

        buf.put_i64(self.local_time_secs);
        buf.put_i32(self.local_offset_secs);
        buf.put_i64(self.zulu_time_secs);

        buf.len() - start
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let aircraft = SimConnectAircraft::read(reader)?;

        let wind_speed_kts = reader.f32()?;
        let wind_direction_deg_true = reader.f32()?;
        let ambient_temperature_c = reader.f32()?;
        let total_air_temperature_c = reader.f32()?;
        let sea_level_pressure_mbar = reader.f32()?;
        let ambient_visibility_meter = reader.f32()?;
        let mag_var_deg = reader.f32()?;

        let icing = Icing {
            structural: reader.u8()?,
            carburetor: reader.u8()?,
            pitot: reader.u8()?,
            static_port: reader.u8()?,
            window: reader.u8()?,
            aoa: reader.u8()?,
            inlet: reader.u8()?,
            propeller: reader.u8()?,
        };

        Ok(Self {
            aircraft,
            wind_speed_kts,
            wind_direction_deg_true,
            ambient_temperature_c,
            total_air_temperature_c,
            sea_level_pressure_mbar,
            ambient_visibility_meter,
            mag_var_deg,
            icing,
            fuel_total_quantity_gallons: reader.f32()?,
            fuel_total_weight_lbs: reader.f32()?,
            fuel_flow_gph: reader.f32()?,
            fuel_flow_pph: reader.f32()?,
            airplane_total_weight_lbs: reader.f32()?,
            airplane_max_gross_weight_lbs: reader.f32()?,
            airplane_empty_weight_lbs: reader.f32()?,
            track_mag_deg: reader.f32()?,
            track_true_deg: reader.f32()?,
            local_time_secs: reader.i64()?,
            local_offset_secs: reader.i32()?,
            zulu_time_secs: reader.i64()?,
        })
    }
}
