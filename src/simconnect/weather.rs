use bytes::{BufMut, BytesMut};

use super::error::ProtocolError;
use super::wire::{INVALID_ORDINATE, WireReader, put_long_string, put_short_string};

/// Geographic position used by weather requests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPos {
    pub lonx: f32,
    pub laty: f32,
    pub altitude_ft: f32,
}

impl GeoPos {
    pub fn new(lonx: f32, laty: f32, altitude_ft: f32) -> Self {
        Self {
            lonx,
            laty,
            altitude_ft,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lonx != INVALID_ORDINATE
            && self.laty != INVALID_ORDINATE
            && self.lonx.is_finite()
            && self.laty.is_finite()
    }
}

/// METAR lookup for a station or a position
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherRequest {
    pub station: String,
    pub position: Option<GeoPos>,
}

impl WeatherRequest {
    pub fn for_station(station: impl Into<String>) -> Self {
        Self {
            station: station.into(),
            position: None,
        }
    }

    pub fn for_position(position: GeoPos) -> Self {
        Self {
            station: String::new(),
            position: Some(position),
        }
    }

    /// Station or position is set
    pub fn is_valid(&self) -> bool {
        !self.station.is_empty() || self.position.is_some_and(|pos| pos.is_valid())
    }

    pub fn clear(&mut self) {
        self.station.clear();
        self.position = None;
    }

    /// Presence flag, then station and position if present.
    ///
    /// An unset position travels as [`INVALID_ORDINATE`].
    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        if !self.is_valid() {
            buf.put_u8(0);
            return buf.len() - start;
        }

        buf.put_u8(1);
        put_short_string(buf, &self.station);
        let pos = self
            .position
            .unwrap_or(GeoPos::new(INVALID_ORDINATE, INVALID_ORDINATE, INVALID_ORDINATE));
        buf.put_f32(pos.lonx);
        buf.put_f32(pos.laty);
        buf.put_f32(pos.altitude_ft);
        buf.len() - start
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        if reader.u8()? == 0 {
            return Ok(Self::default());
        }

        let station = reader.short_string()?;
        let pos = GeoPos::new(reader.f32()?, reader.f32()?, reader.f32()?);
        Ok(Self {
            station,
            position: pos.is_valid().then_some(pos),
        })
    }
}

/// Weather answer for one request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetarResult {
    pub request_ident: String,
    pub request_pos: Option<GeoPos>,
    /// METAR of the requested station, empty if it has none
    pub station_metar: String,
    /// METAR of the station closest to the request
    pub nearest_metar: String,
    /// METAR interpolated for the request position
    pub interpolated_metar: String,
    /// Seconds since epoch
    pub timestamp: i64,
}

impl MetarResult {
    pub fn is_empty(&self) -> bool {
        self.station_metar.is_empty()
            && self.nearest_metar.is_empty()
            && self.interpolated_metar.is_empty()
    }

    pub fn write(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        put_short_string(buf, &self.request_ident);
        let pos = self
            .request_pos
            .unwrap_or(GeoPos::new(INVALID_ORDINATE, INVALID_ORDINATE, INVALID_ORDINATE));
        buf.put_f32(pos.lonx);
        buf.put_f32(pos.laty);
        buf.put_f32(pos.altitude_ft);
        put_long_string(buf, &self.station_metar);
        put_long_string(buf, &self.nearest_metar);
        put_long_string(buf, &self.interpolated_metar);
        buf.put_i64(self.timestamp);
        buf.len() - start
    }

    pub fn read(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let request_ident = reader.short_string()?;
        let pos = GeoPos::new(reader.f32()?, reader.f32()?, reader.f32()?);
        Ok(Self {
            request_ident,
            request_pos: pos.is_valid().then_some(pos),
            station_metar: reader.long_string()?,
            nearest_metar: reader.long_string()?,
            interpolated_metar: reader.long_string()?,
            timestamp: reader.i64()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn round_trip_request(request: &WeatherRequest) -> WeatherRequest {
        let mut buf = BytesMut::new();
        request.write(&mut buf);
        let mut reader = WireReader::new(&buf);
        let decoded = WeatherRequest::read(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        decoded
    }

    #[test]
    fn test_station_request_layout() {
        let mut buf = BytesMut::new();
        WeatherRequest::for_station("KJFK").write(&mut buf);
        assert_eq!(
            &buf[..],
            &hex!(
                "01"
                "04 4b 4a 46 4b"
                "7f7fffff 7f7fffff 7f7fffff"
            )[..]
        );
    }

    #[test]
    fn test_invalid_request_is_one_byte() {
        let mut buf = BytesMut::new();
        assert_eq!(WeatherRequest::default().write(&mut buf), 1);
        assert_eq!(&buf[..], &[0]);
        assert_eq!(round_trip_request(&WeatherRequest::default()), WeatherRequest::default());
    }

    #[test]
    fn test_round_trips() {
        let station = WeatherRequest::for_station("EDDF");
        assert_eq!(round_trip_request(&station), station);

        let position = WeatherRequest::for_position(GeoPos::new(8.57, 50.03, 364.0));
        assert_eq!(round_trip_request(&position), position);
        assert!(position.is_valid());
    }

    #[test]
    fn test_validity_and_clear() {
        let mut request = WeatherRequest::for_station("KJFK");
        assert!(request.is_valid());
        request.clear();
        assert!(!request.is_valid());

        let unset = WeatherRequest::for_position(GeoPos::new(
            INVALID_ORDINATE,
            INVALID_ORDINATE,
            0.0,
        ));
        assert!(!unset.is_valid());
    }

    #[test]
    fn test_metar_round_trip() {
        let metar = MetarResult {
            request_ident: "KJFK".to_string(),
            request_pos: Some(GeoPos::new(-73.78, 40.64, 13.0)),
            station_metar: "KJFK 161251Z 31012KT 10SM FEW250 12/M03 A3012".to_string(),
            nearest_metar: String::new(),
            interpolated_metar: "KJFK 161251Z 31012KT 10SM 12/M03 A3012".to_string(),
            timestamp: 1_760_619_060,
        };
        let mut buf = BytesMut::new();
        let written = metar.write(&mut buf);
        assert_eq!(written, buf.len());

        let decoded = MetarResult::read(&mut WireReader::new(&buf)).unwrap();
        assert_eq!(decoded, metar);
        assert!(!decoded.is_empty());
    }
}
