use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

use super::{ConnectHandler, FetchOptions, HandlerState};
use crate::simconnect::{
    AircraftFlags, Category, EngineType, MetarResult, SimConnectAircraft, SimConnectData,
    SimConnectUserAircraft, WeatherRequest,
};

const EARTH_RADIUS_NM: f64 = 3440.065;
const NM_TO_KM: f64 = 1.852;

/// Object id of the synthetic boat
const BOAT_OBJECT_ID: u32 = 900;
/// First object id of synthetic AI aircraft
const FIRST_AI_OBJECT_ID: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Center of all orbits
    pub center_lonx: f64,
    pub center_laty: f64,
    /// Orbit radius of the user aircraft
    pub orbit_radius_nm: f64,
    /// How far the user aircraft moves around its orbit per fetch
    pub degrees_per_fetch: f64,
    pub altitude_ft: f64,
    pub ground_speed_kts: f32,
    pub ai_aircraft: usize,
    pub include_boat: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        // KJFK
        Self {
            center_lonx: -73.7789,
            center_laty: 40.6398,
            orbit_radius_nm: 10.0,
            degrees_per_fetch: 1.0,
            altitude_ft: 5000.0,
            ground_speed_kts: 220.0,
            ai_aircraft: 5,
            include_boat: true,
        }
    }
}

#[derive(Debug)]
struct ControlState {
    running: AtomicBool,
    paused: AtomicBool,
    fetch_failing: AtomicBool,
    fetches: AtomicU64,
}

/// Remote control for a [`SyntheticHandler`] that was moved into the reader
#[derive(Debug, Clone)]
pub struct SyntheticControl {
    state: Arc<ControlState>,
}

impl SyntheticControl {
    fn new() -> Self {
        Self {
            state: Arc::new(ControlState {
                running: AtomicBool::new(true),
                paused: AtomicBool::new(false),
                fetch_failing: AtomicBool::new(false),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    /// Simulate the simulator being started or shut down
    pub fn set_running(&self, running: bool) {
        self.state.running.store(running, Ordering::SeqCst);
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.paused.store(paused, Ordering::SeqCst);
    }

    /// Make every fetch fail with [`HandlerState::FetchError`]
    pub fn set_fetch_failing(&self, failing: bool) {
        self.state.fetch_failing.store(failing, Ordering::SeqCst);
    }

    /// Number of telemetry fetches attempted so far
    pub fn fetch_count(&self) -> u64 {
        self.state.fetches.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    fn is_fetch_failing(&self) -> bool {
        self.state.fetch_failing.load(Ordering::SeqCst)
    }
}

/// Deterministic telemetry source.
///
/// The user aircraft circles the configured center, AI aircraft fly their own
/// orbits further out and a boat sits south of the center. Weather requests
/// are answered with canned METARs.
pub struct SyntheticHandler {
    config: SyntheticConfig,
    control: SyntheticControl,
    connected: bool,
    state: HandlerState,
    weather_request: WeatherRequest,
    tick: u64,
}

impl SyntheticHandler {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            control: SyntheticControl::new(),
            connected: false,
            state: HandlerState::Ok,
            weather_request: WeatherRequest::default(),
            tick: 0,
        }
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }

    fn user_aircraft(&self) -> SimConnectUserAircraft {
        let bearing = (self.tick as f64 * self.config.degrees_per_fetch) % 360.0;
        let (lonx, laty) = destination(
            self.config.center_lonx,
            self.config.center_laty,
            bearing,
            self.config.orbit_radius_nm,
        );
        // Clockwise orbit, so the track is tangential
        let track = (bearing + 90.0) % 360.0;

        let mut aircraft = SimConnectAircraft {
            object_id: 1,
            flags: AircraftFlags::IS_USER | AircraftFlags::SIM_MSFS,
            title: "Cessna Citation CJ4".to_string(),
            model: "C25C".to_string(),
            registration: "N525SY".to_string(),
            type_designator: "C25C".to_string(),
            airline: String::new(),
            flight_number: String::new(),
            from_ident: "KJFK".to_string(),
            to_ident: "KJFK".to_string(),
            heading_true_deg: track as f32,
            heading_mag_deg: (track + 13.0) as f32 % 360.0,
            ground_speed_kts: self.config.ground_speed_kts,
            indicated_speed_kts: self.config.ground_speed_kts - 15.0,
            true_airspeed_kts: self.config.ground_speed_kts,
            mach: self.config.ground_speed_kts / 661.0,
            vertical_speed_fpm: 0.0,
            indicated_altitude_ft: self.config.altitude_ft as f32,
            altitude_above_ground_ft: self.config.altitude_ft as f32 - 13.0,
            wingspan_ft: 53,
            model_radius_ft: 27,
            number_of_engines: 2,
            category: Category::Airplane,
            engine_type: EngineType::Jet,
            transponder_code: 0o1200,
            ..Default::default()
        };
        aircraft.set_position(lonx, laty, self.config.altitude_ft);
        if self.control.is_paused() {
            aircraft.flags |= AircraftFlags::SIM_PAUSED;
        }

        let now = chrono::Utc::now();
        SimConnectUserAircraft {
            aircraft,
            wind_speed_kts: 12.0,
            wind_direction_deg_true: 310.0,
            ambient_temperature_c: 5.0,
            total_air_temperature_c: 9.0,
            sea_level_pressure_mbar: 1015.0,
            ambient_visibility_meter: 16000.0,
            mag_var_deg: -13.0,
            fuel_total_quantity_gallons: 580.0,
            fuel_total_weight_lbs: 3886.0,
            fuel_flow_gph: 120.0,
            fuel_flow_pph: 804.0,
            airplane_total_weight_lbs: 15500.0,
            airplane_max_gross_weight_lbs: 17110.0,
            airplane_empty_weight_lbs: 10280.0,
            track_mag_deg: (track + 13.0) as f32 % 360.0,
            track_true_deg: track as f32,
            local_time_secs: now.timestamp(),
            local_offset_secs: -4 * 3600,
            zulu_time_secs: now.timestamp(),
            ..Default::default()
        }
    }

    fn ai_aircraft(&self, index: usize) -> SimConnectAircraft {
        let radius_nm = self.config.orbit_radius_nm + 5.0 * (index as f64 + 1.0);
        // Opposite direction and slower than the user
        let bearing = (index as f64 * 37.0 - self.tick as f64 * self.config.degrees_per_fetch * 0.5)
            .rem_euclid(360.0);
        let (lonx, laty) = destination(
            self.config.center_lonx,
            self.config.center_laty,
            bearing,
            radius_nm,
        );
        let altitude_ft = 3000.0 + 2000.0 * index as f64;
        let jet = index % 2 == 0;

        let mut aircraft = SimConnectAircraft {
            object_id: FIRST_AI_OBJECT_ID + index as u32,
            flags: AircraftFlags::SIM_MSFS,
            title: if jet { "Boeing 737-800" } else { "Cessna 172 Skyhawk" }.to_string(),
            model: if jet { "B738" } else { "C172" }.to_string(),
            registration: format!("N{}SY", 100 + index),
            type_designator: if jet { "B738" } else { "C172" }.to_string(),
            airline: if jet { "Synthetic Air" } else { "" }.to_string(),
            flight_number: if jet { format!("{}", 100 + index) } else { String::new() },
            from_ident: "KJFK".to_string(),
            to_ident: "KBOS".to_string(),
            heading_true_deg: (bearing - 90.0).rem_euclid(360.0) as f32,
            heading_mag_deg: (bearing - 77.0).rem_euclid(360.0) as f32,
            ground_speed_kts: if jet { 280.0 } else { 110.0 },
            indicated_speed_kts: if jet { 250.0 } else { 105.0 },
            true_airspeed_kts: if jet { 280.0 } else { 110.0 },
            indicated_altitude_ft: altitude_ft as f32,
            altitude_above_ground_ft: altitude_ft as f32,
            wingspan_ft: if jet { 117 } else { 36 },
            model_radius_ft: if jet { 65 } else { 18 },
            number_of_engines: if jet { 2 } else { 1 },
            category: Category::Airplane,
            engine_type: if jet { EngineType::Jet } else { EngineType::Piston },
            transponder_code: 0o4000 + index as i16,
            ..Default::default()
        };
        aircraft.set_position(lonx, laty, altitude_ft);
        aircraft
    }

    fn boat(&self) -> SimConnectAircraft {
        let (lonx, laty) = destination(
            self.config.center_lonx,
            self.config.center_laty,
            180.0,
            2.0,
        );
        let mut boat = SimConnectAircraft {
            object_id: BOAT_OBJECT_ID,
            flags: AircraftFlags::ON_GROUND | AircraftFlags::SIM_MSFS,
            title: "Container Ship".to_string(),
            model: "SHIP".to_string(),
            heading_true_deg: 90.0,
            heading_mag_deg: 103.0,
            ground_speed_kts: 12.0,
            true_airspeed_kts: 12.0,
            model_radius_ft: 600,
            deck_height_ft: 80,
            category: Category::Boat,
            engine_type: EngineType::NoEngine,
            ..Default::default()
        };
        boat.set_position(lonx, laty, 0.0);
        boat
    }

    fn metar(&self) -> MetarResult {
        let now = chrono::Utc::now();
        let station = if self.weather_request.station.is_empty() {
            "KJFK".to_string()
        } else {
            self.weather_request.station.to_uppercase()
        };
        let metar = format!(
            "{} {}Z 31012KT 10SM FEW250 12/M03 A3012",
            station,
            now.format("%d%H%M")
        );

        MetarResult {
            request_ident: self.weather_request.station.clone(),
            request_pos: self.weather_request.position,
            station_metar: if self.weather_request.station.is_empty() {
                String::new()
            } else {
                metar.clone()
            },
            nearest_metar: metar.clone(),
            interpolated_metar: metar,
            timestamp: now.timestamp(),
        }
    }
}

#[async_trait]
impl ConnectHandler for SyntheticHandler {
    async fn connect(&mut self) -> bool {
        if self.connected {
            return true;
        }

        if !self.control.is_running() {
            debug!("Synthetic simulator is not running");
            self.state = HandlerState::Disconnected;
            return false;
        }

        info!("Synthetic simulator connected");
        self.connected = true;
        self.state = HandlerState::Ok;
        true
    }

    fn is_loaded(&self) -> bool {
        true
    }

    async fn fetch_data(
        &mut self,
        data: &mut SimConnectData,
        radius_km: u32,
        options: FetchOptions,
    ) -> bool {
        if !self.connected || !self.control.is_running() {
            self.connected = false;
            self.state = HandlerState::Disconnected;
            return false;
        }

        self.control.state.fetches.fetch_add(1, Ordering::SeqCst);
        if self.control.is_fetch_failing() {
            self.state = HandlerState::FetchError;
            return false;
        }

        self.state = HandlerState::Ok;
        if self.control.is_paused() {
            return false;
        }

        self.tick += 1;
        let user = self.user_aircraft();
        let user_pos = user.position();

        if options.contains(FetchOptions::FETCH_AI_AIRCRAFT) {
            for index in 0..self.config.ai_aircraft {
                let aircraft = self.ai_aircraft(index);
                let pos = aircraft.position();
                let distance_km =
                    distance_nm(user_pos.lonx, user_pos.laty, pos.lonx, pos.laty) * NM_TO_KM;
                if radius_km == 0 || distance_km <= radius_km as f64 {
                    data.add_ai_aircraft(aircraft);
                }
            }
        }

        if options.contains(FetchOptions::FETCH_AI_BOAT) && self.config.include_boat {
            data.add_ai_aircraft(self.boat());
        }

        if options.contains(FetchOptions::FETCH_WEATHER) && self.weather_request.is_valid() {
            data.metars.push(self.metar());
        }

        data.user_aircraft = Some(user);
        true
    }

    async fn fetch_weather_data(&mut self, data: &mut SimConnectData) -> bool {
        if !self.connected {
            self.state = HandlerState::Disconnected;
            return false;
        }
        if !self.weather_request.is_valid() {
            return false;
        }

        data.metars.push(self.metar());
        true
    }

    fn add_weather_request(&mut self, request: WeatherRequest) {
        self.weather_request = request;
    }

    fn weather_request(&self) -> WeatherRequest {
        self.weather_request.clone()
    }

    fn is_sim_running(&self) -> bool {
        self.control.is_running()
    }

    fn is_sim_paused(&self) -> bool {
        self.control.is_paused()
    }

    fn can_fetch_weather(&self) -> bool {
        self.connected
    }

    fn state(&self) -> HandlerState {
        self.state
    }

    fn name(&self) -> &str {
        "Synthetic"
    }
}

/// Great circle distance in nautical miles
fn distance_nm(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_NM * c
}

/// Point at `distance_nm` from the origin along the initial `bearing_deg`
fn destination(lonx: f64, laty: f64, bearing_deg: f64, distance_nm: f64) -> (f64, f64) {
    let lat1 = laty.to_radians();
    let lon1 = lonx.to_radians();
    let bearing = bearing_deg.to_radians();
    let d = distance_nm / EARTH_RADIUS_NM;

    let lat2 = (lat1.sin() * d.cos() + lat1.cos() * d.sin() * bearing.cos()).asin();
    let lon2 = lon1
        + (bearing.sin() * d.sin() * lat1.cos()).atan2(d.cos() - lat1.sin() * lat2.sin());

    let lonx = (lon2.to_degrees() + 540.0) % 360.0 - 180.0;
    (lonx, lat2.to_degrees())
}
