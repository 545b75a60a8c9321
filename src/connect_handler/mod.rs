//! Telemetry sources feeding the data reader.
//!
//! Every source (a live simulator binding, a shared memory bridge, the
//! synthetic source used for demos and tests) implements [`ConnectHandler`].
//! The data reader owns the retry policy; handlers report failures through
//! [`ConnectHandler::state`] and never retry on their own.

use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

use crate::simconnect::{SimConnectData, WeatherRequest};

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticControl, SyntheticHandler};

/// Health of a handler after its last call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandlerState {
    #[default]
    Ok,
    FetchError,
    OpenError,
    Disconnected,
    Exception,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandlerState::Ok => "STATEOK",
            HandlerState::FetchError => "FETCH_ERROR",
            HandlerState::OpenError => "OPEN_ERROR",
            HandlerState::Disconnected => "DISCONNECTED",
            HandlerState::Exception => "EXCEPTION",
        };
        write!(f, "{}", name)
    }
}

bitflags::bitflags! {
    /// What a fetch cycle should collect besides the user aircraft
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FetchOptions: u8 {
        const FETCH_AI_AIRCRAFT = 1 << 0;
        const FETCH_AI_BOAT = 1 << 1;
        const FETCH_WEATHER = 1 << 2;
    }
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions::FETCH_AI_AIRCRAFT | FetchOptions::FETCH_AI_BOAT
    }
}

#[async_trait]
pub trait ConnectHandler: Send {
    /// One bounded connection attempt. Returns true if connected, also when
    /// already connected before.
    async fn connect(&mut self) -> bool;

    /// The binding this handler wraps is available on this machine
    fn is_loaded(&self) -> bool;

    /// Fill `data` with one snapshot.
    ///
    /// Returns false if there is nothing to deliver this cycle. Check
    /// [`ConnectHandler::state`] to tell an idle simulator from a failure.
    async fn fetch_data(
        &mut self,
        data: &mut SimConnectData,
        radius_km: u32,
        options: FetchOptions,
    ) -> bool;

    /// Fill the METAR results of `data` for the current weather request
    async fn fetch_weather_data(&mut self, data: &mut SimConnectData) -> bool;

    /// Replace the weather request. There is no queue, the last one wins.
    fn add_weather_request(&mut self, request: WeatherRequest);

    fn weather_request(&self) -> WeatherRequest;

    fn is_sim_running(&self) -> bool;

    fn is_sim_paused(&self) -> bool;

    fn can_fetch_weather(&self) -> bool;

    fn state(&self) -> HandlerState;

    fn name(&self) -> &str;
}

/// Pick the first handler whose binding is available.
///
/// Candidates are probed in order, so put the preferred source first.
pub fn select_handler(
    candidates: Vec<Box<dyn ConnectHandler>>,
) -> Option<Box<dyn ConnectHandler>> {
    for handler in candidates {
        if handler.is_loaded() {
            info!("Using telemetry source {}", handler.name());
            return Some(handler);
        }
        warn!("Telemetry source {} is not available, skipping", handler.name());
    }
    None
}
