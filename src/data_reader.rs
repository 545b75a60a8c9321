//! Background loop pulling telemetry from a connect handler or a replay file.
//!
//! The loop connects (retrying every reconnect interval), then fetches one
//! packet per tick and publishes it on a broadcast channel. Pending weather
//! requests turn a tick into a weather-only fetch with packet id 0.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connect_handler::{ConnectHandler, FetchOptions, HandlerState};
use crate::replay::{ReplayReader, ReplayWriter};
use crate::simconnect::{ProtocolError, SimConnectData, WEATHER_PACKET_ID, WeatherRequest};

/// Consecutive handler errors before the loop gives up
pub const MAX_ERRORS: u32 = 50;

/// Packets buffered per subscriber before slow ones start lagging
const PACKET_CHANNEL_SIZE: usize = 64;

const EVENT_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct DataReaderConfig {
    pub update_rate: Duration,
    pub reconnect_rate: Duration,
    /// Playback speed multiplier for replay files, minimum 1
    pub replay_speed: u32,
    pub radius_km: u32,
    pub options: FetchOptions,
    pub load_replay: Option<PathBuf>,
    pub save_replay: Option<PathBuf>,
}

impl Default for DataReaderConfig {
    fn default() -> Self {
        Self {
            update_rate: Duration::from_millis(500),
            reconnect_rate: Duration::from_secs(10),
            replay_speed: 1,
            radius_km: 0,
            options: FetchOptions::default(),
            load_replay: None,
            save_replay: None,
        }
    }
}

/// Connection state changes for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Waiting for the simulator, published on every connection attempt
    Connecting,
    Connected { name: String },
    /// Published whenever the loop exits
    Disconnected,
    /// Terminal problem that ended the loop
    Error { message: String },
}

#[derive(Debug, Default)]
struct SlotState {
    request: WeatherRequest,
    pending: bool,
}

/// Single slot for the most recent weather request.
///
/// Written by any connection worker, read by the data reader. A new request
/// replaces an unprocessed one and wakes the reader.
#[derive(Debug)]
pub struct WeatherRequestSlot {
    state: Mutex<SlotState>,
    wake: Arc<Notify>,
}

impl WeatherRequestSlot {
    fn new(wake: Arc<Notify>) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            wake,
        }
    }

    pub fn set(&self, request: WeatherRequest) {
        {
            let mut state = self.state.lock().unwrap();
            state.request = request;
            state.pending = true;
        }
        self.wake.notify_one();
    }

    /// Most recent request, also after it was processed
    pub fn current(&self) -> WeatherRequest {
        self.state.lock().unwrap().request.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state.lock().unwrap().pending
    }

    /// Request that has not been fetched yet
    fn take_pending(&self) -> Option<WeatherRequest> {
        let mut state = self.state.lock().unwrap();
        if !state.pending {
            return None;
        }
        state.pending = false;
        Some(state.request.clone())
    }
}

/// Owns the polling task and the channels it publishes on.
///
/// The handler moves into the task on [`DataReader::start`] and comes back on
/// [`DataReader::terminate`], so the reader can be started again.
pub struct DataReader {
    config: DataReaderConfig,
    handler: Option<Box<dyn ConnectHandler>>,
    packets: broadcast::Sender<SimConnectData>,
    events_tx: flume::Sender<ReaderEvent>,
    events_rx: flume::Receiver<ReaderEvent>,
    weather: Arc<WeatherRequestSlot>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Option<Box<dyn ConnectHandler>>>>,
}

impl DataReader {
    pub fn new(config: DataReaderConfig, handler: Option<Box<dyn ConnectHandler>>) -> Self {
        let (packets, _) = broadcast::channel(PACKET_CHANNEL_SIZE);
        let (events_tx, events_rx) = flume::bounded(EVENT_QUEUE_SIZE);
        let wake = Arc::new(Notify::new());
        Self {
            config,
            handler,
            packets,
            events_tx,
            events_rx,
            weather: Arc::new(WeatherRequestSlot::new(wake.clone())),
            wake,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn config(&self) -> &DataReaderConfig {
        &self.config
    }

    /// Change the configuration, effective on the next start
    pub fn set_config(&mut self, config: DataReaderConfig) {
        self.config = config;
    }

    /// Sender side of the packet channel, handed to the server
    pub fn packet_sender(&self) -> broadcast::Sender<SimConnectData> {
        self.packets.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimConnectData> {
        self.packets.subscribe()
    }

    pub fn events(&self) -> flume::Receiver<ReaderEvent> {
        self.events_rx.clone()
    }

    pub fn weather_slot(&self) -> Arc<WeatherRequestSlot> {
        self.weather.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Data reader is already running");
            return;
        }

        let task = ReaderTask {
            config: self.config.clone(),
            handler: self.handler.take(),
            packets: self.packets.clone(),
            events: self.events_tx.clone(),
            weather: self.weather.clone(),
            wake: self.wake.clone(),
            cancel: self.cancel.clone(),
            packet_id: 1,
            error_count: 0,
            save: None,
        };
        self.task = Some(tokio::spawn(task.run()));
    }

    /// Cut the current wait short
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Stop the loop, wait for it to exit and make it restartable
    pub async fn terminate(&mut self) {
        self.cancel.cancel();

        if let Some(task) = self.task.take() {
            match task.await {
                Ok(handler) => {
                    if handler.is_some() {
                        self.handler = handler;
                    }
                }
                Err(e) => {
                    // The handler went down with the task
                    let message = format!(
                        "Data reader task failed: {}. The telemetry source is lost, the reader cannot be restarted",
                        e
                    );
                    error!("{}", message);
                    self.events_tx.try_send(ReaderEvent::Error { message }).ok();
                }
            }
        }

        self.cancel = CancellationToken::new();
    }
}

enum Tick {
    Continue,
    Reconnect,
    Stop,
}

struct ReaderTask {
    config: DataReaderConfig,
    handler: Option<Box<dyn ConnectHandler>>,
    packets: broadcast::Sender<SimConnectData>,
    events: flume::Sender<ReaderEvent>,
    weather: Arc<WeatherRequestSlot>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    packet_id: u32,
    error_count: u32,
    save: Option<ReplayWriter>,
}

impl ReaderTask {
    #[tracing::instrument(skip(self), name = "data_reader")]
    async fn run(mut self) -> Option<Box<dyn ConnectHandler>> {
        self.run_loop().await;

        if let Some(mut save) = self.save.take() {
            match save.flush() {
                Ok(()) => info!(
                    "Saved {} packets to {}",
                    save.packets_written(),
                    save.path().display()
                ),
                Err(e) => error!("{:#}", e),
            }
        }

        self.emit(ReaderEvent::Disconnected);
        info!("Data reader stopped");
        self.handler
    }

    async fn run_loop(&mut self) {
        let mut replay = match self.config.load_replay.clone() {
            Some(path) => match ReplayReader::open(&path) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    error!("Cannot start replay: {:#}", e);
                    self.emit(ReaderEvent::Error {
                        message: format!("{:#}", e),
                    });
                    return;
                }
            },
            None => None,
        };

        if let Some(path) = self.config.save_replay.clone() {
            let update_rate_ms = self.config.update_rate.as_millis().min(u32::MAX as u128) as u32;
            match ReplayWriter::create(&path, update_rate_ms) {
                Ok(writer) => self.save = Some(writer),
                Err(e) => warn!("Recording disabled: {:#}", e),
            }
        }

        let tick = match &replay {
            Some(reader) => {
                let speed = self.config.replay_speed.max(1);
                Duration::from_millis((reader.update_rate_ms() / speed).max(1) as u64)
            }
            None => self.config.update_rate,
        };

        if replay.is_none() {
            match &self.handler {
                None => {
                    error!("No telemetry source available");
                    self.emit(ReaderEvent::Error {
                        message: "No telemetry source available".to_string(),
                    });
                    return;
                }
                Some(handler) if !handler.is_loaded() => {
                    let message = format!("Telemetry source {} is not available", handler.name());
                    error!("{}", message);
                    self.emit(ReaderEvent::Error { message });
                    return;
                }
                Some(_) => {}
            }

            if !self.connect().await {
                return;
            }
        } else {
            self.emit(ReaderEvent::Connected {
                name: "Replay".to_string(),
            });
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let result = if let Some(request) = self.weather.take_pending() {
                self.fetch_weather(request, replay.is_some()).await;
                Tick::Continue
            } else if let Some(reader) = replay.as_mut() {
                self.replay_tick(reader)
            } else {
                self.fetch_tick().await
            };

            match result {
                Tick::Continue => {}
                Tick::Stop => break,
                Tick::Reconnect => {
                    if !self.connect().await {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    /// Try to connect every reconnect interval. Returns false if cancelled.
    async fn connect(&mut self) -> bool {
        let Some(handler) = self.handler.as_mut() else {
            return false;
        };

        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            self.events.try_send(ReaderEvent::Connecting).ok();
            metrics::counter!("data_reader.connect_attempts_total").increment(1);

            if handler.connect().await {
                info!("Connected to {}", handler.name());
                metrics::gauge!("data_reader.connected").set(1.0);
                self.error_count = 0;
                let name = handler.name().to_string();
                self.emit(ReaderEvent::Connected { name });
                return true;
            }

            debug!(
                "{} not connected, retrying in {:?}",
                handler.name(),
                self.config.reconnect_rate
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.reconnect_rate) => {}
            }
        }
    }

    async fn fetch_tick(&mut self) -> Tick {
        let Some(handler) = self.handler.as_mut() else {
            return Tick::Stop;
        };

        let mut data = SimConnectData::new();
        let start = std::time::Instant::now();
        let fetched = handler
            .fetch_data(&mut data, self.config.radius_km, self.config.options)
            .await;
        metrics::histogram!("data_reader.fetch_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        if fetched {
            self.error_count = 0;
            self.publish_telemetry(data);
            return Tick::Continue;
        }

        let state = handler.state();
        if state == HandlerState::Ok {
            // Paused or nothing new
            return Tick::Continue;
        }

        self.error_count += 1;
        metrics::counter!("data_reader.errors_total").increment(1);
        warn!(
            "Error fetching from {}: {} ({} of {})",
            handler.name(),
            state,
            self.error_count,
            MAX_ERRORS
        );

        if self.error_count > MAX_ERRORS {
            let message = format!("Too many errors reading from {}, giving up", handler.name());
            error!("{}", message);
            self.emit(ReaderEvent::Error { message });
            return Tick::Stop;
        }

        if !handler.is_sim_running() {
            info!("{} is not running anymore, reconnecting", handler.name());
            metrics::gauge!("data_reader.connected").set(0.0);
            return Tick::Reconnect;
        }
        Tick::Continue
    }

    fn replay_tick(&mut self, reader: &mut ReplayReader) -> Tick {
        match reader.next_packet() {
            Ok(Some(mut data)) => {
                let options = self.config.options;
                if !options.contains(FetchOptions::FETCH_AI_AIRCRAFT) {
                    data.retain_ai_aircraft(|aircraft| aircraft.is_any_boat());
                }
                if !options.contains(FetchOptions::FETCH_AI_BOAT) {
                    data.retain_ai_aircraft(|aircraft| !aircraft.is_any_boat());
                }
                self.publish_telemetry(data);
                Tick::Continue
            }
            Ok(None) => {
                debug!("Replay file {} has no packets", reader.path().display());
                Tick::Continue
            }
            Err(e) => {
                let incompatible = e
                    .downcast_ref::<ProtocolError>()
                    .is_some_and(|e| e.is_incompatible_peer());
                let message = if incompatible {
                    format!(
                        "{:#}. The replay file was probably recorded by an incompatible version.",
                        e
                    )
                } else {
                    format!("{:#}", e)
                };
                error!("{}", message);
                self.emit(ReaderEvent::Error { message });
                Tick::Stop
            }
        }
    }

    async fn fetch_weather(&mut self, request: WeatherRequest, replaying: bool) {
        let handler = match self.handler.as_mut() {
            Some(handler) if !replaying && handler.can_fetch_weather() => handler,
            _ => {
                debug!("Ignoring weather request {:?}, no weather source", request);
                return;
            }
        };

        handler.add_weather_request(request);
        let mut data = SimConnectData::new();
        if handler.fetch_weather_data(&mut data).await {
            data.packet_id = WEATHER_PACKET_ID;
            data.touch();
            metrics::counter!("data_reader.weather_packets_total").increment(1);
            self.send(data);
        }
    }

    /// Tag with the next packet id, publish and record
    fn publish_telemetry(&mut self, mut data: SimConnectData) {
        data.packet_id = self.packet_id;
        self.packet_id = self.packet_id.checked_add(1).unwrap_or(1);
        if data.packet_ts == 0 {
            data.touch();
        }

        if let Some(save) = self.save.as_mut()
            && let Err(e) = save.append(&data)
        {
            warn!("Recording stopped: {:#}", e);
            self.save = None;
        }

        metrics::counter!("data_reader.packets_total").increment(1);
        self.send(data);
    }

    fn send(&self, data: SimConnectData) {
        if self.packets.send(data).is_err() {
            debug!("No subscribers for packet");
        }
    }

    fn emit(&self, event: ReaderEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping reader event: {}", e);
        }
    }
}
