//! Shared helpers for the server integration tests.
//!
//! Everything binds port 0 so tests can run in parallel.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use atools::connect_handler::{SyntheticConfig, SyntheticControl, SyntheticHandler};
use atools::data_reader::{DataReader, DataReaderConfig, ReaderEvent};
use atools::nav_server::NavServer;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Reader with a synthetic source that fetches once and then waits an hour,
/// so tests see exactly one telemetry packet unless they wake it
pub fn slow_synthetic_reader() -> (DataReader, SyntheticControl) {
    let config = DataReaderConfig {
        update_rate: Duration::from_secs(3600),
        reconnect_rate: Duration::from_millis(20),
        ..Default::default()
    };
    synthetic_reader(config)
}

pub fn synthetic_reader(config: DataReaderConfig) -> (DataReader, SyntheticControl) {
    let handler = SyntheticHandler::new(SyntheticConfig::default());
    let control = handler.control();
    (DataReader::new(config, Some(Box::new(handler))), control)
}

/// Start a server on a free port, fed by `reader`
pub async fn start_server(reader: &DataReader) -> NavServer {
    NavServer::start(0, reader.packet_sender(), reader.weather_slot())
        .await
        .expect("Failed to start server")
}

pub fn server_addr(server: &NavServer) -> String {
    format!("127.0.0.1:{}", server.local_addr().port())
}

/// Poll `condition` every 10 ms until it holds, panics after [`TIMEOUT`]
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("Timed out")
}

/// Next reader event that is not a connection attempt
pub async fn next_event(events: &flume::Receiver<ReaderEvent>) -> ReaderEvent {
    loop {
        let event = within(events.recv_async())
            .await
            .expect("Event channel closed");
        if event != ReaderEvent::Connecting {
            return event;
        }
    }
}
