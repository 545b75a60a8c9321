use anyhow::{Context, Result};
use bytes::BytesMut;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::data_reader::WeatherRequestSlot;
use crate::simconnect::{ReplyCommand, SimConnectData, SimConnectReply};

/// Dropped packets before a warning is logged
pub const DROP_WARNING_THRESHOLD: u32 = 50;

/// Awaiting set size that is cleared after a drop warning
pub const MAX_AWAITING_REPLIES: usize = 5000;

/// Outstanding replies tolerated before packets are skipped
const MAX_OUTSTANDING: usize = 1;

const READ_BUFFER_SIZE: usize = 4096;

/// Bookkeeping of sent packets that were not acknowledged yet
#[derive(Debug, Default)]
pub struct DropTracker {
    awaiting: HashSet<u32>,
    dropped_since_warning: u32,
    total_dropped: u64,
}

impl DropTracker {
    /// Check before sending a telemetry packet. Returns true if the packet has
    /// to be skipped because the client is behind.
    pub fn should_drop(&mut self) -> bool {
        if self.awaiting.len() <= MAX_OUTSTANDING {
            return false;
        }

        self.dropped_since_warning += 1;
        self.total_dropped += 1;
        if self.dropped_since_warning > DROP_WARNING_THRESHOLD {
            warn!(
                "Client is not answering, {} packets dropped ({} awaiting replies)",
                self.total_dropped,
                self.awaiting.len()
            );
            self.dropped_since_warning = 0;

            if self.awaiting.len() > MAX_AWAITING_REPLIES {
                warn!("Clearing {} awaiting replies", self.awaiting.len());
                self.awaiting.clear();
            }
        }
        true
    }

    /// Remember a sent packet. Weather packets with id 0 are not tracked.
    pub fn sent(&mut self, packet_id: u32) {
        if packet_id != 0 {
            self.awaiting.insert(packet_id);
        }
    }

    /// Returns false if the id was not awaited
    pub fn acknowledge(&mut self, packet_id: u32) -> bool {
        self.awaiting.remove(&packet_id)
    }

    /// Count packets the broadcast channel skipped for this client
    pub fn lagged(&mut self, skipped: u64) {
        self.total_dropped += skipped;
    }

    pub fn awaiting(&self) -> usize {
        self.awaiting.len()
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }
}

/// Counters of one worker, readable from the server
#[derive(Debug)]
pub(crate) struct WorkerStats {
    pub peer: SocketAddr,
    pub awaiting: AtomicUsize,
    pub dropped: AtomicU64,
    pub sent: AtomicU64,
}

impl WorkerStats {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            awaiting: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            sent: AtomicU64::new(0),
        }
    }

    fn update(&self, tracker: &DropTracker) {
        self.awaiting.store(tracker.awaiting(), Ordering::Relaxed);
        self.dropped
            .store(tracker.total_dropped(), Ordering::Relaxed);
    }
}

/// Serve one client until it disconnects, sends garbage or the server stops
pub(crate) struct Worker {
    pub id: u64,
    pub stream: TcpStream,
    pub packets: broadcast::Receiver<SimConnectData>,
    pub weather: Arc<WeatherRequestSlot>,
    pub stats: Arc<WorkerStats>,
    pub cancel: CancellationToken,
}

impl Worker {
    #[tracing::instrument(skip(self), fields(worker = self.id, peer = %self.stats.peer))]
    pub async fn run(self) -> Result<()> {
        let Worker {
            id,
            stream,
            mut packets,
            weather,
            stats,
            cancel,
        } = self;
        let peer = stats.peer;
        info!("Client #{} connected from {}", id, peer);

        stream.set_nodelay(true).ok();
        let (mut reader, mut writer) = stream.into_split();
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut tracker = DropTracker::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Worker #{} stopped", id);
                    break;
                }
                packet = packets.recv() => match packet {
                    Ok(data) => {
                        if !data.is_weather_reply() && tracker.should_drop() {
                            metrics::counter!("nav_server.packets_dropped_total").increment(1);
                            stats.update(&tracker);
                            continue;
                        }

                        tracker.sent(data.packet_id);
                        let frame = data.encode();
                        // A client that stopped reading blocks the write, so
                        // cancellation has to be able to interrupt it
                        let written = tokio::select! {
                            _ = cancel.cancelled() => {
                                debug!("Worker #{} stopped while sending to {}", id, peer);
                                break;
                            }
                            written = async {
                                writer.write_all(&frame).await?;
                                writer.flush().await
                            } => written,
                        };
                        written.with_context(|| format!("Failed to send packet to {}", peer))?;

                        stats.sent.fetch_add(1, Ordering::Relaxed);
                        stats.update(&tracker);
                        metrics::counter!("nav_server.packets_sent_total").increment(1);
                        metrics::counter!("nav_server.bytes_sent_total").increment(frame.len() as u64);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagging behind, skipped {} packets", peer, skipped);
                        tracker.lagged(skipped);
                        stats.update(&tracker);
                        metrics::counter!("nav_server.packets_dropped_total").increment(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Packet source closed, disconnecting {}", peer);
                        break;
                    }
                },
                read = reader.read_buf(&mut read_buf) => {
                    let read = read.with_context(|| format!("Failed to read from {}", peer))?;
                    if read == 0 {
                        info!("Client {} disconnected", peer);
                        break;
                    }

                    while let Some(reply) = SimConnectReply::read(&mut read_buf).map_err(|e| {
                        warn!("Closing connection to {}: {} ({})", peer, e, e.status());
                        metrics::counter!("nav_server.protocol_errors_total").increment(1);
                        e
                    })? {
                        handle_reply(reply, &mut tracker, &weather, peer);
                    }
                    stats.update(&tracker);
                }
            }
        }

        Ok(())
    }
}

fn handle_reply(
    reply: SimConnectReply,
    tracker: &mut DropTracker,
    weather: &WeatherRequestSlot,
    peer: SocketAddr,
) {
    metrics::counter!("nav_server.replies_received_total").increment(1);

    match reply.command {
        ReplyCommand::WeatherRequest => {
            if reply.weather_request.is_valid() {
                debug!("Weather request from {}: {:?}", peer, reply.weather_request);
                weather.set(reply.weather_request);
            } else {
                debug!("Ignoring empty weather request from {}", peer);
            }
        }
        ReplyCommand::None => {
            if !tracker.acknowledge(reply.packet_id) {
                debug!(
                    "Reply from {} for unknown packet {}",
                    peer, reply.packet_id
                );
            }
        }
    }
}
