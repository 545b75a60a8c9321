//! TCP server distributing telemetry packets to any number of clients.
//!
//! Every accepted connection gets its own worker task subscribed to the
//! packet channel of the data reader. Workers send packets, read replies and
//! forward weather requests to the reader.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::data_reader::WeatherRequestSlot;
use crate::simconnect::SimConnectData;

mod worker;

pub use worker::{DROP_WARNING_THRESHOLD, DropTracker, MAX_AWAITING_REPLIES};
use worker::{Worker, WorkerStats};

/// Snapshot of one connected client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub id: u64,
    pub peer: SocketAddr,
    /// Sent packets without a reply
    pub awaiting_replies: usize,
    pub packets_dropped: u64,
    pub packets_sent: u64,
}

struct WorkerHandle {
    stats: Arc<WorkerStats>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<u64, WorkerHandle>>>;

pub struct NavServer {
    local_addr: SocketAddr,
    workers: Registry,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl NavServer {
    /// Bind all IPv4 interfaces on `port` and start accepting clients.
    ///
    /// Port 0 picks a free port, see [`NavServer::local_addr`].
    pub async fn start(
        port: u16,
        packets: broadcast::Sender<SimConnectData>,
        weather: Arc<WeatherRequestSlot>,
    ) -> Result<Self> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind server to port {}", port))?;
        let local_addr = listener.local_addr()?;

        for host in host_addresses(local_addr.port()).await {
            info!("Server listening on {}", host);
        }
        metrics::gauge!("nav_server.started").set(1.0);

        let workers: Registry = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            packets,
            weather,
            workers.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            workers,
            cancel,
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn has_connections(&self) -> bool {
        !self.workers.lock().unwrap().is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    pub fn worker_stats(&self) -> Vec<WorkerInfo> {
        let workers = self.workers.lock().unwrap();
        let mut stats: Vec<WorkerInfo> = workers
            .iter()
            .map(|(&id, handle)| WorkerInfo {
                id,
                peer: handle.stats.peer,
                awaiting_replies: handle.stats.awaiting.load(Ordering::Relaxed),
                packets_dropped: handle.stats.dropped.load(Ordering::Relaxed),
                packets_sent: handle.stats.sent.load(Ordering::Relaxed),
            })
            .collect();
        stats.sort_by_key(|info| info.id);
        stats
    }

    /// Stop accepting, then stop the workers one after another
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take()
            && let Err(e) = task.await
        {
            error!("Accept loop failed: {}", e);
        }

        let snapshot: Vec<(u64, WorkerHandle)> =
            self.workers.lock().unwrap().drain().collect();
        for (id, handle) in snapshot {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                error!("Worker #{} failed: {}", id, e);
            }
        }

        metrics::gauge!("nav_server.connections.active").set(0.0);
        info!("Server stopped");
    }
}

#[tracing::instrument(skip_all, name = "nav_server")]
async fn accept_loop(
    listener: TcpListener,
    packets: broadcast::Sender<SimConnectData>,
    weather: Arc<WeatherRequestSlot>,
    workers: Registry,
    cancel: CancellationToken,
) {
    let mut connection_id = 0u64;

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                connection_id += 1;
                let id = connection_id;
                metrics::counter!("nav_server.connections.accepted_total").increment(1);

                let stats = Arc::new(WorkerStats::new(peer));
                let worker_cancel = CancellationToken::new();
                let worker = Worker {
                    id,
                    stream,
                    packets: packets.subscribe(),
                    weather: weather.clone(),
                    stats: stats.clone(),
                    cancel: worker_cancel.clone(),
                };

                // Hold the lock while spawning so a short lived worker cannot
                // remove itself before it was registered
                let mut registry = workers.lock().unwrap();
                let workers_for_task = workers.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = worker.run().await {
                        warn!(worker = id, "Connection closed: {:#}", e);
                    }
                    let remaining = {
                        let mut registry = workers_for_task.lock().unwrap();
                        registry.remove(&id);
                        registry.len()
                    };
                    metrics::gauge!("nav_server.connections.active").set(remaining as f64);
                    metrics::counter!("nav_server.connections.closed_total").increment(1);
                    info!("Connection #{} from {} closed", id, peer);
                });
                registry.insert(
                    id,
                    WorkerHandle {
                        stats,
                        cancel: worker_cancel,
                        task,
                    },
                );
                metrics::gauge!("nav_server.connections.active").set(registry.len() as f64);
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                metrics::counter!("nav_server.errors.accept_total").increment(1);
            }
        }
    }
}

/// Non-loopback IPv4 addresses of this host, or localhost if there are none
async fn host_addresses(port: u16) -> Vec<String> {
    let mut addresses: Vec<Ipv4Addr> = Vec::new();

    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().into_owned();
            match tokio::net::lookup_host((name.as_str(), port)).await {
                Ok(resolved) => {
                    addresses.extend(resolved.filter_map(|addr| match addr.ip() {
                        IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
                        _ => None,
                    }));
                }
                Err(e) => warn!("Cannot resolve host name {}: {}", name, e),
            }
        }
        Err(e) => warn!("Cannot get host name: {}", e),
    }

    addresses.sort();
    addresses.dedup();

    if addresses.is_empty() {
        return vec![format!("localhost:{}", port)];
    }
    addresses
        .into_iter()
        .map(|ip| format!("{}:{}", ip, port))
        .collect()
}
