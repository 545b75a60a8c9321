//! Client side of the protocol: receives telemetry and answers it.

use anyhow::{Context, Result, bail};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::simconnect::{SimConnectData, SimConnectReply, WeatherRequest};

const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct NavClient {
    peer: SocketAddr,
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    buf: BytesMut,
}

impl NavClient {
    /// Connect to a server, `addr` is anything `host:port` like
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        info!("Connected to {}", peer);
        metrics::gauge!("nav_client.connected").set(1.0);

        Ok(Self {
            peer,
            reader,
            writer: BufWriter::new(writer),
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Wait for the next packet.
    ///
    /// Returns `None` when the server closed the connection between packets.
    /// A closed connection in the middle of a packet or a frame of an
    /// incompatible version is an error.
    pub async fn next_packet(&mut self) -> Result<Option<SimConnectData>> {
        loop {
            if let Some(data) = SimConnectData::read(&mut self.buf)
                .with_context(|| format!("Invalid packet from {}", self.peer))?
            {
                debug!("Received packet {}", data.packet_id);
                metrics::counter!("nav_client.packets_received_total").increment(1);
                return Ok(Some(data));
            }

            let read = self
                .reader
                .read_buf(&mut self.buf)
                .await
                .with_context(|| format!("Failed to read from {}", self.peer))?;
            if read == 0 {
                metrics::gauge!("nav_client.connected").set(0.0);
                if self.buf.is_empty() {
                    info!("Server {} closed the connection", self.peer);
                    return Ok(None);
                }
                bail!(
                    "Connection to {} closed inside a packet ({} bytes pending)",
                    self.peer,
                    self.buf.len()
                );
            }
        }
    }

    /// Confirm reception of a telemetry packet
    pub async fn acknowledge(&mut self, packet_id: u32) -> Result<()> {
        self.send(SimConnectReply::ack(packet_id)).await
    }

    pub async fn request_weather(&mut self, request: WeatherRequest) -> Result<()> {
        self.send(SimConnectReply::weather(request)).await
    }

    pub async fn send(&mut self, reply: SimConnectReply) -> Result<()> {
        let frame = reply.encode();
        self.writer
            .write_all(&frame)
            .await
            .with_context(|| format!("Failed to send reply to {}", self.peer))?;
        self.writer.flush().await?;
        metrics::counter!("nav_client.replies_sent_total").increment(1);
        Ok(())
    }
}
