// End-to-end tests: data reader, server and client over real sockets

mod common;

use std::time::Duration;

use atools::client::NavClient;
use atools::data_reader::DataReaderConfig;
use atools::simconnect::{
    MetarResult, REPLY_MAGIC_NUMBER, SimConnectData, SimConnectReply, WEATHER_PACKET_ID,
    WeatherRequest,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};

use common::{
    server_addr, slow_synthetic_reader, start_server, synthetic_reader, wait_until, within,
};

#[tokio::test]
async fn test_client_receives_acknowledges_and_requests_weather() {
    let (mut reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;

    let mut client = NavClient::connect(&server_addr(&server)).await.unwrap();
    wait_until("client registered", || server.connection_count() == 1).await;

    reader.start();

    let data = within(client.next_packet()).await.unwrap().unwrap();
    assert_eq!(data.packet_id, 1);
    assert!(data.user_aircraft.is_some());
    assert!(!data.ai_aircraft().is_empty());

    wait_until("packet accounted", || {
        server.worker_stats()[0].awaiting_replies == 1
    })
    .await;
    assert_eq!(server.worker_stats()[0].packets_sent, 1);

    client.acknowledge(data.packet_id).await.unwrap();
    wait_until("acknowledgement", || {
        server.worker_stats()[0].awaiting_replies == 0
    })
    .await;

    client
        .request_weather(WeatherRequest::for_station("KJFK"))
        .await
        .unwrap();
    let weather = within(client.next_packet()).await.unwrap().unwrap();
    assert_eq!(weather.packet_id, WEATHER_PACKET_ID);
    assert_eq!(weather.metars.len(), 1);
    assert_eq!(weather.metars[0].request_ident, "KJFK");
    assert!(weather.metars[0].station_metar.starts_with("KJFK "));
    assert_eq!(reader.weather_slot().current().station, "KJFK");
    assert!(!reader.weather_slot().is_pending());

    // Weather replies are never waited for
    assert_eq!(server.worker_stats()[0].awaiting_replies, 0);

    reader.terminate().await;
    server.stop().await;
    assert!(!server.has_connections());

    // Server side closed cleanly between packets
    assert!(within(client.next_packet()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_every_client_gets_the_packet() {
    let (mut reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;
    let addr = server_addr(&server);

    let mut first = NavClient::connect(&addr).await.unwrap();
    let mut second = NavClient::connect(&addr).await.unwrap();
    wait_until("both clients registered", || server.connection_count() == 2).await;

    reader.start();

    let a = within(first.next_packet()).await.unwrap().unwrap();
    let b = within(second.next_packet()).await.unwrap().unwrap();
    assert_eq!(a.packet_id, 1);
    assert_eq!(b.packet_id, 1);
    assert_eq!(a.packet_ts, b.packet_ts);

    let stats = server.worker_stats();
    assert_eq!(stats.len(), 2);
    assert!(stats[0].id < stats[1].id);

    reader.terminate().await;
    server.stop().await;
}

#[tokio::test]
async fn test_disconnected_client_is_removed() {
    let (reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;

    let client = NavClient::connect(&server_addr(&server)).await.unwrap();
    wait_until("client registered", || server.has_connections()).await;

    drop(client);
    wait_until("worker removed", || !server.has_connections()).await;

    server.stop().await;
}

#[tokio::test]
async fn test_garbage_reply_closes_connection() {
    let (reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;

    let mut stream = TcpStream::connect(server_addr(&server)).await.unwrap();
    wait_until("client registered", || server.has_connections()).await;

    stream.write_all(&[0xab; 16]).await.unwrap();

    let mut buf = [0u8; 64];
    let read = within(stream.read(&mut buf)).await.unwrap_or(0);
    assert_eq!(read, 0);
    wait_until("worker removed", || !server.has_connections()).await;

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_reply_header_closes_connection() {
    let (reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;

    let mut stream = TcpStream::connect(server_addr(&server)).await.unwrap();
    wait_until("client registered", || server.has_connections()).await;

    let mut header = Vec::new();
    header.extend_from_slice(&REPLY_MAGIC_NUMBER.to_be_bytes());
    header.extend_from_slice(&0xFFFF_FFF0u32.to_be_bytes());
    stream.write_all(&header).await.unwrap();
    // Only the header is needed to reject the frame
    stream.write_all(&[0u8; 1024]).await.ok();

    let mut buf = [0u8; 64];
    let read = within(stream.read(&mut buf)).await.unwrap_or(0);
    assert_eq!(read, 0);
    wait_until("worker removed", || !server.has_connections()).await;

    server.stop().await;
}

#[tokio::test]
async fn test_silent_client_gets_packets_dropped() {
    let config = DataReaderConfig {
        update_rate: Duration::from_millis(5),
        ..Default::default()
    };
    let (mut reader, _control) = synthetic_reader(config);
    let mut server = start_server(&reader).await;

    // Connected but never reads or acknowledges
    let _client = NavClient::connect(&server_addr(&server)).await.unwrap();
    wait_until("client registered", || server.has_connections()).await;

    reader.start();
    wait_until("packets dropped", || {
        server.worker_stats()[0].packets_dropped > 0
    })
    .await;

    let stats = server.worker_stats().remove(0);
    assert_eq!(stats.packets_sent, 2);
    assert_eq!(stats.awaiting_replies, 2);

    reader.terminate().await;
    server.stop().await;
}

#[tokio::test]
async fn test_stop_disconnects_clients() {
    let (reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;
    let addr = server_addr(&server);

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(NavClient::connect(&addr).await.unwrap());
    }
    wait_until("clients registered", || server.connection_count() == 3).await;

    server.stop().await;
    assert_eq!(server.connection_count(), 0);

    for client in &mut clients {
        assert!(within(client.next_packet()).await.unwrap().is_none());
    }

    // No longer accepting
    assert!(TcpStream::connect(&addr).await.is_err());
}

#[tokio::test]
async fn test_stop_with_client_that_stopped_reading() {
    let (reader, _control) = slow_synthetic_reader();
    let mut server = start_server(&reader).await;

    // Tiny receive window and never reads, so the server side write stalls
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_recv_buffer_size(4096).unwrap();
    let mut stream = socket
        .connect(server_addr(&server).parse().unwrap())
        .await
        .unwrap();
    wait_until("client registered", || server.has_connections()).await;

    // Weather packets bypass the drop check, large ones fill the socket quickly
    let big_metar = MetarResult {
        request_ident: "KJFK".to_string(),
        station_metar: "M".repeat(60_000),
        nearest_metar: "N".repeat(60_000),
        interpolated_metar: "I".repeat(60_000),
        ..Default::default()
    };
    let packets = reader.packet_sender();
    for _ in 0..200 {
        packets
            .send(SimConnectData::weather_reply(vec![big_metar.clone()]))
            .ok();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // Replies keep arriving from the client side as well
    stream
        .write_all(&SimConnectReply::weather(WeatherRequest::for_station("KJFK")).encode())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.worker_stats()[0].packets_sent < 200);

    within(server.stop()).await;
    assert!(!server.has_connections());
}
