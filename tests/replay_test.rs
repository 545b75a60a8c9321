// Recording and playback of replay files through the data reader

mod common;

use std::path::Path;
use std::time::Duration;

use atools::connect_handler::FetchOptions;
use atools::data_reader::{DataReader, DataReaderConfig, ReaderEvent};
use atools::replay::{REPLAY_FILE_VERSION, REPLAY_MAGIC_NUMBER, ReplayReader, ReplayWriter};
use atools::simconnect::{
    Category, SimConnectAircraft, SimConnectData, SimConnectUserAircraft,
};
use tokio::sync::broadcast;

use common::{next_event, synthetic_reader, within};

fn packet(packet_id: u32, ai_ids: &[u32]) -> SimConnectData {
    let mut data = SimConnectData::new();
    data.packet_id = packet_id;
    data.packet_ts = 1_700_000_000 + packet_id;

    let mut user = SimConnectUserAircraft::default();
    user.object_id = 1;
    user.registration = "N172SP".to_string();
    user.set_position(-73.78, 40.64, 3000.0);
    data.user_aircraft = Some(user);

    for &object_id in ai_ids {
        data.add_ai_aircraft(SimConnectAircraft {
            object_id,
            category: if object_id >= 900 {
                Category::Boat
            } else {
                Category::Airplane
            },
            ..Default::default()
        });
    }
    data
}

fn record(path: &Path, packets: &[SimConnectData]) {
    let mut writer = ReplayWriter::create(path, 10).unwrap();
    for data in packets {
        assert!(writer.append(data).unwrap());
    }
    writer.flush().unwrap();
}

fn replay_config(path: &Path) -> DataReaderConfig {
    DataReaderConfig {
        load_replay: Some(path.to_path_buf()),
        replay_speed: 2,
        ..Default::default()
    }
}

async fn recv(packets: &mut broadcast::Receiver<SimConnectData>) -> SimConnectData {
    within(packets.recv()).await.unwrap()
}

#[tokio::test]
async fn test_playback_retags_and_loops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flight.replay");
    record(
        &path,
        &[packet(500, &[10]), packet(501, &[11]), packet(502, &[12])],
    );

    let mut reader = DataReader::new(replay_config(&path), None);
    let events = reader.events();
    let mut packets = reader.subscribe();
    reader.start();

    assert_eq!(
        next_event(&events).await,
        ReaderEvent::Connected {
            name: "Replay".to_string()
        }
    );

    let mut ai_ids = Vec::new();
    for expected_id in 1..=4 {
        let data = recv(&mut packets).await;
        assert_eq!(data.packet_id, expected_id);
        assert_eq!(
            data.user_aircraft.as_ref().unwrap().registration,
            "N172SP"
        );
        ai_ids.push(data.ai_aircraft()[0].object_id);
    }
    // Starts over at the first recorded packet
    assert_eq!(ai_ids, vec![10, 11, 12, 10]);

    reader.terminate().await;
    assert_eq!(next_event(&events).await, ReaderEvent::Disconnected);
}

#[tokio::test]
async fn test_playback_honors_fetch_options() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor.replay");
    record(&path, &[packet(1, &[10, 11, 900])]);

    let config = DataReaderConfig {
        options: FetchOptions::FETCH_AI_AIRCRAFT,
        ..replay_config(&path)
    };
    let mut reader = DataReader::new(config, None);
    let mut packets = reader.subscribe();
    reader.start();

    let data = recv(&mut packets).await;
    let ids: Vec<u32> = data.ai_aircraft().iter().map(|a| a.object_id).collect();
    assert_eq!(ids, vec![10, 11]);

    reader.terminate().await;
}

#[tokio::test]
async fn test_bad_magic_number_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not.replay");
    std::fs::write(&path, [0u8; 64]).unwrap();

    let mut reader = DataReader::new(replay_config(&path), None);
    let events = reader.events();
    let mut packets = reader.subscribe();
    reader.start();

    match next_event(&events).await {
        ReaderEvent::Error { message } => assert!(message.contains("not a replay file")),
        other => panic!("Unexpected event {:?}", other),
    }
    assert_eq!(next_event(&events).await, ReaderEvent::Disconnected);
    assert!(packets.try_recv().is_err());

    reader.terminate().await;
}

#[tokio::test]
async fn test_bad_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.replay");
    let mut header = Vec::new();
    header.extend_from_slice(&REPLAY_MAGIC_NUMBER.to_be_bytes());
    header.extend_from_slice(&(REPLAY_FILE_VERSION + 1).to_be_bytes());
    header.extend_from_slice(&500u32.to_be_bytes());
    std::fs::write(&path, header).unwrap();

    let mut reader = DataReader::new(replay_config(&path), None);
    let events = reader.events();
    let mut packets = reader.subscribe();
    reader.start();

    match next_event(&events).await {
        ReaderEvent::Error { message } => {
            assert!(message.contains(&format!("version {}", REPLAY_FILE_VERSION + 1)))
        }
        other => panic!("Unexpected event {:?}", other),
    }
    assert!(packets.try_recv().is_err());

    reader.terminate().await;
}

#[tokio::test]
async fn test_recording_then_playback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synthetic.replay");

    let config = DataReaderConfig {
        update_rate: Duration::from_millis(10),
        save_replay: Some(path.clone()),
        ..Default::default()
    };
    let (mut reader, _control) = synthetic_reader(config);
    let mut packets = reader.subscribe();
    reader.start();

    let mut live = Vec::new();
    for _ in 0..3 {
        live.push(recv(&mut packets).await);
    }
    reader.terminate().await;

    let mut replay = ReplayReader::open(&path).unwrap();
    assert_eq!(replay.update_rate_ms(), 10);

    let summary = replay.summary().unwrap();
    assert!(summary.packets >= 3);
    assert_eq!(summary.packets_with_user_aircraft, summary.packets);
    assert_eq!(summary.trailing_bytes, 0);
    assert_eq!(summary.max_boats, 1);

    // Recorded exactly what was published
    for sent in &live {
        let recorded = replay.next_packet().unwrap().unwrap();
        assert_eq!(&recorded, sent);
    }

    // Feed the recording back through a fresh reader
    let mut player = DataReader::new(replay_config(&path), None);
    let mut played = player.subscribe();
    player.start();
    let first = recv(&mut played).await;
    assert_eq!(first.packet_id, 1);
    assert_eq!(first.user_aircraft, live[0].user_aircraft);
    player.terminate().await;
}
