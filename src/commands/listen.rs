use anyhow::Result;
use tracing::{info, warn};

use atools::client::NavClient;
use atools::simconnect::{SimConnectData, WEATHER_PACKET_ID, WeatherRequest};

/// Print every packet the server sends and acknowledge it
pub async fn handle_listen(
    addr: String,
    weather_station: Option<String>,
    max_packets: Option<u64>,
) -> Result<()> {
    let mut client = NavClient::connect(&addr).await?;

    if let Some(station) = weather_station {
        info!("Requesting weather for {}", station);
        client
            .request_weather(WeatherRequest::for_station(station))
            .await?;
    }

    let mut received = 0u64;
    while let Some(data) = client.next_packet().await? {
        print_packet(&data);
        received += 1;

        if data.packet_id != WEATHER_PACKET_ID {
            client.acknowledge(data.packet_id).await?;
        }

        if max_packets.is_some_and(|max| received >= max) {
            break;
        }
    }

    info!("Received {} packets from {}", received, client.peer_addr());
    Ok(())
}

fn print_packet(data: &SimConnectData) {
    if data.is_weather_reply() {
        for metar in &data.metars {
            if metar.is_empty() {
                warn!("No weather for {}", metar.request_ident);
                continue;
            }
            println!("weather {}", metar.request_ident);
            for line in [
                &metar.station_metar,
                &metar.nearest_metar,
                &metar.interpolated_metar,
            ] {
                if !line.is_empty() {
                    println!("  {}", line);
                }
            }
        }
        return;
    }

    let ai = data.ai_aircraft();
    let boats = ai.iter().filter(|aircraft| aircraft.is_any_boat()).count();
    print!(
        "packet {} ts {}: {} AI aircraft, {} boats",
        data.packet_id,
        data.packet_ts,
        ai.len() - boats,
        boats
    );

    match &data.user_aircraft {
        Some(user) => {
            let pos = user.position();
            println!(
                ", user {} at {:.4},{:.4} {:.0} ft GS {:.0} kt{}",
                if user.registration.is_empty() {
                    &user.title
                } else {
                    &user.registration
                },
                pos.laty,
                pos.lonx,
                pos.altitude_ft,
                user.ground_speed_kts,
                if user.is_flying() { "" } else { " (on ground)" }
            );
        }
        None => println!(", no user aircraft"),
    }
}
