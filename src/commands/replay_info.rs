use anyhow::Result;
use chrono::DateTime;
use std::path::Path;

use atools::replay::ReplayReader;

pub fn handle_replay_info(path: &Path) -> Result<()> {
    let mut reader = ReplayReader::open(path)?;
    let summary = reader.summary()?;

    println!("File:               {}", path.display());
    println!("Update rate:        {} ms", summary.update_rate_ms);
    println!("Packets:            {}", summary.packets);
    println!("With user aircraft: {}", summary.packets_with_user_aircraft);
    println!("Max AI aircraft:    {}", summary.max_ai_aircraft);
    println!("Max boats:          {}", summary.max_boats);

    if let Some(first) = summary.first_packet_ts.and_then(format_ts) {
        println!("First packet:       {}", first);
    }
    if let Some(last) = summary.last_packet_ts.and_then(format_ts) {
        println!("Last packet:        {}", last);
    }
    if let Some(duration) = summary.duration() {
        println!("Duration:           {} s", duration.num_seconds());
    }
    if summary.trailing_bytes > 0 {
        println!(
            "Trailing bytes:     {} (incomplete last packet)",
            summary.trailing_bytes
        );
    }
    Ok(())
}

fn format_ts(ts: u32) -> Option<String> {
    DateTime::from_timestamp(ts as i64, 0).map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
