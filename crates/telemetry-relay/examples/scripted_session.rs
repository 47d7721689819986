//! Drives the relay with a short scripted session and prints every payload
//! the transport side would broadcast.
//!
//! ```bash
//! cargo run -p pitwall-telemetry-relay --example scripted_session
//! ```

use anyhow::Result;
use async_trait::async_trait;
use pitwall_telemetry_packets::{
    CarStatusEntry, CarStatusPacket, EventPacket, LapDataEntry, LapDataPacket, ParticipantEntry,
    ParticipantsPacket, SessionPacket, TelemetryPacket,
};
use pitwall_telemetry_relay::{PacketReceiver, PacketSource, RelayConfig, RelayEngine};
use pitwall_telemetry_state::Lineup;
use std::time::Duration;
use tokio::sync::mpsc;

struct ScriptedSource {
    packets: Vec<TelemetryPacket>,
    frame_gap: Duration,
}

#[async_trait]
impl PacketSource for ScriptedSource {
    fn source_id(&self) -> &str {
        "scripted_session"
    }

    async fn start(&self) -> Result<PacketReceiver> {
        let (tx, rx) = mpsc::channel(16);
        let packets = self.packets.clone();
        let frame_gap = self.frame_gap;
        tokio::spawn(async move {
            for packet in packets {
                if tx.send(packet).await.is_err() {
                    break;
                }
                tokio::time::sleep(frame_gap).await;
            }
        });
        Ok(rx)
    }
}

fn script() -> Vec<TelemetryPacket> {
    vec![
        TelemetryPacket::Participants(ParticipantsPacket {
            participants: vec![
                ParticipantEntry {
                    race_number: 44,
                    team_id: 0,
                    telemetry_visibility: 1,
                },
                ParticipantEntry {
                    race_number: 16,
                    team_id: 1,
                    telemetry_visibility: 1,
                },
            ],
        }),
        TelemetryPacket::Session(SessionPacket {
            air_temperature_c: 24,
            track_temperature_c: 35,
            pit_speed_limit_kmh: 80,
            session_time_left_s: 0,
            session_type: 10,
            weather: 1,
            safety_car_status: 0,
            track_id: 11,
            total_laps: 53,
            num_weather_forecast_samples: 0,
            weather_forecast_samples: vec![],
        }),
        // The type change above cleared the grid; the sim re-announces it.
        TelemetryPacket::Participants(ParticipantsPacket {
            participants: vec![
                ParticipantEntry {
                    race_number: 44,
                    team_id: 0,
                    telemetry_visibility: 1,
                },
                ParticipantEntry {
                    race_number: 16,
                    team_id: 1,
                    telemetry_visibility: 1,
                },
            ],
        }),
        TelemetryPacket::Event(EventPacket::StartLights { num_lights: 5 }),
        TelemetryPacket::Event(EventPacket::LightsOut),
        TelemetryPacket::CarStatus(CarStatusPacket {
            cars: vec![
                CarStatusEntry {
                    visual_tyre_compound: 16,
                    tyres_age_laps: 0,
                    vehicle_fia_flag: 0,
                    ers_store_energy_j: 4_000_000.0,
                },
                CarStatusEntry {
                    visual_tyre_compound: 17,
                    tyres_age_laps: 2,
                    vehicle_fia_flag: 0,
                    ers_store_energy_j: 3_200_000.0,
                },
            ],
        }),
        TelemetryPacket::LapData(LapDataPacket {
            cars: vec![
                LapDataEntry {
                    car_position: 1,
                    current_lap_num: 1,
                    sector: 0,
                    sector1_time_ms: 0,
                    sector2_time_ms: 0,
                    current_lap_invalid: 0,
                    total_distance_m: 480.0,
                    driver_status: 1,
                    result_status: 2,
                    last_lap_time_ms: 0,
                    current_lap_time_ms: 9_000,
                    num_pit_stops: 0,
                    penalties_s: 0,
                    grid_position: 1,
                    num_unserved_drive_through_pens: 0,
                    num_unserved_stop_go_pens: 0,
                },
                LapDataEntry {
                    car_position: 2,
                    current_lap_num: 1,
                    sector: 0,
                    sector1_time_ms: 0,
                    sector2_time_ms: 0,
                    current_lap_invalid: 0,
                    total_distance_m: 455.0,
                    driver_status: 1,
                    result_status: 2,
                    last_lap_time_ms: 0,
                    current_lap_time_ms: 9_300,
                    num_pit_stops: 0,
                    penalties_s: 0,
                    grid_position: 2,
                    num_unserved_drive_through_pens: 0,
                    num_unserved_stop_go_pens: 0,
                },
            ],
        }),
        TelemetryPacket::Event(EventPacket::SpeedTrap {
            vehicle_index: 0,
            speed_kmh: 318.4,
        }),
        TelemetryPacket::Event(EventPacket::ChequeredFlag),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("pitwall_telemetry_relay=debug,info")
        .init();

    let lineup = Lineup::from_iter([(44u8, "HAMILTON".to_string()), (16u8, "LECLERC".to_string())]);
    let config = RelayConfig::from_env()
        .with_lineup(lineup)
        .with_snapshot_interval(Duration::from_millis(250));
    let (engine, mut snapshots) = RelayEngine::new(config);

    let printer = tokio::spawn(async move {
        while let Some(payload) = snapshots.recv().await {
            println!("{payload}");
        }
    });

    let source = ScriptedSource {
        packets: script(),
        frame_gap: Duration::from_millis(100),
    };
    engine.run(Box::new(source)).await?;

    // The engine owns the sink; its drop closes the channel and ends the
    // printer task.
    printer.await?;
    Ok(())
}
