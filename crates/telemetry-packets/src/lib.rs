//! Decoded telemetry packet contracts for Pitwall.
//!
//! The upstream binary decoder turns raw UDP frames into the typed packets
//! defined here; everything downstream (routing, state reconciliation,
//! snapshot publication) works on these shapes and never sees wire bytes.
//!
//! ## Packet kinds
//!
//! | Packet          | Scope    | Drives                                      |
//! |-----------------|----------|---------------------------------------------|
//! | Participants    | per-slot | driver identity, team, telemetry visibility |
//! | Car Status      | per-slot | tyre fit, FIA flag, ERS store               |
//! | Car Damage      | per-slot | wing damage, tyre wear                      |
//! | Lap Data        | per-slot | position, laps, sectors, penalties          |
//! | Session         | global   | track, session type, weather, temperatures  |
//! | Motion          | per-slot | three-axis G-force                          |
//! | Event           | coded    | penalties, speed traps, session milestones  |
//! | Session History | per-car  | lap history, best lap/sector lap numbers    |
//!
//! Field values are trusted as decoded; the only protocol-level convention
//! preserved here is the 255 "not applicable" sentinel on optional numeric
//! event fields ([`SENTINEL_NOT_APPLICABLE`]).

use serde::{Deserialize, Serialize};

/// Number of car slots carried by every per-car packet array.
///
/// A slot is a positional address the simulation may rebind to a different
/// car between sessions; the stable identity key is the race number.
pub const MAX_SLOTS: usize = 22;

/// Reserved value meaning "field not applicable" on optional numeric
/// event-packet fields. Distinct from zero; never a real value.
pub const SENTINEL_NOT_APPLICABLE: u8 = 255;

// ── Per-slot packet entries ───────────────────────────────────────────────────

/// One participants-packet entry: the identity-bearing slot record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantEntry {
    /// Simulation-assigned persistent car number; the true identity key.
    pub race_number: u8,
    pub team_id: u8,
    /// 1 = telemetry public, 0 = restricted.
    pub telemetry_visibility: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantsPacket {
    pub participants: Vec<ParticipantEntry>,
}

/// One car-status entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarStatusEntry {
    pub visual_tyre_compound: u8,
    pub tyres_age_laps: u8,
    /// FIA flag currently shown to this car (-1 unknown, 0 none, 1 green,
    /// 2 blue, 3 yellow, 4 red).
    pub vehicle_fia_flag: i8,
    pub ers_store_energy_j: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarStatusPacket {
    pub cars: Vec<CarStatusEntry>,
}

/// One car-damage entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarDamageEntry {
    pub front_left_wing_damage_pct: u8,
    pub front_right_wing_damage_pct: u8,
    /// Wear percentage per tyre, RL/RR/FL/FR order.
    pub tyres_wear_pct: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarDamagePacket {
    pub cars: Vec<CarDamageEntry>,
}

/// One lap-data entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapDataEntry {
    pub car_position: u8,
    pub current_lap_num: u8,
    /// 0-based sector the car is currently in (0..=2).
    pub sector: u8,
    pub sector1_time_ms: u16,
    pub sector2_time_ms: u16,
    /// 1 = current lap will not count.
    pub current_lap_invalid: u8,
    pub total_distance_m: f32,
    pub driver_status: u8,
    pub result_status: u8,
    pub last_lap_time_ms: u32,
    pub current_lap_time_ms: u32,
    pub num_pit_stops: u8,
    /// Accumulated penalty time in seconds.
    pub penalties_s: u8,
    pub grid_position: u8,
    pub num_unserved_drive_through_pens: u8,
    pub num_unserved_stop_go_pens: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapDataPacket {
    pub cars: Vec<LapDataEntry>,
}

/// One motion entry; only the G-force components are consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEntry {
    pub g_force_lateral: f32,
    pub g_force_longitudinal: f32,
    pub g_force_vertical: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPacket {
    pub cars: Vec<MotionEntry>,
}

// ── Session packet ────────────────────────────────────────────────────────────

/// One weather-forecast sample. The session packet carries a fixed-capacity
/// array of these; only the declared prefix is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherForecastSample {
    pub session_type: u8,
    pub time_offset_min: u8,
    pub weather: u8,
    pub track_temperature_c: i8,
    pub air_temperature_c: i8,
    pub rain_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPacket {
    pub air_temperature_c: i8,
    pub track_temperature_c: i8,
    pub pit_speed_limit_kmh: u8,
    pub session_time_left_s: u16,
    pub session_type: u8,
    pub weather: u8,
    pub safety_car_status: u8,
    pub track_id: i8,
    pub total_laps: u8,
    /// Number of valid entries in `weather_forecast_samples`. The array may
    /// be longer than this; trust the count, not the capacity.
    pub num_weather_forecast_samples: u8,
    pub weather_forecast_samples: Vec<WeatherForecastSample>,
}

// ── Session history packet ────────────────────────────────────────────────────

/// One completed-lap record from the session-history stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LapHistoryEntry {
    pub lap_time_ms: u32,
    pub sector1_time_ms: u16,
    pub sector2_time_ms: u16,
    pub sector3_time_ms: u16,
    pub lap_valid_flags: u8,
}

/// Per-car lap history replay. Best lap/sector fields are 1-based lap
/// numbers indexing `lap_history`; 0 means "none yet".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistoryPacket {
    pub car_index: u8,
    /// Laps in progress or complete; `lap_history` holds `num_laps` entries
    /// of which the last is the in-progress lap.
    pub num_laps: u8,
    pub best_lap_time_lap_num: u8,
    pub best_sector1_lap_num: u8,
    pub best_sector2_lap_num: u8,
    pub best_sector3_lap_num: u8,
    pub lap_history: Vec<LapHistoryEntry>,
}

// ── Event packet ──────────────────────────────────────────────────────────────

/// Penalty event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyEvent {
    pub vehicle_index: u8,
    pub penalty_type: u8,
    pub infringement_type: u8,
    pub other_vehicle_index: u8,
    /// Penalty time in seconds; 255 = not applicable.
    pub time_s: u8,
    pub lap_num: u8,
    /// Places gained illegally; 255 = not applicable.
    pub places_gained: u8,
}

/// Decoded event packet, one variant per event string code.
///
/// Codes with no reconciliation or broadcast effect (retirement, race
/// winner, served penalties, button status) are still decoded so the router
/// can no-op them explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPacket {
    SessionStarted,
    SessionEnded,
    FastestLap { vehicle_index: u8, lap_time_s: f32 },
    Retirement { vehicle_index: u8 },
    DrsEnabled,
    DrsDisabled,
    ChequeredFlag,
    RaceWinner { vehicle_index: u8 },
    Penalty(PenaltyEvent),
    SpeedTrap { vehicle_index: u8, speed_kmh: f32 },
    StartLights { num_lights: u8 },
    LightsOut,
    DriveThroughServed { vehicle_index: u8 },
    StopGoServed { vehicle_index: u8 },
    FlashbackUsed,
    ButtonStatus { button_flags: u32 },
}

// ── Union ─────────────────────────────────────────────────────────────────────

/// Any decoded telemetry packet, as handed over by the decoder collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryPacket {
    Participants(ParticipantsPacket),
    CarStatus(CarStatusPacket),
    CarDamage(CarDamagePacket),
    LapData(LapDataPacket),
    Session(SessionPacket),
    Motion(MotionPacket),
    Event(EventPacket),
    SessionHistory(SessionHistoryPacket),
}

impl TelemetryPacket {
    /// Short packet-kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryPacket::Participants(_) => "participants",
            TelemetryPacket::CarStatus(_) => "car_status",
            TelemetryPacket::CarDamage(_) => "car_damage",
            TelemetryPacket::LapData(_) => "lap_data",
            TelemetryPacket::Session(_) => "session",
            TelemetryPacket::Motion(_) => "motion",
            TelemetryPacket::Event(_) => "event",
            TelemetryPacket::SessionHistory(_) => "session_history",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn session_packet_serde_round_trip() -> TestResult {
        let packet = SessionPacket {
            air_temperature_c: 26,
            track_temperature_c: 38,
            pit_speed_limit_kmh: 80,
            session_time_left_s: 3600,
            session_type: 10,
            weather: 2,
            safety_car_status: 0,
            track_id: 11,
            total_laps: 53,
            num_weather_forecast_samples: 1,
            weather_forecast_samples: vec![WeatherForecastSample {
                session_type: 10,
                time_offset_min: 30,
                weather: 3,
                track_temperature_c: 34,
                air_temperature_c: 24,
                rain_percentage: 40,
            }],
        };
        let json = serde_json::to_string(&packet)?;
        let decoded: SessionPacket = serde_json::from_str(&json)?;
        assert_eq!(decoded, packet);
        Ok(())
    }

    #[test]
    fn event_packet_round_trip_preserves_variant() -> TestResult {
        let packet = TelemetryPacket::Event(EventPacket::SpeedTrap {
            vehicle_index: 3,
            speed_kmh: 312.5,
        });
        let json = serde_json::to_string(&packet)?;
        let decoded: TelemetryPacket = serde_json::from_str(&json)?;
        assert_eq!(decoded, packet);
        Ok(())
    }

    #[test]
    fn packet_kind_labels_are_stable() {
        let packet = TelemetryPacket::Participants(ParticipantsPacket {
            participants: vec![],
        });
        assert_eq!(packet.kind(), "participants");
        let packet = TelemetryPacket::Event(EventPacket::LightsOut);
        assert_eq!(packet.kind(), "event");
    }

    #[test]
    fn sentinel_constant_matches_protocol() {
        assert_eq!(SENTINEL_NOT_APPLICABLE, 255);
        assert_eq!(MAX_SLOTS, 22);
    }
}
