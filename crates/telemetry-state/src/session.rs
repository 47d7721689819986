//! Per-segment session state.
//!
//! One `SessionState` exists per race-weekend segment (practice, qualifying,
//! race, ...). Simple fields follow the same compare-and-emit discipline as
//! the driver entity; session-best sectors are strict minima across all
//! drivers, seeded "unset" so the first observation always lands.

use crate::events::EventBus;
use pitwall_telemetry_packets::WeatherForecastSample;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Non-owning reference to the driver a session record points at.
///
/// Carries identity data only (race number plus display name); it never
/// extends the referenced entity's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRef {
    pub race_number: u8,
    pub display_name: Option<String>,
}

/// The session's fastest lap and who set it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FastestLap {
    pub time_s: f32,
    pub driver: DriverRef,
}

/// Change events emitted by the session entity.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FastestLap(FastestLap),
    SessionTypeChanged { session_type: u8 },
    CurrentWeather { weather: u8 },
    AirTemperature { celsius: i8 },
    TrackTemperature { celsius: i8 },
    SessionTimeLeft { seconds: u16 },
    PitSpeedLimit { kmh: u8 },
    SafetyCarStatus { status: u8 },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionState {
    track: Option<i8>,
    session_type: u8,
    total_laps: u8,
    session_time_left_s: u16,
    pit_speed_limit_kmh: u8,
    air_temperature_c: i8,
    track_temperature_c: i8,
    current_weather: u8,
    weather_forecasts: Vec<WeatherForecastSample>,
    safety_car_status: u8,
    best_sector1_ms: Option<u16>,
    best_sector2_ms: Option<u16>,
    best_sector3_ms: Option<u16>,
    fastest_lap: Option<FastestLap>,

    #[serde(skip)]
    bus: EventBus<SessionEvent>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            track: None,
            session_type: 0,
            total_laps: 0,
            session_time_left_s: 0,
            pit_speed_limit_kmh: 0,
            air_temperature_c: 0,
            track_temperature_c: 0,
            current_weather: 0,
            weather_forecasts: Vec::new(),
            safety_car_status: 0,
            best_sector1_ms: None,
            best_sector2_ms: None,
            best_sector3_ms: None,
            fastest_lap: None,
            bus: EventBus::new(),
        }
    }

    /// Fresh session pre-seeded with a known type, used when the context is
    /// rebuilt after a type change so the transition does not re-fire.
    pub fn with_session_type(session_type: u8) -> Self {
        Self {
            session_type,
            ..Self::new()
        }
    }

    /// Register a change-event subscriber for this session.
    pub fn subscribe(&mut self) -> mpsc::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    // ── Compare-and-emit setters ──────────────────────────────────────────

    pub fn update_current_weather(&mut self, weather: u8) {
        if self.current_weather != weather {
            self.current_weather = weather;
            self.bus.emit(&SessionEvent::CurrentWeather { weather });
        }
    }

    pub fn update_air_temperature(&mut self, celsius: i8) {
        if self.air_temperature_c != celsius {
            self.air_temperature_c = celsius;
            self.bus.emit(&SessionEvent::AirTemperature { celsius });
        }
    }

    pub fn update_track_temperature(&mut self, celsius: i8) {
        if self.track_temperature_c != celsius {
            self.track_temperature_c = celsius;
            self.bus.emit(&SessionEvent::TrackTemperature { celsius });
        }
    }

    pub fn update_session_time_left(&mut self, seconds: u16) {
        if self.session_time_left_s != seconds {
            self.session_time_left_s = seconds;
            self.bus.emit(&SessionEvent::SessionTimeLeft { seconds });
        }
    }

    pub fn update_pit_speed_limit(&mut self, kmh: u8) {
        if self.pit_speed_limit_kmh != kmh {
            self.pit_speed_limit_kmh = kmh;
            self.bus.emit(&SessionEvent::PitSpeedLimit { kmh });
        }
    }

    pub fn update_safety_car_status(&mut self, status: u8) {
        if self.safety_car_status != status {
            self.safety_car_status = status;
            self.bus.emit(&SessionEvent::SafetyCarStatus { status });
        }
    }

    /// Store a changed session type and emit the transition event.
    ///
    /// Returns whether the type changed so the owning context can clear its
    /// driver collection — per-car history and infringements must not
    /// survive a segment boundary. An equal value is a silent no-op.
    #[must_use]
    pub fn update_session_type(&mut self, session_type: u8) -> bool {
        if self.session_type == session_type {
            return false;
        }
        self.session_type = session_type;
        self.bus
            .emit(&SessionEvent::SessionTypeChanged { session_type });
        true
    }

    // ── Session-best aggregates ───────────────────────────────────────────

    /// Strict-min reducers: the first observation always lands, later ones
    /// only when faster.

    pub fn update_best_sector1(&mut self, time_ms: u16) {
        if self.best_sector1_ms.is_none_or(|best| best > time_ms) {
            self.best_sector1_ms = Some(time_ms);
        }
    }

    pub fn update_best_sector2(&mut self, time_ms: u16) {
        if self.best_sector2_ms.is_none_or(|best| best > time_ms) {
            self.best_sector2_ms = Some(time_ms);
        }
    }

    pub fn update_best_sector3(&mut self, time_ms: u16) {
        if self.best_sector3_ms.is_none_or(|best| best > time_ms) {
            self.best_sector3_ms = Some(time_ms);
        }
    }

    /// Unconditional overwrite; always emits. A tying lap is still a new
    /// fastest-lap occurrence.
    pub fn update_fastest_lap(&mut self, time_s: f32, driver: DriverRef) {
        let fastest = FastestLap { time_s, driver };
        self.fastest_lap = Some(fastest.clone());
        self.bus.emit(&SessionEvent::FastestLap(fastest));
    }

    // ── Plain setters ─────────────────────────────────────────────────────

    pub fn set_track(&mut self, track_id: i8) {
        self.track = Some(track_id);
    }

    pub fn set_total_laps(&mut self, laps: u8) {
        self.total_laps = laps;
    }

    /// The caller passes the already-truncated declared prefix.
    pub fn set_weather_forecasts(&mut self, forecasts: Vec<WeatherForecastSample>) {
        self.weather_forecasts = forecasts;
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn track(&self) -> Option<i8> {
        self.track
    }

    pub fn session_type(&self) -> u8 {
        self.session_type
    }

    pub fn total_laps(&self) -> u8 {
        self.total_laps
    }

    pub fn session_time_left_s(&self) -> u16 {
        self.session_time_left_s
    }

    pub fn pit_speed_limit_kmh(&self) -> u8 {
        self.pit_speed_limit_kmh
    }

    pub fn air_temperature_c(&self) -> i8 {
        self.air_temperature_c
    }

    pub fn track_temperature_c(&self) -> i8 {
        self.track_temperature_c
    }

    pub fn current_weather(&self) -> u8 {
        self.current_weather
    }

    pub fn weather_forecasts(&self) -> &[WeatherForecastSample] {
        &self.weather_forecasts
    }

    pub fn safety_car_status(&self) -> u8 {
        self.safety_car_status
    }

    pub fn best_sector1_ms(&self) -> Option<u16> {
        self.best_sector1_ms
    }

    pub fn best_sector2_ms(&self) -> Option<u16> {
        self.best_sector2_ms
    }

    pub fn best_sector3_ms(&self) -> Option<u16> {
        self.best_sector3_ms
    }

    pub fn fastest_lap(&self) -> Option<&FastestLap> {
        self.fastest_lap.as_ref()
    }

    /// Field-by-field structural copy with a fresh, unsubscribed bus.
    pub fn rehydrate(&self) -> Self {
        let mut fresh = Self::new();
        fresh.track = self.track;
        fresh.session_type = self.session_type;
        fresh.total_laps = self.total_laps;
        fresh.session_time_left_s = self.session_time_left_s;
        fresh.pit_speed_limit_kmh = self.pit_speed_limit_kmh;
        fresh.air_temperature_c = self.air_temperature_c;
        fresh.track_temperature_c = self.track_temperature_c;
        fresh.current_weather = self.current_weather;
        fresh.weather_forecasts = self.weather_forecasts.clone();
        fresh.safety_car_status = self.safety_car_status;
        fresh.best_sector1_ms = self.best_sector1_ms;
        fresh.best_sector2_ms = self.best_sector2_ms;
        fresh.best_sector3_ms = self.best_sector3_ms;
        fresh.fastest_lap = self.fastest_lap.clone();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn simple_fields_emit_only_on_change() {
        let mut s = SessionState::new();
        let mut rx = s.subscribe();

        s.update_air_temperature(26);
        s.update_air_temperature(26);
        s.update_pit_speed_limit(80);
        s.update_pit_speed_limit(80);

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn first_best_sector_always_lands() {
        let mut s = SessionState::new();
        s.update_best_sector1(45_000);
        assert_eq!(s.best_sector1_ms(), Some(45_000));
    }

    #[test]
    fn slower_best_sector_is_ignored() {
        let mut s = SessionState::new();
        s.update_best_sector2(30_000);
        s.update_best_sector2(31_000);
        s.update_best_sector2(29_500);
        assert_eq!(s.best_sector2_ms(), Some(29_500));
    }

    proptest! {
        #[test]
        fn best_sector_is_non_increasing(times in proptest::collection::vec(1u16..60_000, 1..50)) {
            let mut s = SessionState::new();
            let mut previous: Option<u16> = None;
            for t in times {
                s.update_best_sector3(t);
                let current = s.best_sector3_ms();
                if let (Some(prev), Some(cur)) = (previous, current) {
                    prop_assert!(cur <= prev);
                }
                previous = current;
            }
        }
    }

    #[test]
    fn fastest_lap_always_emits_even_on_a_tie() {
        let mut s = SessionState::new();
        let mut rx = s.subscribe();
        let driver = DriverRef {
            race_number: 44,
            display_name: Some("HAMILTON".to_string()),
        };

        s.update_fastest_lap(91.42, driver.clone());
        s.update_fastest_lap(91.42, driver);

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn session_type_change_emits_exactly_once() {
        let mut s = SessionState::new();
        let mut rx = s.subscribe();

        assert!(s.update_session_type(10));
        assert!(!s.update_session_type(10));

        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::SessionTypeChanged { session_type: 10 }]
        );
    }

    #[test]
    fn preseeded_session_type_does_not_refire() {
        let mut s = SessionState::with_session_type(10);
        let mut rx = s.subscribe();

        assert!(!s.update_session_type(10));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn rehydrate_copies_fields_and_detaches_subscribers() {
        let mut s = SessionState::new();
        s.set_track(11);
        s.update_air_temperature(28);
        s.update_best_sector1(27_800);
        s.update_fastest_lap(
            90.1,
            DriverRef {
                race_number: 16,
                display_name: Some("LECLERC".to_string()),
            },
        );
        let _rx = s.subscribe();

        let mut copy = s.rehydrate();
        assert_eq!(copy.track(), Some(11));
        assert_eq!(copy.air_temperature_c(), 28);
        assert_eq!(copy.best_sector1_ms(), Some(27_800));
        assert_eq!(copy.fastest_lap().map(|f| f.driver.race_number), Some(16));

        // The copy's bus starts with no subscribers.
        let mut copy_rx = copy.subscribe();
        copy.update_air_temperature(30);
        assert_eq!(
            drain(&mut copy_rx),
            vec![SessionEvent::AirTemperature { celsius: 30 }]
        );
    }
}
