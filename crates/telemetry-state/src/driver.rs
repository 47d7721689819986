//! Per-car driver state.
//!
//! `DriverState` is the leaf entity of the reconciliation engine: one update
//! method per telemetry field (or tightly-coupled pair), each comparing the
//! incoming value against the stored one and emitting a typed
//! [`DriverEvent`] only when the value actually changed. Monotone maxima
//! (G-force, speed trap) emit only when the maximum advances; discrete
//! occurrences (speed-trap readings, infringements) always emit.
//!
//! A driver never looks up other drivers; slot resolution happens upstream
//! in the router.

use crate::Lineup;
use crate::events::EventBus;
use crate::infringement::InfringementRecord;
use pitwall_telemetry_packets::LapHistoryEntry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Tyre compound and age, updated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TyreFit {
    pub compound: u8,
    pub age_laps: u8,
}

/// Front wing damage, percent per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WingDamage {
    pub left_pct: u8,
    pub right_pct: u8,
}

/// One per-lap tyre-wear observation. Records keep observation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TyreWearRecord {
    pub lap: u8,
    pub tyre: TyreFit,
    pub wear_pct: [f32; 4],
}

/// Change events emitted by a driver entity. Payload is always the driver's
/// race number plus the new value.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    SpeedTrap { race_number: u8, speed_kmh: f32 },
    MaxSpeedTrap { race_number: u8, speed_kmh: f32 },
    InfringementAdded { race_number: u8 },
    MaxGForce { race_number: u8, g_force: f32 },
    TrackStatus { race_number: u8, status: u8 },
    Sector1Time { race_number: u8, time_ms: u16 },
    Sector2Time { race_number: u8, time_ms: u16 },
    TotalDistance { race_number: u8, distance_m: f32 },
    LapInvalidated { race_number: u8, invalid: bool },
    WingStatus { race_number: u8, damage: WingDamage },
    CurrentSector { race_number: u8, sector: u8 },
    CurrentLap { race_number: u8, lap: u8 },
    CarPosition { race_number: u8, position: u8 },
    Flag { race_number: u8, flag: i8 },
    TyreStatus { race_number: u8, tyre: TyreFit },
    TyreWear { race_number: u8, wear_pct: [f32; 4] },
    LastLapTime { race_number: u8, time_ms: u32 },
}

/// Team id reported before a participants packet names one.
const TEAM_UNKNOWN: u8 = 95;

/// Live state of one car, keyed by its persistent race number.
#[derive(Debug, Serialize, Deserialize)]
pub struct DriverState {
    race_number: u8,
    display_name: Option<String>,
    team: u8,
    telemetry_visibility: u8,
    /// ERS store as percent of the full 4 MJ store.
    ers_charge_pct: f32,

    car_position: u8,
    grid_position: u8,
    current_lap: Option<u8>,
    current_sector: Option<u8>,
    sector1_time_ms: Option<u16>,
    sector2_time_ms: Option<u16>,
    current_lap_invalid: u8,
    current_lap_time_ms: Option<u32>,
    last_lap_time_ms: Option<u32>,
    total_distance_m: f32,

    best_sector1_ms: Option<u16>,
    best_sector2_ms: Option<u16>,
    best_sector3_ms: Option<u16>,
    best_lap_time_ms: Option<u32>,
    lap_history: Vec<LapHistoryEntry>,

    max_g_force: f32,
    last_speed_trap_kmh: f32,
    max_speed_trap_kmh: f32,

    current_tyre: TyreFit,
    tyre_wear_pct: [f32; 4],
    tyre_wear_history: Vec<TyreWearRecord>,
    wing_damage: WingDamage,

    flag: i8,
    track_status: u8,
    driver_status: u8,
    result_status: u8,
    penalty_time_s: u8,
    pit_count: u8,
    num_unserved_drive_through_pens: u8,
    num_unserved_stop_go_pens: u8,
    infringements: Vec<InfringementRecord>,

    #[serde(skip)]
    bus: EventBus<DriverEvent>,
}

impl DriverState {
    /// Create a fresh driver for `race_number` with its display name as
    /// resolved from the lineup table (or `None` for an unlisted number).
    pub fn new(race_number: u8, display_name: Option<String>) -> Self {
        Self {
            race_number,
            display_name,
            team: TEAM_UNKNOWN,
            telemetry_visibility: 0,
            ers_charge_pct: 0.0,
            car_position: 0,
            grid_position: 0,
            current_lap: None,
            current_sector: None,
            sector1_time_ms: None,
            sector2_time_ms: None,
            current_lap_invalid: 0,
            current_lap_time_ms: None,
            last_lap_time_ms: None,
            total_distance_m: 0.0,
            best_sector1_ms: None,
            best_sector2_ms: None,
            best_sector3_ms: None,
            best_lap_time_ms: None,
            lap_history: Vec::new(),
            max_g_force: 0.0,
            last_speed_trap_kmh: 0.0,
            max_speed_trap_kmh: 0.0,
            current_tyre: TyreFit::default(),
            tyre_wear_pct: [0.0; 4],
            tyre_wear_history: Vec::new(),
            wing_damage: WingDamage::default(),
            flag: -1,
            track_status: 0,
            driver_status: 0,
            result_status: 0,
            penalty_time_s: 0,
            pit_count: 0,
            num_unserved_drive_through_pens: 0,
            num_unserved_stop_go_pens: 0,
            infringements: Vec::new(),
            bus: EventBus::new(),
        }
    }

    /// Register a change-event subscriber for this driver.
    pub fn subscribe(&mut self) -> mpsc::Receiver<DriverEvent> {
        self.bus.subscribe()
    }

    // ── Compare-and-emit setters ──────────────────────────────────────────

    pub fn update_car_position(&mut self, position: u8) {
        if self.car_position != position {
            self.car_position = position;
            self.bus.emit(&DriverEvent::CarPosition {
                race_number: self.race_number,
                position,
            });
        }
    }

    pub fn update_current_lap(&mut self, lap: u8) {
        if self.current_lap != Some(lap) {
            self.current_lap = Some(lap);
            self.bus.emit(&DriverEvent::CurrentLap {
                race_number: self.race_number,
                lap,
            });
        }
    }

    pub fn update_current_sector(&mut self, sector: u8) {
        if self.current_sector != Some(sector) {
            self.current_sector = Some(sector);
            self.bus.emit(&DriverEvent::CurrentSector {
                race_number: self.race_number,
                sector,
            });
        }
    }

    pub fn update_sector1_time(&mut self, time_ms: u16) {
        if self.sector1_time_ms != Some(time_ms) {
            self.sector1_time_ms = Some(time_ms);
            self.bus.emit(&DriverEvent::Sector1Time {
                race_number: self.race_number,
                time_ms,
            });
        }
    }

    pub fn update_sector2_time(&mut self, time_ms: u16) {
        if self.sector2_time_ms != Some(time_ms) {
            self.sector2_time_ms = Some(time_ms);
            self.bus.emit(&DriverEvent::Sector2Time {
                race_number: self.race_number,
                time_ms,
            });
        }
    }

    pub fn update_current_lap_invalid(&mut self, invalid: u8) {
        if self.current_lap_invalid != invalid {
            self.current_lap_invalid = invalid;
            self.bus.emit(&DriverEvent::LapInvalidated {
                race_number: self.race_number,
                invalid: invalid != 0,
            });
        }
    }

    /// Total distance travelled since the race start. Zero or negative
    /// readings are spurious resets and ignored outright.
    pub fn update_total_distance(&mut self, distance_m: f32) {
        if distance_m <= 0.0 {
            return;
        }
        if self.total_distance_m.to_bits() != distance_m.to_bits() {
            self.total_distance_m = distance_m;
            self.bus.emit(&DriverEvent::TotalDistance {
                race_number: self.race_number,
                distance_m,
            });
        }
    }

    pub fn update_track_status(&mut self, status: u8) {
        if self.track_status != status {
            self.track_status = status;
            self.bus.emit(&DriverEvent::TrackStatus {
                race_number: self.race_number,
                status,
            });
        }
    }

    pub fn update_flag(&mut self, flag: i8) {
        if self.flag != flag {
            self.flag = flag;
            self.bus.emit(&DriverEvent::Flag {
                race_number: self.race_number,
                flag,
            });
        }
    }

    pub fn update_last_lap_time(&mut self, time_ms: u32) {
        if self.last_lap_time_ms != Some(time_ms) {
            self.last_lap_time_ms = Some(time_ms);
            self.bus.emit(&DriverEvent::LastLapTime {
                race_number: self.race_number,
                time_ms,
            });
        }
    }

    /// Tyre compound and age change together; either moving emits one event.
    pub fn update_tyre(&mut self, compound: u8, age_laps: u8) {
        let tyre = TyreFit { compound, age_laps };
        if self.current_tyre != tyre {
            self.current_tyre = tyre;
            self.bus.emit(&DriverEvent::TyreStatus {
                race_number: self.race_number,
                tyre,
            });
        }
    }

    pub fn update_front_left_wing_damage(&mut self, pct: u8) {
        if self.wing_damage.left_pct != pct {
            self.wing_damage.left_pct = pct;
            self.bus.emit(&DriverEvent::WingStatus {
                race_number: self.race_number,
                damage: self.wing_damage,
            });
        }
    }

    pub fn update_front_right_wing_damage(&mut self, pct: u8) {
        if self.wing_damage.right_pct != pct {
            self.wing_damage.right_pct = pct;
            self.bus.emit(&DriverEvent::WingStatus {
                race_number: self.race_number,
                damage: self.wing_damage,
            });
        }
    }

    /// Update live tyre wear and index it into the per-lap wear history.
    ///
    /// The history entry is keyed by the current lap number; with no lap
    /// known yet the live array still updates but no history is written.
    pub fn update_tyre_wear(&mut self, wear_pct: [f32; 4]) {
        let changed = self
            .tyre_wear_pct
            .iter()
            .zip(wear_pct.iter())
            .any(|(old, new)| old.to_bits() != new.to_bits());
        if changed {
            self.tyre_wear_pct = wear_pct;
            self.bus.emit(&DriverEvent::TyreWear {
                race_number: self.race_number,
                wear_pct,
            });
        }
        if let Some(lap) = self.current_lap {
            match self.tyre_wear_history.iter_mut().find(|r| r.lap == lap) {
                Some(record) => {
                    record.tyre = self.current_tyre;
                    record.wear_pct = wear_pct;
                }
                None => self.tyre_wear_history.push(TyreWearRecord {
                    lap,
                    tyre: self.current_tyre,
                    wear_pct,
                }),
            }
        }
    }

    // ── Monotone maxima and discrete occurrences ──────────────────────────

    /// Record a speed-trap reading. Every reading is a discrete trap pass
    /// and emits; the running maximum emits only when it advances.
    pub fn add_speed_trap(&mut self, speed_kmh: f32) {
        self.last_speed_trap_kmh = speed_kmh;
        self.bus.emit(&DriverEvent::SpeedTrap {
            race_number: self.race_number,
            speed_kmh,
        });
        if speed_kmh > self.max_speed_trap_kmh {
            self.max_speed_trap_kmh = speed_kmh;
            self.bus.emit(&DriverEvent::MaxSpeedTrap {
                race_number: self.race_number,
                speed_kmh,
            });
        }
    }

    pub fn update_max_g_force(&mut self, g_force: f32) {
        if g_force > self.max_g_force {
            self.max_g_force = g_force;
            self.bus.emit(&DriverEvent::MaxGForce {
                race_number: self.race_number,
                g_force,
            });
        }
    }

    /// Append an infringement. Always emits: two identical records can both
    /// be real, so there is no dedup.
    pub fn add_infringement(&mut self, record: InfringementRecord) {
        self.infringements.push(record);
        self.bus.emit(&DriverEvent::InfringementAdded {
            race_number: self.race_number,
        });
    }

    // ── Plain setters (no event in the catalog) ───────────────────────────

    pub fn set_team(&mut self, team_id: u8) {
        self.team = team_id;
    }

    pub fn set_telemetry_visibility(&mut self, visibility: u8) {
        self.telemetry_visibility = visibility;
    }

    /// Store ERS energy normalized to percent of the full 4 MJ store.
    pub fn set_ers_store_energy(&mut self, energy_j: f32) {
        self.ers_charge_pct = energy_j / 40_000.0;
    }

    pub fn set_current_lap_time(&mut self, time_ms: u32) {
        self.current_lap_time_ms = Some(time_ms);
    }

    pub fn set_penalty_time(&mut self, seconds: u8) {
        self.penalty_time_s = seconds;
    }

    pub fn set_pit_count(&mut self, pit_stops: u8) {
        self.pit_count = pit_stops;
    }

    pub fn set_grid_position(&mut self, position: u8) {
        self.grid_position = position;
    }

    pub fn set_driver_status(&mut self, status: u8) {
        self.driver_status = status;
    }

    pub fn set_result_status(&mut self, status: u8) {
        self.result_status = status;
    }

    pub fn set_num_unserved_drive_through_pens(&mut self, count: u8) {
        self.num_unserved_drive_through_pens = count;
    }

    pub fn set_num_unserved_stop_go_pens(&mut self, count: u8) {
        self.num_unserved_stop_go_pens = count;
    }

    pub fn set_lap_history(&mut self, history: Vec<LapHistoryEntry>) {
        self.lap_history = history;
    }

    // Best sectors replay what the session-history stream already resolved;
    // the driver stores them verbatim rather than re-deriving minima.

    pub fn set_best_sector1(&mut self, time_ms: Option<u16>) {
        self.best_sector1_ms = time_ms;
    }

    pub fn set_best_sector2(&mut self, time_ms: Option<u16>) {
        self.best_sector2_ms = time_ms;
    }

    pub fn set_best_sector3(&mut self, time_ms: Option<u16>) {
        self.best_sector3_ms = time_ms;
    }

    /// An absent resolved best lap leaves the stored value untouched.
    pub fn set_best_lap_time(&mut self, time_ms: Option<u32>) {
        if let Some(time_ms) = time_ms {
            self.best_lap_time_ms = Some(time_ms);
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────

    pub fn race_number(&self) -> u8 {
        self.race_number
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn team(&self) -> u8 {
        self.team
    }

    pub fn telemetry_visibility(&self) -> u8 {
        self.telemetry_visibility
    }

    pub fn ers_charge_pct(&self) -> f32 {
        self.ers_charge_pct
    }

    pub fn car_position(&self) -> u8 {
        self.car_position
    }

    pub fn grid_position(&self) -> u8 {
        self.grid_position
    }

    pub fn current_lap(&self) -> Option<u8> {
        self.current_lap
    }

    pub fn current_sector(&self) -> Option<u8> {
        self.current_sector
    }

    pub fn sector1_time_ms(&self) -> Option<u16> {
        self.sector1_time_ms
    }

    pub fn sector2_time_ms(&self) -> Option<u16> {
        self.sector2_time_ms
    }

    pub fn current_lap_invalid(&self) -> u8 {
        self.current_lap_invalid
    }

    pub fn current_lap_time_ms(&self) -> Option<u32> {
        self.current_lap_time_ms
    }

    pub fn last_lap_time_ms(&self) -> Option<u32> {
        self.last_lap_time_ms
    }

    pub fn total_distance_m(&self) -> f32 {
        self.total_distance_m
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

    pub fn best_lap_time_ms(&self) -> Option<u32> {
        self.best_lap_time_ms
    }

    pub fn lap_history(&self) -> &[LapHistoryEntry] {
        &self.lap_history
    }

    pub fn max_g_force(&self) -> f32 {
        self.max_g_force
    }

    pub fn last_speed_trap_kmh(&self) -> f32 {
        self.last_speed_trap_kmh
    }

    pub fn max_speed_trap_kmh(&self) -> f32 {
        self.max_speed_trap_kmh
    }

    pub fn current_tyre(&self) -> TyreFit {
        self.current_tyre
    }

    pub fn tyre_wear_pct(&self) -> [f32; 4] {
        self.tyre_wear_pct
    }

    pub fn tyre_wear_history(&self) -> &[TyreWearRecord] {
        &self.tyre_wear_history
    }

    pub fn wing_damage(&self) -> WingDamage {
        self.wing_damage
    }

    pub fn flag(&self) -> i8 {
        self.flag
    }

    pub fn track_status(&self) -> u8 {
        self.track_status
    }

    pub fn driver_status(&self) -> u8 {
        self.driver_status
    }

    pub fn result_status(&self) -> u8 {
        self.result_status
    }

    pub fn penalty_time_s(&self) -> u8 {
        self.penalty_time_s
    }

    pub fn pit_count(&self) -> u8 {
        self.pit_count
    }

    pub fn num_unserved_drive_through_pens(&self) -> u8 {
        self.num_unserved_drive_through_pens
    }

    pub fn num_unserved_stop_go_pens(&self) -> u8 {
        self.num_unserved_stop_go_pens
    }

    pub fn infringements(&self) -> &[InfringementRecord] {
        &self.infringements
    }

    // ── Rehydration ───────────────────────────────────────────────────────

    /// Field-by-field structural copy into a fresh working instance.
    ///
    /// The display name is re-derived from the lineup; a serialized name is
    /// never trusted. The copy starts with a fresh, unsubscribed event bus.
    pub fn rehydrate(&self, lineup: &Lineup) -> Self {
        let mut fresh = Self::new(
            self.race_number,
            lineup.name_for(self.race_number).map(str::to_owned),
        );
        fresh.team = self.team;
        fresh.telemetry_visibility = self.telemetry_visibility;
        fresh.ers_charge_pct = self.ers_charge_pct;
        fresh.car_position = self.car_position;
        fresh.grid_position = self.grid_position;
        fresh.current_lap = self.current_lap;
        fresh.current_sector = self.current_sector;
        fresh.sector1_time_ms = self.sector1_time_ms;
        fresh.sector2_time_ms = self.sector2_time_ms;
        fresh.current_lap_invalid = self.current_lap_invalid;
        fresh.current_lap_time_ms = self.current_lap_time_ms;
        fresh.last_lap_time_ms = self.last_lap_time_ms;
        fresh.total_distance_m = self.total_distance_m;
        fresh.best_sector1_ms = self.best_sector1_ms;
        fresh.best_sector2_ms = self.best_sector2_ms;
        fresh.best_sector3_ms = self.best_sector3_ms;
        fresh.best_lap_time_ms = self.best_lap_time_ms;
        fresh.lap_history = self.lap_history.clone();
        fresh.max_g_force = self.max_g_force;
        fresh.last_speed_trap_kmh = self.last_speed_trap_kmh;
        fresh.max_speed_trap_kmh = self.max_speed_trap_kmh;
        fresh.current_tyre = self.current_tyre;
        fresh.tyre_wear_pct = self.tyre_wear_pct;
        fresh.tyre_wear_history = self.tyre_wear_history.clone();
        fresh.wing_damage = self.wing_damage;
        fresh.flag = self.flag;
        fresh.track_status = self.track_status;
        fresh.driver_status = self.driver_status;
        fresh.result_status = self.result_status;
        fresh.penalty_time_s = self.penalty_time_s;
        fresh.pit_count = self.pit_count;
        fresh.num_unserved_drive_through_pens = self.num_unserved_drive_through_pens;
        fresh.num_unserved_stop_go_pens = self.num_unserved_stop_go_pens;
        fresh.infringements = self.infringements.clone();
        fresh
    }
}
