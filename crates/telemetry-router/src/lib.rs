//! Packet-to-entity routing.
//!
//! The router maps each decoded packet kind to the sequence of entity
//! updates it implies and owns the single most safety-critical policy in
//! the engine: slot-identity reconciliation. A participants packet that
//! reports a different race number for an occupied slot replaces the whole
//! entity at that slot — patching it would attribute one car's lap history,
//! best sectors, and infringements to another.
//!
//! Dispatch is infallible by design. Per-car packets targeting a slot with
//! no entity yet are silently skipped (packet kinds legally arrive before
//! participants data on connection); unrecognised or state-irrelevant event
//! codes are no-ops.
//!
//! Routing returns the optional notable event a packet implies so the
//! caller can push it to the broadcast layer immediately, ahead of the next
//! periodic snapshot.

use pitwall_telemetry_packets::{
    CarDamagePacket, CarStatusPacket, EventPacket, LapDataPacket, LapHistoryEntry, MAX_SLOTS,
    MotionPacket, ParticipantsPacket, SessionHistoryPacket, SessionPacket, TelemetryPacket,
};
use pitwall_telemetry_state::{DriverRef, DriverState, InfringementRecord, ReconcileContext};
use tracing::{debug, info};

pub mod publisher;

pub use publisher::{
    ChannelSink, NotableEvent, PublishError, SnapshotPublisher, SnapshotReceiver, SnapshotSink,
};

/// Stateless dispatcher over an explicit reconciliation context.
pub struct PacketRouter;

impl PacketRouter {
    /// Fold one decoded packet into the context.
    ///
    /// Returns the notable event to push immediately, when the packet
    /// carries one.
    pub fn route(ctx: &mut ReconcileContext, packet: &TelemetryPacket) -> Option<NotableEvent> {
        match packet {
            TelemetryPacket::Participants(p) => {
                Self::route_participants(ctx, p);
                None
            }
            TelemetryPacket::CarStatus(p) => {
                Self::route_car_status(ctx, p);
                None
            }
            TelemetryPacket::CarDamage(p) => {
                Self::route_car_damage(ctx, p);
                None
            }
            TelemetryPacket::LapData(p) => {
                Self::route_lap_data(ctx, p);
                None
            }
            TelemetryPacket::Session(p) => {
                Self::route_session(ctx, p);
                None
            }
            TelemetryPacket::Motion(p) => {
                Self::route_motion(ctx, p);
                None
            }
            TelemetryPacket::SessionHistory(p) => {
                Self::route_session_history(ctx, p);
                None
            }
            TelemetryPacket::Event(event) => Self::route_event(ctx, event),
        }
    }

    // ── Identity reconciliation ───────────────────────────────────────────

    /// A slot whose incoming race number differs from its occupant's gets a
    /// fresh entity; the previous occupant's state is discarded wholesale.
    fn route_participants(ctx: &mut ReconcileContext, packet: &ParticipantsPacket) {
        for (slot, entry) in packet.participants.iter().enumerate().take(MAX_SLOTS) {
            if ctx.slot_race_number(slot) != Some(entry.race_number) {
                if let Some(previous) = ctx.slot_race_number(slot) {
                    debug!(
                        slot,
                        previous,
                        incoming = entry.race_number,
                        "slot identity changed; replacing driver entity"
                    );
                }
                let name = ctx
                    .lineup()
                    .name_for(entry.race_number)
                    .map(str::to_owned);
                ctx.install_driver(slot, DriverState::new(entry.race_number, name));
            }
            if let Some(driver) = ctx.driver_mut(slot) {
                driver.set_telemetry_visibility(entry.telemetry_visibility);
                driver.set_team(entry.team_id);
            }
        }
    }

    // ── Per-car packet fan-out ────────────────────────────────────────────

    fn route_car_status(ctx: &mut ReconcileContext, packet: &CarStatusPacket) {
        for (slot, car) in packet.cars.iter().enumerate() {
            let Some(driver) = ctx.driver_mut(slot) else {
                continue;
            };
            driver.update_tyre(car.visual_tyre_compound, car.tyres_age_laps);
            driver.update_flag(car.vehicle_fia_flag);
            driver.set_ers_store_energy(car.ers_store_energy_j);
        }
    }

    fn route_car_damage(ctx: &mut ReconcileContext, packet: &CarDamagePacket) {
        for (slot, car) in packet.cars.iter().enumerate() {
            let Some(driver) = ctx.driver_mut(slot) else {
                continue;
            };
            driver.update_front_left_wing_damage(car.front_left_wing_damage_pct);
            driver.update_front_right_wing_damage(car.front_right_wing_damage_pct);
            driver.update_tyre_wear(car.tyres_wear_pct);
        }
    }

    fn route_lap_data(ctx: &mut ReconcileContext, packet: &LapDataPacket) {
        for (slot, lap) in packet.cars.iter().enumerate() {
            let Some(driver) = ctx.driver_mut(slot) else {
                continue;
            };
            driver.update_car_position(lap.car_position);
            driver.update_current_lap(lap.current_lap_num);
            driver.update_current_sector(lap.sector);
            driver.update_sector1_time(lap.sector1_time_ms);
            driver.update_sector2_time(lap.sector2_time_ms);
            driver.update_current_lap_invalid(lap.current_lap_invalid);
            driver.update_total_distance(lap.total_distance_m);
            driver.update_track_status(lap.driver_status);
            driver.set_result_status(lap.result_status);
            driver.set_driver_status(lap.driver_status);
            driver.update_last_lap_time(lap.last_lap_time_ms);
            driver.set_pit_count(lap.num_pit_stops);
            driver.set_penalty_time(lap.penalties_s);
            driver.set_grid_position(lap.grid_position);
            driver.set_current_lap_time(lap.current_lap_time_ms);
            driver.set_num_unserved_drive_through_pens(lap.num_unserved_drive_through_pens);
            driver.set_num_unserved_stop_go_pens(lap.num_unserved_stop_go_pens);
        }
    }

    fn route_motion(ctx: &mut ReconcileContext, packet: &MotionPacket) {
        for (slot, motion) in packet.cars.iter().enumerate() {
            let Some(driver) = ctx.driver_mut(slot) else {
                continue;
            };
            let magnitude = (motion.g_force_lateral * motion.g_force_lateral
                + motion.g_force_longitudinal * motion.g_force_longitudinal
                + motion.g_force_vertical * motion.g_force_vertical)
                .sqrt();
            driver.update_max_g_force(magnitude);
        }
    }

    // ── Session packet ────────────────────────────────────────────────────

    fn route_session(ctx: &mut ReconcileContext, packet: &SessionPacket) {
        let session = ctx.session_mut();
        session.update_air_temperature(packet.air_temperature_c);
        session.update_track_temperature(packet.track_temperature_c);
        session.update_pit_speed_limit(packet.pit_speed_limit_kmh);
        session.update_session_time_left(packet.session_time_left_s);

        // Routed through the context so a changed type clears the drivers.
        ctx.update_session_type(packet.session_type);

        let session = ctx.session_mut();
        session.update_current_weather(packet.weather);
        session.update_safety_car_status(packet.safety_car_status);
        session.set_track(packet.track_id);
        session.set_total_laps(packet.total_laps);

        // The sample array is fixed-capacity; only the declared prefix is
        // real. The count wins over the capacity.
        let declared = usize::from(packet.num_weather_forecast_samples)
            .min(packet.weather_forecast_samples.len());
        session.set_weather_forecasts(
            packet
                .weather_forecast_samples
                .iter()
                .take(declared)
                .cloned()
                .collect(),
        );
    }

    // ── Session history ───────────────────────────────────────────────────

    /// Best lap/sector lap numbers are 1-based indexes into the lap history;
    /// 0 or past-the-end resolves to "no value", never an error.
    fn route_session_history(ctx: &mut ReconcileContext, packet: &SessionHistoryPacket) {
        let slot = usize::from(packet.car_index);
        let best_lap = best_entry(packet, packet.best_lap_time_lap_num).map(|e| e.lap_time_ms);
        let sector1 = best_entry(packet, packet.best_sector1_lap_num).map(|e| e.sector1_time_ms);
        let sector2 = best_entry(packet, packet.best_sector2_lap_num).map(|e| e.sector2_time_ms);
        let sector3 = best_entry(packet, packet.best_sector3_lap_num).map(|e| e.sector3_time_ms);

        let Some(driver) = ctx.driver_mut(slot) else {
            return;
        };
        driver.set_best_lap_time(best_lap);
        driver.set_best_sector1(sector1);
        driver.set_best_sector2(sector2);
        driver.set_best_sector3(sector3);

        // The last entry is the in-progress lap; keep the completed ones.
        let completed = usize::from(packet.num_laps)
            .saturating_sub(1)
            .min(packet.lap_history.len());
        driver.set_lap_history(packet.lap_history.iter().take(completed).cloned().collect());

        // Per-driver bests feed the session-wide strict minima.
        let session = ctx.session_mut();
        if let Some(time_ms) = sector1 {
            session.update_best_sector1(time_ms);
        }
        if let Some(time_ms) = sector2 {
            session.update_best_sector2(time_ms);
        }
        if let Some(time_ms) = sector3 {
            session.update_best_sector3(time_ms);
        }
    }

    // ── Event packet ──────────────────────────────────────────────────────

    fn route_event(ctx: &mut ReconcileContext, event: &EventPacket) -> Option<NotableEvent> {
        match event {
            EventPacket::Penalty(penalty) => {
                if let Some(driver) = ctx.driver_mut(usize::from(penalty.vehicle_index)) {
                    driver.add_infringement(InfringementRecord::from_penalty(penalty));
                }
                None
            }
            EventPacket::SpeedTrap {
                vehicle_index,
                speed_kmh,
            } => {
                if let Some(driver) = ctx.driver_mut(usize::from(*vehicle_index)) {
                    driver.add_speed_trap(*speed_kmh);
                }
                None
            }
            EventPacket::FastestLap {
                vehicle_index,
                lap_time_s,
            } => {
                if let Some(driver) = ctx.driver(usize::from(*vehicle_index)) {
                    let holder = DriverRef {
                        race_number: driver.race_number(),
                        display_name: driver.display_name().map(str::to_owned),
                    };
                    ctx.session_mut().update_fastest_lap(*lap_time_s, holder);
                }
                None
            }
            EventPacket::SessionStarted => {
                info!("session started; resetting working set");
                ctx.reset();
                Some(NotableEvent::tagged("Session Started"))
            }
            EventPacket::SessionEnded => Some(NotableEvent::tagged("Session Ended")),
            EventPacket::DrsEnabled => Some(NotableEvent::tagged("DRS enabled")),
            EventPacket::DrsDisabled => Some(NotableEvent::tagged("DRS disabled")),
            EventPacket::ChequeredFlag => Some(NotableEvent::tagged("Chequered Flag")),
            EventPacket::StartLights { num_lights } => {
                Some(NotableEvent::with_number("Starting Lights", *num_lights))
            }
            EventPacket::LightsOut => Some(NotableEvent::tagged("Lights Out")),
            EventPacket::FlashbackUsed => Some(NotableEvent::tagged("Flashback Used")),
            EventPacket::Retirement { .. }
            | EventPacket::RaceWinner { .. }
            | EventPacket::DriveThroughServed { .. }
            | EventPacket::StopGoServed { .. }
            | EventPacket::ButtonStatus { .. } => {
                debug!("event carries no state or broadcast effect; ignoring");
                None
            }
        }
    }
}

fn best_entry(packet: &SessionHistoryPacket, lap_num: u8) -> Option<&LapHistoryEntry> {
    let index = usize::from(lap_num).checked_sub(1)?;
    packet.lap_history.get(index)
}
