//! Single-task telemetry relay loop.
//!
//! One cooperative task owns the whole reconciliation path: a decoded packet
//! is fully processed (router dispatch → entity updates → event emissions →
//! session-event drain → optional immediate event publish) before the next
//! packet or timer tick runs. The snapshot timer shares the same task, so it
//! can only fire between fully-processed packets — no locking, no torn
//! snapshots.
//!
//! The decoder collaborator attaches through [`PacketSource`]; the fan-out
//! transport drains the snapshot channel. Neither can stall ingestion: all
//! delivery is `try_send` best-effort.
//!
//! ## Environment configuration
//! - `PITWALL_SNAPSHOT_INTERVAL_MS` — periodic snapshot cadence (default 1000)
//! - `PITWALL_SNAPSHOT_CHANNEL_CAPACITY` — sink channel depth (default 32)

use anyhow::Result;
use async_trait::async_trait;
use pitwall_telemetry_packets::TelemetryPacket;
use pitwall_telemetry_router::{
    ChannelSink, PacketRouter, SnapshotPublisher, SnapshotReceiver, SnapshotSink,
};
use pitwall_telemetry_state::restore::BackupBlob;
use pitwall_telemetry_state::session::SessionState;
use pitwall_telemetry_state::{Lineup, ReconcileContext, SessionEvent, restore_context};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

const ENV_SNAPSHOT_INTERVAL_MS: &str = "PITWALL_SNAPSHOT_INTERVAL_MS";
const ENV_SNAPSHOT_CHANNEL_CAPACITY: &str = "PITWALL_SNAPSHOT_CHANNEL_CAPACITY";

pub type PacketReceiver = mpsc::Receiver<TelemetryPacket>;

/// Decoder collaborator seam.
///
/// An implementation owns whatever transport and binary decoding it needs
/// and hands decoded packets over a bounded channel.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Stable identifier for logging.
    fn source_id(&self) -> &str;

    /// Begin producing packets.
    ///
    /// # Errors
    /// Failing to acquire the underlying decoder/transport resources is the
    /// one unrecoverable start-up condition; it aborts engine start.
    async fn start(&self) -> Result<PacketReceiver>;
}

/// Relay configuration. Lineup and backup are injected values — resolving
/// and loading them (files, env, CLI) is the surrounding process's concern.
#[derive(Debug, Default)]
pub struct RelayConfig {
    pub snapshot_interval: Option<Duration>,
    pub snapshot_channel_capacity: Option<usize>,
    pub lineup: Lineup,
    pub backup: Option<BackupBlob>,
}

impl RelayConfig {
    /// Defaults with environment overrides for the engine-level knobs.
    pub fn from_env() -> Self {
        let interval_ms = env_u64(ENV_SNAPSHOT_INTERVAL_MS, DEFAULT_SNAPSHOT_INTERVAL_MS);
        let capacity = env_u64(
            ENV_SNAPSHOT_CHANNEL_CAPACITY,
            DEFAULT_SNAPSHOT_CHANNEL_CAPACITY as u64,
        );
        Self {
            snapshot_interval: Some(Duration::from_millis(interval_ms)),
            snapshot_channel_capacity: Some(capacity as usize),
            lineup: Lineup::new(),
            backup: None,
        }
    }

    pub fn with_lineup(mut self, lineup: Lineup) -> Self {
        self.lineup = lineup;
        self
    }

    pub fn with_backup(mut self, backup: BackupBlob) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    fn snapshot_interval(&self) -> Duration {
        self.snapshot_interval
            .unwrap_or(Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS))
    }

    fn channel_capacity(&self) -> usize {
        self.snapshot_channel_capacity
            .unwrap_or(DEFAULT_SNAPSHOT_CHANNEL_CAPACITY)
            .max(1)
    }
}

/// The reconciliation engine: context, router, publisher, one loop.
pub struct RelayEngine {
    ctx: ReconcileContext,
    publisher: SnapshotPublisher,
    session_events: mpsc::Receiver<SessionEvent>,
    snapshot_interval: Duration,
}

impl RelayEngine {
    /// Build an engine delivering snapshots over a bounded channel; the
    /// returned receiver is the transport side.
    pub fn new(config: RelayConfig) -> (Self, SnapshotReceiver) {
        let (sink, snapshot_rx) = ChannelSink::new(config.channel_capacity());
        let engine = Self::with_sink(config, Box::new(sink));
        (engine, snapshot_rx)
    }

    /// Build an engine around a custom transport sink.
    pub fn with_sink(config: RelayConfig, sink: Box<dyn SnapshotSink>) -> Self {
        let snapshot_interval = config.snapshot_interval();
        let mut ctx = match &config.backup {
            Some(backup) => {
                info!("restoring working set from backup");
                restore_context(config.lineup.clone(), backup)
            }
            None => ReconcileContext::new(config.lineup),
        };
        let session_events = ctx.session_mut().subscribe();
        Self {
            ctx,
            publisher: SnapshotPublisher::new(sink),
            session_events,
            snapshot_interval,
        }
    }

    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    /// Drive the engine until the packet source closes.
    ///
    /// # Errors
    /// Only source start-up can fail; everything after that degrades to
    /// logged warnings.
    pub async fn run(mut self, source: Box<dyn PacketSource>) -> Result<()> {
        let mut packets = source.start().await?;
        info!(source = source.source_id(), "telemetry relay started");

        let mut ticker = tokio::time::interval(self.snapshot_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_packet = packets.recv() => {
                    match maybe_packet {
                        Some(packet) => self.handle_packet(&packet),
                        None => {
                            info!("packet source closed; relay shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.publisher.publish_snapshot(&self.ctx) {
                        warn!(error = %err, "periodic snapshot publish failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// Process one packet to completion, including session-transition
    /// handling and any immediate notable-event publish.
    pub fn handle_packet(&mut self, packet: &TelemetryPacket) {
        debug!(kind = packet.kind(), "folding packet into working set");
        let notable = PacketRouter::route(&mut self.ctx, packet);
        self.drain_session_events();
        if let Some(event) = notable {
            if let Err(err) = self.publisher.publish_event(&self.ctx, &event) {
                warn!(error = %err, kind = event.kind, "notable event publish failed");
            }
        }
    }

    /// React to session events between packets. A type change replaces the
    /// whole working set: fresh session pre-seeded with the new type (so the
    /// transition fires exactly once), empty driver sequence, rewired feed.
    fn drain_session_events(&mut self) {
        loop {
            match self.session_events.try_recv() {
                Ok(SessionEvent::SessionTypeChanged { session_type }) => {
                    info!(session_type, "session type changed; rebuilding working set");
                    let lineup = self.ctx.lineup().clone();
                    self.ctx = ReconcileContext::with_session(
                        lineup,
                        SessionState::with_session_type(session_type),
                    );
                    self.session_events = self.ctx.session_mut().subscribe();
                }
                // Other session events exist for downstream subscribers.
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // The session instance was replaced under us (session
                    // start); rewire to the live one.
                    self.session_events = self.ctx.session_mut().subscribe();
                    break;
                }
            }
        }
    }
}

// ── Env helpers ───────────────────────────────────────────────────────────────

fn env_u64(name: &str, fallback: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pitwall_telemetry_packets::{
        CarStatusEntry, CarStatusPacket, EventPacket, ParticipantEntry, ParticipantsPacket,
        SessionPacket,
    };

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn participants(numbers: &[u8]) -> TelemetryPacket {
        TelemetryPacket::Participants(ParticipantsPacket {
            participants: numbers
                .iter()
                .map(|&race_number| ParticipantEntry {
                    race_number,
                    team_id: 0,
                    telemetry_visibility: 1,
                })
                .collect(),
        })
    }

    fn session_with_type(session_type: u8) -> TelemetryPacket {
        TelemetryPacket::Session(SessionPacket {
            air_temperature_c: 22,
            track_temperature_c: 30,
            pit_speed_limit_kmh: 60,
            session_time_left_s: 3_000,
            session_type,
            weather: 0,
            safety_car_status: 0,
            track_id: 3,
            total_laps: 40,
            num_weather_forecast_samples: 0,
            weather_forecast_samples: vec![],
        })
    }

    fn engine() -> (RelayEngine, SnapshotReceiver) {
        let config = RelayConfig::default()
            .with_lineup(Lineup::from_iter([(44u8, "HAMILTON".to_string())]))
            .with_snapshot_interval(Duration::from_secs(3600));
        RelayEngine::new(config)
    }

    struct ScriptedSource {
        packets: Vec<TelemetryPacket>,
    }

    #[async_trait]
    impl PacketSource for ScriptedSource {
        fn source_id(&self) -> &str {
            "scripted"
        }

        async fn start(&self) -> Result<PacketReceiver> {
            let (tx, rx) = mpsc::channel(64);
            for packet in self.packets.clone() {
                tx.send(packet).await?;
            }
            // Dropping the sender closes the stream once drained.
            Ok(rx)
        }
    }

    #[test]
    fn session_type_change_rebuilds_the_working_set() {
        let (mut engine, _rx) = engine();

        engine.handle_packet(&participants(&[44]));
        assert_eq!(engine.context().driver_count(), 1);

        engine.handle_packet(&session_with_type(10));
        assert_eq!(engine.context().driver_count(), 0);
        assert_eq!(engine.context().session().session_type(), 10);

        // The rebuilt context keeps the lineup and does not re-fire.
        engine.handle_packet(&participants(&[44]));
        engine.handle_packet(&session_with_type(10));
        assert_eq!(engine.context().driver_count(), 1);
        assert_eq!(
            engine.context().driver(0).and_then(|d| d.display_name()),
            Some("HAMILTON")
        );
    }

    #[test]
    fn session_start_event_publishes_immediately_and_rewires() -> TestResult {
        let (mut engine, mut rx) = engine();
        engine.handle_packet(&participants(&[44]));

        engine.handle_packet(&TelemetryPacket::Event(EventPacket::SessionStarted));

        let payload: serde_json::Value = serde_json::from_str(&rx.try_recv()?)?;
        assert_eq!(payload["event"]["type"], "Session Started");
        assert_eq!(engine.context().driver_count(), 0);

        // The replaced session's events still reach the engine: a later
        // type change must rebuild, which proves the feed was rewired.
        engine.handle_packet(&participants(&[44]));
        engine.handle_packet(&session_with_type(12));
        assert_eq!(engine.context().driver_count(), 0);
        assert_eq!(engine.context().session().session_type(), 12);
        Ok(())
    }

    #[test]
    fn restored_backup_is_live_before_ingestion() -> TestResult {
        let blob_json = {
            let mut driver = pitwall_telemetry_state::DriverState::new(44, None);
            driver.update_car_position(2);
            let session = SessionState::with_session_type(11);
            serde_json::to_string(&(vec![Some(driver)], session))?
        };
        let backup: BackupBlob = serde_json::from_str(&blob_json)?;

        let config = RelayConfig::default()
            .with_lineup(Lineup::from_iter([(44u8, "HAMILTON".to_string())]))
            .with_backup(backup);
        let (engine, _rx) = RelayEngine::new(config);

        assert_eq!(engine.context().driver_count(), 1);
        assert_eq!(
            engine.context().driver(0).and_then(|d| d.display_name()),
            Some("HAMILTON")
        );
        assert_eq!(engine.context().session().session_type(), 11);
        Ok(())
    }

    #[tokio::test]
    async fn run_publishes_snapshots_and_notable_events() -> TestResult {
        let config = RelayConfig::default()
            .with_lineup(Lineup::from_iter([(44u8, "HAMILTON".to_string())]))
            .with_snapshot_interval(Duration::from_millis(10));
        let (engine, mut rx) = RelayEngine::new(config);

        let source = ScriptedSource {
            packets: vec![
                participants(&[44]),
                TelemetryPacket::CarStatus(CarStatusPacket {
                    cars: vec![CarStatusEntry {
                        visual_tyre_compound: 16,
                        tyres_age_laps: 3,
                        vehicle_fia_flag: 0,
                        ers_store_energy_j: 1_000_000.0,
                    }],
                }),
                TelemetryPacket::Event(EventPacket::ChequeredFlag),
            ],
        };

        engine.run(Box::new(source)).await?;

        let mut saw_event = false;
        let mut saw_driver = false;
        while let Ok(payload) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&payload)?;
            if value["event"]["type"] == "Chequered Flag" {
                saw_event = true;
                assert_eq!(value["drivers"][0]["race_number"], 44);
            }
            if value["drivers"][0]["current_tyre"]["compound"] == 16 {
                saw_driver = true;
            }
        }
        assert!(saw_event, "chequered flag must publish immediately");
        assert!(saw_driver, "snapshots must carry reconciled driver state");
        Ok(())
    }

    #[test]
    fn config_defaults_are_sane() {
        let config = RelayConfig::default();
        assert_eq!(config.snapshot_interval(), Duration::from_secs(1));
        assert_eq!(config.channel_capacity(), 32);
    }
}
