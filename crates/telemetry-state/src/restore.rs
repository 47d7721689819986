//! Backup rehydration.
//!
//! A host may persist the working set as a `[drivers, session]` blob and
//! hand it back at the next start. Restoration happens exactly once, before
//! telemetry ingestion begins: every entity is structurally copied into a
//! fresh working instance with a fresh event bus, and each driver's display
//! name is re-derived from the injected lineup — the serialized name is
//! never trusted.

use crate::{DriverState, Lineup, ReconcileContext, SessionState};

/// The serialized backup shape: the slot-indexed driver sequence (absent
/// slots as `null`) plus the session.
pub type BackupBlob = (Vec<Option<DriverState>>, SessionState);

/// Rehydrate a backup into a ready-to-ingest context.
pub fn restore_context(lineup: Lineup, backup: &BackupBlob) -> ReconcileContext {
    let (drivers, session) = backup;
    let rehydrated: Vec<Option<DriverState>> = drivers
        .iter()
        .map(|slot| slot.as_ref().map(|driver| driver.rehydrate(&lineup)))
        .collect();

    let mut ctx = ReconcileContext::with_session(lineup, session.rehydrate());
    for (slot, driver) in rehydrated.into_iter().enumerate() {
        if let Some(driver) = driver {
            ctx.install_driver(slot, driver);
        }
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DriverRef;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn backup_json() -> String {
        let mut leclerc = DriverState::new(16, Some("wrong name".to_string()));
        leclerc.update_car_position(1);
        leclerc.update_tyre(16, 8);
        leclerc.set_best_lap_time(Some(92_114));

        let mut session = SessionState::new();
        session.set_track(5);
        let changed = session.update_session_type(11);
        assert!(changed);
        session.update_fastest_lap(
            92.114,
            DriverRef {
                race_number: 16,
                display_name: Some("wrong name".to_string()),
            },
        );

        let blob: BackupBlob = (vec![None, Some(leclerc)], session);
        serde_json::to_string(&blob).unwrap_or_default()
    }

    #[test]
    fn restore_round_trips_drivers_and_session() -> TestResult {
        let blob: BackupBlob = serde_json::from_str(&backup_json())?;
        let lineup = Lineup::from_iter([(16u8, "LECLERC".to_string())]);

        let ctx = restore_context(lineup, &blob);

        assert_eq!(ctx.driver_count(), 1);
        assert!(ctx.driver(0).is_none(), "empty slot stays empty");
        let driver = ctx.driver(1).ok_or("slot 1 missing")?;
        assert_eq!(driver.race_number(), 16);
        assert_eq!(driver.car_position(), 1);
        assert_eq!(driver.best_lap_time_ms(), Some(92_114));
        assert_eq!(ctx.session().track(), Some(5));
        assert_eq!(ctx.session().session_type(), 11);
        Ok(())
    }

    #[test]
    fn restore_rederives_display_names_from_the_lineup() -> TestResult {
        let blob: BackupBlob = serde_json::from_str(&backup_json())?;
        let lineup = Lineup::from_iter([(16u8, "LECLERC".to_string())]);

        let ctx = restore_context(lineup, &blob);

        let driver = ctx.driver(1).ok_or("slot 1 missing")?;
        assert_eq!(driver.display_name(), Some("LECLERC"));
        Ok(())
    }

    #[test]
    fn restore_with_unlisted_number_leaves_name_unset() -> TestResult {
        let blob: BackupBlob = serde_json::from_str(&backup_json())?;

        let ctx = restore_context(Lineup::new(), &blob);

        let driver = ctx.driver(1).ok_or("slot 1 missing")?;
        assert_eq!(driver.display_name(), None);
        Ok(())
    }

    #[test]
    fn restored_session_keeps_type_without_refiring() -> TestResult {
        let blob: BackupBlob = serde_json::from_str(&backup_json())?;
        let mut ctx = restore_context(Lineup::new(), &blob);

        let mut rx = ctx.session_mut().subscribe();
        assert!(!ctx.update_session_type(11));
        assert!(rx.try_recv().is_err());
        Ok(())
    }
}
