//! Race-state entity models and the reconciliation working set.
//!
//! ## Modules
//! - `driver` - per-car [`DriverState`] with the compare-and-emit discipline
//! - `session` - per-segment [`SessionState`] and session-best aggregates
//! - `infringement` - immutable [`InfringementRecord`] values
//! - `events` - the bounded change-event bus shared by both entities
//! - `restore` - backup-blob rehydration into a fresh working set
//!
//! The [`ReconcileContext`] replaces process-wide mutable globals with one
//! explicit object owning the slot-indexed driver sequence and the current
//! session; every router dispatch works against it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod driver;
pub mod events;
pub mod infringement;
pub mod restore;
pub mod session;

pub use driver::{DriverEvent, DriverState, TyreFit, TyreWearRecord, WingDamage};
pub use events::EventBus;
pub use infringement::InfringementRecord;
pub use restore::{BackupBlob, restore_context};
pub use session::{DriverRef, FastestLap, SessionEvent, SessionState};

/// Race number → display name, injected by the surrounding process.
///
/// The reconciliation engine never touches the filesystem; whoever hosts it
/// resolves and loads the table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lineup(HashMap<u8, String>);

impl Lineup {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn name_for(&self, race_number: u8) -> Option<&str> {
        self.0.get(&race_number).map(String::as_str)
    }

    pub fn insert(&mut self, race_number: u8, name: impl Into<String>) {
        self.0.insert(race_number, name.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<u8, String>> for Lineup {
    fn from(names: HashMap<u8, String>) -> Self {
        Self(names)
    }
}

impl FromIterator<(u8, String)> for Lineup {
    fn from_iter<I: IntoIterator<Item = (u8, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The live working set: slot-indexed drivers plus the current session.
///
/// Slots the simulation has not named yet are `None`; they serialize as
/// `null` so downstream consumers see stable slot positions. A slot's
/// occupant is replaced wholesale when its race number changes — per-car
/// history must never leak between physical cars.
#[derive(Debug)]
pub struct ReconcileContext {
    drivers: Vec<Option<DriverState>>,
    session: SessionState,
    lineup: Lineup,
}

impl ReconcileContext {
    pub fn new(lineup: Lineup) -> Self {
        Self::with_session(lineup, SessionState::new())
    }

    /// Build a context around an existing session instance (rehydrated from
    /// a backup, or pre-seeded with a session type after a transition).
    pub fn with_session(lineup: Lineup, session: SessionState) -> Self {
        Self {
            drivers: Vec::new(),
            session,
            lineup,
        }
    }

    pub fn lineup(&self) -> &Lineup {
        &self.lineup
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn drivers(&self) -> &[Option<DriverState>] {
        &self.drivers
    }

    pub fn driver(&self, slot: usize) -> Option<&DriverState> {
        self.drivers.get(slot).and_then(Option::as_ref)
    }

    pub fn driver_mut(&mut self, slot: usize) -> Option<&mut DriverState> {
        self.drivers.get_mut(slot).and_then(Option::as_mut)
    }

    /// Race number currently occupying `slot`, if any.
    pub fn slot_race_number(&self, slot: usize) -> Option<u8> {
        self.driver(slot).map(DriverState::race_number)
    }

    /// Install `driver` at `slot`, discarding any previous occupant.
    pub fn install_driver(&mut self, slot: usize, driver: DriverState) {
        if self.drivers.len() <= slot {
            self.drivers.resize_with(slot + 1, || None);
        }
        self.drivers[slot] = Some(driver);
    }

    /// Occupied slot count.
    pub fn driver_count(&self) -> usize {
        self.drivers.iter().filter(|d| d.is_some()).count()
    }

    /// Forward a session-type reading; a reported change clears the driver
    /// collection (the observable session-reset side effect).
    pub fn update_session_type(&mut self, session_type: u8) -> bool {
        let changed = self.session.update_session_type(session_type);
        if changed {
            self.drivers.clear();
        }
        changed
    }

    /// Discard all per-car state and install a fresh session. This is the
    /// session-start transition.
    pub fn reset(&mut self) {
        self.drivers.clear();
        self.session = SessionState::new();
    }
}
