//! Immutable infringement records.

use pitwall_telemetry_packets::{PenaltyEvent, SENTINEL_NOT_APPLICABLE};
use serde::{Deserialize, Serialize};

/// A single stewarding decision against a driver.
///
/// Created once from a penalty event and never mutated afterwards. The
/// protocol's 255 sentinel on the optional numeric fields means "not
/// applicable"; such fields are stored as `None` and omitted from
/// serialized output — never as 255 and never coerced to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfringementRecord {
    pub penalty_type: u8,
    pub infringement_type: u8,
    /// Penalty time in seconds, when the penalty carries one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_s: Option<u8>,
    /// Lap the infringement occurred on.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub lap_num: Option<u8>,
    /// Places gained illegally, for track-limit style infringements.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub places_gained: Option<u8>,
}

impl InfringementRecord {
    /// Build a record from a decoded penalty event, applying the sentinel
    /// rule to the optional fields.
    pub fn from_penalty(event: &PenaltyEvent) -> Self {
        Self {
            penalty_type: event.penalty_type,
            infringement_type: event.infringement_type,
            time_s: filter_sentinel(event.time_s),
            lap_num: Some(event.lap_num),
            places_gained: filter_sentinel(event.places_gained),
        }
    }
}

fn filter_sentinel(value: u8) -> Option<u8> {
    if value == SENTINEL_NOT_APPLICABLE {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn penalty(time_s: u8, places_gained: u8) -> PenaltyEvent {
        PenaltyEvent {
            vehicle_index: 4,
            penalty_type: 5,
            infringement_type: 7,
            other_vehicle_index: 255,
            time_s,
            lap_num: 12,
            places_gained,
        }
    }

    #[test]
    fn sentinel_time_is_stored_as_absent() {
        let record = InfringementRecord::from_penalty(&penalty(255, 255));
        assert_eq!(record.time_s, None);
        assert_eq!(record.places_gained, None);
        assert_eq!(record.lap_num, Some(12));
    }

    #[test]
    fn real_time_is_stored_verbatim() {
        let record = InfringementRecord::from_penalty(&penalty(42, 2));
        assert_eq!(record.time_s, Some(42));
        assert_eq!(record.places_gained, Some(2));
    }

    #[test]
    fn zero_is_a_real_value_not_a_sentinel() {
        let record = InfringementRecord::from_penalty(&penalty(0, 0));
        assert_eq!(record.time_s, Some(0));
        assert_eq!(record.places_gained, Some(0));
    }

    #[test]
    fn absent_fields_are_omitted_from_serialized_output() -> TestResult {
        let record = InfringementRecord::from_penalty(&penalty(255, 255));
        let json = serde_json::to_string(&record)?;
        assert!(!json.contains("time_s"), "absent time must be omitted: {json}");
        assert!(!json.contains("places_gained"));
        Ok(())
    }

    #[test]
    fn types_are_assigned_from_their_own_fields() {
        let record = InfringementRecord::from_penalty(&penalty(10, 1));
        assert_eq!(record.penalty_type, 5);
        assert_eq!(record.infringement_type, 7);
    }
}
