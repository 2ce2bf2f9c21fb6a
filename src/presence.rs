//! Presence vocabulary reported by the remote service
//!
//! Both enums keep an `Unrecognized` catch-all: the service may add values at
//! any time and the light must still show something defined.

use serde::{Deserialize, Serialize};

/// Coarse availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Available,
    AvailableIdle,
    Away,
    BeRightBack,
    Busy,
    BusyIdle,
    DoNotDisturb,
    Offline,
    PresenceUnknown,
    #[serde(other)]
    Unrecognized,
}

/// Fine-grained activity, which drives the animation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    Available,
    Away,
    BeRightBack,
    Busy,
    DoNotDisturb,
    UrgentInterruptionsOnly,
    InACall,
    InAConferenceCall,
    Inactive,
    InAMeeting,
    Offline,
    OffWork,
    OutOfOffice,
    PresenceUnknown,
    Presenting,
    #[serde(other)]
    Unrecognized,
}

/// Latest known presence, always replaced as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceSample {
    pub availability: Availability,
    pub activity: Activity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values_parse() {
        let activity: Activity = serde_json::from_str("\"InAConferenceCall\"").unwrap();
        assert_eq!(activity, Activity::InAConferenceCall);
        let availability: Availability = serde_json::from_str("\"BusyIdle\"").unwrap();
        assert_eq!(availability, Availability::BusyIdle);
    }

    #[test]
    fn test_new_values_are_unrecognized() {
        let activity: Activity = serde_json::from_str("\"Focusing\"").unwrap();
        assert_eq!(activity, Activity::Unrecognized);
        let availability: Availability = serde_json::from_str("\"Sleeping\"").unwrap();
        assert_eq!(availability, Availability::Unrecognized);
    }
}
