//! Monitor configuration.
//!
//! Everything here is fixed at startup. Defaults reproduce the stock OpenBMC
//! example: two temperature sensors and a chassis power-off on assertion.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::registry::WatchRegistry;

/// Standard D-Bus properties interface.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Signal emitted on [`PROPERTIES_INTERFACE`] when properties change.
pub const PROPERTIES_CHANGED_MEMBER: &str = "PropertiesChanged";

/// Interface carrying the critical threshold alarm properties.
pub const CRITICAL_THRESHOLD_INTERFACE: &str = "xyz.openbmc_project.Sensor.Threshold.Critical";

/// libdbus default method call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// Which message bus to connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

/// The property write sent to the state controller on assertion.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    /// Bus name of the state controller.
    pub service: String,
    pub object_path: String,
    /// Interface owning `property`.
    pub interface: String,
    pub property: String,
    /// String value written into `property`.
    pub value: String,
}

impl TransitionRequest {
    /// Request a chassis power-off.
    #[must_use]
    pub fn chassis_power_off() -> Self {
        Self {
            service: "xyz.openbmc_project.State.Chassis".to_string(),
            object_path: "/xyz/openbmc_project/state/chassis0".to_string(),
            interface: "xyz.openbmc_project.State.Chassis".to_string(),
            property: "RequestedPowerTransition".to_string(),
            value: "xyz.openbmc_project.State.Chassis.Transition.Off".to_string(),
        }
    }
}

impl Default for TransitionRequest {
    fn default() -> Self {
        Self::chassis_power_off()
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interface whose property changes are classified.
    pub watched_interface: String,
    pub registry: WatchRegistry,
    pub action: TransitionRequest,
    pub bus: BusKind,
    /// Upper bound on one state controller call.
    #[serde(with = "duration_ms")]
    pub call_timeout: Duration,
    /// Log the transition request instead of sending it.
    pub dry_run: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watched_interface: CRITICAL_THRESHOLD_INTERFACE.to_string(),
            registry: WatchRegistry::default(),
            action: TransitionRequest::default(),
            bus: BusKind::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            dry_run: false,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
