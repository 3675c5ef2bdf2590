//! Watch registry: which sensors are monitored, and for which thresholds.
//!
//! The registry is built once at startup and is read-only afterwards, so it can
//! be shared behind an `Arc` without locking.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Critical threshold kinds a sensor can be watched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Upper critical threshold.
    High,
    /// Lower critical threshold.
    Low,
}

impl Threshold {
    /// All threshold kinds.
    pub const ALL: [Self; 2] = [Self::High, Self::Low];

    /// The property that signals this threshold on the critical interface.
    #[must_use]
    pub const fn property_name(self) -> &'static str {
        match self {
            Self::High => "CriticalAlarmHigh",
            Self::Low => "CriticalAlarmLow",
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Low => f.write_str("low"),
        }
    }
}

impl FromStr for Threshold {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            other => Err(ConfigError::UnknownThreshold(other.to_string())),
        }
    }
}

/// One monitored entity and the properties it is watched for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedEntity {
    identifier: String,
    watched_properties: BTreeSet<String>,
}

impl WatchedEntity {
    /// Create an entity watched for the given property names.
    pub fn new<I, S>(identifier: impl Into<String>, properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identifier = identifier.into();
        let watched_properties: BTreeSet<String> = properties.into_iter().map(Into::into).collect();
        if watched_properties.is_empty() {
            return Err(ConfigError::EmptyWatchedProperties { identifier });
        }
        Ok(Self {
            identifier,
            watched_properties,
        })
    }

    /// Create an entity watched for the given threshold kinds.
    pub fn with_thresholds(
        identifier: impl Into<String>,
        thresholds: &[Threshold],
    ) -> Result<Self, ConfigError> {
        Self::new(identifier, thresholds.iter().map(|t| t.property_name()))
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn watched_properties(&self) -> impl Iterator<Item = &str> {
        self.watched_properties.iter().map(String::as_str)
    }

    /// True iff `property` is one of this entity's watched properties.
    #[must_use]
    pub fn watches(&self, property: &str) -> bool {
        self.watched_properties.contains(property)
    }
}

impl FromStr for WatchedEntity {
    type Err = ConfigError;

    /// Parse `PATH=high,low`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidWatchSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (path, kinds) = spec
            .split_once('=')
            .ok_or_else(|| invalid("expected PATH=THRESHOLDS"))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut thresholds = Vec::new();
        for kind in kinds.split(',').filter(|k| !k.trim().is_empty()) {
            thresholds.push(kind.parse::<Threshold>()?);
        }

        Self::with_thresholds(path, &thresholds)
    }
}

/// Immutable lookup table of watched entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WatchedEntity>", into = "Vec<WatchedEntity>")]
pub struct WatchRegistry {
    entities: Vec<WatchedEntity>,
    index: HashMap<String, usize>,
}

impl WatchRegistry {
    /// Build a registry, rejecting duplicate identifiers.
    pub fn new(entities: Vec<WatchedEntity>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            // Deserialized entities bypass `WatchedEntity::new`.
            if entity.watched_properties.is_empty() {
                return Err(ConfigError::EmptyWatchedProperties {
                    identifier: entity.identifier.clone(),
                });
            }
            if index.insert(entity.identifier.clone(), i).is_some() {
                return Err(ConfigError::DuplicateEntity {
                    identifier: entity.identifier.clone(),
                });
            }
        }
        Ok(Self { entities, index })
    }

    /// Exact-match lookup. No prefix or namespace matching.
    #[must_use]
    pub fn lookup(&self, identifier: &str) -> Option<&WatchedEntity> {
        self.index.get(identifier).map(|&i| &self.entities[i])
    }

    #[must_use]
    pub fn is_watched_property(&self, entity: &WatchedEntity, property: &str) -> bool {
        entity.watches(property)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedEntity> {
        self.entities.iter()
    }
}

impl Default for WatchRegistry {
    /// Temp1 is watched for both critical thresholds, Temp2 only for the high one.
    fn default() -> Self {
        let entities = vec![
            WatchedEntity {
                identifier: "/xyz/openbmc_project/sensors/temperature/Temp1".to_string(),
                watched_properties: Threshold::ALL
                    .iter()
                    .map(|t| t.property_name().to_string())
                    .collect(),
            },
            WatchedEntity {
                identifier: "/xyz/openbmc_project/sensors/temperature/Temp2".to_string(),
                watched_properties: BTreeSet::from([Threshold::High.property_name().to_string()]),
            },
        ];
        let index = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.identifier.clone(), i))
            .collect();
        Self { entities, index }
    }
}

impl TryFrom<Vec<WatchedEntity>> for WatchRegistry {
    type Error = ConfigError;

    fn try_from(entities: Vec<WatchedEntity>) -> Result<Self, Self::Error> {
        Self::new(entities)
    }
}

impl From<WatchRegistry> for Vec<WatchedEntity> {
    fn from(registry: WatchRegistry) -> Self {
        registry.entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMP1: &str = "/xyz/openbmc_project/sensors/temperature/Temp1";
    const TEMP2: &str = "/xyz/openbmc_project/sensors/temperature/Temp2";

    #[test]
    fn default_table_matches_sensor_config() {
        let reg = WatchRegistry::default();
        assert_eq!(reg.len(), 2);

        let t1 = reg.lookup(TEMP1).unwrap();
        assert!(t1.watches("CriticalAlarmHigh"));
        assert!(t1.watches("CriticalAlarmLow"));

        let t2 = reg.lookup(TEMP2).unwrap();
        assert!(reg.is_watched_property(t2, "CriticalAlarmHigh"));
        assert!(!reg.is_watched_property(t2, "CriticalAlarmLow"));
    }

    #[test]
    fn lookup_is_exact_match() {
        let reg = WatchRegistry::default();
        assert!(reg.lookup("/xyz/openbmc_project/sensors/temperature").is_none());
        assert!(reg.lookup("/xyz/openbmc_project/sensors/temperature/Temp1/").is_none());
        assert!(reg.lookup("").is_none());
    }

    #[test]
    fn empty_properties_rejected() {
        let err = WatchedEntity::new("/a", Vec::<String>::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyWatchedProperties {
                identifier: "/a".to_string()
            }
        );
    }

    #[test]
    fn duplicate_identifier_rejected() {
        let a = WatchedEntity::with_thresholds("/a", &[Threshold::High]).unwrap();
        let b = WatchedEntity::with_thresholds("/a", &[Threshold::Low]).unwrap();
        let err = WatchRegistry::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEntity { .. }));
    }

    #[test]
    fn parse_watch_spec() {
        let e: WatchedEntity = "/sensors/Temp3=high, LOW".parse().unwrap();
        assert_eq!(e.identifier(), "/sensors/Temp3");
        assert_eq!(
            e.watched_properties().collect::<Vec<_>>(),
            vec!["CriticalAlarmHigh", "CriticalAlarmLow"]
        );

        assert!(matches!(
            "/sensors/Temp3".parse::<WatchedEntity>(),
            Err(ConfigError::InvalidWatchSpec { .. })
        ));
        assert!(matches!(
            "/sensors/Temp3=".parse::<WatchedEntity>(),
            Err(ConfigError::EmptyWatchedProperties { .. })
        ));
        assert!(matches!(
            "/sensors/Temp3=warning".parse::<WatchedEntity>(),
            Err(ConfigError::UnknownThreshold(_))
        ));
    }

    #[test]
    fn serde_rejects_duplicates() {
        let json = serde_json::json!([
            {"identifier": "/a", "watched_properties": ["CriticalAlarmHigh"]},
            {"identifier": "/a", "watched_properties": ["CriticalAlarmLow"]}
        ]);
        assert!(serde_json::from_value::<WatchRegistry>(json).is_err());
    }

    #[test]
    fn serde_rejects_empty_properties() {
        let json = serde_json::json!([{"identifier": "/a", "watched_properties": []}]);
        assert!(serde_json::from_value::<WatchRegistry>(json).is_err());
    }

    #[test]
    fn serde_roundtrip_default() {
        let reg = WatchRegistry::default();
        let json = serde_json::to_value(&reg).unwrap();
        let back: WatchRegistry = serde_json::from_value(json).unwrap();
        assert_eq!(back, reg);
    }
}
