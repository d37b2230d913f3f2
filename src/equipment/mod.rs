use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a monitored point (e.g., "turbine_temperature")
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EquipmentTag(String);

impl EquipmentTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EquipmentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EquipmentTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for EquipmentTag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl Borrow<str> for EquipmentTag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Legal value range of one equipment tag
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquipmentProfile {
    pub min: f64,
    pub max: f64,
}

impl EquipmentProfile {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Both bounds finite and `min <= max`
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

const TEMPERATURE: EquipmentProfile = EquipmentProfile::new(30.0, 50.0);
const HUMIDITY: EquipmentProfile = EquipmentProfile::new(40.0, 70.0);
const PRESSURE: EquipmentProfile = EquipmentProfile::new(12.0, 16.0);

const STANDARD_EQUIPMENT: [&str; 4] = ["turbine", "booster", "engine", "main_valve"];

/// Immutable table of every known tag and its profile.
///
/// Iteration order is the sorted tag order, which is also the order
/// entities take in a freshly synthesized checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    profiles: BTreeMap<EquipmentTag, EquipmentProfile>,
}

impl ProfileTable {
    pub fn new(profiles: impl IntoIterator<Item = (EquipmentTag, EquipmentProfile)>) -> Self {
        Self {
            profiles: profiles.into_iter().collect(),
        }
    }

    pub fn get(&self, tag: &str) -> Option<&EquipmentProfile> {
        self.profiles.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.profiles.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &EquipmentTag> {
        self.profiles.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EquipmentTag, &EquipmentProfile)> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileTable {
    /// Temperature, humidity and pressure points for the four standard machines
    fn default() -> Self {
        let profiles = STANDARD_EQUIPMENT.iter().flat_map(|equipment| {
            [
                ("temperature", TEMPERATURE),
                ("humidity", HUMIDITY),
                ("pressure", PRESSURE),
            ]
            .into_iter()
            .map(move |(measure, profile)| {
                (EquipmentTag::new(format!("{}_{}", equipment, measure)), profile)
            })
        });
        Self::new(profiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_standard_tags() {
        let table = ProfileTable::default();
        assert_eq!(table.len(), 12);
        assert_eq!(
            table.get("turbine_temperature"),
            Some(&EquipmentProfile::new(30.0, 50.0))
        );
        assert_eq!(
            table.get("main_valve_humidity"),
            Some(&EquipmentProfile::new(40.0, 70.0))
        );
        assert_eq!(
            table.get("booster_pressure"),
            Some(&EquipmentProfile::new(12.0, 16.0))
        );
        assert!(table.get("unknown_sensor").is_none());
    }

    #[test]
    fn test_tags_iterate_sorted() {
        let table = ProfileTable::default();
        let tags: Vec<&str> = table.tags().map(|t| t.as_str()).collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
        assert_eq!(tags[0], "booster_humidity");
    }

    #[test]
    fn test_profile_validity() {
        assert!(EquipmentProfile::new(12.0, 16.0).is_valid());
        assert!(EquipmentProfile::new(5.0, 5.0).is_valid());
        assert!(!EquipmentProfile::new(16.0, 12.0).is_valid());
        assert!(!EquipmentProfile::new(f64::NAN, 12.0).is_valid());
        assert!(!EquipmentProfile::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_table_deserializes_from_toml() {
        let toml = r#"
            [pump_flow]
            min = 1.5
            max = 3.0
        "#;

        let table: ProfileTable = toml::from_str(toml).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("pump_flow"), Some(&EquipmentProfile::new(1.5, 3.0)));
    }
}
