//! Sensor tag catalogue
//!
//! Each known tag carries two ranges:
//! - `threshold`: the static anomaly rule (outside = anomalous)
//! - `valid_range`: the sane absolute range accepted at ingestion

use serde::{Deserialize, Serialize};

/// Inclusive numeric range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound (inclusive)
    pub min: f64,
    /// Upper bound (inclusive)
    pub max: f64,
}

impl Bounds {
    /// Create bounds
    #[inline]
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Check if value lies within the bounds
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Check that `min <= max` and both are finite
    #[inline]
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Description of one known sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSpec {
    /// Tag name as sent by the transport
    pub name: String,
    /// Engineering unit
    #[serde(default)]
    pub unit: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Static anomaly rule
    pub threshold: Bounds,
    /// Accepted input range
    pub valid_range: Bounds,
}

impl TagSpec {
    /// Create a tag spec without unit or description
    #[must_use]
    pub fn new(name: impl Into<String>, threshold: Bounds, valid_range: Bounds) -> Self {
        Self {
            name: name.into(),
            unit: String::new(),
            description: String::new(),
            threshold,
            valid_range,
        }
    }

    /// With unit and description
    #[must_use]
    pub fn described(mut self, unit: impl Into<String>, description: impl Into<String>) -> Self {
        self.unit = unit.into();
        self.description = description.into();
        self
    }
}

/// Ordered set of known tags
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagRegistry {
    specs: Vec<TagSpec>,
}

impl TagRegistry {
    /// Build a registry from specs, keeping the given order
    #[inline]
    #[must_use]
    pub fn new(specs: Vec<TagSpec>) -> Self {
        Self { specs }
    }

    /// The three fermenter sensors monitored out of the box
    #[must_use]
    pub fn fermenter_defaults() -> Self {
        Self::new(vec![
            TagSpec::new("fermenter_temp", Bounds::new(35.0, 45.0), Bounds::new(30.0, 50.0))
                .described("Celsius", "Fermenter temperature"),
            TagSpec::new("fermenter_ph", Bounds::new(6.0, 8.0), Bounds::new(5.0, 9.0))
                .described("pH", "Fermenter pH level"),
            TagSpec::new("agitator_rpm", Bounds::new(250.0, 650.0), Bounds::new(200.0, 700.0))
                .described("RPM", "Agitator rotation speed"),
        ])
    }

    /// Look up a tag by name
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TagSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Check if a tag is known
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Tag names in registry order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    /// Iterate over specs
    pub fn iter(&self) -> impl Iterator<Item = &TagSpec> {
        self.specs.iter()
    }

    /// Number of known tags
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Check if no tags are known
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_inclusive() {
        let b = Bounds::new(6.0, 8.0);
        assert!(b.contains(6.0));
        assert!(b.contains(8.0));
        assert!(!b.contains(8.01));
        assert!(!b.contains(f64::NAN));
    }

    #[test]
    fn bounds_well_formed() {
        assert!(Bounds::new(1.0, 1.0).is_well_formed());
        assert!(!Bounds::new(2.0, 1.0).is_well_formed());
        assert!(!Bounds::new(f64::NEG_INFINITY, 1.0).is_well_formed());
    }

    #[test]
    fn defaults_cover_fermenter_tags() {
        let registry = TagRegistry::fermenter_defaults();
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.names(),
            vec!["fermenter_temp", "fermenter_ph", "agitator_rpm"]
        );

        let temp = registry.get("fermenter_temp").unwrap();
        assert_eq!(temp.threshold, Bounds::new(35.0, 45.0));
        assert_eq!(temp.unit, "Celsius");
        assert!(!registry.contains("unknown_sensor"));
    }
}
