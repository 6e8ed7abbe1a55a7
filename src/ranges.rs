//! Reference range table
//!
//! Static mapping from test name to its clinically normal interval and the
//! direction in which a change counts as an improvement. Loaded once at
//! startup and passed by reference to the extractor, evaluator and trend
//! engine. Lookups ignore case.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::MedMindError;

/// Built-in reference data used when no ranges file is configured
const BUILTIN_RANGES: &str = include_str!("../data/ranges.json");

/// Which direction of change is good for a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GoodDirection {
    /// A decrease is an improvement (glucose, LDL)
    #[serde(rename = "lower")]
    LowerIsBetter,
    /// An increase is an improvement (HDL, eGFR)
    #[serde(rename = "higher")]
    HigherIsBetter,
    /// Only staying inside the interval matters
    #[serde(rename = "range")]
    #[default]
    TargetRange,
}

impl GoodDirection {
    pub fn label(self) -> &'static str {
        match self {
            GoodDirection::LowerIsBetter => "lower is better",
            GoodDirection::HigherIsBetter => "higher is better",
            GoodDirection::TargetRange => "target range",
        }
    }
}

/// Classification of a single value against its range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Low,
    Normal,
    High,
    /// No reference range is known for the test
    Unclassified,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Low => "low",
            Status::Normal => "normal",
            Status::High => "high",
            Status::Unclassified => "unclassified",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Low => "Low",
            Status::Normal => "Normal",
            Status::High => "High",
            Status::Unclassified => "Unclassified",
        }
    }

    pub fn is_abnormal(self) -> bool {
        matches!(self, Status::Low | Status::High)
    }
}

impl std::str::FromStr for Status {
    type Err = MedMindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Status::Low),
            "normal" => Ok(Status::Normal),
            "high" => Ok(Status::High),
            "unclassified" => Ok(Status::Unclassified),
            other => Err(MedMindError::InvalidStatus(other.to_string())),
        }
    }
}

/// Clinically normal interval for one test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    pub test_name: String,
    pub unit: String,
    pub low: f64,
    pub high: f64,
    pub higher_is_better: GoodDirection,
}

impl ReferenceRange {
    /// Classify a value: below low is Low, above high is High, bounds inclusive
    pub fn classify(&self, value: f64) -> Status {
        if value < self.low {
            Status::Low
        } else if value > self.high {
            Status::High
        } else {
            Status::Normal
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    /// Display string such as "70 - 99 mg/dL"
    pub fn format_range(&self) -> String {
        format!("{} - {} {}", self.low, self.high, self.unit)
    }
}

/// Entry as it appears in the JSON reference file
#[derive(Debug, Deserialize)]
struct RangeEntry {
    low: f64,
    high: f64,
    unit: String,
    #[serde(default)]
    higher_is_better: GoodDirection,
}

/// Read-only table of reference ranges keyed by lowercase test name
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    ranges: BTreeMap<String, ReferenceRange>,
}

impl ReferenceTable {
    /// The table compiled into the binary
    pub fn builtin() -> Result<Self, MedMindError> {
        Self::from_json(BUILTIN_RANGES)
    }

    /// Load a reference file `{name: {low, high, unit, higher_is_better}}`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, MedMindError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let table = Self::from_json(&contents)?;
        info!("Loaded {} reference ranges from {}", table.len(), path.as_ref().display());
        Ok(table)
    }

    pub fn from_json(json: &str) -> Result<Self, MedMindError> {
        let entries: BTreeMap<String, RangeEntry> = serde_json::from_str(json)?;
        let ranges = entries.into_iter().map(|(test_name, entry)| ReferenceRange {
            test_name,
            unit: entry.unit,
            low: entry.low,
            high: entry.high,
            higher_is_better: entry.higher_is_better,
        });
        Self::from_ranges(ranges)
    }

    /// Build a table, rejecting empty names, inverted bounds and duplicates
    pub fn from_ranges<I>(ranges: I) -> Result<Self, MedMindError>
    where
        I: IntoIterator<Item = ReferenceRange>,
    {
        let mut table = BTreeMap::new();
        for range in ranges {
            let name = range.test_name.trim();
            if name.is_empty() {
                return Err(MedMindError::InvalidReferenceData("empty test name".into()));
            }
            if !range.low.is_finite() || !range.high.is_finite() || range.low > range.high {
                return Err(MedMindError::InvalidReferenceData(format!(
                    "{}: invalid bounds {} - {}",
                    name, range.low, range.high
                )));
            }
            let key = name.to_lowercase();
            if table.contains_key(&key) {
                return Err(MedMindError::InvalidReferenceData(format!(
                    "duplicate test name: {}",
                    name
                )));
            }
            table.insert(key, ReferenceRange { test_name: name.to_string(), ..range });
        }
        Ok(Self { ranges: table })
    }

    /// Case-insensitive lookup
    pub fn get(&self, test_name: &str) -> Option<&ReferenceRange> {
        self.ranges.get(&test_name.trim().to_lowercase())
    }

    pub fn contains(&self, test_name: &str) -> bool {
        self.get(test_name).is_some()
    }

    /// Direction for a test, target range when unknown
    pub fn direction(&self, test_name: &str) -> GoodDirection {
        self.get(test_name)
            .map(|r| r.higher_is_better)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceRange> {
        self.ranges.values()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_loads() {
        let table = ReferenceTable::builtin().unwrap();
        assert!(table.len() > 30);

        let glucose = table.get("glucose").unwrap();
        assert_eq!(glucose.test_name, "Glucose");
        assert_eq!(glucose.unit, "mg/dL");
        assert_eq!(glucose.higher_is_better, GoodDirection::LowerIsBetter);
        assert_eq!(table.direction("HDL"), GoodDirection::HigherIsBetter);
    }

    #[test]
    fn test_lookup_ignores_case() {
        let table = ReferenceTable::builtin().unwrap();
        assert!(table.contains("TOTAL CHOLESTEROL"));
        assert!(table.contains("  hba1c "));
        assert!(!table.contains("Unobtainium"));
        assert_eq!(table.direction("Unobtainium"), GoodDirection::TargetRange);
    }

    #[test]
    fn test_classify_every_builtin_range() {
        let table = ReferenceTable::builtin().unwrap();
        for range in table.iter() {
            assert_eq!(range.classify(range.low - 1.0), Status::Low, "{}", range.test_name);
            assert_eq!(range.classify(range.high + 1.0), Status::High, "{}", range.test_name);
            assert_eq!(range.classify(range.midpoint()), Status::Normal, "{}", range.test_name);
        }
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let table = ReferenceTable::builtin().unwrap();
        let sodium = table.get("Sodium").unwrap();
        assert_eq!(sodium.classify(135.0), Status::Normal);
        assert_eq!(sodium.classify(145.0), Status::Normal);
    }

    #[test]
    fn test_direction_defaults_to_target_range() {
        let table = ReferenceTable::from_json(
            r#"{"Ferritin": {"low": 24, "high": 336, "unit": "ng/mL"}}"#,
        ).unwrap();
        assert_eq!(table.direction("ferritin"), GoodDirection::TargetRange);
        assert_eq!(table.get("FERRITIN").unwrap().format_range(), "24 - 336 ng/mL");
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let result = ReferenceTable::from_json(
            r#"{"Glucose": {"low": 120, "high": 70, "unit": "mg/dL"}}"#,
        );
        assert!(matches!(result, Err(MedMindError::InvalidReferenceData(_))));
    }

    #[test]
    fn test_rejects_case_insensitive_duplicates() {
        let result = ReferenceTable::from_json(
            r#"{"LDL": {"low": 0, "high": 100, "unit": "mg/dL"},
                "ldl": {"low": 0, "high": 130, "unit": "mg/dL"}}"#,
        );
        assert!(matches!(result, Err(MedMindError::InvalidReferenceData(_))));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [Status::Low, Status::Normal, Status::High, Status::Unclassified] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("weird".parse::<Status>().is_err());
    }
}
