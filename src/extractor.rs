//! Lab value extraction from report text
//!
//! Each recognised test has an [`ExtractionRule`]: an ordered list of
//! compiled patterns, each with exactly one capture group holding the
//! number. Patterns are tried in declared order and the first one that
//! yields a parseable value wins. Within a pattern the leftmost occurrence
//! wins, so a test printed twice keeps its first value.

use std::collections::BTreeMap;
use log::{debug, info, warn};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::MedMindError;
use crate::ranges::ReferenceTable;

/// Numeric capture shared by every generated pattern
const NUMBER: &str = r"(\d+(?:\.\d+)?)";

/// Aliases this short or shorter must match with exact case
const SHORT_ALIAS_LEN: usize = 2;

/// Alternative spellings printed by common labs, canonical name first
const ALIASES: &[(&str, &[&str])] = &[
    ("Hemoglobin", &["Hemoglobin", "Haemoglobin", "HGB", "Hgb", "Hb"]),
    ("Hematocrit", &["Hematocrit", "Haematocrit", "HCT", "Hct"]),
    ("RBC", &["RBC", "Red Blood Cells", "Red Blood Cell", "Erythrocytes"]),
    ("WBC", &["WBC", "White Blood Cells", "White Blood Cell", "Leukocytes"]),
    ("Platelets", &["Platelets", "Platelet Count", "PLT", "Thrombocytes"]),
    ("MCV", &["MCV", "Mean Corpuscular Volume"]),
    ("MCH", &["MCH", "Mean Corpuscular Hemoglobin"]),
    ("MCHC", &["MCHC", "Mean Corpuscular Hemoglobin Concentration"]),
    ("Neutrophils", &["Neutrophils", "Neut", "PMN"]),
    ("Lymphocytes", &["Lymphocytes", "Lymph", "LYM"]),
    ("Glucose", &["Glucose", "GLU", "Blood Sugar"]),
    ("HbA1c", &["HbA1c", "A1C", "Hemoglobin A1c", "Glycated Hemoglobin"]),
    ("BUN", &["BUN", "Blood Urea Nitrogen", "Urea"]),
    ("Creatinine", &["Creatinine", "CREAT", "Cr"]),
    ("eGFR", &["eGFR", "Estimated GFR", "GFR"]),
    ("Sodium", &["Sodium", "Na"]),
    ("Potassium", &["Potassium", "K+"]),
    ("Chloride", &["Chloride", "Cl"]),
    ("Calcium", &["Calcium", "Ca"]),
    ("Albumin", &["Albumin", "ALB"]),
    ("Total Protein", &["Total Protein", "Protein Total", "Protein, Total"]),
    ("Bilirubin Total", &["Bilirubin Total", "Total Bilirubin", "Bilirubin, Total", "TBIL", "T Bil"]),
    ("ALT", &["ALT", "SGPT", "Alanine Aminotransferase"]),
    ("AST", &["AST", "SGOT", "Aspartate Aminotransferase"]),
    ("ALP", &["ALP", "Alkaline Phosphatase", "Alk Phos"]),
    ("GGT", &["GGT", "Gamma GT", "Gamma Glutamyl Transferase"]),
    ("Total Cholesterol", &["Total Cholesterol", "Cholesterol, Total", "Cholesterol Total", "CHOL"]),
    ("HDL", &["HDL Cholesterol", "HDL-C", "HDL", "Good Cholesterol"]),
    ("LDL", &["LDL Cholesterol", "LDL-C", "LDL", "Bad Cholesterol"]),
    ("Triglycerides", &["Triglycerides", "TRIG", "TG"]),
    ("TSH", &["TSH", "Thyroid Stimulating Hormone"]),
    ("Free T4", &["Free T4", "FT4", "T4 Free"]),
    ("Iron", &["Serum Iron", "Iron", "Fe"]),
    ("Ferritin", &["Ferritin"]),
    ("Vitamin D", &["Vitamin D", "25-OH Vitamin D", "25(OH)D", "Vit D"]),
    ("Vitamin B12", &["Vitamin B12", "Vit B12", "Cobalamin", "B12"]),
    ("Folate", &["Folate", "Folic Acid"]),
    ("CRP", &["CRP", "C-Reactive Protein", "C Reactive Protein"]),
    ("Uric Acid", &["Uric Acid", "Urate"]),
];

/// A value pulled out of the report text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedValue {
    pub value: f64,
    pub unit: String,
}

/// Ordered patterns for one test name
#[derive(Debug, Clone)]
pub struct ExtractionRule {
    pub test_name: String,
    pub unit: String,
    patterns: Vec<Regex>,
}

impl ExtractionRule {
    /// Generate the standard pattern ladder for each alias, aliases in order
    pub fn from_aliases(test_name: &str, unit: &str, aliases: &[&str]) -> Result<Self, MedMindError> {
        let mut patterns = Vec::with_capacity(aliases.len() * 3);
        for alias in aliases {
            for source in alias_patterns(alias) {
                let case_insensitive = alias.chars().count() > SHORT_ALIAS_LEN;
                patterns.push(
                    RegexBuilder::new(&source)
                        .case_insensitive(case_insensitive)
                        .build()?,
                );
            }
        }
        Ok(Self { test_name: test_name.to_string(), unit: unit.to_string(), patterns })
    }

    /// Rule from hand-written patterns; each needs one capture group
    pub fn from_patterns(test_name: &str, unit: &str, sources: &[&str]) -> Result<Self, MedMindError> {
        let patterns = sources
            .iter()
            .map(|source| Regex::new(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { test_name: test_name.to_string(), unit: unit.to_string(), patterns })
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// First parseable value, trying patterns in order
    pub fn find(&self, text: &str) -> Option<f64> {
        self.patterns.iter().find_map(|pattern| {
            pattern
                .captures_iter(text)
                .filter_map(|caps| caps.get(1))
                .find_map(|m| m.as_str().parse::<f64>().ok().filter(|v| v.is_finite()))
        })
    }
}

/// Pattern ladder for one alias, most specific first:
/// `alias: 5.2`, `alias 5.2`, then `alias (fasting) ... 5.2` on the same line.
fn alias_patterns(alias: &str) -> [String; 3] {
    let escaped = regex::escape(alias);
    let starts_word = alias.chars().next().is_some_and(is_word_char);
    let ends_word = alias.chars().last().is_some_and(is_word_char);
    let head = if starts_word { r"\b" } else { "" };
    let tail = if ends_word { r"\b" } else { "" };
    let number = NUMBER;

    [
        format!(r"{head}{escaped}\s*[:=]\s*{number}"),
        format!(r"{head}{escaped}[ \t]+(?:-[ \t]+)?{number}"),
        format!(r"{head}{escaped}{tail}[^\n\d]*?\b{number}"),
    ]
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Aliases for a test name, falling back to the name itself
pub fn aliases_for(test_name: &str) -> Vec<&str> {
    ALIASES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(test_name))
        .map(|(_, aliases)| aliases.to_vec())
        .unwrap_or_else(|| vec![test_name])
}

/// The full extraction table, one rule per test
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ExtractionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ExtractionRule>) -> Self {
        Self { rules }
    }

    /// One rule per reference range, units taken from the table
    pub fn from_table(table: &ReferenceTable) -> Result<Self, MedMindError> {
        let rules = table
            .iter()
            .map(|range| {
                let aliases = aliases_for(&range.test_name);
                ExtractionRule::from_aliases(&range.test_name, &range.unit, &aliases)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Built {} extraction rules", rules.len());
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ExtractionRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Extract every recognised test from `text`. Tests with no match are absent.
pub fn extract(text: &str, rules: &RuleSet) -> BTreeMap<String, ExtractedValue> {
    let mut found = BTreeMap::new();

    for rule in rules.rules() {
        match rule.find(text) {
            Some(value) => {
                debug!("Extracted {} = {} {}", rule.test_name, value, rule.unit);
                found
                    .entry(rule.test_name.clone())
                    .or_insert(ExtractedValue { value, unit: rule.unit.clone() });
            }
            None => warn!("Could not find value for test: {}", rule.test_name),
        }
    }

    info!("Parsed {} out of {} tests", found.len(), rules.len());
    found
}
