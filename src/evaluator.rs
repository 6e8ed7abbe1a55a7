//! Classification of extracted values against reference ranges

use std::collections::BTreeMap;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::extractor::ExtractedValue;
use crate::ranges::{GoodDirection, ReferenceRange, ReferenceTable, Status};

/// One analysed test value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub test_name: String,
    pub value: f64,
    pub unit: String,
    pub status: Status,
    /// Display range, e.g. "70 - 99 mg/dL"; None when unclassified
    pub range: Option<String>,
    pub direction: Option<GoodDirection>,
    /// Status combined with the good direction, e.g. "high and undesirable"
    pub advisory: String,
    /// Human-readable explanation for the test category
    pub note: String,
}

/// Classify one value. A missing range yields `Status::Unclassified`.
pub fn evaluate(test_name: &str, extracted: &ExtractedValue, range: Option<&ReferenceRange>) -> Evaluation {
    let Some(range) = range else {
        warn!("No reference range for test: {}", test_name);
        return Evaluation {
            test_name: test_name.to_string(),
            value: extracted.value,
            unit: extracted.unit.clone(),
            status: Status::Unclassified,
            range: None,
            direction: None,
            advisory: advisory(Status::Unclassified, GoodDirection::TargetRange).to_string(),
            note: "Unclassified – No reference range is available for this test.".to_string(),
        };
    };

    let status = range.classify(extracted.value);
    Evaluation {
        test_name: range.test_name.clone(),
        value: extracted.value,
        unit: extracted.unit.clone(),
        status,
        range: Some(range.format_range()),
        direction: Some(range.higher_is_better),
        advisory: advisory(status, range.higher_is_better).to_string(),
        note: status_note(&range.test_name, status).to_string(),
    }
}

/// Evaluate every extracted value, in test name order
pub fn evaluate_all(values: &BTreeMap<String, ExtractedValue>, table: &ReferenceTable) -> Vec<Evaluation> {
    values
        .iter()
        .map(|(name, extracted)| evaluate(name, extracted, table.get(name)))
        .collect()
}

/// Whether an out-of-range value is bad news given the test's good direction
pub fn advisory(status: Status, direction: GoodDirection) -> &'static str {
    match (status, direction) {
        (Status::Normal, _) => "within range",
        (Status::Unclassified, _) => "unclassified",
        (Status::High, GoodDirection::HigherIsBetter) => "high and acceptable",
        (Status::High, _) => "high and undesirable",
        (Status::Low, GoodDirection::LowerIsBetter) => "low and acceptable",
        (Status::Low, _) => "low and undesirable",
    }
}

/// Test families that share an explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    BloodSugar,
    Hdl,
    Ldl,
    Lipids,
    Iron,
    Vitamins,
    Thyroid,
    Liver,
    Egfr,
    Kidney,
    BloodCount,
    WhiteCells,
    Other,
}

impl Category {
    fn of(test_name: &str) -> Self {
        let name = test_name.to_lowercase();
        match name.as_str() {
            "glucose" | "hba1c" => Category::BloodSugar,
            "hdl" => Category::Hdl,
            "ldl" => Category::Ldl,
            "total cholesterol" | "triglycerides" => Category::Lipids,
            "iron" | "ferritin" | "tibc" | "transferrin saturation" => Category::Iron,
            "vitamin d" | "vitamin b12" | "folate" => Category::Vitamins,
            "tsh" | "t3" | "t4" | "free t4" | "free t3" => Category::Thyroid,
            "alt" | "ast" | "alp" | "ggt" => Category::Liver,
            "egfr" => Category::Egfr,
            "bun" | "creatinine" => Category::Kidney,
            "hemoglobin" | "hematocrit" | "rbc" => Category::BloodCount,
            "wbc" | "neutrophils" | "lymphocytes" => Category::WhiteCells,
            _ => Category::Other,
        }
    }
}

/// Explanation for a classified value
pub fn status_note(test_name: &str, status: Status) -> &'static str {
    use Status::*;

    match (Category::of(test_name), status) {
        (_, Unclassified) => "Unclassified – No reference range is available for this test.",

        (Category::BloodSugar, Low) => "Low – Blood sugar is below normal. May indicate hypoglycemia or need for dietary adjustment.",
        (Category::BloodSugar, High) => "High – Blood sugar is elevated. Consider diet, exercise, and follow up with your doctor.",
        (Category::BloodSugar, Normal) => "Normal – Blood sugar levels are within healthy range.",

        (Category::Hdl, Low) => "Low – Good cholesterol is low. Consider increasing exercise and healthy fats.",
        (Category::Hdl, _) => "Normal – Good cholesterol levels are adequate.",

        (Category::Ldl, High) => "High – Bad cholesterol is elevated. Consider diet changes and exercise.",
        (Category::Ldl, _) => "Normal – Bad cholesterol is within healthy range.",

        (Category::Lipids, Low) => "Low – Below normal range. Generally good for cardiovascular health.",
        (Category::Lipids, High) => "High – Elevated levels. Consider dietary changes and lifestyle modifications.",
        (Category::Lipids, Normal) => "Normal – Within healthy range for cardiovascular health.",

        (Category::Iron, Low) => "Low – May indicate iron deficiency. Consider iron-rich foods or supplements.",
        (Category::Iron, High) => "High – Elevated iron levels. May need further evaluation for iron overload.",
        (Category::Iron, Normal) => "Normal – Iron levels are within healthy range.",

        (Category::Vitamins, Low) => "Low – Vitamin deficiency detected. Consider supplementation and dietary sources.",
        (Category::Vitamins, High) => "High – Vitamin levels are elevated. Generally not concerning but monitor intake.",
        (Category::Vitamins, Normal) => "Normal – Vitamin levels are adequate.",

        (Category::Thyroid, Low) => "Low – May indicate hyperthyroidism. Consult with your doctor for evaluation.",
        (Category::Thyroid, High) => "High – May indicate hypothyroidism. Follow up with healthcare provider.",
        (Category::Thyroid, Normal) => "Normal – Thyroid function appears normal.",

        (Category::Liver, Low) => "Low – Below normal range. Generally not concerning for liver function.",
        (Category::Liver, High) => "High – Liver enzymes are elevated. May indicate liver stress or damage.",
        (Category::Liver, Normal) => "Normal – Liver function appears normal.",

        (Category::Egfr, Low) => "Low – Kidney function may be reduced. Follow up with your doctor.",
        (Category::Egfr, _) => "Normal – Kidney function appears normal.",

        (Category::Kidney, Low) => "Low – Below normal range. Generally indicates good kidney function.",
        (Category::Kidney, High) => "High – May indicate reduced kidney function. Consult your healthcare provider.",
        (Category::Kidney, Normal) => "Normal – Kidney function markers are within healthy range.",

        (Category::BloodCount, Low) => "Low – May indicate anemia or iron deficiency. Consider iron-rich foods.",
        (Category::BloodCount, High) => "High – Elevated levels. May need further evaluation.",
        (Category::BloodCount, Normal) => "Normal – Blood count is within healthy range.",

        (Category::WhiteCells, Low) => "Low – White blood cell count is low. May indicate infection or immune issue.",
        (Category::WhiteCells, High) => "High – White blood cell count is elevated. May indicate infection or inflammation.",
        (Category::WhiteCells, Normal) => "Normal – Immune system markers are within healthy range.",

        (Category::Other, Low) => "Low – Below normal range. Consider consulting with a healthcare provider.",
        (Category::Other, High) => "High – Above normal range. You may want to follow up with your doctor.",
        (Category::Other, Normal) => "Normal – Within healthy range.",
    }
}

/// Counts by status for one analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub low: usize,
    pub normal: usize,
    pub high: usize,
    pub unclassified: usize,
}

impl StatusCounts {
    pub fn from_evaluations(evaluations: &[Evaluation]) -> Self {
        let mut counts = Self::default();
        for evaluation in evaluations {
            match evaluation.status {
                Status::Low => counts.low += 1,
                Status::Normal => counts.normal += 1,
                Status::High => counts.high += 1,
                Status::Unclassified => counts.unclassified += 1,
            }
        }
        counts
    }

    pub fn abnormal(&self) -> usize {
        self.low + self.high
    }
}

/// One-line summary of an analysis
pub fn summarize(evaluations: &[Evaluation]) -> String {
    let counts = StatusCounts::from_evaluations(evaluations);

    let mut summary = if counts.abnormal() > 0 {
        let mut parts = Vec::new();
        if counts.high > 0 {
            parts.push(format!("{} result(s) above normal range", counts.high));
        }
        if counts.low > 0 {
            parts.push(format!("{} result(s) below normal range", counts.low));
        }
        format!(
            "{}. Consider consulting with a healthcare provider for interpretation.",
            parts.join(" and ")
        )
    } else if counts.normal > 0 {
        "All test results are within normal ranges.".to_string()
    } else {
        "No classified test results.".to_string()
    };

    if counts.unclassified > 0 {
        summary.push_str(&format!(" {} result(s) have no reference range.", counts.unclassified));
    }
    summary
}
