//! One upload through the whole pipeline:
//! extract, evaluate, persist, then compare with the previous session.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::MedMindError;
use crate::evaluator::{evaluate_all, summarize, Evaluation};
use crate::extractor::{extract, RuleSet};
use crate::pdf::UploadedDocument;
use crate::ranges::ReferenceTable;
use crate::storage::Storage;
use crate::trends::{compare, user_stats, Comparison, UserStats};

/// Everything the caller gets back for one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub message: String,
    pub session_id: i64,
    pub filename: String,
    pub total_tests_found: usize,
    pub total_tests_available: usize,
    pub results: Vec<Evaluation>,
    pub comparison: Comparison,
    pub user_stats: UserStats,
    pub timestamp: DateTime<Utc>,
}

/// Read-only inputs shared by every analysis in the process
pub struct Analyzer<'a> {
    table: &'a ReferenceTable,
    rules: &'a RuleSet,
    stable_threshold_pct: f64,
}

impl<'a> Analyzer<'a> {
    pub fn new(table: &'a ReferenceTable, rules: &'a RuleSet, stable_threshold_pct: f64) -> Self {
        Self { table, rules, stable_threshold_pct }
    }

    /// Analyse an extracted document for `user_key`
    pub fn analyze_document(
        &self,
        storage: &mut Storage,
        user_key: &str,
        document: &UploadedDocument,
    ) -> Result<AnalysisReport, MedMindError> {
        self.analyze_text(storage, user_key, &document.filename, &document.text, Utc::now())
    }

    /// Analyse raw report text uploaded at `uploaded_at`.
    /// A report with no recognised values is still recorded.
    pub fn analyze_text(
        &self,
        storage: &mut Storage,
        user_key: &str,
        filename: &str,
        text: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<AnalysisReport, MedMindError> {
        let extracted = extract(text, self.rules);
        let results = evaluate_all(&extracted, self.table);
        let message = summarize(&results);

        let session_id = storage.record_session_at(user_key, filename, &results, uploaded_at)?;
        let comparison = compare(storage, self.table, user_key, self.stable_threshold_pct)?;
        let user_stats = user_stats(storage, user_key)?;

        info!("Successfully analyzed {}: {} tests found", filename, results.len());
        Ok(AnalysisReport {
            message,
            session_id,
            filename: filename.to_string(),
            total_tests_found: results.len(),
            total_tests_available: self.rules.len(),
            results,
            comparison,
            user_stats,
            timestamp: uploaded_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::ranges::Status;
    use crate::trends::Direction;

    const JANUARY: &str = "Glucose: 98 mg/dL\nHDL Cholesterol 45 mg/dL\nLDL Cholesterol 130 mg/dL\n";
    const APRIL: &str = "Glucose: 90 mg/dL\nHDL Cholesterol 52 mg/dL\nLDL Cholesterol 131 mg/dL\n";

    fn at(month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, month, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_first_upload_has_no_comparison() {
        let table = ReferenceTable::builtin().unwrap();
        let rules = RuleSet::from_table(&table).unwrap();
        let analyzer = Analyzer::new(&table, &rules, 5.0);
        let mut storage = Storage::open_in_memory().unwrap();

        let report = analyzer.analyze_text(&mut storage, "u", "jan.pdf", JANUARY, at(1)).unwrap();

        assert_eq!(report.total_tests_found, 3);
        assert_eq!(report.total_tests_available, table.len());
        assert_eq!(report.comparison, Comparison::InsufficientHistory { sessions: 1 });
        assert_eq!(report.user_stats.session_count, 1);
        let ldl = report.results.iter().find(|r| r.test_name == "LDL").unwrap();
        assert_eq!(ldl.status, Status::High);
        assert!(report.message.contains("1 result(s) above normal range"));
    }

    #[test]
    fn test_second_upload_compares_with_previous() {
        let table = ReferenceTable::builtin().unwrap();
        let rules = RuleSet::from_table(&table).unwrap();
        let analyzer = Analyzer::new(&table, &rules, 5.0);
        let mut storage = Storage::open_in_memory().unwrap();

        analyzer.analyze_text(&mut storage, "u", "jan.pdf", JANUARY, at(1)).unwrap();
        let report = analyzer.analyze_text(&mut storage, "u", "apr.pdf", APRIL, at(4)).unwrap();

        let comparison = report.comparison.report().unwrap();
        assert_eq!(comparison.latest.id, report.session_id);
        assert_eq!(comparison.comparisons.len(), 3);

        let direction = |name: &str| {
            comparison.comparisons.iter().find(|c| c.test_name == name).unwrap().direction
        };
        assert_eq!(direction("Glucose"), Direction::Improved);
        assert_eq!(direction("HDL"), Direction::Improved);
        assert_eq!(direction("LDL"), Direction::Stable);
        assert_eq!(report.user_stats.tracking_days, 91);
    }

    #[test]
    fn test_unrecognised_report_is_still_recorded() {
        let table = ReferenceTable::builtin().unwrap();
        let rules = RuleSet::from_table(&table).unwrap();
        let analyzer = Analyzer::new(&table, &rules, 5.0);
        let mut storage = Storage::open_in_memory().unwrap();

        let report = analyzer.analyze_text(&mut storage, "u", "blank.pdf", "nothing here", at(1)).unwrap();
        assert_eq!(report.total_tests_found, 0);
        assert_eq!(storage.get_history("u", 10).unwrap().len(), 1);
    }
}
