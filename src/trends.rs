//! Trend engine: latest-vs-previous comparison and per-test trends
//!
//! Everything here is computed on read from the session store. The user
//! key is threaded through every call; nothing is cached between requests.

use std::collections::BTreeMap;
use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::MedMindError;
use crate::ranges::{GoodDirection, ReferenceTable, Status};
use crate::stats::SeriesStats;
use crate::storage::{Storage, TestSession, TestValue};

/// Percentage changes this close to zero are always stable
const CHANGE_EPSILON: f64 = 1e-9;

/// Whether a change is good news for the test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Improved,
    Worsened,
    Stable,
}

/// Raw direction of a change, regardless of whether it is good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    Increased,
    Decreased,
    Stable,
}

/// Verdict over all compared tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallTrend {
    Improving,
    Concerning,
    Mixed,
}

/// Percentage change from `old` to `new`, None when `old` is zero
pub fn pct_change(old: f64, new: f64) -> Option<f64> {
    if old == 0.0 {
        None
    } else {
        Some((new - old) / old * 100.0)
    }
}

fn is_stable(pct_change: f64, stable_threshold_pct: f64) -> bool {
    let magnitude = pct_change.abs();
    magnitude < CHANGE_EPSILON || magnitude < stable_threshold_pct
}

/// Movement of a percentage change
pub fn movement(pct_change: f64, stable_threshold_pct: f64) -> Movement {
    if is_stable(pct_change, stable_threshold_pct) {
        Movement::Stable
    } else if pct_change > 0.0 {
        Movement::Increased
    } else {
        Movement::Decreased
    }
}

/// Judge a percentage change against the test's good direction.
/// Target-range tests have no good direction, so any real change is worse.
pub fn classify_change(pct_change: f64, direction: GoodDirection, stable_threshold_pct: f64) -> Direction {
    match (movement(pct_change, stable_threshold_pct), direction) {
        (Movement::Stable, _) => Direction::Stable,
        (Movement::Decreased, GoodDirection::LowerIsBetter) => Direction::Improved,
        (Movement::Increased, GoodDirection::HigherIsBetter) => Direction::Improved,
        _ => Direction::Worsened,
    }
}

/// One test present in both compared sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestComparison {
    pub test_name: String,
    pub previous_value: f64,
    pub latest_value: f64,
    pub unit: String,
    pub change: f64,
    pub pct_change: f64,
    pub movement: Movement,
    pub direction: Direction,
    pub previous_status: Status,
    pub latest_status: Status,
}

/// Latest session against the one before it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub latest: TestSession,
    pub previous: TestSession,
    pub days_between: i64,
    pub overall: OverallTrend,
    pub summary: String,
    pub improved: usize,
    pub worsened: usize,
    pub stable: usize,
    /// Sorted by absolute percentage change, largest first
    pub comparisons: Vec<TestComparison>,
}

/// Outcome of a comparison request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Comparison {
    /// Fewer than two sessions stored for the user
    InsufficientHistory { sessions: usize },
    Report(ComparisonReport),
}

impl Comparison {
    pub fn report(&self) -> Option<&ComparisonReport> {
        match self {
            Comparison::Report(report) => Some(report),
            Comparison::InsufficientHistory { .. } => None,
        }
    }
}

/// Compare the two most recent sessions of a user
pub fn compare(
    storage: &Storage,
    table: &ReferenceTable,
    user_key: &str,
    stable_threshold_pct: f64,
) -> Result<Comparison, MedMindError> {
    let mut sessions = storage.get_history(user_key, 2)?;
    if sessions.len() < 2 {
        return Ok(Comparison::InsufficientHistory { sessions: sessions.len() });
    }
    let previous = sessions.remove(1);
    let latest = sessions.remove(0);

    let latest_values = by_lowercase_name(storage.get_values(latest.id)?);
    let previous_values = by_lowercase_name(storage.get_values(previous.id)?);

    let mut comparisons = Vec::new();
    for (key, new) in &latest_values {
        let Some(old) = previous_values.get(key) else {
            continue;
        };
        let Some(pct) = pct_change(old.value, new.value) else {
            debug!("Skipping {}: previous value is zero", new.test_name);
            continue;
        };
        comparisons.push(TestComparison {
            test_name: new.test_name.clone(),
            previous_value: old.value,
            latest_value: new.value,
            unit: new.unit.clone(),
            change: new.value - old.value,
            pct_change: pct,
            movement: movement(pct, stable_threshold_pct),
            direction: classify_change(pct, table.direction(&new.test_name), stable_threshold_pct),
            previous_status: old.status,
            latest_status: new.status,
        });
    }

    comparisons.sort_by(|a, b| {
        b.pct_change.abs()
            .partial_cmp(&a.pct_change.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let count = |d: Direction| comparisons.iter().filter(|c| c.direction == d).count();
    let improved = count(Direction::Improved);
    let worsened = count(Direction::Worsened);
    let stable = count(Direction::Stable);

    let (overall, summary) = if improved > worsened {
        (
            OverallTrend::Improving,
            format!("Great progress! {} tests improved, {} need attention.", improved, worsened),
        )
    } else if worsened > improved {
        (
            OverallTrend::Concerning,
            format!("Monitor closely. {} tests worsened, {} improved.", worsened, improved),
        )
    } else {
        (
            OverallTrend::Mixed,
            format!("Mixed results. {} improved, {} worsened, {} stable.", improved, worsened, stable),
        )
    };

    Ok(Comparison::Report(ComparisonReport {
        days_between: (latest.uploaded_at - previous.uploaded_at).num_days(),
        latest,
        previous,
        overall,
        summary,
        improved,
        worsened,
        stable,
        comparisons,
    }))
}

fn by_lowercase_name(values: BTreeMap<String, TestValue>) -> BTreeMap<String, TestValue> {
    values
        .into_values()
        .map(|v| (v.test_name.to_lowercase(), v))
        .collect()
}

/// One charted point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Every recorded value of a test for a user, oldest first, unmodified
pub fn trend(storage: &Storage, user_key: &str, test_name: &str) -> Result<Vec<TrendPoint>, MedMindError> {
    let series = storage.value_series(user_key, test_name, None)?;
    Ok(series
        .into_iter()
        .map(|p| TrendPoint { timestamp: p.uploaded_at, value: p.value.value })
        .collect())
}

/// Latest-vs-previous movement of one test plus its series statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub test_name: String,
    pub unit: String,
    pub latest_value: f64,
    pub previous_value: f64,
    pub change: f64,
    /// None when the previous value is zero
    pub pct_change: Option<f64>,
    pub movement: Movement,
    pub direction: Direction,
    pub reference_range: Option<String>,
    pub stats: SeriesStats,
    pub months: u32,
    pub points: Vec<TrendPoint>,
}

/// Outcome of a trend analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TrendAnalysis {
    NoData { test_name: String },
    /// A single data point in the window
    Insufficient { test_name: String, unit: String, latest: TrendPoint },
    Trend(TrendSummary),
}

/// Analyse one test over the last `months` (30-day months) before `now`
pub fn analyze_trend(
    storage: &Storage,
    table: &ReferenceTable,
    user_key: &str,
    test_name: &str,
    months: u32,
    stable_threshold_pct: f64,
    now: DateTime<Utc>,
) -> Result<TrendAnalysis, MedMindError> {
    let range = table
        .get(test_name)
        .ok_or_else(|| MedMindError::UnknownTest(test_name.to_string()))?;

    let since = now - Duration::days(i64::from(months) * 30);
    let series = storage.value_series(user_key, &range.test_name, Some(since))?;

    let (previous, latest) = match series.as_slice() {
        [] => return Ok(TrendAnalysis::NoData { test_name: range.test_name.clone() }),
        [only] => {
            return Ok(TrendAnalysis::Insufficient {
                test_name: range.test_name.clone(),
                unit: only.value.unit.clone(),
                latest: TrendPoint { timestamp: only.uploaded_at, value: only.value.value },
            })
        }
        [.., previous, latest] => (previous.value.value, latest.value.value),
    };

    let values: Vec<f64> = series.iter().map(|p| p.value.value).collect();
    let Some(stats) = SeriesStats::from_values(&values) else {
        return Ok(TrendAnalysis::NoData { test_name: range.test_name.clone() });
    };

    let change = latest - previous;
    let pct = pct_change(previous, latest);
    let (movement, direction) = match pct {
        Some(pct) => (
            movement(pct, stable_threshold_pct),
            classify_change(pct, range.higher_is_better, stable_threshold_pct),
        ),
        None if change == 0.0 => (Movement::Stable, Direction::Stable),
        None => {
            // Growth from zero has no percentage; judge the sign alone
            let signed = if change > 0.0 { f64::INFINITY } else { f64::NEG_INFINITY };
            (movement(signed, stable_threshold_pct), classify_change(signed, range.higher_is_better, stable_threshold_pct))
        }
    };

    Ok(TrendAnalysis::Trend(TrendSummary {
        test_name: range.test_name.clone(),
        unit: series[0].value.unit.clone(),
        latest_value: latest,
        previous_value: previous,
        change,
        pct_change: pct,
        movement,
        direction,
        reference_range: Some(range.format_range()),
        stats,
        months,
        points: series
            .iter()
            .map(|p| TrendPoint { timestamp: p.uploaded_at, value: p.value.value })
            .collect(),
    }))
}

/// Overall tracking statistics for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub has_data: bool,
    pub session_count: i64,
    pub total_values: i64,
    pub unique_tests: usize,
    pub tracking_days: i64,
    pub first_upload: Option<DateTime<Utc>>,
    pub latest_upload: Option<DateTime<Utc>>,
}

pub fn user_stats(storage: &Storage, user_key: &str) -> Result<UserStats, MedMindError> {
    let session_count = storage.session_count(user_key)?;
    if session_count == 0 {
        return Ok(UserStats {
            has_data: false,
            session_count: 0,
            total_values: 0,
            unique_tests: 0,
            tracking_days: 0,
            first_upload: None,
            latest_upload: None,
        });
    }

    let bounds = storage.first_and_latest(user_key)?;
    Ok(UserStats {
        has_data: true,
        session_count,
        total_values: storage.value_count(user_key)?,
        unique_tests: storage.distinct_tests(user_key)?.len(),
        tracking_days: bounds.map(|(first, latest)| (latest - first).num_days()).unwrap_or(0),
        first_upload: bounds.map(|(first, _)| first),
        latest_upload: bounds.map(|(_, latest)| latest),
    })
}
