//! Descriptive statistics for a series of lab values

use serde::{Deserialize, Serialize};

/// Statistical measures for one test's values over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl SeriesStats {
    /// Calculate statistics from values, None when empty
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let std_dev = calculate_std_dev(values, mean);

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Some(Self {
            count,
            mean,
            std_dev,
            min: sorted[0],
            max: sorted[count - 1],
            median: median(&sorted),
        })
    }

    /// Spread between the lowest and highest value
    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}

/// Median of sorted values, averaging the middle pair
fn median(sorted_values: &[f64]) -> f64 {
    let n = sorted_values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted_values[n / 2]
    } else {
        (sorted_values[n / 2 - 1] + sorted_values[n / 2]) / 2.0
    }
}

/// Sample standard deviation
fn calculate_std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance: f64 = values.iter()
        .map(|&v| (v - mean).powi(2))
        .sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_stats() {
        let stats = SeriesStats::from_values(&[200.0, 190.0, 185.0, 205.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 195.0).abs() < 0.01);
        assert_eq!(stats.min, 185.0);
        assert_eq!(stats.max, 205.0);
        assert!((stats.median - 195.0).abs() < 0.01);
        assert_eq!(stats.range(), 20.0);
        assert!((stats.std_dev - 9.13).abs() < 0.01);
    }

    #[test]
    fn test_single_value() {
        let stats = SeriesStats::from_values(&[5.4]).unwrap();
        assert_eq!(stats.median, 5.4);
        assert_eq!(stats.std_dev, 0.0);
        assert!(SeriesStats::from_values(&[]).is_none());
    }
}
