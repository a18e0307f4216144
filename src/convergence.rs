use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Tolerance below which a mean is treated as zero in the stability guard.
const ZERO_MEAN_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceConfig {
    /// Rolling window length.
    pub window: usize,

    /// How many of the four criteria must hold.
    pub min_criteria: usize,

    pub stability_threshold: f64,
    pub trend_threshold: f64,
    pub variance_threshold: f64,
    pub improvement_threshold: f64,

    /// Performance gain used as the horizon for the cycles-until-convergence
    /// extrapolation.
    pub target_improvement: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            window: 20,
            min_criteria: 3,
            stability_threshold: 0.9,
            trend_threshold: 0.01,
            variance_threshold: 0.01,
            improvement_threshold: 0.01,
            target_improvement: 0.1,
        }
    }
}

/// Classification of the performance series at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceStatus {
    pub has_converged: bool,
    pub confidence: f64,
    pub stability: f64,
    pub trend: f64,
    pub variance: f64,
    pub improvement_rate: f64,
    pub status_message: String,
    /// Estimated cycles to convergence; `-1` when not estimable.
    pub cycles_until_convergence: i64,
    pub recommendations: Vec<String>,
}

impl ConvergenceStatus {
    fn insufficient_data(seen: usize, window: usize) -> Self {
        Self {
            has_converged: false,
            confidence: 0.0,
            stability: 0.0,
            trend: 0.0,
            variance: 0.0,
            improvement_rate: 0.0,
            status_message: format!("collecting data: {seen}/{window} performance samples"),
            cycles_until_convergence: -1,
            recommendations: vec!["continue training to fill the analysis window".to_string()],
        }
    }
}

/// Rolling-window stability/trend/variance classifier over a scalar
/// performance series.
///
/// Feeding the same value repeatedly converges: a constant series has zero
/// trend, zero variance, and maximal stability, regardless of call count.
#[derive(Debug)]
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
    window: VecDeque<f64>,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self {
            config,
            window: VecDeque::with_capacity(config.window),
        }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Records one performance scalar and reclassifies the window.
    pub fn record(&mut self, performance: f64) -> ConvergenceStatus {
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(performance);
        self.status()
    }

    /// Classifies the current window without mutating it.
    pub fn status(&self) -> ConvergenceStatus {
        let n = self.window.len();
        if n < self.config.window {
            return ConvergenceStatus::insufficient_data(n, self.config.window);
        }
        let values: Vec<f64> = self.window.iter().copied().collect();

        let stability = stability(&values);
        let trend = least_squares_slope(&values);
        let variance = variance(&values);
        let improvement_rate = improvement_rate(&values);

        let criteria = [
            stability >= self.config.stability_threshold,
            trend.abs() <= self.config.trend_threshold,
            variance <= self.config.variance_threshold,
            improvement_rate.abs() <= self.config.improvement_threshold,
        ];
        let satisfied = criteria.iter().filter(|&&c| c).count();
        let has_converged = satisfied >= self.config.min_criteria;

        // Mean of the continuous components, each mapped into [0, 1].
        let trend_score = 1.0 - (trend.abs() / (self.config.trend_threshold * 10.0)).min(1.0);
        let variance_score =
            1.0 - (variance / (self.config.variance_threshold * 10.0)).min(1.0);
        let confidence = ((stability + trend_score + variance_score) / 3.0).clamp(0.0, 1.0);

        let cycles_until_convergence = if has_converged || trend <= 0.0 || !trend.is_finite() {
            -1
        } else {
            ((self.config.target_improvement / trend).ceil() as i64).clamp(1, 1000)
        };

        let status_message = if has_converged {
            format!("converged: {satisfied}/4 criteria satisfied")
        } else {
            format!("not converged: {satisfied}/4 criteria satisfied")
        };

        let mut recommendations = Vec::new();
        if has_converged {
            recommendations.push("training has stabilized; consider stopping".to_string());
        } else {
            if stability < self.config.stability_threshold {
                recommendations
                    .push("performance is unstable; consider lowering the learning rate".to_string());
            }
            if trend.abs() > self.config.trend_threshold && trend > 0.0 {
                recommendations.push("performance is still improving; keep training".to_string());
            }
            if variance > self.config.variance_threshold {
                recommendations
                    .push("high variance; consider more evaluation games per cycle".to_string());
            }
        }

        ConvergenceStatus {
            has_converged,
            confidence,
            stability,
            trend,
            variance,
            improvement_rate,
            status_message,
            cycles_until_convergence,
            recommendations,
        }
    }
}

impl Default for ConvergenceDetector {
    fn default() -> Self {
        Self::new(ConvergenceConfig::default())
    }
}

// ============================================================================
// Window statistics
// ============================================================================

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

/// `1 / (1 + std / |mean|)`, guarded for a vanishing mean: a flat-at-zero
/// series is perfectly stable, a noisy zero-mean series is not stable at all.
fn stability(values: &[f64]) -> f64 {
    let m = mean(values).abs();
    let std = variance(values).sqrt();
    if m < ZERO_MEAN_EPS {
        if std < ZERO_MEAN_EPS { 1.0 } else { 0.0 }
    } else {
        1.0 / (1.0 + std / m)
    }
}

/// Slope of the least-squares line through `(i, values[i])`.
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    if denominator > 0.0 { numerator / denominator } else { 0.0 }
}

/// `(mean(second half) - mean(first half)) / (window / 2)`.
fn improvement_rate(values: &[f64]) -> f64 {
    let half = values.len() / 2;
    if half == 0 {
        return 0.0;
    }
    let first = mean(&values[..half]);
    let second = mean(&values[values.len() - half..]);
    (second - first) / half as f64
}
