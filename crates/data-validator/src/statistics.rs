//! Window statistics for outlier detection

/// Mean and population standard deviation of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

impl WindowStats {
    /// `None` for an empty window
    pub fn compute(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
        })
    }

    /// Distance from the mean in standard deviations; `None` for a flat window
    pub fn z_score(&self, value: f64) -> Option<f64> {
        if self.std_dev > 0.0 {
            Some((value - self.mean).abs() / self.std_dev)
        } else {
            None
        }
    }
}
