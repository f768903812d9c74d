//! Per-epoch training metrics.

/// Receives the per-epoch metric summary.
///
/// The trainer reports averaged scalars once per epoch; implementations decide
/// where they go. [`LogSink`] writes them to the log, tests use an in-memory
/// recorder.
pub trait MetricsSink {
    /// Record the metrics for one finished epoch.
    fn log(&mut self, epoch: usize, metrics: &[(&str, f64)]);
}

/// Writes epoch metrics through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn log(&mut self, epoch: usize, metrics: &[(&str, f64)]) {
        let summary = metrics
            .iter()
            .map(|(name, value)| format!("{name}={value:.6}"))
            .collect::<Vec<_>>()
            .join(" ");
        log::info!("epoch {epoch}: {summary}");
    }
}

/// Streaming mean of a scalar metric over an epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    /// Add one observation.
    pub fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the observations so far, or 0 when empty.
    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Whether any observation was recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_mean() {
        let mut mean = RunningMean::default();
        assert!(mean.is_empty());
        assert_eq!(mean.value(), 0.0);

        mean.update(1.0);
        mean.update(2.0);
        mean.update(6.0);
        assert!((mean.value() - 3.0).abs() < 1e-12);
        assert!(!mean.is_empty());
    }
}
