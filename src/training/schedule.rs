//! Warmup-then-cosine learning-rate schedule.

use std::f64::consts::PI;

/// Linear warmup followed by cosine decay to zero.
///
/// The rate is a pure function of the optimizer step count, so resuming a run
/// only needs the restored global step.
#[derive(Debug, Clone, Copy)]
pub struct WarmupCosineLr {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl WarmupCosineLr {
    /// Build the schedule for a run of `total_steps` optimizer steps.
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    /// Learning rate at the given optimizer step.
    pub fn at(&self, step: usize) -> f64 {
        if self.warmup_steps > 0 && step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps as f64;
        }
        if self.total_steps <= self.warmup_steps || step >= self.total_steps {
            return 0.0;
        }
        let progress =
            (step - self.warmup_steps) as f64 / (self.total_steps - self.warmup_steps) as f64;
        self.base_lr * 0.5 * (1.0 + (PI * progress).cos())
    }
}
