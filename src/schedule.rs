use std::f64::consts::PI;

use burn::optim::LearningRate;
use burn::lr_scheduler::LrScheduler;
use burn::tensor::backend::Backend;

use crate::config::LearningRateConfig;

impl LearningRateConfig {
    /// Learning rate for optimizer step `iter`: linear warmup, then cosine
    /// decay to `min_lr` at `lr_decay_iters`, then flat at `min_lr`.
    /// With `decay_lr` off the base rate is returned unchanged.
    pub fn lr_at(&self, iter: usize) -> f64 {
        if !self.decay_lr {
            return self.learning_rate;
        }
        if iter < self.warmup_iters {
            return self.learning_rate * (iter + 1) as f64 / (self.warmup_iters + 1) as f64;
        }
        if iter > self.lr_decay_iters || self.lr_decay_iters <= self.warmup_iters {
            return self.min_lr;
        }

        let decay_ratio = (iter - self.warmup_iters) as f64
            / (self.lr_decay_iters - self.warmup_iters) as f64;
        let coeff = 0.5 * (1.0 + (PI * decay_ratio).cos());
        self.min_lr + coeff * (self.learning_rate - self.min_lr)
    }

    pub fn schedule(&self) -> WarmupCosineSchedule {
        WarmupCosineSchedule {
            config: self.clone(),
            iter: 0,
        }
    }
}

/// [`LrScheduler`] over [`LearningRateConfig::lr_at`]. The record is the next
/// iteration, so a restored schedule continues where it was saved.
#[derive(Debug, Clone)]
pub struct WarmupCosineSchedule {
    config: LearningRateConfig,
    iter: usize,
}

impl WarmupCosineSchedule {
    pub fn iteration(&self) -> usize {
        self.iter
    }
}

impl LrScheduler for WarmupCosineSchedule {
    type Record<B: Backend> = usize;

    fn step(&mut self) -> LearningRate {
        let lr = self.config.lr_at(self.iter);
        self.iter = self.iter.saturating_add(1);
        lr
    }

    fn to_record<B: Backend>(&self) -> Self::Record<B> {
        self.iter
    }

    fn load_record<B: Backend>(mut self, record: Self::Record<B>) -> Self {
        self.iter = record;
        self
    }
}
