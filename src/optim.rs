use burn::grad_clipping::GradientClippingConfig;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{AdamW, AdamWConfig, GradientsParams, LearningRate, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::model::Gpt;

impl OptimizerConfig {
    /// AdamW with the configured betas, decoupled weight decay and global
    /// norm clipping. A non-positive `grad_clip` leaves gradients unclipped.
    pub fn adamw(&self) -> AdamWConfig {
        let (beta_1, beta_2) = self.betas;
        let config = AdamWConfig::new()
            .with_beta_1(beta_1 as f32)
            .with_beta_2(beta_2 as f32)
            .with_weight_decay(self.weight_decay as f32);

        debug!(
            "adamw: betas=({beta_1}, {beta_2}), weight_decay={}, grad_clip={}",
            self.weight_decay, self.grad_clip
        );

        if self.grad_clip > 0.0 {
            config.with_grad_clipping(Some(GradientClippingConfig::Norm(self.grad_clip as f32)))
        } else {
            config
        }
    }

    /// AdamW split into two parameter groups: weight matrices and embeddings
    /// decay, 1-D parameters (biases, layer norm gains) do not.
    pub fn init_optimizer<B: AutodiffBackend>(&self) -> GptOptimizer<B> {
        GptOptimizer {
            decay: self.adamw().init(),
            no_decay: self.adamw().with_weight_decay(0.0).init(),
        }
    }
}

pub struct GptOptimizer<B: AutodiffBackend> {
    decay: OptimizerAdaptor<AdamW, Gpt<B>, B>,
    no_decay: OptimizerAdaptor<AdamW, Gpt<B>, B>,
}

impl<B: AutodiffBackend> GptOptimizer<B> {
    pub fn step(&mut self, lr: LearningRate, model: Gpt<B>, mut grads: GradientsParams) -> Gpt<B> {
        let mut vector_grads = GradientsParams::new();
        for id in model.vector_param_ids() {
            if let Some(grad) = grads.remove::<B::InnerBackend, 1>(id) {
                vector_grads.register::<B::InnerBackend, 1>(id, grad);
            }
        }

        let model = self.decay.step(lr, model, grads);
        self.no_decay.step(lr, model, vector_grads)
    }
}
