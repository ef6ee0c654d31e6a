use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Mean next-token cross-entropy over every position in the batch.
pub fn language_model_loss<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let [batch, time, vocab] = logits.shape().dims();
    let device = logits.device();
    let loss = CrossEntropyLossConfig::new().init(&device);
    loss.forward(
        logits.reshape([batch * time, vocab]),
        targets.reshape([batch * time]),
    )
}
