use burn::module::{Module, Param, ParamId};
use burn::nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData, activation};

/// Linear layer with N(0, std) weights and zeroed bias.
pub(crate) fn normal_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    bias: bool,
    std: f64,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_bias(bias)
        .with_initializer(Initializer::Normal { mean: 0.0, std })
        .init(device);
    linear.bias = linear
        .bias
        .map(|_| Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}

pub(crate) fn linear_bias_ids<B: Backend>(layers: &[&Linear<B>]) -> Vec<ParamId> {
    layers
        .iter()
        .filter_map(|linear| linear.bias.as_ref().map(|bias| bias.id))
        .collect()
}

/// Additive mask, `-inf` above the diagonal, shaped `[1, 1, time, time]`.
fn causal_mask<B: Backend>(time: usize, device: &B::Device) -> Tensor<B, 4> {
    let mut values = vec![0.0f32; time * time];
    for row in 0..time {
        for col in (row + 1)..time {
            values[row * time + col] = f32::NEG_INFINITY;
        }
    }
    Tensor::<B, 2>::from_data(TensorData::new(values, [time, time]), device)
        .reshape([1, 1, time, time])
}

#[derive(Module, Debug)]
pub struct CausalSelfAttention<B: Backend> {
    c_attn: Linear<B>,
    c_proj: Linear<B>,
    attn_dropout: Dropout,
    resid_dropout: Dropout,
    n_head: usize,
}

impl<B: Backend> CausalSelfAttention<B> {
    pub fn new(
        n_embd: usize,
        n_head: usize,
        dropout: f64,
        bias: bool,
        proj_std: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            c_attn: normal_linear(n_embd, 3 * n_embd, bias, 0.02, device),
            c_proj: normal_linear(n_embd, n_embd, bias, proj_std, device),
            attn_dropout: DropoutConfig::new(dropout).init(),
            resid_dropout: DropoutConfig::new(dropout).init(),
            n_head,
        }
    }

    pub(crate) fn vector_param_ids(&self) -> Vec<ParamId> {
        linear_bias_ids(&[&self.c_attn, &self.c_proj])
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, time, embd] = x.shape().dims();
        let head_dim = embd / self.n_head;
        let device = x.device();

        let qkv = self.c_attn.forward(x);
        let heads = |index: usize| {
            qkv.clone()
                .slice_dim(2, index * embd..(index + 1) * embd)
                .reshape([batch, time, self.n_head, head_dim])
                .swap_dims(1, 2)
        };
        let query = heads(0);
        let key = heads(1);
        let value = heads(2);

        let scores = query
            .matmul(key.transpose())
            .mul_scalar(1.0 / (head_dim as f64).sqrt());
        let scores = scores + causal_mask::<B>(time, &device);
        let weights = self.attn_dropout.forward(activation::softmax(scores, 3));

        let y = weights
            .matmul(value)
            .swap_dims(1, 2)
            .reshape([batch, time, embd]);
        self.resid_dropout.forward(self.c_proj.forward(y))
    }
}
