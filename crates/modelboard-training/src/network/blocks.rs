use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig1d};
use burn::prelude::*;
use burn::tensor::activation;

/// Nonlinearity applied between layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Swish,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Relu => activation::relu(x),
            Self::Swish => activation::silu(x),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Swish => "swish",
        }
    }
}

/// Length-preserving 1d convolution, `[in, out]` channels.
pub fn conv1d<B: Backend>(channels: [usize; 2], kernel: usize, device: &B::Device) -> Conv1d<B> {
    Conv1dConfig::new(channels[0], channels[1], kernel).with_padding(PaddingConfig1d::Same).init(device)
}

/// `[batch, channels, length]` -> `[batch, channels]`
pub fn global_avg_pool<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 2> {
    x.mean_dim(2).flatten::<2>(1, 2)
}

/// Convolution followed by batch normalisation over `[batch, channels, length]`.
#[derive(Module, Debug)]
pub struct ConvNorm<B: Backend> {
    conv: Conv1d<B>,
    norm: BatchNorm<B, 1>,
}

impl<B: Backend> ConvNorm<B> {
    pub fn new(channels: [usize; 2], kernel: usize, device: &B::Device) -> Self {
        Self { conv: conv1d(channels, kernel, device), norm: BatchNormConfig::new(channels[1]).init(device) }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        self.norm.forward(self.conv.forward(input))
    }
}

/// Hidden dense layer, dropout and the class logits.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(features: usize, hidden: usize, num_classes: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            hidden: LinearConfig::new(features, hidden).init(device),
            dropout: DropoutConfig::new(dropout).init(),
            output: LinearConfig::new(hidden, num_classes).init(device),
        }
    }

    pub fn forward(&self, features: Tensor<B, 2>, activation: Activation) -> Tensor<B, 2> {
        let x = activation.apply(self.hidden.forward(features));
        self.output.forward(self.dropout.forward(x))
    }
}
