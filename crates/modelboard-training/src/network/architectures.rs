//! Classifier families for hand landmark sequences.
//!
//! Every network takes `[batch, channels, length]` and returns `[batch, classes]` logits.

use burn::nn::conv::Conv1d;
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;

use super::blocks::{Activation, ClassifierHead, ConvNorm, conv1d, global_avg_pool};
use super::{Classifier, ClassifierConfig, Device, TrainBackend};
use crate::dataset::InputShape;
use crate::trainer::LayerSummary;

fn conv_summary(kernel: usize, in_channels: usize, out_channels: usize, length: usize) -> LayerSummary {
    LayerSummary::Conv1d { kernel, in_channels, out_channels, out_length: length }
}

fn norm_summary(channels: usize, length: usize) -> LayerSummary {
    LayerSummary::BatchNorm { features: channels * length }
}

fn other(name: &str) -> LayerSummary {
    LayerSummary::Other { name: name.to_string() }
}

fn head_summaries(features: usize, hidden: usize, num_classes: usize, activation: Activation) -> Vec<LayerSummary> {
    vec![
        LayerSummary::Dense { inputs: features, units: hidden },
        other(activation.name()),
        other("dropout"),
        LayerSummary::Dense { inputs: hidden, units: num_classes },
    ]
}

// Baseline CNN

/// One convolution, flatten, and a dense head.
#[derive(Config, Debug)]
pub struct BaselineConfig {
    pub input: InputShape,
    pub num_classes: usize,
    #[config(default = 16)]
    pub filters: usize,
    #[config(default = 3)]
    pub kernel: usize,
    #[config(default = 32)]
    pub hidden: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct BaselineNet<B: Backend> {
    conv: Conv1d<B>,
    head: ClassifierHead<B>,
}

impl BaselineConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BaselineNet<B> {
        BaselineNet {
            conv: conv1d([self.input.channels, self.filters], self.kernel, device),
            head: ClassifierHead::new(
                self.filters * self.input.length,
                self.hidden,
                self.num_classes,
                self.dropout,
                device,
            ),
        }
    }
}

impl<B: Backend> Classifier<B> for BaselineNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = Activation::Relu.apply(self.conv.forward(input));
        self.head.forward(x.flatten::<2>(1, 2), Activation::Relu)
    }
}

impl ClassifierConfig for BaselineConfig {
    type Net = BaselineNet<TrainBackend>;

    fn for_task(input: InputShape, num_classes: usize) -> Self {
        Self::new(input, num_classes)
    }

    fn input(&self) -> InputShape {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn init_net(&self, device: &Device) -> Self::Net {
        self.init(device)
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        let InputShape { length, channels } = self.input;
        let mut layers = vec![conv_summary(self.kernel, channels, self.filters, length), other("relu"), other("flatten")];
        layers.extend(head_summaries(self.filters * length, self.hidden, self.num_classes, Activation::Relu));
        layers
    }
}

// SLIVE

const SLIVE_UNITS: [(usize, f64); 3] = [(64, 0.3), (32, 0.3), (16, 0.2)];

/// Fully connected stack over the flattened landmarks.
#[derive(Config, Debug)]
pub struct SliveConfig {
    pub input: InputShape,
    pub num_classes: usize,
}

/// Dense, batch norm, relu, dropout.
#[derive(Module, Debug)]
pub struct DenseUnit<B: Backend> {
    linear: Linear<B>,
    norm: BatchNorm<B, 0>,
    dropout: Dropout,
}

impl<B: Backend> DenseUnit<B> {
    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.norm.forward(self.linear.forward(x));
        self.dropout.forward(Activation::Relu.apply(x))
    }
}

#[derive(Module, Debug)]
pub struct SliveNet<B: Backend> {
    units: Vec<DenseUnit<B>>,
    output: Linear<B>,
}

impl SliveConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SliveNet<B> {
        let mut features = self.input.numel();
        let mut units = Vec::with_capacity(SLIVE_UNITS.len());
        for (width, dropout) in SLIVE_UNITS {
            units.push(DenseUnit {
                linear: LinearConfig::new(features, width).init(device),
                norm: BatchNormConfig::new(width).init(device),
                dropout: DropoutConfig::new(dropout).init(),
            });
            features = width;
        }
        SliveNet { units, output: LinearConfig::new(features, self.num_classes).init(device) }
    }
}

impl<B: Backend> Classifier<B> for SliveNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = self.units.iter().fold(input.flatten::<2>(1, 2), |x, unit| unit.forward(x));
        self.output.forward(x)
    }
}

impl ClassifierConfig for SliveConfig {
    type Net = SliveNet<TrainBackend>;

    fn for_task(input: InputShape, num_classes: usize) -> Self {
        Self::new(input, num_classes)
    }

    fn input(&self) -> InputShape {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn init_net(&self, device: &Device) -> Self::Net {
        self.init(device)
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        let mut layers = vec![other("flatten")];
        let mut features = self.input.numel();
        for (width, _) in SLIVE_UNITS {
            layers.extend([
                LayerSummary::Dense { inputs: features, units: width },
                norm_summary(width, 1),
                other("relu"),
                other("dropout"),
            ]);
            features = width;
        }
        layers.push(LayerSummary::Dense { inputs: features, units: self.num_classes });
        layers
    }
}

// ResNet

/// Convolutional stem followed by identity-shortcut residual blocks.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    pub input: InputShape,
    pub num_classes: usize,
    #[config(default = 16)]
    pub filters: usize,
    #[config(default = 2)]
    pub blocks: usize,
    #[config(default = 32)]
    pub hidden: usize,
    #[config(default = 0.3)]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    first: ConvNorm<B>,
    second: ConvNorm<B>,
}

impl<B: Backend> ResidualBlock<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let residual = self.second.forward(Activation::Relu.apply(self.first.forward(x.clone())));
        Activation::Relu.apply(x + residual)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<ResidualBlock<B>>,
    head: ClassifierHead<B>,
}

impl ResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let width = [self.filters, self.filters];
        ResNet {
            stem: ConvNorm::new([self.input.channels, self.filters], 5, device),
            blocks: (0..self.blocks)
                .map(|_| ResidualBlock { first: ConvNorm::new(width, 3, device), second: ConvNorm::new(width, 3, device) })
                .collect(),
            head: ClassifierHead::new(self.filters, self.hidden, self.num_classes, self.dropout, device),
        }
    }
}

impl<B: Backend> Classifier<B> for ResNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = Activation::Relu.apply(self.stem.forward(input));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.head.forward(global_avg_pool(x), Activation::Relu)
    }
}

impl ClassifierConfig for ResNetConfig {
    type Net = ResNet<TrainBackend>;

    fn for_task(input: InputShape, num_classes: usize) -> Self {
        Self::new(input, num_classes)
    }

    fn input(&self) -> InputShape {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn init_net(&self, device: &Device) -> Self::Net {
        self.init(device)
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        let InputShape { length, channels } = self.input;
        let f = self.filters;
        let mut layers = vec![conv_summary(5, channels, f, length), norm_summary(f, length), other("relu")];
        for _ in 0..self.blocks {
            layers.extend([
                conv_summary(3, f, f, length),
                norm_summary(f, length),
                other("relu"),
                conv_summary(3, f, f, length),
                norm_summary(f, length),
                other("add"),
                other("relu"),
            ]);
        }
        layers.push(other("global_avg_pool"));
        layers.extend(head_summaries(f, self.hidden, self.num_classes, Activation::Relu));
        layers
    }
}

// DenseNet

/// Densely connected layers: each one sees the concatenation of every earlier feature map.
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    pub input: InputShape,
    pub num_classes: usize,
    #[config(default = 16)]
    pub filters: usize,
    #[config(default = 16)]
    pub growth: usize,
    #[config(default = 32)]
    pub bottleneck: usize,
    #[config(default = 2)]
    pub layers: usize,
    #[config(default = 32)]
    pub hidden: usize,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl DenseNetConfig {
    fn out_channels(&self) -> usize {
        self.filters + self.layers * self.growth
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        let layers = (0..self.layers)
            .map(|i| {
                let channels = self.filters + i * self.growth;
                DenseLayer {
                    norm: BatchNormConfig::new(channels).init(device),
                    bottleneck: conv1d([channels, self.bottleneck], 1, device),
                    bottleneck_norm: BatchNormConfig::new(self.bottleneck).init(device),
                    conv: conv1d([self.bottleneck, self.growth], 3, device),
                }
            })
            .collect();
        DenseNet {
            stem: conv1d([self.input.channels, self.filters], 7, device),
            layers,
            norm: BatchNormConfig::new(self.out_channels()).init(device),
            head: ClassifierHead::new(self.out_channels(), self.hidden, self.num_classes, self.dropout, device),
        }
    }
}

/// Pre-activation bottleneck (1x1) then growth (3x3) convolution.
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    norm: BatchNorm<B, 1>,
    bottleneck: Conv1d<B>,
    bottleneck_norm: BatchNorm<B, 1>,
    conv: Conv1d<B>,
}

impl<B: Backend> DenseLayer<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let y = self.bottleneck.forward(Activation::Relu.apply(self.norm.forward(x.clone())));
        let y = self.conv.forward(Activation::Relu.apply(self.bottleneck_norm.forward(y)));
        Tensor::cat(vec![x, y], 1)
    }
}

#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    stem: Conv1d<B>,
    layers: Vec<DenseLayer<B>>,
    norm: BatchNorm<B, 1>,
    head: ClassifierHead<B>,
}

impl<B: Backend> Classifier<B> for DenseNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = self.layers.iter().fold(self.stem.forward(input), |x, layer| layer.forward(x));
        let x = Activation::Relu.apply(self.norm.forward(x));
        self.head.forward(global_avg_pool(x), Activation::Relu)
    }
}

impl ClassifierConfig for DenseNetConfig {
    type Net = DenseNet<TrainBackend>;

    fn for_task(input: InputShape, num_classes: usize) -> Self {
        Self::new(input, num_classes)
    }

    fn input(&self) -> InputShape {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn init_net(&self, device: &Device) -> Self::Net {
        self.init(device)
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        let InputShape { length, channels } = self.input;
        let mut layers = vec![conv_summary(7, channels, self.filters, length)];
        for i in 0..self.layers {
            let c = self.filters + i * self.growth;
            layers.extend([
                norm_summary(c, length),
                other("relu"),
                conv_summary(1, c, self.bottleneck, length),
                norm_summary(self.bottleneck, length),
                other("relu"),
                conv_summary(3, self.bottleneck, self.growth, length),
                other("concat"),
            ]);
        }
        let out = self.out_channels();
        layers.extend([norm_summary(out, length), other("relu"), other("global_avg_pool")]);
        layers.extend(head_summaries(out, self.hidden, self.num_classes, Activation::Relu));
        layers
    }
}

// EfficientNet

/// Swish stem followed by inverted-bottleneck (MBConv) blocks.
#[derive(Config, Debug)]
pub struct EfficientNetConfig {
    pub input: InputShape,
    pub num_classes: usize,
    #[config(default = 16)]
    pub filters: usize,
    #[config(default = 2)]
    pub expansion: usize,
    #[config(default = 2)]
    pub blocks: usize,
    #[config(default = 32)]
    pub hidden: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

/// Expand (1x1), filter (3x3), project (1x1), with an identity shortcut.
#[derive(Module, Debug)]
pub struct MbConv<B: Backend> {
    expand: ConvNorm<B>,
    filter: ConvNorm<B>,
    project: ConvNorm<B>,
}

impl<B: Backend> MbConv<B> {
    fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let y = Activation::Swish.apply(self.expand.forward(x.clone()));
        let y = Activation::Swish.apply(self.filter.forward(y));
        x + self.project.forward(y)
    }
}

#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    stem: ConvNorm<B>,
    blocks: Vec<MbConv<B>>,
    head: ClassifierHead<B>,
}

impl EfficientNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientNet<B> {
        let wide = self.filters * self.expansion;
        EfficientNet {
            stem: ConvNorm::new([self.input.channels, self.filters], 3, device),
            blocks: (0..self.blocks)
                .map(|_| MbConv {
                    expand: ConvNorm::new([self.filters, wide], 1, device),
                    filter: ConvNorm::new([wide, wide], 3, device),
                    project: ConvNorm::new([wide, self.filters], 1, device),
                })
                .collect(),
            head: ClassifierHead::new(self.filters, self.hidden, self.num_classes, self.dropout, device),
        }
    }
}

impl<B: Backend> Classifier<B> for EfficientNet<B> {
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = Activation::Swish.apply(self.stem.forward(input));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        self.head.forward(global_avg_pool(x), Activation::Swish)
    }
}

impl ClassifierConfig for EfficientNetConfig {
    type Net = EfficientNet<TrainBackend>;

    fn for_task(input: InputShape, num_classes: usize) -> Self {
        Self::new(input, num_classes)
    }

    fn input(&self) -> InputShape {
        self.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn init_net(&self, device: &Device) -> Self::Net {
        self.init(device)
    }

    fn layer_summaries(&self) -> Vec<LayerSummary> {
        let InputShape { length, channels } = self.input;
        let (f, wide) = (self.filters, self.filters * self.expansion);
        let mut layers = vec![conv_summary(3, channels, f, length), norm_summary(f, length), other("swish")];
        for _ in 0..self.blocks {
            layers.extend([
                conv_summary(1, f, wide, length),
                norm_summary(wide, length),
                other("swish"),
                conv_summary(3, wide, wide, length),
                norm_summary(wide, length),
                other("swish"),
                conv_summary(1, wide, f, length),
                norm_summary(f, length),
                other("add"),
            ]);
        }
        layers.push(other("global_avg_pool"));
        layers.extend(head_summaries(f, self.hidden, self.num_classes, Activation::Swish));
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    const HAND: InputShape = InputShape { length: 21, channels: 3 };

    fn logits_shape<C: Classifier<TestBackend>>(net: &C) -> [usize; 2] {
        net.forward(Tensor::zeros([4, 3, 21], &Default::default())).dims()
    }

    #[test]
    fn test_every_family_maps_landmarks_to_class_logits() {
        let device = Default::default();
        assert_eq!(logits_shape(&BaselineConfig::new(HAND, 5).init::<TestBackend>(&device)), [4, 5]);
        assert_eq!(logits_shape(&SliveConfig::new(HAND, 5).init::<TestBackend>(&device)), [4, 5]);
        assert_eq!(logits_shape(&ResNetConfig::new(HAND, 5).init::<TestBackend>(&device)), [4, 5]);
        assert_eq!(logits_shape(&DenseNetConfig::new(HAND, 5).init::<TestBackend>(&device)), [4, 5]);
        assert_eq!(logits_shape(&EfficientNetConfig::new(HAND, 5).init::<TestBackend>(&device)), [4, 5]);
    }

    #[test]
    fn test_dense_layers_grow_channels() {
        let config = DenseNetConfig::new(HAND, 3);
        assert_eq!(config.out_channels(), 48);
        let summaries = config.layer_summaries();
        assert!(summaries.contains(&LayerSummary::Dense { inputs: 48, units: 32 }));
    }

    #[test]
    fn test_baseline_summary_matches_parameter_count() {
        let config = BaselineConfig::new(HAND, 4);
        let net = config.init::<TestBackend>(&Default::default());
        // conv 3*16*3 + 16, dense 336*32 + 32, output 32*4 + 4
        assert_eq!(net.num_params(), 160 + 10_784 + 132);
        assert!(config.layer_summaries().contains(&LayerSummary::Dense { inputs: 336, units: 32 }));
    }
}
